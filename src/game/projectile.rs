//! Disc launch: charge-scaled impulse and the projectile spawner seam

use glam::Vec3;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tuning::ThrowTuning;

/// Spawn pose and impulse handed to the flight simulation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Launch {
    pub origin: Vec3,
    /// Unit direction the disc faces and travels
    pub direction: Vec3,
    pub impulse: Vec3,
}

impl Launch {
    /// Launch along `aim` with the configured upward bias.
    ///
    /// A degenerate aim throws straight up rather than producing NaNs.
    pub fn aimed(origin: Vec3, aim: Vec3, charge: f32, tuning: &ThrowTuning) -> Self {
        let biased = aim + Vec3::Y * tuning.upward_bias;
        let direction = if biased.is_finite() {
            biased.normalize_or(Vec3::Y)
        } else {
            Vec3::Y
        };
        Self {
            origin,
            direction,
            impulse: direction * tuning.launch_impulse(charge),
        }
    }

    pub fn magnitude(&self) -> f32 {
        self.impulse.length()
    }
}

/// A launched disc as announced to observers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LaunchedDisc {
    pub projectile_id: Uuid,
    pub thrower: Uuid,
    pub launch: Launch,
}

/// Creates the independently simulated flight object for a throw
pub trait ProjectileSpawner {
    fn spawn(&mut self, thrower: Uuid, launch: Launch) -> LaunchedDisc;
}

/// Server-side spawner: assigns ids and keeps the launches for relay
#[derive(Debug, Default)]
pub struct RelaySpawner {
    launched: Vec<LaunchedDisc>,
}

impl RelaySpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launches since the last drain
    pub fn drain(&mut self) -> Vec<LaunchedDisc> {
        std::mem::take(&mut self.launched)
    }
}

impl ProjectileSpawner for RelaySpawner {
    fn spawn(&mut self, thrower: Uuid, launch: Launch) -> LaunchedDisc {
        let disc = LaunchedDisc {
            projectile_id: Uuid::new_v4(),
            thrower,
            launch,
        };
        self.launched.push(disc);
        disc
    }
}
