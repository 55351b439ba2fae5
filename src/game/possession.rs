//! Token custody types shared by the authority and its mirrors

use glam::Vec3;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tuning::ThrowTuning;

/// Whether an entity holds the disc
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Possession {
    #[default]
    Unpossessed,
    Possessed,
}

/// Which hand the disc is rendered in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hand {
    Left,
    #[default]
    Right,
}

impl Hand {
    /// Hand picked by the held-key levels this step; left wins ties
    pub fn select(current: Hand, left_held: bool, right_held: bool) -> Hand {
        if left_held {
            Hand::Left
        } else if right_held {
            Hand::Right
        } else {
            current
        }
    }

    /// Hand anchor in avatar-local space
    pub fn local_offset(self, tuning: &ThrowTuning) -> Vec3 {
        match self {
            Hand::Right => tuning.hand_offset,
            Hand::Left => Vec3::new(-tuning.hand_offset.x, tuning.hand_offset.y, tuning.hand_offset.z),
        }
    }
}

/// Per-entity custody: possession plus the anchor recorded at the last change
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Custody {
    pub possession: Possession,
    pub anchor: Vec3,
}

impl Custody {
    pub fn holds(&self) -> bool {
        self.possession == Possession::Possessed
    }

    pub fn acquire(&mut self, position: Vec3) {
        self.possession = Possession::Possessed;
        self.anchor = position;
    }

    pub fn release(&mut self, position: Vec3) {
        self.possession = Possession::Unpossessed;
        self.anchor = position;
    }

    pub fn refresh_anchor(&mut self, position: Vec3) {
        self.anchor = position;
    }

    /// Movement gate: free when not holding, otherwise only inside the tether
    pub fn tether_allows(&self, position: Vec3, radius: f32) -> bool {
        !self.holds() || position.distance(self.anchor) < radius
    }
}

/// Ground-truth lifecycle of the session's disc
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TokenState {
    #[default]
    Unclaimed,
    Held {
        holder: Uuid,
        hand: Hand,
        visible: bool,
        anchor: Vec3,
    },
    /// Launched; flight is simulated elsewhere
    InFlight { projectile_id: Uuid, thrower: Uuid },
}

impl TokenState {
    pub fn holder(&self) -> Option<Uuid> {
        match self {
            TokenState::Held { holder, .. } => Some(*holder),
            _ => None,
        }
    }

    pub fn is_visible(&self) -> bool {
        matches!(self, TokenState::Held { visible: true, .. })
    }
}

/// Token state stamped with the possession epoch that produced it
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TokenSnapshot {
    pub epoch: u64,
    pub state: TokenState,
}

/// Throw charge accumulated while the throw button is held
#[derive(Debug, Clone, Copy, Default)]
pub struct ChargeMeter {
    charge: f32,
    holding: bool,
}

impl ChargeMeter {
    pub fn charge(&self) -> f32 {
        self.charge
    }

    pub fn is_holding(&self) -> bool {
        self.holding
    }

    pub fn press(&mut self) {
        self.holding = true;
        self.charge = 0.0;
    }

    pub fn hold(&mut self, rate: f32, dt: f32) {
        if self.holding {
            self.charge += rate * dt;
        }
    }

    /// Button released; yields the charge if a press was tracked and resets
    pub fn release(&mut self) -> Option<f32> {
        let was_holding = std::mem::take(&mut self.holding);
        let charge = std::mem::take(&mut self.charge);
        was_holding.then_some(charge)
    }

    pub fn cancel(&mut self) {
        *self = Self::default();
    }
}
