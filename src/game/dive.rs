//! Layout (dive) posture state machine

use std::f32::consts::FRAC_PI_2;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::body::PhysicsBody;
use super::timers::TimerWheel;
use super::tuning::DiveTuning;
use crate::util::time::ticks_for_secs;

/// Body posture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Posture {
    #[default]
    Upright,
    LaidOut,
}

impl Posture {
    pub fn is_laid_out(self) -> bool {
        matches!(self, Posture::LaidOut)
    }
}

/// Outcome of a dive button edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiveOutcome {
    /// Layout started this step
    LaidOut,
    /// Recovery timer armed, fires at the given tick
    RecoveryScheduled { at: u64 },
    Ignored,
}

/// Per-entity dive machine. Recovery runs through a [`TimerWheel`] entry keyed
/// by the entity id; a second release while one is outstanding is ignored.
#[derive(Debug, Clone)]
pub struct DiveMachine {
    entity: Uuid,
    posture: Posture,
    tuning: DiveTuning,
}

impl DiveMachine {
    pub fn new(entity: Uuid, tuning: DiveTuning) -> Self {
        Self {
            entity,
            posture: Posture::Upright,
            tuning,
        }
    }

    pub fn posture(&self) -> Posture {
        self.posture
    }

    pub fn duration_ticks(&self) -> u64 {
        ticks_for_secs(self.tuning.duration)
    }

    /// Dive button went down. Lays out when upright and not holding the disc.
    pub fn press<B: PhysicsBody>(&mut self, body: &mut B, holding_token: bool) -> DiveOutcome {
        if holding_token || self.posture.is_laid_out() {
            return DiveOutcome::Ignored;
        }

        let orientation = body.orientation();
        let forward = orientation.forward();
        let push = if forward.is_finite() { forward } else { Vec3::ZERO };
        body.apply_impulse(push * self.tuning.impulse);
        body.set_orientation(orientation.with_pitch(FRAC_PI_2));

        self.posture = Posture::LaidOut;
        DiveOutcome::LaidOut
    }

    /// Dive button went up. Arms the recovery timer if laid out and none is pending.
    pub fn release(&mut self, now: u64, timers: &mut TimerWheel<Uuid>) -> DiveOutcome {
        if !self.posture.is_laid_out() {
            return DiveOutcome::Ignored;
        }
        let at = now + self.duration_ticks();
        if timers.schedule_if_absent(self.entity, at) {
            DiveOutcome::RecoveryScheduled { at }
        } else {
            DiveOutcome::Ignored
        }
    }

    /// Recovery timer fired: stop, stand up, clear layout
    pub fn recover<B: PhysicsBody>(&mut self, body: &mut B) -> bool {
        if !self.posture.is_laid_out() {
            return false;
        }
        body.set_velocity(Vec3::ZERO);
        body.set_angular_velocity(Vec3::ZERO);
        body.set_orientation(body.orientation().with_pitch(0.0));
        self.posture = Posture::Upright;
        true
    }
}
