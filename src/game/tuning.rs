//! Gameplay tuning constants

use glam::Vec3;

/// Locomotion constants for a player avatar
#[derive(Debug, Clone, Copy)]
pub struct LocomotionTuning {
    /// Speed the avatar settles at without sprint
    pub base_speed: f32,
    /// Speed the avatar ramps toward while sprint is held
    pub sprint_speed: f32,
    /// Per-step interpolation factor toward sprint speed
    pub sprint_ramp: f32,
    /// Per-step interpolation factor back toward base speed
    pub base_ramp: f32,
    /// Turn rate multiplier applied to the heading error
    pub rotation_speed: f32,
    /// Upward impulse applied on jump
    pub jump_impulse: f32,
    /// Max displacement from the possession anchor while holding the disc
    pub tether_radius: f32,
}

impl Default for LocomotionTuning {
    fn default() -> Self {
        Self {
            base_speed: 5.0,
            sprint_speed: 10.0,
            sprint_ramp: 0.1,
            base_ramp: 0.04,
            rotation_speed: 10.0,
            jump_impulse: 5.0,
            tether_radius: 1.0,
        }
    }
}

/// Layout (dive) constants
#[derive(Debug, Clone, Copy)]
pub struct DiveTuning {
    /// Forward impulse applied when the layout starts
    pub impulse: f32,
    /// Seconds between releasing the dive button and standing back up
    pub duration: f32,
}

impl Default for DiveTuning {
    fn default() -> Self {
        Self {
            impulse: 10.0,
            duration: 0.5,
        }
    }
}

/// Throw constants
#[derive(Debug, Clone, Copy)]
pub struct ThrowTuning {
    /// Charge gained per second of holding the throw button
    pub charge_rate: f32,
    /// Lower clamp applied to charge before launch
    pub charge_min: f32,
    /// Upper clamp applied to charge before launch
    pub charge_max: f32,
    /// Launch force constant multiplied by the squared charge
    pub launch_force: f32,
    /// Upward bias added to the aim vector
    pub upward_bias: f32,
    /// Right hand anchor in avatar-local space (left hand mirrors x)
    pub hand_offset: Vec3,
}

impl ThrowTuning {
    /// Impulse magnitude for a given accumulated charge
    pub fn launch_impulse(&self, charge: f32) -> f32 {
        let charge = if charge.is_finite() { charge } else { self.charge_min };
        let clamped = charge.clamp(self.charge_min, self.charge_max);
        clamped * clamped * self.launch_force
    }
}

impl Default for ThrowTuning {
    fn default() -> Self {
        Self {
            charge_rate: 3.0,
            charge_min: 1.0,
            charge_max: 2.0,
            launch_force: 10.0,
            upward_bias: 0.1,
            hand_offset: Vec3::new(0.35, 1.1, 0.3),
        }
    }
}

/// Rigid body constants for the kinematic avatar body
#[derive(Debug, Clone, Copy)]
pub struct BodyTuning {
    pub mass: f32,
    /// Vertical acceleration (negative is down)
    pub gravity: f32,
    /// Fraction of horizontal velocity shed per second while on the ground
    pub ground_drag: f32,
    /// Height of the flat playing field
    pub ground_height: f32,
}

impl Default for BodyTuning {
    fn default() -> Self {
        Self {
            mass: 1.0,
            gravity: -9.81,
            ground_drag: 4.0,
            ground_height: 0.0,
        }
    }
}
