//! Avatar rigid body and the physics collaborator seam

use glam::{EulerRot, Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::tuning::BodyTuning;

/// Euler orientation (yaw about Y, then pitch about X, then roll about Z).
///
/// Kept as angles rather than a quaternion so a face-down layout can restore
/// yaw and roll exactly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

impl Orientation {
    pub fn from_yaw(yaw: f32) -> Self {
        Self {
            yaw,
            ..Default::default()
        }
    }

    pub fn with_pitch(self, pitch: f32) -> Self {
        Self { pitch, ..self }
    }

    pub fn is_finite(self) -> bool {
        self.yaw.is_finite() && self.pitch.is_finite() && self.roll.is_finite()
    }

    pub fn to_quat(self) -> Quat {
        Quat::from_euler(EulerRot::YXZ, self.yaw, self.pitch, self.roll)
    }

    /// Facing direction (+Z at zero yaw)
    pub fn forward(self) -> Vec3 {
        self.to_quat() * Vec3::Z
    }

    /// Facing direction on the ground plane, ignoring pitch and roll
    pub fn heading(self) -> Vec3 {
        Vec3::new(self.yaw.sin(), 0.0, self.yaw.cos())
    }

    /// Rotate a point from avatar-local space by yaw only
    pub fn yaw_rotate(self, local: Vec3) -> Vec3 {
        Quat::from_rotation_y(self.yaw) * local
    }
}

/// Raised when the body lands on the ground plane
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundContact {
    pub position: Vec3,
}

/// What locomotion and the dive need from the physics engine
pub trait PhysicsBody {
    fn position(&self) -> Vec3;
    /// Teleport-style move, bypassing velocity
    fn move_position(&mut self, position: Vec3);
    fn velocity(&self) -> Vec3;
    fn set_velocity(&mut self, velocity: Vec3);
    fn set_angular_velocity(&mut self, angular: Vec3);
    fn apply_impulse(&mut self, impulse: Vec3);
    fn orientation(&self) -> Orientation;
    fn set_orientation(&mut self, orientation: Orientation);
}

/// Minimal body integrated against a flat field
#[derive(Debug, Clone)]
pub struct KinematicBody {
    position: Vec3,
    velocity: Vec3,
    angular_velocity: Vec3,
    orientation: Orientation,
    resting: bool,
    tuning: BodyTuning,
}

impl KinematicBody {
    pub fn new(position: Vec3, orientation: Orientation, tuning: BodyTuning) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            orientation,
            resting: false,
            tuning,
        }
    }

    pub fn angular_velocity(&self) -> Vec3 {
        self.angular_velocity
    }

    /// Advance one step. Returns a contact on the step the body comes to
    /// rest on the ground after being off it (or on the first step after spawn).
    pub fn integrate(&mut self, dt: f32) -> Option<GroundContact> {
        let floor = self.tuning.ground_height;

        self.velocity.y += self.tuning.gravity * dt;
        self.position += self.velocity * dt;
        self.orientation.yaw += self.angular_velocity.y * dt;

        if self.position.y > floor {
            self.resting = false;
            return None;
        }

        self.position.y = floor;
        self.velocity.y = self.velocity.y.max(0.0);

        let keep = (1.0 - self.tuning.ground_drag * dt).clamp(0.0, 1.0);
        self.velocity.x *= keep;
        self.velocity.z *= keep;

        if self.resting {
            return None;
        }
        self.resting = true;
        Some(GroundContact {
            position: self.position,
        })
    }
}

impl PhysicsBody for KinematicBody {
    fn position(&self) -> Vec3 {
        self.position
    }

    fn move_position(&mut self, position: Vec3) {
        if position.is_finite() {
            self.position = position;
        }
    }

    fn velocity(&self) -> Vec3 {
        self.velocity
    }

    fn set_velocity(&mut self, velocity: Vec3) {
        self.velocity = velocity;
    }

    fn set_angular_velocity(&mut self, angular: Vec3) {
        self.angular_velocity = angular;
    }

    fn apply_impulse(&mut self, impulse: Vec3) {
        if self.tuning.mass > 0.0 {
            self.velocity += impulse / self.tuning.mass;
        }
    }

    fn orientation(&self) -> Orientation {
        self.orientation
    }

    fn set_orientation(&mut self, orientation: Orientation) {
        self.orientation = orientation;
    }
}
