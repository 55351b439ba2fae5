//! Client-side locomotion: speed ramp, camera-relative movement, turning, jump

use std::f32::consts::{PI, TAU};

use glam::Vec3;

use super::body::PhysicsBody;
use super::dive::Posture;
use super::intent::{CameraFrame, InputIntent};
use super::possession::Custody;
use super::tuning::LocomotionTuning;

/// Whether the avatar is standing on something it can jump from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroundState {
    Grounded,
    #[default]
    Airborne,
}

/// What one locomotion step did to the body
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LocomotionStep {
    /// Displacement applied this step
    pub displacement: Vec3,
    /// Yaw change applied this step (radians)
    pub turned: f32,
    pub jumped: bool,
    /// Movement was suppressed by the possession tether
    pub tethered: bool,
}

/// Per-avatar locomotion controller
#[derive(Debug, Clone)]
pub struct LocomotionController {
    tuning: LocomotionTuning,
    speed: f32,
    ground: GroundState,
}

impl LocomotionController {
    pub fn new(tuning: LocomotionTuning) -> Self {
        Self {
            speed: tuning.base_speed,
            ground: GroundState::Airborne,
            tuning,
        }
    }

    pub fn tuning(&self) -> &LocomotionTuning {
        &self.tuning
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn ground(&self) -> GroundState {
        self.ground
    }

    /// Ground contact reported by the physics collaborator
    pub fn land(&mut self) {
        self.ground = GroundState::Grounded;
    }

    /// Hold speed at a fixed value (layout start)
    pub fn pin_speed(&mut self, speed: f32) {
        self.speed = speed;
    }

    /// Back to base speed (layout end)
    pub fn reset_speed(&mut self) {
        self.speed = self.tuning.base_speed;
    }

    /// Ease current speed toward sprint or base speed. Pinned while laid out.
    pub fn ramp_speed(&mut self, sprint_held: bool, posture: Posture) {
        if posture.is_laid_out() {
            return;
        }
        let (target, factor) = if sprint_held {
            (self.tuning.sprint_speed, self.tuning.sprint_ramp)
        } else {
            (self.tuning.base_speed, self.tuning.base_ramp)
        };
        self.speed = lerp(self.speed, target, factor);
    }

    /// Jump impulse on a jump edge while grounded and upright
    pub fn try_jump<B: PhysicsBody>(&mut self, body: &mut B, jump: bool, posture: Posture) -> bool {
        if !jump || posture.is_laid_out() || self.ground != GroundState::Grounded {
            return false;
        }
        body.apply_impulse(Vec3::Y * self.tuning.jump_impulse);
        self.ground = GroundState::Airborne;
        true
    }

    /// Camera-relative movement vector for this step, `None` on a degenerate frame
    pub fn movement(&self, horizontal: f32, vertical: f32, camera: &CameraFrame) -> Option<Vec3> {
        if camera.is_degenerate() {
            return None;
        }
        let wish = vertical * camera.forward + horizontal * camera.right;
        Some(wish.normalize_or_zero() * self.speed)
    }

    /// Rotate toward the camera heading in proportion to the heading error
    pub fn turn_toward<B: PhysicsBody>(
        &self,
        body: &mut B,
        camera: &CameraFrame,
        posture: Posture,
        dt: f32,
    ) -> f32 {
        if posture.is_laid_out() || camera.forward == Vec3::ZERO {
            return 0.0;
        }
        let mut orientation = body.orientation();
        let error = signed_yaw_between(orientation.heading(), camera.forward);
        let step = error * (self.tuning.rotation_speed * dt).clamp(0.0, 1.0);
        orientation.yaw = wrap_angle(orientation.yaw + step);
        body.set_orientation(orientation);
        step
    }

    /// One fixed simulation step for the locally controlled avatar
    pub fn step<B: PhysicsBody>(
        &mut self,
        body: &mut B,
        intent: &InputIntent,
        camera: &CameraFrame,
        custody: &Custody,
        posture: Posture,
        dt: f32,
    ) -> LocomotionStep {
        let mut out = LocomotionStep {
            jumped: self.try_jump(body, intent.jump, posture),
            ..Default::default()
        };

        let (horizontal, vertical) = intent.axes();
        if let Some(movement) = self.movement(horizontal, vertical, camera) {
            if custody.tether_allows(body.position(), self.tuning.tether_radius) {
                out.displacement = movement * dt;
                body.move_position(body.position() + out.displacement);
            } else {
                out.tethered = true;
            }
        }

        out.turned = self.turn_toward(body, camera, posture, dt);
        out
    }
}

fn lerp(from: f32, to: f32, t: f32) -> f32 {
    from + (to - from) * t.clamp(0.0, 1.0)
}

/// Signed angle about +Y that turns `from` onto `to` (both on the ground plane)
pub fn signed_yaw_between(from: Vec3, to: Vec3) -> f32 {
    let from_yaw = from.x.atan2(from.z);
    let to_yaw = to.x.atan2(to.z);
    wrap_angle(to_yaw - from_yaw)
}

/// Wrap an angle into (-PI, PI]
pub fn wrap_angle(angle: f32) -> f32 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped == -PI {
        PI
    } else {
        wrapped
    }
}
