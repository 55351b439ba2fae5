//! Per-step input intent and camera frame

use glam::Vec3;

const DEGENERATE_EPSILON: f32 = 1e-6;

/// Edge/level view of a single button for one simulation step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ButtonEdges {
    /// Went down this step
    pub down: bool,
    /// Is down this step
    pub held: bool,
    /// Went up this step
    pub up: bool,
}

/// Derives button edges from consecutive held levels
#[derive(Debug, Clone, Copy, Default)]
pub struct ButtonLatch {
    was_held: bool,
}

impl ButtonLatch {
    pub fn sample(&mut self, held: bool) -> ButtonEdges {
        let edges = ButtonEdges {
            down: held && !self.was_held,
            held,
            up: !held && self.was_held,
        };
        self.was_held = held;
        edges
    }
}

/// Everything the avatar reads from the player for one step
#[derive(Debug, Clone, Copy, Default)]
pub struct InputIntent {
    /// Strafe axis in [-1, 1]
    pub horizontal: f32,
    /// Forward axis in [-1, 1]
    pub vertical: f32,
    pub sprint_held: bool,
    /// Jump button went down this step
    pub jump: bool,
    pub dive: ButtonEdges,
    pub throw: ButtonEdges,
    pub hand_left: bool,
    pub hand_right: bool,
    pub catch_held: bool,
}

impl InputIntent {
    /// Axes clamped into [-1, 1], with non-finite values treated as released
    pub fn axes(&self) -> (f32, f32) {
        fn clean(v: f32) -> f32 {
            if v.is_finite() {
                v.clamp(-1.0, 1.0)
            } else {
                0.0
            }
        }
        (clean(self.horizontal), clean(self.vertical))
    }
}

/// Source of per-step intents (keyboard, gamepad, script, network)
pub trait IntentSource {
    fn sample(&mut self, tick: u64) -> InputIntent;
}

/// Camera orientation as seen by locomotion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraFrame {
    /// Raw look direction, used for aiming throws
    pub look: Vec3,
    /// Look direction projected on the ground plane, unit length or zero
    pub forward: Vec3,
    /// Camera right projected on the ground plane, unit length or zero
    pub right: Vec3,
}

impl CameraFrame {
    pub fn new(look: Vec3, right: Vec3) -> Self {
        Self {
            look,
            forward: ground_project(look),
            right: ground_project(right),
        }
    }

    /// Frame whose right vector is derived from the look direction
    pub fn looking(look: Vec3) -> Self {
        let forward = ground_project(look);
        Self {
            look,
            forward,
            right: Vec3::new(forward.z, 0.0, -forward.x),
        }
    }

    /// True when either projected axis collapsed to zero length
    pub fn is_degenerate(&self) -> bool {
        self.forward == Vec3::ZERO || self.right == Vec3::ZERO
    }
}

fn ground_project(v: Vec3) -> Vec3 {
    let flat = Vec3::new(v.x, 0.0, v.z);
    if !flat.is_finite() || flat.length_squared() < DEGENERATE_EPSILON {
        Vec3::ZERO
    } else {
        flat.normalize()
    }
}
