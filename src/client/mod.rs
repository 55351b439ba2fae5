//! Client-side half: the local avatar, its server mirror, scripted input

pub mod avatar;
pub mod mirror;
pub mod script;

pub use avatar::{AvatarTuning, LocalAvatar};
pub use mirror::SessionMirror;
pub use script::{HeldLevels, ScriptStep, ScriptedIntents};
