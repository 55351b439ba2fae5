//! Game simulation modules

pub mod authority;
pub mod body;
pub mod dive;
pub mod intent;
pub mod locomotion;
pub mod possession;
pub mod projectile;
pub mod session;
pub mod snapshot;
pub mod timers;
pub mod tuning;

pub use authority::{AuthorityNode, AuthorityRequest, DenyReason, RequestKind};
pub use session::{
    Audience, GameSession, Outbound, SessionCore, SessionHandle, SessionRegistry,
    SessionSettings, SessionSummary, SESSION_FULL,
};

use crate::ws::protocol::ClientMsg;
use uuid::Uuid;

/// Player input received from WebSocket
#[derive(Debug, Clone)]
pub struct PlayerInput {
    pub user_id: Uuid,
    pub msg: ClientMsg,
}
