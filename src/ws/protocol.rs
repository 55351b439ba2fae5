//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use glam::Vec3;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::authority::{DenyReason, RequestKind};
use crate::game::body::Orientation;
use crate::game::dive::Posture;
use crate::game::possession::{Hand, TokenSnapshot};
use crate::game::projectile::Launch;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Take a seat in a session (sent by the lobby on connect)
    JoinSession { display_name: String },

    /// Client-authoritative pose for the locally controlled avatar
    StateReport {
        /// Monotonic per-client sequence; older reports are dropped
        seq: u32,
        position: Vec3,
        orientation: Orientation,
        velocity: Vec3,
        posture: Posture,
        grounded: bool,
        hand: Hand,
    },

    /// Ask to take the disc
    RequestCatch {
        /// Where the catcher stands; becomes the tether anchor
        position: Vec3,
        hand: Hand,
    },

    /// Ask to throw the held disc
    RequestThrow {
        charge: f32,
        /// Hand anchor the disc leaves from
        origin: Vec3,
        /// Raw camera look direction
        aim: Vec3,
        position: Vec3,
    },

    /// Show or hide the disc on the sender's avatar
    SetVisualPresence { present: bool, anchor: Vec3 },

    /// Observer received the possession change with this epoch
    AckPossession { epoch: u64 },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Leave current session
    LeaveSession,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome { user_id: Uuid, server_time: u64 },

    /// Confirmation of session join, with everything a late joiner needs
    SessionJoined {
        session_id: Uuid,
        seed: u64,
        /// Spawn pose assigned to the joining player
        spawn: SpawnPoint,
        players: Vec<PlayerInfo>,
        token: TokenSnapshot,
    },

    /// Player joined the session
    PlayerJoined { player: PlayerInfo },

    /// Player left the session
    PlayerLeft { user_id: Uuid, reason: String },

    /// Relayed avatar poses (sent at regular intervals)
    Snapshot {
        tick: u64,
        players: Vec<PlayerSnapshot>,
        token: TokenSnapshot,
    },

    /// Authoritative custody change; observers acknowledge `epoch`
    PossessionChanged {
        epoch: u64,
        holder: Option<Uuid>,
        previous: Option<Uuid>,
        /// Anchor recorded for the entity whose custody changed
        anchor: Vec3,
        hand: Hand,
        visible: bool,
        token: TokenSnapshot,
    },

    /// Disc shown/hidden on an avatar
    VisualPresence {
        epoch: u64,
        user_id: Uuid,
        present: bool,
        anchor: Vec3,
    },

    /// Disc left a hand; flight is simulated by the receiver
    ProjectileLaunched {
        projectile_id: Uuid,
        thrower: Uuid,
        launch: Launch,
    },

    /// Sent only to the requester when the authority refuses a request
    RequestDenied {
        request: RequestKind,
        reason: DenyReason,
        epoch: u64,
    },

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

/// Player info for join/leave notices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub user_id: Uuid,
    pub display_name: String,
}

/// Spawn pose handed to a joining player
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnPoint {
    pub position: Vec3,
    pub yaw: f32,
}

/// Player state in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub user_id: Uuid,
    pub position: Vec3,
    pub orientation: Orientation,
    pub velocity: Vec3,
    pub posture: Posture,
    pub grounded: bool,
    pub hand: Hand,
    /// Authority's view of custody
    pub holds_token: bool,
    /// Last processed state report sequence
    pub last_report_seq: u32,
}
