//! Observer-side replica of session state
//!
//! The mirror is written only by server broadcasts. Possession changes carry
//! an epoch; anything older than what the mirror already holds is dropped.

use std::collections::HashMap;

use uuid::Uuid;

use crate::game::possession::{TokenSnapshot, TokenState};
use crate::game::projectile::LaunchedDisc;
use crate::ws::protocol::{PlayerInfo, PlayerSnapshot, ServerMsg};

/// Read-only view of one session as seen by a connected client
#[derive(Debug, Clone, Default)]
pub struct SessionMirror {
    self_id: Option<Uuid>,
    session_id: Option<Uuid>,
    token: TokenSnapshot,
    players: HashMap<Uuid, PlayerInfo>,
    poses: HashMap<Uuid, PlayerSnapshot>,
    last_snapshot_tick: u64,
    last_launch: Option<LaunchedDisc>,
}

impl SessionMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn self_id(&self) -> Option<Uuid> {
        self.self_id
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    pub fn token(&self) -> TokenSnapshot {
        self.token
    }

    pub fn epoch(&self) -> u64 {
        self.token.epoch
    }

    pub fn holder(&self) -> Option<Uuid> {
        self.token.state.holder()
    }

    pub fn holds(&self, user_id: Uuid) -> bool {
        self.holder() == Some(user_id)
    }

    /// Holder has the disc but it is not shown on their avatar
    pub fn visual_missing(&self, user_id: Uuid) -> bool {
        self.holds(user_id) && !self.token.state.is_visible()
    }

    pub fn players(&self) -> &HashMap<Uuid, PlayerInfo> {
        &self.players
    }

    pub fn pose(&self, user_id: &Uuid) -> Option<&PlayerSnapshot> {
        self.poses.get(user_id)
    }

    pub fn last_launch(&self) -> Option<&LaunchedDisc> {
        self.last_launch.as_ref()
    }

    /// Fold one server message in. Returns the epoch to acknowledge, if any.
    pub fn apply(&mut self, msg: &ServerMsg) -> Option<u64> {
        match msg {
            ServerMsg::Welcome { user_id, .. } => {
                self.self_id = Some(*user_id);
                None
            }
            ServerMsg::SessionJoined {
                session_id,
                players,
                token,
                ..
            } => {
                self.session_id = Some(*session_id);
                self.players = players.iter().map(|p| (p.user_id, p.clone())).collect();
                self.poses.clear();
                self.last_snapshot_tick = 0;
                self.adopt(*token);
                None
            }
            ServerMsg::PlayerJoined { player } => {
                self.players.insert(player.user_id, player.clone());
                None
            }
            ServerMsg::PlayerLeft { user_id, .. } => {
                self.players.remove(user_id);
                self.poses.remove(user_id);
                None
            }
            ServerMsg::Snapshot {
                tick,
                players,
                token,
            } => {
                if *tick > self.last_snapshot_tick {
                    self.last_snapshot_tick = *tick;
                    self.poses = players.iter().map(|p| (p.user_id, p.clone())).collect();
                    self.adopt(*token);
                }
                None
            }
            ServerMsg::PossessionChanged { epoch, token, .. } => {
                if *epoch < self.token.epoch {
                    return None;
                }
                self.token = *token;
                Some(*epoch)
            }
            ServerMsg::VisualPresence {
                epoch,
                user_id,
                present,
                anchor,
            } => {
                if *epoch < self.token.epoch {
                    return None;
                }
                if let TokenState::Held {
                    holder,
                    visible,
                    anchor: token_anchor,
                    ..
                } = &mut self.token.state
                {
                    if holder == user_id {
                        *visible = *present;
                        *token_anchor = *anchor;
                    }
                }
                None
            }
            ServerMsg::ProjectileLaunched {
                projectile_id,
                thrower,
                launch,
            } => {
                self.last_launch = Some(LaunchedDisc {
                    projectile_id: *projectile_id,
                    thrower: *thrower,
                    launch: *launch,
                });
                None
            }
            ServerMsg::RequestDenied { .. } | ServerMsg::Error { .. } | ServerMsg::Pong { .. } => {
                None
            }
        }
    }

    fn adopt(&mut self, token: TokenSnapshot) {
        if token.epoch >= self.token.epoch {
            self.token = token;
        }
    }
}
