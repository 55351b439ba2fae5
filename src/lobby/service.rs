//! Lobby service - seats players in sessions and spawns session tasks

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::game::{GameSession, Outbound, PlayerInput, SessionHandle, SessionRegistry, SessionSettings};
use crate::ws::protocol::ClientMsg;

#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    #[error("player is already seated in a session")]
    AlreadySeated,

    #[error("session {0} is no longer accepting input")]
    SessionClosed(Uuid),
}

/// A player's place in a session: the handle plus a receiver subscribed
/// before the join was sent, so the join reply is never missed
pub struct Seat {
    pub handle: SessionHandle,
    pub outbound_rx: broadcast::Receiver<Outbound>,
}

/// Lobby service
pub struct LobbyService {
    registry: Arc<SessionRegistry>,
    settings: SessionSettings,
    /// Map of player -> current session, written before the join is sent
    seats: Arc<DashMap<Uuid, Uuid>>,
    /// Serializes choosing a session with reserving the seat
    placement: Arc<Mutex<()>>,
}

impl LobbyService {
    pub fn new(registry: Arc<SessionRegistry>, settings: SessionSettings) -> Self {
        Self {
            registry,
            settings,
            seats: Arc::new(DashMap::new()),
            placement: Arc::new(Mutex::new(())),
        }
    }

    /// Seat a player in a session with free slots, opening one if needed
    pub async fn join(&self, user_id: Uuid, display_name: String) -> Result<Seat, LobbyError> {
        let handle = self.reserve(user_id)?;

        let outbound_rx = handle.subscribe();
        let join = PlayerInput {
            user_id,
            msg: ClientMsg::JoinSession { display_name },
        };
        if handle.input_tx.send(join).await.is_err() {
            warn!(user_id = %user_id, session_id = %handle.id, "Failed to send join to session");
            self.seats.remove(&user_id);
            return Err(LobbyError::SessionClosed(handle.id));
        }

        Ok(Seat {
            handle,
            outbound_rx,
        })
    }

    /// Tell the session, then release the player's seat. The leave is queued
    /// ahead of any join that could take the freed seat.
    pub async fn leave(&self, user_id: Uuid) {
        let Some(session_id) = self.session_of(&user_id) else {
            return;
        };

        if let Some(handle) = self.registry.get(&session_id) {
            let leave = PlayerInput {
                user_id,
                msg: ClientMsg::LeaveSession,
            };
            if handle.input_tx.send(leave).await.is_err() {
                warn!(user_id = %user_id, session_id = %session_id, "Session gone before leave");
            }
        }
        self.seats.remove(&user_id);

        info!(user_id = %user_id, session_id = %session_id, "Player released from lobby");
    }

    /// Get player's current session ID
    pub fn session_of(&self, user_id: &Uuid) -> Option<Uuid> {
        self.seats.get(user_id).map(|r| *r)
    }

    pub fn seated_players(&self) -> usize {
        self.seats.len()
    }

    /// Seats held in `session_id`, including joins still in flight
    pub fn seats_in(&self, session_id: &Uuid) -> usize {
        self.seats.iter().filter(|s| s.value() == session_id).count()
    }

    fn reserve(&self, user_id: Uuid) -> Result<SessionHandle, LobbyError> {
        let _placement = self.placement.lock();
        if self.seats.contains_key(&user_id) {
            return Err(LobbyError::AlreadySeated);
        }

        let handle = match self
            .registry
            .find_available(self.settings.max_players, |id| self.seats_in(id))
        {
            Some(handle) => handle,
            None => self.create_session(),
        };
        self.seats.insert(user_id, handle.id);
        Ok(handle)
    }

    fn create_session(&self) -> SessionHandle {
        let session_id = Uuid::new_v4();
        let seed = rand::random::<u64>();
        let (session, handle) = GameSession::new(session_id, seed, self.settings);

        self.registry.insert(handle.clone());
        info!(session_id = %session_id, seed, "Created new session");

        let registry = self.registry.clone();
        let seats = self.seats.clone();
        tokio::spawn(async move {
            session.run().await;

            // Cleanup after session ends
            registry.remove(&session_id);
            seats.retain(|_, sid| *sid != session_id);

            info!(session_id = %session_id, "Session removed from registry");
        });

        handle
    }
}

impl Clone for LobbyService {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            settings: self.settings,
            seats: self.seats.clone(),
            placement: self.placement.clone(),
        }
    }
}
