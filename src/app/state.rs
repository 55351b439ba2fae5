//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::{SessionRegistry, SessionSettings};
use crate::lobby::LobbyService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub lobby: Arc<LobbyService>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        // Initialize session registry
        let registry = Arc::new(SessionRegistry::new());

        // Lobby seats players into sessions sized from config
        let settings = SessionSettings::from_config(&config);
        let lobby = Arc::new(LobbyService::new(registry.clone(), settings));

        Self {
            config,
            registry,
            lobby,
        }
    }
}
