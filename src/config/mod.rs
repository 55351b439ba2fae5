//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origin(s) for CORS, comma-separated
    pub client_origin: String,
    /// Seats per session before the lobby opens a new one
    pub max_players_per_session: usize,
    /// How long the authority waits for every observer to acknowledge a
    /// possession change before it stops waiting
    pub relay_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let max_players_per_session = match lookup("MAX_PLAYERS_PER_SESSION") {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidNumber("MAX_PLAYERS_PER_SESSION"))?,
            None => 14,
        };

        let relay_timeout_ms = match lookup("RELAY_TIMEOUT_MS") {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidNumber("RELAY_TIMEOUT_MS"))?,
            None => 1_000,
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            client_origin: lookup("CLIENT_ORIGIN")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            max_players_per_session,
            relay_timeout: Duration::from_millis(relay_timeout_ms),
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Environment variable {0} must be a valid number")]
    InvalidNumber(&'static str),
}
