//! Session lobby

pub mod service;

pub use service::{LobbyError, LobbyService, Seat};
