//! Disc session server
//!
//! Server-authoritative custody for a single shared disc, relayed to every
//! observer in a session, plus the client-side avatar core (locomotion,
//! layout dive, throw charge) that drives one player's entity.

pub mod app;
pub mod client;
pub mod config;
pub mod game;
pub mod http;
pub mod lobby;
pub mod util;
pub mod ws;
