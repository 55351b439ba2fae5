//! Time utilities for the fixed-step simulation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Tick rate configuration
pub const SIMULATION_TPS: u32 = 50; // matches a 0.02s physics step
pub const SNAPSHOT_TPS: u32 = 25;
pub const TICK_DURATION_MICROS: u64 = 1_000_000 / SIMULATION_TPS as u64;

/// Calculate delta time for physics (in seconds)
pub fn tick_delta() -> f32 {
    1.0 / SIMULATION_TPS as f32
}

/// Whole number of simulation ticks covering `duration` (rounded up, never zero)
pub fn ticks_for(duration: Duration) -> u64 {
    let ticks = (duration.as_secs_f64() * SIMULATION_TPS as f64).ceil() as u64;
    ticks.max(1)
}

/// Same as [`ticks_for`] for a duration expressed in seconds
pub fn ticks_for_secs(secs: f32) -> u64 {
    ticks_for(Duration::from_secs_f32(secs.max(0.0)))
}
