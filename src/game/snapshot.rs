//! Snapshot building for relayed avatar poses

use std::collections::HashMap;
use uuid::Uuid;

use crate::ws::protocol::{PlayerSnapshot, ServerMsg};

use super::authority::AuthorityNode;
use super::session::SessionPlayer;

/// Builds snapshots for network transmission
pub struct SnapshotBuilder {
    /// Tick counter since last snapshot
    ticks_since_snapshot: u32,
    /// Snapshot interval in ticks
    snapshot_interval: u32,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval: snapshot_interval.max(1),
        }
    }

    /// Check if it's time to send a snapshot
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Force snapshot on next check (used after custody changes)
    pub fn force_next(&mut self) {
        self.ticks_since_snapshot = self.snapshot_interval;
    }

    /// Build a snapshot message. Custody comes from the authority, never from reports.
    pub fn build(
        &self,
        tick: u64,
        players: &HashMap<Uuid, SessionPlayer>,
        authority: &AuthorityNode,
    ) -> ServerMsg {
        let mut player_snapshots: Vec<PlayerSnapshot> = players
            .values()
            .map(|p| PlayerSnapshot {
                user_id: p.user_id,
                position: p.position,
                orientation: p.orientation,
                velocity: p.velocity,
                posture: p.posture,
                grounded: p.grounded,
                hand: p.hand,
                holds_token: authority
                    .custody(&p.user_id)
                    .map(|c| c.holds())
                    .unwrap_or(false),
                last_report_seq: p.last_report_seq,
            })
            .collect();
        player_snapshots.sort_by_key(|p| p.user_id);

        ServerMsg::Snapshot {
            tick,
            players: player_snapshots,
            token: authority.token(),
        }
    }
}

/// Snapshot stats for debugging
#[derive(Debug, Default)]
pub struct SnapshotStats {
    pub total_snapshots: u64,
    pub total_bytes: u64,
    pub avg_players_per_snapshot: f32,
}

impl SnapshotStats {
    pub fn record(&mut self, player_count: usize, bytes: usize) {
        self.total_snapshots += 1;
        self.total_bytes += bytes as u64;

        // Running average
        let n = self.total_snapshots as f32;
        self.avg_players_per_snapshot =
            self.avg_players_per_snapshot * ((n - 1.0) / n) + (player_count as f32 / n);
    }
}
