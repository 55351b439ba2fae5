//! Session state and authoritative tick loop

use dashmap::DashMap;
use glam::Vec3;
use parking_lot::RwLock;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::util::time::{ticks_for, unix_millis, SIMULATION_TPS, SNAPSHOT_TPS, TICK_DURATION_MICROS};
use crate::ws::protocol::{ClientMsg, PlayerInfo, ServerMsg, SpawnPoint};

use super::authority::{AuthorityNode, AuthorityRequest};
use super::body::Orientation;
use super::dive::Posture;
use super::possession::{Hand, TokenSnapshot};
use super::projectile::RelaySpawner;
use super::snapshot::{SnapshotBuilder, SnapshotStats};
use super::tuning::ThrowTuning;
use super::PlayerInput;

/// Spawn ring around the session origin
const SPAWN_MIN_RADIUS: f32 = 2.0;
const SPAWN_MAX_RADIUS: f32 = 6.0;
const MAX_DISPLAY_NAME: usize = 24;
/// Sessions nobody ever joins are torn down after this many ticks
const IDLE_TICKS: u64 = SIMULATION_TPS as u64 * 30;

/// Error code sent privately when a join finds no free seat
pub const SESSION_FULL: &str = "session_full";

/// Who a server message is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    All,
    Only(Uuid),
}

/// A server message plus its recipients
#[derive(Debug, Clone)]
pub struct Outbound {
    pub audience: Audience,
    pub msg: ServerMsg,
}

impl Outbound {
    pub fn all(msg: ServerMsg) -> Self {
        Self {
            audience: Audience::All,
            msg,
        }
    }

    pub fn to(user_id: Uuid, msg: ServerMsg) -> Self {
        Self {
            audience: Audience::Only(user_id),
            msg,
        }
    }

    pub fn is_for(&self, user_id: Uuid) -> bool {
        match self.audience {
            Audience::All => true,
            Audience::Only(id) => id == user_id,
        }
    }
}

/// Session tunables derived from [`Config`]
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub max_players: usize,
    pub relay_timeout_ticks: u64,
    pub throw: ThrowTuning,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_players: config.max_players_per_session,
            relay_timeout_ticks: ticks_for(config.relay_timeout),
            throw: ThrowTuning::default(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_players: 14,
            relay_timeout_ticks: ticks_for(Duration::from_millis(1_000)),
            throw: ThrowTuning::default(),
        }
    }
}

/// Relayed state of one connected avatar
#[derive(Debug, Clone)]
pub struct SessionPlayer {
    pub user_id: Uuid,
    pub display_name: String,

    // Last reported pose
    pub position: Vec3,
    pub orientation: Orientation,
    pub velocity: Vec3,
    pub posture: Posture,
    pub grounded: bool,
    pub hand: Hand,

    pub last_report_seq: u32,
    pub joined_at: u64,
}

impl SessionPlayer {
    pub fn new(user_id: Uuid, display_name: String, position: Vec3, yaw: f32) -> Self {
        Self {
            user_id,
            display_name,
            position,
            orientation: Orientation::from_yaw(yaw),
            velocity: Vec3::ZERO,
            posture: Posture::Upright,
            grounded: false,
            hand: Hand::default(),
            last_report_seq: 0,
            joined_at: unix_millis(),
        }
    }

    pub fn info(&self) -> PlayerInfo {
        PlayerInfo {
            user_id: self.user_id,
            display_name: self.display_name.clone(),
        }
    }
}

/// Read-only view published for the HTTP layer
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub seed: u64,
    pub tick: u64,
    pub players: Vec<PlayerInfo>,
    pub token: TokenSnapshot,
}

/// Synchronous session rules. Owned by the [`GameSession`] task.
pub struct SessionCore {
    id: Uuid,
    seed: u64,
    tick: u64,
    players: HashMap<Uuid, SessionPlayer>,
    authority: AuthorityNode,
    spawner: RelaySpawner,
    rng: ChaCha8Rng,
    settings: SessionSettings,
    ever_joined: bool,
    launches: u64,
}

impl SessionCore {
    pub fn new(id: Uuid, seed: u64, settings: SessionSettings) -> Self {
        Self {
            id,
            seed,
            tick: 0,
            players: HashMap::new(),
            authority: AuthorityNode::new(settings.throw, settings.relay_timeout_ticks),
            spawner: RelaySpawner::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            settings,
            ever_joined: false,
            launches: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn players(&self) -> &HashMap<Uuid, SessionPlayer> {
        &self.players
    }

    pub fn player(&self, user_id: &Uuid) -> Option<&SessionPlayer> {
        self.players.get(user_id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn authority(&self) -> &AuthorityNode {
        &self.authority
    }

    pub fn launches(&self) -> u64 {
        self.launches
    }

    /// Everyone left, or nobody ever came
    pub fn is_abandoned(&self) -> bool {
        if self.ever_joined {
            self.players.is_empty()
        } else {
            self.tick >= IDLE_TICKS
        }
    }

    pub fn summary(&self) -> SessionSummary {
        let mut players: Vec<PlayerInfo> = self.players.values().map(|p| p.info()).collect();
        players.sort_by_key(|p| p.user_id);
        SessionSummary {
            id: self.id,
            seed: self.seed,
            tick: self.tick,
            players,
            token: self.authority.token(),
        }
    }

    /// Apply one client message
    pub fn handle_input(&mut self, input: PlayerInput) -> Vec<Outbound> {
        let user_id = input.user_id;
        match input.msg {
            ClientMsg::JoinSession { display_name } => self.handle_join(user_id, display_name),
            ClientMsg::StateReport {
                seq,
                position,
                orientation,
                velocity,
                posture,
                grounded,
                hand,
            } => {
                self.handle_report(
                    user_id,
                    seq,
                    position,
                    orientation,
                    velocity,
                    posture,
                    grounded,
                    hand,
                );
                Vec::new()
            }
            ClientMsg::RequestCatch { position, hand } => {
                self.handle_request(user_id, AuthorityRequest::Catch { position, hand })
            }
            ClientMsg::RequestThrow {
                charge,
                origin,
                aim,
                position,
            } => self.handle_request(
                user_id,
                AuthorityRequest::Throw {
                    charge,
                    origin,
                    aim,
                    position,
                },
            ),
            ClientMsg::SetVisualPresence { present, anchor } => self.handle_request(
                user_id,
                AuthorityRequest::SetVisualPresence { present, anchor },
            ),
            ClientMsg::AckPossession { epoch } => {
                if self.authority.acknowledge(user_id, epoch) {
                    debug!(session_id = %self.id, epoch, "Possession relay complete");
                }
                Vec::new()
            }
            ClientMsg::Ping { t } => vec![Outbound::to(user_id, ServerMsg::Pong { t })],
            ClientMsg::LeaveSession => self.handle_leave(user_id),
        }
    }

    /// Advance one simulation tick
    pub fn advance(&mut self) -> Vec<Outbound> {
        self.tick += 1;
        if let Some(epoch) = self.authority.tick(self.tick) {
            debug!(session_id = %self.id, epoch, "Relay closed by timeout");
        }
        Vec::new()
    }

    fn handle_join(&mut self, user_id: Uuid, display_name: String) -> Vec<Outbound> {
        if self.players.contains_key(&user_id) {
            warn!(user_id = %user_id, "Player already in session");
            return Vec::new();
        }

        if self.players.len() >= self.settings.max_players {
            return vec![Outbound::to(
                user_id,
                ServerMsg::Error {
                    code: SESSION_FULL.to_string(),
                    message: "Session is full".to_string(),
                },
            )];
        }

        let spawn = self.generate_spawn();
        let player = SessionPlayer::new(
            user_id,
            sanitize_name(&display_name, user_id),
            spawn.position,
            spawn.yaw,
        );
        let info = player.info();
        self.players.insert(user_id, player);
        self.ever_joined = true;

        let granted = self.authority.register(user_id, spawn.position, self.tick);

        let mut players: Vec<PlayerInfo> = self.players.values().map(|p| p.info()).collect();
        players.sort_by_key(|p| p.user_id);

        let mut out = vec![
            Outbound::all(ServerMsg::PlayerJoined { player: info }),
            Outbound::to(
                user_id,
                ServerMsg::SessionJoined {
                    session_id: self.id,
                    seed: self.seed,
                    spawn,
                    players,
                    token: self.authority.token(),
                },
            ),
        ];
        out.extend(granted.into_iter().map(Outbound::all));

        info!(
            session_id = %self.id,
            user_id = %user_id,
            player_count = self.players.len(),
            "Player joined session"
        );
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_report(
        &mut self,
        user_id: Uuid,
        seq: u32,
        position: Vec3,
        orientation: Orientation,
        velocity: Vec3,
        posture: Posture,
        grounded: bool,
        hand: Hand,
    ) {
        let Some(player) = self.players.get_mut(&user_id) else {
            return;
        };
        if seq <= player.last_report_seq && player.last_report_seq != 0 {
            return;
        }
        if !position.is_finite() || !velocity.is_finite() || !orientation.is_finite() {
            warn!(user_id = %user_id, seq, "Dropping non-finite state report");
            return;
        }

        player.last_report_seq = seq;
        player.position = position;
        player.orientation = orientation;
        player.velocity = velocity;
        player.posture = posture;
        player.grounded = grounded;
        player.hand = hand;

        self.authority.update_hand(user_id, hand);
    }

    fn handle_request(&mut self, user_id: Uuid, request: AuthorityRequest) -> Vec<Outbound> {
        let kind = request.kind();
        match self
            .authority
            .handle(user_id, request, self.tick, &mut self.spawner)
        {
            Ok(msgs) => {
                for disc in self.spawner.drain() {
                    self.launches += 1;
                    info!(
                        session_id = %self.id,
                        thrower = %disc.thrower,
                        impulse = disc.launch.magnitude(),
                        "Disc launched"
                    );
                }
                msgs.into_iter().map(Outbound::all).collect()
            }
            Err(reason) => {
                debug!(
                    session_id = %self.id,
                    user_id = %user_id,
                    request = ?kind,
                    %reason,
                    "Request denied"
                );
                vec![Outbound::to(
                    user_id,
                    ServerMsg::RequestDenied {
                        request: kind,
                        reason,
                        epoch: self.authority.epoch(),
                    },
                )]
            }
        }
    }

    fn handle_leave(&mut self, user_id: Uuid) -> Vec<Outbound> {
        if self.players.remove(&user_id).is_none() {
            return Vec::new();
        }

        let mut out: Vec<Outbound> = self
            .authority
            .unregister(user_id, self.tick)
            .into_iter()
            .map(Outbound::all)
            .collect();
        out.push(Outbound::all(ServerMsg::PlayerLeft {
            user_id,
            reason: "disconnected".to_string(),
        }));

        info!(
            session_id = %self.id,
            user_id = %user_id,
            "Player left session"
        );
        out
    }

    /// Random point on the spawn ring, facing the origin
    fn generate_spawn(&mut self) -> SpawnPoint {
        let angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
        let distance = self.rng.gen_range(SPAWN_MIN_RADIUS..SPAWN_MAX_RADIUS);
        let position = Vec3::new(angle.cos() * distance, 0.0, angle.sin() * distance);
        let yaw = (-position.x).atan2(-position.z);
        SpawnPoint { position, yaw }
    }
}

fn sanitize_name(raw: &str, user_id: Uuid) -> String {
    let trimmed: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_DISPLAY_NAME)
        .collect();
    if trimmed.is_empty() {
        format!("Player_{}", &user_id.simple().to_string()[..8])
    } else {
        trimmed
    }
}

/// Handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    pub input_tx: mpsc::Sender<PlayerInput>,
    pub outbound_tx: broadcast::Sender<Outbound>,
    pub player_count: Arc<AtomicUsize>,
    pub summary: Arc<RwLock<SessionSummary>>,
}

impl SessionHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.outbound_tx.subscribe()
    }

    pub fn summary(&self) -> SessionSummary {
        self.summary.read().clone()
    }
}

/// Registry of all active sessions
pub struct SessionRegistry {
    sessions: DashMap<Uuid, SessionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<SessionHandle> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    pub fn insert(&self, handle: SessionHandle) {
        self.sessions.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<SessionHandle> {
        self.sessions.remove(id).map(|(_, h)| h)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn total_players(&self) -> usize {
        self.sessions
            .iter()
            .map(|s| s.value().player_count())
            .sum()
    }

    /// Find a session with open seats. `reserved` counts seats promised to
    /// joins the session task has not processed yet.
    pub fn find_available<F>(&self, max_players: usize, reserved: F) -> Option<SessionHandle>
    where
        F: Fn(&Uuid) -> usize,
    {
        self.sessions
            .iter()
            .find(|entry| {
                let handle = entry.value();
                handle.player_count().max(reserved(&handle.id)) < max_players
            })
            .map(|entry| entry.value().clone())
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut all: Vec<SessionSummary> =
            self.sessions.iter().map(|s| s.value().summary()).collect();
        all.sort_by_key(|s| s.id);
        all
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The authoritative session task
pub struct GameSession {
    core: SessionCore,
    input_rx: mpsc::Receiver<PlayerInput>,
    outbound_tx: broadcast::Sender<Outbound>,
    snapshot_builder: SnapshotBuilder,
    stats: SnapshotStats,
    player_count: Arc<AtomicUsize>,
    summary: Arc<RwLock<SessionSummary>>,
}

impl GameSession {
    /// Create a new session
    pub fn new(id: Uuid, seed: u64, settings: SessionSettings) -> (Self, SessionHandle) {
        let (input_tx, input_rx) = mpsc::channel(256);
        let (outbound_tx, _) = broadcast::channel(256);
        let player_count = Arc::new(AtomicUsize::new(0));
        let core = SessionCore::new(id, seed, settings);
        let summary = Arc::new(RwLock::new(core.summary()));

        let handle = SessionHandle {
            id,
            input_tx,
            outbound_tx: outbound_tx.clone(),
            player_count: player_count.clone(),
            summary: summary.clone(),
        };

        let snapshot_interval = SIMULATION_TPS / SNAPSHOT_TPS;
        let session = Self {
            core,
            input_rx,
            outbound_tx,
            snapshot_builder: SnapshotBuilder::new(snapshot_interval),
            stats: SnapshotStats::default(),
            player_count,
            summary,
        };

        (session, handle)
    }

    /// Run the authoritative tick loop until the session empties
    pub async fn run(mut self) {
        info!(session_id = %self.core.id(), "Session started");

        let tick_duration = Duration::from_micros(TICK_DURATION_MICROS);
        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick_interval.tick().await;

            if !self.process_inputs() {
                info!(session_id = %self.core.id(), "Input channel closed");
                break;
            }

            let out = self.core.advance();
            self.publish(out);

            if self.snapshot_builder.should_send() {
                let snapshot = self.snapshot_builder.build(
                    self.core.tick(),
                    self.core.players(),
                    self.core.authority(),
                );
                if let Ok(bytes) = serde_json::to_vec(&snapshot) {
                    self.stats.record(self.core.player_count(), bytes.len());
                }
                let _ = self.outbound_tx.send(Outbound::all(snapshot));
                *self.summary.write() = self.core.summary();
            }

            if self.core.is_abandoned() {
                info!(session_id = %self.core.id(), "All players left, ending session");
                break;
            }
        }

        info!(
            session_id = %self.core.id(),
            ticks = self.core.tick(),
            launches = self.core.launches(),
            snapshots = self.stats.total_snapshots,
            snapshot_bytes = self.stats.total_bytes,
            avg_players = self.stats.avg_players_per_snapshot,
            "Session finished"
        );
    }

    /// Drain the input queue; false once every sender is gone
    fn process_inputs(&mut self) -> bool {
        loop {
            match self.input_rx.try_recv() {
                Ok(input) => {
                    let out = self.core.handle_input(input);
                    self.publish(out);
                }
                Err(mpsc::error::TryRecvError::Empty) => return true,
                Err(mpsc::error::TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn publish(&mut self, out: Vec<Outbound>) {
        for outbound in out {
            if matches!(
                outbound.msg,
                ServerMsg::PossessionChanged { .. }
                    | ServerMsg::PlayerJoined { .. }
                    | ServerMsg::PlayerLeft { .. }
            ) {
                self.snapshot_builder.force_next();
            }
            let _ = self.outbound_tx.send(outbound);
        }
        self.player_count
            .store(self.core.player_count(), Ordering::Relaxed);
    }
}
