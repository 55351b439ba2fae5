//! Possession authority: the single writer of disc custody.
//!
//! Every custody change goes through [`AuthorityNode::handle`]. A change bumps
//! the token epoch and opens a relay that waits for each registered observer
//! to acknowledge that epoch. While a relay is open, further catch/throw
//! requests are refused with [`DenyReason::RelayPending`] instead of being
//! queued. Relays that never complete are closed by timeout from
//! [`AuthorityNode::tick`].

use std::collections::{HashMap, HashSet};

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::possession::{Custody, Hand, TokenSnapshot, TokenState};
use super::projectile::{Launch, ProjectileSpawner};
use super::timers::TimerWheel;
use super::tuning::ThrowTuning;
use crate::ws::protocol::ServerMsg;

/// Why a protocol request was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    #[error("requester already holds the disc")]
    AlreadyHolding,

    #[error("requester does not hold the disc")]
    NotHolding,

    #[error("disc is held by another player")]
    HeldByOther,

    #[error("previous possession change is still being relayed")]
    RelayPending,

    #[error("requester is not part of this session")]
    UnknownEntity,

    #[error("request carries non-finite values")]
    InvalidInput,
}

/// Request family, echoed back in denials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Catch,
    Throw,
    SetVisualPresence,
}

/// A custody-affecting request from one entity
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AuthorityRequest {
    Catch {
        position: Vec3,
        hand: Hand,
    },
    Throw {
        charge: f32,
        origin: Vec3,
        aim: Vec3,
        position: Vec3,
    },
    SetVisualPresence {
        present: bool,
        anchor: Vec3,
    },
}

impl AuthorityRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            AuthorityRequest::Catch { .. } => RequestKind::Catch,
            AuthorityRequest::Throw { .. } => RequestKind::Throw,
            AuthorityRequest::SetVisualPresence { .. } => RequestKind::SetVisualPresence,
        }
    }

    /// Every float is finite; anything else would poison the broadcast
    pub fn is_finite(&self) -> bool {
        match self {
            AuthorityRequest::Catch { position, .. } => position.is_finite(),
            AuthorityRequest::Throw {
                charge,
                origin,
                aim,
                position,
            } => charge.is_finite() && origin.is_finite() && aim.is_finite() && position.is_finite(),
            AuthorityRequest::SetVisualPresence { anchor, .. } => anchor.is_finite(),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingRelay {
    epoch: u64,
    awaiting: HashSet<Uuid>,
}

/// Ground truth for the session's disc
#[derive(Debug)]
pub struct AuthorityNode {
    token: TokenSnapshot,
    custody: HashMap<Uuid, Custody>,
    relay: Option<PendingRelay>,
    relay_timers: TimerWheel<u64>,
    relay_timeout_ticks: u64,
    throw_tuning: ThrowTuning,
}

impl AuthorityNode {
    pub fn new(throw_tuning: ThrowTuning, relay_timeout_ticks: u64) -> Self {
        Self {
            token: TokenSnapshot::default(),
            custody: HashMap::new(),
            relay: None,
            relay_timers: TimerWheel::new(),
            relay_timeout_ticks: relay_timeout_ticks.max(1),
            throw_tuning,
        }
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

    pub fn custody(&self, entity: &Uuid) -> Option<&Custody> {
        self.custody.get(entity)
    }

    /// Entities whose custody says they hold the disc
    pub fn holders(&self) -> Vec<Uuid> {
        self.custody
            .iter()
            .filter(|(_, c)| c.holds())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn is_relaying(&self) -> bool {
        self.relay.is_some()
    }

    /// Observers that still owe an acknowledgement for the open relay
    pub fn awaiting(&self) -> usize {
        self.relay.as_ref().map(|r| r.awaiting.len()).unwrap_or(0)
    }

    /// Add an entity. An unclaimed disc is handed to the arriving entity.
    pub fn register(&mut self, entity: Uuid, position: Vec3, now: u64) -> Vec<ServerMsg> {
        self.custody.insert(
            entity,
            Custody {
                anchor: position,
                ..Default::default()
            },
        );

        if self.token.state == TokenState::Unclaimed && self.relay.is_none() {
            debug!(user_id = %entity, "Disc spawned with arriving player");
            return vec![self.grant(entity, position, Hand::default(), now)];
        }
        Vec::new()
    }

    /// Remove an entity; a departing holder leaves the disc unclaimed
    pub fn unregister(&mut self, entity: Uuid, now: u64) -> Vec<ServerMsg> {
        let Some(custody) = self.custody.remove(&entity) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        if custody.holds() {
            self.token.epoch += 1;
            self.token.state = TokenState::Unclaimed;
            out.push(ServerMsg::PossessionChanged {
                epoch: self.token.epoch,
                holder: None,
                previous: Some(entity),
                anchor: custody.anchor,
                hand: Hand::default(),
                visible: false,
                token: self.token,
            });
            self.begin_relay(now);
        } else {
            self.forget_observer(entity);
        }
        out
    }

    /// Validate and apply one request. Denials leave all state untouched.
    pub fn handle(
        &mut self,
        entity: Uuid,
        request: AuthorityRequest,
        now: u64,
        spawner: &mut dyn ProjectileSpawner,
    ) -> Result<Vec<ServerMsg>, DenyReason> {
        let custody = *self.custody.get(&entity).ok_or(DenyReason::UnknownEntity)?;
        if !request.is_finite() {
            return Err(DenyReason::InvalidInput);
        }

        match request {
            AuthorityRequest::Catch { position, hand } => {
                if custody.holds() {
                    return Err(DenyReason::AlreadyHolding);
                }
                if self.relay.is_some() {
                    return Err(DenyReason::RelayPending);
                }
                if self.token.state.holder().is_some() {
                    return Err(DenyReason::HeldByOther);
                }
                Ok(vec![self.grant(entity, position, hand, now)])
            }

            AuthorityRequest::Throw {
                charge,
                origin,
                aim,
                position,
            } => {
                if !custody.holds() {
                    return Err(DenyReason::NotHolding);
                }
                if self.relay.is_some() {
                    return Err(DenyReason::RelayPending);
                }

                let hand = match self.token.state {
                    TokenState::Held { hand, .. } => hand,
                    _ => Hand::default(),
                };
                let launch = Launch::aimed(origin, aim, charge, &self.throw_tuning);
                let disc = spawner.spawn(entity, launch);

                if let Some(c) = self.custody.get_mut(&entity) {
                    c.release(position);
                }
                self.token.epoch += 1;
                self.token.state = TokenState::InFlight {
                    projectile_id: disc.projectile_id,
                    thrower: entity,
                };
                self.begin_relay(now);

                Ok(vec![
                    ServerMsg::PossessionChanged {
                        epoch: self.token.epoch,
                        holder: None,
                        previous: Some(entity),
                        anchor: position,
                        hand,
                        visible: false,
                        token: self.token,
                    },
                    ServerMsg::ProjectileLaunched {
                        projectile_id: disc.projectile_id,
                        thrower: entity,
                        launch: disc.launch,
                    },
                ])
            }

            AuthorityRequest::SetVisualPresence { present, anchor } => {
                let is_holder = self.token.state.holder() == Some(entity);
                if present && !is_holder {
                    return Err(DenyReason::NotHolding);
                }

                if let Some(c) = self.custody.get_mut(&entity) {
                    c.refresh_anchor(anchor);
                }
                if is_holder {
                    if let TokenState::Held {
                        visible,
                        anchor: token_anchor,
                        ..
                    } = &mut self.token.state
                    {
                        *visible = present;
                        *token_anchor = anchor;
                    }
                }

                Ok(vec![ServerMsg::VisualPresence {
                    epoch: self.token.epoch,
                    user_id: entity,
                    present,
                    anchor,
                }])
            }
        }
    }

    /// Observer confirmed receipt of `epoch`. Returns true when this closed the relay.
    pub fn acknowledge(&mut self, entity: Uuid, epoch: u64) -> bool {
        let Some(relay) = self.relay.as_mut() else {
            return false;
        };
        if relay.epoch != epoch {
            return false;
        }
        relay.awaiting.remove(&entity);
        if relay.awaiting.is_empty() {
            self.finish_relay();
            return true;
        }
        false
    }

    /// Cosmetic hand level reported by the holder
    pub fn update_hand(&mut self, entity: Uuid, new_hand: Hand) -> bool {
        match &mut self.token.state {
            TokenState::Held { holder, hand, .. } if *holder == entity && *hand != new_hand => {
                *hand = new_hand;
                true
            }
            _ => false,
        }
    }

    /// Expire relays whose observers went quiet. Returns the closed epoch.
    pub fn tick(&mut self, now: u64) -> Option<u64> {
        let mut closed = None;
        for epoch in self.relay_timers.drain_expired(now) {
            if let Some(relay) = &self.relay {
                if relay.epoch == epoch {
                    warn!(
                        epoch,
                        missing = relay.awaiting.len(),
                        "Possession relay timed out, accepting requests again"
                    );
                    self.relay = None;
                    closed = Some(epoch);
                }
            }
        }
        closed
    }

    fn grant(&mut self, entity: Uuid, position: Vec3, hand: Hand, now: u64) -> ServerMsg {
        if let Some(c) = self.custody.get_mut(&entity) {
            c.acquire(position);
        }
        self.token.epoch += 1;
        self.token.state = TokenState::Held {
            holder: entity,
            hand,
            visible: true,
            anchor: position,
        };
        self.begin_relay(now);

        ServerMsg::PossessionChanged {
            epoch: self.token.epoch,
            holder: Some(entity),
            previous: None,
            anchor: position,
            hand,
            visible: true,
            token: self.token,
        }
    }

    fn begin_relay(&mut self, now: u64) {
        if let Some(old) = self.relay.take() {
            self.relay_timers.cancel(&old.epoch);
        }
        let awaiting: HashSet<Uuid> = self.custody.keys().copied().collect();
        if awaiting.is_empty() {
            return;
        }
        let epoch = self.token.epoch;
        self.relay_timers
            .schedule(epoch, now + self.relay_timeout_ticks);
        self.relay = Some(PendingRelay { epoch, awaiting });
    }

    fn forget_observer(&mut self, entity: Uuid) {
        let drained = match self.relay.as_mut() {
            Some(relay) => {
                relay.awaiting.remove(&entity);
                relay.awaiting.is_empty()
            }
            None => false,
        };
        if drained {
            self.finish_relay();
        }
    }

    fn finish_relay(&mut self) {
        if let Some(relay) = self.relay.take() {
            self.relay_timers.cancel(&relay.epoch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::projectile::RelaySpawner;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn node() -> AuthorityNode {
        AuthorityNode::new(ThrowTuning::default(), 50)
    }

    fn ack_all(node: &mut AuthorityNode, ids: &[Uuid]) {
        let epoch = node.epoch();
        for id in ids {
            node.acknowledge(*id, epoch);
        }
        assert!(!node.is_relaying());
    }

    fn throw_req() -> AuthorityRequest {
        AuthorityRequest::Throw {
            charge: 1.5,
            origin: Vec3::new(0.3, 1.1, 0.3),
            aim: Vec3::Z,
            position: Vec3::ZERO,
        }
    }

    fn catch_req() -> AuthorityRequest {
        AuthorityRequest::Catch {
            position: Vec3::ZERO,
            hand: Hand::Left,
        }
    }

    #[test]
    fn first_player_receives_the_disc() {
        let mut node = node();
        let a = Uuid::new_v4();
        let out = node.register(a, Vec3::ZERO, 0);
        assert_eq!(out.len(), 1);
        assert_eq!(node.holder(), Some(a));
        assert!(node.custody(&a).unwrap().holds());

        let b = Uuid::new_v4();
        assert!(node.register(b, Vec3::X, 1).is_empty());
        assert_eq!(node.holders(), vec![a]);
    }

    #[test]
    fn catch_while_held_by_other_is_denied() {
        let mut node = node();
        let mut spawner = RelaySpawner::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        node.register(a, Vec3::ZERO, 0);
        node.register(b, Vec3::X, 0);
        ack_all(&mut node, &[a, b]);

        let epoch = node.epoch();
        let err = node.handle(b, catch_req(), 1, &mut spawner).unwrap_err();
        assert_eq!(err, DenyReason::HeldByOther);
        assert_eq!(node.epoch(), epoch, "denial must not change state");

        let err = node.handle(a, catch_req(), 1, &mut spawner).unwrap_err();
        assert_eq!(err, DenyReason::AlreadyHolding);
    }

    #[test]
    fn throw_releases_and_launches() {
        let mut node = node();
        let mut spawner = RelaySpawner::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        node.register(a, Vec3::ZERO, 0);
        node.register(b, Vec3::X, 0);
        ack_all(&mut node, &[a, b]);

        let out = node.handle(a, throw_req(), 5, &mut spawner).unwrap();
        assert_eq!(out.len(), 2);
        assert!(node.holders().is_empty());
        assert!(matches!(node.token().state, TokenState::InFlight { thrower, .. } if thrower == a));
        assert_eq!(spawner.drain().len(), 1);

        let err = node.handle(b, throw_req(), 6, &mut spawner).unwrap_err();
        assert_eq!(err, DenyReason::NotHolding);
    }

    #[test]
    fn requests_during_relay_are_rejected_not_queued() {
        let mut node = node();
        let mut spawner = RelaySpawner::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        node.register(a, Vec3::ZERO, 0);
        node.register(b, Vec3::X, 0);
        ack_all(&mut node, &[a, b]);

        node.handle(a, throw_req(), 1, &mut spawner).unwrap();
        assert_eq!(node.awaiting(), 2);

        let err = node.handle(b, catch_req(), 2, &mut spawner).unwrap_err();
        assert_eq!(err, DenyReason::RelayPending);

        let epoch = node.epoch();
        assert!(!node.acknowledge(a, epoch));
        assert!(!node.acknowledge(b, epoch - 1), "stale ack ignored");
        assert!(node.acknowledge(b, epoch));

        node.handle(b, catch_req(), 3, &mut spawner).unwrap();
        assert_eq!(node.holder(), Some(b));
    }

    #[test]
    fn silent_observer_relay_times_out() {
        let mut node = AuthorityNode::new(ThrowTuning::default(), 10);
        let a = Uuid::new_v4();
        node.register(a, Vec3::ZERO, 0);
        assert!(node.is_relaying());

        assert_eq!(node.tick(9), None);
        assert_eq!(node.tick(10), Some(1));
        assert!(!node.is_relaying());
    }

    #[test]
    fn departing_observer_stops_blocking_relay() {
        let mut node = node();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        node.register(a, Vec3::ZERO, 0);
        node.register(b, Vec3::X, 0);
        node.acknowledge(a, node.epoch());
        assert!(node.is_relaying());

        node.unregister(b, 1);
        assert!(!node.is_relaying());
    }

    #[test]
    fn departing_holder_leaves_disc_unclaimed() {
        let mut node = node();
        let mut spawner = RelaySpawner::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        node.register(a, Vec3::ZERO, 0);
        node.register(b, Vec3::X, 0);
        ack_all(&mut node, &[a, b]);

        let out = node.unregister(a, 1);
        assert!(matches!(
            out.as_slice(),
            [ServerMsg::PossessionChanged { holder: None, previous: Some(p), .. }] if *p == a
        ));
        assert_eq!(node.token().state, TokenState::Unclaimed);
        ack_all(&mut node, &[b]);

        node.handle(b, catch_req(), 2, &mut spawner).unwrap();
        assert_eq!(node.holder(), Some(b));
    }

    #[test]
    fn visual_presence_rules() {
        let mut node = node();
        let mut spawner = RelaySpawner::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        node.register(a, Vec3::ZERO, 0);
        node.register(b, Vec3::X, 0);

        let anchor = Vec3::new(0.0, 0.0, 0.5);
        let hide = AuthorityRequest::SetVisualPresence {
            present: false,
            anchor,
        };
        node.handle(a, hide, 1, &mut spawner).unwrap();
        assert!(!node.token().state.is_visible());
        assert_eq!(node.custody(&a).unwrap().anchor, anchor);
        assert!(node.custody(&a).unwrap().holds(), "hiding is cosmetic");

        let show = AuthorityRequest::SetVisualPresence {
            present: true,
            anchor,
        };
        node.handle(a, show, 2, &mut spawner).unwrap();
        node.handle(a, show, 3, &mut spawner).unwrap();
        assert!(node.token().state.is_visible());

        let err = node.handle(b, show, 4, &mut spawner).unwrap_err();
        assert_eq!(err, DenyReason::NotHolding);
        assert!(node.handle(b, hide, 4, &mut spawner).is_ok());
    }

    #[test]
    fn unknown_entity_is_denied() {
        let mut node = node();
        let mut spawner = RelaySpawner::new();
        let err = node
            .handle(Uuid::new_v4(), catch_req(), 0, &mut spawner)
            .unwrap_err();
        assert_eq!(err, DenyReason::UnknownEntity);
    }

    #[test]
    fn non_finite_requests_are_denied_without_state_change() {
        let mut node = node();
        let mut spawner = RelaySpawner::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        node.register(a, Vec3::ZERO, 0);
        node.register(b, Vec3::X, 0);
        ack_all(&mut node, &[a, b]);
        let before = node.token();

        let bad_anchor = AuthorityRequest::SetVisualPresence {
            present: true,
            anchor: Vec3::new(f32::INFINITY, 0.0, 0.0),
        };
        let bad_charge = AuthorityRequest::Throw {
            charge: f32::NAN,
            origin: Vec3::ZERO,
            aim: Vec3::Z,
            position: Vec3::ZERO,
        };
        let bad_aim = AuthorityRequest::Throw {
            charge: 1.5,
            origin: Vec3::ZERO,
            aim: Vec3::new(0.0, f32::NEG_INFINITY, 1.0),
            position: Vec3::ZERO,
        };
        for req in [bad_anchor, bad_charge, bad_aim] {
            let err = node.handle(a, req, 1, &mut spawner).unwrap_err();
            assert_eq!(err, DenyReason::InvalidInput);
        }

        node.handle(a, throw_req(), 2, &mut spawner).unwrap();
        ack_all(&mut node, &[a, b]);
        let bad_catch = AuthorityRequest::Catch {
            position: Vec3::new(0.0, f32::INFINITY, 0.0),
            hand: Hand::Left,
        };
        let err = node.handle(b, bad_catch, 3, &mut spawner).unwrap_err();
        assert_eq!(err, DenyReason::InvalidInput);
        assert!(node.holders().is_empty());
        assert_ne!(node.token(), before);
        assert!(matches!(node.token().state, TokenState::InFlight { .. }));
        assert_eq!(spawner.drain().len(), 1, "only the valid throw launched");
    }

    #[test]
    fn hand_updates_only_for_holder() {
        let mut node = node();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        node.register(a, Vec3::ZERO, 0);
        node.register(b, Vec3::X, 0);
        assert!(!node.update_hand(b, Hand::Left));
        assert!(node.update_hand(a, Hand::Left));
        assert!(!node.update_hand(a, Hand::Left));
    }

    #[test]
    fn random_interleavings_never_produce_two_holders() {
        let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
        for _round in 0..50 {
            let mut node = AuthorityNode::new(ThrowTuning::default(), 20);
            let mut spawner = RelaySpawner::new();
            let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
            for (i, id) in ids.iter().enumerate() {
                node.register(*id, Vec3::new(i as f32, 0.0, 0.0), 0);
            }

            for now in 1..400u64 {
                let who = ids[rng.gen_range(0..ids.len())];
                match rng.gen_range(0..4) {
                    0 => {
                        let _ = node.handle(who, catch_req(), now, &mut spawner);
                    }
                    1 => {
                        let _ = node.handle(who, throw_req(), now, &mut spawner);
                    }
                    2 => {
                        node.acknowledge(who, node.epoch());
                    }
                    _ => {
                        node.tick(now);
                    }
                }

                let holders = node.holders();
                assert!(holders.len() <= 1, "two holders at tick {now}");
                assert_eq!(holders.first().copied(), node.holder());
            }
        }
    }
}
