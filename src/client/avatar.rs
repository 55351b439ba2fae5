//! The locally controlled avatar
//!
//! Runs locomotion and the dive machine on the client at the simulation rate
//! and turns throw/catch intents into protocol requests. Custody is never
//! predicted: `holds()` only flips when the server's broadcast comes back.

use glam::Vec3;
use tracing::debug;
use uuid::Uuid;

use crate::game::authority::RequestKind;
use crate::game::body::{KinematicBody, Orientation, PhysicsBody};
use crate::game::dive::{DiveMachine, DiveOutcome, Posture};
use crate::game::intent::{CameraFrame, InputIntent};
use crate::game::locomotion::{GroundState, LocomotionController, LocomotionStep};
use crate::game::possession::{ChargeMeter, Custody, Hand};
use crate::game::timers::TimerWheel;
use crate::game::tuning::{BodyTuning, DiveTuning, LocomotionTuning, ThrowTuning};
use crate::util::time::SIMULATION_TPS;
use crate::ws::protocol::{ClientMsg, ServerMsg, SpawnPoint};

use super::mirror::SessionMirror;

/// Give up on an unanswered request after one second
const REQUEST_TIMEOUT_TICKS: u64 = SIMULATION_TPS as u64;

/// All tunables the avatar composes
#[derive(Debug, Clone, Copy, Default)]
pub struct AvatarTuning {
    pub locomotion: LocomotionTuning,
    pub dive: DiveTuning,
    pub throw: ThrowTuning,
    pub body: BodyTuning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Outstanding {
    kind: RequestKind,
    sent_at: u64,
}

pub struct LocalAvatar {
    user_id: Uuid,
    body: KinematicBody,
    locomotion: LocomotionController,
    dive: DiveMachine,
    timers: TimerWheel<Uuid>,
    charge: ChargeMeter,
    /// Charge released while another request was outstanding
    deferred_throw: Option<f32>,
    hand: Hand,
    custody: Custody,
    mirror: SessionMirror,
    tuning: AvatarTuning,
    outstanding: Option<Outstanding>,
    tick: u64,
    seq: u32,
    last_step: LocomotionStep,
}

impl LocalAvatar {
    pub fn new(user_id: Uuid, spawn: SpawnPoint, mirror: SessionMirror) -> Self {
        Self::with_tuning(user_id, spawn, mirror, AvatarTuning::default())
    }

    pub fn with_tuning(
        user_id: Uuid,
        spawn: SpawnPoint,
        mirror: SessionMirror,
        tuning: AvatarTuning,
    ) -> Self {
        let mut avatar = Self {
            user_id,
            body: KinematicBody::new(spawn.position, Orientation::from_yaw(spawn.yaw), tuning.body),
            locomotion: LocomotionController::new(tuning.locomotion),
            dive: DiveMachine::new(user_id, tuning.dive),
            timers: TimerWheel::new(),
            charge: ChargeMeter::default(),
            hand: Hand::default(),
            custody: Custody {
                anchor: spawn.position,
                ..Default::default()
            },
            mirror,
            tuning,
            outstanding: None,
            deferred_throw: None,
            tick: 0,
            seq: 0,
            last_step: LocomotionStep::default(),
        };
        avatar.sync_custody();
        avatar
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn position(&self) -> Vec3 {
        self.body.position()
    }

    pub fn orientation(&self) -> Orientation {
        self.body.orientation()
    }

    pub fn velocity(&self) -> Vec3 {
        self.body.velocity()
    }

    pub fn posture(&self) -> Posture {
        self.dive.posture()
    }

    pub fn speed(&self) -> f32 {
        self.locomotion.speed()
    }

    pub fn ground(&self) -> GroundState {
        self.locomotion.ground()
    }

    pub fn hand(&self) -> Hand {
        self.hand
    }

    pub fn charge(&self) -> f32 {
        self.charge.charge()
    }

    pub fn holds(&self) -> bool {
        self.custody.holds()
    }

    pub fn custody(&self) -> &Custody {
        &self.custody
    }

    pub fn mirror(&self) -> &SessionMirror {
        &self.mirror
    }

    pub fn last_step(&self) -> LocomotionStep {
        self.last_step
    }

    pub fn has_outstanding_request(&self) -> bool {
        self.outstanding.is_some()
    }

    /// One fixed simulation step. Returns the messages to send this step.
    pub fn step(&mut self, intent: &InputIntent, camera: &CameraFrame, dt: f32) -> Vec<ClientMsg> {
        self.tick += 1;
        let mut out = Vec::new();

        for _ in self.timers.drain_expired(self.tick) {
            if self.dive.recover(&mut self.body) {
                self.locomotion.reset_speed();
            }
        }

        if intent.dive.down
            && self.dive.press(&mut self.body, self.custody.holds()) == DiveOutcome::LaidOut
        {
            self.locomotion.pin_speed(0.0);
        }
        if intent.dive.up {
            self.dive.release(self.tick, &mut self.timers);
        }

        let posture = self.dive.posture();
        self.locomotion.ramp_speed(intent.sprint_held, posture);
        self.last_step =
            self.locomotion
                .step(&mut self.body, intent, camera, &self.custody, posture, dt);

        if self.body.integrate(dt).is_some() {
            self.locomotion.land();
        }

        if self.custody.holds() {
            self.hand = Hand::select(self.hand, intent.hand_left, intent.hand_right);
        }

        self.expire_outstanding();
        self.possession_intents(intent, camera, dt, &mut out);

        out.push(self.state_report());
        out
    }

    /// Fold a server message in; returns acknowledgements to send back
    pub fn on_server_msg(&mut self, msg: &ServerMsg) -> Vec<ClientMsg> {
        let ack = self.mirror.apply(msg);

        match msg {
            ServerMsg::PossessionChanged {
                holder, previous, ..
            } => {
                if *holder == Some(self.user_id) || *previous == Some(self.user_id) {
                    self.outstanding = None;
                }
            }
            ServerMsg::VisualPresence { user_id, .. } if *user_id == self.user_id => {
                self.clear_outstanding(RequestKind::SetVisualPresence);
            }
            ServerMsg::RequestDenied { request, .. } => {
                self.clear_outstanding(*request);
            }
            _ => {}
        }
        self.sync_custody();

        ack.map(|epoch| vec![ClientMsg::AckPossession { epoch }])
            .unwrap_or_default()
    }

    /// Pose report for the server to relay
    pub fn state_report(&mut self) -> ClientMsg {
        self.seq = self.seq.wrapping_add(1);
        ClientMsg::StateReport {
            seq: self.seq,
            position: self.body.position(),
            orientation: self.body.orientation(),
            velocity: self.body.velocity(),
            posture: self.dive.posture(),
            grounded: self.locomotion.ground() == GroundState::Grounded,
            hand: self.hand,
        }
    }

    /// World-space point the disc is held at and thrown from
    pub fn hand_anchor(&self) -> Vec3 {
        let orientation = self.body.orientation();
        self.body.position() + orientation.yaw_rotate(self.hand.local_offset(&self.tuning.throw))
    }

    fn possession_intents(
        &mut self,
        intent: &InputIntent,
        camera: &CameraFrame,
        dt: f32,
        out: &mut Vec<ClientMsg>,
    ) {
        if !self.custody.holds() {
            self.charge.cancel();
            if intent.catch_held && self.outstanding.is_none() {
                out.push(ClientMsg::RequestCatch {
                    position: self.body.position(),
                    hand: self.hand,
                });
                self.mark_outstanding(RequestKind::Catch);
            }
            return;
        }

        if intent.throw.down {
            self.charge.press();
            self.deferred_throw = None;
        }
        if intent.throw.held {
            self.charge.hold(self.tuning.throw.charge_rate, dt);
        }
        if intent.throw.up {
            if let Some(charge) = self.charge.release() {
                if self.outstanding.is_some() {
                    debug!(user_id = %self.user_id, charge, "Throw deferred behind outstanding request");
                }
                self.deferred_throw = Some(charge);
            }
        }
        if self.outstanding.is_none() {
            if let Some(charge) = self.deferred_throw.take() {
                out.push(ClientMsg::RequestThrow {
                    charge,
                    origin: self.hand_anchor(),
                    aim: camera.look,
                    position: self.body.position(),
                });
                self.mark_outstanding(RequestKind::Throw);
                return;
            }
        }

        if self.mirror.visual_missing(self.user_id) && self.outstanding.is_none() {
            out.push(ClientMsg::SetVisualPresence {
                present: true,
                anchor: self.body.position(),
            });
            self.mark_outstanding(RequestKind::SetVisualPresence);
        }
    }

    /// Custody follows the mirror; the tether anchor resets on every flip
    fn sync_custody(&mut self) {
        let holds = self.mirror.holds(self.user_id);
        if holds == self.custody.holds() {
            return;
        }
        let here = self.body.position();
        if holds {
            self.custody.acquire(here);
        } else {
            self.custody.release(here);
            self.charge.cancel();
            self.deferred_throw = None;
        }
    }

    fn mark_outstanding(&mut self, kind: RequestKind) {
        self.outstanding = Some(Outstanding {
            kind,
            sent_at: self.tick,
        });
    }

    fn clear_outstanding(&mut self, kind: RequestKind) {
        if self.outstanding.map(|o| o.kind) == Some(kind) {
            self.outstanding = None;
        }
    }

    fn expire_outstanding(&mut self) {
        if let Some(o) = self.outstanding {
            if self.tick.saturating_sub(o.sent_at) >= REQUEST_TIMEOUT_TICKS {
                self.outstanding = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::authority::DenyReason;
    use crate::game::intent::ButtonEdges;
    use crate::game::possession::{TokenSnapshot, TokenState};
    use crate::util::time::tick_delta;

    fn avatar() -> LocalAvatar {
        LocalAvatar::new(
            Uuid::new_v4(),
            SpawnPoint {
                position: Vec3::ZERO,
                yaw: 0.0,
            },
            SessionMirror::new(),
        )
    }

    fn grant(avatar: &mut LocalAvatar, epoch: u64, visible: bool) -> Vec<ClientMsg> {
        let me = avatar.user_id();
        avatar.on_server_msg(&ServerMsg::PossessionChanged {
            epoch,
            holder: Some(me),
            previous: None,
            anchor: Vec3::ZERO,
            hand: Hand::Right,
            visible,
            token: TokenSnapshot {
                epoch,
                state: TokenState::Held {
                    holder: me,
                    hand: Hand::Right,
                    visible,
                    anchor: Vec3::ZERO,
                },
            },
        })
    }

    fn camera() -> CameraFrame {
        CameraFrame::looking(Vec3::Z)
    }

    fn requests(out: &[ClientMsg]) -> usize {
        out.iter()
            .filter(|m| !matches!(m, ClientMsg::StateReport { .. }))
            .count()
    }

    #[test]
    fn held_catch_sends_one_request_until_answered() {
        let mut avatar = avatar();
        let intent = InputIntent {
            catch_held: true,
            ..Default::default()
        };
        let first = avatar.step(&intent, &camera(), tick_delta());
        assert!(matches!(first[0], ClientMsg::RequestCatch { .. }));
        let second = avatar.step(&intent, &camera(), tick_delta());
        assert_eq!(requests(&second), 0);

        avatar.on_server_msg(&ServerMsg::RequestDenied {
            request: RequestKind::Catch,
            reason: DenyReason::RelayPending,
            epoch: 0,
        });
        let third = avatar.step(&intent, &camera(), tick_delta());
        assert_eq!(requests(&third), 1);
    }

    #[test]
    fn custody_only_changes_on_broadcast() {
        let mut avatar = avatar();
        let intent = InputIntent {
            catch_held: true,
            ..Default::default()
        };
        avatar.step(&intent, &camera(), tick_delta());
        assert!(!avatar.holds(), "no local prediction");

        let acks = grant(&mut avatar, 1, true);
        assert!(matches!(acks.as_slice(), [ClientMsg::AckPossession { epoch: 1 }]));
        assert!(avatar.holds());
        assert_eq!(avatar.custody().anchor, avatar.position());
    }

    #[test]
    fn charged_throw_requests_from_hand_anchor() {
        let mut avatar = avatar();
        grant(&mut avatar, 1, true);
        let dt = tick_delta();

        let press = InputIntent {
            throw: ButtonEdges {
                down: true,
                held: true,
                up: false,
            },
            ..Default::default()
        };
        let hold = InputIntent {
            throw: ButtonEdges {
                down: false,
                held: true,
                up: false,
            },
            ..Default::default()
        };
        let release = InputIntent {
            throw: ButtonEdges {
                down: false,
                held: false,
                up: true,
            },
            ..Default::default()
        };

        avatar.step(&press, &camera(), dt);
        for _ in 0..29 {
            avatar.step(&hold, &camera(), dt);
        }
        let out = avatar.step(&release, &camera(), dt);
        match &out[0] {
            ClientMsg::RequestThrow { charge, origin, aim, .. } => {
                assert!((charge - 1.8).abs() < 1e-3);
                assert_eq!(*aim, Vec3::Z);
                assert!((*origin - avatar.hand_anchor()).length() < 1e-5);
            }
            other => panic!("expected throw, got {other:?}"),
        }
        assert!(avatar.holds(), "still holding until the authority says otherwise");
    }

    #[test]
    fn release_behind_pending_request_throws_once_it_clears() {
        let mut avatar = avatar();
        let me = avatar.user_id();
        grant(&mut avatar, 1, false);
        let dt = tick_delta();

        let out = avatar.step(&InputIntent::default(), &camera(), dt);
        assert!(matches!(out[0], ClientMsg::SetVisualPresence { .. }));

        let press = InputIntent {
            throw: ButtonEdges {
                down: true,
                held: true,
                up: false,
            },
            ..Default::default()
        };
        let release = InputIntent {
            throw: ButtonEdges {
                down: false,
                held: false,
                up: true,
            },
            ..Default::default()
        };
        let hold = InputIntent {
            throw: ButtonEdges {
                down: false,
                held: true,
                up: false,
            },
            ..Default::default()
        };
        avatar.step(&press, &camera(), dt);
        for _ in 0..9 {
            avatar.step(&hold, &camera(), dt);
        }
        let out = avatar.step(&release, &camera(), dt);
        assert_eq!(requests(&out), 0, "presence request still outstanding");

        avatar.on_server_msg(&ServerMsg::VisualPresence {
            epoch: 1,
            user_id: me,
            present: true,
            anchor: Vec3::ZERO,
        });
        let out = avatar.step(&InputIntent::default(), &camera(), dt);
        match &out[0] {
            ClientMsg::RequestThrow { charge, .. } => {
                let expected = 10.0 * ThrowTuning::default().charge_rate * dt;
                assert!((charge - expected).abs() < 1e-4);
            }
            other => panic!("expected deferred throw, got {other:?}"),
        }
    }

    #[test]
    fn hand_selection_only_while_holding() {
        let mut avatar = avatar();
        let left = InputIntent {
            hand_left: true,
            ..Default::default()
        };
        avatar.step(&left, &camera(), tick_delta());
        assert_eq!(avatar.hand(), Hand::Right);

        grant(&mut avatar, 1, true);
        avatar.step(&left, &camera(), tick_delta());
        assert_eq!(avatar.hand(), Hand::Left);
    }

    #[test]
    fn missing_visual_requests_presence() {
        let mut avatar = avatar();
        grant(&mut avatar, 1, false);
        let out = avatar.step(&InputIntent::default(), &camera(), tick_delta());
        assert!(matches!(
            out[0],
            ClientMsg::SetVisualPresence { present: true, .. }
        ));

        let out = avatar.step(&InputIntent::default(), &camera(), tick_delta());
        assert_eq!(requests(&out), 0, "one request at a time");
    }

    #[test]
    fn unanswered_request_expires() {
        let mut avatar = avatar();
        let intent = InputIntent {
            catch_held: true,
            ..Default::default()
        };
        avatar.step(&intent, &camera(), tick_delta());
        let mut sent = 0;
        for _ in 0..REQUEST_TIMEOUT_TICKS {
            sent += requests(&avatar.step(&intent, &camera(), tick_delta()));
        }
        assert_eq!(sent, 1);
    }

    #[test]
    fn reports_have_increasing_sequence() {
        let mut avatar = avatar();
        let seqs: Vec<u32> = (0..3)
            .filter_map(|_| match avatar.step(&InputIntent::default(), &camera(), tick_delta()).pop() {
                Some(ClientMsg::StateReport { seq, .. }) => Some(seq),
                _ => None,
            })
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }
}
