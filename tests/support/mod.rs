//! Shared harness: a session core wired to in-process avatars
#![allow(dead_code)]

use std::collections::VecDeque;

use glam::Vec3;
use uuid::Uuid;

use disc_session_server::client::{LocalAvatar, SessionMirror};
use disc_session_server::config::Config;
use disc_session_server::game::intent::{ButtonEdges, CameraFrame, InputIntent};
use disc_session_server::game::possession::{Hand, TokenSnapshot, TokenState};
use disc_session_server::game::{Outbound, PlayerInput, SessionCore, SessionSettings};
use disc_session_server::util::time::tick_delta;
use disc_session_server::ws::protocol::{ClientMsg, ServerMsg, SpawnPoint};

pub fn test_config() -> Config {
    Config::from_lookup(|key| match key {
        "SERVER_ADDR" => Some("127.0.0.1:0".to_string()),
        _ => None,
    })
    .expect("default config")
}

pub fn input(user_id: Uuid, msg: ClientMsg) -> PlayerInput {
    PlayerInput {
        user_id,
        msg,
    }
}

pub fn camera() -> CameraFrame {
    CameraFrame::looking(Vec3::Z)
}

pub fn throw_press() -> InputIntent {
    InputIntent {
        throw: ButtonEdges {
            down: true,
            held: true,
            up: false,
        },
        ..Default::default()
    }
}

pub fn throw_hold() -> InputIntent {
    InputIntent {
        throw: ButtonEdges {
            down: false,
            held: true,
            up: false,
        },
        ..Default::default()
    }
}

pub fn throw_release() -> InputIntent {
    InputIntent {
        throw: ButtonEdges {
            down: false,
            held: false,
            up: true,
        },
        ..Default::default()
    }
}

pub fn catch() -> InputIntent {
    InputIntent {
        catch_held: true,
        ..Default::default()
    }
}

/// Lone avatar at the origin facing +Z
pub fn lone_avatar() -> LocalAvatar {
    LocalAvatar::new(
        Uuid::new_v4(),
        SpawnPoint {
            position: Vec3::ZERO,
            yaw: 0.0,
        },
        SessionMirror::new(),
    )
}

/// Possession change naming `holder` at `epoch`, as the server would send it
pub fn grant_msg(holder: Uuid, epoch: u64) -> ServerMsg {
    ServerMsg::PossessionChanged {
        epoch,
        holder: Some(holder),
        previous: None,
        anchor: Vec3::ZERO,
        hand: Hand::Right,
        visible: true,
        token: TokenSnapshot {
            epoch,
            state: TokenState::Held {
                holder,
                hand: Hand::Right,
                visible: true,
                anchor: Vec3::ZERO,
            },
        },
    }
}

pub fn release_msg(previous: Uuid, epoch: u64) -> ServerMsg {
    ServerMsg::PossessionChanged {
        epoch,
        holder: None,
        previous: Some(previous),
        anchor: Vec3::ZERO,
        hand: Hand::Right,
        visible: false,
        token: TokenSnapshot {
            epoch,
            state: TokenState::Unclaimed,
        },
    }
}

/// A session core plus one avatar per seat, with lossless instant delivery
pub struct Table {
    pub core: SessionCore,
    pub avatars: Vec<LocalAvatar>,
    /// Every message delivered to each seat, in order
    pub inboxes: Vec<Vec<ServerMsg>>,
}

impl Table {
    pub fn seat(count: usize) -> Self {
        let mut table = Self {
            core: SessionCore::new(Uuid::new_v4(), 11, SessionSettings::default()),
            avatars: Vec::new(),
            inboxes: Vec::new(),
        };

        for i in 0..count {
            let user_id = Uuid::new_v4();
            let mut mirror = SessionMirror::new();
            mirror.apply(&ServerMsg::Welcome {
                user_id,
                server_time: 0,
            });

            let out = table.core.handle_input(input(
                user_id,
                ClientMsg::JoinSession {
                    display_name: format!("p{i}"),
                },
            ));
            let spawn = out
                .iter()
                .find_map(|o| match &o.msg {
                    ServerMsg::SessionJoined { spawn, .. } if o.is_for(user_id) => Some(*spawn),
                    _ => None,
                })
                .expect("seated");

            table.avatars.push(LocalAvatar::new(user_id, spawn, mirror));
            table.inboxes.push(Vec::new());
            table.dispatch(out);
        }
        table
    }

    pub fn id(&self, seat: usize) -> Uuid {
        self.avatars[seat].user_id()
    }

    /// Deliver server output to its audience and feed replies back in
    pub fn dispatch(&mut self, out: Vec<Outbound>) {
        let mut queue: VecDeque<Outbound> = out.into();
        while let Some(outbound) = queue.pop_front() {
            for seat in 0..self.avatars.len() {
                let user_id = self.avatars[seat].user_id();
                if !outbound.is_for(user_id) {
                    continue;
                }
                self.inboxes[seat].push(outbound.msg.clone());
                for reply in self.avatars[seat].on_server_msg(&outbound.msg) {
                    queue.extend(self.core.handle_input(input(user_id, reply)));
                }
            }
        }
    }

    /// One simulation step for every seat, then one server tick
    pub fn step(&mut self, intents: &[InputIntent]) {
        for seat in 0..self.avatars.len() {
            let intent = intents.get(seat).copied().unwrap_or_default();
            let user_id = self.avatars[seat].user_id();
            let sent = self.avatars[seat].step(&intent, &camera(), tick_delta());
            for msg in sent {
                let out = self.core.handle_input(input(user_id, msg));
                self.dispatch(out);
            }
        }
        let out = self.core.advance();
        self.dispatch(out);
    }

    pub fn holders(&self) -> Vec<Uuid> {
        self.core.authority().holders()
    }
}
