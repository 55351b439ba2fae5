//! Headless bot: joins a session and plays a scripted routine
//!
//! Usage: `bot [ws-url]` (defaults to `BOT_URL` or the local server)

use std::time::Duration;

use anyhow::{bail, Context};
use futures::{Sink, SinkExt, StreamExt};
use glam::Vec3;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use disc_session_server::client::{LocalAvatar, ScriptedIntents, SessionMirror};
use disc_session_server::game::intent::{CameraFrame, IntentSource};
use disc_session_server::util::time::{tick_delta, TICK_DURATION_MICROS};
use disc_session_server::ws::protocol::{ClientMsg, ServerMsg};

const DEFAULT_URL: &str = "ws://127.0.0.1:8080/ws?name=bot";
/// Camera drift per tick so the bot wanders in circles
const CAMERA_YAW_RATE: f32 = 0.01;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let url = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("BOT_URL").ok())
        .unwrap_or_else(|| DEFAULT_URL.to_string());

    info!(%url, "Connecting");
    let (socket, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("connecting to {url}"))?;
    let (mut sink, mut stream) = socket.split();

    // Seat first: collect everything up to our SessionJoined into the mirror
    let mut mirror = SessionMirror::new();
    let spawn = loop {
        let Some(frame) = stream.next().await else {
            bail!("server closed before seating us");
        };
        let Some(msg) = decode(frame?) else {
            continue;
        };
        mirror.apply(&msg);
        match msg {
            ServerMsg::SessionJoined { spawn, session_id, .. } => {
                info!(%session_id, "Seated");
                break spawn;
            }
            ServerMsg::Error { code, message } => bail!("lobby refused us: {code}: {message}"),
            _ => {}
        }
    };

    let user_id = mirror
        .self_id()
        .context("server never sent a welcome")?;
    let mut avatar = LocalAvatar::new(user_id, spawn, mirror);
    let mut script = ScriptedIntents::warmup().looping();

    let mut ticker = tokio::time::interval(Duration::from_micros(TICK_DURATION_MICROS));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut tick: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let intent = script.sample(tick);
                let yaw = spawn.yaw + tick as f32 * CAMERA_YAW_RATE;
                let camera = CameraFrame::looking(Vec3::new(yaw.sin(), -0.1, yaw.cos()));
                tick += 1;

                for msg in avatar.step(&intent, &camera, tick_delta()) {
                    send(&mut sink, &msg).await?;
                }
            }
            frame = stream.next() => {
                let Some(frame) = frame else {
                    info!("Server closed the connection");
                    return Ok(());
                };
                let Some(msg) = decode(frame?) else {
                    continue;
                };
                log_event(&msg, &avatar);
                for reply in avatar.on_server_msg(&msg) {
                    send(&mut sink, &reply).await?;
                }
            }
        }
    }
}

fn decode(frame: Message) -> Option<ServerMsg> {
    match frame {
        Message::Text(text) => match serde_json::from_str(&text) {
            Ok(msg) => Some(msg),
            Err(e) => {
                warn!(error = %e, "Undecodable server message");
                None
            }
        },
        _ => None,
    }
}

fn log_event(msg: &ServerMsg, avatar: &LocalAvatar) {
    match msg {
        ServerMsg::PossessionChanged { epoch, holder, .. } => {
            let mine = *holder == Some(avatar.user_id());
            info!(epoch, mine, "Possession changed");
        }
        ServerMsg::ProjectileLaunched { thrower, launch, .. } => {
            info!(%thrower, impulse = launch.magnitude(), "Disc launched");
        }
        ServerMsg::RequestDenied { request, reason, .. } => {
            debug!(?request, %reason, "Request denied");
        }
        ServerMsg::Error { code, message } => warn!(%code, %message, "Server error"),
        _ => {}
    }
}

async fn send<S>(sink: &mut S, msg: &ClientMsg) -> anyhow::Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let json = serde_json::to_string(msg)?;
    sink.send(Message::Text(json)).await?;
    Ok(())
}
