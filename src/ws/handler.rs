//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{Outbound, PlayerInput, SESSION_FULL};
use crate::util::rate_limit::PlayerRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Display name shown to other players
    #[serde(default)]
    pub name: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let user_id = Uuid::new_v4();
    let display_name = query.name.unwrap_or_default();
    info!(user_id = %user_id, "WebSocket upgrade");
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, display_name, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, user_id: Uuid, display_name: String, state: AppState) {
    info!(user_id = %user_id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        user_id,
        server_time: unix_millis(),
    };

    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(user_id = %user_id, error = %e, "Failed to send welcome");
        return;
    }

    let seat = match state.lobby.join(user_id, display_name).await {
        Ok(seat) => seat,
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "Could not seat player");
            let _ = send_msg(
                &mut ws_sink,
                &ServerMsg::Error {
                    code: "lobby".to_string(),
                    message: e.to_string(),
                },
            )
            .await;
            return;
        }
    };

    run_connection(
        user_id,
        ws_sink,
        ws_stream,
        seat.handle.input_tx.clone(),
        seat.outbound_rx,
    )
    .await;

    // Cleanup on disconnect
    state.lobby.leave(user_id).await;

    info!(user_id = %user_id, "WebSocket connection closed");
}

/// Pump the connection with read/write split
async fn run_connection(
    user_id: Uuid,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    input_tx: mpsc::Sender<PlayerInput>,
    mut outbound_rx: broadcast::Receiver<Outbound>,
) {
    let rate_limiter = PlayerRateLimiter::new();

    // Spawn writer task: session broadcasts addressed to us -> WebSocket
    let mut writer_handle = tokio::spawn(async move {
        loop {
            match outbound_rx.recv().await {
                Ok(outbound) => {
                    if !outbound.is_for(user_id) {
                        continue;
                    }
                    if let Err(e) = send_msg(&mut ws_sink, &outbound.msg).await {
                        debug!(user_id = %user_id, error = %e, "WebSocket send failed");
                        break;
                    }
                    if matches!(&outbound.msg, ServerMsg::Error { code, .. } if code == SESSION_FULL) {
                        warn!(user_id = %user_id, "Session refused the join, closing connection");
                        let _ = ws_sink.close().await;
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Missed possession changes are recovered from the next snapshot
                    warn!(user_id = %user_id, lagged_count = n, "Client lagged behind session");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(user_id = %user_id, "Session channel closed");
                    break;
                }
            }
        }
    });

    // Reader loop: WebSocket -> session loop
    let reader = async {
        while let Some(result) = ws_stream.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    if !rate_limiter.check_input() {
                        warn!(user_id = %user_id, "Rate limited input message");
                        continue;
                    }

                    match serde_json::from_str::<ClientMsg>(&text) {
                        // Seating is owned by the lobby
                        Ok(ClientMsg::JoinSession { .. }) => {
                            debug!(user_id = %user_id, "Ignoring client join, already seated");
                        }
                        Ok(ClientMsg::LeaveSession) => {
                            info!(user_id = %user_id, "Client left session");
                            break;
                        }
                        Ok(client_msg) => {
                            let input = PlayerInput {
                                user_id,
                                msg: client_msg,
                            };

                            if input_tx.send(input).await.is_err() {
                                debug!(user_id = %user_id, "Input channel closed");
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(user_id = %user_id, error = %e, "Failed to parse client message");
                        }
                    }
                }
                Ok(Message::Binary(_)) => {
                    warn!(user_id = %user_id, "Received binary message, ignoring");
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Close(_)) => {
                    info!(user_id = %user_id, "Client initiated close");
                    break;
                }
                Err(e) => {
                    error!(user_id = %user_id, error = %e, "WebSocket error");
                    break;
                }
            }
        }
    };

    // The writer ends early when the session refuses us
    tokio::select! {
        _ = reader => {}
        _ = &mut writer_handle => {}
    }

    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
