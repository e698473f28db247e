//! WebSocket handler — bidirectional frame relay.
//!
//! DESIGN
//! ======
//! On upgrade, generates a connection ID and enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by event name
//! - Broadcast frames from room peers → forward to client
//! - Heartbeat ticks → ping + liveness check
//!
//! Dispatch resolves the connection's bound `(room, player)` and calls the
//! owning service; services broadcast to the room themselves, and dispatch
//! only returns the frames destined for this connection. Malformed payloads
//! get a `gateway:error`; game rules answer with `room:error`/`game:error`
//! per the service's error mapping.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → client sends `room:create`, `room:join`, or `session:restore`
//! 2. Bound frames dispatch against the player's room
//! 3. Close / liveness timeout → disconnect flow (grace timer, see sessions)

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::consts::{HEARTBEAT_INTERVAL, LIVENESS_TIMEOUT};
use crate::frame::{Data, Frame};
use crate::services;
use crate::state::{AppState, ClientConn};

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4();

    // Per-connection channel for frames broadcast by room peers and timers.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(256);

    // The (room code, player id) this connection is bound to, if any.
    let mut binding: Option<(String, Uuid)> = None;

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    let mut last_seen = Instant::now();

    info!(%conn_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                last_seen = Instant::now();
                match msg {
                    Message::Text(text) => {
                        let replies =
                            process_inbound_text(&state, &mut binding, conn_id, &client_tx, &text).await;
                        for frame in replies {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    Message::Close(_) => break,
                    // Pong and binary frames only refresh the liveness clock.
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if last_seen.elapsed() > LIVENESS_TIMEOUT {
                    warn!(%conn_id, "ws: liveness timeout");
                    break;
                }
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some((code, player_id)) = binding {
        services::session::handle_disconnect(&state, &code, player_id, conn_id).await;
    }
    info!(%conn_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
///
/// This keeps the websocket transport concerns separate from frame handling,
/// so tests can exercise the full dispatch path end-to-end without a socket.
pub(crate) async fn process_inbound_text(
    state: &AppState,
    binding: &mut Option<(String, Uuid)>,
    conn_id: Uuid,
    client_tx: &mpsc::Sender<Frame>,
    text: &str,
) -> Vec<Frame> {
    let req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%conn_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::empty("gateway:error").with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    if req.event != "player:typing" {
        info!(%conn_id, event = %req.event, "ws: recv frame");
    }

    match req.event.as_str() {
        // -- Unbound events: establish or restore an identity -----------------
        "session:restore" => handle_restore(state, binding, conn_id, client_tx, &req).await,
        "room:create" => handle_create(state, binding, conn_id, client_tx, &req).await,
        "room:join" => handle_join(state, binding, conn_id, client_tx, &req).await,

        // -- Bound events ------------------------------------------------------
        _ => {
            let Some((code, player_id)) = binding.clone() else {
                warn!(%conn_id, event = %req.event, "ws: event from unbound connection, ignoring");
                return vec![];
            };
            handle_bound(state, binding, &code, player_id, &req).await
        }
    }
}

async fn handle_restore(
    state: &AppState,
    binding: &mut Option<(String, Uuid)>,
    conn_id: Uuid,
    client_tx: &mpsc::Sender<Frame>,
    req: &Frame,
) -> Vec<Frame> {
    if binding.is_some() {
        warn!(%conn_id, "ws: session:restore on a bound connection, ignoring");
        return vec![];
    }
    let (Some(token), Some(player_id)) =
        (data_str(&req.data, "token"), data_uuid(&req.data, "playerId"))
    else {
        return vec![Frame::empty("gateway:error").with_data("message", "token and playerId required")];
    };

    let conn = ClientConn { conn_id, tx: client_tx.clone() };
    let outcome = services::session::restore(state, conn, token, player_id).await;
    *binding = outcome.binding;
    vec![outcome.reply]
}

async fn handle_create(
    state: &AppState,
    binding: &mut Option<(String, Uuid)>,
    conn_id: Uuid,
    client_tx: &mpsc::Sender<Frame>,
    req: &Frame,
) -> Vec<Frame> {
    if binding.is_some() {
        warn!(%conn_id, "ws: room:create on a bound connection, ignoring");
        return vec![];
    }
    let (Some(nick), Some(token)) = (data_str(&req.data, "nick"), data_str(&req.data, "token"))
    else {
        return vec![Frame::empty("gateway:error").with_data("message", "nick and token required")];
    };
    let avatar_seed = data_str(&req.data, "avatarSeed").unwrap_or("");

    let conn = ClientConn { conn_id, tx: client_tx.clone() };
    let (code, player_id, reply) = services::room::create(state, conn, nick, avatar_seed, token).await;
    *binding = Some((code, player_id));
    vec![reply]
}

async fn handle_join(
    state: &AppState,
    binding: &mut Option<(String, Uuid)>,
    conn_id: Uuid,
    client_tx: &mpsc::Sender<Frame>,
    req: &Frame,
) -> Vec<Frame> {
    if binding.is_some() {
        warn!(%conn_id, "ws: room:join on a bound connection, ignoring");
        return vec![];
    }
    let (Some(code), Some(nick), Some(token)) = (
        data_str(&req.data, "code"),
        data_str(&req.data, "nick"),
        data_str(&req.data, "token"),
    ) else {
        return vec![Frame::empty("gateway:error").with_data("message", "code, nick and token required")];
    };
    let avatar_seed = data_str(&req.data, "avatarSeed").unwrap_or("");

    let conn = ClientConn { conn_id, tx: client_tx.clone() };
    match services::room::join(state, conn, code, nick, avatar_seed, token).await {
        Ok((player_id, reply)) => {
            *binding = Some((code.to_string(), player_id));
            vec![reply]
        }
        Err(e) => Frame::from_error(&e).into_iter().collect(),
    }
}

async fn handle_bound(
    state: &AppState,
    binding: &mut Option<(String, Uuid)>,
    code: &str,
    player_id: Uuid,
    req: &Frame,
) -> Vec<Frame> {
    let result = match req.event.as_str() {
        "player:ready" => {
            let ready = req.data.get("ready").and_then(serde_json::Value::as_bool).unwrap_or(false);
            services::room::set_ready(state, code, player_id, ready).await;
            Ok(())
        }
        "settings:update" => services::room::update_settings(state, code, player_id, &req.data).await,
        "game:start" => services::phase::start_game(state, code, player_id).await,
        "sticks:draw" => services::phase::sticks_draw(state, code, player_id).await,
        "player:typing" => {
            let category = data_str(&req.data, "category").unwrap_or("");
            services::chat::relay_typing(state, code, player_id, category).await;
            Ok(())
        }
        "answers:submit" => {
            let answers = answers_from(&req.data);
            services::phase::submit_answers(state, code, player_id, answers).await
        }
        "round:stop" => services::phase::stop_round(state, code, player_id).await,
        "answer:invalidate" => {
            let (Some(target), Some(category)) =
                (data_uuid(&req.data, "targetPlayerId"), data_str(&req.data, "category"))
            else {
                return vec![
                    Frame::empty("gateway:error")
                        .with_data("message", "targetPlayerId and category required"),
                ];
            };
            services::phase::invalidate_answer(state, code, player_id, target, category).await
        }
        "game:nextRound" => services::phase::next_round(state, code, player_id).await,
        "game:returnToLobby" => services::phase::return_to_lobby(state, code, player_id).await,
        "room:leave" => {
            services::room::leave(state, code, player_id).await;
            *binding = None;
            Ok(())
        }
        "player:kick" => {
            let Some(target) = data_uuid(&req.data, "targetPlayerId") else {
                return vec![
                    Frame::empty("gateway:error").with_data("message", "targetPlayerId required"),
                ];
            };
            services::room::kick(state, code, player_id, target).await;
            Ok(())
        }
        "chat:message" => {
            let message = data_str(&req.data, "message").unwrap_or("");
            services::chat::relay_chat(state, code, player_id, message).await;
            Ok(())
        }
        other => {
            return vec![Frame::empty("gateway:error").with_data("message", format!("unknown event: {other}"))];
        }
    };

    match result {
        Ok(()) => vec![],
        Err(e) => Frame::from_error(&e).into_iter().collect(),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn data_str<'a>(data: &'a Data, key: &str) -> Option<&'a str> {
    data.get(key).and_then(serde_json::Value::as_str).filter(|s| !s.trim().is_empty())
}

fn data_uuid(data: &Data, key: &str) -> Option<Uuid> {
    data.get(key).and_then(serde_json::Value::as_str).and_then(|s| s.parse().ok())
}

/// Pull the `answers` object out of an `answers:submit` payload.
fn answers_from(data: &Data) -> HashMap<String, String> {
    data.get("answers")
        .and_then(serde_json::Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.event != "player:typing" {
        info!(event = %frame.event, "ws: send frame");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
