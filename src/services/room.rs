//! Room registry — creation, membership, settings, and host succession.
//!
//! DESIGN
//! ======
//! Rooms are created and joined via WS events; all mutations run under the
//! room map's write lock. A room lives exactly as long as it has members:
//! the last leave, kick, or reconnect-timeout removal deletes it and drops
//! every session bound to it.
//!
//! Membership errors (not found / full / already started) are surfaced to
//! the originating connection as `room:error`; authorization failures (a
//! non-host editing settings, kicking, or a self-kick) are silently ignored.

use std::collections::HashMap;

use rand::Rng;
use tracing::info;
use uuid::Uuid;

use crate::consts::{CODE_ALPHABET, CODE_LEN};
use crate::frame::{ClientError, Data, Frame};
use crate::services::phase::GameError;
use crate::services::session::SessionDirectory;
use crate::state::{AppState, ClientConn, Phase, Player, Room};

// =============================================================================
// ERRORS
// =============================================================================

/// Membership errors shown to the user. The display strings are the exact
/// messages the clients render.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("ოთახი ვერ მოიძებნა")]
    NotFound,
    #[error("თამაში უკვე დაწყებულია")]
    AlreadyStarted,
    #[error("ოთახი სავსეა (მაქს. 8 მოთამაშე)")]
    Full,
}

impl ClientError for RoomError {
    fn error_event(&self) -> Option<&'static str> {
        Some("room:error")
    }
}

// =============================================================================
// CODE GENERATION
// =============================================================================

/// Generate a room code that is not currently in use.
pub fn generate_code(rooms: &HashMap<String, Room>, rng: &mut impl Rng) -> String {
    loop {
        let code: String = (0..CODE_LEN)
            .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        if !rooms.contains_key(&code) {
            return code;
        }
    }
}

// =============================================================================
// CREATE / JOIN
// =============================================================================

/// Create a room with the requester as host. Returns the new binding and the
/// `room:created` reply.
pub async fn create(
    state: &AppState,
    conn: ClientConn,
    nick: &str,
    avatar_seed: &str,
    token: &str,
) -> (String, Uuid, Frame) {
    let mut sessions = state.sessions.write().await;
    let mut rooms = state.rooms.write().await;

    let code = generate_code(&rooms, &mut rand::rng());
    let mut room = Room::new(&code);
    let player_id = room.add_player(Player::new(nick, avatar_seed, token, conn));
    sessions.bind(token, &code, player_id);

    let reply = Frame::empty("room:created")
        .with_data("code", code.clone())
        .with_data("playerId", player_id.to_string());
    room.broadcast(&room.update_frame());

    info!(%code, %player_id, nick, "room created");
    rooms.insert(code.clone(), room);

    (code, player_id, reply)
}

/// Join an existing lobby. Rejects unknown codes, rooms past the lobby
/// phase, and full rooms.
pub async fn join(
    state: &AppState,
    conn: ClientConn,
    code: &str,
    nick: &str,
    avatar_seed: &str,
    token: &str,
) -> Result<(Uuid, Frame), RoomError> {
    let mut sessions = state.sessions.write().await;
    let mut rooms = state.rooms.write().await;

    let room = rooms.get_mut(code).ok_or(RoomError::NotFound)?;
    if room.phase != Phase::Lobby {
        return Err(RoomError::AlreadyStarted);
    }
    if room.is_full() {
        return Err(RoomError::Full);
    }

    let player_id = room.add_player(Player::new(nick, avatar_seed, token, conn));
    sessions.bind(token, code, player_id);
    info!(%code, %player_id, nick, players = room.players.len(), "player joined room");

    let joined = Frame::empty("player:joined")
        .with_data("playerId", player_id.to_string())
        .with_data("nick", nick)
        .with_data("avatarSeed", avatar_seed);
    room.broadcast_except(&joined, player_id);
    room.broadcast(&room.update_frame());

    let reply = Frame::empty("room:joined")
        .with_data("code", code)
        .with_data("playerId", player_id.to_string());
    Ok((player_id, reply))
}

// =============================================================================
// LEAVE / KICK
// =============================================================================

/// Voluntary leave.
pub async fn leave(state: &AppState, code: &str, player_id: Uuid) {
    let mut sessions = state.sessions.write().await;
    let mut rooms = state.rooms.write().await;
    remove_player_locked(&mut sessions, &mut rooms, code, player_id);
}

/// Host kicks another member. Non-host requests and self-kicks are silently
/// ignored; the target is notified before removal.
pub async fn kick(state: &AppState, code: &str, by: Uuid, target: Uuid) {
    let mut sessions = state.sessions.write().await;
    let mut rooms = state.rooms.write().await;

    {
        let Some(room) = rooms.get(code) else {
            return;
        };
        let Some(requester) = room.player(by) else {
            return;
        };
        if !requester.is_host || by == target || room.player(target).is_none() {
            return;
        }
        room.send_to(target, &Frame::empty("player:kicked"));
        info!(%code, %by, %target, "player kicked");
    }

    remove_player_locked(&mut sessions, &mut rooms, code, target);
}

/// Remove a player with both global stores locked. Shared by leave, kick,
/// and the reconnect-timeout path. Handles session eviction, host
/// succession, and empty-room deletion.
pub(crate) fn remove_player_locked(
    sessions: &mut SessionDirectory,
    rooms: &mut HashMap<String, Room>,
    code: &str,
    player_id: Uuid,
) -> Option<Player> {
    let removed = {
        let room = rooms.get_mut(code)?;
        let removed = room.remove_player(player_id)?;
        sessions.evict_player(player_id);

        let left = Frame::empty("player:left")
            .with_data("playerId", player_id.to_string())
            .with_data("nick", removed.nick.clone());
        room.broadcast(&left);

        if !room.players.is_empty() {
            if removed.is_host {
                if let Some((host_id, nick)) = room.promote_next_host() {
                    info!(%code, %host_id, "host succession");
                    let frame = Frame::empty("host:changed")
                        .with_data("hostId", host_id.to_string())
                        .with_data("nick", nick);
                    room.broadcast(&frame);
                }
            }
            room.broadcast(&room.update_frame());
            return Some(removed);
        }
        removed
    };

    rooms.remove(code);
    info!(%code, "room deleted (empty)");
    Some(removed)
}

// =============================================================================
// READY / SETTINGS
// =============================================================================

/// Toggle a player's ready flag.
pub async fn set_ready(state: &AppState, code: &str, player_id: Uuid, ready: bool) {
    let mut rooms = state.rooms.write().await;
    let Some(room) = rooms.get_mut(code) else {
        return;
    };
    let Some(player) = room.player_mut(player_id) else {
        return;
    };
    player.is_ready = ready;
    room.broadcast(&room.update_frame());
}

/// Merge a partial settings payload. Host-only; allowed only in the lobby.
/// Unknown keys and malformed values are ignored field by field.
pub async fn update_settings(
    state: &AppState,
    code: &str,
    player_id: Uuid,
    data: &Data,
) -> Result<(), GameError> {
    let mut rooms = state.rooms.write().await;
    let room = rooms.get_mut(code).ok_or(GameError::Stale)?;
    let requester = room.player(player_id).ok_or(GameError::Stale)?;
    if !requester.is_host {
        return Err(GameError::NotAuthorized);
    }
    if room.phase != Phase::Lobby {
        return Err(GameError::AlreadyStarted);
    }

    if let Some(min_time) = data.get("minTime").and_then(serde_json::Value::as_u64) {
        room.settings.min_time = min_time;
    }
    if let Some(max_rounds) = data.get("maxRounds").and_then(serde_json::Value::as_u64) {
        room.settings.max_rounds = u32::try_from(max_rounds).unwrap_or(u32::MAX).max(1);
    }
    if let Some(use_bonus) = data.get("useBonus").and_then(serde_json::Value::as_bool) {
        room.settings.use_bonus = use_bonus;
    }
    if let Some(categories) = data.get("categories").and_then(serde_json::Value::as_array) {
        let names: Vec<String> = categories
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if !names.is_empty() {
            room.settings.categories = names;
        }
    }

    info!(%code, "settings updated");
    room.broadcast(&room.update_frame());
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
