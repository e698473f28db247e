//! Session directory — reconnection identity and disconnect grace timers.
//!
//! ARCHITECTURE
//! ============
//! A session maps an opaque client-held token to `(room code, player id)`.
//! The directory is the process-global index used by `session:restore`; it
//! also owns one cancellable grace timer per disconnected player. When the
//! timer fires the player is removed from their room as if they had left.
//!
//! The token map can go stale (e.g. a room code changed hands after the map
//! lost an entry); restore falls back to scanning all rooms for a player
//! matching `(playerId, token)` and repairs the mapping on hit.

use std::collections::HashMap;

use tokio::task::AbortHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::consts::RECONNECT_GRACE;
use crate::frame::Frame;
use crate::services::room;
use crate::state::{AppState, ClientConn};

// =============================================================================
// DIRECTORY
// =============================================================================

/// One live token mapping.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub room_code: String,
    pub player_id: Uuid,
}

/// Token index plus pending reconnect timers. Owned by `AppState` behind its
/// own lock; never held while waiting on the room map (lock order is
/// sessions → rooms).
pub struct SessionDirectory {
    /// Live sessions keyed by token. At most one entry per token.
    tokens: HashMap<String, SessionEntry>,
    /// Grace timers keyed by player id. Exactly one per disconnected player.
    pending: HashMap<Uuid, AbortHandle>,
}

impl SessionDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self { tokens: HashMap::new(), pending: HashMap::new() }
    }

    /// Bind a token to a player. Replaces any previous entry for the token.
    pub fn bind(&mut self, token: &str, room_code: &str, player_id: Uuid) {
        self.tokens
            .insert(token.to_string(), SessionEntry { room_code: room_code.to_string(), player_id });
    }

    pub fn lookup(&self, token: &str) -> Option<&SessionEntry> {
        self.tokens.get(token)
    }

    /// Drop the mapping under a token. Returns whether one existed.
    pub fn evict_token(&mut self, token: &str) -> bool {
        self.tokens.remove(token).is_some()
    }

    /// Drop every mapping and timer belonging to a player. Used when the
    /// player is removed from their room.
    pub fn evict_player(&mut self, player_id: Uuid) {
        self.tokens.retain(|_, entry| entry.player_id != player_id);
        self.cancel_pending(player_id);
    }

    /// Arm a grace timer for a player, aborting any prior one.
    pub fn arm_pending(&mut self, player_id: Uuid, handle: AbortHandle) {
        if let Some(prior) = self.pending.insert(player_id, handle) {
            prior.abort();
        }
    }

    /// Abort and forget a player's grace timer. Returns whether one existed.
    pub fn cancel_pending(&mut self, player_id: Uuid) -> bool {
        match self.pending.remove(&player_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Forget a timer without aborting it. Called by the timer task itself.
    fn take_pending(&mut self, player_id: Uuid) -> bool {
        self.pending.remove(&player_id).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Default for SessionDirectory {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// RESTORE
// =============================================================================

/// Result of a `session:restore` attempt.
pub struct RestoreOutcome {
    /// `session:restored` reply for the restoring connection.
    pub reply: Frame,
    /// New `(room code, player id)` binding on success.
    pub binding: Option<(String, Uuid)>,
}

/// Rebind a connection to an existing in-room identity.
///
/// Allowed in any phase: the reply carries the full game state so a
/// mid-round reconnect can resume. The previous transport handle, if any, is
/// silently replaced; the stale socket's later disconnect is ignored because
/// its connection id no longer matches.
pub async fn restore(state: &AppState, conn: ClientConn, token: &str, player_id: Uuid) -> RestoreOutcome {
    let mut sessions = state.sessions.write().await;
    let mut rooms = state.rooms.write().await;

    // Resolve the token, repairing the map from a room scan when it is stale.
    let mapped = sessions
        .lookup(token)
        .filter(|entry| entry.player_id == player_id)
        .map(|entry| entry.room_code.clone())
        .filter(|code| player_holds_token(&rooms, code, player_id, token));

    let resolved = match mapped {
        Some(code) => Some(code),
        None => {
            let scanned = rooms.iter().find_map(|(code, room)| {
                room.players
                    .iter()
                    .any(|p| p.id == player_id && p.session_token.as_deref() == Some(token))
                    .then(|| code.clone())
            });
            if let Some(code) = &scanned {
                sessions.bind(token, code, player_id);
                info!(%player_id, %code, "session mapping repaired from room scan");
            }
            scanned
        }
    };

    let Some(code) = resolved else {
        sessions.evict_token(token);
        warn!(%player_id, "session restore failed, no matching player");
        let reply = Frame::empty("session:restored").with_data("success", false);
        return RestoreOutcome { reply, binding: None };
    };

    let had_pending = sessions.cancel_pending(player_id);
    drop(sessions);

    let Some(room) = rooms.get_mut(&code) else {
        let reply = Frame::empty("session:restored").with_data("success", false);
        return RestoreOutcome { reply, binding: None };
    };

    let Some(player) = room.player_mut(player_id) else {
        let reply = Frame::empty("session:restored").with_data("success", false);
        return RestoreOutcome { reply, binding: None };
    };
    player.is_connected = true;
    player.conn = Some(conn);
    let nick = player.nick.clone();
    info!(%code, %player_id, "session restored");

    if had_pending || room.player(player_id).is_some_and(|p| !p.is_connected) {
        let frame = Frame::empty("player:reconnected")
            .with_data("playerId", player_id.to_string())
            .with_data("nick", nick);
        room.broadcast_except(&frame, player_id);
    }
    room.broadcast(&room.update_frame());

    let reply = Frame::empty("session:restored")
        .with_data("success", true)
        .with_data("roomCode", code.clone())
        .with_data("playerId", player_id.to_string())
        .with_data("roomData", room.restore_room_data())
        .with_data("playerData", room.restore_player_data(player_id));

    RestoreOutcome { reply, binding: Some((code, player_id)) }
}

fn player_holds_token(
    rooms: &HashMap<String, crate::state::Room>,
    code: &str,
    player_id: Uuid,
    token: &str,
) -> bool {
    rooms.get(code).is_some_and(|room| {
        room.player(player_id).is_some_and(|p| p.session_token.as_deref() == Some(token))
    })
}

// =============================================================================
// DISCONNECT
// =============================================================================

/// Transport-level disconnect of a bound connection.
///
/// No-op when the player has already rebound to a newer socket. Otherwise
/// the player is marked disconnected, the room is notified, and a grace
/// timer is armed that removes the player unless they restore in time.
pub async fn handle_disconnect(state: &AppState, code: &str, player_id: Uuid, conn_id: Uuid) {
    let mut sessions = state.sessions.write().await;
    let mut rooms = state.rooms.write().await;

    let Some(room) = rooms.get_mut(code) else {
        return;
    };
    let Some(player) = room.player_mut(player_id) else {
        return;
    };
    match &player.conn {
        Some(conn) if conn.conn_id == conn_id => {}
        // A reconnect already replaced this handle; the stale transport's
        // disconnect must not touch the player.
        _ => return,
    }

    player.conn = None;
    player.is_connected = false;
    let nick = player.nick.clone();
    info!(%code, %player_id, "player disconnected, grace period started");

    let frame = Frame::empty("player:disconnected")
        .with_data("playerId", player_id.to_string())
        .with_data("nick", nick);
    room.broadcast(&frame);
    room.broadcast(&room.update_frame());

    let handle = spawn_grace_timer(state.clone(), code.to_string(), player_id);
    sessions.arm_pending(player_id, handle);
}

fn spawn_grace_timer(state: AppState, code: String, player_id: Uuid) -> AbortHandle {
    let task = tokio::spawn(async move {
        tokio::time::sleep(RECONNECT_GRACE).await;
        expire(&state, &code, player_id).await;
    });
    task.abort_handle()
}

/// Grace timer body: remove the player unless they reconnected meanwhile.
async fn expire(state: &AppState, code: &str, player_id: Uuid) {
    let mut sessions = state.sessions.write().await;
    sessions.take_pending(player_id);

    let mut rooms = state.rooms.write().await;
    {
        let Some(room) = rooms.get(code) else {
            return;
        };
        let Some(player) = room.player(player_id) else {
            return;
        };
        if player.is_connected {
            return;
        }
    }

    info!(%code, %player_id, "reconnect grace elapsed, removing player");
    room::remove_player_locked(&mut sessions, &mut rooms, code, player_id);
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
