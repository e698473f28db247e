//! Public room listing.
//!
//! DESIGN
//! ======
//! A read-only projection of the room map: only lobbies with a free seat
//! are listed, and nothing identifying (player ids, session tokens) leaves
//! the server.

use axum::extract::State;
use axum::response::Json;
use serde::Serialize;

use crate::consts::MAX_PLAYERS;
use crate::state::{AppState, Phase, Room};

/// One joinable lobby in the `GET /api/rooms` response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicRoomEntry {
    pub code: String,
    pub host_nick: String,
    pub host_avatar: String,
    pub player_count: usize,
    pub max_players: usize,
    pub settings: PublicRoomSettings,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicRoomSettings {
    pub rounds: u32,
    pub has_bonus: bool,
}

fn to_entry(room: &Room) -> PublicRoomEntry {
    let host = room.host();
    PublicRoomEntry {
        code: room.code.clone(),
        host_nick: host.map_or_else(|| "Guest".to_string(), |h| h.nick.clone()),
        host_avatar: host.map_or_else(String::new, |h| h.avatar_seed.clone()),
        player_count: room.players.len(),
        max_players: MAX_PLAYERS,
        settings: PublicRoomSettings {
            rounds: room.settings.max_rounds,
            has_bonus: room.settings.use_bonus,
        },
    }
}

/// `GET /api/rooms` — list open lobbies.
pub async fn list_rooms(State(state): State<AppState>) -> Json<Vec<PublicRoomEntry>> {
    let rooms = state.rooms.read().await;
    let entries = rooms
        .values()
        .filter(|room| room.phase == Phase::Lobby && room.players.len() < MAX_PLAYERS)
        .map(to_entry)
        .collect();
    Json(entries)
}

// =============================================================================
// TESTS
// =============================================================================
