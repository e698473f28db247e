//! Stateless per-room fan-outs: chat and typing indicators.
//!
//! DESIGN
//! ======
//! Nothing here mutates room state, so both relays run under the read lock.
//! Chat messages are truncated to the protocol cap (200 Unicode scalars —
//! Georgian text is multi-byte, so the cap is in characters, not bytes).
//! Typing indicators go to everyone except the typist.

use tracing::info;
use uuid::Uuid;

use crate::consts::CHAT_MAX_CHARS;
use crate::frame::Frame;
use crate::state::AppState;

/// Broadcast a chat message to the whole room, sender included.
pub async fn relay_chat(state: &AppState, code: &str, player_id: Uuid, message: &str) {
    let rooms = state.rooms.read().await;
    let Some(room) = rooms.get(code) else {
        return;
    };
    let Some(player) = room.player(player_id) else {
        return;
    };

    let capped: String = message.chars().take(CHAT_MAX_CHARS).collect();
    info!(%code, %player_id, chars = capped.chars().count(), "chat message");

    let frame = Frame::empty("chat:message")
        .with_data("playerId", player_id.to_string())
        .with_data("nick", player.nick.clone())
        .with_data("message", capped);
    room.broadcast(&frame);
}

/// Fan a typing indicator out to the other members only.
pub async fn relay_typing(state: &AppState, code: &str, player_id: Uuid, category: &str) {
    let rooms = state.rooms.read().await;
    let Some(room) = rooms.get(code) else {
        return;
    };
    if room.player(player_id).is_none() {
        return;
    }

    let frame = Frame::empty("player:typing")
        .with_data("playerId", player_id.to_string())
        .with_data("category", category);
    room.broadcast_except(&frame, player_id);
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_helpers::{attach_player, drain, seed_room, test_app_state};

    #[tokio::test]
    async fn chat_reaches_everyone_including_sender() {
        let state = test_app_state();
        seed_room(&state, "AB2CD").await;
        let (a, mut rx_a, _b, mut rx_b) = {
            let mut rooms = state.rooms.write().await;
            let room = rooms.get_mut("AB2CD").expect("room should exist");
            let (a, rx_a) = attach_player(room, "ana");
            let (b, rx_b) = attach_player(room, "beka");
            (a, rx_a, b, rx_b)
        };

        relay_chat(&state, "AB2CD", a, "გამარჯობა").await;

        let for_a = drain(&mut rx_a);
        let for_b = drain(&mut rx_b);
        assert_eq!(for_a.len(), 1);
        assert_eq!(for_b.len(), 1);
        assert_eq!(for_a[0].event, "chat:message");
        assert_eq!(for_a[0].data.get("message").and_then(|v| v.as_str()), Some("გამარჯობა"));
        assert_eq!(for_a[0].data.get("nick").and_then(|v| v.as_str()), Some("ana"));
    }

    #[tokio::test]
    async fn chat_truncates_to_two_hundred_chars() {
        let state = test_app_state();
        seed_room(&state, "AB2CD").await;
        let (a, mut rx_a) = {
            let mut rooms = state.rooms.write().await;
            let room = rooms.get_mut("AB2CD").expect("room should exist");
            attach_player(room, "ana")
        };

        let long: String = "ა".repeat(CHAT_MAX_CHARS + 50);
        relay_chat(&state, "AB2CD", a, &long).await;

        let frames = drain(&mut rx_a);
        let message = frames[0].data.get("message").and_then(|v| v.as_str()).expect("message field");
        assert_eq!(message.chars().count(), CHAT_MAX_CHARS);
    }

    #[tokio::test]
    async fn typing_excludes_the_typist() {
        let state = test_app_state();
        seed_room(&state, "AB2CD").await;
        let (a, mut rx_a, _b, mut rx_b) = {
            let mut rooms = state.rooms.write().await;
            let room = rooms.get_mut("AB2CD").expect("room should exist");
            let (a, rx_a) = attach_player(room, "ana");
            let (b, rx_b) = attach_player(room, "beka");
            (a, rx_a, b, rx_b)
        };

        relay_typing(&state, "AB2CD", a, "cat_0").await;

        assert!(drain(&mut rx_a).is_empty(), "typist hears no echo");
        let for_b = drain(&mut rx_b);
        assert_eq!(for_b.len(), 1);
        assert_eq!(for_b[0].event, "player:typing");
        assert_eq!(for_b[0].data.get("category").and_then(|v| v.as_str()), Some("cat_0"));
    }

    #[tokio::test]
    async fn unknown_sender_is_dropped() {
        let state = test_app_state();
        seed_room(&state, "AB2CD").await;
        let (_a, mut rx_a) = {
            let mut rooms = state.rooms.write().await;
            let room = rooms.get_mut("AB2CD").expect("room should exist");
            attach_player(room, "ana")
        };

        relay_chat(&state, "AB2CD", Uuid::new_v4(), "hello").await;

        assert!(drain(&mut rx_a).is_empty());
    }
}
