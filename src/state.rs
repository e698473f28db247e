//! Shared application state: rooms, players, and their wire projections.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the two process-global stores: the room map and the session
//! directory. Every room mutation happens under the room map's write lock,
//! which serializes each room's state machine; timer callbacks re-acquire
//! the lock and verify the room's `timer_epoch` before touching anything.
//!
//! Players live in a `Vec` per room — insertion order IS seat order, which
//! drives host succession and standings tie-breaks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::consts::{DEFAULT_CATEGORIES, DEFAULT_MAX_ROUNDS, DEFAULT_MIN_TIME, MAX_PLAYERS};
use crate::frame::Frame;
use crate::services::session::SessionDirectory;

// =============================================================================
// PHASE
// =============================================================================

/// Coarse state of a room's game state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Players gather and ready up.
    Lobby,
    /// The animated letter draw.
    Sticks,
    /// Players type answers for the drawn letter.
    Playing,
    /// Someone called stop; the countdown runs.
    Stopped,
    /// Scores are up; peers may invalidate answers.
    Results,
    /// Final standings before the room resets.
    Ended,
}

// =============================================================================
// SETTINGS
// =============================================================================

/// Host-editable room settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSettings {
    /// Seconds a round must run before stopping is allowed.
    pub min_time: u64,
    /// Rounds per game, at least 1.
    pub max_rounds: u32,
    /// Whether a random bonus category is appended each round.
    pub use_bonus: bool,
    /// Ordered category names.
    pub categories: Vec<String>,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            min_time: DEFAULT_MIN_TIME,
            max_rounds: DEFAULT_MAX_ROUNDS,
            use_bonus: false,
            categories: DEFAULT_CATEGORIES.iter().map(|c| (*c).to_string()).collect(),
        }
    }
}

// =============================================================================
// ROUND STATE
// =============================================================================

/// One active category of the current round. The key (`cat_0`, ..., `bonus`)
/// is the stable identifier used in every answer and score message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub key: String,
    pub name: String,
}

/// A player's scored answer for one category.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryScore {
    /// Points awarded by the scoring pass. Invalidation never recomputes
    /// this; it adds or subtracts the cached value.
    pub points: i32,
    pub is_valid: bool,
    /// The raw submitted answer (empty string when none was given).
    pub answer: String,
    /// Id of the player who invalidated this answer, if any.
    pub invalidated_by: Option<Uuid>,
}

// =============================================================================
// PLAYER
// =============================================================================

/// A player's live transport binding.
#[derive(Debug, Clone)]
pub struct ClientConn {
    /// Identifies the physical connection. A stale transport's disconnect is
    /// ignored when this no longer matches (duplicate-socket policy).
    pub conn_id: Uuid,
    /// Outgoing frame channel owned by the connection's relay loop.
    pub tx: mpsc::Sender<Frame>,
}

/// A member of a room.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: Uuid,
    pub nick: String,
    pub avatar_seed: String,
    pub is_host: bool,
    pub is_ready: bool,
    pub is_connected: bool,
    /// Current transport binding, or `None` while disconnected.
    pub conn: Option<ClientConn>,
    /// Opaque client-provided reconnection token.
    pub session_token: Option<String>,
    /// Raw answers of the current round, keyed by category key.
    pub answers: HashMap<String, String>,
    pub has_submitted: bool,
    /// Populated by the scoring pass while the room is in `results`.
    pub category_scores: HashMap<String, CategoryScore>,
    pub round_score: i32,
    pub total_score: i32,
}

impl Player {
    #[must_use]
    pub fn new(nick: &str, avatar_seed: &str, session_token: &str, conn: ClientConn) -> Self {
        Self {
            id: Uuid::new_v4(),
            nick: nick.to_string(),
            avatar_seed: avatar_seed.to_string(),
            is_host: false,
            is_ready: false,
            is_connected: true,
            conn: Some(conn),
            session_token: Some(session_token.to_string()),
            answers: HashMap::new(),
            has_submitted: false,
            category_scores: HashMap::new(),
            round_score: 0,
            total_score: 0,
        }
    }

    /// Clear per-round state. Totals survive.
    pub fn reset_round(&mut self) {
        self.answers.clear();
        self.has_submitted = false;
        self.category_scores.clear();
        self.round_score = 0;
    }

    /// Clear everything a new game starts from.
    pub fn reset_game(&mut self) {
        self.reset_round();
        self.total_score = 0;
    }
}

// =============================================================================
// ROOM
// =============================================================================

/// A room: up to 8 players sharing one game state machine.
#[derive(Debug)]
pub struct Room {
    pub code: String,
    pub host_id: Uuid,
    /// Seat order: the order players joined.
    pub players: Vec<Player>,
    pub settings: RoomSettings,
    pub phase: Phase,
    /// Letters already drawn this game; cleared when exhausted.
    pub used_letters: HashSet<char>,
    /// Set iff `phase` is playing, stopped, or results.
    pub current_letter: Option<char>,
    /// Categories of the current round, in assembly order.
    pub active_categories: Vec<Category>,
    pub current_round: u32,
    /// Nickname of whoever called stop this round.
    pub stopped_by: Option<String>,
    pub stop_timer_armed: bool,
    pub all_submitted: bool,
    /// Bumped on every phase transition. Scheduled timers capture the epoch
    /// they were armed under and no-op when it has moved on.
    pub timer_epoch: u64,
}

impl Room {
    #[must_use]
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            host_id: Uuid::nil(),
            players: Vec::new(),
            settings: RoomSettings::default(),
            phase: Phase::Lobby,
            used_letters: HashSet::new(),
            current_letter: None,
            active_categories: Vec::new(),
            current_round: 0,
            stopped_by: None,
            stop_timer_armed: false,
            all_submitted: false,
            timer_epoch: 0,
        }
    }

    pub fn player(&self, id: Uuid) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_mut(&mut self, id: Uuid) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    pub fn host(&self) -> Option<&Player> {
        self.players.iter().find(|p| p.is_host)
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.players.len() >= MAX_PLAYERS
    }

    /// Add a player at the end of seat order. The first player to enter an
    /// empty room becomes host.
    pub fn add_player(&mut self, mut player: Player) -> Uuid {
        if self.players.is_empty() {
            player.is_host = true;
            self.host_id = player.id;
        }
        let id = player.id;
        self.players.push(player);
        id
    }

    /// Remove a player, preserving the seat order of the rest.
    pub fn remove_player(&mut self, id: Uuid) -> Option<Player> {
        let idx = self.players.iter().position(|p| p.id == id)?;
        Some(self.players.remove(idx))
    }

    /// Ensure the room has a host. When the previous host left, the next
    /// player in seat order is promoted; returns the new host on promotion.
    pub fn promote_next_host(&mut self) -> Option<(Uuid, String)> {
        if self.players.iter().any(|p| p.is_host) {
            return None;
        }
        let next = self.players.first_mut()?;
        next.is_host = true;
        self.host_id = next.id;
        Some((next.id, next.nick.clone()))
    }

    /// True when every connected player has submitted this round.
    #[must_use]
    pub fn all_connected_submitted(&self) -> bool {
        let mut any = false;
        for p in self.players.iter().filter(|p| p.is_connected) {
            any = true;
            if !p.has_submitted {
                return false;
            }
        }
        any
    }

    /// Invalidate all timers armed before this call and return the epoch new
    /// timers should capture.
    pub fn bump_epoch(&mut self) -> u64 {
        self.timer_epoch += 1;
        self.timer_epoch
    }

    // -- Broadcast ------------------------------------------------------------

    /// Send a frame to every connected member. Best-effort: a full channel
    /// drops the frame for that client.
    pub fn broadcast(&self, frame: &Frame) {
        for p in &self.players {
            if let Some(conn) = &p.conn {
                let _ = conn.tx.try_send(frame.clone());
            }
        }
    }

    /// Send a frame to every connected member except one.
    pub fn broadcast_except(&self, frame: &Frame, exclude: Uuid) {
        for p in &self.players {
            if p.id == exclude {
                continue;
            }
            if let Some(conn) = &p.conn {
                let _ = conn.tx.try_send(frame.clone());
            }
        }
    }

    /// Send a frame to one member, if connected.
    pub fn send_to(&self, player_id: Uuid, frame: &Frame) {
        if let Some(conn) = self.player(player_id).and_then(|p| p.conn.as_ref()) {
            let _ = conn.tx.try_send(frame.clone());
        }
    }

    // -- Projections ----------------------------------------------------------

    fn game_state_view(&self) -> GameStateView {
        let mut active_categories = serde_json::Map::new();
        for cat in &self.active_categories {
            active_categories.insert(cat.key.clone(), serde_json::Value::String(cat.name.clone()));
        }
        GameStateView {
            phase: self.phase,
            current_round: self.current_round,
            current_letter: self.current_letter,
            active_categories,
            stopped_by: self.stopped_by.clone(),
            stop_timer_armed: self.stop_timer_armed,
            all_submitted: self.all_submitted,
        }
    }

    fn player_views(&self) -> Vec<PlayerView> {
        self.players
            .iter()
            .map(|p| PlayerView {
                id: p.id,
                nick: p.nick.clone(),
                avatar_seed: p.avatar_seed.clone(),
                is_host: p.is_host,
                is_ready: p.is_ready,
                is_connected: p.is_connected,
                has_submitted: p.has_submitted,
                round_score: p.round_score,
                total_score: p.total_score,
            })
            .collect()
    }

    /// The `room:update` broadcast sent after every externally visible
    /// mutation. Excludes per-player answers, session tokens, and the used
    /// letter set.
    #[must_use]
    pub fn update_frame(&self) -> Frame {
        let view = RoomView {
            code: self.code.clone(),
            host_id: self.host_id,
            players: self.player_views(),
            settings: self.settings.clone(),
            public_state: self.game_state_view(),
        };
        Frame::from_view("room:update", &view)
    }

    /// Room payload of a successful `session:restored` reply. Same data as
    /// `room:update`, with the game state under `gameState` so a mid-round
    /// reconnect can resume (letter, categories, timer flags).
    #[must_use]
    pub fn restore_room_data(&self) -> serde_json::Value {
        let view = RestoreRoomView {
            code: self.code.clone(),
            host_id: self.host_id,
            players: self.player_views(),
            settings: self.settings.clone(),
            game_state: self.game_state_view(),
        };
        serde_json::to_value(&view).unwrap_or(serde_json::Value::Null)
    }

    /// Private payload of a `session:restored` reply: the restoring player's
    /// own answers, submission flag, and scores.
    #[must_use]
    pub fn restore_player_data(&self, player_id: Uuid) -> serde_json::Value {
        let Some(p) = self.player(player_id) else {
            return serde_json::Value::Null;
        };
        let view = PlayerDataView {
            id: p.id,
            nick: p.nick.clone(),
            avatar_seed: p.avatar_seed.clone(),
            is_host: p.is_host,
            is_ready: p.is_ready,
            answers: p.answers.clone(),
            has_submitted: p.has_submitted,
            category_scores: p.category_scores.clone(),
            round_score: p.round_score,
            total_score: p.total_score,
        };
        serde_json::to_value(&view).unwrap_or(serde_json::Value::Null)
    }
}

// =============================================================================
// WIRE VIEWS
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub id: Uuid,
    pub nick: String,
    pub avatar_seed: String,
    pub is_host: bool,
    pub is_ready: bool,
    pub is_connected: bool,
    pub has_submitted: bool,
    pub round_score: i32,
    pub total_score: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateView {
    pub phase: Phase,
    pub current_round: u32,
    pub current_letter: Option<char>,
    pub active_categories: serde_json::Map<String, serde_json::Value>,
    pub stopped_by: Option<String>,
    pub stop_timer_armed: bool,
    pub all_submitted: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RoomView {
    code: String,
    host_id: Uuid,
    players: Vec<PlayerView>,
    settings: RoomSettings,
    public_state: GameStateView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RestoreRoomView {
    code: String,
    host_id: Uuid,
    players: Vec<PlayerView>,
    settings: RoomSettings,
    game_state: GameStateView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayerDataView {
    id: Uuid,
    nick: String,
    avatar_seed: String,
    is_host: bool,
    is_ready: bool,
    answers: HashMap<String, String>,
    has_submitted: bool,
    category_scores: HashMap<String, CategoryScore>,
    round_score: i32,
    total_score: i32,
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum — all inner fields are Arc-wrapped.
///
/// Lock order, where both are needed: `sessions` before `rooms`.
#[derive(Clone)]
pub struct AppState {
    /// Live rooms keyed by room code.
    pub rooms: Arc<RwLock<HashMap<String, Room>>>,
    /// Token ↔ (room, player) directory and pending reconnect timers.
    pub sessions: Arc<RwLock<SessionDirectory>>,
}

impl AppState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            sessions: Arc::new(RwLock::new(SessionDirectory::new())),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
mod tests {
    use super::*;
    use super::test_helpers::{attach_player, drain};

    #[test]
    fn first_player_becomes_host() {
        let mut room = Room::new("AB2CD");
        let (a, _rx_a) = attach_player(&mut room, "ana");
        let (_b, _rx_b) = attach_player(&mut room, "beka");

        assert_eq!(room.host_id, a);
        assert!(room.player(a).is_some_and(|p| p.is_host));
        assert_eq!(room.host().map(|p| p.id), Some(a));
    }

    #[test]
    fn promote_next_host_follows_seat_order() {
        let mut room = Room::new("AB2CD");
        let (a, _rx_a) = attach_player(&mut room, "ana");
        let (b, _rx_b) = attach_player(&mut room, "beka");
        let (_c, _rx_c) = attach_player(&mut room, "gio");

        room.remove_player(a);
        let promoted = room.promote_next_host().expect("a host should be promoted");

        assert_eq!(promoted, (b, "beka".to_string()));
        assert_eq!(room.host_id, b);
    }

    #[test]
    fn promote_is_noop_while_host_present() {
        let mut room = Room::new("AB2CD");
        let (_a, _rx_a) = attach_player(&mut room, "ana");
        assert!(room.promote_next_host().is_none());
    }

    #[test]
    fn broadcast_reaches_all_connected_members() {
        let mut room = Room::new("AB2CD");
        let (_a, mut rx_a) = attach_player(&mut room, "ana");
        let (b, mut rx_b) = attach_player(&mut room, "beka");
        room.player_mut(b).expect("player should exist").conn = None;

        room.broadcast(&Frame::empty("game:reset"));

        assert_eq!(drain(&mut rx_a).len(), 1);
        assert!(drain(&mut rx_b).is_empty(), "disconnected player has no live channel");
    }

    #[test]
    fn broadcast_except_skips_the_sender() {
        let mut room = Room::new("AB2CD");
        let (a, mut rx_a) = attach_player(&mut room, "ana");
        let (_b, mut rx_b) = attach_player(&mut room, "beka");

        room.broadcast_except(&Frame::empty("player:typing"), a);

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[test]
    fn update_frame_excludes_answers_and_used_letters() {
        let mut room = Room::new("AB2CD");
        let (a, _rx) = attach_player(&mut room, "ana");
        room.used_letters.insert('ა');
        room.player_mut(a)
            .expect("player should exist")
            .answers
            .insert("cat_0".into(), "ამერიკა".into());

        let frame = room.update_frame();
        let json = serde_json::to_value(&frame.data).expect("payload should serialize");

        assert_eq!(json["code"], "AB2CD");
        assert!(json.get("usedLetters").is_none());
        assert!(json["players"][0].get("answers").is_none());
        assert!(json["players"][0].get("sessionToken").is_none());
        assert_eq!(json["publicState"]["phase"], "lobby");
    }

    #[test]
    fn restore_room_data_nests_game_state() {
        let mut room = Room::new("AB2CD");
        let (_a, _rx) = attach_player(&mut room, "ana");
        room.phase = Phase::Playing;
        room.current_letter = Some('ბ');
        room.active_categories.push(Category { key: "cat_0".into(), name: "ქალაქი".into() });

        let data = room.restore_room_data();

        assert_eq!(data["gameState"]["phase"], "playing");
        assert_eq!(data["gameState"]["currentLetter"], "ბ");
        assert_eq!(data["gameState"]["activeCategories"]["cat_0"], "ქალაქი");
    }

    #[test]
    fn all_connected_submitted_ignores_disconnected_players() {
        let mut room = Room::new("AB2CD");
        let (a, _rx_a) = attach_player(&mut room, "ana");
        let (b, _rx_b) = attach_player(&mut room, "beka");

        room.player_mut(a).expect("player should exist").has_submitted = true;
        assert!(!room.all_connected_submitted());

        let p_b = room.player_mut(b).expect("player should exist");
        p_b.is_connected = false;
        assert!(room.all_connected_submitted());
    }

    #[test]
    fn empty_room_never_counts_as_all_submitted() {
        let room = Room::new("AB2CD");
        assert!(!room.all_connected_submitted());
    }
}
