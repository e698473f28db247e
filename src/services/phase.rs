//! Phase controller — drives the room state machine.
//!
//! ARCHITECTURE
//! ============
//! lobby → sticks → playing → stopped → results → (sticks | ended → lobby)
//!
//! Handlers validate the requester and the current phase, mutate the room,
//! and broadcast directly; timed transitions are spawned tasks that sleep,
//! re-acquire the room map lock, and verify the room's `timer_epoch` before
//! acting. Every transition bumps the epoch, so a timer armed under an
//! earlier phase quietly dies.
//!
//! ERROR HANDLING
//! ==============
//! Guard failures with a user-facing message become `game:error` frames for
//! the sender; host-only violations and stale events produce no reply.

use serde::Serialize;
use std::collections::HashMap;
use tracing::{error, info};
use uuid::Uuid;

use crate::consts::{
    DRAW_ANIMATION, END_GAME_COOLDOWN, LETTER_REVEAL_HOLD, STOP_COUNTDOWN, STOP_COUNTDOWN_SECS,
};
use crate::frame::{ClientError, Frame};
use crate::services::round;
use crate::state::{AppState, CategoryScore, Phase, Room};

// =============================================================================
// ERRORS
// =============================================================================

/// Game-flow errors. Variants with a user-facing message surface as
/// `game:error`; the rest are dropped.
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("ყველა მოთამაშე მზად არ არის")]
    NotAllReady,
    #[error("დაელოდეთ ტაიმერს")]
    StopNotArmed,
    #[error("თამაში უკვე დაწყებულია")]
    AlreadyStarted,
    /// Host-only operation attempted by a non-host.
    #[error("not authorized")]
    NotAuthorized,
    /// Event for a vanished room/player or a phase that has moved on.
    #[error("stale event")]
    Stale,
}

impl ClientError for GameError {
    fn error_event(&self) -> Option<&'static str> {
        match self {
            Self::NotAllReady | Self::StopNotArmed | Self::AlreadyStarted => Some("game:error"),
            Self::NotAuthorized | Self::Stale => None,
        }
    }
}

// =============================================================================
// LOBBY → STICKS
// =============================================================================

/// Host starts the game. Requires every connected player to be ready.
pub async fn start_game(state: &AppState, code: &str, player_id: Uuid) -> Result<(), GameError> {
    let mut rooms = state.rooms.write().await;
    let room = rooms.get_mut(code).ok_or(GameError::Stale)?;
    let requester = room.player(player_id).ok_or(GameError::Stale)?;
    if !requester.is_host {
        return Err(GameError::NotAuthorized);
    }
    if room.phase != Phase::Lobby {
        return Err(GameError::AlreadyStarted);
    }
    if !room.players.iter().filter(|p| p.is_connected).all(|p| p.is_ready) {
        return Err(GameError::NotAllReady);
    }

    room.used_letters.clear();
    room.current_round = 0;
    room.current_letter = None;
    for p in &mut room.players {
        p.reset_game();
    }
    room.phase = Phase::Sticks;
    room.bump_epoch();

    info!(%code, players = room.players.len(), "game started");
    room.broadcast(&Frame::empty("phase:sticks"));
    room.broadcast(&room.update_frame());
    Ok(())
}

// =============================================================================
// STICKS → PLAYING
// =============================================================================

/// Host pulls a stick: the round letter is drawn, clients play the draw
/// animation for 2 s, see the result for 1.5 s, then the round starts.
pub async fn sticks_draw(state: &AppState, code: &str, player_id: Uuid) -> Result<(), GameError> {
    let mut rooms = state.rooms.write().await;
    let room = rooms.get_mut(code).ok_or(GameError::Stale)?;
    let requester = room.player(player_id).ok_or(GameError::Stale)?;
    if !requester.is_host {
        return Err(GameError::NotAuthorized);
    }
    if room.phase != Phase::Sticks {
        return Err(GameError::Stale);
    }

    let letter = round::draw_letter(&mut room.used_letters, &mut rand::rng());
    // A repeated draw invalidates the previous animation chain.
    let epoch = room.bump_epoch();
    info!(%code, %letter, "letter drawn");

    room.broadcast(
        &Frame::empty("sticks:drawing").with_data("duration", DRAW_ANIMATION.as_millis() as u64),
    );
    spawn_draw_sequence(state.clone(), code.to_string(), epoch, letter);
    Ok(())
}

/// Reveal the letter after the draw animation, hold it, then begin the round.
fn spawn_draw_sequence(state: AppState, code: String, epoch: u64, letter: char) {
    tokio::spawn(async move {
        tokio::time::sleep(DRAW_ANIMATION).await;
        {
            let rooms = state.rooms.read().await;
            let Some(room) = rooms.get(&code) else {
                return;
            };
            if room.timer_epoch != epoch || room.phase != Phase::Sticks {
                return;
            }
            room.broadcast(&Frame::empty("sticks:result").with_data("letter", letter.to_string()));
        }

        tokio::time::sleep(LETTER_REVEAL_HOLD).await;
        let mut rooms = state.rooms.write().await;
        let Some(room) = rooms.get_mut(&code) else {
            return;
        };
        if room.timer_epoch != epoch || room.phase != Phase::Sticks {
            return;
        }
        begin_round(&state, room, letter);
    });
}

/// Enter the playing phase with the drawn letter.
fn begin_round(state: &AppState, room: &mut Room, letter: char) {
    room.phase = Phase::Playing;
    let epoch = room.bump_epoch();
    room.current_round += 1;
    room.current_letter = Some(letter);
    room.active_categories = round::assemble_categories(&room.settings, &mut rand::rng());
    room.stopped_by = None;
    room.all_submitted = false;
    room.stop_timer_armed = room.settings.min_time == 0;
    for p in &mut room.players {
        p.reset_round();
    }

    let mut categories = serde_json::Map::new();
    for cat in &room.active_categories {
        categories.insert(cat.key.clone(), serde_json::Value::String(cat.name.clone()));
    }
    info!(code = %room.code, round = room.current_round, %letter, "round started");
    room.broadcast(
        &Frame::empty("round:start")
            .with_data("round", room.current_round)
            .with_data("letter", letter.to_string())
            .with_data("categories", serde_json::Value::Object(categories))
            .with_data("minTime", room.settings.min_time),
    );

    if room.stop_timer_armed {
        room.broadcast(&Frame::empty("stop:enabled"));
    } else {
        spawn_min_time_timer(state.clone(), room.code.clone(), epoch, room.settings.min_time);
    }
    room.broadcast(&room.update_frame());
}

/// Arm the stop button once the minimum round time has elapsed.
fn spawn_min_time_timer(state: AppState, code: String, epoch: u64, min_time_secs: u64) {
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(min_time_secs)).await;
        let mut rooms = state.rooms.write().await;
        let Some(room) = rooms.get_mut(&code) else {
            return;
        };
        if room.timer_epoch != epoch || room.phase != Phase::Playing {
            return;
        }
        room.stop_timer_armed = true;
        room.broadcast(&Frame::empty("stop:enabled"));
        room.broadcast(&room.update_frame());
    });
}

// =============================================================================
// ANSWERS
// =============================================================================

/// Store a player's answers. Accepted while the round runs and during the
/// stop countdown; keys outside the active categories are dropped. Never
/// advances the phase — `all:submitted` is advisory only.
pub async fn submit_answers(
    state: &AppState,
    code: &str,
    player_id: Uuid,
    answers: HashMap<String, String>,
) -> Result<(), GameError> {
    let mut rooms = state.rooms.write().await;
    let room = rooms.get_mut(code).ok_or(GameError::Stale)?;
    if room.phase != Phase::Playing && room.phase != Phase::Stopped {
        return Err(GameError::Stale);
    }

    let allowed: Vec<String> = room.active_categories.iter().map(|c| c.key.clone()).collect();
    let player = room.player_mut(player_id).ok_or(GameError::Stale)?;
    player.answers = answers.into_iter().filter(|(k, _)| allowed.contains(k)).collect();
    player.has_submitted = true;
    info!(%code, %player_id, "answers submitted");

    if room.phase == Phase::Playing && !room.all_submitted && room.all_connected_submitted() {
        room.all_submitted = true;
        room.broadcast(&Frame::empty("all:submitted"));
    }
    room.broadcast(&room.update_frame());
    Ok(())
}

// =============================================================================
// PLAYING → STOPPED → RESULTS
// =============================================================================

/// Any player calls stop. Legal only once the minimum-time lock has lifted;
/// starts the 5 s countdown to scoring.
pub async fn stop_round(state: &AppState, code: &str, player_id: Uuid) -> Result<(), GameError> {
    let mut rooms = state.rooms.write().await;
    let room = rooms.get_mut(code).ok_or(GameError::Stale)?;
    let stopper = room.player(player_id).ok_or(GameError::Stale)?;
    if room.phase != Phase::Playing {
        return Err(GameError::Stale);
    }
    if !room.stop_timer_armed {
        return Err(GameError::StopNotArmed);
    }

    let nick = stopper.nick.clone();
    room.phase = Phase::Stopped;
    let epoch = room.bump_epoch();
    room.stopped_by = Some(nick.clone());
    info!(%code, stopped_by = %nick, "round stopped");

    room.broadcast(
        &Frame::empty("round:stopped")
            .with_data("countdown", STOP_COUNTDOWN_SECS)
            .with_data("stoppedBy", nick),
    );
    room.broadcast(&room.update_frame());

    spawn_stop_countdown(state.clone(), code.to_string(), epoch);
    Ok(())
}

fn spawn_stop_countdown(state: AppState, code: String, epoch: u64) {
    tokio::spawn(async move {
        tokio::time::sleep(STOP_COUNTDOWN).await;
        let mut rooms = state.rooms.write().await;
        let Some(room) = rooms.get_mut(&code) else {
            return;
        };
        if room.timer_epoch != epoch || room.phase != Phase::Stopped {
            return;
        }
        end_round(room);
    });
}

/// One player's scored row in the `round:results` broadcast.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RoundResultView {
    player_id: Uuid,
    nick: String,
    category_scores: HashMap<String, CategoryScore>,
    round_score: i32,
    total_score: i32,
}

/// Run the scoring pass and enter the results phase.
fn end_round(room: &mut Room) {
    let Some(letter) = room.current_letter else {
        error!(code = %room.code, "scoring without a drawn letter");
        return;
    };
    let categories = room.active_categories.clone();
    round::score_round(&mut room.players, &categories, letter);

    room.phase = Phase::Results;
    room.bump_epoch();

    let results: Vec<RoundResultView> = room
        .players
        .iter()
        .map(|p| RoundResultView {
            player_id: p.id,
            nick: p.nick.clone(),
            category_scores: p.category_scores.clone(),
            round_score: p.round_score,
            total_score: p.total_score,
        })
        .collect();
    let is_last = room.current_round >= room.settings.max_rounds;
    info!(code = %room.code, round = room.current_round, is_last, "round scored");

    room.broadcast(
        &Frame::empty("round:results")
            .with_data("results", serde_json::to_value(&results).unwrap_or_default())
            .with_data("isLastRound", is_last),
    );
    room.broadcast(&room.update_frame());
}

// =============================================================================
// INVALIDATION
// =============================================================================

/// A peer toggles the validity of one scored answer during results.
pub async fn invalidate_answer(
    state: &AppState,
    code: &str,
    toggler: Uuid,
    target: Uuid,
    category: &str,
) -> Result<(), GameError> {
    let mut rooms = state.rooms.write().await;
    let room = rooms.get_mut(code).ok_or(GameError::Stale)?;
    if room.phase != Phase::Results {
        return Err(GameError::Stale);
    }
    if room.player(toggler).is_none() {
        return Err(GameError::Stale);
    }

    let player = room.player_mut(target).ok_or(GameError::Stale)?;
    let toggle = round::toggle_invalidation(player, category, toggler).ok_or(GameError::Stale)?;
    let (round_score, total_score) = (player.round_score, player.total_score);

    room.broadcast(
        &Frame::empty("answer:invalidated")
            .with_data("targetPlayerId", target.to_string())
            .with_data("category", category)
            .with_data(
                "invalidatedBy",
                toggle.invalidated_by.map_or(serde_json::Value::Null, |id| id.to_string().into()),
            )
            .with_data("points", toggle.points)
            .with_data("roundScore", round_score)
            .with_data("totalScore", total_score),
    );
    room.broadcast(&room.update_frame());
    Ok(())
}

// =============================================================================
// RESULTS → STICKS / ENDED → LOBBY
// =============================================================================

/// Host advances past the results screen: next draw, or final standings
/// when the round limit is reached.
pub async fn next_round(state: &AppState, code: &str, player_id: Uuid) -> Result<(), GameError> {
    let mut rooms = state.rooms.write().await;
    let room = rooms.get_mut(code).ok_or(GameError::Stale)?;
    let requester = room.player(player_id).ok_or(GameError::Stale)?;
    if !requester.is_host {
        return Err(GameError::NotAuthorized);
    }
    if room.phase != Phase::Results {
        return Err(GameError::Stale);
    }

    // Score details belong to the results screen only.
    for p in &mut room.players {
        p.category_scores.clear();
    }

    if room.current_round >= room.settings.max_rounds {
        room.phase = Phase::Ended;
        let epoch = room.bump_epoch();
        room.current_letter = None;
        let standings = round::standings(&room.players);
        info!(%code, "game ended");
        room.broadcast(
            &Frame::empty("game:ended")
                .with_data("standings", serde_json::to_value(&standings).unwrap_or_default()),
        );
        room.broadcast(&room.update_frame());
        spawn_end_cooldown(state.clone(), code.to_string(), epoch);
    } else {
        room.phase = Phase::Sticks;
        room.bump_epoch();
        room.current_letter = None;
        info!(%code, round = room.current_round, "next round");
        room.broadcast(&Frame::empty("phase:sticks"));
        room.broadcast(&room.update_frame());
    }
    Ok(())
}

/// Host returns the room to the lobby from results or the end screen.
pub async fn return_to_lobby(state: &AppState, code: &str, player_id: Uuid) -> Result<(), GameError> {
    let mut rooms = state.rooms.write().await;
    let room = rooms.get_mut(code).ok_or(GameError::Stale)?;
    let requester = room.player(player_id).ok_or(GameError::Stale)?;
    if !requester.is_host {
        return Err(GameError::NotAuthorized);
    }
    if room.phase != Phase::Results && room.phase != Phase::Ended {
        return Err(GameError::Stale);
    }

    reset_to_lobby(room);
    Ok(())
}

fn spawn_end_cooldown(state: AppState, code: String, epoch: u64) {
    tokio::spawn(async move {
        tokio::time::sleep(END_GAME_COOLDOWN).await;
        let mut rooms = state.rooms.write().await;
        let Some(room) = rooms.get_mut(&code) else {
            return;
        };
        if room.timer_epoch != epoch || room.phase != Phase::Ended {
            return;
        }
        reset_to_lobby(room);
    });
}

/// Reset the room to a fresh lobby. Only the host stays ready.
fn reset_to_lobby(room: &mut Room) {
    room.phase = Phase::Lobby;
    room.bump_epoch();
    room.current_round = 0;
    room.used_letters.clear();
    room.current_letter = None;
    room.active_categories.clear();
    room.stopped_by = None;
    room.stop_timer_armed = false;
    room.all_submitted = false;
    for p in &mut room.players {
        p.reset_game();
        p.is_ready = p.is_host;
    }
    info!(code = %room.code, "room reset to lobby");
    room.broadcast(&Frame::empty("game:reset"));
    room.broadcast(&room.update_frame());
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "phase_test.rs"]
mod tests;
