//! Round engine — letter draw, category assembly, scoring, invalidation.
//!
//! DESIGN
//! ======
//! Everything here is pure state manipulation; the phase controller decides
//! WHEN these run, this module decides WHAT they compute. Random choices go
//! through an injected `Rng` so tests can seed them.
//!
//! Scoring normalizes answers (`trim` + lowercase) and awards 20 points for
//! a unique valid answer, 10 when any other player gave the identical
//! normalized answer, 0 when empty or not starting with the round letter.
//! Invalidation toggles always adjust by the points cached at scoring time,
//! never a recomputation.

use std::collections::HashSet;

use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

use crate::consts::{ALPHABET, BONUS_CATEGORIES};
use crate::state::{Category, CategoryScore, Player, RoomSettings};

/// Points for a valid answer nobody else gave.
pub const POINTS_UNIQUE: i32 = 20;

/// Points for a valid answer shared with at least one other player.
pub const POINTS_DUPLICATE: i32 = 10;

// =============================================================================
// LETTER DRAW
// =============================================================================

/// Draw a uniformly random letter from the alphabet minus `used`. When every
/// letter has been used, the set is cleared and the draw starts over from
/// the full alphabet. The drawn letter is recorded in `used`.
pub fn draw_letter(used: &mut HashSet<char>, rng: &mut impl Rng) -> char {
    let mut remaining: Vec<char> = ALPHABET.iter().copied().filter(|c| !used.contains(c)).collect();
    if remaining.is_empty() {
        used.clear();
        remaining.extend(ALPHABET);
    }
    let letter = remaining[rng.random_range(0..remaining.len())];
    used.insert(letter);
    letter
}

// =============================================================================
// CATEGORY ASSEMBLY
// =============================================================================

/// Build the round's category list: the configured categories in order under
/// stable `cat_N` keys, plus a random bonus category when enabled.
pub fn assemble_categories(settings: &RoomSettings, rng: &mut impl Rng) -> Vec<Category> {
    let mut categories: Vec<Category> = settings
        .categories
        .iter()
        .enumerate()
        .map(|(i, name)| Category { key: format!("cat_{i}"), name: name.clone() })
        .collect();

    if settings.use_bonus {
        let name = BONUS_CATEGORIES[rng.random_range(0..BONUS_CATEGORIES.len())];
        categories.push(Category { key: "bonus".into(), name: name.to_string() });
    }

    categories
}

// =============================================================================
// SCORING
// =============================================================================

/// Normalization applied before letter matching and duplicate detection.
#[must_use]
pub fn normalize(answer: &str) -> String {
    answer.trim().to_lowercase()
}

/// Score every player's answers for the ended round and fold the result into
/// round and total scores.
pub fn score_round(players: &mut [Player], categories: &[Category], letter: char) {
    let letter_lc: String = letter.to_lowercase().collect();

    for cat in categories {
        let normalized: Vec<String> = players
            .iter()
            .map(|p| normalize(p.answers.get(&cat.key).map_or("", String::as_str)))
            .collect();

        for (i, player) in players.iter_mut().enumerate() {
            let answer = &normalized[i];
            let is_valid = !answer.is_empty() && answer.starts_with(&letter_lc);
            let points = if !is_valid {
                0
            } else if normalized.iter().enumerate().any(|(j, other)| j != i && other == answer) {
                POINTS_DUPLICATE
            } else {
                POINTS_UNIQUE
            };

            let raw = player.answers.get(&cat.key).cloned().unwrap_or_default();
            player.category_scores.insert(
                cat.key.clone(),
                CategoryScore { points, is_valid, answer: raw, invalidated_by: None },
            );
        }
    }

    for player in players.iter_mut() {
        player.round_score = player.category_scores.values().map(|s| s.points).sum();
        player.total_score += player.round_score;
    }
}

// =============================================================================
// INVALIDATION
// =============================================================================

/// Result of an invalidation toggle, for the peer broadcast.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationToggle {
    pub invalidated_by: Option<Uuid>,
    pub points: i32,
}

/// Toggle the validity of one scored answer. Marking invalid subtracts the
/// cached points from round and total score; clearing the mark adds them
/// back. Returns `None` when the category was never scored for this player.
pub fn toggle_invalidation(
    player: &mut Player,
    category: &str,
    toggler: Uuid,
) -> Option<InvalidationToggle> {
    let Player { category_scores, round_score, total_score, .. } = player;
    let score = category_scores.get_mut(category)?;

    if score.invalidated_by.is_none() {
        score.invalidated_by = Some(toggler);
        *round_score -= score.points;
        *total_score -= score.points;
    } else {
        score.invalidated_by = None;
        *round_score += score.points;
        *total_score += score.points;
    }

    Some(InvalidationToggle { invalidated_by: score.invalidated_by, points: score.points })
}

// =============================================================================
// STANDINGS
// =============================================================================

/// One row of the final scoreboard.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Standing {
    pub place: usize,
    pub player_id: Uuid,
    pub nick: String,
    pub total_score: i32,
}

/// Final standings: total score descending, ties kept in seat order.
#[must_use]
pub fn standings(players: &[Player]) -> Vec<Standing> {
    let mut seated: Vec<&Player> = players.iter().collect();
    // Vec::sort_by_key is stable, so equal totals keep seat order.
    seated.sort_by_key(|p| std::cmp::Reverse(p.total_score));
    seated
        .into_iter()
        .enumerate()
        .map(|(i, p)| Standing {
            place: i + 1,
            player_id: p.id,
            nick: p.nick.clone(),
            total_score: p.total_score,
        })
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ClientConn;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tokio::sync::mpsc;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn player(nick: &str) -> Player {
        let (tx, _rx) = mpsc::channel(1);
        let mut p = Player::new(nick, "seed", "token", ClientConn { conn_id: Uuid::new_v4(), tx });
        p.conn = None;
        p
    }

    fn answered(nick: &str, pairs: &[(&str, &str)]) -> Player {
        let mut p = player(nick);
        for (key, answer) in pairs {
            p.answers.insert((*key).to_string(), (*answer).to_string());
        }
        p
    }

    fn cats(keys: &[&str]) -> Vec<Category> {
        keys.iter()
            .map(|k| Category { key: (*k).to_string(), name: (*k).to_string() })
            .collect()
    }

    // =========================================================================
    // draw_letter
    // =========================================================================

    #[test]
    fn draw_letter_avoids_used_letters() {
        let mut rng = rng();
        let mut used: HashSet<char> = ALPHABET.iter().copied().skip(1).collect();

        let letter = draw_letter(&mut used, &mut rng);

        assert_eq!(letter, ALPHABET[0], "only one letter was available");
        assert_eq!(used.len(), ALPHABET.len());
    }

    #[test]
    fn draw_letter_grows_used_set_each_draw() {
        let mut rng = rng();
        let mut used = HashSet::new();

        for expected in 1..=ALPHABET.len() {
            draw_letter(&mut used, &mut rng);
            assert_eq!(used.len(), expected);
        }
    }

    #[test]
    fn exhausted_alphabet_resets_to_singleton() {
        // Spec scenario: after |alphabet| draws the next one still succeeds
        // and the used set starts over with just the new letter.
        let mut rng = rng();
        let mut used = HashSet::new();

        for _ in 0..ALPHABET.len() {
            draw_letter(&mut used, &mut rng);
        }
        assert_eq!(used.len(), ALPHABET.len());

        let letter = draw_letter(&mut used, &mut rng);

        assert_eq!(used.len(), 1);
        assert!(used.contains(&letter));
        assert!(ALPHABET.contains(&letter));
    }

    // =========================================================================
    // assemble_categories
    // =========================================================================

    #[test]
    fn categories_are_keyed_in_order() {
        let settings = RoomSettings {
            categories: vec!["ქალაქი".into(), "მდინარე".into()],
            use_bonus: false,
            ..RoomSettings::default()
        };

        let cats = assemble_categories(&settings, &mut rng());

        assert_eq!(cats.len(), 2);
        assert_eq!(cats[0].key, "cat_0");
        assert_eq!(cats[0].name, "ქალაქი");
        assert_eq!(cats[1].key, "cat_1");
        assert_eq!(cats[1].name, "მდინარე");
    }

    #[test]
    fn bonus_appends_entry_from_pool() {
        let settings = RoomSettings { use_bonus: true, ..RoomSettings::default() };

        let cats = assemble_categories(&settings, &mut rng());

        let bonus = cats.last().expect("bonus entry should exist");
        assert_eq!(bonus.key, "bonus");
        assert!(BONUS_CATEGORIES.contains(&bonus.name.as_str()));
        assert_eq!(cats.len(), settings.categories.len() + 1);
    }

    // =========================================================================
    // score_round
    // =========================================================================

    #[test]
    fn unique_valid_answers_score_twenty() {
        let mut players =
            vec![answered("ana", &[("cat_0", "ამერიკა")]), answered("beka", &[("cat_0", "ამსტერდამი")])];

        score_round(&mut players, &cats(&["cat_0"]), 'ა');

        for p in &players {
            let score = &p.category_scores["cat_0"];
            assert_eq!(score.points, POINTS_UNIQUE);
            assert!(score.is_valid);
            assert_eq!(p.round_score, 20);
            assert_eq!(p.total_score, 20);
        }
    }

    #[test]
    fn three_identical_answers_each_score_ten() {
        let mut players = vec![
            answered("ana", &[("cat_0", "ბაქო")]),
            answered("beka", &[("cat_0", "ბაქო")]),
            answered("gio", &[("cat_0", "ბაქო")]),
        ];

        score_round(&mut players, &cats(&["cat_0"]), 'ბ');

        for p in &players {
            assert_eq!(p.category_scores["cat_0"].points, POINTS_DUPLICATE);
            assert_eq!(p.round_score, 10);
        }
    }

    #[test]
    fn wrong_letter_scores_zero_invalid() {
        let mut players = vec![answered("ana", &[("cat_0", "თბილისი")])];

        score_round(&mut players, &cats(&["cat_0"]), 'ა');

        let score = &players[0].category_scores["cat_0"];
        assert_eq!(score.points, 0);
        assert!(!score.is_valid);
        assert_eq!(score.answer, "თბილისი", "raw answer is preserved");
        assert_eq!(players[0].round_score, 0);
    }

    #[test]
    fn empty_and_missing_answers_score_zero() {
        let mut players = vec![answered("ana", &[("cat_0", "   ")]), answered("beka", &[])];

        score_round(&mut players, &cats(&["cat_0"]), 'ა');

        for p in &players {
            let score = &p.category_scores["cat_0"];
            assert_eq!(score.points, 0);
            assert!(!score.is_valid);
        }
        assert_eq!(players[1].category_scores["cat_0"].answer, "");
    }

    #[test]
    fn duplicate_detection_normalizes_whitespace_and_case() {
        let mut players =
            vec![answered("ana", &[("cat_0", " Paris")]), answered("beka", &[("cat_0", "paris ")])];

        score_round(&mut players, &cats(&["cat_0"]), 'p');

        for p in &players {
            assert_eq!(p.category_scores["cat_0"].points, POINTS_DUPLICATE);
        }
    }

    #[test]
    fn totals_accumulate_across_rounds() {
        let mut players = vec![answered("ana", &[("cat_0", "ამერიკა")])];
        score_round(&mut players, &cats(&["cat_0"]), 'ა');
        assert_eq!(players[0].total_score, 20);

        // Next round: reset per-round state, answer again.
        players[0].reset_round();
        players[0].answers.insert("cat_0".into(), "ბაქო".into());
        score_round(&mut players, &cats(&["cat_0"]), 'ბ');

        assert_eq!(players[0].round_score, 20);
        assert_eq!(players[0].total_score, 40);
    }

    #[test]
    fn round_score_sums_all_categories() {
        let mut players = vec![
            answered("ana", &[("cat_0", "ამერიკა"), ("cat_1", "ავსტრია")]),
            answered("beka", &[("cat_0", "ამერიკა"), ("cat_1", "")]),
        ];

        score_round(&mut players, &cats(&["cat_0", "cat_1"]), 'ა');

        assert_eq!(players[0].round_score, POINTS_DUPLICATE + POINTS_UNIQUE);
        assert_eq!(players[1].round_score, POINTS_DUPLICATE);
    }

    // =========================================================================
    // toggle_invalidation
    // =========================================================================

    #[test]
    fn invalidation_round_trip_restores_scores_exactly() {
        let toggler = Uuid::new_v4();
        let mut players = vec![answered("ana", &[("cat_0", "ამერიკა")])];
        score_round(&mut players, &cats(&["cat_0"]), 'ა');
        let before = players[0].total_score;

        let marked = toggle_invalidation(&mut players[0], "cat_0", toggler)
            .expect("scored category should toggle");
        assert_eq!(marked.invalidated_by, Some(toggler));
        assert_eq!(players[0].round_score, before - 20);
        assert_eq!(players[0].total_score, before - 20);

        let cleared = toggle_invalidation(&mut players[0], "cat_0", toggler)
            .expect("scored category should toggle back");
        assert_eq!(cleared.invalidated_by, None);
        assert_eq!(players[0].round_score, before);
        assert_eq!(players[0].total_score, before);
    }

    #[test]
    fn zero_point_toggle_flips_marker_without_score_change() {
        let toggler = Uuid::new_v4();
        let mut players = vec![answered("ana", &[("cat_0", "თბილისი")])];
        score_round(&mut players, &cats(&["cat_0"]), 'ა');

        let marked = toggle_invalidation(&mut players[0], "cat_0", toggler)
            .expect("zero-point category still toggles");

        assert_eq!(marked.invalidated_by, Some(toggler));
        assert_eq!(marked.points, 0);
        assert_eq!(players[0].round_score, 0);
        assert_eq!(players[0].total_score, 0);
    }

    #[test]
    fn unknown_category_returns_none() {
        let mut p = player("ana");
        assert!(toggle_invalidation(&mut p, "cat_9", Uuid::new_v4()).is_none());
    }

    // =========================================================================
    // standings
    // =========================================================================

    #[test]
    fn standings_sort_by_total_descending() {
        let mut a = player("ana");
        a.total_score = 10;
        let mut b = player("beka");
        b.total_score = 30;

        let table = standings(&[a, b]);

        assert_eq!(table[0].nick, "beka");
        assert_eq!(table[0].place, 1);
        assert_eq!(table[1].nick, "ana");
        assert_eq!(table[1].place, 2);
    }

    #[test]
    fn standings_ties_preserve_seat_order() {
        let mut a = player("ana");
        a.total_score = 20;
        let mut b = player("beka");
        b.total_score = 20;
        let mut c = player("gio");
        c.total_score = 20;

        let table = standings(&[a, b, c]);

        let nicks: Vec<&str> = table.iter().map(|s| s.nick.as_str()).collect();
        assert_eq!(nicks, ["ana", "beka", "gio"]);
    }
}
