// Elo rating calculation.
//
// Pure expected-score / new-rating math. Every caller passes the configured
// bounds, so a rating can never leave [min, max].

use serde::{Deserialize, Serialize};

pub const BASELINE_RATING: i32 = 1200;
pub const RATING_MIN: i32 = 800;
pub const RATING_MAX: i32 = 3000;

/// Match outcome from perspective of one player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Win,
    Draw,
    Loss,
}

impl Outcome {
    pub fn score(self) -> f64 {
        match self {
            Outcome::Win => 1.0,
            Outcome::Draw => 0.5,
            Outcome::Loss => 0.0,
        }
    }

    /// The same result seen from the other side of the net.
    pub fn flip(self) -> Self {
        match self {
            Outcome::Win => Outcome::Loss,
            Outcome::Loss => Outcome::Win,
            Outcome::Draw => Outcome::Draw,
        }
    }
}

/// Inclusive range a stored rating must stay within.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingBounds {
    pub min: i32,
    pub max: i32,
}

impl RatingBounds {
    pub fn new(min: i32, max: i32) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn clamp(&self, rating: i32) -> i32 {
        rating.clamp(self.min, self.max)
    }
}

impl Default for RatingBounds {
    fn default() -> Self {
        Self {
            min: RATING_MIN,
            max: RATING_MAX,
        }
    }
}

/// Calculate expected score for player A against player B.
pub fn expected_score(rating_a: i32, rating_b: i32) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf((rating_b - rating_a) as f64 / 400.0))
}

/// Rating change before clamping: `round(k * (actual - expected))`.
pub fn rating_delta(rating: i32, opponent_rating: i32, outcome: Outcome, k: i32) -> i32 {
    let expected = expected_score(rating, opponent_rating);
    (k as f64 * (outcome.score() - expected)).round() as i32
}

/// Calculate the new rating after a match, clamped to `bounds`.
pub fn calculate_new_rating(
    rating: i32,
    opponent_rating: i32,
    outcome: Outcome,
    k: i32,
    bounds: RatingBounds,
) -> i32 {
    bounds.clamp(rating + rating_delta(rating, opponent_rating, outcome, k))
}
