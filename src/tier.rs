// Rating <-> grade (1..10) conversions.
//
// This is the only grade table in the crate. Match eligibility, season
// brackets and self-assessment parsing all read from it.

use crate::elo::RATING_MIN;

pub const MIN_GRADE: u8 = 1;
pub const MAX_GRADE: u8 = 10;
/// Grade assumed when a self-assessment cannot be parsed.
pub const DEFAULT_GRADE: u8 = 5;

/// Lower rating bound of grades 2..=10.
const GRADE_THRESHOLDS: [i32; 9] = [1000, 1100, 1200, 1300, 1400, 1500, 1700, 1900, 2400];

/// Grade for a rating: `<1000` is grade 1, `>=2400` is grade 10.
pub fn grade_for_rating(rating: i32) -> u8 {
    let passed = GRADE_THRESHOLDS.iter().filter(|t| rating >= **t).count();
    MIN_GRADE + passed as u8
}

/// Lowest rating that maps to `grade`. Grade 1 starts at the rating floor.
pub fn rating_for_grade(grade: u8) -> i32 {
    let grade = grade.clamp(MIN_GRADE, MAX_GRADE);
    if grade == MIN_GRADE {
        RATING_MIN
    } else {
        GRADE_THRESHOLDS[(grade - 2) as usize]
    }
}

/// Parse a self-assessed level such as `"3-5"` or `"6"`.
///
/// Ranges resolve to the rounded midpoint. Anything unparseable falls back to
/// [`DEFAULT_GRADE`].
pub fn parse_range(input: &str) -> u8 {
    parse_level(input).unwrap_or(DEFAULT_GRADE)
}

/// Like [`parse_range`] but reports unparseable input as `None`.
pub fn parse_level(input: &str) -> Option<u8> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let parts: Vec<&str> = trimmed.split('-').map(str::trim).collect();
    let value = match parts.as_slice() {
        [single] => single.parse::<f64>().ok()?,
        [low, high] => {
            let low = low.parse::<f64>().ok()?;
            let high = high.parse::<f64>().ok()?;
            (low + high) / 2.0
        }
        _ => return None,
    };

    if !value.is_finite() {
        return None;
    }
    let rounded = value.round().clamp(MIN_GRADE as f64, MAX_GRADE as f64);
    Some(rounded as u8)
}

/// Bounds of a declared bracket: `"3-5"` is `(3, 5)`, `"4"` is `(4, 4)`.
/// Reversed ranges are normalized; values are clamped to 1..=10.
pub fn parse_bracket(input: &str) -> Option<(u8, u8)> {
    let bound = |s: &str| -> Option<u8> {
        let v = s.trim().parse::<f64>().ok()?;
        v.is_finite()
            .then(|| v.round().clamp(MIN_GRADE as f64, MAX_GRADE as f64) as u8)
    };
    let (low, high) = match input.trim().split_once('-') {
        Some((low, high)) => (bound(low)?, bound(high)?),
        None => {
            let v = bound(input)?;
            (v, v)
        }
    };
    Some((low.min(high), low.max(high)))
}

/// Whole-grade bucket of a possibly fractional grade (e.g. 4.5 -> 4).
pub fn grade_floor(grade: f64) -> u8 {
    grade.floor().clamp(MIN_GRADE as f64, MAX_GRADE as f64) as u8
}
