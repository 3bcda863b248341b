// Wall-clock access and the calendar buckets derived from it.
//
// Quarters drive cooldown windows and season ids; season labels drive
// "wins this season" achievements. Nothing outside this module reads the
// system clock directly.

use std::sync::Mutex;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a settable instant.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Calendar quarter: Q1 is Jan to Mar, Q4 is Oct to Dec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Quarter {
    pub year: i32,
    pub number: u32,
}

impl Quarter {
    pub fn containing(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            number: (at.month() - 1) / 3 + 1,
        }
    }

    /// First instant of the quarter.
    pub fn start(&self) -> DateTime<Utc> {
        let month = (self.number - 1) * 3 + 1;
        Utc.with_ymd_and_hms(self.year, month, 1, 0, 0, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Season id used for season records, e.g. `2026-Q4`.
    pub fn id(&self) -> String {
        format!("{}-Q{}", self.year, self.number)
    }

    pub fn parse_id(id: &str) -> Option<Self> {
        let (year, quarter) = id.split_once("-Q")?;
        let year = year.parse().ok()?;
        let number = quarter.parse().ok()?;
        if (1..=4).contains(&number) {
            Some(Self { year, number })
        } else {
            None
        }
    }
}

/// Cooldown window `[start of current quarter, now)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CooldownWindow {
    pub fn current(clock: &dyn Clock) -> Self {
        let now = clock.now();
        Self {
            start: Quarter::containing(now).start(),
            end: now,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeasonName {
    Spring,
    Summer,
    Fall,
    Winter,
}

impl SeasonName {
    pub fn for_month(month: u32) -> Self {
        match month {
            3..=5 => Self::Spring,
            6..=8 => Self::Summer,
            9..=11 => Self::Fall,
            _ => Self::Winter,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spring => "Spring",
            Self::Summer => "Summer",
            Self::Fall => "Fall",
            Self::Winter => "Winter",
        }
    }
}

/// Season label such as `"Fall 2026"`.
///
/// January and February belong to the winter that started the previous
/// December.
pub fn season_label(at: DateTime<Utc>) -> String {
    let name = SeasonName::for_month(at.month());
    let year = if at.month() <= 2 { at.year() - 1 } else { at.year() };
    format!("{} {}", name.as_str(), year)
}
