// Match request gating: the ranked rematch cooldown and the skill gate.
//
// The cooldown forbids a second ranked meeting of the same players (or the
// same two teams) inside one calendar quarter. Lookup failures are allowed
// through with a warning rather than blocking play.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::{Clock, CooldownWindow};
use crate::error::{ConsistencyWarning, EngineError, Result};
use crate::metrics;
use crate::model::{MatchRecord, MatchType, Participants, Side};
use crate::store::Store;
use crate::tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCode {
    /// Same players (or teams) already met in a ranked match this quarter.
    RecentRematch,
    /// Host level falls outside the declared bracket.
    LevelOutsideBracket,
    /// Declared minimum is more than one level below the host.
    BracketTooLow,
    /// Declared bracket does not match the team's combined level.
    TeamLevelMismatch,
}

impl ViolationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecentRematch => "recent_rematch",
            Self::LevelOutsideBracket => "level_outside_bracket",
            Self::BracketTooLow => "bracket_too_low",
            Self::TeamLevelMismatch => "team_level_mismatch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub code: ViolationCode,
    pub message: String,
}

impl Violation {
    fn new(code: ViolationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CooldownReport {
    pub allowed: bool,
    pub last_match_date: Option<DateTime<Utc>>,
    pub conflicting_match_id: Option<String>,
    pub violations: Vec<Violation>,
    pub warnings: Vec<ConsistencyWarning>,
}

impl CooldownReport {
    fn clear() -> Self {
        Self {
            allowed: true,
            last_match_date: None,
            conflicting_match_id: None,
            violations: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// A proposed match as submitted by its host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRequest {
    pub match_type: MatchType,
    /// Host side; the host is `home.leader`.
    pub home: Side,
    /// Opponents, if already known. Open requests have none.
    #[serde(default)]
    pub away: Option<Side>,
    #[serde(default = "default_ranked")]
    pub ranked: bool,
    /// Declared level bracket such as `"3-5"`.
    pub level_range: String,
    /// Host's self-assessed level.
    pub host_level: String,
    /// Partner's self-assessed level (team play only).
    #[serde(default)]
    pub partner_level: Option<String>,
}

fn default_ranked() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchValidation {
    pub allowed: bool,
    pub violations: Vec<Violation>,
    pub warnings: Vec<ConsistencyWarning>,
    pub cooldown: Option<CooldownReport>,
}

/// Orientation-independent key for a meeting between two sides.
pub fn matchup_key<'a>(home: &'a Side, away: &'a Side) -> (Vec<&'a str>, Vec<&'a str>) {
    let (a, b) = (home.team_ids(), away.team_ids());
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Skill gate for a match request; returns every violation found.
pub fn validate_skill_gate(request: &MatchRequest) -> Result<Vec<Violation>> {
    let (min, max) = tier::parse_bracket(&request.level_range).ok_or_else(|| {
        EngineError::Validation(format!("unreadable level range '{}'", request.level_range))
    })?;
    let host = tier::parse_range(&request.host_level);
    let mut violations = Vec::new();

    if request.match_type.is_team() {
        let partner_level = request.partner_level.as_deref().ok_or_else(|| {
            EngineError::Validation("team match request needs a partner level".into())
        })?;
        let combined = host as i32 + tier::parse_range(partner_level) as i32;
        if (min as i32 * 2 - combined).abs() > 1 {
            violations.push(Violation::new(
                ViolationCode::TeamLevelMismatch,
                format!("bracket minimum {min} does not match team level {combined}"),
            ));
        }
    } else {
        if host < min || host > max {
            violations.push(Violation::new(
                ViolationCode::LevelOutsideBracket,
                format!("host level {host} is outside bracket {min}-{max}"),
            ));
        }
        if (min as i32) < host as i32 - 1 {
            violations.push(Violation::new(
                ViolationCode::BracketTooLow,
                format!("bracket minimum {min} is too far below host level {host}"),
            ));
        }
    }

    for v in &violations {
        metrics::SKILL_GATE_VIOLATIONS_TOTAL
            .with_label_values(&[v.code.as_str()])
            .inc();
    }
    Ok(violations)
}

#[derive(Clone)]
pub struct CooldownValidator {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl CooldownValidator {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn validate_cooldown(
        &self,
        participants: &Participants,
        match_type: MatchType,
    ) -> Result<CooldownReport> {
        participants.validate(match_type)?;

        let window = CooldownWindow::current(self.clock.as_ref());
        let host = &participants.home.leader;
        let recent = match self.store.matches_since(host, window.start).await {
            Ok(matches) => matches,
            Err(e) => {
                metrics::COOLDOWN_LOOKUP_FAILURES_TOTAL.inc();
                tracing::warn!(host = %host, "Cooldown lookup failed, allowing match: {e}");
                let mut report = CooldownReport::clear();
                report.warnings.push(ConsistencyWarning::new(
                    "cooldown_lookup_failed",
                    format!("recent matches could not be checked: {e}"),
                ));
                return Ok(report);
            }
        };

        let wanted = matchup_key(&participants.home, &participants.away);
        let conflict = recent
            .iter()
            .filter(|m| is_counted(m, match_type, &window))
            .filter(|m| matchup_key(&m.home, &m.away) == wanted)
            .max_by_key(|m| m.played_at);

        let mut report = CooldownReport::clear();
        if let Some(m) = conflict {
            metrics::COOLDOWN_REJECTIONS_TOTAL
                .with_label_values(&[match_type.as_str()])
                .inc();
            tracing::info!(
                matchup = %format!("{}v{}", wanted.0.join("_"), wanted.1.join("_")),
                conflicting_match = %m.id,
                "Ranked rematch blocked by cooldown"
            );
            report.allowed = false;
            report.last_match_date = Some(m.played_at);
            report.conflicting_match_id = Some(m.id.clone());
            report.violations.push(Violation::new(
                ViolationCode::RecentRematch,
                format!(
                    "these players already met in a ranked match on {}",
                    m.played_at.format("%Y-%m-%d")
                ),
            ));
        }
        Ok(report)
    }

    /// Run the skill gate and, for ranked requests with known opponents,
    /// the cooldown check. Every violation is reported together.
    pub async fn validate_match_request(&self, request: &MatchRequest) -> Result<MatchValidation> {
        let mut violations = validate_skill_gate(request)?;
        let mut warnings = Vec::new();

        let cooldown = match (&request.away, request.ranked) {
            (Some(away), true) => {
                let participants = Participants {
                    home: request.home.clone(),
                    away: away.clone(),
                };
                let report = self
                    .validate_cooldown(&participants, request.match_type)
                    .await?;
                violations.extend(report.violations.iter().cloned());
                warnings.extend(report.warnings.iter().cloned());
                Some(report)
            }
            _ => None,
        };

        Ok(MatchValidation {
            allowed: violations.is_empty(),
            violations,
            warnings,
            cooldown,
        })
    }
}

fn is_counted(m: &MatchRecord, match_type: MatchType, window: &CooldownWindow) -> bool {
    m.ranked && m.match_type == match_type && window.contains(m.played_at)
}
