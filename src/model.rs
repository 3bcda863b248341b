// Persisted record shapes shared by the engine and the stores.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::competition::CompetitionKind;
use crate::elo::Outcome;
use crate::error::{EngineError, Result};

pub type PlayerId = String;

// ── Rating scope ──────────────────────────────────────────────────────

/// Scope a rating is tracked under. Serialized as `global` or `club:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RatingContext {
    Global,
    Club(String),
}

impl RatingContext {
    pub fn is_club(&self) -> bool {
        matches!(self, Self::Club(_))
    }

    pub fn club_id(&self) -> Option<&str> {
        match self {
            Self::Global => None,
            Self::Club(id) => Some(id),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        if s == "global" {
            return Some(Self::Global);
        }
        match s.strip_prefix("club:") {
            Some(id) if !id.is_empty() => Some(Self::Club(id.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for RatingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Club(id) => write!(f, "club:{id}"),
        }
    }
}

impl From<RatingContext> for String {
    fn from(ctx: RatingContext) -> Self {
        ctx.to_string()
    }
}

impl TryFrom<String> for RatingContext {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid rating context '{value}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Singles,
    Doubles,
    Mixed,
}

impl MatchType {
    /// Doubles and mixed doubles both field two players per side.
    pub fn is_team(&self) -> bool {
        !matches!(self, Self::Singles)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Singles => "singles",
            Self::Doubles => "doubles",
            Self::Mixed => "mixed",
        }
    }

    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "singles" => Some(Self::Singles),
            "doubles" => Some(Self::Doubles),
            "mixed" => Some(Self::Mixed),
            _ => None,
        }
    }
}

// ── Matches ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideId {
    Home,
    Away,
}

impl SideId {
    pub const BOTH: [SideId; 2] = [SideId::Home, SideId::Away];

    pub fn opposite(self) -> Self {
        match self {
            Self::Home => Self::Away,
            Self::Away => Self::Home,
        }
    }
}

/// One side of a match: a leader and, for team play, a partner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Side {
    pub leader: PlayerId,
    #[serde(default)]
    pub partner: Option<PlayerId>,
}

impl Side {
    pub fn solo(leader: impl Into<PlayerId>) -> Self {
        Self {
            leader: leader.into(),
            partner: None,
        }
    }

    pub fn pair(leader: impl Into<PlayerId>, partner: impl Into<PlayerId>) -> Self {
        Self {
            leader: leader.into(),
            partner: Some(partner.into()),
        }
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerId> {
        std::iter::once(&self.leader).chain(self.partner.iter())
    }

    /// Sorted member ids. Teams compare on this, not on the joined string,
    /// so ids containing `_` cannot collide.
    pub fn team_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.players().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Display form of the team: `sort(a, b).join("_")`.
    pub fn team_key(&self) -> String {
        self.team_ids().join("_")
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.players().any(|p| p == player_id)
    }
}

/// Both sides of a match, before or after it is played.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participants {
    pub home: Side,
    pub away: Side,
}

impl Participants {
    pub fn all(&self) -> impl Iterator<Item = &PlayerId> {
        self.home.players().chain(self.away.players())
    }

    /// Check the roster against the match type: singles has no partners,
    /// team play needs both, and nobody appears twice.
    pub fn validate(&self, match_type: MatchType) -> Result<()> {
        let partners = [self.home.partner.is_some(), self.away.partner.is_some()];
        if match_type.is_team() {
            if partners.contains(&false) {
                return Err(EngineError::Validation(format!(
                    "{} match requires a partner on both sides",
                    match_type.as_str()
                )));
            }
        } else if partners.contains(&true) {
            return Err(EngineError::Validation(
                "singles match cannot have partners".into(),
            ));
        }

        let mut seen: Vec<&str> = Vec::with_capacity(4);
        for player in self.all() {
            if player.is_empty() {
                return Err(EngineError::Validation("participant id is empty".into()));
            }
            if seen.contains(&player.as_str()) {
                return Err(EngineError::Validation(format!(
                    "player {player} appears more than once"
                )));
            }
            seen.push(player);
        }
        Ok(())
    }
}

/// A confirmed match. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: String,
    pub home: Side,
    pub away: Side,
    pub match_type: MatchType,
    pub context: RatingContext,
    #[serde(default)]
    pub competition: CompetitionKind,
    /// `None` records a draw.
    #[serde(default)]
    pub winner: Option<SideId>,
    #[serde(default)]
    pub score: String,
    #[serde(default = "default_ranked")]
    pub ranked: bool,
    pub played_at: DateTime<Utc>,
}

fn default_ranked() -> bool {
    true
}

impl MatchRecord {
    pub fn participants(&self) -> Participants {
        Participants {
            home: self.home.clone(),
            away: self.away.clone(),
        }
    }

    pub fn side(&self, id: SideId) -> &Side {
        match id {
            SideId::Home => &self.home,
            SideId::Away => &self.away,
        }
    }

    pub fn outcome_for(&self, id: SideId) -> Outcome {
        match self.winner {
            None => Outcome::Draw,
            Some(w) if w == id => Outcome::Win,
            Some(_) => Outcome::Loss,
        }
    }

    pub fn involves(&self, player_id: &str) -> bool {
        self.home.contains(player_id) || self.away.contains(player_id)
    }

    /// Match shape checks that must pass before anything is read or written.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(EngineError::Validation("match id is empty".into()));
        }
        self.participants().validate(self.match_type)?;
        if self.competition.requires_club() && !self.context.is_club() {
            return Err(EngineError::Validation(format!(
                "{} match must be played in a club context",
                self.competition.to_str_name()
            )));
        }
        Ok(())
    }
}

// ── Ratings ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RatingKey {
    pub player_id: PlayerId,
    pub context: RatingContext,
    pub match_type: MatchType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRating {
    pub player_id: PlayerId,
    pub context: RatingContext,
    pub match_type: MatchType,
    pub current: i32,
    pub peak: i32,
    pub matches_played: u32,
    /// Optimistic concurrency token; 0 means never persisted.
    #[serde(default)]
    pub version: u64,
}

impl PlayerRating {
    /// Unpersisted rating at the baseline, used until a player's first match.
    pub fn baseline(key: &RatingKey, rating: i32) -> Self {
        Self {
            player_id: key.player_id.clone(),
            context: key.context.clone(),
            match_type: key.match_type,
            current: rating,
            peak: rating,
            matches_played: 0,
            version: 0,
        }
    }

    pub fn key(&self) -> RatingKey {
        RatingKey {
            player_id: self.player_id.clone(),
            context: self.context.clone(),
            match_type: self.match_type,
        }
    }
}

/// Append-only rating trend row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingChangeEvent {
    pub match_id: String,
    pub player_id: PlayerId,
    pub context: RatingContext,
    pub match_type: MatchType,
    pub opponent_id: PlayerId,
    pub old_rating: i32,
    pub new_rating: i32,
    pub delta: i32,
    pub k_factor: i32,
    pub recorded_at: DateTime<Utc>,
}

// ── History ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub player_id: PlayerId,
    pub scope: RatingContext,
    pub match_id: String,
    pub match_type: MatchType,
    pub competition: CompetitionKind,
    pub result: Outcome,
    #[serde(default)]
    pub opponent_ids: Vec<PlayerId>,
    pub played_at: DateTime<Utc>,
}

/// Season win/loss counters for one player.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SeasonRecord {
    pub season_id: String,
    pub player_id: PlayerId,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
}

impl SeasonRecord {
    pub fn played(&self) -> u32 {
        self.wins + self.losses + self.draws
    }

    pub fn win_rate(&self) -> f64 {
        match self.played() {
            0 => 0.0,
            n => self.wins as f64 / n as f64,
        }
    }

    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Win => self.wins += 1,
            Outcome::Loss => self.losses += 1,
            Outcome::Draw => self.draws += 1,
        }
    }
}

/// Result of one ranked match for a season's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonResult {
    pub season_id: String,
    pub player_id: PlayerId,
    pub outcome: Outcome,
}

// ── Badges & trophies ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl BadgeTier {
    pub const ALL: [BadgeTier; 4] = [Self::Bronze, Self::Silver, Self::Gold, Self::Platinum];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bronze => "bronze",
            Self::Silver => "silver",
            Self::Gold => "gold",
            Self::Platinum => "platinum",
        }
    }

    pub fn from_str_name(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    pub id: String,
    pub player_id: PlayerId,
    pub achievement_id: String,
    pub tier: BadgeTier,
    pub points: u32,
    pub unlocked_at: DateTime<Utc>,
}

impl Badge {
    pub fn id_for(achievement_id: &str, tier: BadgeTier) -> String {
        format!("{achievement_id}_{}", tier.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrophyType {
    Winner,
    RunnerUp,
    SeasonGold,
    SeasonSilver,
    SeasonBronze,
    RankUp,
    IronMan,
    Ace,
}

impl TrophyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Winner => "winner",
            Self::RunnerUp => "runner_up",
            Self::SeasonGold => "season_gold",
            Self::SeasonSilver => "season_silver",
            Self::SeasonBronze => "season_bronze",
            Self::RankUp => "rank_up",
            Self::IronMan => "iron_man",
            Self::Ace => "ace",
        }
    }

    pub fn from_str_name(s: &str) -> Option<Self> {
        [
            Self::Winner,
            Self::RunnerUp,
            Self::SeasonGold,
            Self::SeasonSilver,
            Self::SeasonBronze,
            Self::RankUp,
            Self::IronMan,
            Self::Ace,
        ]
        .into_iter()
        .find(|t| t.as_str() == s)
    }

    /// Finishing position this trophy represents, if it is a placement.
    pub fn placement_rank(&self) -> Option<u32> {
        match self {
            Self::Winner | Self::SeasonGold => Some(1),
            Self::RunnerUp | Self::SeasonSilver => Some(2),
            Self::SeasonBronze => Some(3),
            Self::RankUp | Self::IronMan | Self::Ace => None,
        }
    }

    /// Competition podium trophies: at most one holder per competition.
    pub fn is_podium(&self) -> bool {
        matches!(self, Self::Winner | Self::RunnerUp)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trophy {
    pub id: String,
    pub competition_id: String,
    pub player_id: PlayerId,
    pub trophy_type: TrophyType,
    pub rank: u32,
    /// Season label at award time, see [`crate::calendar::season_label`].
    pub season: String,
    pub awarded_at: DateTime<Utc>,
}

impl Trophy {
    pub fn id_for(competition_id: &str, player_id: &str, trophy_type: TrophyType) -> String {
        format!("{competition_id}_{player_id}_{}", trophy_type.as_str())
    }
}

/// Denormalized placement counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlacementStats {
    pub championships: u32,
    pub runner_ups: u32,
    pub best_finish: Option<u32>,
}

impl PlacementStats {
    /// Apply one finishing position. The only code path that mutates
    /// placement counters, for both the profile and the flat lookup record.
    pub fn record(&mut self, rank: u32) {
        match rank {
            1 => {
                self.championships += 1;
                self.best_finish = Some(1);
                return;
            }
            2 => self.runner_ups += 1,
            _ => {}
        }
        if self.best_finish.map_or(true, |best| rank < best) {
            self.best_finish = Some(rank);
        }
    }
}

// ── Players & seasons ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub id: PlayerId,
    pub display_name: String,
    #[serde(default)]
    pub self_assessed_level: Option<String>,
    #[serde(default)]
    pub placement: PlacementStats,
}

impl PlayerProfile {
    pub fn new(id: impl Into<PlayerId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            self_assessed_level: None,
            placement: PlacementStats::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeasonStatus {
    Open,
    Finalizing,
    Closed,
}

impl SeasonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Finalizing => "finalizing",
            Self::Closed => "closed",
        }
    }

    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "finalizing" => Some(Self::Finalizing),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonState {
    pub id: String,
    pub status: SeasonStatus,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_match(winner: Option<SideId>) -> MatchRecord {
        MatchRecord {
            id: "m1".into(),
            home: Side::pair("a", "b"),
            away: Side::pair("c", "d"),
            match_type: MatchType::Doubles,
            context: RatingContext::Global,
            competition: CompetitionKind::Public,
            winner,
            score: "6-4 6-3".into(),
            ranked: true,
            played_at: Utc.with_ymd_and_hms(2026, 10, 2, 18, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_context_round_trip() {
        assert_eq!(RatingContext::parse("global"), Some(RatingContext::Global));
        assert_eq!(
            RatingContext::parse("club:north"),
            Some(RatingContext::Club("north".into()))
        );
        assert_eq!(RatingContext::parse("club:"), None);
        assert_eq!(RatingContext::Club("x".into()).to_string(), "club:x");

        let json = serde_json::to_string(&RatingContext::Club("x".into())).unwrap();
        assert_eq!(json, "\"club:x\"");
        let back: RatingContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RatingContext::Club("x".into()));
    }

    #[test]
    fn test_team_key_is_order_independent() {
        assert_eq!(Side::pair("b", "a").team_key(), "a_b");
        assert_eq!(Side::pair("a", "b").team_key(), "a_b");
        assert_eq!(Side::solo("z").team_key(), "z");
        assert_eq!(Side::pair("b", "a").team_ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_outcome_per_side() {
        let m = sample_match(Some(SideId::Home));
        assert_eq!(m.outcome_for(SideId::Home), Outcome::Win);
        assert_eq!(m.outcome_for(SideId::Away), Outcome::Loss);
        let draw = sample_match(None);
        assert_eq!(draw.outcome_for(SideId::Away), Outcome::Draw);
    }

    #[test]
    fn test_validate_rejects_bad_rosters() {
        let mut m = sample_match(Some(SideId::Home));
        assert!(m.validate().is_ok());

        m.away.partner = None;
        assert!(matches!(m.validate(), Err(EngineError::Validation(_))));

        let mut m = sample_match(Some(SideId::Home));
        m.away.partner = Some("a".into());
        assert!(matches!(m.validate(), Err(EngineError::Validation(_))));

        let mut m = sample_match(Some(SideId::Home));
        m.match_type = MatchType::Singles;
        assert!(matches!(m.validate(), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_league_outside_club() {
        let mut m = sample_match(Some(SideId::Home));
        m.competition = CompetitionKind::League;
        assert!(matches!(m.validate(), Err(EngineError::Validation(_))));
        m.context = RatingContext::Club("north".into());
        assert!(m.validate().is_ok());
    }

    #[test]
    fn test_ranked_defaults_to_true() {
        let json = r#"{
            "id": "m9",
            "home": {"leader": "a"},
            "away": {"leader": "b"},
            "match_type": "singles",
            "context": "global",
            "winner": "away",
            "played_at": "2026-10-02T18:00:00Z"
        }"#;
        let m: MatchRecord = serde_json::from_str(json).unwrap();
        assert!(m.ranked);
        assert_eq!(m.competition, CompetitionKind::Public);
    }

    #[test]
    fn test_placement_stats_record() {
        let mut stats = PlacementStats::default();
        stats.record(3);
        assert_eq!(stats.best_finish, Some(3));
        stats.record(2);
        assert_eq!(stats.runner_ups, 1);
        assert_eq!(stats.best_finish, Some(2));
        stats.record(3);
        assert_eq!(stats.best_finish, Some(2));
        stats.record(1);
        assert_eq!(stats.championships, 1);
        assert_eq!(stats.best_finish, Some(1));
        stats.record(2);
        assert_eq!(stats.best_finish, Some(1));
    }

    #[test]
    fn test_ids() {
        assert_eq!(Badge::id_for("champion", BadgeTier::Gold), "champion_gold");
        assert_eq!(
            Trophy::id_for("cup", "p1", TrophyType::RunnerUp),
            "cup_p1_runner_up"
        );
        assert_eq!(TrophyType::from_str_name("iron_man"), Some(TrophyType::IronMan));
        assert_eq!(BadgeTier::from_str_name("platinum"), Some(BadgeTier::Platinum));
    }

    #[test]
    fn test_season_record_rate() {
        let mut r = SeasonRecord::default();
        assert_eq!(r.win_rate(), 0.0);
        r.record(Outcome::Win);
        r.record(Outcome::Win);
        r.record(Outcome::Loss);
        r.record(Outcome::Draw);
        assert_eq!(r.played(), 4);
        assert!((r.win_rate() - 0.5).abs() < 1e-9);
    }
}
