// Engine facade: one handle that owns the store, clock and notifier and
// exposes every rating, cooldown and award operation.

use std::sync::Arc;

use crate::achievements::AchievementEngine;
use crate::calendar::{Clock, SystemClock};
use crate::competition::{Competition, Placement};
use crate::config::EngineSettings;
use crate::cooldown::{CooldownReport, CooldownValidator, MatchRequest, MatchValidation};
use crate::error::{EngineError, Result};
use crate::history::MatchHistory;
use crate::matches::{MatchOutcome, MatchOutcomeProcessor};
use crate::model::{
    HistoryEntry, MatchRecord, MatchType, Participants, PlayerProfile, PlayerRating,
    RatingChangeEvent, RatingContext, RatingKey,
};
use crate::notify::{LogNotifier, Notifier};
use crate::season::{OfficialRanker, SeasonRankingFinalizer, SeasonSummary};
use crate::stats::StatsCollector;
use crate::store::{MemoryStore, Store};
use crate::trophies::{AwardedTrophy, TrophyAwarder};

#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn Store>,
    settings: EngineSettings,
    history: MatchHistory,
    processor: MatchOutcomeProcessor,
    cooldown: CooldownValidator,
    achievements: AchievementEngine,
    trophies: TrophyAwarder,
    seasons: SeasonRankingFinalizer,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        settings: EngineSettings,
    ) -> Self {
        let history = MatchHistory::new(store.clone(), settings.history_cap);
        let stats = StatsCollector::new(store.clone(), history.clone(), clock.clone());
        Self {
            processor: MatchOutcomeProcessor::new(store.clone(), clock.clone(), settings.clone()),
            cooldown: CooldownValidator::new(store.clone(), clock.clone()),
            achievements: AchievementEngine::new(
                store.clone(),
                stats,
                notifier.clone(),
                clock.clone(),
            ),
            trophies: TrophyAwarder::new(store.clone(), notifier.clone(), clock.clone()),
            seasons: SeasonRankingFinalizer::new(store.clone(), notifier, clock),
            history,
            settings,
            store,
        }
    }

    /// In-memory store, wall clock and log notifications.
    pub fn local(settings: EngineSettings) -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            Arc::new(LogNotifier),
            settings,
        )
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // ── Registration ────────────────────────────────────────────────

    pub async fn register_player(&self, profile: &PlayerProfile) -> Result<()> {
        if profile.id.trim().is_empty() {
            return Err(EngineError::Validation("player id is empty".into()));
        }
        self.store.upsert_player(profile).await
    }

    pub async fn upsert_competition(&self, competition: &Competition) -> Result<()> {
        if competition.id.trim().is_empty() {
            return Err(EngineError::Validation("competition id is empty".into()));
        }
        if competition.kind.requires_club() && competition.club_id.is_none() {
            return Err(EngineError::Validation(format!(
                "{} competition {} needs a club",
                competition.kind.to_str_name(),
                competition.id
            )));
        }
        self.store.upsert_competition(competition).await
    }

    // ── Ratings ─────────────────────────────────────────────────────

    pub async fn process_match_outcome(&self, record: MatchRecord) -> Result<MatchOutcome> {
        self.processor.process_match_outcome(record).await
    }

    /// Current rating, or the baseline if the player has not played in
    /// this scope yet.
    pub async fn rating(&self, key: &RatingKey) -> Result<PlayerRating> {
        Ok(self
            .store
            .get_rating(key)
            .await?
            .unwrap_or_else(|| PlayerRating::baseline(key, self.settings.baseline)))
    }

    pub async fn rating_trend(
        &self,
        player_id: &str,
        limit: usize,
    ) -> Result<Vec<RatingChangeEvent>> {
        self.store.rating_events(player_id, limit).await
    }

    pub async fn recent_history(
        &self,
        player_id: &str,
        scope: &RatingContext,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        self.history.recent(player_id, scope, limit).await
    }

    // ── Match creation gates ────────────────────────────────────────

    pub async fn validate_cooldown(
        &self,
        participants: &Participants,
        match_type: MatchType,
    ) -> Result<CooldownReport> {
        self.cooldown.validate_cooldown(participants, match_type).await
    }

    pub async fn validate_match_request(&self, request: &MatchRequest) -> Result<MatchValidation> {
        self.cooldown.validate_match_request(request).await
    }

    // ── Awards ──────────────────────────────────────────────────────

    pub async fn check_and_award_achievements(
        &self,
        player_id: &str,
        context_ids: &[String],
    ) -> Result<Vec<String>> {
        self.achievements
            .check_and_award_achievements(player_id, context_ids)
            .await
    }

    pub async fn award_placement_trophies(
        &self,
        rankings: &[Placement],
        competition: &Competition,
    ) -> Result<Vec<AwardedTrophy>> {
        self.trophies
            .award_placement_trophies(rankings, competition)
            .await
    }

    /// Like [`Self::award_placement_trophies`] for a competition already
    /// known to the store.
    pub async fn award_competition_trophies(
        &self,
        competition_id: &str,
        rankings: &[Placement],
    ) -> Result<Vec<AwardedTrophy>> {
        let competition = self
            .store
            .get_competitions(&[competition_id.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::NotFound(format!("competition {competition_id}")))?;
        self.award_placement_trophies(rankings, &competition).await
    }

    pub async fn finalize_season(
        &self,
        season_id: &str,
        rankers: &[OfficialRanker],
    ) -> Result<SeasonSummary> {
        self.seasons.finalize_season(season_id, rankers).await
    }
}
