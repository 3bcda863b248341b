// In-memory Store used for local mode and tests.
//
// All state sits behind one mutex, so every trait method is trivially
// atomic. Writes validate everything first and only then mutate.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{MatchCommit, Store};
use crate::competition::Competition;
use crate::error::{EngineError, Result};
use crate::history::insert_capped;
use crate::model::{
    Badge, HistoryEntry, MatchRecord, PlacementStats, PlayerId, PlayerProfile, PlayerRating,
    RatingChangeEvent, RatingContext, RatingKey, SeasonRecord, SeasonState, SeasonStatus, Trophy,
};

#[derive(Default)]
struct State {
    players: HashMap<PlayerId, PlayerProfile>,
    placement_lookup: HashMap<PlayerId, PlacementStats>,
    ratings: HashMap<RatingKey, PlayerRating>,
    events: Vec<RatingChangeEvent>,
    matches: BTreeMap<String, MatchRecord>,
    history: HashMap<(PlayerId, RatingContext), Vec<HistoryEntry>>,
    badges: HashMap<PlayerId, BTreeMap<String, Badge>>,
    competitions: BTreeMap<String, Competition>,
    trophies: BTreeMap<String, Trophy>,
    seasons: HashMap<String, SeasonState>,
    season_records: HashMap<(String, PlayerId), SeasonRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_match_lookups: AtomicBool,
    injected_conflicts: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make `matches_since` fail with a dependency error, simulating an
    /// unavailable backend.
    pub fn set_fail_match_lookups(&self, fail: bool) {
        self.fail_match_lookups.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `n` match commits with a conflict.
    pub fn inject_conflicts(&self, n: u32) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    /// Seed a rating directly, bypassing version checks.
    pub fn seed_rating(&self, mut rating: PlayerRating) {
        rating.version = rating.version.max(1);
        self.lock().ratings.insert(rating.key(), rating);
    }

    /// Seed season counters directly.
    pub fn seed_season_record(&self, record: SeasonRecord) {
        self.lock()
            .season_records
            .insert((record.season_id.clone(), record.player_id.clone()), record);
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn check_version(state: &State, rating: &PlayerRating) -> Result<()> {
    let stored = state.ratings.get(&rating.key()).map_or(0, |r| r.version);
    if stored != rating.version {
        return Err(EngineError::Conflict(format!(
            "rating {}/{}/{} moved from version {} to {}",
            rating.player_id,
            rating.context,
            rating.match_type.as_str(),
            rating.version,
            stored
        )));
    }
    Ok(())
}

fn push_history(state: &mut State, entries: &[HistoryEntry], cap: usize) {
    for entry in entries {
        let log = state
            .history
            .entry((entry.player_id.clone(), entry.scope.clone()))
            .or_default();
        insert_capped(log, entry.clone(), cap);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_player(&self, player_id: &str) -> Result<Option<PlayerProfile>> {
        Ok(self.lock().players.get(player_id).cloned())
    }

    async fn upsert_player(&self, profile: &PlayerProfile) -> Result<()> {
        let mut state = self.lock();
        if let Some(existing) = state.players.get_mut(&profile.id) {
            existing.display_name = profile.display_name.clone();
            existing.self_assessed_level = profile.self_assessed_level.clone();
            return Ok(());
        }
        state
            .placement_lookup
            .entry(profile.id.clone())
            .or_insert(profile.placement);
        state.players.insert(profile.id.clone(), profile.clone());
        Ok(())
    }

    async fn placement_lookup(&self, player_id: &str) -> Result<Option<PlacementStats>> {
        Ok(self.lock().placement_lookup.get(player_id).copied())
    }

    async fn get_rating(&self, key: &RatingKey) -> Result<Option<PlayerRating>> {
        Ok(self.lock().ratings.get(key).cloned())
    }

    async fn rating_events(&self, player_id: &str, limit: usize) -> Result<Vec<RatingChangeEvent>> {
        let state = self.lock();
        Ok(state
            .events
            .iter()
            .rev()
            .filter(|e| e.player_id == player_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn commit_match(&self, commit: &MatchCommit) -> Result<()> {
        if self.take_injected_conflict() {
            return Err(EngineError::Conflict("injected write conflict".into()));
        }

        let mut state = self.lock();
        if state.matches.contains_key(&commit.record.id) {
            return Err(EngineError::Validation(format!(
                "match {} was already processed",
                commit.record.id
            )));
        }
        for rating in &commit.ratings {
            check_version(&state, rating)?;
        }

        for rating in &commit.ratings {
            let mut stored = rating.clone();
            stored.version += 1;
            state.ratings.insert(stored.key(), stored);
        }
        state.events.extend(commit.events.iter().cloned());
        push_history(&mut state, &commit.history, commit.history_cap);
        for result in &commit.season_results {
            let record = state
                .season_records
                .entry((result.season_id.clone(), result.player_id.clone()))
                .or_insert_with(|| SeasonRecord {
                    season_id: result.season_id.clone(),
                    player_id: result.player_id.clone(),
                    ..SeasonRecord::default()
                });
            record.record(result.outcome);
        }
        state
            .matches
            .insert(commit.record.id.clone(), commit.record.clone());
        Ok(())
    }

    async fn get_match(&self, match_id: &str) -> Result<Option<MatchRecord>> {
        Ok(self.lock().matches.get(match_id).cloned())
    }

    async fn matches_since(
        &self,
        player_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<MatchRecord>> {
        if self.fail_match_lookups.load(Ordering::SeqCst) {
            return Err(EngineError::Dependency("match index unavailable".into()));
        }
        let state = self.lock();
        Ok(state
            .matches
            .values()
            .filter(|m| m.played_at >= since && m.involves(player_id))
            .cloned()
            .collect())
    }

    async fn recent_history(
        &self,
        player_id: &str,
        scope: &RatingContext,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        let state = self.lock();
        Ok(state
            .history
            .get(&(player_id.to_string(), scope.clone()))
            .map(|log| log.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn badges_for_player(&self, player_id: &str) -> Result<Vec<Badge>> {
        Ok(self
            .lock()
            .badges
            .get(player_id)
            .map(|b| b.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_badge_if_absent(&self, badge: &Badge) -> Result<bool> {
        let mut state = self.lock();
        let badges = state.badges.entry(badge.player_id.clone()).or_default();
        if badges.contains_key(&badge.id) {
            return Ok(false);
        }
        badges.insert(badge.id.clone(), badge.clone());
        Ok(true)
    }

    async fn upsert_competition(&self, competition: &Competition) -> Result<()> {
        self.lock()
            .competitions
            .insert(competition.id.clone(), competition.clone());
        Ok(())
    }

    async fn get_competitions(&self, ids: &[String]) -> Result<Vec<Competition>> {
        let state = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| state.competitions.get(id).cloned())
            .collect())
    }

    async fn competitions_for_player(&self, player_id: &str) -> Result<Vec<Competition>> {
        let state = self.lock();
        Ok(state
            .competitions
            .values()
            .filter(|c| c.participants.iter().any(|p| p == player_id))
            .cloned()
            .collect())
    }

    async fn trophies_for_player(&self, player_id: &str) -> Result<Vec<Trophy>> {
        let state = self.lock();
        Ok(state
            .trophies
            .values()
            .filter(|t| t.player_id == player_id)
            .cloned()
            .collect())
    }

    async fn commit_trophies(&self, trophies: &[Trophy]) -> Result<Vec<Trophy>> {
        let mut state = self.lock();

        let mut fresh: Vec<&Trophy> = Vec::new();
        for trophy in trophies {
            if state.trophies.contains_key(&trophy.id) || fresh.iter().any(|t| t.id == trophy.id) {
                continue;
            }
            if trophy.trophy_type.placement_rank().is_some()
                && !state.players.contains_key(&trophy.player_id)
            {
                return Err(EngineError::NotFound(format!("player {}", trophy.player_id)));
            }
            if trophy.trophy_type.is_podium() {
                let holder = state.trophies.values().chain(fresh.iter().copied()).find(|t| {
                    t.competition_id == trophy.competition_id
                        && t.trophy_type == trophy.trophy_type
                        && t.player_id != trophy.player_id
                });
                if let Some(holder) = holder {
                    return Err(EngineError::Validation(format!(
                        "{} of {} is already awarded to {}",
                        trophy.trophy_type.as_str(),
                        trophy.competition_id,
                        holder.player_id
                    )));
                }
            }
            fresh.push(trophy);
        }

        for trophy in &fresh {
            state.trophies.insert(trophy.id.clone(), (*trophy).clone());
            if let Some(rank) = trophy.trophy_type.placement_rank() {
                if let Some(profile) = state.players.get_mut(&trophy.player_id) {
                    profile.placement.record(rank);
                }
                state
                    .placement_lookup
                    .entry(trophy.player_id.clone())
                    .or_default()
                    .record(rank);
            }
        }
        Ok(fresh.into_iter().cloned().collect())
    }

    async fn get_season(&self, season_id: &str) -> Result<Option<SeasonState>> {
        Ok(self.lock().seasons.get(season_id).cloned())
    }

    async fn transition_season(
        &self,
        season_id: &str,
        from: SeasonStatus,
        to: SeasonStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.lock();
        let current = state
            .seasons
            .get(season_id)
            .map_or(SeasonStatus::Open, |s| s.status);
        if current != from {
            return Err(EngineError::Conflict(format!(
                "season {season_id} is {}, expected {}",
                current.as_str(),
                from.as_str()
            )));
        }
        state.seasons.insert(
            season_id.to_string(),
            SeasonState {
                id: season_id.to_string(),
                status: to,
                updated_at: Some(at),
            },
        );
        Ok(())
    }

    async fn season_records(
        &self,
        season_id: &str,
        player_ids: &[PlayerId],
    ) -> Result<Vec<SeasonRecord>> {
        let state = self.lock();
        Ok(player_ids
            .iter()
            .filter_map(|p| {
                state
                    .season_records
                    .get(&(season_id.to_string(), p.clone()))
                    .cloned()
            })
            .collect())
    }
}
