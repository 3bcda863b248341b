// Persistence boundary.
//
// Engine logic only talks to the `Store` trait. Each method is one atomic
// unit: multi-record writes (match commits, trophy batches) either land
// completely or not at all.

pub mod memory;
pub mod sqlite;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;

use crate::competition::Competition;
use crate::error::{EngineError, Result};
use crate::metrics;
use crate::model::{
    Badge, HistoryEntry, MatchRecord, PlacementStats, PlayerId, PlayerProfile, PlayerRating,
    RatingChangeEvent, RatingContext, RatingKey, SeasonRecord, SeasonResult, SeasonState,
    SeasonStatus, Trophy,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Everything a processed match writes, committed in one transaction.
#[derive(Debug, Clone)]
pub struct MatchCommit {
    pub record: MatchRecord,
    /// New rating values. `version` carries the version that was read; the
    /// store rejects the commit with a conflict if it has moved since.
    pub ratings: Vec<PlayerRating>,
    pub events: Vec<RatingChangeEvent>,
    pub history: Vec<HistoryEntry>,
    pub season_results: Vec<SeasonResult>,
    pub history_cap: usize,
}

#[async_trait]
pub trait Store: Send + Sync {
    // ── Players ──────────────────────────────────────────────────────

    async fn get_player(&self, player_id: &str) -> Result<Option<PlayerProfile>>;

    /// Create the player, or update name and level of an existing one.
    /// Placement counters of an existing player are never touched here.
    async fn upsert_player(&self, profile: &PlayerProfile) -> Result<()>;

    /// Flat placement lookup record (mirror of the profile's counters).
    async fn placement_lookup(&self, player_id: &str) -> Result<Option<PlacementStats>>;

    // ── Ratings ──────────────────────────────────────────────────────

    async fn get_rating(&self, key: &RatingKey) -> Result<Option<PlayerRating>>;

    /// Newest-first rating trend rows for a player.
    async fn rating_events(&self, player_id: &str, limit: usize) -> Result<Vec<RatingChangeEvent>>;

    /// Apply a processed match atomically. Fails with `Validation` if the
    /// match was already committed and `Conflict` on a stale rating version.
    async fn commit_match(&self, commit: &MatchCommit) -> Result<()>;

    // ── Matches ──────────────────────────────────────────────────────

    async fn get_match(&self, match_id: &str) -> Result<Option<MatchRecord>>;

    /// Committed matches involving `player_id` played at or after `since`.
    async fn matches_since(&self, player_id: &str, since: DateTime<Utc>)
        -> Result<Vec<MatchRecord>>;

    // ── History ──────────────────────────────────────────────────────

    /// Newest-first history for one (player, scope). Rows are written by
    /// `commit_match`, which evicts anything beyond the cap.
    async fn recent_history(
        &self,
        player_id: &str,
        scope: &RatingContext,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>>;

    // ── Badges ───────────────────────────────────────────────────────

    async fn badges_for_player(&self, player_id: &str) -> Result<Vec<Badge>>;

    /// Write-if-absent. Returns `true` only if this call created the badge.
    async fn insert_badge_if_absent(&self, badge: &Badge) -> Result<bool>;

    // ── Competitions ─────────────────────────────────────────────────

    async fn upsert_competition(&self, competition: &Competition) -> Result<()>;

    /// Batched lookup; unknown ids are skipped.
    async fn get_competitions(&self, ids: &[String]) -> Result<Vec<Competition>>;

    async fn competitions_for_player(&self, player_id: &str) -> Result<Vec<Competition>>;

    // ── Trophies ─────────────────────────────────────────────────────

    async fn trophies_for_player(&self, player_id: &str) -> Result<Vec<Trophy>>;

    /// Insert absent trophies in one transaction and return the ones that
    /// were new. Placement counters (profile and flat lookup) are bumped for
    /// new placement trophies only. A Winner or RunnerUp already held by
    /// another player for the same competition fails the whole batch with
    /// `Validation`.
    async fn commit_trophies(&self, trophies: &[Trophy]) -> Result<Vec<Trophy>>;

    // ── Seasons ──────────────────────────────────────────────────────

    /// Missing seasons read as `None`; callers treat that as open.
    async fn get_season(&self, season_id: &str) -> Result<Option<SeasonState>>;

    /// Compare-and-set the season status. A missing season counts as open.
    async fn transition_season(
        &self,
        season_id: &str,
        from: SeasonStatus,
        to: SeasonStatus,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Batched season counters; players without a record are omitted.
    async fn season_records(
        &self,
        season_id: &str,
        player_ids: &[PlayerId],
    ) -> Result<Vec<SeasonRecord>>;
}

/// Run `op` until it succeeds or fails with something other than a
/// conflict, at most `attempts` times, sleeping with exponential backoff
/// plus jitter between tries.
pub async fn retry_on_conflict<T, F, Fut>(attempts: u32, base: Duration, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            Err(EngineError::Conflict(msg)) if attempt < attempts => {
                metrics::COMMIT_CONFLICTS_TOTAL.inc();
                let delay = backoff_delay(base, attempt);
                tracing::warn!(attempt, ?delay, "Write conflict, retrying: {msg}");
                tokio::time::sleep(delay).await;
            }
            Err(EngineError::Conflict(msg)) => {
                metrics::COMMIT_CONFLICTS_TOTAL.inc();
                return Err(EngineError::Conflict(format!(
                    "{msg} (gave up after {attempts} attempts)"
                )));
            }
            other => return other,
        }
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
    let jitter_ms = base.as_millis().min(u64::MAX as u128) as u64;
    let jitter = if jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_ms)
    };
    exp + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_succeeds_after_conflicts() {
        let calls = AtomicU32::new(0);
        let result = retry_on_conflict(3, Duration::from_millis(1), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(EngineError::Conflict("stale".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_on_conflict(3, Duration::from_millis(1), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::Conflict("stale".into())) }
        })
        .await;
        assert!(matches!(result, Err(EngineError::Conflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_does_not_retry_other_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_on_conflict(3, Duration::from_millis(1), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::NotFound("player".into())) }
        })
        .await;
        assert!(matches!(result, Err(EngineError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_grows() {
        let base = Duration::from_millis(10);
        let first = backoff_delay(base, 1);
        let third = backoff_delay(base, 3);
        assert!(first >= base && first <= base * 2);
        assert!(third >= base * 4 && third <= base * 5);
    }
}
