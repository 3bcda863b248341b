// Match outcome processing: turns a confirmed match into rating updates.
//
// One read-compute-commit cycle per attempt. Ratings, rating events,
// history rows, season counters and the match record land in a single
// store commit; a stale rating version restarts the whole cycle.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::try_join_all;
use serde::Serialize;

use crate::calendar::{Clock, Quarter};
use crate::config::EngineSettings;
use crate::elo::calculate_new_rating;
use crate::error::{EngineError, Result};
use crate::history::entries_for_match;
use crate::k_factor::{Experience, KFactorPolicy};
use crate::metrics;
use crate::model::{
    MatchRecord, PlayerId, PlayerRating, RatingChangeEvent, RatingKey, SeasonResult, SideId,
};
use crate::store::{retry_on_conflict, MatchCommit, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RatingChange {
    pub old: i32,
    pub new: i32,
    pub delta: i32,
    pub k_factor: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchOutcome {
    pub match_id: String,
    pub ranked: bool,
    /// Empty for unranked matches.
    pub per_player: BTreeMap<PlayerId, RatingChange>,
}

#[derive(Clone)]
pub struct MatchOutcomeProcessor {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl MatchOutcomeProcessor {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, settings: EngineSettings) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    pub async fn process_match_outcome(&self, record: MatchRecord) -> Result<MatchOutcome> {
        record.validate()?;

        let result = retry_on_conflict(
            self.settings.commit_attempts,
            self.settings.commit_backoff,
            |attempt| {
                if attempt > 1 {
                    tracing::debug!(match_id = %record.id, attempt, "Re-reading ratings");
                }
                self.attempt(&record)
            },
        )
        .await;

        match result {
            Ok(outcome) => {
                metrics::MATCHES_PROCESSED_TOTAL
                    .with_label_values(&[record.match_type.as_str(), &record.ranked.to_string()])
                    .inc();
                for change in outcome.per_player.values() {
                    metrics::RATING_DELTA.observe(change.delta.unsigned_abs() as f64);
                }
                tracing::info!(
                    match_id = %record.id,
                    ranked = record.ranked,
                    context = %record.context,
                    "Match outcome processed"
                );
                Ok(outcome)
            }
            Err(e) => {
                match &e {
                    EngineError::Validation(_) | EngineError::NotFound(_) => {
                        tracing::warn!(match_id = %record.id, "Match outcome rejected: {e}");
                    }
                    _ => tracing::error!(match_id = %record.id, "Match commit failed: {e}"),
                }
                Err(e)
            }
        }
    }

    async fn attempt(&self, record: &MatchRecord) -> Result<MatchOutcome> {
        let players: Vec<PlayerId> = record.participants().all().cloned().collect();

        let lookups = players.iter().map(|player_id| {
            let key = RatingKey {
                player_id: player_id.clone(),
                context: record.context.clone(),
                match_type: record.match_type,
            };
            async move {
                let (profile, rating) = if record.ranked {
                    futures::try_join!(
                        self.store.get_player(player_id),
                        self.store.get_rating(&key)
                    )?
                } else {
                    (self.store.get_player(player_id).await?, None)
                };
                if profile.is_none() {
                    return Err(EngineError::NotFound(format!("player {player_id}")));
                }
                Ok(rating.unwrap_or_else(|| PlayerRating::baseline(&key, self.settings.baseline)))
            }
        });
        let ratings = try_join_all(lookups).await?;

        let mut commit = MatchCommit {
            record: record.clone(),
            ratings: Vec::new(),
            events: Vec::new(),
            history: entries_for_match(record),
            season_results: Vec::new(),
            history_cap: self.settings.history_cap,
        };
        let mut per_player = BTreeMap::new();

        if record.ranked {
            let current: HashMap<&str, &PlayerRating> =
                ratings.iter().map(|r| (r.player_id.as_str(), r)).collect();
            let policy = KFactorPolicy::for_competition(self.settings.k_policy, record.competition);
            let season_id = Quarter::containing(record.played_at).id();
            let now = self.clock.now();

            for side in SideId::BOTH {
                let outcome = record.outcome_for(side);
                let opposing_leader = &record.side(side.opposite()).leader;
                let opponent_rating = current
                    .get(opposing_leader.as_str())
                    .map(|r| r.current)
                    .ok_or_else(|| EngineError::NotFound(format!("rating for {opposing_leader}")))?;

                for player in record.side(side).players() {
                    let before = current
                        .get(player.as_str())
                        .ok_or_else(|| EngineError::NotFound(format!("rating for {player}")))?;
                    let k = policy.k_factor(
                        &record.context,
                        Experience::new(before.matches_played, before.current),
                    );
                    let new = calculate_new_rating(
                        before.current,
                        opponent_rating,
                        outcome,
                        k,
                        self.settings.bounds,
                    );
                    let delta = new - before.current;

                    commit.ratings.push(PlayerRating {
                        current: new,
                        peak: before.peak.max(new),
                        matches_played: before.matches_played + 1,
                        ..(*before).clone()
                    });
                    commit.events.push(RatingChangeEvent {
                        match_id: record.id.clone(),
                        player_id: player.clone(),
                        context: record.context.clone(),
                        match_type: record.match_type,
                        opponent_id: opposing_leader.clone(),
                        old_rating: before.current,
                        new_rating: new,
                        delta,
                        k_factor: k,
                        recorded_at: now,
                    });
                    commit.season_results.push(SeasonResult {
                        season_id: season_id.clone(),
                        player_id: player.clone(),
                        outcome,
                    });
                    per_player.insert(
                        player.clone(),
                        RatingChange {
                            old: before.current,
                            new,
                            delta,
                            k_factor: k,
                        },
                    );
                }
            }
        }

        self.store.commit_match(&commit).await?;
        Ok(MatchOutcome {
            match_id: record.id.clone(),
            ranked: record.ranked,
            per_player,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::FixedClock;
    use crate::competition::CompetitionKind;
    use crate::elo::Outcome;
    use crate::model::{MatchType, PlayerProfile, RatingContext, Side};
    use crate::store::MemoryStore;
    use chrono::{DateTime, TimeZone, Utc};
    use std::time::Duration;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    }

    async fn setup(players: &[&str]) -> (Arc<MemoryStore>, MatchOutcomeProcessor) {
        let store = Arc::new(MemoryStore::new());
        for p in players {
            store.upsert_player(&PlayerProfile::new(*p, *p)).await.unwrap();
        }
        let settings = EngineSettings {
            commit_backoff: Duration::from_millis(1),
            ..EngineSettings::default()
        };
        let processor = MatchOutcomeProcessor::new(
            store.clone(),
            Arc::new(FixedClock::new(now())),
            settings,
        );
        (store, processor)
    }

    fn seed(store: &MemoryStore, player: &str, match_type: MatchType, current: i32, played: u32) {
        store.seed_rating(PlayerRating {
            player_id: player.into(),
            context: RatingContext::Global,
            match_type,
            current,
            peak: current,
            matches_played: played,
            version: 1,
        });
    }

    fn singles(id: &str, winner: Option<SideId>) -> MatchRecord {
        MatchRecord {
            id: id.into(),
            home: Side::solo("a"),
            away: Side::solo("b"),
            match_type: MatchType::Singles,
            context: RatingContext::Global,
            competition: CompetitionKind::Public,
            winner,
            score: "6-4 6-4".into(),
            ranked: true,
            played_at: now(),
        }
    }

    async fn rating_of(store: &MemoryStore, player: &str, match_type: MatchType) -> PlayerRating {
        store
            .get_rating(&RatingKey {
                player_id: player.into(),
                context: RatingContext::Global,
                match_type,
            })
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_singles_upset_against_baseline() {
        let (store, processor) = setup(&["a", "b"]).await;
        seed(&store, "b", MatchType::Singles, 1300, 1);

        let outcome = processor
            .process_match_outcome(singles("m1", Some(SideId::Home)))
            .await
            .unwrap();

        let a = outcome.per_player["a"];
        assert_eq!((a.old, a.new, a.delta, a.k_factor), (1200, 1220, 20, 32));
        let b = outcome.per_player["b"];
        assert_eq!((b.old, b.new, b.delta), (1300, 1280, -20));

        let stored = rating_of(&store, "a", MatchType::Singles).await;
        assert_eq!(stored.current, 1220);
        assert_eq!(stored.peak, 1220);
        assert_eq!(stored.matches_played, 1);
        let stored_b = rating_of(&store, "b", MatchType::Singles).await;
        assert_eq!(stored_b.peak, 1300);
        assert_eq!(stored_b.matches_played, 2);

        let events = store.rating_events("a", 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].opponent_id, "b");
        assert_eq!(events[0].recorded_at, now());
    }

    #[tokio::test]
    async fn test_doubles_rates_against_opposing_leader() {
        let (store, processor) = setup(&["a", "b", "c", "d"]).await;
        seed(&store, "a", MatchType::Doubles, 1400, 3);
        seed(&store, "b", MatchType::Doubles, 1000, 3);
        seed(&store, "c", MatchType::Doubles, 1200, 3);
        seed(&store, "d", MatchType::Doubles, 1600, 3);

        let record = MatchRecord {
            id: "m1".into(),
            home: Side::pair("a", "b"),
            away: Side::pair("c", "d"),
            match_type: MatchType::Doubles,
            context: RatingContext::Global,
            competition: CompetitionKind::Public,
            winner: Some(SideId::Home),
            score: "7-5 6-4".into(),
            ranked: true,
            played_at: now(),
        };
        let outcome = processor.process_match_outcome(record).await.unwrap();

        assert_eq!(outcome.per_player["a"].new, 1408);
        assert_eq!(outcome.per_player["b"].new, 1024);
        assert_eq!(outcome.per_player["c"].new, 1192);
        assert_eq!(outcome.per_player["d"].new, 1576);

        let events = store.rating_events("d", 10).await.unwrap();
        assert_eq!(events[0].opponent_id, "a");
    }

    #[tokio::test]
    async fn test_rating_stays_within_bounds() {
        let (store, processor) = setup(&["a", "b"]).await;
        seed(&store, "a", MatchType::Singles, 2995, 40);
        seed(&store, "b", MatchType::Singles, 2995, 40);

        let outcome = processor
            .process_match_outcome(singles("m1", Some(SideId::Home)))
            .await
            .unwrap();
        assert_eq!(outcome.per_player["a"].new, 3000);
        assert_eq!(outcome.per_player["a"].delta, 5);
    }

    #[tokio::test]
    async fn test_draw_between_equals_changes_nothing() {
        let (_store, processor) = setup(&["a", "b"]).await;
        let outcome = processor
            .process_match_outcome(singles("m1", None))
            .await
            .unwrap();
        assert_eq!(outcome.per_player["a"].delta, 0);
        assert_eq!(outcome.per_player["b"].delta, 0);
    }

    #[tokio::test]
    async fn test_unknown_player_aborts_without_writes() {
        let (store, processor) = setup(&["a"]).await;
        let err = processor
            .process_match_outcome(singles("m1", Some(SideId::Home)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
        assert!(store.get_match("m1").await.unwrap().is_none());
        assert!(store.rating_events("a", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_shape_rejected() {
        let (_store, processor) = setup(&["a", "b"]).await;
        let mut record = singles("m1", Some(SideId::Home));
        record.away = Side::solo("a");
        let err = processor.process_match_outcome(record).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_reprocessing_is_rejected() {
        let (store, processor) = setup(&["a", "b"]).await;
        processor
            .process_match_outcome(singles("m1", Some(SideId::Home)))
            .await
            .unwrap();
        let err = processor
            .process_match_outcome(singles("m1", Some(SideId::Home)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(rating_of(&store, "a", MatchType::Singles).await.matches_played, 1);
    }

    #[tokio::test]
    async fn test_conflicts_are_retried() {
        let (store, processor) = setup(&["a", "b"]).await;
        store.inject_conflicts(2);
        processor
            .process_match_outcome(singles("m1", Some(SideId::Home)))
            .await
            .unwrap();
        assert_eq!(rating_of(&store, "a", MatchType::Singles).await.current, 1216);
    }

    #[tokio::test]
    async fn test_conflicts_surface_after_attempts() {
        let (store, processor) = setup(&["a", "b"]).await;
        store.inject_conflicts(3);
        let err = processor
            .process_match_outcome(singles("m1", Some(SideId::Home)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
        assert!(store.get_match("m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unranked_only_appends_history() {
        let (store, processor) = setup(&["a", "b"]).await;
        let mut record = singles("m1", Some(SideId::Away));
        record.ranked = false;
        let outcome = processor.process_match_outcome(record).await.unwrap();

        assert!(!outcome.ranked);
        assert!(outcome.per_player.is_empty());
        assert!(store
            .get_rating(&RatingKey {
                player_id: "a".into(),
                context: RatingContext::Global,
                match_type: MatchType::Singles,
            })
            .await
            .unwrap()
            .is_none());
        let log = store
            .recent_history("b", &RatingContext::Global, 10)
            .await
            .unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].result, Outcome::Win);
        assert!(store
            .season_records("2026-Q4", &["b".to_string()])
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_season_counters_follow_match_quarter() {
        let (store, processor) = setup(&["a", "b"]).await;
        let mut record = singles("m1", Some(SideId::Away));
        record.played_at = Utc.with_ymd_and_hms(2026, 9, 30, 20, 0, 0).unwrap();
        processor.process_match_outcome(record).await.unwrap();

        let q3 = store
            .season_records("2026-Q3", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(q3.len(), 2);
        let b = q3.iter().find(|r| r.player_id == "b").unwrap();
        assert_eq!((b.wins, b.losses), (1, 0));
    }

    #[tokio::test]
    async fn test_club_league_uses_club_k() {
        let (store, processor) = setup(&["a", "b"]).await;
        let mut record = singles("m1", Some(SideId::Home));
        record.context = RatingContext::Club("north".into());
        record.competition = CompetitionKind::League;
        let outcome = processor.process_match_outcome(record).await.unwrap();
        assert_eq!(outcome.per_player["a"].k_factor, 16);
        assert_eq!(outcome.per_player["a"].new, 1208);
        // Club ratings are tracked separately from global ones.
        assert!(store
            .get_rating(&RatingKey {
                player_id: "a".into(),
                context: RatingContext::Global,
                match_type: MatchType::Singles,
            })
            .await
            .unwrap()
            .is_none());
    }
}
