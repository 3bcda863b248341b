// Season close-out: champion, rank-up, iron man and ace awards.
//
// Seasons move OPEN -> FINALIZING -> CLOSED. A closed season is never
// touched again; a season left in FINALIZING by a failed run can be resumed
// because every trophy id is deterministic.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::{Clock, Quarter};
use crate::error::{EngineError, Result};
use crate::metrics;
use crate::model::{PlayerId, SeasonStatus, Trophy, TrophyType};
use crate::notify::Notifier;
use crate::store::Store;
use crate::tier::{grade_floor, grade_for_rating};
use crate::trophies::{build_trophy, commit_and_notify};

/// Season matches needed before a player can win the ace award.
pub const ACE_MIN_MATCHES: u32 = 10;

/// A player who finished the season on the official ranking list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfficialRanker {
    pub player_id: PlayerId,
    pub rating: i32,
    pub season_matches_played: u32,
    /// Grade at season start; may be fractional (e.g. 4.5).
    pub starting_grade: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeasonAward {
    pub player_id: PlayerId,
    pub trophy_id: String,
    pub trophy_type: TrophyType,
    pub rank: u32,
    /// False when an earlier run already wrote this trophy.
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeasonSummary {
    pub season_id: String,
    pub already_closed: bool,
    /// The season was found mid-finalization and picked up again.
    pub resumed: bool,
    pub champions: Vec<SeasonAward>,
    pub rank_ups: Vec<SeasonAward>,
    pub iron_men: Vec<SeasonAward>,
    pub aces: Vec<SeasonAward>,
}

impl SeasonSummary {
    fn empty(season_id: &str) -> Self {
        Self {
            season_id: season_id.to_string(),
            already_closed: false,
            resumed: false,
            champions: Vec::new(),
            rank_ups: Vec::new(),
            iron_men: Vec::new(),
            aces: Vec::new(),
        }
    }
}

// ── Selection rules ───────────────────────────────────────────────────

/// `ceil(n * percent / 100)`, at least 1.
fn top_count(n: usize, percent: usize) -> usize {
    ((n * percent + 99) / 100).max(1)
}

/// Top three per starting-grade bracket, highest rating first. Equal
/// ratings keep their input order.
pub fn select_champions(rankers: &[OfficialRanker]) -> Vec<(&OfficialRanker, TrophyType, u32)> {
    let mut brackets: BTreeMap<u8, Vec<&OfficialRanker>> = BTreeMap::new();
    for r in rankers {
        brackets
            .entry(grade_floor(r.starting_grade))
            .or_default()
            .push(r);
    }

    let medals = [
        TrophyType::SeasonGold,
        TrophyType::SeasonSilver,
        TrophyType::SeasonBronze,
    ];
    let mut picks = Vec::new();
    for (_, mut bracket) in brackets {
        bracket.sort_by(|a, b| b.rating.cmp(&a.rating));
        for (ranker, (medal, rank)) in bracket.into_iter().zip(medals.into_iter().zip(1..)) {
            picks.push((ranker, medal, rank));
        }
    }
    picks
}

/// Players whose rating now maps above their starting bracket.
pub fn select_rank_ups(rankers: &[OfficialRanker]) -> Vec<&OfficialRanker> {
    rankers
        .iter()
        .filter(|r| grade_for_rating(r.rating) > grade_floor(r.starting_grade))
        .collect()
}

/// Top 10% (at least one) by season matches played. Players without a
/// season match are never picked.
pub fn select_iron_men(rankers: &[OfficialRanker]) -> Vec<&OfficialRanker> {
    let mut sorted: Vec<&OfficialRanker> = rankers
        .iter()
        .filter(|r| r.season_matches_played > 0)
        .collect();
    sorted.sort_by(|a, b| b.season_matches_played.cmp(&a.season_matches_played));
    sorted.truncate(top_count(rankers.len(), 10));
    sorted
}

/// Top 5% (at least one) of eligible players by season win rate.
pub fn select_aces<'a>(
    rankers: &'a [OfficialRanker],
    win_rates: &HashMap<PlayerId, f64>,
) -> Vec<&'a OfficialRanker> {
    let mut eligible: Vec<(&OfficialRanker, f64)> = rankers
        .iter()
        .filter(|r| r.season_matches_played >= ACE_MIN_MATCHES)
        .filter_map(|r| win_rates.get(&r.player_id).map(|rate| (r, *rate)))
        .collect();
    if eligible.is_empty() {
        return Vec::new();
    }
    let n = top_count(eligible.len(), 5);
    eligible.sort_by(|a, b| b.1.total_cmp(&a.1));
    eligible.into_iter().take(n).map(|(r, _)| r).collect()
}

fn validate_rankers(rankers: &[OfficialRanker]) -> Result<()> {
    let mut seen = HashSet::new();
    for r in rankers {
        if r.player_id.is_empty() {
            return Err(EngineError::Validation("ranker player id is empty".into()));
        }
        if !r.starting_grade.is_finite() {
            return Err(EngineError::Validation(format!(
                "ranker {} has an invalid starting grade",
                r.player_id
            )));
        }
        if !seen.insert(r.player_id.as_str()) {
            return Err(EngineError::Validation(format!(
                "ranker {} listed twice",
                r.player_id
            )));
        }
    }
    Ok(())
}

// ── Finalizer ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct SeasonRankingFinalizer {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl SeasonRankingFinalizer {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            notifier,
            clock,
        }
    }

    pub async fn finalize_season(
        &self,
        season_id: &str,
        rankers: &[OfficialRanker],
    ) -> Result<SeasonSummary> {
        // Season counters are keyed by quarter id.
        if Quarter::parse_id(season_id).map(|q| q.id()).as_deref() != Some(season_id) {
            return Err(EngineError::Validation(format!(
                "season id {season_id:?} is not a quarter id such as 2026-Q4"
            )));
        }
        validate_rankers(rankers)?;

        let mut summary = SeasonSummary::empty(season_id);
        let status = self
            .store
            .get_season(season_id)
            .await?
            .map_or(SeasonStatus::Open, |s| s.status);

        match status {
            SeasonStatus::Closed => {
                tracing::info!(season_id, "Season already closed, nothing to do");
                summary.already_closed = true;
                return Ok(summary);
            }
            SeasonStatus::Finalizing => {
                tracing::warn!(season_id, "Resuming interrupted season finalization");
                summary.resumed = true;
            }
            SeasonStatus::Open => {
                self.store
                    .transition_season(
                        season_id,
                        SeasonStatus::Open,
                        SeasonStatus::Finalizing,
                        self.clock.now(),
                    )
                    .await?;
            }
        }

        let now = self.clock.now();

        let champions: Vec<Trophy> = select_champions(rankers)
            .into_iter()
            .map(|(r, medal, rank)| build_trophy(season_id, &r.player_id, medal, rank, now))
            .collect();
        summary.champions = self.award(&champions).await?;

        let rank_ups = self.batch(season_id, select_rank_ups(rankers), TrophyType::RankUp, now);
        summary.rank_ups = self.award(&rank_ups).await?;

        let iron_men = self.batch(season_id, select_iron_men(rankers), TrophyType::IronMan, now);
        summary.iron_men = self.award(&iron_men).await?;

        let ids: Vec<PlayerId> = rankers.iter().map(|r| r.player_id.clone()).collect();
        let win_rates: HashMap<PlayerId, f64> = self
            .store
            .season_records(season_id, &ids)
            .await?
            .into_iter()
            .map(|rec| (rec.player_id.clone(), rec.win_rate()))
            .collect();
        let aces = self.batch(season_id, select_aces(rankers, &win_rates), TrophyType::Ace, now);
        summary.aces = self.award(&aces).await?;

        self.store
            .transition_season(
                season_id,
                SeasonStatus::Finalizing,
                SeasonStatus::Closed,
                self.clock.now(),
            )
            .await?;
        metrics::SEASONS_FINALIZED_TOTAL.inc();
        tracing::info!(
            season_id,
            rankers = rankers.len(),
            champions = summary.champions.len(),
            rank_ups = summary.rank_ups.len(),
            iron_men = summary.iron_men.len(),
            aces = summary.aces.len(),
            "Season finalized"
        );
        Ok(summary)
    }

    fn batch(
        &self,
        season_id: &str,
        picks: Vec<&OfficialRanker>,
        trophy_type: TrophyType,
        at: DateTime<Utc>,
    ) -> Vec<Trophy> {
        picks
            .into_iter()
            .map(|r| build_trophy(season_id, &r.player_id, trophy_type, 0, at))
            .collect()
    }

    /// One commit and one notification batch per award kind.
    async fn award(&self, trophies: &[Trophy]) -> Result<Vec<SeasonAward>> {
        let inserted =
            commit_and_notify(self.store.as_ref(), self.notifier.as_ref(), trophies).await?;
        Ok(trophies
            .iter()
            .map(|t| SeasonAward {
                player_id: t.player_id.clone(),
                trophy_id: t.id.clone(),
                trophy_type: t.trophy_type,
                rank: t.rank,
                created: inserted.iter().any(|i| i.id == t.id),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranker(id: &str, rating: i32, matches: u32, grade: f64) -> OfficialRanker {
        OfficialRanker {
            player_id: id.into(),
            rating,
            season_matches_played: matches,
            starting_grade: grade,
        }
    }

    fn ids(picks: &[&OfficialRanker]) -> Vec<String> {
        picks.iter().map(|r| r.player_id.clone()).collect()
    }

    #[test]
    fn test_top_count() {
        assert_eq!(top_count(0, 10), 1);
        assert_eq!(top_count(5, 10), 1);
        assert_eq!(top_count(10, 10), 1);
        assert_eq!(top_count(11, 10), 2);
        assert_eq!(top_count(30, 10), 3);
        assert_eq!(top_count(21, 5), 2);
    }

    #[test]
    fn test_champions_per_bracket_with_stable_ties() {
        let rankers = vec![
            ranker("a", 1350, 5, 4.0),
            ranker("b", 1400, 5, 4.5),
            ranker("c", 1350, 5, 4.2),
            ranker("d", 1300, 5, 4.9),
            ranker("e", 1500, 5, 5.0),
        ];
        let picks = select_champions(&rankers);
        let got: Vec<(&str, TrophyType, u32)> = picks
            .iter()
            .map(|(r, t, rank)| (r.player_id.as_str(), *t, *rank))
            .collect();
        assert_eq!(
            got,
            vec![
                ("b", TrophyType::SeasonGold, 1),
                ("a", TrophyType::SeasonSilver, 2),
                ("c", TrophyType::SeasonBronze, 3),
                ("e", TrophyType::SeasonGold, 1),
            ]
        );
    }

    #[test]
    fn test_only_top_three_of_a_full_bracket_get_medals() {
        // Ten grade-4 rankers, 1500 down to 1320, fed in shuffled order.
        let order = [6, 2, 9, 0, 4, 1, 8, 3, 7, 5];
        let rankers: Vec<OfficialRanker> = order
            .iter()
            .map(|&i| ranker(&format!("p{i}"), 1500 - 20 * i, 5, 4.3))
            .collect();
        let picks = select_champions(&rankers);
        let got: Vec<(&str, i32, TrophyType, u32)> = picks
            .iter()
            .map(|(r, t, rank)| (r.player_id.as_str(), r.rating, *t, *rank))
            .collect();
        assert_eq!(
            got,
            vec![
                ("p0", 1500, TrophyType::SeasonGold, 1),
                ("p1", 1480, TrophyType::SeasonSilver, 2),
                ("p2", 1460, TrophyType::SeasonBronze, 3),
            ]
        );
        for i in 3..10 {
            let id = format!("p{i}");
            assert!(picks.iter().all(|(r, _, _)| r.player_id != id));
        }
    }

    #[test]
    fn test_rank_ups() {
        let rankers = vec![
            ranker("up", 1400, 5, 4.5),   // grade 6 vs bracket 4
            ranker("same", 1250, 5, 4.0), // grade 4 vs bracket 4
        ];
        assert_eq!(ids(&select_rank_ups(&rankers)), vec!["up"]);
    }

    #[test]
    fn test_iron_men_takes_ten_percent() {
        let rankers: Vec<OfficialRanker> = (0..11)
            .map(|i| ranker(&format!("p{i}"), 1200, i, 4.0))
            .collect();
        assert_eq!(ids(&select_iron_men(&rankers)), vec!["p10", "p9"]);

        let idle = vec![ranker("x", 1200, 0, 4.0)];
        assert!(select_iron_men(&idle).is_empty());
    }

    #[test]
    fn test_aces_need_minimum_matches() {
        let rankers = vec![
            ranker("busy", 1200, 12, 4.0),
            ranker("sharp", 1200, 10, 4.0),
            ranker("rookie", 1200, 3, 4.0),
        ];
        let rates: HashMap<PlayerId, f64> = [
            ("busy".to_string(), 0.6),
            ("sharp".to_string(), 0.9),
            ("rookie".to_string(), 1.0),
        ]
        .into_iter()
        .collect();
        assert_eq!(ids(&select_aces(&rankers, &rates)), vec!["sharp"]);
        assert!(select_aces(&rankers[2..], &rates).is_empty());
    }

    mod finalize {
        use super::*;
        use crate::calendar::FixedClock;
        use crate::model::{PlayerProfile, SeasonRecord};
        use crate::notify::{Notification, RecordingNotifier};
        use crate::store::MemoryStore;
        use chrono::TimeZone;

        async fn setup(
            rankers: &[OfficialRanker],
        ) -> (Arc<MemoryStore>, Arc<RecordingNotifier>, SeasonRankingFinalizer) {
            let store = Arc::new(MemoryStore::new());
            for r in rankers {
                store
                    .upsert_player(&PlayerProfile::new(r.player_id.clone(), r.player_id.clone()))
                    .await
                    .unwrap();
            }
            let notifier = Arc::new(RecordingNotifier::new());
            let clock = Arc::new(FixedClock::new(
                Utc.with_ymd_and_hms(2026, 10, 1, 9, 0, 0).unwrap(),
            ));
            let finalizer = SeasonRankingFinalizer::new(store.clone(), notifier.clone(), clock);
            (store, notifier, finalizer)
        }

        #[tokio::test]
        async fn test_finalize_rejects_non_quarter_season_ids() {
            let rankers = vec![ranker("a", 1300, 12, 4.0)];
            let (store, _notifier, finalizer) = setup(&rankers).await;
            for id in ["fall-2026", "2026-Q5", "2026-Q04", ""] {
                let err = finalizer.finalize_season(id, &rankers).await.unwrap_err();
                assert!(matches!(err, EngineError::Validation(_)), "{id}");
                assert!(store.get_season(id).await.unwrap().is_none());
            }
            assert!(store.trophies_for_player("a").await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_finalize_awards_and_closes() {
            let rankers = vec![
                ranker("a", 1450, 14, 4.0),
                ranker("b", 1280, 12, 4.0),
                ranker("c", 1210, 3, 4.0),
            ];
            let (store, notifier, finalizer) = setup(&rankers).await;
            store.seed_season_record(SeasonRecord {
                season_id: "2026-Q3".into(),
                player_id: "b".into(),
                wins: 10,
                losses: 2,
                draws: 0,
            });
            store.seed_season_record(SeasonRecord {
                season_id: "2026-Q3".into(),
                player_id: "a".into(),
                wins: 7,
                losses: 7,
                draws: 0,
            });

            let summary = finalizer.finalize_season("2026-Q3", &rankers).await.unwrap();
            assert!(!summary.already_closed);
            assert_eq!(summary.champions.len(), 3);
            assert_eq!(summary.champions[0].player_id, "a");
            assert_eq!(summary.champions[0].trophy_type, TrophyType::SeasonGold);
            assert_eq!(summary.rank_ups.len(), 1);
            assert_eq!(summary.rank_ups[0].player_id, "a");
            assert_eq!(summary.iron_men[0].player_id, "a");
            assert_eq!(summary.aces.len(), 1);
            assert_eq!(summary.aces[0].player_id, "b");
            assert_eq!(notifier.sent().len(), 6);

            let season = store.get_season("2026-Q3").await.unwrap().unwrap();
            assert_eq!(season.status, SeasonStatus::Closed);
            let gold = store.get_player("a").await.unwrap().unwrap();
            assert_eq!(gold.placement.championships, 1);

            let again = finalizer.finalize_season("2026-Q3", &rankers).await.unwrap();
            assert!(again.already_closed);
            assert!(again.champions.is_empty());
            assert_eq!(notifier.sent().len(), 6);
        }

        #[tokio::test]
        async fn test_finalize_resumes_without_duplicates() {
            let rankers = vec![ranker("a", 1450, 14, 4.0), ranker("b", 1280, 12, 4.0)];
            let (store, notifier, finalizer) = setup(&rankers).await;
            let at = Utc.with_ymd_and_hms(2026, 10, 1, 8, 0, 0).unwrap();

            // A previous run got as far as the champion trophies.
            store
                .transition_season("2026-Q3", SeasonStatus::Open, SeasonStatus::Finalizing, at)
                .await
                .unwrap();
            store
                .commit_trophies(&[build_trophy("2026-Q3", "a", TrophyType::SeasonGold, 1, at)])
                .await
                .unwrap();

            let summary = finalizer.finalize_season("2026-Q3", &rankers).await.unwrap();
            assert!(summary.resumed);
            assert!(!summary.champions[0].created);
            assert!(summary.champions[1].created);
            let resent_gold = notifier.sent().into_iter().any(|n| {
                matches!(
                    n,
                    Notification::TrophyAwarded {
                        trophy_type: TrophyType::SeasonGold,
                        ..
                    }
                )
            });
            assert!(!resent_gold);
            let a = store.get_player("a").await.unwrap().unwrap();
            assert_eq!(a.placement.championships, 1);
        }
    }

    #[test]
    fn test_validate_rankers() {
        assert!(validate_rankers(&[ranker("a", 1, 1, 1.0), ranker("a", 1, 1, 1.0)]).is_err());
        assert!(validate_rankers(&[ranker("a", 1, 1, f64::NAN)]).is_err());
        assert!(validate_rankers(&[ranker("a", 1, 1, 1.0)]).is_ok());
    }
}
