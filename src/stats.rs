// Aggregated player statistics that achievement rules are evaluated against.
//
// Built with a fixed number of batched store reads: trophies and
// participations together, one batched competition lookup for the
// trophies, then one history read per rating scope.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::future::try_join_all;
use serde::Serialize;

use crate::calendar::{season_label, Clock};
use crate::competition::{Competition, CompetitionKind};
use crate::error::Result;
use crate::history::{HistoryFilter, MatchHistory};
use crate::model::{RatingContext, Trophy, TrophyType};
use crate::store::Store;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlayerStats {
    /// Competitions won.
    pub wins: u32,
    /// Competitions entered.
    pub participations: u32,
    pub runner_ups: u32,
    /// Best current streak across the scopes considered.
    pub consecutive_wins: u32,
    /// `wins / participations`, 0 with no participations.
    pub win_rate: f64,
    pub wins_in_current_season: u32,
    pub singles_wins: u32,
    pub doubles_wins: u32,
    pub tournament_wins: u32,
    pub league_wins: u32,
}

impl PlayerStats {
    /// Fold competition trophies into the counters. Trophies whose
    /// competition is unknown only count when no club scope is requested.
    pub fn from_trophies(
        trophies: &[Trophy],
        competitions: &HashMap<String, Competition>,
        participations: u32,
        context_ids: &[String],
        current_season: &str,
    ) -> Self {
        let mut stats = PlayerStats {
            participations,
            ..Self::default()
        };

        for trophy in trophies {
            let competition = competitions.get(&trophy.competition_id);
            let in_scope = match competition {
                Some(c) => c.in_scope(context_ids),
                None => context_ids.is_empty(),
            };
            if !in_scope {
                continue;
            }

            match trophy.trophy_type {
                TrophyType::Winner => {
                    stats.wins += 1;
                    if trophy.season == current_season {
                        stats.wins_in_current_season += 1;
                    }
                    if let Some(c) = competition {
                        if c.match_type.is_team() {
                            stats.doubles_wins += 1;
                        } else {
                            stats.singles_wins += 1;
                        }
                        match c.kind {
                            CompetitionKind::Tournament => stats.tournament_wins += 1,
                            CompetitionKind::League => stats.league_wins += 1,
                            CompetitionKind::Public => {}
                        }
                    }
                }
                TrophyType::RunnerUp => stats.runner_ups += 1,
                _ => {}
            }
        }

        stats.win_rate = if participations == 0 {
            0.0
        } else {
            stats.wins as f64 / participations as f64
        };
        stats
    }
}

#[derive(Clone)]
pub struct StatsCollector {
    store: Arc<dyn Store>,
    history: MatchHistory,
    clock: Arc<dyn Clock>,
}

impl StatsCollector {
    pub fn new(store: Arc<dyn Store>, history: MatchHistory, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            history,
            clock,
        }
    }

    /// Snapshot for `player_id`. A non-empty `context_ids` restricts
    /// competition-derived stats and streak scopes to those clubs.
    pub async fn collect(&self, player_id: &str, context_ids: &[String]) -> Result<PlayerStats> {
        let (trophies, entered) = futures::try_join!(
            self.store.trophies_for_player(player_id),
            self.store.competitions_for_player(player_id)
        )?;

        let trophy_competitions: Vec<String> = trophies
            .iter()
            .filter(|t| matches!(t.trophy_type, TrophyType::Winner | TrophyType::RunnerUp))
            .map(|t| t.competition_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let competitions: HashMap<String, Competition> = self
            .store
            .get_competitions(&trophy_competitions)
            .await?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        let participations = entered.iter().filter(|c| c.in_scope(context_ids)).count() as u32;
        let current_season = season_label(self.clock.now());
        let mut stats = PlayerStats::from_trophies(
            &trophies,
            &competitions,
            participations,
            context_ids,
            &current_season,
        );

        let scopes = streak_scopes(&entered, context_ids);
        let filter = HistoryFilter::any();
        let streaks = try_join_all(
            scopes
                .iter()
                .map(|scope| self.history.consecutive_wins(player_id, scope, &filter)),
        )
        .await?;
        stats.consecutive_wins = streaks.into_iter().max().unwrap_or(0);

        Ok(stats)
    }
}

/// Global scope plus the requested clubs, or every club the player has
/// competed in when none are requested.
fn streak_scopes(entered: &[Competition], context_ids: &[String]) -> Vec<RatingContext> {
    let clubs: BTreeSet<&str> = if context_ids.is_empty() {
        entered.iter().filter_map(|c| c.club_id.as_deref()).collect()
    } else {
        context_ids.iter().map(String::as_str).collect()
    };
    std::iter::once(RatingContext::Global)
        .chain(clubs.into_iter().map(|c| RatingContext::Club(c.to_string())))
        .collect()
}
