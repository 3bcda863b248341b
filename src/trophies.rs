// Placement trophies for finished competitions.
//
// Trophy ids are deterministic, so awarding twice is a no-op. Placement
// counters move only for trophies the store actually inserted. The store
// rejects a podium place already held by someone else.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::calendar::{season_label, Clock};
use crate::competition::{Competition, Placement};
use crate::error::{EngineError, Result};
use crate::metrics;
use crate::model::{PlayerId, Trophy, TrophyType};
use crate::notify::{self, Notification, Notifier};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AwardedTrophy {
    pub player_id: PlayerId,
    pub trophy_id: String,
    pub rank: u32,
    /// False when the trophy already existed.
    pub created: bool,
}

pub fn build_trophy(
    competition_id: &str,
    player_id: &str,
    trophy_type: TrophyType,
    rank: u32,
    at: DateTime<Utc>,
) -> Trophy {
    Trophy {
        id: Trophy::id_for(competition_id, player_id, trophy_type),
        competition_id: competition_id.to_string(),
        player_id: player_id.to_string(),
        trophy_type,
        rank,
        season: season_label(at),
        awarded_at: at,
    }
}

/// Commit a trophy batch and notify for the ones that were new.
pub async fn commit_and_notify(
    store: &dyn Store,
    notifier: &dyn Notifier,
    trophies: &[Trophy],
) -> Result<Vec<Trophy>> {
    if trophies.is_empty() {
        return Ok(Vec::new());
    }
    let inserted = store.commit_trophies(trophies).await?;

    let notifications: Vec<Notification> = inserted
        .iter()
        .map(|t| {
            metrics::TROPHIES_AWARDED_TOTAL
                .with_label_values(&[t.trophy_type.as_str()])
                .inc();
            Notification::TrophyAwarded {
                player_id: t.player_id.clone(),
                trophy_id: t.id.clone(),
                competition_id: t.competition_id.clone(),
                trophy_type: t.trophy_type,
                rank: t.rank,
            }
        })
        .collect();
    notify::dispatch(notifier, &notifications).await;
    Ok(inserted)
}

/// The single rank-1 and rank-2 entries. Anything else is rejected.
fn podium(rankings: &[Placement]) -> Result<(&Placement, &Placement)> {
    let winner = single_rank(rankings, 1, "winner")?;
    let runner_up = single_rank(rankings, 2, "runner-up")?;
    if winner.player_id == runner_up.player_id {
        return Err(EngineError::Validation(format!(
            "player {} cannot hold both podium places",
            winner.player_id
        )));
    }
    Ok((winner, runner_up))
}

fn single_rank<'a>(rankings: &'a [Placement], rank: u32, label: &str) -> Result<&'a Placement> {
    let mut found = rankings.iter().filter(|p| p.rank == rank);
    match (found.next(), found.next()) {
        (Some(p), None) => Ok(p),
        (None, _) => Err(EngineError::Validation(format!("no {label} (rank {rank})"))),
        (Some(_), Some(_)) => Err(EngineError::Validation(format!(
            "more than one {label} (rank {rank})"
        ))),
    }
}

#[derive(Clone)]
pub struct TrophyAwarder {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl TrophyAwarder {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            notifier,
            clock,
        }
    }

    pub async fn award_placement_trophies(
        &self,
        rankings: &[Placement],
        competition: &Competition,
    ) -> Result<Vec<AwardedTrophy>> {
        let (winner, runner_up) = podium(rankings)?;
        if !competition.participants.is_empty() {
            for p in [winner, runner_up] {
                if !competition.participants.contains(&p.player_id) {
                    return Err(EngineError::Validation(format!(
                        "player {} did not enter {}",
                        p.player_id, competition.id
                    )));
                }
            }
        }

        let now = self.clock.now();
        let batch = vec![
            build_trophy(&competition.id, &winner.player_id, TrophyType::Winner, 1, now),
            build_trophy(&competition.id, &runner_up.player_id, TrophyType::RunnerUp, 2, now),
        ];
        let inserted =
            commit_and_notify(self.store.as_ref(), self.notifier.as_ref(), &batch).await?;

        let awarded: Vec<AwardedTrophy> = batch
            .iter()
            .map(|t| AwardedTrophy {
                player_id: t.player_id.clone(),
                trophy_id: t.id.clone(),
                rank: t.rank,
                created: inserted.iter().any(|i| i.id == t.id),
            })
            .collect();
        tracing::info!(
            competition_id = %competition.id,
            created = inserted.len(),
            "Placement trophies awarded"
        );
        Ok(awarded)
    }
}
