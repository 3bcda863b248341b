// Bounded per-player match history and the streak analytics built on it.
//
// Each (player, scope) log keeps at most `cap` rows, newest first. Streaks
// longer than the cap are undercounted.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::competition::CompetitionKind;
use crate::elo::Outcome;
use crate::error::Result;
use crate::model::{HistoryEntry, MatchRecord, MatchType, PlayerId, RatingContext, SideId};
use crate::store::Store;

pub const DEFAULT_HISTORY_CAP: usize = 100;

/// Optional restriction applied while scanning a log. Rows that do not
/// match are skipped and never break a streak.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFilter {
    #[serde(default)]
    pub match_type: Option<MatchType>,
    #[serde(default)]
    pub competition: Option<CompetitionKind>,
}

impl HistoryFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn matches(&self, entry: &HistoryEntry) -> bool {
        self.match_type.map_or(true, |t| t == entry.match_type)
            && self.competition.map_or(true, |c| c == entry.competition)
    }
}

/// Count leading wins in a newest-first log, stopping at the first
/// matching non-win.
pub fn leading_wins(entries: &[HistoryEntry], filter: &HistoryFilter) -> u32 {
    let mut streak = 0;
    for entry in entries.iter().filter(|e| filter.matches(e)) {
        if entry.result != Outcome::Win {
            break;
        }
        streak += 1;
    }
    streak
}

/// Insert into a newest-first log and evict everything past `cap`.
/// A row with the same timestamp as existing rows is treated as newer.
pub fn insert_capped(log: &mut Vec<HistoryEntry>, entry: HistoryEntry, cap: usize) {
    let pos = log
        .iter()
        .position(|e| e.played_at <= entry.played_at)
        .unwrap_or(log.len());
    log.insert(pos, entry);
    log.truncate(cap.max(1));
}

/// One history row per participant, scoped to the match's rating context.
pub fn entries_for_match(record: &MatchRecord) -> Vec<HistoryEntry> {
    let mut entries = Vec::with_capacity(4);
    for side in SideId::BOTH {
        let result = record.outcome_for(side);
        let opponents: Vec<PlayerId> = record.side(side.opposite()).players().cloned().collect();
        for player in record.side(side).players() {
            entries.push(HistoryEntry {
                player_id: player.clone(),
                scope: record.context.clone(),
                match_id: record.id.clone(),
                match_type: record.match_type,
                competition: record.competition,
                result,
                opponent_ids: opponents.clone(),
                played_at: record.played_at,
            });
        }
    }
    entries
}

/// Store-backed history log.
#[derive(Clone)]
pub struct MatchHistory {
    store: Arc<dyn Store>,
    cap: usize,
}

impl MatchHistory {
    pub fn new(store: Arc<dyn Store>, cap: usize) -> Self {
        Self {
            store,
            cap: cap.max(1),
        }
    }

    pub async fn recent(
        &self,
        player_id: &str,
        scope: &RatingContext,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        self.store
            .recent_history(player_id, scope, limit.min(self.cap))
            .await
    }

    pub async fn consecutive_wins(
        &self,
        player_id: &str,
        scope: &RatingContext,
        filter: &HistoryFilter,
    ) -> Result<u32> {
        let log = self.store.recent_history(player_id, scope, self.cap).await?;
        Ok(leading_wins(&log, filter))
    }
}
