// Achievement catalog and badge awarding.
//
// Each achievement has four independently evaluated tiers. A badge is
// written at most once per (player, badge id); only badges this call
// actually inserted are reported and notified.

use std::collections::HashSet;
use std::sync::Arc;

use lazy_static::lazy_static;
use serde::Serialize;

use crate::calendar::Clock;
use crate::error::{EngineError, Result};
use crate::metrics;
use crate::model::{Badge, BadgeTier};
use crate::notify::{self, Notification, Notifier};
use crate::stats::{PlayerStats, StatsCollector};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Competition,
    Consistency,
    Streak,
    Skill,
    Seasonal,
    Format,
}

/// Unlock condition for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Wins { value: u32 },
    Participations { value: u32 },
    RunnerUps { value: u32 },
    ConsecutiveWins { value: u32 },
    WinRate { rate: f64, min_participations: u32 },
    WinsInCurrentSeason { value: u32 },
    SinglesWins { value: u32 },
    DoublesWins { value: u32 },
    TournamentWins { value: u32 },
    LeagueWins { value: u32 },
}

impl Condition {
    pub fn qualifies(&self, stats: &PlayerStats) -> bool {
        match *self {
            Self::Wins { value } => stats.wins >= value,
            Self::Participations { value } => stats.participations >= value,
            Self::RunnerUps { value } => stats.runner_ups >= value,
            Self::ConsecutiveWins { value } => stats.consecutive_wins >= value,
            Self::WinRate {
                rate,
                min_participations,
            } => stats.participations >= min_participations && stats.win_rate >= rate,
            Self::WinsInCurrentSeason { value } => stats.wins_in_current_season >= value,
            Self::SinglesWins { value } => stats.singles_wins >= value,
            Self::DoublesWins { value } => stats.doubles_wins >= value,
            Self::TournamentWins { value } => stats.tournament_wins >= value,
            Self::LeagueWins { value } => stats.league_wins >= value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TierRule {
    pub tier: BadgeTier,
    pub condition: Condition,
    pub points: u32,
    pub icon: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Achievement {
    pub key: &'static str,
    pub name: &'static str,
    pub category: Category,
    pub tiers: Vec<TierRule>,
}

// Points per tier, bronze to platinum.
const STANDARD_POINTS: [u32; 4] = [10, 25, 50, 100];

fn ladder(values: [u32; 4], make: fn(u32) -> Condition, icon: &'static str) -> Vec<TierRule> {
    BadgeTier::ALL
        .into_iter()
        .zip(values)
        .zip(STANDARD_POINTS)
        .map(|((tier, value), points)| TierRule {
            tier,
            condition: make(value),
            points,
            icon,
        })
        .collect()
}

fn build_catalog() -> Vec<Achievement> {
    vec![
        Achievement {
            key: "champion",
            name: "Champion",
            category: Category::Competition,
            tiers: ladder([1, 5, 10, 25], |value| Condition::Wins { value }, "trophy"),
        },
        Achievement {
            key: "regular",
            name: "Regular",
            category: Category::Consistency,
            tiers: ladder(
                [5, 20, 50, 100],
                |value| Condition::Participations { value },
                "calendar",
            ),
        },
        Achievement {
            key: "runner_up",
            name: "So Close",
            category: Category::Competition,
            tiers: ladder([1, 5, 10, 20], |value| Condition::RunnerUps { value }, "medal"),
        },
        Achievement {
            key: "hot_streak",
            name: "Hot Streak",
            category: Category::Streak,
            tiers: ladder(
                [3, 5, 10, 20],
                |value| Condition::ConsecutiveWins { value },
                "flame",
            ),
        },
        Achievement {
            key: "sharpshooter",
            name: "Sharpshooter",
            category: Category::Skill,
            tiers: [(0.3, 10), (0.4, 20), (0.5, 30), (0.6, 50)]
                .into_iter()
                .zip(BadgeTier::ALL)
                .zip(STANDARD_POINTS)
                .map(|(((rate, min_participations), tier), points)| TierRule {
                    tier,
                    condition: Condition::WinRate {
                        rate,
                        min_participations,
                    },
                    points,
                    icon: "target",
                })
                .collect(),
        },
        Achievement {
            key: "season_dominator",
            name: "Season Dominator",
            category: Category::Seasonal,
            tiers: ladder(
                [1, 2, 3, 5],
                |value| Condition::WinsInCurrentSeason { value },
                "sun",
            ),
        },
        Achievement {
            key: "singles_specialist",
            name: "Singles Specialist",
            category: Category::Format,
            tiers: ladder([1, 3, 5, 10], |value| Condition::SinglesWins { value }, "racket"),
        },
        Achievement {
            key: "doubles_specialist",
            name: "Doubles Specialist",
            category: Category::Format,
            tiers: ladder(
                [1, 3, 5, 10],
                |value| Condition::DoublesWins { value },
                "rackets",
            ),
        },
        Achievement {
            key: "tournament_victor",
            name: "Tournament Victor",
            category: Category::Competition,
            tiers: ladder(
                [1, 3, 5, 10],
                |value| Condition::TournamentWins { value },
                "crown",
            ),
        },
        Achievement {
            key: "league_master",
            name: "League Master",
            category: Category::Competition,
            tiers: ladder([1, 3, 5, 10], |value| Condition::LeagueWins { value }, "shield"),
        },
    ]
}

lazy_static! {
    static ref CATALOG: Vec<Achievement> = build_catalog();
}

pub fn catalog() -> &'static [Achievement] {
    &CATALOG
}

/// Every (achievement, tier) the stats satisfy, lower tiers not required.
pub fn qualifying_tiers(stats: &PlayerStats) -> Vec<(&'static Achievement, &'static TierRule)> {
    catalog()
        .iter()
        .flat_map(|a| a.tiers.iter().map(move |t| (a, t)))
        .filter(|(_, t)| t.condition.qualifies(stats))
        .collect()
}

#[derive(Clone)]
pub struct AchievementEngine {
    store: Arc<dyn Store>,
    stats: StatsCollector,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl AchievementEngine {
    pub fn new(
        store: Arc<dyn Store>,
        stats: StatsCollector,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            stats,
            notifier,
            clock,
        }
    }

    /// Evaluate the catalog for a player and award missing badges.
    /// Returns the ids of badges created by this call.
    pub async fn check_and_award_achievements(
        &self,
        player_id: &str,
        context_ids: &[String],
    ) -> Result<Vec<String>> {
        if self.store.get_player(player_id).await?.is_none() {
            return Err(EngineError::NotFound(format!("player {player_id}")));
        }

        let stats = self.stats.collect(player_id, context_ids).await?;
        let existing: HashSet<String> = self
            .store
            .badges_for_player(player_id)
            .await?
            .into_iter()
            .map(|b| b.id)
            .collect();

        let now = self.clock.now();
        let mut awarded = Vec::new();
        let mut notifications = Vec::new();

        for (achievement, rule) in qualifying_tiers(&stats) {
            let badge_id = Badge::id_for(achievement.key, rule.tier);
            if existing.contains(&badge_id) {
                continue;
            }
            let badge = Badge {
                id: badge_id,
                player_id: player_id.to_string(),
                achievement_id: achievement.key.to_string(),
                tier: rule.tier,
                points: rule.points,
                unlocked_at: now,
            };
            // A concurrent caller may have inserted it since we looked.
            if !self.store.insert_badge_if_absent(&badge).await? {
                continue;
            }

            metrics::BADGES_AWARDED_TOTAL
                .with_label_values(&[rule.tier.as_str()])
                .inc();
            notifications.push(Notification::BadgeUnlocked {
                player_id: badge.player_id.clone(),
                badge_id: badge.id.clone(),
                achievement_id: badge.achievement_id.clone(),
                tier: badge.tier,
            });
            awarded.push(badge.id);
        }

        notify::dispatch(self.notifier.as_ref(), &notifications).await;
        if !awarded.is_empty() {
            tracing::info!(player_id, count = awarded.len(), "Badges awarded: {awarded:?}");
        }
        Ok(awarded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> PlayerStats {
        PlayerStats::default()
    }

    #[test]
    fn test_catalog_shape() {
        let keys: HashSet<&str> = catalog().iter().map(|a| a.key).collect();
        assert_eq!(keys.len(), catalog().len());
        for achievement in catalog() {
            let tiers: Vec<BadgeTier> = achievement.tiers.iter().map(|t| t.tier).collect();
            assert_eq!(tiers, BadgeTier::ALL.to_vec());
        }
    }

    #[test]
    fn test_conditions() {
        let s = PlayerStats {
            wins: 5,
            participations: 12,
            win_rate: 5.0 / 12.0,
            consecutive_wins: 3,
            ..stats()
        };
        assert!(Condition::Wins { value: 5 }.qualifies(&s));
        assert!(!Condition::Wins { value: 6 }.qualifies(&s));
        assert!(Condition::ConsecutiveWins { value: 3 }.qualifies(&s));
        assert!(Condition::WinRate { rate: 0.4, min_participations: 10 }.qualifies(&s));
        assert!(!Condition::WinRate { rate: 0.4, min_participations: 20 }.qualifies(&s));
        assert!(!Condition::WinRate { rate: 0.5, min_participations: 10 }.qualifies(&s));
        assert!(!Condition::LeagueWins { value: 1 }.qualifies(&s));
    }

    #[test]
    fn test_tiers_are_independent() {
        // Perfect record but too few entries for any sharpshooter tier.
        let s = PlayerStats {
            wins: 5,
            participations: 5,
            win_rate: 1.0,
            ..stats()
        };
        let ids: Vec<String> = qualifying_tiers(&s)
            .into_iter()
            .map(|(a, t)| Badge::id_for(a.key, t.tier))
            .collect();
        assert!(ids.contains(&"champion_bronze".to_string()));
        assert!(ids.contains(&"champion_silver".to_string()));
        assert!(ids.contains(&"regular_bronze".to_string()));
        assert!(!ids.iter().any(|id| id.starts_with("sharpshooter")));
    }

    #[test]
    fn test_nothing_qualifies_for_new_player() {
        assert!(qualifying_tiers(&stats()).is_empty());
    }
}
