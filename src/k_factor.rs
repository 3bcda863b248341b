// K-factor policy: how far a single match may move a rating.
//
// One interface, several table-driven strategies. Callers pick the strategy
// for the competition a match belongs to.

use serde::{Deserialize, Serialize};

use crate::competition::CompetitionKind;
use crate::model::RatingContext;

// Global public thresholds
const PUBLIC_PROVISIONAL_MATCHES: u32 = 10;
const K_PUBLIC_PROVISIONAL: i32 = 32;
const K_PUBLIC_ESTABLISHED: i32 = 16;

const K_CLUB_LEAGUE: i32 = 16;
const K_CLUB_TOURNAMENT: i32 = 24;

// Unified policy tiers
const UNIFIED_AVERAGE_MATCHES: u32 = 30;
const UNIFIED_EXPERIENCED_MATCHES: u32 = 100;
const UNIFIED_EXPERT_MATCHES: u32 = 500;
const UNIFIED_EXPERT_RATING: i32 = 2000;

/// A player's experience as seen by the K-factor policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Experience {
    pub matches_played: u32,
    pub rating: i32,
}

impl Experience {
    pub fn new(matches_played: u32, rating: i32) -> Self {
        Self {
            matches_played,
            rating,
        }
    }
}

/// Which table is authoritative for a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KPolicyMode {
    /// Choose the strategy from the match's competition kind.
    #[default]
    PerCompetition,
    /// Use the unified experience ladder for every match.
    Unified,
}

impl KPolicyMode {
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "per_competition" => Some(Self::PerCompetition),
            "unified" => Some(Self::Unified),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KFactorPolicy {
    /// Public matches: provisional players move fast, then settle.
    GlobalPublic,
    /// Club league play: flat K.
    ClubLeague,
    /// Club tournaments: higher stakes, higher K than league play.
    ClubTournament,
    /// Experience ladder, halved in club contexts.
    Unified,
}

impl KFactorPolicy {
    /// Strategy for a match of the given competition kind.
    pub fn for_competition(mode: KPolicyMode, kind: CompetitionKind) -> Self {
        match mode {
            KPolicyMode::Unified => Self::Unified,
            KPolicyMode::PerCompetition => match kind {
                CompetitionKind::Public => Self::GlobalPublic,
                CompetitionKind::League => Self::ClubLeague,
                CompetitionKind::Tournament => Self::ClubTournament,
            },
        }
    }

    pub fn k_factor(&self, context: &RatingContext, experience: Experience) -> i32 {
        match self {
            Self::GlobalPublic => {
                if experience.matches_played < PUBLIC_PROVISIONAL_MATCHES {
                    K_PUBLIC_PROVISIONAL
                } else {
                    K_PUBLIC_ESTABLISHED
                }
            }
            Self::ClubLeague => K_CLUB_LEAGUE,
            Self::ClubTournament => K_CLUB_TOURNAMENT,
            Self::Unified => {
                let base = unified_base(experience);
                if context.is_club() {
                    base / 2
                } else {
                    base
                }
            }
        }
    }
}

fn unified_base(experience: Experience) -> i32 {
    if experience.matches_played >= UNIFIED_EXPERT_MATCHES
        || experience.rating >= UNIFIED_EXPERT_RATING
    {
        8
    } else if experience.matches_played >= UNIFIED_EXPERIENCED_MATCHES {
        16
    } else if experience.matches_played >= UNIFIED_AVERAGE_MATCHES {
        24
    } else {
        32
    }
}
