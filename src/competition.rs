// Competition kinds and the metadata trophy awarding needs.

use serde::{Deserialize, Serialize};

use crate::model::{MatchType, PlayerId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompetitionKind {
    /// Open matches outside any club competition.
    #[default]
    Public,
    League,
    Tournament,
}

impl CompetitionKind {
    /// Parse a kind string (from DB) into a CompetitionKind.
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Self::Public),
            "league" => Some(Self::League),
            "tournament" => Some(Self::Tournament),
            _ => None,
        }
    }

    /// Serialize to a DB-storable string.
    pub fn to_str_name(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::League => "league",
            Self::Tournament => "tournament",
        }
    }

    /// League and tournament play only exist inside a club.
    pub fn requires_club(&self) -> bool {
        !matches!(self, Self::Public)
    }
}

/// A finished (or running) club competition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Competition {
    pub id: String,
    pub name: String,
    pub kind: CompetitionKind,
    #[serde(default)]
    pub club_id: Option<String>,
    pub match_type: MatchType,
    #[serde(default)]
    pub participants: Vec<PlayerId>,
}

impl Competition {
    /// Whether this competition falls inside the requested club scope.
    /// An empty scope means every club.
    pub fn in_scope(&self, club_ids: &[String]) -> bool {
        if club_ids.is_empty() {
            return true;
        }
        match &self.club_id {
            Some(club) => club_ids.iter().any(|c| c == club),
            None => club_ids.iter().any(|c| c == &self.id),
        }
    }
}

/// Final placement of one player, as reported by the competition organiser.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Placement {
    pub player_id: PlayerId,
    pub rank: u32,
}
