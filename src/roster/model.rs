use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub auction_id: i64,
    pub user_id: String,
    pub joined_at: DateTime<Utc>,
}

/// Result of the atomic admission check-and-insert.
#[derive(Debug, Clone)]
pub enum JoinOutcome {
    Joined(Participant),
    /// The user was already on the roster; nothing was written.
    AlreadyJoined(Participant),
    Full,
    /// Bidding has already closed.
    Closed,
    AuctionMissing,
}

/// What callers of `join` see; both variants are successes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum Admission {
    Joined { participant: Participant },
    AlreadyJoined { participant: Participant },
}

impl Admission {
    pub fn participant(&self) -> &Participant {
        match self {
            Admission::Joined { participant } | Admission::AlreadyJoined { participant } => {
                participant
            }
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Admission::Joined { .. })
    }
}
