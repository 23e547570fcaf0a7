use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::cmp::Ordering;

/// A ledger entry; immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    pub id: i64,
    pub auction_id: i64,
    pub bidder_id: String,
    pub bidder_display_name: String,
    pub amount: i64,
    pub placed_at: DateTime<Utc>,
}

impl Bid {
    /// Ledger order: higher amount first, earlier bid first on ties.
    pub fn rank(a: &Bid, b: &Bid) -> Ordering {
        b.amount
            .cmp(&a.amount)
            .then_with(|| a.placed_at.cmp(&b.placed_at))
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Bid awaiting append; the timestamp is assigned by the server.
#[derive(Debug, Clone)]
pub struct NewBid {
    pub auction_id: i64,
    pub bidder_id: String,
    pub bidder_display_name: String,
    pub amount: i64,
    pub placed_at: DateTime<Utc>,
}

/// Bid request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceBidCommand {
    pub amount: i64,
}

/// Result of the atomic read-validate-append.
#[derive(Debug, Clone)]
pub enum BidAppend {
    Appended(Bid),
    /// Another bid reached `current` first.
    Outbid { current: i64 },
    /// The bid arrived outside the bidding window.
    Closed,
    AuctionMissing,
}
