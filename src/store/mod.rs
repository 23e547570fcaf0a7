//! Datastore seam.
//!
//! Every precondition-check-then-mutate sequence of the coordinator is a
//! single `Store` call, and each implementation runs it atomically: row locks
//! and conditional writes in Postgres, one critical section in memory.

// region:    --- Imports
use crate::auction::model::{Auction, AuctionDraft, AuctionStatus};
use crate::bidding::model::{Bid, BidAppend, NewBid};
use crate::config::{CONFLICT_RETRY_BASE_DELAY_MS, MAX_CONFLICT_RETRIES};
use crate::error::{CoreError, CoreResult, StoreError};
use crate::notification::model::Notification;
use crate::roster::model::{JoinOutcome, Participant};
use crate::settlement::PenaltyRecord;
use crate::user::{Identity, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::warn;
// endregion: --- Imports

// region:    --- Modules
pub mod memory;
pub mod postgres;
mod queries;

pub use memory::{MemoryFailure, MemoryStore};
pub use postgres::PostgresStore;
// endregion: --- Modules

// region:    --- Store Trait

/// Which auctions a listing covers; results are newest first.
#[derive(Debug, Clone)]
pub enum AuctionQuery {
    All,
    OwnedBy(String),
    JoinedBy(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    // -- Users
    async fn upsert_user(&self, identity: &Identity) -> Result<User, StoreError>;
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError>;

    // -- Auctions
    async fn insert_auction(
        &self,
        draft: &AuctionDraft,
        status: AuctionStatus,
        created_at: DateTime<Utc>,
    ) -> Result<Auction, StoreError>;
    async fn get_auction(&self, auction_id: i64) -> Result<Option<Auction>, StoreError>;
    /// Writes `draft` only if the auction is still scheduled and its current
    /// start time is after `now`. `None` when the condition failed.
    async fn update_scheduled_auction(
        &self,
        auction_id: i64,
        draft: &AuctionDraft,
        now: DateTime<Utc>,
    ) -> Result<Option<Auction>, StoreError>;
    /// Removes the auction with its bids and participants.
    async fn delete_auction(&self, auction_id: i64) -> Result<bool, StoreError>;
    /// Compare-and-set on the status projection; true only for the caller
    /// whose write moved it.
    async fn transition_status(
        &self,
        auction_id: i64,
        from: AuctionStatus,
        to: AuctionStatus,
    ) -> Result<bool, StoreError>;
    /// Sets payment to approved while `now` is within the payment window.
    /// `None` when the auction is missing or the window has closed.
    async fn approve_payment(
        &self,
        auction_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<Auction>, StoreError>;
    async fn list_auctions(&self, query: &AuctionQuery) -> Result<Vec<Auction>, StoreError>;
    /// Auctions whose stored status lags behind the clock.
    async fn auctions_needing_transition(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Auction>, StoreError>;
    /// Ended auctions whose end announcement has not been recorded.
    async fn auctions_awaiting_announcement(&self) -> Result<Vec<Auction>, StoreError>;
    async fn mark_end_announced(&self, auction_id: i64) -> Result<bool, StoreError>;
    /// Ended, unpaid, past the deadline and not yet settled.
    async fn auctions_awaiting_settlement(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Auction>, StoreError>;
    /// Records the penalty marker at most once per auction, banning `winner`
    /// until `until` in the same transaction when no ban is in force at `now`.
    /// Later calls return the stored marker untouched.
    async fn apply_penalty(
        &self,
        auction_id: i64,
        winner_id: Option<&str>,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<PenaltyRecord, StoreError>;
    async fn mark_settled(&self, auction_id: i64, now: DateTime<Utc>) -> Result<bool, StoreError>;

    // -- Bids
    /// Locks the auction, re-reads the highest bid and appends only if
    /// `bid.amount` still beats it inside the bidding window.
    async fn append_bid_if_highest(&self, bid: &NewBid) -> Result<BidAppend, StoreError>;
    async fn highest_bid(&self, auction_id: i64) -> Result<Option<Bid>, StoreError>;
    /// Ordered by amount desc, placed_at asc.
    async fn list_bids(&self, auction_id: i64) -> Result<Vec<Bid>, StoreError>;

    // -- Participants
    /// Capacity check and insert in one transaction.
    async fn insert_participant(
        &self,
        auction_id: i64,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<JoinOutcome, StoreError>;
    async fn list_participants(&self, auction_id: i64) -> Result<Vec<Participant>, StoreError>;

    // -- Notifications
    /// Conditional create; false when the id already exists.
    async fn insert_notification_if_absent(
        &self,
        notification: &Notification,
    ) -> Result<bool, StoreError>;
    async fn get_notification(&self, id: &str) -> Result<Option<Notification>, StoreError>;
    /// Newest first.
    async fn list_notifications(&self, recipient_id: &str)
        -> Result<Vec<Notification>, StoreError>;
    /// `None` if absent, otherwise whether this call flipped it.
    async fn mark_notification_read(&self, id: &str) -> Result<Option<bool>, StoreError>;
    async fn mark_all_notifications_read(&self, recipient_id: &str) -> Result<u64, StoreError>;
}

// endregion: --- Store Trait

// region:    --- Conflict Retry

/// Runs `op`, retrying serialization conflicts with exponential backoff.
/// Any other failure is returned immediately.
pub async fn retry_on_conflict<T, F, Fut>(label: &str, mut op: F) -> CoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(StoreError::Conflict(reason)) if attempt < MAX_CONFLICT_RETRIES => {
                let delay = CONFLICT_RETRY_BASE_DELAY_MS << (attempt - 1);
                warn!(
                    "{:<12} --> {} conflicted ({}), retry {}/{} in {}ms",
                    "Store", label, reason, attempt, MAX_CONFLICT_RETRIES, delay
                );
                sleep(Duration::from_millis(delay)).await;
            }
            Err(StoreError::Conflict(_)) => {
                return Err(CoreError::ConcurrencyConflict(MAX_CONFLICT_RETRIES))
            }
            Err(err) => return Err(err.into()),
        }
    }
}

// endregion: --- Conflict Retry
