// region:    --- Imports
use super::queries;
use super::{AuctionQuery, Store};
use crate::auction::model::{Auction, AuctionDraft, AuctionStatus, PaymentStatus};
use crate::bidding::model::{Bid, BidAppend, NewBid};
use crate::database::DatabaseManager;
use crate::error::StoreError;
use crate::notification::model::{Notification, NotificationType};
use crate::roster::model::{JoinOutcome, Participant};
use crate::settlement::PenaltyRecord;
use crate::user::{Identity, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::sync::Arc;
use tracing::debug;
// endregion: --- Imports

// region:    --- Rows

#[derive(FromRow)]
struct AuctionRow {
    id: i64,
    owner_id: String,
    name: String,
    product: String,
    category: String,
    description: String,
    image_urls: Vec<String>,
    starting_price: i64,
    step_price: i64,
    max_participants: i32,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    payment_deadline: DateTime<Utc>,
    status: String,
    payment_status: String,
    created_at: DateTime<Utc>,
    end_announced: bool,
    penalty_applied_at: Option<DateTime<Utc>>,
    penalized_user_id: Option<String>,
    penalized_until: Option<DateTime<Utc>>,
    settled_at: Option<DateTime<Utc>>,
}

impl TryFrom<AuctionRow> for Auction {
    type Error = StoreError;

    fn try_from(row: AuctionRow) -> Result<Self, Self::Error> {
        let status = AuctionStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Backend(format!("unknown auction status {}", row.status)))?;
        let payment_status = PaymentStatus::parse(&row.payment_status).ok_or_else(|| {
            StoreError::Backend(format!("unknown payment status {}", row.payment_status))
        })?;
        Ok(Auction {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            product: row.product,
            category: row.category,
            description: row.description,
            image_urls: row.image_urls,
            starting_price: row.starting_price,
            step_price: row.step_price,
            max_participants: row.max_participants,
            start_time: row.start_time,
            end_time: row.end_time,
            payment_deadline: row.payment_deadline,
            status,
            payment_status,
            created_at: row.created_at,
            end_announced: row.end_announced,
            penalty_applied_at: row.penalty_applied_at,
            penalized_user_id: row.penalized_user_id,
            penalized_until: row.penalized_until,
            settled_at: row.settled_at,
        })
    }
}

fn into_auctions(rows: Vec<AuctionRow>) -> Result<Vec<Auction>, StoreError> {
    rows.into_iter().map(Auction::try_from).collect()
}

#[derive(FromRow)]
struct NotificationRow {
    id: String,
    recipient_id: String,
    message: String,
    auction_id: i64,
    #[sqlx(rename = "type")]
    kind: String,
    participant_id: Option<String>,
    from_user_id: Option<String>,
    read: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = StoreError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let kind = NotificationType::parse(&row.kind)
            .ok_or_else(|| StoreError::Backend(format!("unknown notification type {}", row.kind)))?;
        Ok(Notification {
            id: row.id,
            recipient_id: row.recipient_id,
            message: row.message,
            auction_id: row.auction_id,
            kind,
            participant_id: row.participant_id,
            from_user_id: row.from_user_id,
            read: row.read,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct PenaltyRow {
    penalty_applied_at: Option<DateTime<Utc>>,
    penalized_user_id: Option<String>,
    penalized_until: Option<DateTime<Utc>>,
}

// endregion: --- Rows

// region:    --- Postgres Store

/// Store backed by Postgres; conditional sequences hold a row lock on the
/// auction for the length of the transaction.
pub struct PostgresStore {
    db_manager: Arc<DatabaseManager>,
}

impl PostgresStore {
    pub fn new(db_manager: Arc<DatabaseManager>) -> Self {
        Self { db_manager }
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn upsert_user(&self, identity: &Identity) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(queries::UPSERT_USER)
            .bind(&identity.user_id)
            .bind(&identity.display_name)
            .fetch_one(self.db_manager.pool())
            .await?;
        Ok(user)
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(queries::GET_USER)
            .bind(user_id)
            .fetch_optional(self.db_manager.pool())
            .await?;
        Ok(user)
    }

    async fn insert_auction(
        &self,
        draft: &AuctionDraft,
        status: AuctionStatus,
        created_at: DateTime<Utc>,
    ) -> Result<Auction, StoreError> {
        let row = sqlx::query_as::<_, AuctionRow>(queries::INSERT_AUCTION)
            .bind(&draft.owner_id)
            .bind(&draft.name)
            .bind(&draft.product)
            .bind(&draft.category)
            .bind(&draft.description)
            .bind(&draft.image_urls)
            .bind(draft.starting_price)
            .bind(draft.step_price)
            .bind(draft.max_participants)
            .bind(draft.schedule.start_time)
            .bind(draft.schedule.end_time)
            .bind(draft.schedule.payment_deadline)
            .bind(status.as_str())
            .bind(created_at)
            .fetch_one(self.db_manager.pool())
            .await?;
        row.try_into()
    }

    async fn get_auction(&self, auction_id: i64) -> Result<Option<Auction>, StoreError> {
        sqlx::query_as::<_, AuctionRow>(queries::GET_AUCTION)
            .bind(auction_id)
            .fetch_optional(self.db_manager.pool())
            .await?
            .map(Auction::try_from)
            .transpose()
    }

    async fn update_scheduled_auction(
        &self,
        auction_id: i64,
        draft: &AuctionDraft,
        now: DateTime<Utc>,
    ) -> Result<Option<Auction>, StoreError> {
        sqlx::query_as::<_, AuctionRow>(queries::UPDATE_SCHEDULED_AUCTION)
            .bind(auction_id)
            .bind(&draft.name)
            .bind(&draft.product)
            .bind(&draft.category)
            .bind(&draft.description)
            .bind(&draft.image_urls)
            .bind(draft.starting_price)
            .bind(draft.step_price)
            .bind(draft.max_participants)
            .bind(draft.schedule.start_time)
            .bind(draft.schedule.end_time)
            .bind(draft.schedule.payment_deadline)
            .bind(now)
            .fetch_optional(self.db_manager.pool())
            .await?
            .map(Auction::try_from)
            .transpose()
    }

    async fn delete_auction(&self, auction_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(queries::DELETE_AUCTION)
            .bind(auction_id)
            .execute(self.db_manager.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn transition_status(
        &self,
        auction_id: i64,
        from: AuctionStatus,
        to: AuctionStatus,
    ) -> Result<bool, StoreError> {
        if from >= to {
            return Ok(false);
        }
        let result = sqlx::query(queries::TRANSITION_STATUS)
            .bind(auction_id)
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(self.db_manager.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn approve_payment(
        &self,
        auction_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<Auction>, StoreError> {
        sqlx::query_as::<_, AuctionRow>(queries::APPROVE_PAYMENT)
            .bind(auction_id)
            .bind(now)
            .fetch_optional(self.db_manager.pool())
            .await?
            .map(Auction::try_from)
            .transpose()
    }

    async fn list_auctions(&self, query: &AuctionQuery) -> Result<Vec<Auction>, StoreError> {
        let rows = match query {
            AuctionQuery::All => {
                sqlx::query_as::<_, AuctionRow>(queries::LIST_AUCTIONS)
                    .fetch_all(self.db_manager.pool())
                    .await?
            }
            AuctionQuery::OwnedBy(owner_id) => {
                sqlx::query_as::<_, AuctionRow>(queries::LIST_AUCTIONS_BY_OWNER)
                    .bind(owner_id)
                    .fetch_all(self.db_manager.pool())
                    .await?
            }
            AuctionQuery::JoinedBy(user_id) => {
                sqlx::query_as::<_, AuctionRow>(queries::LIST_AUCTIONS_BY_PARTICIPANT)
                    .bind(user_id)
                    .fetch_all(self.db_manager.pool())
                    .await?
            }
        };
        into_auctions(rows)
    }

    async fn auctions_needing_transition(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Auction>, StoreError> {
        let rows = sqlx::query_as::<_, AuctionRow>(queries::AUCTIONS_NEEDING_TRANSITION)
            .bind(now)
            .fetch_all(self.db_manager.pool())
            .await?;
        into_auctions(rows)
    }

    async fn auctions_awaiting_announcement(&self) -> Result<Vec<Auction>, StoreError> {
        let rows = sqlx::query_as::<_, AuctionRow>(queries::AUCTIONS_AWAITING_ANNOUNCEMENT)
            .fetch_all(self.db_manager.pool())
            .await?;
        into_auctions(rows)
    }

    async fn mark_end_announced(&self, auction_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(queries::MARK_END_ANNOUNCED)
            .bind(auction_id)
            .execute(self.db_manager.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn auctions_awaiting_settlement(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Auction>, StoreError> {
        let rows = sqlx::query_as::<_, AuctionRow>(queries::AUCTIONS_AWAITING_SETTLEMENT)
            .bind(now)
            .fetch_all(self.db_manager.pool())
            .await?;
        into_auctions(rows)
    }

    async fn apply_penalty(
        &self,
        auction_id: i64,
        winner_id: Option<&str>,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<PenaltyRecord, StoreError> {
        let winner_id = winner_id.map(str::to_string);
        self.db_manager
            .transaction(move |tx| {
                Box::pin(async move {
                    let marker = sqlx::query_as::<_, PenaltyRow>(queries::LOCK_PENALTY_MARKER)
                        .bind(auction_id)
                        .fetch_optional(&mut **tx)
                        .await?
                        .ok_or_else(|| {
                            StoreError::Backend(format!("auction {} vanished", auction_id))
                        })?;

                    if let Some(applied_at) = marker.penalty_applied_at {
                        debug!(
                            "{:<12} --> penalty for auction {} already recorded",
                            "Store", auction_id
                        );
                        return Ok(PenaltyRecord {
                            newly_applied: false,
                            applied_at,
                            banned_user_id: marker.penalized_user_id,
                            banned_until: marker.penalized_until,
                        });
                    }

                    let mut banned_user_id = None;
                    let mut banned_until = None;
                    if let Some(winner_id) = winner_id {
                        sqlx::query(queries::ENSURE_USER)
                            .bind(&winner_id)
                            .execute(&mut **tx)
                            .await?;
                        let current: Option<DateTime<Utc>> =
                            sqlx::query_scalar(queries::LOCK_USER_BAN)
                                .bind(&winner_id)
                                .fetch_one(&mut **tx)
                                .await?;
                        let in_force = current.map(|c| c > now).unwrap_or(false);
                        if !in_force {
                            let written: Option<DateTime<Utc>> =
                                sqlx::query_scalar(queries::EXTEND_USER_BAN)
                                    .bind(&winner_id)
                                    .bind(until)
                                    .fetch_one(&mut **tx)
                                    .await?;
                            banned_until = written;
                            banned_user_id = Some(winner_id);
                        }
                    }

                    sqlx::query(queries::SET_PENALTY_MARKER)
                        .bind(auction_id)
                        .bind(now)
                        .bind(&banned_user_id)
                        .bind(banned_until)
                        .execute(&mut **tx)
                        .await?;

                    Ok(PenaltyRecord {
                        newly_applied: true,
                        applied_at: now,
                        banned_user_id,
                        banned_until,
                    })
                })
            })
            .await
    }

    async fn mark_settled(&self, auction_id: i64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(queries::MARK_SETTLED)
            .bind(auction_id)
            .bind(now)
            .execute(self.db_manager.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn append_bid_if_highest(&self, bid: &NewBid) -> Result<BidAppend, StoreError> {
        let bid = bid.clone();
        self.db_manager
            .transaction(move |tx| {
                Box::pin(async move {
                    let window: Option<(i64, DateTime<Utc>, DateTime<Utc>)> =
                        sqlx::query_as(queries::LOCK_AUCTION_FOR_BID)
                            .bind(bid.auction_id)
                            .fetch_optional(&mut **tx)
                            .await?;
                    let Some((starting_price, start_time, end_time)) = window else {
                        return Ok(BidAppend::AuctionMissing);
                    };
                    if bid.placed_at < start_time || bid.placed_at >= end_time {
                        return Ok(BidAppend::Closed);
                    }

                    let highest: Option<i64> = sqlx::query_scalar(queries::MAX_BID_AMOUNT)
                        .bind(bid.auction_id)
                        .fetch_one(&mut **tx)
                        .await?;
                    let current = highest.unwrap_or(starting_price);
                    if bid.amount <= current {
                        return Ok(BidAppend::Outbid { current });
                    }

                    let appended = sqlx::query_as::<_, Bid>(queries::INSERT_BID)
                        .bind(bid.auction_id)
                        .bind(&bid.bidder_id)
                        .bind(&bid.bidder_display_name)
                        .bind(bid.amount)
                        .bind(bid.placed_at)
                        .fetch_one(&mut **tx)
                        .await?;
                    Ok(BidAppend::Appended(appended))
                })
            })
            .await
    }

    async fn highest_bid(&self, auction_id: i64) -> Result<Option<Bid>, StoreError> {
        let bid = sqlx::query_as::<_, Bid>(queries::GET_HIGHEST_BID)
            .bind(auction_id)
            .fetch_optional(self.db_manager.pool())
            .await?;
        Ok(bid)
    }

    async fn list_bids(&self, auction_id: i64) -> Result<Vec<Bid>, StoreError> {
        let bids = sqlx::query_as::<_, Bid>(queries::GET_BID_HISTORY)
            .bind(auction_id)
            .fetch_all(self.db_manager.pool())
            .await?;
        Ok(bids)
    }

    async fn insert_participant(
        &self,
        auction_id: i64,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<JoinOutcome, StoreError> {
        let user_id = user_id.to_string();
        self.db_manager
            .transaction(move |tx| {
                Box::pin(async move {
                    let limits: Option<(i32, DateTime<Utc>)> =
                        sqlx::query_as(queries::LOCK_AUCTION_FOR_JOIN)
                            .bind(auction_id)
                            .fetch_optional(&mut **tx)
                            .await?;
                    let Some((max_participants, end_time)) = limits else {
                        return Ok(JoinOutcome::AuctionMissing);
                    };
                    if now >= end_time {
                        return Ok(JoinOutcome::Closed);
                    }

                    let existing = sqlx::query_as::<_, Participant>(queries::GET_PARTICIPANT)
                        .bind(auction_id)
                        .bind(&user_id)
                        .fetch_optional(&mut **tx)
                        .await?;
                    if let Some(existing) = existing {
                        return Ok(JoinOutcome::AlreadyJoined(existing));
                    }

                    if max_participants > 0 {
                        let count: i64 = sqlx::query_scalar(queries::COUNT_PARTICIPANTS)
                            .bind(auction_id)
                            .fetch_one(&mut **tx)
                            .await?;
                        if count >= i64::from(max_participants) {
                            return Ok(JoinOutcome::Full);
                        }
                    }

                    let participant = sqlx::query_as::<_, Participant>(queries::INSERT_PARTICIPANT)
                        .bind(auction_id)
                        .bind(&user_id)
                        .bind(now)
                        .fetch_one(&mut **tx)
                        .await?;
                    Ok(JoinOutcome::Joined(participant))
                })
            })
            .await
    }

    async fn list_participants(&self, auction_id: i64) -> Result<Vec<Participant>, StoreError> {
        let participants = sqlx::query_as::<_, Participant>(queries::LIST_PARTICIPANTS)
            .bind(auction_id)
            .fetch_all(self.db_manager.pool())
            .await?;
        Ok(participants)
    }

    async fn insert_notification_if_absent(
        &self,
        notification: &Notification,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(queries::INSERT_NOTIFICATION)
            .bind(&notification.id)
            .bind(&notification.recipient_id)
            .bind(&notification.message)
            .bind(notification.auction_id)
            .bind(notification.kind.as_str())
            .bind(&notification.participant_id)
            .bind(&notification.from_user_id)
            .bind(notification.read)
            .bind(notification.created_at)
            .execute(self.db_manager.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_notification(&self, id: &str) -> Result<Option<Notification>, StoreError> {
        sqlx::query_as::<_, NotificationRow>(queries::GET_NOTIFICATION)
            .bind(id)
            .fetch_optional(self.db_manager.pool())
            .await?
            .map(Notification::try_from)
            .transpose()
    }

    async fn list_notifications(
        &self,
        recipient_id: &str,
    ) -> Result<Vec<Notification>, StoreError> {
        sqlx::query_as::<_, NotificationRow>(queries::LIST_NOTIFICATIONS)
            .bind(recipient_id)
            .fetch_all(self.db_manager.pool())
            .await?
            .into_iter()
            .map(Notification::try_from)
            .collect()
    }

    async fn mark_notification_read(&self, id: &str) -> Result<Option<bool>, StoreError> {
        let result = sqlx::query(queries::MARK_NOTIFICATION_READ)
            .bind(id)
            .execute(self.db_manager.pool())
            .await?;
        if result.rows_affected() == 1 {
            return Ok(Some(true));
        }
        let exists: bool = sqlx::query_scalar(queries::NOTIFICATION_EXISTS)
            .bind(id)
            .fetch_one(self.db_manager.pool())
            .await?;
        Ok(exists.then_some(false))
    }

    async fn mark_all_notifications_read(&self, recipient_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(queries::MARK_ALL_NOTIFICATIONS_READ)
            .bind(recipient_id)
            .execute(self.db_manager.pool())
            .await?;
        Ok(result.rows_affected())
    }
}

// endregion: --- Postgres Store
