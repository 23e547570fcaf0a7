//! In-process store.
//!
//! All state sits behind one mutex, so each trait call is a serializable
//! transaction. Used by the test suites and by local runs without Postgres.

// region:    --- Imports
use super::{AuctionQuery, Store};
use crate::auction::model::{Auction, AuctionDraft, AuctionStatus, PaymentStatus};
use crate::bidding::model::{Bid, BidAppend, NewBid};
use crate::error::StoreError;
use crate::notification::model::Notification;
use crate::roster::model::{JoinOutcome, Participant};
use crate::settlement::PenaltyRecord;
use crate::user::{Identity, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
// endregion: --- Imports

// region:    --- Failure Injection

/// Failures the memory store can simulate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryFailure {
    /// The next `n` writes report a serialization conflict.
    Conflicts(u32),
    /// Every write touching this auction fails.
    OnAuction(i64),
}

// endregion: --- Failure Injection

// region:    --- Memory Store

#[derive(Debug, Default)]
struct State {
    users: HashMap<String, User>,
    auctions: BTreeMap<i64, Auction>,
    bids: HashMap<i64, Vec<Bid>>,
    participants: HashMap<i64, Vec<Participant>>,
    notifications: HashMap<String, Notification>,
    next_auction_id: i64,
    next_bid_id: i64,
    failure: Option<MemoryFailure>,
}

impl State {
    /// Checked at the start of every write.
    fn check_write(&mut self, auction_id: Option<i64>) -> Result<(), StoreError> {
        match self.failure.clone() {
            Some(MemoryFailure::Conflicts(n)) if n > 0 => {
                self.failure = if n > 1 {
                    Some(MemoryFailure::Conflicts(n - 1))
                } else {
                    None
                };
                Err(StoreError::Conflict("simulated serialization failure".into()))
            }
            Some(MemoryFailure::OnAuction(id)) if auction_id == Some(id) => Err(
                StoreError::Backend(format!("simulated failure on auction {}", id)),
            ),
            _ => Ok(()),
        }
    }

    fn highest(&self, auction_id: i64) -> Option<&Bid> {
        self.bids
            .get(&auction_id)
            .and_then(|bids| bids.iter().min_by(|a, b| Bid::rank(a, b)))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set failure mode for testing error handling.
    pub fn set_failure(&self, failure: Option<MemoryFailure>) {
        self.state.lock().failure = failure;
    }

    /// Number of stored notifications (for test assertions).
    pub fn notification_count(&self) -> usize {
        self.state.lock().notifications.len()
    }
}

fn sorted_newest_first(mut auctions: Vec<Auction>) -> Vec<Auction> {
    auctions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    auctions
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_user(&self, identity: &Identity) -> Result<User, StoreError> {
        let mut state = self.state.lock();
        state.check_write(None)?;
        let user = state
            .users
            .entry(identity.user_id.clone())
            .or_insert_with(|| User {
                id: identity.user_id.clone(),
                display_name: identity.display_name.clone(),
                banned_until: None,
            });
        user.display_name = identity.display_name.clone();
        Ok(user.clone())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.state.lock().users.get(user_id).cloned())
    }

    async fn insert_auction(
        &self,
        draft: &AuctionDraft,
        status: AuctionStatus,
        created_at: DateTime<Utc>,
    ) -> Result<Auction, StoreError> {
        let mut state = self.state.lock();
        state.check_write(None)?;
        state.next_auction_id += 1;
        let auction = Auction {
            id: state.next_auction_id,
            owner_id: draft.owner_id.clone(),
            name: draft.name.clone(),
            product: draft.product.clone(),
            category: draft.category.clone(),
            description: draft.description.clone(),
            image_urls: draft.image_urls.clone(),
            starting_price: draft.starting_price,
            step_price: draft.step_price,
            max_participants: draft.max_participants,
            start_time: draft.schedule.start_time,
            end_time: draft.schedule.end_time,
            payment_deadline: draft.schedule.payment_deadline,
            status,
            payment_status: PaymentStatus::Pending,
            created_at,
            end_announced: false,
            penalty_applied_at: None,
            penalized_user_id: None,
            penalized_until: None,
            settled_at: None,
        };
        state.auctions.insert(auction.id, auction.clone());
        Ok(auction)
    }

    async fn get_auction(&self, auction_id: i64) -> Result<Option<Auction>, StoreError> {
        Ok(self.state.lock().auctions.get(&auction_id).cloned())
    }

    async fn update_scheduled_auction(
        &self,
        auction_id: i64,
        draft: &AuctionDraft,
        now: DateTime<Utc>,
    ) -> Result<Option<Auction>, StoreError> {
        let mut state = self.state.lock();
        state.check_write(Some(auction_id))?;
        let Some(auction) = state.auctions.get_mut(&auction_id) else {
            return Ok(None);
        };
        if auction.status != AuctionStatus::Scheduled || auction.start_time <= now {
            return Ok(None);
        }
        auction.name = draft.name.clone();
        auction.product = draft.product.clone();
        auction.category = draft.category.clone();
        auction.description = draft.description.clone();
        auction.image_urls = draft.image_urls.clone();
        auction.starting_price = draft.starting_price;
        auction.step_price = draft.step_price;
        auction.max_participants = draft.max_participants;
        auction.start_time = draft.schedule.start_time;
        auction.end_time = draft.schedule.end_time;
        auction.payment_deadline = draft.schedule.payment_deadline;
        Ok(Some(auction.clone()))
    }

    async fn delete_auction(&self, auction_id: i64) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        state.check_write(Some(auction_id))?;
        state.bids.remove(&auction_id);
        state.participants.remove(&auction_id);
        Ok(state.auctions.remove(&auction_id).is_some())
    }

    async fn transition_status(
        &self,
        auction_id: i64,
        from: AuctionStatus,
        to: AuctionStatus,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        state.check_write(Some(auction_id))?;
        match state.auctions.get_mut(&auction_id) {
            Some(auction) if auction.status == from && from < to => {
                auction.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn approve_payment(
        &self,
        auction_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<Auction>, StoreError> {
        let mut state = self.state.lock();
        state.check_write(Some(auction_id))?;
        match state.auctions.get_mut(&auction_id) {
            Some(auction) if now <= auction.payment_deadline => {
                auction.payment_status = PaymentStatus::Approved;
                Ok(Some(auction.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn list_auctions(&self, query: &AuctionQuery) -> Result<Vec<Auction>, StoreError> {
        let state = self.state.lock();
        let auctions = state
            .auctions
            .values()
            .filter(|auction| match query {
                AuctionQuery::All => true,
                AuctionQuery::OwnedBy(owner) => &auction.owner_id == owner,
                AuctionQuery::JoinedBy(user) => state
                    .participants
                    .get(&auction.id)
                    .map(|roster| roster.iter().any(|p| &p.user_id == user))
                    .unwrap_or(false),
            })
            .cloned()
            .collect();
        Ok(sorted_newest_first(auctions))
    }

    async fn auctions_needing_transition(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Auction>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .auctions
            .values()
            .filter(|auction| auction.status < auction.status_at(now))
            .cloned()
            .collect())
    }

    async fn auctions_awaiting_announcement(&self) -> Result<Vec<Auction>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .auctions
            .values()
            .filter(|auction| auction.status == AuctionStatus::Ended && !auction.end_announced)
            .cloned()
            .collect())
    }

    async fn mark_end_announced(&self, auction_id: i64) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        state.check_write(Some(auction_id))?;
        match state.auctions.get_mut(&auction_id) {
            Some(auction) if !auction.end_announced => {
                auction.end_announced = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn auctions_awaiting_settlement(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Auction>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .auctions
            .values()
            .filter(|auction| {
                auction.status == AuctionStatus::Ended
                    && auction.payment_status != PaymentStatus::Approved
                    && auction.payment_deadline < now
                    && auction.settled_at.is_none()
            })
            .cloned()
            .collect())
    }

    async fn apply_penalty(
        &self,
        auction_id: i64,
        winner_id: Option<&str>,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<PenaltyRecord, StoreError> {
        let mut state = self.state.lock();
        state.check_write(Some(auction_id))?;

        let auction = state
            .auctions
            .get(&auction_id)
            .ok_or_else(|| StoreError::Backend(format!("auction {} vanished", auction_id)))?;
        if let Some(applied_at) = auction.penalty_applied_at {
            return Ok(PenaltyRecord {
                newly_applied: false,
                applied_at,
                banned_user_id: auction.penalized_user_id.clone(),
                banned_until: auction.penalized_until,
            });
        }

        let mut banned = None;
        if let Some(winner_id) = winner_id {
            let user = state
                .users
                .entry(winner_id.to_string())
                .or_insert_with(|| User {
                    id: winner_id.to_string(),
                    display_name: String::new(),
                    banned_until: None,
                });
            if user.active_ban(now).is_none() {
                let new_until = user.banned_until.map_or(until, |current| current.max(until));
                user.banned_until = Some(new_until);
                banned = Some((winner_id.to_string(), new_until));
            }
        }

        let auction = state
            .auctions
            .get_mut(&auction_id)
            .ok_or_else(|| StoreError::Backend(format!("auction {} vanished", auction_id)))?;
        auction.penalty_applied_at = Some(now);
        auction.penalized_user_id = banned.as_ref().map(|(id, _)| id.clone());
        auction.penalized_until = banned.as_ref().map(|(_, until)| *until);

        Ok(PenaltyRecord {
            newly_applied: true,
            applied_at: now,
            banned_user_id: auction.penalized_user_id.clone(),
            banned_until: auction.penalized_until,
        })
    }

    async fn mark_settled(&self, auction_id: i64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        state.check_write(Some(auction_id))?;
        match state.auctions.get_mut(&auction_id) {
            Some(auction) if auction.settled_at.is_none() => {
                auction.settled_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn append_bid_if_highest(&self, bid: &NewBid) -> Result<BidAppend, StoreError> {
        let mut state = self.state.lock();
        state.check_write(Some(bid.auction_id))?;

        let Some(auction) = state.auctions.get(&bid.auction_id) else {
            return Ok(BidAppend::AuctionMissing);
        };
        if auction.status_at(bid.placed_at) != AuctionStatus::Active {
            return Ok(BidAppend::Closed);
        }
        let current = state
            .highest(bid.auction_id)
            .map_or(auction.starting_price, |highest| highest.amount);
        if bid.amount <= current {
            return Ok(BidAppend::Outbid { current });
        }

        state.next_bid_id += 1;
        let appended = Bid {
            id: state.next_bid_id,
            auction_id: bid.auction_id,
            bidder_id: bid.bidder_id.clone(),
            bidder_display_name: bid.bidder_display_name.clone(),
            amount: bid.amount,
            placed_at: bid.placed_at,
        };
        state
            .bids
            .entry(bid.auction_id)
            .or_default()
            .push(appended.clone());
        Ok(BidAppend::Appended(appended))
    }

    async fn highest_bid(&self, auction_id: i64) -> Result<Option<Bid>, StoreError> {
        Ok(self.state.lock().highest(auction_id).cloned())
    }

    async fn list_bids(&self, auction_id: i64) -> Result<Vec<Bid>, StoreError> {
        let mut bids = self
            .state
            .lock()
            .bids
            .get(&auction_id)
            .cloned()
            .unwrap_or_default();
        bids.sort_by(Bid::rank);
        Ok(bids)
    }

    async fn insert_participant(
        &self,
        auction_id: i64,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<JoinOutcome, StoreError> {
        let mut state = self.state.lock();
        state.check_write(Some(auction_id))?;

        let Some(auction) = state.auctions.get(&auction_id) else {
            return Ok(JoinOutcome::AuctionMissing);
        };
        if auction.status_at(now) == AuctionStatus::Ended {
            return Ok(JoinOutcome::Closed);
        }
        let limit = auction
            .has_capacity_limit()
            .then_some(auction.max_participants as usize);

        let roster = state.participants.entry(auction_id).or_default();
        if let Some(existing) = roster.iter().find(|p| p.user_id == user_id) {
            return Ok(JoinOutcome::AlreadyJoined(existing.clone()));
        }
        if limit.is_some_and(|limit| roster.len() >= limit) {
            return Ok(JoinOutcome::Full);
        }
        let participant = Participant {
            auction_id,
            user_id: user_id.to_string(),
            joined_at: now,
        };
        roster.push(participant.clone());
        Ok(JoinOutcome::Joined(participant))
    }

    async fn list_participants(&self, auction_id: i64) -> Result<Vec<Participant>, StoreError> {
        Ok(self
            .state
            .lock()
            .participants
            .get(&auction_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_notification_if_absent(
        &self,
        notification: &Notification,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        state.check_write(Some(notification.auction_id))?;
        if state.notifications.contains_key(&notification.id) {
            return Ok(false);
        }
        state
            .notifications
            .insert(notification.id.clone(), notification.clone());
        Ok(true)
    }

    async fn get_notification(&self, id: &str) -> Result<Option<Notification>, StoreError> {
        Ok(self.state.lock().notifications.get(id).cloned())
    }

    async fn list_notifications(
        &self,
        recipient_id: &str,
    ) -> Result<Vec<Notification>, StoreError> {
        let state = self.state.lock();
        let mut notifications: Vec<Notification> = state
            .notifications
            .values()
            .filter(|n| n.recipient_id == recipient_id)
            .cloned()
            .collect();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(notifications)
    }

    async fn mark_notification_read(&self, id: &str) -> Result<Option<bool>, StoreError> {
        let mut state = self.state.lock();
        state.check_write(None)?;
        Ok(state.notifications.get_mut(id).map(|n| {
            let flipped = !n.read;
            n.read = true;
            flipped
        }))
    }

    async fn mark_all_notifications_read(&self, recipient_id: &str) -> Result<u64, StoreError> {
        let mut state = self.state.lock();
        state.check_write(None)?;
        let mut flipped = 0;
        for n in state
            .notifications
            .values_mut()
            .filter(|n| n.recipient_id == recipient_id && !n.read)
        {
            n.read = true;
            flipped += 1;
        }
        Ok(flipped)
    }
}

// endregion: --- Memory Store

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::model::Schedule;
    use chrono::Duration;

    fn draft(now: DateTime<Utc>, capacity: i32) -> AuctionDraft {
        AuctionDraft {
            owner_id: "owner".into(),
            name: "Lamp".into(),
            product: "Lamp".into(),
            category: "Home".into(),
            description: String::new(),
            image_urls: vec![],
            starting_price: 100,
            step_price: 10,
            max_participants: capacity,
            schedule: Schedule {
                start_time: now - Duration::minutes(1),
                end_time: now + Duration::hours(1),
                payment_deadline: now + Duration::hours(2),
            },
        }
    }

    #[tokio::test]
    async fn conflict_injection_counts_down() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.set_failure(Some(MemoryFailure::Conflicts(2)));

        for _ in 0..2 {
            let err = store
                .insert_auction(&draft(now, 0), AuctionStatus::Active, now)
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::Conflict(_)));
        }
        assert!(store
            .insert_auction(&draft(now, 0), AuctionStatus::Active, now)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let auction = store
            .insert_auction(&draft(now, 0), AuctionStatus::Active, now)
            .await
            .unwrap();

        assert!(store
            .transition_status(auction.id, AuctionStatus::Active, AuctionStatus::Ended)
            .await
            .unwrap());
        assert!(!store
            .transition_status(auction.id, AuctionStatus::Active, AuctionStatus::Ended)
            .await
            .unwrap());
        // never backwards
        assert!(!store
            .transition_status(auction.id, AuctionStatus::Ended, AuctionStatus::Active)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn penalty_marker_is_written_once() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let auction = store
            .insert_auction(&draft(now, 0), AuctionStatus::Ended, now)
            .await
            .unwrap();
        let until = now + Duration::days(30);

        let first = store
            .apply_penalty(auction.id, Some("winner"), now, until)
            .await
            .unwrap();
        assert!(first.newly_applied);
        assert_eq!(first.banned_until, Some(until));

        let later = now + Duration::hours(1);
        let second = store
            .apply_penalty(auction.id, Some("winner"), later, later + Duration::days(30))
            .await
            .unwrap();
        assert!(!second.newly_applied);
        assert_eq!(second.banned_until, Some(until));

        let user = store.get_user("winner").await.unwrap().unwrap();
        assert_eq!(user.banned_until, Some(until));
    }
}
