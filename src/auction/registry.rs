// region:    --- Imports
use super::model::{Auction, AuctionPatch, AuctionStatus, CreateAuctionRequest, PaymentStatus};
use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::live_sync::{ChangeEvent, ChangeKind, EntityType, LiveSync};
use crate::notification::model::{templates, NotificationRequest, NotificationType};
use crate::notification::NotificationDispatcher;
use crate::store::{retry_on_conflict, AuctionQuery, Store};
use crate::user::Identity;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info};
// endregion: --- Imports

// region:    --- Auction Registry

/// Owns auction records and their status projection.
pub struct AuctionRegistry {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<NotificationDispatcher>,
    live_sync: Arc<dyn LiveSync>,
}

impl AuctionRegistry {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        dispatcher: Arc<NotificationDispatcher>,
        live_sync: Arc<dyn LiveSync>,
    ) -> Self {
        Self {
            store,
            clock,
            dispatcher,
            live_sync,
        }
    }

    /// Status implied by the clock; the stored value may lag behind it.
    pub fn status_of(auction: &Auction, now: DateTime<Utc>) -> AuctionStatus {
        auction.status_at(now)
    }

    pub async fn create(
        &self,
        owner: &Identity,
        request: CreateAuctionRequest,
    ) -> CoreResult<Auction> {
        let now = self.clock.now();
        let user = retry_on_conflict("upsert_user", || self.store.upsert_user(owner)).await?;
        if let Some(until) = user.active_ban(now) {
            return Err(CoreError::UserBanned(until));
        }

        let draft = request.into_draft(&owner.user_id)?;
        let status = draft.schedule.status_at(now);
        let auction = retry_on_conflict("insert_auction", || {
            self.store.insert_auction(&draft, status, now)
        })
        .await?;
        info!(
            "{:<12} --> auction {} created by {} ({})",
            "Registry",
            auction.id,
            auction.owner_id,
            status.as_str()
        );

        self.publish(&auction, ChangeKind::Added);
        self.dispatcher
            .notify_best_effort(vec![NotificationRequest::new(
                &auction.owner_id,
                auction.id,
                NotificationType::CreateAuction,
                templates::create_auction(&auction.name),
            )])
            .await;
        Ok(auction)
    }

    /// Returns the auction with its status brought up to date.
    pub async fn get(&self, auction_id: i64) -> CoreResult<Auction> {
        let auction = self
            .store
            .get_auction(auction_id)
            .await?
            .ok_or(CoreError::AuctionNotFound(auction_id))?;
        self.refresh(auction).await
    }

    /// Persists a pending transition; only the caller whose compare-and-set
    /// wins publishes it.
    async fn refresh(&self, mut auction: Auction) -> CoreResult<Auction> {
        let target = auction.status_at(self.clock.now());
        if auction.status >= target {
            return Ok(auction);
        }

        let from = auction.status;
        let moved = retry_on_conflict("transition_status", || {
            self.store.transition_status(auction.id, from, target)
        })
        .await?;
        auction.status = target;
        if moved {
            info!(
                "{:<12} --> auction {} {} -> {}",
                "Registry",
                auction.id,
                from.as_str(),
                target.as_str()
            );
            self.publish(&auction, ChangeKind::Modified);
        }
        Ok(auction)
    }

    pub async fn update(
        &self,
        auction_id: i64,
        caller_id: &str,
        patch: AuctionPatch,
    ) -> CoreResult<Auction> {
        let auction = self.get(auction_id).await?;
        if !auction.is_owner(caller_id) {
            return Err(CoreError::NotOwner(auction_id));
        }
        if auction.status != AuctionStatus::Scheduled {
            return Err(CoreError::EditLocked(auction_id));
        }

        let draft = patch.apply(&auction)?;
        let now = self.clock.now();
        let updated = retry_on_conflict("update_auction", || {
            self.store.update_scheduled_auction(auction_id, &draft, now)
        })
        .await?
        // started or deleted between the read and the conditional write
        .ok_or(CoreError::EditLocked(auction_id))?;

        debug!("{:<12} --> auction {} updated", "Registry", auction_id);
        self.publish(&updated, ChangeKind::Modified);
        Ok(updated)
    }

    /// Removes the auction in any status, with its bids and roster.
    pub async fn delete(&self, auction_id: i64, caller_id: &str) -> CoreResult<()> {
        let auction = self
            .store
            .get_auction(auction_id)
            .await?
            .ok_or(CoreError::AuctionNotFound(auction_id))?;
        if !auction.is_owner(caller_id) {
            return Err(CoreError::NotOwner(auction_id));
        }

        let removed =
            retry_on_conflict("delete_auction", || self.store.delete_auction(auction_id)).await?;
        if !removed {
            return Err(CoreError::AuctionNotFound(auction_id));
        }
        info!("{:<12} --> auction {} deleted", "Registry", auction_id);
        self.publish(&auction, ChangeKind::Removed);
        Ok(())
    }

    /// Owner confirms payment; idempotent once approved.
    pub async fn approve_payment(&self, auction_id: i64, caller_id: &str) -> CoreResult<Auction> {
        let auction = self.get(auction_id).await?;
        if !auction.is_owner(caller_id) {
            return Err(CoreError::NotOwner(auction_id));
        }
        if auction.payment_status == PaymentStatus::Approved {
            return Ok(auction);
        }
        if auction.status != AuctionStatus::Ended {
            return Err(CoreError::PaymentWindowClosed(auction_id));
        }

        let now = self.clock.now();
        let mut approved = retry_on_conflict("approve_payment", || {
            self.store.approve_payment(auction_id, now)
        })
        .await?
        .ok_or(CoreError::PaymentWindowClosed(auction_id))?;
        approved.status = approved.status.max(auction.status);

        info!("{:<12} --> auction {} payment approved", "Registry", auction_id);
        self.publish(&approved, ChangeKind::Modified);
        Ok(approved)
    }

    /// Moves every lagging status projection forward. Returns the auctions
    /// this call transitioned.
    pub async fn advance_statuses(&self, now: DateTime<Utc>) -> CoreResult<Vec<Auction>> {
        let stale = self.store.auctions_needing_transition(now).await?;
        let mut advanced = Vec::new();
        for mut auction in stale {
            let from = auction.status;
            let target = auction.status_at(now);
            let result = retry_on_conflict("transition_status", || {
                self.store.transition_status(auction.id, from, target)
            })
            .await;
            match result {
                Ok(true) => {
                    auction.status = target;
                    info!(
                        "{:<12} --> auction {} {} -> {}",
                        "Registry",
                        auction.id,
                        from.as_str(),
                        target.as_str()
                    );
                    self.publish(&auction, ChangeKind::Modified);
                    advanced.push(auction);
                }
                Ok(false) => {}
                Err(e) => error!(
                    "{:<12} --> auction {} transition failed: {}",
                    "Registry", auction.id, e
                ),
            }
        }
        Ok(advanced)
    }

    /// Newest first. Statuses are projected to the clock without being
    /// persisted.
    pub async fn list(&self, query: AuctionQuery) -> CoreResult<Vec<Auction>> {
        let now = self.clock.now();
        let mut auctions = self.store.list_auctions(&query).await?;
        for auction in auctions.iter_mut() {
            auction.status = auction.status.max(auction.status_at(now));
        }
        Ok(auctions)
    }

    pub async fn list_all(&self) -> CoreResult<Vec<Auction>> {
        self.list(AuctionQuery::All).await
    }

    pub async fn list_owned_by(&self, owner_id: &str) -> CoreResult<Vec<Auction>> {
        self.list(AuctionQuery::OwnedBy(owner_id.to_string())).await
    }

    pub async fn list_joined_by(&self, user_id: &str) -> CoreResult<Vec<Auction>> {
        self.list(AuctionQuery::JoinedBy(user_id.to_string())).await
    }

    fn publish(&self, auction: &Auction, kind: ChangeKind) {
        self.live_sync.publish(
            ChangeEvent::new(EntityType::Auction, auction.id, kind, auction).for_auction(auction.id),
        );
    }
}

// endregion: --- Auction Registry
