// region:    --- Imports
use super::model::{Bid, BidAppend, NewBid};
use crate::auction::model::{Auction, AuctionStatus, AuctionView};
use crate::auction::AuctionRegistry;
use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::live_sync::{ChangeEvent, ChangeKind, EntityType, LiveSync};
use crate::notification::model::{templates, NotificationRequest, NotificationType};
use crate::notification::NotificationDispatcher;
use crate::store::{retry_on_conflict, Store};
use crate::user::Identity;
use std::sync::Arc;
use tracing::{info, warn};
// endregion: --- Imports

// region:    --- Bid Ledger

/// Append-only bid log per auction. The highest bid is always derived from
/// the log and never stored.
pub struct BidLedger {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    registry: Arc<AuctionRegistry>,
    dispatcher: Arc<NotificationDispatcher>,
    live_sync: Arc<dyn LiveSync>,
}

impl BidLedger {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        registry: Arc<AuctionRegistry>,
        dispatcher: Arc<NotificationDispatcher>,
        live_sync: Arc<dyn LiveSync>,
    ) -> Self {
        Self {
            store,
            clock,
            registry,
            dispatcher,
            live_sync,
        }
    }

    /// Appends a bid that beats the current highest.
    ///
    /// Checks run in order: auction exists and is active, bidder is not the
    /// owner, bidder is not banned, amount beats the highest bid. The last
    /// check is repeated inside the store transaction, so a bid overtaken
    /// before commit still fails with `BID_TOO_LOW`. Starting prices are
    /// positive, so a non-positive amount fails that last check too.
    pub async fn place_bid(&self, auction_id: i64, bidder: &Identity, amount: i64) -> CoreResult<Bid> {
        let auction = self.registry.get(auction_id).await?;
        if auction.status != AuctionStatus::Active {
            return Err(CoreError::AuctionNotActive(auction_id));
        }
        if auction.is_owner(&bidder.user_id) {
            return Err(CoreError::OwnerCannotBid);
        }

        let user = retry_on_conflict("upsert_user", || self.store.upsert_user(bidder)).await?;
        if let Some(until) = user.active_ban(self.clock.now()) {
            return Err(CoreError::BidderBanned(until));
        }

        let current = self.current_highest_of(&auction).await?;
        if amount <= current {
            return Err(CoreError::BidTooLow { amount, current });
        }

        let new_bid = NewBid {
            auction_id,
            bidder_id: bidder.user_id.clone(),
            bidder_display_name: bidder.display_name.clone(),
            amount,
            placed_at: self.clock.now(),
        };
        let outcome = retry_on_conflict("place_bid", || {
            self.store.append_bid_if_highest(&new_bid)
        })
        .await?;

        let bid = match outcome {
            BidAppend::Appended(bid) => bid,
            BidAppend::Outbid { current } => {
                warn!(
                    "{:<12} --> bid {} on auction {} overtaken at commit (current {})",
                    "Ledger", amount, auction_id, current
                );
                return Err(CoreError::BidTooLow { amount, current });
            }
            BidAppend::Closed => return Err(CoreError::AuctionNotActive(auction_id)),
            BidAppend::AuctionMissing => return Err(CoreError::AuctionNotFound(auction_id)),
        };

        info!(
            "{:<12} --> bid {} of {} by {} on auction {}",
            "Ledger", bid.id, bid.amount, bid.bidder_id, auction_id
        );
        self.live_sync.publish(
            ChangeEvent::new(EntityType::Bid, bid.id, ChangeKind::Added, &bid)
                .for_auction(auction_id),
        );
        self.notify_bid(&auction, &bid).await;
        Ok(bid)
    }

    /// Owner gets `new-bid`; every other participant gets
    /// `new-bid-participant`. Each is keyed by the bid id.
    async fn notify_bid(&self, auction: &Auction, bid: &Bid) {
        let bid_key = bid.id.to_string();
        let mut requests = vec![NotificationRequest::new(
            &auction.owner_id,
            auction.id,
            NotificationType::NewBid,
            templates::new_bid(&auction.name, bid.amount, &bid.bidder_display_name),
        )
        .participant(&bid_key)
        .from_user(&bid.bidder_id)];

        match self.store.list_participants(auction.id).await {
            Ok(roster) => requests.extend(
                roster
                    .into_iter()
                    .filter(|p| p.user_id != bid.bidder_id && p.user_id != auction.owner_id)
                    .map(|p| {
                        NotificationRequest::new(
                            p.user_id,
                            auction.id,
                            NotificationType::NewBidParticipant,
                            templates::new_bid_participant(&auction.name, bid.amount),
                        )
                        .participant(&bid_key)
                        .from_user(&bid.bidder_id)
                    }),
            ),
            Err(e) => warn!(
                "{:<12} --> roster of auction {} unavailable: {}",
                "Ledger", auction.id, e
            ),
        }

        self.dispatcher.notify_best_effort(requests).await;
    }

    async fn current_highest_of(&self, auction: &Auction) -> CoreResult<i64> {
        let highest = self.store.highest_bid(auction.id).await?;
        Ok(highest.map_or(auction.starting_price, |bid| bid.amount))
    }

    /// Highest accepted amount, or the starting price when nobody has bid.
    pub async fn current_highest(&self, auction_id: i64) -> CoreResult<i64> {
        let auction = self
            .store
            .get_auction(auction_id)
            .await?
            .ok_or(CoreError::AuctionNotFound(auction_id))?;
        self.current_highest_of(&auction).await
    }

    pub async fn highest_bid(&self, auction_id: i64) -> CoreResult<Option<Bid>> {
        if self.store.get_auction(auction_id).await?.is_none() {
            return Err(CoreError::AuctionNotFound(auction_id));
        }
        Ok(self.store.highest_bid(auction_id).await?)
    }

    /// Amount descending, earliest first on ties.
    pub async fn list_bids(&self, auction_id: i64) -> CoreResult<Vec<Bid>> {
        if self.store.get_auction(auction_id).await?.is_none() {
            return Err(CoreError::AuctionNotFound(auction_id));
        }
        Ok(self.store.list_bids(auction_id).await?)
    }

    pub fn minimum_next_bid(auction: &Auction, current_highest: i64) -> i64 {
        current_highest.saturating_add(auction.step_price)
    }

    /// Auction with its highest bid and the suggested next amount.
    pub async fn view(&self, auction: Auction) -> CoreResult<AuctionView> {
        let highest_bid = self.store.highest_bid(auction.id).await?;
        let current_highest = highest_bid
            .as_ref()
            .map_or(auction.starting_price, |bid| bid.amount);
        Ok(AuctionView {
            minimum_next_bid: Self::minimum_next_bid(&auction, current_highest),
            current_highest,
            highest_bid,
            auction,
        })
    }
}

// endregion: --- Bid Ledger
