//! Deadline-driven settlement.
//!
//! Two duties, both safe to run from several instances at once:
//! - the one-shot end announcement, sent when an auction stops taking bids;
//! - the settlement of ended auctions whose payment deadline passed unpaid,
//!   which bans the winner and informs the owner.
//!
//! Every notification is keyed deterministically and the ban is guarded by a
//! per-auction marker, so a sweep interrupted halfway is completed by the next
//! one without repeating any effect.

// region:    --- Imports
use crate::auction::model::{Auction, AuctionStatus};
use crate::clock::Clock;
use crate::config::PENALTY_DAYS;
use crate::error::CoreResult;
use crate::live_sync::{ChangeFilter, ChangeKind, EntityType, LiveSync};
use crate::notification::model::{templates, NotificationRequest, NotificationType};
use crate::notification::NotificationDispatcher;
use crate::store::{retry_on_conflict, Store};
use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
// endregion: --- Imports

// region:    --- Penalty Record

/// Ban marker stored on the auction, written at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PenaltyRecord {
    /// False when an earlier call had already recorded the marker.
    pub newly_applied: bool,
    pub applied_at: DateTime<Utc>,
    /// Absent when there was no winner or the winner was already banned.
    pub banned_user_id: Option<String>,
    pub banned_until: Option<DateTime<Utc>>,
}

// endregion: --- Penalty Record

// region:    --- Sweep Report

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub announced: usize,
    pub settled: usize,
    pub failed: usize,
}

// endregion: --- Sweep Report

// region:    --- Settlement Enforcer

pub struct SettlementEnforcer {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl SettlementEnforcer {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            store,
            clock,
            dispatcher,
        }
    }

    /// One pass over pending announcements and settlements. A failing
    /// auction is logged and left for the next pass.
    pub async fn sweep(&self) -> CoreResult<SweepReport> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for auction in self.store.auctions_awaiting_announcement().await? {
            match self.announce_end(&auction).await {
                Ok(true) => report.announced += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    error!(
                        "{:<12} --> end announcement for auction {} failed: {}",
                        "Settlement", auction.id, e
                    );
                }
            }
        }

        for auction in self.store.auctions_awaiting_settlement(now).await? {
            match self.settle(&auction, now).await {
                Ok(()) => report.settled += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(
                        "{:<12} --> settlement of auction {} failed: {}",
                        "Settlement", auction.id, e
                    );
                }
            }
        }

        if report != SweepReport::default() {
            debug!("{:<12} --> sweep {:?}", "Settlement", report);
        }
        Ok(report)
    }

    /// Tells the owner and every participant how the auction ended. Returns
    /// false when another caller had already recorded the announcement.
    pub async fn announce_end(&self, auction: &Auction) -> CoreResult<bool> {
        let winner = self.store.highest_bid(auction.id).await?;
        let participants = self.store.list_participants(auction.id).await?;

        let mut requests = vec![NotificationRequest::new(
            &auction.owner_id,
            auction.id,
            NotificationType::AuctionEnded,
            templates::auction_ended(
                &auction.name,
                winner
                    .as_ref()
                    .map(|bid| (bid.amount, bid.bidder_display_name.as_str())),
            ),
        )];

        let mut winner_joined = false;
        for participant in &participants {
            let won = winner
                .as_ref()
                .is_some_and(|bid| bid.bidder_id == participant.user_id);
            winner_joined |= won;
            let request = match &winner {
                Some(bid) if won => NotificationRequest::new(
                    &participant.user_id,
                    auction.id,
                    NotificationType::AuctionEndedWin,
                    templates::auction_ended_win(&auction.name, bid.amount),
                ),
                _ => NotificationRequest::new(
                    &participant.user_id,
                    auction.id,
                    NotificationType::AuctionEndedLose,
                    templates::auction_ended_lose(&auction.name),
                ),
            };
            requests.push(request.participant(&participant.user_id));
        }
        if let Some(bid) = winner.as_ref().filter(|_| !winner_joined) {
            requests.push(
                NotificationRequest::new(
                    &bid.bidder_id,
                    auction.id,
                    NotificationType::AuctionEndedWin,
                    templates::auction_ended_win(&auction.name, bid.amount),
                )
                .participant(&bid.bidder_id),
            );
        }

        for request in requests {
            self.dispatcher.notify(request).await?;
        }

        let marked =
            retry_on_conflict("end_announced", || self.store.mark_end_announced(auction.id))
                .await?;
        if marked {
            info!(
                "{:<12} --> auction {} end announced to {} participants",
                "Settlement",
                auction.id,
                participants.len()
            );
        }
        Ok(marked)
    }

    /// Bans the unpaid winner once, then informs both sides.
    async fn settle(&self, auction: &Auction, now: DateTime<Utc>) -> CoreResult<()> {
        let winner = self.store.highest_bid(auction.id).await?;
        let winner_id = winner.as_ref().map(|bid| bid.bidder_id.as_str());
        let until = now + Duration::days(PENALTY_DAYS);

        let record = retry_on_conflict("apply_penalty", || {
            self.store.apply_penalty(auction.id, winner_id, now, until)
        })
        .await?;
        if record.newly_applied {
            info!(
                "{:<12} --> auction {} unpaid, penalty recorded (banned: {:?} until {:?})",
                "Settlement", auction.id, record.banned_user_id, record.banned_until
            );
        }

        if let (Some(user_id), Some(banned_until)) = (&record.banned_user_id, record.banned_until) {
            let days = (banned_until - record.applied_at).num_days();
            self.dispatcher
                .notify(
                    NotificationRequest::new(
                        user_id,
                        auction.id,
                        NotificationType::Ban,
                        templates::ban(&auction.name, days),
                    )
                    .participant(user_id),
                )
                .await?;
        }

        if winner.is_some() {
            self.dispatcher
                .notify(NotificationRequest::new(
                    &auction.owner_id,
                    auction.id,
                    NotificationType::PaymentFailed,
                    templates::payment_failed(&auction.name),
                ))
                .await?;
        }

        retry_on_conflict("mark_settled", || self.store.mark_settled(auction.id, now)).await?;
        Ok(())
    }

    /// Announces auctions as soon as a transition to ended is published,
    /// ahead of the next sweep.
    pub fn spawn_reactive(self: Arc<Self>, live_sync: &dyn LiveSync) -> JoinHandle<()> {
        let mut changes = live_sync.subscribe(ChangeFilter::entity(EntityType::Auction));
        tokio::spawn(async move {
            while let Some(event) = changes.next().await {
                if event.kind != ChangeKind::Modified {
                    continue;
                }
                let Ok(auction) = serde_json::from_value::<Auction>(event.payload) else {
                    continue;
                };
                if auction.status != AuctionStatus::Ended || auction.end_announced {
                    continue;
                }
                if let Err(e) = self.announce_end(&auction).await {
                    error!(
                        "{:<12} --> end announcement for auction {} failed: {}",
                        "Settlement", auction.id, e
                    );
                }
            }
            debug!("{:<12} --> change stream closed", "Settlement");
        })
    }
}

// endregion: --- Settlement Enforcer
