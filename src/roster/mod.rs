//! Per-auction admission control.

// region:    --- Imports
use crate::auction::model::AuctionStatus;
use crate::auction::AuctionRegistry;
use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::live_sync::{ChangeEvent, ChangeKind, EntityType, LiveSync};
use crate::notification::model::{templates, NotificationRequest, NotificationType};
use crate::notification::NotificationDispatcher;
use crate::store::{retry_on_conflict, Store};
use crate::user::Identity;
use std::sync::Arc;
use tracing::{debug, info};
// endregion: --- Imports

pub mod model;

use model::{Admission, JoinOutcome, Participant};

// region:    --- Participant Roster

pub struct ParticipantRoster {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    registry: Arc<AuctionRegistry>,
    dispatcher: Arc<NotificationDispatcher>,
    live_sync: Arc<dyn LiveSync>,
}

impl ParticipantRoster {
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

    /// Admits `user` to the auction. Joining twice succeeds without adding a
    /// second entry.
    pub async fn join(&self, auction_id: i64, user: &Identity) -> CoreResult<Admission> {
        let auction = self.registry.get(auction_id).await?;
        if auction.is_owner(&user.user_id) {
            return Err(CoreError::OwnerCannotJoin);
        }

        let now = self.clock.now();
        let stored = retry_on_conflict("upsert_user", || self.store.upsert_user(user)).await?;
        if let Some(until) = stored.active_ban(now) {
            return Err(CoreError::UserBanned(until));
        }
        if auction.status == AuctionStatus::Ended {
            return Err(CoreError::AuctionEnded(auction_id));
        }

        let outcome = retry_on_conflict("join", || {
            self.store.insert_participant(auction_id, &user.user_id, now)
        })
        .await?;

        let participant = match outcome {
            JoinOutcome::Joined(participant) => participant,
            JoinOutcome::AlreadyJoined(participant) => {
                debug!(
                    "{:<12} --> {} already in auction {}",
                    "Roster", user.user_id, auction_id
                );
                return Ok(Admission::AlreadyJoined { participant });
            }
            JoinOutcome::Full => return Err(CoreError::AuctionFull(auction_id)),
            JoinOutcome::Closed => return Err(CoreError::AuctionEnded(auction_id)),
            JoinOutcome::AuctionMissing => return Err(CoreError::AuctionNotFound(auction_id)),
        };

        info!(
            "{:<12} --> {} joined auction {}",
            "Roster", participant.user_id, auction_id
        );
        self.live_sync.publish(
            ChangeEvent::new(
                EntityType::Participant,
                &participant.user_id,
                ChangeKind::Added,
                &participant,
            )
            .for_auction(auction_id),
        );
        self.dispatcher
            .notify_best_effort(vec![
                NotificationRequest::new(
                    &user.user_id,
                    auction_id,
                    NotificationType::JoinBidder,
                    templates::join_bidder(&auction.name),
                )
                .participant(&user.user_id),
                NotificationRequest::new(
                    &auction.owner_id,
                    auction_id,
                    NotificationType::Join,
                    templates::join(&auction.name),
                )
                .participant(&user.user_id)
                .from_user(&user.user_id),
            ])
            .await;

        Ok(Admission::Joined { participant })
    }

    /// Ordered by join time.
    pub async fn participants(&self, auction_id: i64) -> CoreResult<Vec<Participant>> {
        if self.store.get_auction(auction_id).await?.is_none() {
            return Err(CoreError::AuctionNotFound(auction_id));
        }
        Ok(self.store.list_participants(auction_id).await?)
    }

    pub async fn is_participant(&self, auction_id: i64, user_id: &str) -> CoreResult<bool> {
        let roster = self.participants(auction_id).await?;
        Ok(roster.iter().any(|p| p.user_id == user_id))
    }
}

// endregion: --- Participant Roster
