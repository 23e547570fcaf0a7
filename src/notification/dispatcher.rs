// region:    --- Imports
use super::model::{Notification, NotificationRequest};
use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::live_sync::{ChangeEvent, ChangeKind, EntityType, LiveSync};
use crate::store::{retry_on_conflict, Store};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
// endregion: --- Imports

// region:    --- In-flight Guard

type Slots = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Per-id turn shared by concurrent callers in this process. The entry is
/// removed by the last caller to leave, including on cancellation.
struct InFlight<'a> {
    slots: &'a Slots,
    id: String,
    slot: Arc<AsyncMutex<()>>,
}

impl<'a> InFlight<'a> {
    fn enter(slots: &'a Slots, id: &str) -> Self {
        let slot = Arc::clone(slots.lock().entry(id.to_string()).or_default());
        Self {
            slots,
            id: id.to_string(),
            slot,
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        // the map and this guard hold the only references
        let last = slots
            .get(&self.id)
            .is_some_and(|slot| Arc::ptr_eq(slot, &self.slot) && Arc::strong_count(slot) == 2);
        if last {
            slots.remove(&self.id);
        }
    }
}

// endregion: --- In-flight Guard

// region:    --- Dispatcher

/// Stores each logical notification at most once.
///
/// Concurrent duplicates inside this process take turns on a per-id slot, and
/// each one still runs the store's conditional create. A duplicate therefore
/// reports `false` only once the record is actually stored, even when the
/// first caller failed.
pub struct NotificationDispatcher {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    live_sync: Arc<dyn LiveSync>,
    in_flight: Slots,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, live_sync: Arc<dyn LiveSync>) -> Self {
        Self {
            store,
            clock,
            live_sync,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true only when this call stored a new notification.
    pub async fn notify(&self, request: NotificationRequest) -> CoreResult<bool> {
        let id = request.id();
        let in_flight = InFlight::enter(&self.in_flight, &id);
        let _turn = in_flight.slot.lock().await;

        let notification = Notification {
            id,
            recipient_id: request.recipient_id,
            message: request.message,
            auction_id: request.auction_id,
            kind: request.kind,
            participant_id: request.participant_id,
            from_user_id: request.from_user_id,
            read: false,
            created_at: self.clock.now(),
        };

        let created = retry_on_conflict("notify", || {
            self.store.insert_notification_if_absent(&notification)
        })
        .await?;

        if created {
            info!(
                "{:<12} --> {} to {} (auction {})",
                "Notify",
                notification.kind.as_str(),
                notification.recipient_id,
                notification.auction_id
            );
            self.live_sync.publish(
                ChangeEvent::new(
                    EntityType::Notification,
                    &notification.id,
                    ChangeKind::Added,
                    &notification,
                )
                .for_auction(notification.auction_id),
            );
        } else {
            debug!("{:<12} --> {} already stored", "Notify", notification.id);
        }
        Ok(created)
    }

    /// Fan-out after a committed write: failures are logged, not returned.
    pub async fn notify_best_effort(&self, requests: Vec<NotificationRequest>) -> usize {
        let mut created = 0;
        for request in requests {
            let id = request.id();
            match self.notify(request).await {
                Ok(true) => created += 1,
                Ok(false) => {}
                Err(e) => warn!("{:<12} --> {} not stored: {}", "Notify", id, e),
            }
        }
        created
    }

    /// Marks one of `recipient_id`'s notifications read; a no-op when it
    /// already is.
    pub async fn mark_read(&self, recipient_id: &str, id: &str) -> CoreResult<Notification> {
        let mut notification = match self.store.get_notification(id).await? {
            Some(n) if n.recipient_id == recipient_id => n,
            _ => return Err(CoreError::NotificationNotFound(id.to_string())),
        };

        let flipped = retry_on_conflict("mark_read", || self.store.mark_notification_read(id))
            .await?
            .ok_or_else(|| CoreError::NotificationNotFound(id.to_string()))?;

        notification.read = true;
        if flipped {
            self.live_sync.publish(
                ChangeEvent::new(
                    EntityType::Notification,
                    id,
                    ChangeKind::Modified,
                    &notification,
                )
                .for_auction(notification.auction_id),
            );
        }
        Ok(notification)
    }

    /// Returns the number of notifications this call flipped.
    pub async fn mark_all_read(&self, recipient_id: &str) -> CoreResult<u64> {
        let flipped = retry_on_conflict("mark_all_read", || {
            self.store.mark_all_notifications_read(recipient_id)
        })
        .await?;
        debug!(
            "{:<12} --> {} marked {} read",
            "Notify", recipient_id, flipped
        );
        Ok(flipped)
    }

    pub async fn list(&self, recipient_id: &str) -> CoreResult<Vec<Notification>> {
        Ok(self.store.list_notifications(recipient_id).await?)
    }

    pub async fn unread_count(&self, recipient_id: &str) -> CoreResult<usize> {
        let notifications = self.store.list_notifications(recipient_id).await?;
        Ok(notifications.iter().filter(|n| !n.read).count())
    }
}

// endregion: --- Dispatcher

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::live_sync::BroadcastLiveSync;
    use crate::notification::model::NotificationType;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn dispatcher() -> (Arc<MemoryStore>, NotificationDispatcher) {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = NotificationDispatcher::new(
            store.clone(),
            Arc::new(ManualClock::new(Utc::now())),
            Arc::new(BroadcastLiveSync::default()),
        );
        (store, dispatcher)
    }

    fn join_request() -> NotificationRequest {
        NotificationRequest::new("owner", 1, NotificationType::Join, "joined".into())
            .participant("u1")
            .from_user("u1")
    }

    #[tokio::test]
    async fn in_flight_slot_is_released_by_the_last_caller() {
        let slots: Slots = Mutex::new(HashMap::new());
        let first = InFlight::enter(&slots, "a");
        let second = InFlight::enter(&slots, "a");
        assert!(Arc::ptr_eq(&first.slot, &second.slot));

        drop(first);
        assert!(slots.lock().contains_key("a"));
        drop(second);
        assert!(slots.lock().is_empty());
    }

    #[tokio::test]
    async fn duplicate_waits_and_stores_after_a_failed_first_caller() {
        let (store, dispatcher) = dispatcher();
        let id = join_request().id();

        // hold the turn as a first caller that ends up storing nothing
        let holder = InFlight::enter(&dispatcher.in_flight, &id);
        let turn = holder.slot.lock().await;

        let duplicate = dispatcher.notify(join_request());
        tokio::pin!(duplicate);
        tokio::select! {
            _ = &mut duplicate => panic!("duplicate returned while the first caller held the turn"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(20)) => {}
        }

        drop(turn);
        drop(holder);
        assert!(duplicate.await.unwrap());
        assert_eq!(store.notification_count(), 1);
        assert!(dispatcher.in_flight.lock().is_empty());
    }

    #[tokio::test]
    async fn second_notify_with_same_key_is_a_no_op() {
        let (store, dispatcher) = dispatcher();
        assert!(dispatcher.notify(join_request()).await.unwrap());
        assert!(!dispatcher.notify(join_request()).await.unwrap());
        assert_eq!(store.notification_count(), 1);
    }

    #[tokio::test]
    async fn mark_read_is_idempotent_and_scoped_to_recipient() {
        let (_, dispatcher) = dispatcher();
        dispatcher.notify(join_request()).await.unwrap();
        let id = join_request().id();

        let err = dispatcher.mark_read("someone-else", &id).await.unwrap_err();
        assert_eq!(err.code(), "NOTIFICATION_NOT_FOUND");

        assert!(dispatcher.mark_read("owner", &id).await.unwrap().read);
        assert!(dispatcher.mark_read("owner", &id).await.unwrap().read);
        assert_eq!(dispatcher.unread_count("owner").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn mark_all_read_counts_only_flips() {
        let (_, dispatcher) = dispatcher();
        dispatcher.notify(join_request()).await.unwrap();
        dispatcher
            .notify(NotificationRequest::new(
                "owner",
                1,
                NotificationType::CreateAuction,
                "created".into(),
            ))
            .await
            .unwrap();

        assert_eq!(dispatcher.mark_all_read("owner").await.unwrap(), 2);
        assert_eq!(dispatcher.mark_all_read("owner").await.unwrap(), 0);
    }
}
