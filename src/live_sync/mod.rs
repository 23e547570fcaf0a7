//! Change fan-out to external observers.
//!
//! Components publish a [`ChangeEvent`] after each committed write; observers
//! hold a [`Subscription`] stream and stop receiving when they drop it.

// region:    --- Imports
use crate::config::LIVE_SYNC_CAPACITY;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
// endregion: --- Imports

// region:    --- Change Event

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityType {
    Auction,
    Bid,
    Participant,
    Notification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub kind: ChangeKind,
    /// Auction the entity belongs to, for per-auction filtering.
    pub auction_id: Option<i64>,
    pub payload: serde_json::Value,
}

impl ChangeEvent {
    pub fn new<T: Serialize>(
        entity_type: EntityType,
        entity_id: impl ToString,
        kind: ChangeKind,
        payload: &T,
    ) -> Self {
        let payload = serde_json::to_value(payload).unwrap_or_else(|e| {
            warn!("{:<12} --> payload not serializable: {}", "LiveSync", e);
            serde_json::Value::Null
        });
        Self {
            entity_type,
            entity_id: entity_id.to_string(),
            kind,
            auction_id: None,
            payload,
        }
    }

    pub fn for_auction(mut self, auction_id: i64) -> Self {
        self.auction_id = Some(auction_id);
        self
    }
}

// endregion: --- Change Event

// region:    --- Filter

/// Every present field must match; the default filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChangeFilter {
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<String>,
    pub auction_id: Option<i64>,
}

impl ChangeFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn entity(entity_type: EntityType) -> Self {
        Self {
            entity_type: Some(entity_type),
            ..Self::default()
        }
    }

    pub fn auction(auction_id: i64) -> Self {
        Self {
            auction_id: Some(auction_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        self.entity_type.map_or(true, |t| t == event.entity_type)
            && self
                .entity_id
                .as_ref()
                .map_or(true, |id| *id == event.entity_id)
            && self
                .auction_id
                .map_or(true, |id| event.auction_id == Some(id))
    }
}

// endregion: --- Filter

// region:    --- LiveSync

/// Stream of matching events; dropping it cancels the subscription.
pub type Subscription = BoxStream<'static, ChangeEvent>;

pub trait LiveSync: Send + Sync {
    fn publish(&self, event: ChangeEvent);
    fn subscribe(&self, filter: ChangeFilter) -> Subscription;
}

/// In-process fan-out over a tokio broadcast channel.
pub struct BroadcastLiveSync {
    sender: broadcast::Sender<ChangeEvent>,
}

impl Default for BroadcastLiveSync {
    fn default() -> Self {
        Self::new(LIVE_SYNC_CAPACITY)
    }
}

impl BroadcastLiveSync {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl LiveSync for BroadcastLiveSync {
    fn publish(&self, event: ChangeEvent) {
        debug!(
            "{:<12} --> {:?} {:?} {}",
            "LiveSync", event.kind, event.entity_type, event.entity_id
        );
        // no receivers is not an error
        let _ = self.sender.send(event);
    }

    fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        let receiver = self.sender.subscribe();
        stream::unfold((receiver, filter), |(mut receiver, filter)| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) if filter.matches(&event) => {
                        return Some((event, (receiver, filter)));
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            "{:<12} --> subscriber lagged, skipped {} events",
                            "LiveSync", skipped
                        );
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}

// endregion: --- LiveSync
