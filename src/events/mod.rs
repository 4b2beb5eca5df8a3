use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

/// Default buffer of the change feed; slower subscribers see `Lagged` and resync.
pub const DEFAULT_FEED_CAPACITY: usize = 256;

/// The stored collections a change can touch.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Collection {
    Brands,
    DeviceModels,
    SpareParts,
    RepairTickets,
    RepairPartUsages,
    WorkshopSettings,
}

impl Collection {
    pub const ALL: [Collection; 6] = [
        Collection::Brands,
        Collection::DeviceModels,
        Collection::SpareParts,
        Collection::RepairTickets,
        Collection::RepairPartUsages,
        Collection::WorkshopSettings,
    ];
}

/// Published once per committed batch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub batch_id: Uuid,
    pub collections: BTreeSet<Collection>,
    pub committed_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(batch_id: Uuid, collections: BTreeSet<Collection>) -> Self {
        Self {
            batch_id,
            collections,
            committed_at: Utc::now(),
        }
    }

    pub fn touches(&self, collection: Collection) -> bool {
        self.collections.contains(&collection)
    }
}

/// Subscribe-to-live-changes channel shared by the store and its readers.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event; returns how many subscribers received it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                trace!(batch_id = %event.batch_id, "No subscribers for change event");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}
