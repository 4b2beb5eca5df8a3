//! In-memory read models of every collection.
//!
//! [`ReadModelCache`] keeps one ordered snapshot per collection in a
//! `tokio::sync::watch` channel. [`ReadModelCache::spawn_sync`] refreshes the
//! snapshots a change event touches; a lagging subscriber reloads everything.

use metrics::counter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::entities::{
    brand, device_model, repair_part_usage, repair_ticket, spare_part, workshop_settings,
};
use crate::errors::ServiceError;
use crate::events::Collection;
use crate::store::Store;

/// Ordered snapshot of one collection with change notification.
#[derive(Debug)]
pub struct ReadModel<T> {
    tx: watch::Sender<Arc<Vec<T>>>,
}

impl<T: Clone + Send + Sync + 'static> ReadModel<T> {
    fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(Vec::new()));
        Self { tx }
    }

    fn replace(&self, records: Vec<T>) {
        self.tx.send_replace(Arc::new(records));
    }

    /// Receiver that observes every future refresh.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<T>>> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> Arc<Vec<T>> {
        Arc::clone(&self.tx.borrow())
    }
}

pub struct ReadModelCache {
    store: Store,
    warmed: AtomicBool,
    pub brands: ReadModel<brand::Model>,
    pub device_models: ReadModel<device_model::Model>,
    pub spare_parts: ReadModel<spare_part::Model>,
    pub tickets: ReadModel<repair_ticket::Model>,
    pub part_usages: ReadModel<repair_part_usage::Model>,
    pub settings: ReadModel<workshop_settings::Model>,
}

impl ReadModelCache {
    pub fn new(store: Store) -> Arc<Self> {
        Arc::new(Self {
            store,
            warmed: AtomicBool::new(false),
            brands: ReadModel::new(),
            device_models: ReadModel::new(),
            spare_parts: ReadModel::new(),
            tickets: ReadModel::new(),
            part_usages: ReadModel::new(),
            settings: ReadModel::new(),
        })
    }

    pub fn is_warm(&self) -> bool {
        self.warmed.load(Ordering::Acquire)
    }

    /// Reloads one collection from the store.
    pub async fn refresh(&self, collection: Collection) -> Result<(), ServiceError> {
        match collection {
            Collection::Brands => self.brands.replace(self.store.brands().await?),
            Collection::DeviceModels => self.device_models.replace(self.store.device_models().await?),
            Collection::SpareParts => self.spare_parts.replace(self.store.spare_parts().await?),
            Collection::RepairTickets => self.tickets.replace(self.store.tickets().await?),
            Collection::RepairPartUsages => {
                self.part_usages.replace(self.store.all_part_usages().await?)
            }
            Collection::WorkshopSettings => self
                .settings
                .replace(self.store.settings().await?.into_iter().collect()),
        }
        counter!("repairdesk_cache.refreshes", 1, "collection" => collection.to_string());
        debug!(collection = %collection, "Read model refreshed");
        Ok(())
    }

    /// Loads every collection.
    pub async fn warm(&self) -> Result<(), ServiceError> {
        for collection in Collection::ALL {
            self.refresh(collection).await?;
        }
        self.warmed.store(true, Ordering::Release);
        info!("Read model cache warmed");
        Ok(())
    }

    /// Follows the store's change feed until it closes. The subscription is
    /// taken before the task starts, so no commit after this call is missed.
    pub fn spawn_sync(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.store.subscribe();
        let cache = Arc::clone(self);

        tokio::spawn(async move {
            if let Err(e) = cache.warm().await {
                error!(error = %e, "Initial read model load failed");
            }

            loop {
                match events.recv().await {
                    Ok(event) => {
                        for collection in &event.collections {
                            if let Err(e) = cache.refresh(*collection).await {
                                error!(collection = %collection, error = %e, "Read model refresh failed");
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Change feed lagged; reloading every read model");
                        if let Err(e) = cache.warm().await {
                            error!(error = %e, "Read model reload failed");
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!("Change feed closed; read model sync stopped");
                        break;
                    }
                }
            }
        })
    }
}
