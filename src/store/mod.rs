//! Persistence behind one capability trait.
//!
//! [`LedgerStore`] is implemented by [`SqlStore`] (sea-orm) and [`LocalStore`]
//! (JSON files). Both return every collection ordered by creation time and
//! commit a [`WriteBatch`] as one unit. [`Store`] wraps the selected backend
//! and publishes a [`ChangeEvent`] after each commit.

use async_trait::async_trait;
use metrics::counter;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{AppConfig, StorageBackend};
use crate::entities::{
    brand, device_model, repair_part_usage, repair_ticket, spare_part, workshop_settings,
};
use crate::errors::ServiceError;
use crate::events::{ChangeEvent, ChangeFeed};

pub mod batch;
pub mod local;
pub mod sql;

pub use batch::{apply_stock_delta, WriteBatch, WriteOp};
pub use local::LocalStore;
pub use sql::SqlStore;

/// Tickets together with every record their views reference, read at one
/// point in time: a commit is either fully visible or not at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerSnapshot {
    pub tickets: Vec<repair_ticket::Model>,
    pub part_usages: Vec<repair_part_usage::Model>,
    pub brands: Vec<brand::Model>,
    pub device_models: Vec<device_model::Model>,
    pub spare_parts: Vec<spare_part::Model>,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    fn kind(&self) -> StorageBackend;

    async fn brands(&self) -> Result<Vec<brand::Model>, ServiceError>;
    async fn brand(&self, id: Uuid) -> Result<Option<brand::Model>, ServiceError>;

    async fn device_models(&self) -> Result<Vec<device_model::Model>, ServiceError>;
    async fn device_model(&self, id: Uuid) -> Result<Option<device_model::Model>, ServiceError>;

    async fn spare_parts(&self) -> Result<Vec<spare_part::Model>, ServiceError>;
    async fn spare_part(&self, id: Uuid) -> Result<Option<spare_part::Model>, ServiceError>;

    async fn tickets(&self) -> Result<Vec<repair_ticket::Model>, ServiceError>;
    async fn ticket(&self, id: Uuid) -> Result<Option<repair_ticket::Model>, ServiceError>;

    /// Usages of one ticket, oldest first.
    async fn part_usages(
        &self,
        repair_id: Uuid,
    ) -> Result<Vec<repair_part_usage::Model>, ServiceError>;
    async fn all_part_usages(&self) -> Result<Vec<repair_part_usage::Model>, ServiceError>;

    async fn settings(&self) -> Result<Option<workshop_settings::Model>, ServiceError>;

    /// Every ticket with its usages and references.
    async fn ledger_snapshot(&self) -> Result<LedgerSnapshot, ServiceError>;

    /// One ticket with its usages and the brand, model and spare parts they
    /// point at. `None` when the ticket does not exist.
    async fn ticket_snapshot(&self, id: Uuid) -> Result<Option<LedgerSnapshot>, ServiceError>;

    /// Applies every op of the batch or none of them. The local backend may
    /// instead return `CommitPending` once the batch is durable in its journal.
    async fn commit(&self, batch: WriteBatch) -> Result<(), ServiceError>;

    async fn ping(&self) -> Result<(), ServiceError>;
}

/// Selected backend plus its change feed.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn LedgerStore>,
    feed: ChangeFeed,
}

impl Store {
    pub fn new(backend: Arc<dyn LedgerStore>) -> Self {
        Self::with_feed(backend, ChangeFeed::default())
    }

    pub fn with_feed(backend: Arc<dyn LedgerStore>, feed: ChangeFeed) -> Self {
        Self { backend, feed }
    }

    pub fn backend(&self) -> Arc<dyn LedgerStore> {
        Arc::clone(&self.backend)
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.feed.subscribe()
    }

    /// Commits through the backend, then notifies subscribers.
    pub async fn commit(&self, batch: WriteBatch) -> Result<(), ServiceError> {
        if batch.is_empty() {
            return Ok(());
        }

        let batch_id = batch.id;
        let collections = batch.collections();
        debug!(batch_id = %batch_id, ops = batch.len(), "Committing write batch");

        match self.backend.commit(batch).await {
            Ok(()) => {
                counter!("repairdesk_store.commits", 1);
                self.feed.publish(ChangeEvent::new(batch_id, collections));
                Ok(())
            }
            Err(ServiceError::CommitPending(reason)) => {
                // Readers already see the batch; only the files lag behind.
                counter!("repairdesk_store.commits_pending", 1);
                warn!(batch_id = %batch_id, reason = %reason, "Batch committed to journal only");
                self.feed.publish(ChangeEvent::new(batch_id, collections));
                Err(ServiceError::CommitPending(reason))
            }
            Err(e) => {
                counter!("repairdesk_store.commit_failures", 1);
                Err(e)
            }
        }
    }
}

impl Deref for Store {
    type Target = dyn LedgerStore;

    fn deref(&self) -> &Self::Target {
        self.backend.as_ref()
    }
}

/// Opens the backend named by the configuration.
pub async fn open_store(config: &AppConfig) -> Result<Store, ServiceError> {
    let backend: Arc<dyn LedgerStore> = match config.storage_backend {
        StorageBackend::Database => {
            let pool = crate::db::establish_connection_from_app_config(config).await?;
            if config.auto_migrate {
                crate::db::run_migrations(&pool).await?;
            }
            Arc::new(SqlStore::new(pool))
        }
        StorageBackend::Local => Arc::new(LocalStore::open(config.local_data_dir()).await?),
    };

    info!(backend = %backend.kind(), "Ledger store opened");
    Ok(Store::new(backend))
}
