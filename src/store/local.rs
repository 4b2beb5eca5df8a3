//! Local JSON backend.
//!
//! Every collection lives in `<dir>/<collection>.json` as an array ordered by
//! creation time. Files are independent, so a batch is first written to
//! `journal.json` as after-images of every collection it touches, then the
//! collection files are replaced one by one (tickets, usages, spare parts,
//! then the rest) and the journal is removed. A leftover journal is replayed
//! on open and before the next commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::batch::{apply_stock_delta, WriteBatch, WriteOp};
use super::{LedgerSnapshot, LedgerStore};
use crate::config::StorageBackend;
use crate::entities::{
    brand, device_model, repair_part_usage, repair_ticket, sort_by_creation, spare_part,
    workshop_settings, Record,
};
use crate::errors::ServiceError;
use crate::events::Collection;

const JOURNAL_FILE: &str = "journal.json";

/// Tickets land before usages and usages before stock, so an interrupted
/// commit can leave stock too high but never decremented for a missing ticket.
const WRITE_ORDER: [Collection; 6] = [
    Collection::RepairTickets,
    Collection::RepairPartUsages,
    Collection::SpareParts,
    Collection::Brands,
    Collection::DeviceModels,
    Collection::WorkshopSettings,
];

#[derive(Debug, Serialize, Deserialize)]
struct Journal {
    batch_id: Uuid,
    written_at: DateTime<Utc>,
    entries: Vec<JournalEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalEntry {
    collection: Collection,
    records: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
struct Collections {
    brands: HashMap<Uuid, brand::Model>,
    device_models: HashMap<Uuid, device_model::Model>,
    spare_parts: HashMap<Uuid, spare_part::Model>,
    tickets: HashMap<Uuid, repair_ticket::Model>,
    part_usages: HashMap<Uuid, repair_part_usage::Model>,
    settings: HashMap<Uuid, workshop_settings::Model>,
}

fn ordered<T: Record>(records: &HashMap<Uuid, T>) -> Vec<T> {
    let mut list: Vec<T> = records.values().cloned().collect();
    sort_by_creation(&mut list);
    list
}

fn keyed<T: Record + DeserializeOwned>(
    value: serde_json::Value,
) -> Result<HashMap<Uuid, T>, serde_json::Error> {
    let list: Vec<T> = serde_json::from_value(value)?;
    Ok(list.into_iter().map(|record| (record.id(), record)).collect())
}

impl Collections {
    fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::PutBrand(model) => {
                self.brands.insert(model.id, model);
            }
            WriteOp::DeleteBrand(id) => {
                self.brands.remove(&id);
            }
            WriteOp::PutDeviceModel(model) => {
                self.device_models.insert(model.id, model);
            }
            WriteOp::DeleteDeviceModel(id) => {
                self.device_models.remove(&id);
            }
            WriteOp::PutSparePart(model) => {
                self.spare_parts.insert(model.id, model);
            }
            WriteOp::DeleteSparePart(id) => {
                self.spare_parts.remove(&id);
            }
            WriteOp::AdjustStock {
                spare_part_id,
                delta,
                at,
            } => match self.spare_parts.get_mut(&spare_part_id) {
                Some(part) => {
                    part.quantity = apply_stock_delta(part.quantity, delta);
                    part.updated_at = at;
                }
                None => {
                    warn!(spare_part_id = %spare_part_id, delta, "Stock adjustment for missing spare part skipped");
                }
            },
            WriteOp::PutTicket(model) => {
                self.tickets.insert(model.id, model);
            }
            WriteOp::DeleteTicket(id) => {
                self.tickets.remove(&id);
            }
            WriteOp::PutPartUsage(model) => {
                self.part_usages.insert(model.id, model);
            }
            WriteOp::DeletePartUsages { repair_id } => {
                self.part_usages
                    .retain(|_, usage| usage.repair_id != repair_id);
            }
            WriteOp::PutSettings(model) => {
                self.settings.insert(model.id, model);
            }
        }
    }

    fn document(&self, collection: Collection) -> Result<serde_json::Value, serde_json::Error> {
        match collection {
            Collection::Brands => serde_json::to_value(ordered(&self.brands)),
            Collection::DeviceModels => serde_json::to_value(ordered(&self.device_models)),
            Collection::SpareParts => serde_json::to_value(ordered(&self.spare_parts)),
            Collection::RepairTickets => serde_json::to_value(ordered(&self.tickets)),
            Collection::RepairPartUsages => serde_json::to_value(ordered(&self.part_usages)),
            Collection::WorkshopSettings => serde_json::to_value(ordered(&self.settings)),
        }
    }

    fn load(
        &mut self,
        collection: Collection,
        value: serde_json::Value,
    ) -> Result<(), serde_json::Error> {
        match collection {
            Collection::Brands => self.brands = keyed(value)?,
            Collection::DeviceModels => self.device_models = keyed(value)?,
            Collection::SpareParts => self.spare_parts = keyed(value)?,
            Collection::RepairTickets => self.tickets = keyed(value)?,
            Collection::RepairPartUsages => self.part_usages = keyed(value)?,
            Collection::WorkshopSettings => self.settings = keyed(value)?,
        }
        Ok(())
    }
}

/// File-per-collection backend with a write-ahead journal.
#[derive(Debug)]
pub struct LocalStore {
    dir: PathBuf,
    data: RwLock<Collections>,
    commit_lock: Mutex<()>,
}

impl LocalStore {
    /// Opens (creating if needed) the data directory, loads every collection
    /// and replays a journal left by an interrupted commit.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, ServiceError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|e| {
            ServiceError::StorageError(format!("cannot create {}: {}", dir.display(), e))
        })?;

        let mut data = Collections::default();
        for collection in Collection::ALL {
            let path = collection_path(&dir, collection);
            if let Some(bytes) = read_optional(&path).await? {
                let value: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| {
                    ServiceError::SerializationError(format!("{}: {}", path.display(), e))
                })?;
                data.load(collection, value)?;
            }
        }

        let store = Self {
            dir,
            data: RwLock::new(data),
            commit_lock: Mutex::new(()),
        };

        if store.replay_journal().await? {
            info!(dir = %store.dir.display(), "Recovered interrupted commit from journal");
        }
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }

    /// Rewrites the collections recorded in a leftover journal. Returns
    /// whether a journal was found. Replay is idempotent.
    async fn replay_journal(&self) -> Result<bool, ServiceError> {
        let journal_path = self.journal_path();
        let Some(bytes) = read_optional(&journal_path).await? else {
            return Ok(false);
        };
        let journal: Journal = serde_json::from_slice(&bytes)?;
        warn!(batch_id = %journal.batch_id, written_at = %journal.written_at, "Replaying local journal");

        {
            let mut data = self.data.write().await;
            for entry in &journal.entries {
                data.load(entry.collection, entry.records.clone())?;
            }
        }

        for entry in &journal.entries {
            let bytes = serde_json::to_vec_pretty(&entry.records)?;
            write_atomic(&collection_path(&self.dir, entry.collection), &bytes).await?;
        }

        fs::remove_file(&journal_path).await?;
        Ok(true)
    }
}

fn collection_path(dir: &Path, collection: Collection) -> PathBuf {
    dir.join(format!("{}.json", collection))
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, ServiceError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ServiceError::StorageError(format!(
            "cannot read {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Writes to a sibling temp file, syncs it and renames it over `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&tmp, path).await
}

#[async_trait]
impl LedgerStore for LocalStore {
    fn kind(&self) -> StorageBackend {
        StorageBackend::Local
    }

    async fn brands(&self) -> Result<Vec<brand::Model>, ServiceError> {
        Ok(ordered(&self.data.read().await.brands))
    }

    async fn brand(&self, id: Uuid) -> Result<Option<brand::Model>, ServiceError> {
        Ok(self.data.read().await.brands.get(&id).cloned())
    }

    async fn device_models(&self) -> Result<Vec<device_model::Model>, ServiceError> {
        Ok(ordered(&self.data.read().await.device_models))
    }

    async fn device_model(&self, id: Uuid) -> Result<Option<device_model::Model>, ServiceError> {
        Ok(self.data.read().await.device_models.get(&id).cloned())
    }

    async fn spare_parts(&self) -> Result<Vec<spare_part::Model>, ServiceError> {
        Ok(ordered(&self.data.read().await.spare_parts))
    }

    async fn spare_part(&self, id: Uuid) -> Result<Option<spare_part::Model>, ServiceError> {
        Ok(self.data.read().await.spare_parts.get(&id).cloned())
    }

    async fn tickets(&self) -> Result<Vec<repair_ticket::Model>, ServiceError> {
        Ok(ordered(&self.data.read().await.tickets))
    }

    async fn ticket(&self, id: Uuid) -> Result<Option<repair_ticket::Model>, ServiceError> {
        Ok(self.data.read().await.tickets.get(&id).cloned())
    }

    async fn part_usages(
        &self,
        repair_id: Uuid,
    ) -> Result<Vec<repair_part_usage::Model>, ServiceError> {
        let data = self.data.read().await;
        let mut usages: Vec<_> = data
            .part_usages
            .values()
            .filter(|usage| usage.repair_id == repair_id)
            .cloned()
            .collect();
        sort_by_creation(&mut usages);
        Ok(usages)
    }

    async fn all_part_usages(&self) -> Result<Vec<repair_part_usage::Model>, ServiceError> {
        Ok(ordered(&self.data.read().await.part_usages))
    }

    async fn settings(&self) -> Result<Option<workshop_settings::Model>, ServiceError> {
        Ok(ordered(&self.data.read().await.settings).into_iter().next())
    }

    async fn ledger_snapshot(&self) -> Result<LedgerSnapshot, ServiceError> {
        let data = self.data.read().await;
        Ok(LedgerSnapshot {
            tickets: ordered(&data.tickets),
            part_usages: ordered(&data.part_usages),
            brands: ordered(&data.brands),
            device_models: ordered(&data.device_models),
            spare_parts: ordered(&data.spare_parts),
        })
    }

    async fn ticket_snapshot(&self, id: Uuid) -> Result<Option<LedgerSnapshot>, ServiceError> {
        let data = self.data.read().await;
        let Some(ticket) = data.tickets.get(&id).cloned() else {
            return Ok(None);
        };
        let mut part_usages: Vec<_> = data
            .part_usages
            .values()
            .filter(|usage| usage.repair_id == id)
            .cloned()
            .collect();
        sort_by_creation(&mut part_usages);
        let spare_parts = part_usages
            .iter()
            .filter_map(|usage| data.spare_parts.get(&usage.spare_part_id).cloned())
            .collect();

        Ok(Some(LedgerSnapshot {
            brands: data.brands.get(&ticket.device_brand_id).cloned().into_iter().collect(),
            device_models: data
                .device_models
                .get(&ticket.device_model_id)
                .cloned()
                .into_iter()
                .collect(),
            tickets: vec![ticket],
            part_usages,
            spare_parts,
        }))
    }

    #[instrument(skip(self, batch), fields(batch_id = %batch.id, ops = batch.len()))]
    async fn commit(&self, batch: WriteBatch) -> Result<(), ServiceError> {
        let _guard = self.commit_lock.lock().await;

        // An earlier batch may still be pending in the journal
        self.replay_journal().await.map_err(|e| {
            ServiceError::StorageError(format!("pending journal could not be replayed: {}", e))
        })?;

        let batch_id = batch.id;
        let touched = batch.collections();

        let mut staged = self.data.read().await.clone();
        for op in batch.into_ops() {
            staged.apply(op);
        }

        let mut entries = Vec::with_capacity(touched.len());
        let mut files = Vec::with_capacity(touched.len());
        for collection in WRITE_ORDER.into_iter().filter(|c| touched.contains(c)) {
            let records = staged.document(collection)?;
            files.push((collection, serde_json::to_vec_pretty(&records)?));
            entries.push(JournalEntry {
                collection,
                records,
            });
        }

        let journal = Journal {
            batch_id,
            written_at: Utc::now(),
            entries,
        };
        let journal_bytes = serde_json::to_vec(&journal)?;
        write_atomic(&self.journal_path(), &journal_bytes)
            .await
            .map_err(|e| ServiceError::StorageError(format!("journal write failed: {}", e)))?;

        // The batch is durable from here on
        *self.data.write().await = staged;

        for (collection, bytes) in files {
            let path = collection_path(&self.dir, collection);
            if let Err(e) = write_atomic(&path, &bytes).await {
                error!(batch_id = %batch_id, collection = %collection, error = %e, "Collection write failed; journal kept for replay");
                return Err(ServiceError::CommitPending(format!(
                    "batch {} not yet written to {}: {}",
                    batch_id, collection, e
                )));
            }
        }

        if let Err(e) = fs::remove_file(self.journal_path()).await {
            // Every file is written; replaying this journal later is harmless
            warn!(batch_id = %batch_id, error = %e, "Could not remove journal");
        }

        debug!(batch_id = %batch_id, "Local batch committed");
        Ok(())
    }

    async fn ping(&self) -> Result<(), ServiceError> {
        let metadata = fs::metadata(&self.dir).await?;
        if metadata.is_dir() {
            Ok(())
        } else {
            Err(ServiceError::StorageError(format!(
                "{} is not a directory",
                self.dir.display()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::TicketStatus;
    use rust_decimal_macros::dec;

    fn part(quantity: i32) -> spare_part::Model {
        let now = Utc::now();
        spare_part::Model {
            id: Uuid::new_v4(),
            name: "Galaxy S21 battery".into(),
            part_type: "battery".into(),
            screen_quality: None,
            brand_id: Uuid::new_v4(),
            model_id: Uuid::new_v4(),
            quantity,
            purchase_price: dec!(12),
            selling_price: dec!(30),
            low_stock_alert: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn ticket() -> repair_ticket::Model {
        let now = Utc::now();
        repair_ticket::Model {
            id: Uuid::new_v4(),
            customer_name: "Amina".into(),
            customer_phone: "0550 12 34 56".into(),
            device_brand_id: Uuid::new_v4(),
            device_model_id: Uuid::new_v4(),
            issue_type: "battery".into(),
            description: "drains overnight".into(),
            labor_cost: dec!(20),
            total_cost: dec!(50),
            profit: dec!(38),
            status: TicketStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    fn consume(ticket: &repair_ticket::Model, part: &spare_part::Model, qty: i32) -> WriteBatch {
        let mut batch = WriteBatch::new();
        batch
            .push(WriteOp::PutTicket(ticket.clone()))
            .push(WriteOp::PutPartUsage(repair_part_usage::Model {
                id: Uuid::new_v4(),
                repair_id: ticket.id,
                spare_part_id: part.id,
                quantity_used: qty,
                price_at_time: part.selling_price,
                created_at: Utc::now(),
            }))
            .push(WriteOp::AdjustStock {
                spare_part_id: part.id,
                delta: -qty,
                at: Utc::now(),
            });
        batch
    }

    async fn seeded(dir: &Path, part: &spare_part::Model) -> LocalStore {
        let store = LocalStore::open(dir).await.unwrap();
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutSparePart(part.clone()));
        store.commit(batch).await.unwrap();
        store
    }

    #[tokio::test]
    async fn ticket_snapshot_holds_only_what_the_ticket_references() {
        let dir = tempfile::tempdir().unwrap();
        let used = part(10);
        let other = part(4);
        let ticket = ticket();

        let store = seeded(dir.path(), &used).await;
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutSparePart(other.clone()));
        store.commit(batch).await.unwrap();
        store.commit(consume(&ticket, &used, 2)).await.unwrap();

        let snapshot = store.ticket_snapshot(ticket.id).await.unwrap().unwrap();
        assert_eq!(snapshot.tickets.len(), 1);
        assert_eq!(snapshot.part_usages.len(), 1);
        assert_eq!(snapshot.spare_parts.len(), 1);
        assert_eq!(snapshot.spare_parts[0].quantity, 8);
        // Brand and model were never written
        assert!(snapshot.brands.is_empty());
        assert!(snapshot.device_models.is_empty());

        let full = store.ledger_snapshot().await.unwrap();
        assert_eq!(full.spare_parts.len(), 2);
        assert!(store.ticket_snapshot(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn committed_batches_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let part = part(10);
        let ticket = ticket();

        let store = seeded(dir.path(), &part).await;
        store.commit(consume(&ticket, &part, 3)).await.unwrap();
        drop(store);

        let reopened = LocalStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.spare_part(part.id).await.unwrap().unwrap().quantity, 7);
        assert_eq!(reopened.part_usages(ticket.id).await.unwrap().len(), 1);
        assert!(reopened.ticket(ticket.id).await.unwrap().is_some());
        assert!(!dir.path().join(JOURNAL_FILE).exists());
    }

    #[tokio::test]
    async fn journal_write_failure_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let part = part(10);
        let store = seeded(dir.path(), &part).await;

        // A directory where the temp file should go makes the journal write fail
        std::fs::create_dir(dir.path().join("journal.json.tmp")).unwrap();

        let err = store.commit(consume(&ticket(), &part, 3)).await.unwrap_err();
        assert!(matches!(err, ServiceError::StorageError(_)));
        assert_eq!(store.spare_part(part.id).await.unwrap().unwrap().quantity, 10);
        assert!(store.tickets().await.unwrap().is_empty());
        assert!(!dir.path().join("repair_tickets.json").exists());
    }

    #[tokio::test]
    async fn partial_write_reports_pending_and_replays_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let part = part(10);
        let ticket = ticket();
        let store = seeded(dir.path(), &part).await;

        let blocker = dir.path().join("spare_parts.json.tmp");
        std::fs::create_dir(&blocker).unwrap();

        let err = store.commit(consume(&ticket, &part, 3)).await.unwrap_err();
        assert!(matches!(err, ServiceError::CommitPending(_)));

        // Readers already see the batch
        assert_eq!(store.spare_part(part.id).await.unwrap().unwrap().quantity, 7);

        // Tickets and usages reached disk before the stock file
        let on_disk: Vec<spare_part::Model> =
            serde_json::from_slice(&std::fs::read(dir.path().join("spare_parts.json")).unwrap())
                .unwrap();
        assert_eq!(on_disk[0].quantity, 10);
        let tickets_on_disk: Vec<repair_ticket::Model> =
            serde_json::from_slice(&std::fs::read(dir.path().join("repair_tickets.json")).unwrap())
                .unwrap();
        assert_eq!(tickets_on_disk.len(), 1);
        assert!(dir.path().join(JOURNAL_FILE).exists());

        drop(store);
        std::fs::remove_dir(&blocker).unwrap();

        let reopened = LocalStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.spare_part(part.id).await.unwrap().unwrap().quantity, 7);
        assert!(!dir.path().join(JOURNAL_FILE).exists());
        let on_disk: Vec<spare_part::Model> =
            serde_json::from_slice(&std::fs::read(dir.path().join("spare_parts.json")).unwrap())
                .unwrap();
        assert_eq!(on_disk[0].quantity, 7);
    }

    #[tokio::test]
    async fn next_commit_replays_pending_journal_first() {
        let dir = tempfile::tempdir().unwrap();
        let part = part(10);
        let store = seeded(dir.path(), &part).await;

        let blocker = dir.path().join("spare_parts.json.tmp");
        std::fs::create_dir(&blocker).unwrap();
        let first = ticket();
        assert!(store.commit(consume(&first, &part, 3)).await.is_err());
        std::fs::remove_dir(&blocker).unwrap();

        let second = ticket();
        store.commit(consume(&second, &part, 2)).await.unwrap();

        drop(store);
        let reopened = LocalStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.spare_part(part.id).await.unwrap().unwrap().quantity, 5);
        assert_eq!(reopened.tickets().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_part_usages_only_touches_one_ticket() {
        let dir = tempfile::tempdir().unwrap();
        let part = part(10);
        let store = seeded(dir.path(), &part).await;
        let (a, b) = (ticket(), ticket());
        store.commit(consume(&a, &part, 1)).await.unwrap();
        store.commit(consume(&b, &part, 1)).await.unwrap();

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::DeletePartUsages { repair_id: a.id });
        store.commit(batch).await.unwrap();

        assert!(store.part_usages(a.id).await.unwrap().is_empty());
        assert_eq!(store.part_usages(b.id).await.unwrap().len(), 1);
        store.ping().await.unwrap();
    }
}
