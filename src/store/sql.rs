use async_trait::async_trait;
use sea_orm::{
    AccessMode, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, DbBackend, EntityTrait, IntoActiveModel, IsolationLevel, QueryFilter,
    QueryOrder, Set, TransactionError, TransactionTrait,
};
use tracing::{instrument, warn};
use uuid::Uuid;

use super::batch::{apply_stock_delta, WriteBatch, WriteOp};
use super::{LedgerSnapshot, LedgerStore};
use crate::config::StorageBackend;
use crate::entities::{
    brand, device_model, repair_part_usage, repair_ticket, spare_part, workshop_settings,
};
use crate::errors::ServiceError;

/// Upsert keyed by primary key: update when the row exists, insert otherwise.
macro_rules! upsert {
    ($txn:expr, $module:ident, $model:expr) => {{
        let model: $module::Model = $model;
        let exists = $module::Entity::find_by_id(model.id)
            .one($txn)
            .await?
            .is_some();
        let active = model.into_active_model().reset_all();
        if exists {
            active.update($txn).await?;
        } else {
            active.insert($txn).await?;
        }
    }};
}

/// SQL backend; every batch runs inside one database transaction.
#[derive(Debug, Clone)]
pub struct SqlStore {
    db: DatabaseConnection,
}

impl SqlStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Read-only transaction over one snapshot. SQLite transactions are
    /// serialisable already and take no isolation settings.
    async fn begin_read(&self) -> Result<DatabaseTransaction, ServiceError> {
        let txn = match self.db.get_database_backend() {
            DbBackend::Sqlite => self.db.begin().await?,
            _ => {
                self.db
                    .begin_with_config(
                        Some(IsolationLevel::RepeatableRead),
                        Some(AccessMode::ReadOnly),
                    )
                    .await?
            }
        };
        Ok(txn)
    }
}

async fn all_brands<C: ConnectionTrait>(conn: &C) -> Result<Vec<brand::Model>, ServiceError> {
    Ok(brand::Entity::find()
        .order_by_asc(brand::Column::CreatedAt)
        .order_by_asc(brand::Column::Id)
        .all(conn)
        .await?)
}

async fn all_device_models<C: ConnectionTrait>(
    conn: &C,
) -> Result<Vec<device_model::Model>, ServiceError> {
    Ok(device_model::Entity::find()
        .order_by_asc(device_model::Column::CreatedAt)
        .order_by_asc(device_model::Column::Id)
        .all(conn)
        .await?)
}

async fn all_spare_parts<C: ConnectionTrait>(
    conn: &C,
) -> Result<Vec<spare_part::Model>, ServiceError> {
    Ok(spare_part::Entity::find()
        .order_by_asc(spare_part::Column::CreatedAt)
        .order_by_asc(spare_part::Column::Id)
        .all(conn)
        .await?)
}

async fn all_tickets<C: ConnectionTrait>(
    conn: &C,
) -> Result<Vec<repair_ticket::Model>, ServiceError> {
    Ok(repair_ticket::Entity::find()
        .order_by_asc(repair_ticket::Column::CreatedAt)
        .order_by_asc(repair_ticket::Column::Id)
        .all(conn)
        .await?)
}

async fn usages_of<C: ConnectionTrait>(
    conn: &C,
    repair_id: Uuid,
) -> Result<Vec<repair_part_usage::Model>, ServiceError> {
    Ok(repair_part_usage::Entity::find()
        .filter(repair_part_usage::Column::RepairId.eq(repair_id))
        .order_by_asc(repair_part_usage::Column::CreatedAt)
        .order_by_asc(repair_part_usage::Column::Id)
        .all(conn)
        .await?)
}

async fn all_usages<C: ConnectionTrait>(
    conn: &C,
) -> Result<Vec<repair_part_usage::Model>, ServiceError> {
    Ok(repair_part_usage::Entity::find()
        .order_by_asc(repair_part_usage::Column::CreatedAt)
        .order_by_asc(repair_part_usage::Column::Id)
        .all(conn)
        .await?)
}

async fn apply_op(txn: &DatabaseTransaction, op: WriteOp) -> Result<(), ServiceError> {
    match op {
        WriteOp::PutBrand(model) => upsert!(txn, brand, model),
        WriteOp::DeleteBrand(id) => {
            brand::Entity::delete_by_id(id).exec(txn).await?;
        }
        WriteOp::PutDeviceModel(model) => upsert!(txn, device_model, model),
        WriteOp::DeleteDeviceModel(id) => {
            device_model::Entity::delete_by_id(id).exec(txn).await?;
        }
        WriteOp::PutSparePart(model) => upsert!(txn, spare_part, model),
        WriteOp::DeleteSparePart(id) => {
            spare_part::Entity::delete_by_id(id).exec(txn).await?;
        }
        WriteOp::AdjustStock {
            spare_part_id,
            delta,
            at,
        } => {
            let Some(part) = spare_part::Entity::find_by_id(spare_part_id).one(txn).await? else {
                warn!(spare_part_id = %spare_part_id, delta, "Stock adjustment for missing spare part skipped");
                return Ok(());
            };
            let quantity = apply_stock_delta(part.quantity, delta);
            let mut active: spare_part::ActiveModel = part.into();
            active.quantity = Set(quantity);
            active.updated_at = Set(at);
            active.update(txn).await?;
        }
        WriteOp::PutTicket(model) => upsert!(txn, repair_ticket, model),
        WriteOp::DeleteTicket(id) => {
            repair_ticket::Entity::delete_by_id(id).exec(txn).await?;
        }
        WriteOp::PutPartUsage(model) => upsert!(txn, repair_part_usage, model),
        WriteOp::DeletePartUsages { repair_id } => {
            repair_part_usage::Entity::delete_many()
                .filter(repair_part_usage::Column::RepairId.eq(repair_id))
                .exec(txn)
                .await?;
        }
        WriteOp::PutSettings(model) => upsert!(txn, workshop_settings, model),
    }
    Ok(())
}

#[async_trait]
impl LedgerStore for SqlStore {
    fn kind(&self) -> StorageBackend {
        StorageBackend::Database
    }

    async fn brands(&self) -> Result<Vec<brand::Model>, ServiceError> {
        all_brands(&self.db).await
    }

    async fn brand(&self, id: Uuid) -> Result<Option<brand::Model>, ServiceError> {
        Ok(brand::Entity::find_by_id(id).one(&self.db).await?)
    }

    async fn device_models(&self) -> Result<Vec<device_model::Model>, ServiceError> {
        all_device_models(&self.db).await
    }

    async fn device_model(&self, id: Uuid) -> Result<Option<device_model::Model>, ServiceError> {
        Ok(device_model::Entity::find_by_id(id).one(&self.db).await?)
    }

    async fn spare_parts(&self) -> Result<Vec<spare_part::Model>, ServiceError> {
        all_spare_parts(&self.db).await
    }

    async fn spare_part(&self, id: Uuid) -> Result<Option<spare_part::Model>, ServiceError> {
        Ok(spare_part::Entity::find_by_id(id).one(&self.db).await?)
    }

    async fn tickets(&self) -> Result<Vec<repair_ticket::Model>, ServiceError> {
        all_tickets(&self.db).await
    }

    async fn ticket(&self, id: Uuid) -> Result<Option<repair_ticket::Model>, ServiceError> {
        Ok(repair_ticket::Entity::find_by_id(id).one(&self.db).await?)
    }

    async fn part_usages(
        &self,
        repair_id: Uuid,
    ) -> Result<Vec<repair_part_usage::Model>, ServiceError> {
        usages_of(&self.db, repair_id).await
    }

    async fn all_part_usages(&self) -> Result<Vec<repair_part_usage::Model>, ServiceError> {
        all_usages(&self.db).await
    }

    async fn settings(&self) -> Result<Option<workshop_settings::Model>, ServiceError> {
        Ok(workshop_settings::Entity::find()
            .order_by_asc(workshop_settings::Column::CreatedAt)
            .one(&self.db)
            .await?)
    }

    async fn ledger_snapshot(&self) -> Result<LedgerSnapshot, ServiceError> {
        let txn = self.begin_read().await?;
        let snapshot = LedgerSnapshot {
            tickets: all_tickets(&txn).await?,
            part_usages: all_usages(&txn).await?,
            brands: all_brands(&txn).await?,
            device_models: all_device_models(&txn).await?,
            spare_parts: all_spare_parts(&txn).await?,
        };
        txn.commit().await?;
        Ok(snapshot)
    }

    async fn ticket_snapshot(&self, id: Uuid) -> Result<Option<LedgerSnapshot>, ServiceError> {
        let txn = self.begin_read().await?;
        let Some(ticket) = repair_ticket::Entity::find_by_id(id).one(&txn).await? else {
            txn.commit().await?;
            return Ok(None);
        };
        let part_usages = usages_of(&txn, id).await?;
        let part_ids: Vec<Uuid> = part_usages.iter().map(|u| u.spare_part_id).collect();
        let spare_parts = if part_ids.is_empty() {
            Vec::new()
        } else {
            spare_part::Entity::find()
                .filter(spare_part::Column::Id.is_in(part_ids))
                .all(&txn)
                .await?
        };
        let brands = brand::Entity::find_by_id(ticket.device_brand_id)
            .one(&txn)
            .await?
            .into_iter()
            .collect();
        let device_models = device_model::Entity::find_by_id(ticket.device_model_id)
            .one(&txn)
            .await?
            .into_iter()
            .collect();
        txn.commit().await?;

        Ok(Some(LedgerSnapshot {
            tickets: vec![ticket],
            part_usages,
            brands,
            device_models,
            spare_parts,
        }))
    }

    #[instrument(skip(self, batch), fields(batch_id = %batch.id, ops = batch.len()))]
    async fn commit(&self, batch: WriteBatch) -> Result<(), ServiceError> {
        let ops = batch.into_ops();
        self.db
            .transaction::<_, (), ServiceError>(|txn| {
                Box::pin(async move {
                    for op in ops {
                        apply_op(txn, op).await?;
                    }
                    Ok(())
                })
            })
            .await
            .map_err(|e| match e {
                TransactionError::Connection(db_err) => ServiceError::DatabaseError(db_err),
                TransactionError::Transaction(service_err) => service_err,
            })
    }

    async fn ping(&self) -> Result<(), ServiceError> {
        crate::db::check_connection(&self.db).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    async fn store() -> SqlStore {
        let pool = establish_connection_with_config(&DbConfig::single_connection("sqlite::memory:"))
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        SqlStore::new(pool)
    }

    fn part(quantity: i32) -> spare_part::Model {
        let now = Utc::now();
        spare_part::Model {
            id: Uuid::new_v4(),
            name: "iPhone 12 screen".into(),
            part_type: "screen".into(),
            screen_quality: Some("oled".into()),
            brand_id: Uuid::new_v4(),
            model_id: Uuid::new_v4(),
            quantity,
            purchase_price: dec!(40),
            selling_price: dec!(90),
            low_stock_alert: 2,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn put_is_an_upsert() {
        let store = store().await;
        let mut part = part(4);

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutSparePart(part.clone()));
        store.commit(batch).await.unwrap();

        part.name = "iPhone 12 screen (incell)".into();
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutSparePart(part.clone()));
        store.commit(batch).await.unwrap();

        let parts = store.spare_parts().await.unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name, "iPhone 12 screen (incell)");
    }

    #[tokio::test]
    async fn adjust_stock_clamps_and_skips_missing_parts() {
        let store = store().await;
        let part = part(2);

        let mut batch = WriteBatch::new();
        batch
            .push(WriteOp::PutSparePart(part.clone()))
            .push(WriteOp::AdjustStock {
                spare_part_id: part.id,
                delta: -5,
                at: Utc::now(),
            })
            .push(WriteOp::AdjustStock {
                spare_part_id: Uuid::new_v4(),
                delta: 3,
                at: Utc::now(),
            });
        store.commit(batch).await.unwrap();

        let stored = store.spare_part(part.id).await.unwrap().unwrap();
        assert_eq!(stored.quantity, 0);
    }

    #[tokio::test]
    async fn snapshots_read_tickets_with_their_usages() {
        let store = store().await;
        let part = part(6);
        let now = Utc::now();
        let ticket = repair_ticket::Model {
            id: Uuid::new_v4(),
            customer_name: "Yacine".into(),
            customer_phone: "0661 00 11 22".into(),
            device_brand_id: part.brand_id,
            device_model_id: part.model_id,
            issue_type: "screen".into(),
            description: String::new(),
            labor_cost: dec!(20),
            total_cost: dec!(200),
            profit: dec!(100),
            status: crate::entities::TicketStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        let usage = repair_part_usage::Model {
            id: Uuid::new_v4(),
            repair_id: ticket.id,
            spare_part_id: part.id,
            quantity_used: 2,
            price_at_time: dec!(90),
            created_at: now,
        };

        let mut batch = WriteBatch::new();
        batch
            .push(WriteOp::PutSparePart(part.clone()))
            .push(WriteOp::PutTicket(ticket.clone()))
            .push(WriteOp::PutPartUsage(usage.clone()));
        store.commit(batch).await.unwrap();

        let snapshot = store.ticket_snapshot(ticket.id).await.unwrap().unwrap();
        assert_eq!(snapshot.tickets.len(), 1);
        assert_eq!(snapshot.tickets[0].id, ticket.id);
        assert_eq!(snapshot.part_usages.len(), 1);
        assert_eq!(snapshot.part_usages[0].id, usage.id);
        assert_eq!(snapshot.spare_parts.len(), 1);
        assert!(snapshot.brands.is_empty());

        let full = store.ledger_snapshot().await.unwrap();
        assert_eq!(full.tickets.len(), 1);
        assert_eq!(full.part_usages.len(), 1);
        assert!(store.ticket_snapshot(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failing_op_rolls_back_the_whole_batch() {
        let store = store().await;
        let part = part(10);

        // A usage pointing at a ticket that does not exist violates the foreign key
        let orphan_usage = repair_part_usage::Model {
            id: Uuid::new_v4(),
            repair_id: Uuid::new_v4(),
            spare_part_id: part.id,
            quantity_used: 1,
            price_at_time: dec!(90),
            created_at: Utc::now(),
        };

        let mut batch = WriteBatch::new();
        batch
            .push(WriteOp::PutSparePart(part.clone()))
            .push(WriteOp::PutPartUsage(orphan_usage));
        assert!(store.commit(batch).await.is_err());

        assert!(store.spare_part(part.id).await.unwrap().is_none());
    }
}
