use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::cache::ReadModelCache;
use crate::entities::spare_part;
use crate::errors::ServiceError;
use crate::locks::KeyedLocks;
use crate::services::ledger::validate_amount;
use crate::store::{Store, WriteBatch, WriteOp};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateSparePart {
    #[validate(length(min = 1, max = 200, message = "Part name cannot be empty"))]
    pub name: String,
    #[validate(length(min = 1, max = 50, message = "Part type cannot be empty"))]
    pub part_type: String,
    #[serde(default)]
    pub screen_quality: Option<String>,
    pub brand_id: Uuid,
    pub model_id: Uuid,
    #[serde(default)]
    #[validate(range(min = 0, message = "Quantity cannot be negative"))]
    pub quantity: i32,
    #[validate(custom = "validate_amount")]
    pub purchase_price: Decimal,
    #[validate(custom = "validate_amount")]
    pub selling_price: Decimal,
    #[serde(default)]
    #[validate(range(min = 0, message = "Low stock alert cannot be negative"))]
    pub low_stock_alert: i32,
}

/// Partial update of a spare part; absent fields are left unchanged.
/// `quantity` sets the stock level outright.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct SparePartPatch {
    #[validate(length(min = 1, max = 200, message = "Part name cannot be empty"))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 50, message = "Part type cannot be empty"))]
    pub part_type: Option<String>,
    pub screen_quality: Option<String>,
    pub brand_id: Option<Uuid>,
    pub model_id: Option<Uuid>,
    #[validate(range(min = 0, message = "Quantity cannot be negative"))]
    pub quantity: Option<i32>,
    #[validate(custom = "validate_amount")]
    pub purchase_price: Option<Decimal>,
    #[validate(custom = "validate_amount")]
    pub selling_price: Option<Decimal>,
    #[validate(range(min = 0, message = "Low stock alert cannot be negative"))]
    pub low_stock_alert: Option<i32>,
}

/// Manual stock correction (delivery, breakage, stock count).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StockAdjustment {
    #[validate(range(min = -100000, max = 100000))]
    pub delta: i32,
    #[serde(default)]
    #[validate(length(max = 200))]
    pub reason: Option<String>,
}

#[derive(Clone)]
pub struct InventoryService {
    store: Store,
    locks: Arc<KeyedLocks>,
}

impl InventoryService {
    pub fn new(store: Store, locks: Arc<KeyedLocks>) -> Self {
        Self { store, locks }
    }

    pub async fn list_parts(&self) -> Result<Vec<spare_part::Model>, ServiceError> {
        self.store.spare_parts().await
    }

    pub async fn get_part(&self, id: Uuid) -> Result<spare_part::Model, ServiceError> {
        self.store
            .spare_part(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Spare part", id))
    }

    /// Parts at or below their alert threshold.
    pub async fn low_stock(&self) -> Result<Vec<spare_part::Model>, ServiceError> {
        Ok(self
            .store
            .spare_parts()
            .await?
            .into_iter()
            .filter(spare_part::Model::is_low_stock)
            .collect())
    }

    async fn ensure_device(&self, brand_id: Uuid, model_id: Uuid) -> Result<(), ServiceError> {
        if self.store.brand(brand_id).await?.is_none() {
            return Err(ServiceError::not_found("Brand", brand_id));
        }
        let model = self
            .store
            .device_model(model_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Device model", model_id))?;
        if model.brand_id != brand_id {
            return Err(ServiceError::ValidationError(format!(
                "Device model {} does not belong to brand {}",
                model_id, brand_id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_part(
        &self,
        input: CreateSparePart,
    ) -> Result<spare_part::Model, ServiceError> {
        input.validate()?;
        self.ensure_device(input.brand_id, input.model_id).await?;

        let now = Utc::now();
        let part = spare_part::Model {
            id: Uuid::new_v4(),
            name: input.name.trim().to_string(),
            part_type: input.part_type.trim().to_string(),
            screen_quality: input.screen_quality.filter(|q| !q.trim().is_empty()),
            brand_id: input.brand_id,
            model_id: input.model_id,
            quantity: input.quantity,
            purchase_price: input.purchase_price,
            selling_price: input.selling_price,
            low_stock_alert: input.low_stock_alert,
            created_at: now,
            updated_at: now,
        };

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutSparePart(part.clone()));
        self.store.commit(batch).await?;

        info!(spare_part_id = %part.id, quantity = part.quantity, "Spare part created");
        Ok(part)
    }

    #[instrument(skip(self, patch))]
    pub async fn update_part(
        &self,
        id: Uuid,
        patch: SparePartPatch,
    ) -> Result<spare_part::Model, ServiceError> {
        patch.validate()?;
        let _guard = self.locks.lock(id).await?;
        let mut part = self.get_part(id).await?;

        if patch.brand_id.is_some() || patch.model_id.is_some() {
            let brand_id = patch.brand_id.unwrap_or(part.brand_id);
            let model_id = patch.model_id.unwrap_or(part.model_id);
            self.ensure_device(brand_id, model_id).await?;
            part.brand_id = brand_id;
            part.model_id = model_id;
        }
        if let Some(name) = patch.name {
            part.name = name.trim().to_string();
        }
        if let Some(part_type) = patch.part_type {
            part.part_type = part_type.trim().to_string();
        }
        if let Some(quality) = patch.screen_quality {
            part.screen_quality = Some(quality).filter(|q| !q.trim().is_empty());
        }
        if let Some(quantity) = patch.quantity {
            part.quantity = quantity;
        }
        if let Some(price) = patch.purchase_price {
            part.purchase_price = price;
        }
        if let Some(price) = patch.selling_price {
            part.selling_price = price;
        }
        if let Some(alert) = patch.low_stock_alert {
            part.low_stock_alert = alert;
        }
        part.updated_at = Utc::now();

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutSparePart(part.clone()));
        self.store.commit(batch).await?;
        Ok(part)
    }

    /// Applies a relative stock change with the same floor-at-zero rule as
    /// part consumption.
    #[instrument(skip(self, adjustment), fields(delta = adjustment.delta))]
    pub async fn adjust_stock(
        &self,
        id: Uuid,
        adjustment: StockAdjustment,
    ) -> Result<spare_part::Model, ServiceError> {
        adjustment.validate()?;
        if adjustment.delta == 0 {
            return Err(ServiceError::ValidationError(
                "Stock adjustment cannot be zero".to_string(),
            ));
        }
        let _guard = self.locks.lock(id).await?;
        let before = self.get_part(id).await?;

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::AdjustStock {
            spare_part_id: id,
            delta: adjustment.delta,
            at: Utc::now(),
        });
        self.store.commit(batch).await?;

        let after = self.get_part(id).await?;
        counter!("repairdesk_inventory.adjustments", 1);
        info!(
            spare_part_id = %id,
            from = before.quantity,
            to = after.quantity,
            reason = adjustment.reason.as_deref().unwrap_or(""),
            "Stock adjusted"
        );
        Ok(after)
    }

    /// Removes the part. Usages that reference it keep their snapshot price.
    #[instrument(skip(self))]
    pub async fn delete_part(&self, id: Uuid) -> Result<(), ServiceError> {
        let _guard = self.locks.lock(id).await?;
        self.get_part(id).await?;

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::DeleteSparePart(id));
        self.store.commit(batch).await?;
        info!(spare_part_id = %id, "Spare part deleted");
        Ok(())
    }
}

/// Logs each part once when it drops to its alert threshold, and again only
/// after it has been restocked above it.
pub fn spawn_low_stock_monitor(cache: Arc<ReadModelCache>) -> JoinHandle<()> {
    let mut parts = cache.spare_parts.subscribe();
    tokio::spawn(async move {
        let mut alerted: HashSet<Uuid> = HashSet::new();
        while parts.changed().await.is_ok() {
            let snapshot = parts.borrow_and_update().clone();
            let low: HashSet<Uuid> = snapshot
                .iter()
                .filter(|p| p.is_low_stock())
                .map(|p| p.id)
                .collect();

            for part in snapshot.iter().filter(|p| low.contains(&p.id) && !alerted.contains(&p.id)) {
                counter!("repairdesk_inventory.low_stock_alerts", 1);
                warn!(
                    spare_part_id = %part.id,
                    name = %part.name,
                    quantity = part.quantity,
                    threshold = part.low_stock_alert,
                    "Spare part low on stock"
                );
            }
            alerted = low;
        }
        debug!("Low stock monitor stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{brand, device_model};
    use crate::store::LocalStore;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct Fixture {
        inventory: InventoryService,
        brand_id: Uuid,
        model_id: Uuid,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(Arc::new(LocalStore::open(dir.path()).await.unwrap()));
        let now = Utc::now();
        let brand = brand::Model {
            id: Uuid::new_v4(),
            name: "Apple".into(),
            created_at: now,
        };
        let model = device_model::Model {
            id: Uuid::new_v4(),
            name: "iPhone 11".into(),
            brand_id: brand.id,
            created_at: now,
        };
        let mut batch = WriteBatch::new();
        batch
            .push(WriteOp::PutBrand(brand.clone()))
            .push(WriteOp::PutDeviceModel(model.clone()));
        store.commit(batch).await.unwrap();

        Fixture {
            inventory: InventoryService::new(store, Arc::new(KeyedLocks::new(Duration::from_secs(1)))),
            brand_id: brand.id,
            model_id: model.id,
            _dir: dir,
        }
    }

    fn new_part(f: &Fixture, quantity: i32) -> CreateSparePart {
        CreateSparePart {
            name: "iPhone 11 LCD".into(),
            part_type: "screen".into(),
            screen_quality: Some("incell".into()),
            brand_id: f.brand_id,
            model_id: f.model_id,
            quantity,
            purchase_price: dec!(35),
            selling_price: dec!(80),
            low_stock_alert: 2,
        }
    }

    #[tokio::test]
    async fn adjust_stock_clamps_decrements() {
        let f = fixture().await;
        let part = f.inventory.create_part(new_part(&f, 3)).await.unwrap();

        let after = f
            .inventory
            .adjust_stock(part.id, StockAdjustment { delta: -10, reason: Some("broken in drawer".into()) })
            .await
            .unwrap();
        assert_eq!(after.quantity, 0);

        let after = f
            .inventory
            .adjust_stock(part.id, StockAdjustment { delta: 6, reason: None })
            .await
            .unwrap();
        assert_eq!(after.quantity, 6);
    }

    #[tokio::test]
    async fn zero_adjustment_is_rejected() {
        let f = fixture().await;
        let part = f.inventory.create_part(new_part(&f, 3)).await.unwrap();
        let err = f
            .inventory
            .adjust_stock(part.id, StockAdjustment { delta: 0, reason: None })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[tokio::test]
    async fn low_stock_lists_parts_at_threshold() {
        let f = fixture().await;
        let low = f.inventory.create_part(new_part(&f, 2)).await.unwrap();
        f.inventory.create_part(new_part(&f, 9)).await.unwrap();

        let listed = f.inventory.low_stock().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, low.id);
    }

    #[tokio::test]
    async fn patch_changes_only_given_fields() {
        let f = fixture().await;
        let part = f.inventory.create_part(new_part(&f, 4)).await.unwrap();

        let updated = f
            .inventory
            .update_part(
                part.id,
                SparePartPatch {
                    selling_price: Some(dec!(95)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.selling_price, dec!(95));
        assert_eq!(updated.quantity, 4);
        assert_eq!(updated.name, part.name);

        let err = f
            .inventory
            .update_part(
                part.id,
                SparePartPatch {
                    quantity: Some(-1),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[tokio::test]
    async fn part_requires_matching_brand_and_model() {
        let f = fixture().await;
        let mut input = new_part(&f, 1);
        input.brand_id = Uuid::new_v4();
        assert!(matches!(
            f.inventory.create_part(input).await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
