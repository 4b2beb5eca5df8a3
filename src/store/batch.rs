use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::entities::{
    brand, device_model, repair_part_usage, repair_ticket, spare_part, workshop_settings,
};
use crate::events::Collection;

/// One write inside a [`WriteBatch`]. Puts are upserts keyed by id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data", rename_all = "snake_case")]
pub enum WriteOp {
    PutBrand(brand::Model),
    DeleteBrand(Uuid),
    PutDeviceModel(device_model::Model),
    DeleteDeviceModel(Uuid),
    PutSparePart(spare_part::Model),
    DeleteSparePart(Uuid),
    /// Relative stock change; see [`apply_stock_delta`]. A missing part is skipped.
    AdjustStock {
        spare_part_id: Uuid,
        delta: i32,
        at: DateTime<Utc>,
    },
    PutTicket(repair_ticket::Model),
    DeleteTicket(Uuid),
    PutPartUsage(repair_part_usage::Model),
    DeletePartUsages {
        repair_id: Uuid,
    },
    PutSettings(workshop_settings::Model),
}

impl WriteOp {
    pub fn collection(&self) -> Collection {
        match self {
            WriteOp::PutBrand(_) | WriteOp::DeleteBrand(_) => Collection::Brands,
            WriteOp::PutDeviceModel(_) | WriteOp::DeleteDeviceModel(_) => Collection::DeviceModels,
            WriteOp::PutSparePart(_) | WriteOp::DeleteSparePart(_) | WriteOp::AdjustStock { .. } => {
                Collection::SpareParts
            }
            WriteOp::PutTicket(_) | WriteOp::DeleteTicket(_) => Collection::RepairTickets,
            WriteOp::PutPartUsage(_) | WriteOp::DeletePartUsages { .. } => {
                Collection::RepairPartUsages
            }
            WriteOp::PutSettings(_) => Collection::WorkshopSettings,
        }
    }
}

/// Ordered writes committed as one unit. Backends apply the ops in order,
/// so a restore followed by a decrement of the same part nets out correctly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WriteBatch {
    pub id: Uuid,
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            ops: Vec::new(),
        }
    }

    pub fn push(&mut self, op: WriteOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    /// Collections touched by this batch.
    pub fn collections(&self) -> BTreeSet<Collection> {
        self.ops.iter().map(WriteOp::collection).collect()
    }
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Extend<WriteOp> for WriteBatch {
    fn extend<I: IntoIterator<Item = WriteOp>>(&mut self, iter: I) {
        self.ops.extend(iter);
    }
}

/// Stock arithmetic shared by every backend: decrements floor at zero,
/// increments have no ceiling.
pub fn apply_stock_delta(current: i32, delta: i32) -> i32 {
    if delta < 0 {
        current.saturating_add(delta).max(0)
    } else {
        current.saturating_add(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decrement_clamps_at_zero() {
        assert_eq!(apply_stock_delta(10, -3), 7);
        assert_eq!(apply_stock_delta(2, -5), 0);
        assert_eq!(apply_stock_delta(0, -1), 0);
    }

    #[test]
    fn increment_has_no_ceiling() {
        assert_eq!(apply_stock_delta(0, 5), 5);
        assert_eq!(apply_stock_delta(7, 3), 10);
        assert_eq!(apply_stock_delta(i32::MAX, 1), i32::MAX);
    }

    #[test]
    fn batch_reports_touched_collections() {
        let mut batch = WriteBatch::new();
        batch
            .push(WriteOp::DeletePartUsages {
                repair_id: Uuid::new_v4(),
            })
            .push(WriteOp::AdjustStock {
                spare_part_id: Uuid::new_v4(),
                delta: 2,
                at: Utc::now(),
            })
            .push(WriteOp::DeleteTicket(Uuid::new_v4()));

        let collections: Vec<_> = batch.collections().into_iter().collect();
        assert_eq!(
            collections,
            vec![
                Collection::SpareParts,
                Collection::RepairTickets,
                Collection::RepairPartUsages
            ]
        );
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn ops_serialize_with_a_tag() {
        let op = WriteOp::DeleteBrand(Uuid::nil());
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "delete_brand");
        let back: WriteOp = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }

    proptest! {
        #[test]
        fn stock_is_never_negative(current in 0i32..100_000, delta in -200_000i32..200_000) {
            prop_assert!(apply_stock_delta(current, delta) >= 0);
        }

        #[test]
        fn restore_after_unclamped_use_returns_original(current in 0i32..100_000, used in 1i32..100_000) {
            prop_assume!(used <= current);
            let after_use = apply_stock_delta(current, -used);
            prop_assert_eq!(apply_stock_delta(after_use, used), current);
        }
    }
}
