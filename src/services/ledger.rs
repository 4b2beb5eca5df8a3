//! Inventory-aware repair ledger.
//!
//! Every ticket mutation that consumes or returns spare parts builds one
//! [`WriteBatch`] (ticket, part usages and stock adjustments) and commits it
//! as a unit. Mutations on one ticket are serialised through [`KeyedLocks`]:
//! the ticket id first, then every affected spare part in ascending order.

use chrono::{Duration as ChronoDuration, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::entities::{
    brand, device_model, repair_part_usage, repair_ticket, spare_part, TicketStatus,
};
use crate::errors::ServiceError;
use crate::locks::KeyedLocks;
use crate::store::{LedgerSnapshot, Store, WriteBatch, WriteOp};

/// Runtime knobs of the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerSettings {
    /// Upper bound on waiting for a ticket or spare-part lock
    pub lock_timeout: Duration,
    /// Reject consumption beyond the stock on hand instead of clamping at zero
    pub strict_stock: bool,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            strict_stock: false,
        }
    }
}

/// Largest money amount accepted on input.
pub const MAX_AMOUNT: Decimal = dec!(1000000000000);

pub(crate) fn validate_amount(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        let mut err = ValidationError::new("non_negative");
        err.message = Some("Amount cannot be negative".into());
        return Err(err);
    }
    if *value > MAX_AMOUNT {
        let mut err = ValidationError::new("max_amount");
        err.message = Some("Amount cannot exceed 1000000000000".into());
        return Err(err);
    }
    Ok(())
}

fn amount_overflow() -> ServiceError {
    ServiceError::ValidationError("Ticket amounts are too large".to_string())
}

/// Ticket fields supplied by the caller; totals are derived.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewRepairTicket {
    #[validate(length(min = 1, max = 200, message = "Customer name cannot be empty"))]
    pub customer_name: String,
    #[validate(length(min = 1, max = 50, message = "Customer phone cannot be empty"))]
    pub customer_phone: String,
    pub device_brand_id: Uuid,
    pub device_model_id: Uuid,
    #[validate(length(min = 1, max = 100, message = "Issue type cannot be empty"))]
    pub issue_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    #[validate(custom = "validate_amount")]
    pub labor_cost: Decimal,
    #[serde(default)]
    pub status: Option<TicketStatus>,
}

/// One spare-part consumption requested for a ticket.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UsedPart {
    pub spare_part_id: Uuid,
    #[validate(range(
        min = 1,
        max = 1000000,
        message = "quantity_used must be between 1 and 1000000"
    ))]
    pub quantity_used: i32,
    /// Defaults to the part's current selling price
    #[serde(default)]
    #[validate(custom = "validate_amount")]
    pub price_at_time: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartUsageView {
    #[serde(flatten)]
    pub usage: repair_part_usage::Model,
    /// `None` once the spare part has been deleted
    pub spare_part_name: Option<String>,
}

/// A ticket with its brand, model and part usages resolved for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairTicketView {
    #[serde(flatten)]
    pub ticket: repair_ticket::Model,
    pub brand: Option<brand::Model>,
    pub model: Option<device_model::Model>,
    pub repair_parts: Vec<PartUsageView>,
}

impl RepairTicketView {
    /// Σ price_at_time × quantity_used, `None` on overflow.
    pub fn parts_price(&self) -> Option<Decimal> {
        self.repair_parts
            .iter()
            .try_fold(Decimal::ZERO, |sum, p| sum.checked_add(p.usage.line_total()?))
    }
}

/// Joins tickets with their references. Tickets and usages keep the order
/// they are given in; dangling references resolve to `None`.
pub fn assemble_views(
    tickets: Vec<repair_ticket::Model>,
    usages: Vec<repair_part_usage::Model>,
    brands: &[brand::Model],
    models: &[device_model::Model],
    parts: &[spare_part::Model],
) -> Vec<RepairTicketView> {
    let brands: HashMap<Uuid, &brand::Model> = brands.iter().map(|b| (b.id, b)).collect();
    let models: HashMap<Uuid, &device_model::Model> = models.iter().map(|m| (m.id, m)).collect();
    let part_names: HashMap<Uuid, &str> = parts.iter().map(|p| (p.id, p.name.as_str())).collect();

    let mut by_ticket: HashMap<Uuid, Vec<PartUsageView>> = HashMap::new();
    for usage in usages {
        let spare_part_name = part_names
            .get(&usage.spare_part_id)
            .map(|name| name.to_string());
        by_ticket
            .entry(usage.repair_id)
            .or_default()
            .push(PartUsageView {
                usage,
                spare_part_name,
            });
    }

    tickets
        .into_iter()
        .map(|ticket| RepairTicketView {
            brand: brands.get(&ticket.device_brand_id).map(|b| (*b).clone()),
            model: models.get(&ticket.device_model_id).map(|m| (*m).clone()),
            repair_parts: by_ticket.remove(&ticket.id).unwrap_or_default(),
            ticket,
        })
        .collect()
}

fn views_from(snapshot: LedgerSnapshot) -> Vec<RepairTicketView> {
    assemble_views(
        snapshot.tickets,
        snapshot.part_usages,
        &snapshot.brands,
        &snapshot.device_models,
        &snapshot.spare_parts,
    )
}

/// Usages, stock movements and derived amounts for a list of requested parts.
struct PlannedParts {
    usages: Vec<repair_part_usage::Model>,
    parts_price: Decimal,
    parts_purchase: Decimal,
}

#[derive(Clone)]
pub struct RepairLedger {
    store: Store,
    locks: Arc<KeyedLocks>,
    settings: LedgerSettings,
}

impl RepairLedger {
    pub fn new(store: Store, locks: Arc<KeyedLocks>, settings: LedgerSettings) -> Self {
        Self {
            store,
            locks,
            settings,
        }
    }

    pub fn settings(&self) -> LedgerSettings {
        self.settings
    }

    /// Runs a mutation on its own task so a dropped caller cannot cancel a
    /// commit halfway.
    async fn detached<T, F>(&self, operation: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, ServiceError>> + Send + 'static,
        T: Send + 'static,
    {
        tokio::spawn(operation)
            .await
            .map_err(|e| ServiceError::InternalError(format!("ledger task failed: {}", e)))?
    }

    /// Persists a ticket with its part usages and decrements stock, atomically.
    #[instrument(skip(self, ticket, used_parts), fields(parts = used_parts.len()))]
    pub async fn create_ticket(
        &self,
        ticket: NewRepairTicket,
        used_parts: Vec<UsedPart>,
    ) -> Result<RepairTicketView, ServiceError> {
        ticket.validate()?;
        for part in &used_parts {
            part.validate()?;
        }

        let this = self.clone();
        self.detached(async move { this.create_ticket_locked(ticket, used_parts).await })
            .await
    }

    async fn create_ticket_locked(
        &self,
        input: NewRepairTicket,
        used_parts: Vec<UsedPart>,
    ) -> Result<RepairTicketView, ServiceError> {
        let ticket_id = Uuid::new_v4();
        let _guard = self
            .locks
            .lock_all(ticket_id, used_parts.iter().map(|p| p.spare_part_id).collect::<Vec<_>>())
            .await?;

        let brand = self
            .store
            .brand(input.device_brand_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Brand", input.device_brand_id))?;
        let model = self
            .store
            .device_model(input.device_model_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Device model", input.device_model_id))?;
        if model.brand_id != brand.id {
            return Err(ServiceError::ValidationError(format!(
                "Device model {} does not belong to brand {}",
                model.id, brand.id
            )));
        }

        let planned = self
            .plan_parts(ticket_id, &used_parts, &HashMap::new())
            .await?;

        let now = Utc::now();
        let status = input.status.unwrap_or_default();
        let total_cost = input
            .labor_cost
            .checked_add(planned.parts_price)
            .ok_or_else(amount_overflow)?;
        let profit = total_cost
            .checked_sub(planned.parts_purchase)
            .ok_or_else(amount_overflow)?;
        let ticket = repair_ticket::Model {
            id: ticket_id,
            customer_name: input.customer_name.trim().to_string(),
            customer_phone: input.customer_phone.trim().to_string(),
            device_brand_id: brand.id,
            device_model_id: model.id,
            issue_type: input.issue_type.trim().to_string(),
            description: input.description,
            labor_cost: input.labor_cost,
            total_cost,
            profit,
            status,
            created_at: now,
            updated_at: now,
            completed_at: (status == TicketStatus::Completed).then_some(now),
        };

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutTicket(ticket));
        for usage in &planned.usages {
            batch.push(WriteOp::PutPartUsage(usage.clone()));
        }
        batch.extend(planned.usages.iter().map(|usage| WriteOp::AdjustStock {
            spare_part_id: usage.spare_part_id,
            delta: -usage.quantity_used,
            at: now,
        }));
        self.store.commit(batch).await?;

        counter!("repairdesk_ledger.tickets_created", 1);
        info!(
            ticket_id = %ticket_id,
            parts = planned.usages.len(),
            "Repair ticket created"
        );

        self.get_ticket(ticket_id).await
    }

    /// Changes the status; completing a ticket stamps `completed_at`.
    /// Inventory is untouched and any transition is accepted.
    #[instrument(skip(self))]
    pub async fn update_ticket_status(
        &self,
        id: Uuid,
        status: TicketStatus,
    ) -> Result<RepairTicketView, ServiceError> {
        let this = self.clone();
        self.detached(async move {
            let _guard = this.locks.lock(id).await?;
            let mut ticket = this
                .store
                .ticket(id)
                .await?
                .ok_or_else(|| ServiceError::not_found("Repair ticket", id))?;

            let now = Utc::now();
            let previous = ticket.status;
            ticket.status = status;
            ticket.updated_at = now;
            if status == TicketStatus::Completed {
                ticket.completed_at = Some(now);
            }

            let mut batch = WriteBatch::new();
            batch.push(WriteOp::PutTicket(ticket));
            this.store.commit(batch).await?;

            info!(ticket_id = %id, from = %previous, to = %status, "Repair ticket status changed");
            this.get_ticket(id).await
        })
        .await
    }

    /// Replaces the ticket's part usages: every old quantity goes back to
    /// stock, then every new one is taken out, in one batch.
    #[instrument(skip(self, used_parts), fields(parts = used_parts.len()))]
    pub async fn update_ticket_parts(
        &self,
        id: Uuid,
        used_parts: Vec<UsedPart>,
    ) -> Result<RepairTicketView, ServiceError> {
        for part in &used_parts {
            part.validate()?;
        }

        let this = self.clone();
        self.detached(async move { this.update_ticket_parts_locked(id, used_parts).await })
            .await
    }

    async fn update_ticket_parts_locked(
        &self,
        id: Uuid,
        used_parts: Vec<UsedPart>,
    ) -> Result<RepairTicketView, ServiceError> {
        let _ticket_guard = self.locks.lock(id).await?;
        let mut ticket = self
            .store
            .ticket(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Repair ticket", id))?;
        let old_usages = self.store.part_usages(id).await?;

        let _part_guard = self
            .locks
            .lock_many(
                old_usages
                    .iter()
                    .map(|u| u.spare_part_id)
                    .chain(used_parts.iter().map(|p| p.spare_part_id)),
            )
            .await?;

        let mut restored: HashMap<Uuid, i64> = HashMap::new();
        for usage in &old_usages {
            *restored.entry(usage.spare_part_id).or_default() += i64::from(usage.quantity_used);
        }

        let planned = self.plan_parts(id, &used_parts, &restored).await?;

        let now = Utc::now();
        let mut batch = WriteBatch::new();
        batch.extend(old_usages.iter().map(|usage| WriteOp::AdjustStock {
            spare_part_id: usage.spare_part_id,
            delta: usage.quantity_used,
            at: now,
        }));
        batch.push(WriteOp::DeletePartUsages { repair_id: id });
        for usage in &planned.usages {
            batch.push(WriteOp::PutPartUsage(usage.clone()));
        }
        batch.extend(planned.usages.iter().map(|usage| WriteOp::AdjustStock {
            spare_part_id: usage.spare_part_id,
            delta: -usage.quantity_used,
            at: now,
        }));

        ticket.total_cost = ticket
            .labor_cost
            .checked_add(planned.parts_price)
            .ok_or_else(amount_overflow)?;
        ticket.profit = ticket
            .total_cost
            .checked_sub(planned.parts_purchase)
            .ok_or_else(amount_overflow)?;
        ticket.updated_at = now;
        batch.push(WriteOp::PutTicket(ticket));

        self.store.commit(batch).await?;

        counter!("repairdesk_ledger.ticket_parts_updated", 1);
        info!(
            ticket_id = %id,
            restored = old_usages.len(),
            consumed = planned.usages.len(),
            "Repair ticket parts replaced"
        );

        self.get_ticket(id).await
    }

    /// Returns every used quantity to stock and removes the ticket with its usages.
    #[instrument(skip(self))]
    pub async fn delete_ticket(&self, id: Uuid) -> Result<(), ServiceError> {
        let this = self.clone();
        self.detached(async move {
            let _ticket_guard = this.locks.lock(id).await?;
            if this.store.ticket(id).await?.is_none() {
                return Err(ServiceError::not_found("Repair ticket", id));
            }
            let usages = this.store.part_usages(id).await?;
            let _part_guard = this
                .locks
                .lock_many(usages.iter().map(|u| u.spare_part_id))
                .await?;

            let now = Utc::now();
            let mut batch = WriteBatch::new();
            batch.extend(usages.iter().map(|usage| WriteOp::AdjustStock {
                spare_part_id: usage.spare_part_id,
                delta: usage.quantity_used,
                at: now,
            }));
            batch
                .push(WriteOp::DeletePartUsages { repair_id: id })
                .push(WriteOp::DeleteTicket(id));
            this.store.commit(batch).await?;

            counter!("repairdesk_ledger.tickets_deleted", 1);
            info!(ticket_id = %id, restored = usages.len(), "Repair ticket deleted");
            Ok(())
        })
        .await
    }

    /// One ticket with its usages, read from a single snapshot.
    pub async fn get_ticket(&self, id: Uuid) -> Result<RepairTicketView, ServiceError> {
        let snapshot = self
            .store
            .ticket_snapshot(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Repair ticket", id))?;

        views_from(snapshot)
            .pop()
            .ok_or_else(|| ServiceError::InternalError(format!("view for ticket {} missing", id)))
    }

    /// Every ticket, oldest first, read from a single snapshot.
    pub async fn list_tickets(&self) -> Result<Vec<RepairTicketView>, ServiceError> {
        Ok(views_from(self.store.ledger_snapshot().await?))
    }

    /// Builds usages for `used_parts`. `restored` holds quantities this
    /// ticket is about to give back, which strict mode counts as available.
    async fn plan_parts(
        &self,
        repair_id: Uuid,
        used_parts: &[UsedPart],
        restored: &HashMap<Uuid, i64>,
    ) -> Result<PlannedParts, ServiceError> {
        let mut parts: HashMap<Uuid, spare_part::Model> = HashMap::new();
        let mut requested: HashMap<Uuid, i64> = HashMap::new();
        for used in used_parts {
            if !parts.contains_key(&used.spare_part_id) {
                let part = self
                    .store
                    .spare_part(used.spare_part_id)
                    .await?
                    .ok_or_else(|| ServiceError::not_found("Spare part", used.spare_part_id))?;
                parts.insert(part.id, part);
            }
            *requested.entry(used.spare_part_id).or_default() += i64::from(used.quantity_used);
        }

        if self.settings.strict_stock {
            for (part_id, wanted) in &requested {
                let part = &parts[part_id];
                let available =
                    i64::from(part.quantity) + restored.get(part_id).copied().unwrap_or(0);
                if *wanted > available {
                    return Err(ServiceError::InsufficientStock(format!(
                        "{} requested of spare part '{}', {} available",
                        wanted, part.name, available
                    )));
                }
            }
        }

        let now = Utc::now();
        let mut planned = PlannedParts {
            usages: Vec::with_capacity(used_parts.len()),
            parts_price: Decimal::ZERO,
            parts_purchase: Decimal::ZERO,
        };
        for (position, used) in used_parts.iter().enumerate() {
            let part = &parts[&used.spare_part_id];
            let quantity = Decimal::from(used.quantity_used);
            let price_at_time = used.price_at_time.unwrap_or(part.selling_price);

            planned.parts_price = price_at_time
                .checked_mul(quantity)
                .and_then(|line| planned.parts_price.checked_add(line))
                .ok_or_else(amount_overflow)?;
            planned.parts_purchase = part
                .purchase_price
                .checked_mul(quantity)
                .and_then(|line| planned.parts_purchase.checked_add(line))
                .ok_or_else(amount_overflow)?;
            planned.usages.push(repair_part_usage::Model {
                id: Uuid::new_v4(),
                repair_id,
                spare_part_id: part.id,
                quantity_used: used.quantity_used,
                price_at_time,
                // Keeps the caller's order when read back oldest first
                created_at: now + ChronoDuration::microseconds(position as i64),
            });
        }
        Ok(planned)
    }
}
