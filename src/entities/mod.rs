//! Record types shared by both storage backends.
//!
//! Each `Model` is a sea-orm entity for the database backend and a serde
//! document for the local backend.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod brand;
pub mod device_model;
pub mod repair_part_usage;
pub mod repair_ticket;
pub mod spare_part;
pub mod workshop_settings;

pub use repair_ticket::TicketStatus;

/// Identity and creation order of a stored record.
pub trait Record: Clone + Send + Sync + 'static {
    fn id(&self) -> Uuid;
    fn created_at(&self) -> DateTime<Utc>;
}

macro_rules! impl_record {
    ($($module:ident),+ $(,)?) => {
        $(
            impl Record for $module::Model {
                fn id(&self) -> Uuid {
                    self.id
                }

                fn created_at(&self) -> DateTime<Utc> {
                    self.created_at
                }
            }
        )+
    };
}

impl_record!(
    brand,
    device_model,
    spare_part,
    repair_ticket,
    repair_part_usage,
    workshop_settings,
);

/// Sorts records oldest first; ids break ties so the order is total.
pub fn sort_by_creation<T: Record>(records: &mut [T]) {
    records.sort_by(|a, b| {
        a.created_at()
            .cmp(&b.created_at())
            .then_with(|| a.id().cmp(&b.id()))
    });
}
