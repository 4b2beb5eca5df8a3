use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Spare-part consumption recorded against a ticket, with the unit price
/// captured when the part was used.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "repair_part_usages")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub repair_id: Uuid,
    /// Weak reference: the part may have been deleted since
    pub spare_part_id: Uuid,
    pub quantity_used: i32,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub price_at_time: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Model {
    /// `None` when the product overflows.
    pub fn line_total(&self) -> Option<Decimal> {
        self.price_at_time.checked_mul(Decimal::from(self.quantity_used))
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::repair_ticket::Entity",
        from = "Column::RepairId",
        to = "super::repair_ticket::Column::Id",
        on_delete = "Cascade"
    )]
    RepairTicket,
}

impl Related<super::repair_ticket::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RepairTicket.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
