use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_brands_table::Migration),
            Box::new(m20240601_000002_create_device_models_table::Migration),
            Box::new(m20240601_000003_create_spare_parts_table::Migration),
            Box::new(m20240601_000004_create_repair_tickets_table::Migration),
            Box::new(m20240601_000005_create_repair_part_usages_table::Migration),
            Box::new(m20240601_000006_create_workshop_settings_table::Migration),
        ]
    }
}

mod m20240601_000001_create_brands_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_brands_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Brands::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Brands::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Brands::Name).string().not_null())
                        .col(
                            ColumnDef::new(Brands::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Brands::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Brands {
        Table,
        Id,
        Name,
        CreatedAt,
    }
}

mod m20240601_000002_create_device_models_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_device_models_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // No foreign key to brands: deleting a brand leaves its models in place
            manager
                .create_table(
                    Table::create()
                        .table(DeviceModels::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(DeviceModels::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(DeviceModels::Name).string().not_null())
                        .col(ColumnDef::new(DeviceModels::BrandId).uuid().not_null())
                        .col(
                            ColumnDef::new(DeviceModels::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_device_models_brand_id")
                        .table(DeviceModels::Table)
                        .col(DeviceModels::BrandId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(DeviceModels::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum DeviceModels {
        Table,
        Id,
        Name,
        BrandId,
        CreatedAt,
    }
}

mod m20240601_000003_create_spare_parts_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_spare_parts_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(SpareParts::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(SpareParts::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(SpareParts::Name).string().not_null())
                        .col(ColumnDef::new(SpareParts::PartType).string().not_null())
                        .col(ColumnDef::new(SpareParts::ScreenQuality).string().null())
                        .col(ColumnDef::new(SpareParts::BrandId).uuid().not_null())
                        .col(ColumnDef::new(SpareParts::ModelId).uuid().not_null())
                        .col(
                            ColumnDef::new(SpareParts::Quantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(SpareParts::PurchasePrice)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(SpareParts::SellingPrice)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(SpareParts::LowStockAlert)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(SpareParts::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SpareParts::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_spare_parts_model_id")
                        .table(SpareParts::Table)
                        .col(SpareParts::ModelId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(SpareParts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum SpareParts {
        Table,
        Id,
        Name,
        PartType,
        ScreenQuality,
        BrandId,
        ModelId,
        Quantity,
        PurchasePrice,
        SellingPrice,
        LowStockAlert,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000004_create_repair_tickets_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_repair_tickets_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(RepairTickets::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RepairTickets::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RepairTickets::CustomerName).string().not_null())
                        .col(
                            ColumnDef::new(RepairTickets::CustomerPhone)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RepairTickets::DeviceBrandId).uuid().not_null())
                        .col(ColumnDef::new(RepairTickets::DeviceModelId).uuid().not_null())
                        .col(ColumnDef::new(RepairTickets::IssueType).string().not_null())
                        .col(ColumnDef::new(RepairTickets::Description).text().not_null())
                        .col(
                            ColumnDef::new(RepairTickets::LaborCost)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(RepairTickets::TotalCost)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(RepairTickets::Profit)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(RepairTickets::Status)
                                .string_len(32)
                                .not_null()
                                .default("pending"),
                        )
                        .col(
                            ColumnDef::new(RepairTickets::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairTickets::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairTickets::CompletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_repair_tickets_created_at")
                        .table(RepairTickets::Table)
                        .col(RepairTickets::CreatedAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_repair_tickets_status")
                        .table(RepairTickets::Table)
                        .col(RepairTickets::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(RepairTickets::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum RepairTickets {
        Table,
        Id,
        CustomerName,
        CustomerPhone,
        DeviceBrandId,
        DeviceModelId,
        IssueType,
        Description,
        LaborCost,
        TotalCost,
        Profit,
        Status,
        CreatedAt,
        UpdatedAt,
        CompletedAt,
    }
}

mod m20240601_000005_create_repair_part_usages_table {
    use super::m20240601_000004_create_repair_tickets_table::RepairTickets;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000005_create_repair_part_usages_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // spare_part_id is a weak reference and carries no foreign key
            manager
                .create_table(
                    Table::create()
                        .table(RepairPartUsages::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RepairPartUsages::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RepairPartUsages::RepairId).uuid().not_null())
                        .col(
                            ColumnDef::new(RepairPartUsages::SparePartId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairPartUsages::QuantityUsed)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairPartUsages::PriceAtTime)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(RepairPartUsages::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_repair_part_usages_repair_id")
                                .from(RepairPartUsages::Table, RepairPartUsages::RepairId)
                                .to(RepairTickets::Table, RepairTickets::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_repair_part_usages_repair_id")
                        .table(RepairPartUsages::Table)
                        .col(RepairPartUsages::RepairId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(RepairPartUsages::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum RepairPartUsages {
        Table,
        Id,
        RepairId,
        SparePartId,
        QuantityUsed,
        PriceAtTime,
        CreatedAt,
    }
}

mod m20240601_000006_create_workshop_settings_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000006_create_workshop_settings_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(WorkshopSettings::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(WorkshopSettings::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(WorkshopSettings::Name).string().not_null())
                        .col(ColumnDef::new(WorkshopSettings::Address).string().not_null())
                        .col(ColumnDef::new(WorkshopSettings::Phone).string().not_null())
                        .col(
                            ColumnDef::new(WorkshopSettings::ThankYouMessage)
                                .text()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WorkshopSettings::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WorkshopSettings::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(WorkshopSettings::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum WorkshopSettings {
        Table,
        Id,
        Name,
        Address,
        Phone,
        ThankYouMessage,
        CreatedAt,
        UpdatedAt,
    }
}
