use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_accounts_tables::Migration),
            Box::new(m20240301_000002_create_catalog_stock_tables::Migration),
            Box::new(m20240301_000003_create_reservation_tables::Migration),
            Box::new(m20240301_000004_create_sale_tables::Migration),
            Box::new(m20240301_000005_create_stock_movements_table::Migration),
        ]
    }
}

mod m20240301_000001_create_accounts_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_accounts_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Users::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Users::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Users::Name).string().not_null())
                        .col(ColumnDef::new(Users::Email).string().not_null().unique_key())
                        .col(ColumnDef::new(Users::Role).string_len(16).not_null())
                        .col(
                            ColumnDef::new(Users::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Users::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Sessions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Sessions::Token)
                                .string_len(128)
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Sessions::UserId).integer().not_null())
                        .col(
                            ColumnDef::new(Sessions::ExpiresAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Sessions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_sessions_user_id")
                                .from(Sessions::Table, Sessions::UserId)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Sessions::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Users::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Users {
        Table,
        Id,
        Name,
        Email,
        Role,
        IsActive,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum Sessions {
        Table,
        Token,
        UserId,
        ExpiresAt,
        CreatedAt,
    }
}

mod m20240301_000002_create_catalog_stock_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_catalog_stock_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Counters are guarded in SQL as well: 0 <= reserved <= on_hand
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Products::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(
                            ColumnDef::new(Products::DefaultPrice)
                                .decimal_len(12, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Products::RequiresVariant)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Products::IsEnabled)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Products::OnHand)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Products::Reserved)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .check(Expr::cust("reserved >= 0 AND reserved <= on_hand"))
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ProductVariants::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ProductVariants::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::ProductId)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ProductVariants::Label).string().not_null())
                        .col(ColumnDef::new(ProductVariants::Sku).string().null())
                        .col(
                            ColumnDef::new(ProductVariants::Price)
                                .decimal_len(12, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::IsEnabled)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::OnHand)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::Reserved)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .check(Expr::cust("reserved >= 0 AND reserved <= on_hand"))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_product_variants_product_id")
                                .from(ProductVariants::Table, ProductVariants::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_product_variants_product_id")
                        .table(ProductVariants::Table)
                        .col(ProductVariants::ProductId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ProductVariants::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Products {
        Table,
        Id,
        Name,
        DefaultPrice,
        RequiresVariant,
        IsEnabled,
        OnHand,
        Reserved,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    pub enum ProductVariants {
        Table,
        Id,
        ProductId,
        Label,
        Sku,
        Price,
        IsEnabled,
        OnHand,
        Reserved,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000003_create_reservation_tables {
    use super::m20240301_000001_create_accounts_tables::Users;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_reservation_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Reservations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Reservations::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(Reservations::Code)
                                .string_len(32)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Reservations::OwnerId).integer().not_null())
                        .col(
                            ColumnDef::new(Reservations::Status)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Reservations::Total)
                                .decimal_len(14, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Reservations::ExpiresAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Reservations::Note).text().null())
                        .col(
                            ColumnDef::new(Reservations::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Reservations::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_reservations_owner_id")
                                .from(Reservations::Table, Reservations::OwnerId)
                                .to(Users::Table, Users::Id),
                        )
                        .to_owned(),
                )
                .await?;

            // The expiration sweep scans by (status, expires_at)
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_reservations_status_expires_at")
                        .table(Reservations::Table)
                        .col(Reservations::Status)
                        .col(Reservations::ExpiresAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_reservations_owner_id")
                        .table(Reservations::Table)
                        .col(Reservations::OwnerId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ReservationLines::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ReservationLines::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(ReservationLines::ReservationId)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ReservationLines::ProductId).integer().null())
                        .col(ColumnDef::new(ReservationLines::VariantId).integer().null())
                        .col(
                            ColumnDef::new(ReservationLines::Quantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ReservationLines::UnitPrice)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ReservationLines::Subtotal)
                                .decimal_len(14, 2)
                                .not_null(),
                        )
                        .check(Expr::cust(
                            "quantity > 0 AND ((product_id IS NULL) <> (variant_id IS NULL))",
                        ))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_reservation_lines_reservation_id")
                                .from(ReservationLines::Table, ReservationLines::ReservationId)
                                .to(Reservations::Table, Reservations::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_reservation_lines_reservation_id")
                        .table(ReservationLines::Table)
                        .col(ReservationLines::ReservationId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ReservationLines::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Reservations::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Reservations {
        Table,
        Id,
        Code,
        OwnerId,
        Status,
        Total,
        ExpiresAt,
        Note,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum ReservationLines {
        Table,
        Id,
        ReservationId,
        ProductId,
        VariantId,
        Quantity,
        UnitPrice,
        Subtotal,
    }
}

mod m20240301_000004_create_sale_tables {
    use super::m20240301_000001_create_accounts_tables::Users;
    use super::m20240301_000003_create_reservation_tables::Reservations;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_sale_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Sales::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Sales::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(Sales::Code)
                                .string_len(32)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Sales::Origin).string_len(16).not_null())
                        .col(ColumnDef::new(Sales::ReservationId).integer().null())
                        .col(ColumnDef::new(Sales::BuyerId).integer().null())
                        .col(ColumnDef::new(Sales::OperatorId).integer().not_null())
                        .col(
                            ColumnDef::new(Sales::Total)
                                .decimal_len(14, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Sales::PaymentMethod)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Sales::Status).string_len(16).not_null())
                        .col(ColumnDef::new(Sales::Note).text().null())
                        .col(
                            ColumnDef::new(Sales::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_sales_reservation_id")
                                .from(Sales::Table, Sales::ReservationId)
                                .to(Reservations::Table, Reservations::Id),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_sales_operator_id")
                                .from(Sales::Table, Sales::OperatorId)
                                .to(Users::Table, Users::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_sales_created_at")
                        .table(Sales::Table)
                        .col(Sales::CreatedAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(SaleLines::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(SaleLines::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(SaleLines::SaleId).integer().not_null())
                        .col(ColumnDef::new(SaleLines::ProductId).integer().null())
                        .col(ColumnDef::new(SaleLines::VariantId).integer().null())
                        .col(ColumnDef::new(SaleLines::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(SaleLines::UnitPrice)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SaleLines::Subtotal)
                                .decimal_len(14, 2)
                                .not_null(),
                        )
                        .check(Expr::cust(
                            "quantity > 0 AND ((product_id IS NULL) <> (variant_id IS NULL))",
                        ))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_sale_lines_sale_id")
                                .from(SaleLines::Table, SaleLines::SaleId)
                                .to(Sales::Table, Sales::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(SaleLines::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Sales::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Sales {
        Table,
        Id,
        Code,
        Origin,
        ReservationId,
        BuyerId,
        OperatorId,
        Total,
        PaymentMethod,
        Status,
        Note,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum SaleLines {
        Table,
        Id,
        SaleId,
        ProductId,
        VariantId,
        Quantity,
        UnitPrice,
        Subtotal,
    }
}

mod m20240301_000005_create_stock_movements_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000005_create_stock_movements_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Append-only ledger; rows are never updated or deleted
            manager
                .create_table(
                    Table::create()
                        .table(StockMovements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockMovements::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(StockMovements::ProductId).integer().null())
                        .col(ColumnDef::new(StockMovements::VariantId).integer().null())
                        .col(ColumnDef::new(StockMovements::ActorId).integer().not_null())
                        .col(ColumnDef::new(StockMovements::Delta).integer().not_null())
                        .col(
                            ColumnDef::new(StockMovements::Kind)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::Reference)
                                .string_len(64)
                                .null(),
                        )
                        .col(ColumnDef::new(StockMovements::Description).text().null())
                        .col(
                            ColumnDef::new(StockMovements::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .check(Expr::cust("(product_id IS NULL) <> (variant_id IS NULL)"))
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_movements_created_at")
                        .table(StockMovements::Table)
                        .col(StockMovements::CreatedAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_movements_reference")
                        .table(StockMovements::Table)
                        .col(StockMovements::Reference)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockMovements::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockMovements {
        Table,
        Id,
        ProductId,
        VariantId,
        ActorId,
        Delta,
        Kind,
        Reference,
        Description,
        CreatedAt,
    }
}
