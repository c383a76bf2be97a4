//! Migration to create the synced_records table.
//!
//! Stores upstream records partitioned by (tenant, sub_tenant, entity_type, entity_id).
//! The unique natural-key index backs idempotent upserts.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncedRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncedRecords::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncedRecords::Tenant).text().not_null())
                    .col(
                        ColumnDef::new(SyncedRecords::SubTenant)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(SyncedRecords::EntityType).text().not_null())
                    .col(
                        ColumnDef::new(SyncedRecords::EntityId)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(SyncedRecords::NaturalKey).text().not_null())
                    .col(
                        ColumnDef::new(SyncedRecords::SourceUpdatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(SyncedRecords::Payload).json_binary().not_null())
                    .col(
                        ColumnDef::new(SyncedRecords::FetchedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_synced_records_natural_key")
                    .table(SyncedRecords::Table)
                    .col(SyncedRecords::Tenant)
                    .col(SyncedRecords::SubTenant)
                    .col(SyncedRecords::EntityType)
                    .col(SyncedRecords::EntityId)
                    .col(SyncedRecords::NaturalKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_synced_records_natural_key")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(SyncedRecords::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncedRecords {
    Table,
    Id,
    Tenant,
    SubTenant,
    EntityType,
    EntityId,
    NaturalKey,
    SourceUpdatedAt,
    Payload,
    FetchedAt,
}
