//! Database migrations for the devsync store.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_12_01_000001_create_sync_cursors;
mod m2025_12_01_000002_create_synced_records;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_12_01_000001_create_sync_cursors::Migration),
            Box::new(m2025_12_01_000002_create_synced_records::Migration),
        ]
    }
}
