//! # Cursor Store
//!
//! Durable `entity key → last synchronized at` map backed by `sync_cursors`.
//! `set` stamps the current time ("when we last attempted"), not the newest
//! record's own timestamp; the observed watermark is kept alongside for
//! diagnostics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, Set};

use crate::models::sync_cursor::{ActiveModel, Column, Entity, Model};

/// Per-entity cursor persistence used by the orchestrator.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Last successful sync time for `entity_key`, if any.
    async fn get(&self, entity_key: &str) -> Result<Option<DateTime<Utc>>, DbErr>;

    /// Mark `entity_key` as synchronized now.
    ///
    /// A `None` watermark keeps the previously stored one.
    async fn set(&self, entity_key: &str, watermark: Option<DateTime<Utc>>) -> Result<(), DbErr>;
}

/// SeaORM-backed [`CursorStore`].
#[derive(Clone)]
pub struct SyncCursorRepository {
    db: DatabaseConnection,
}

impl SyncCursorRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Full cursor row for `entity_key`.
    pub async fn find(&self, entity_key: &str) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(entity_key.to_string()).one(&self.db).await
    }

    /// Upsert the cursor with an explicit sync time.
    pub async fn set_at(
        &self,
        entity_key: &str,
        synced_at: DateTime<Utc>,
        watermark: Option<DateTime<Utc>>,
    ) -> Result<(), DbErr> {
        let now = Utc::now().fixed_offset();
        let cursor = ActiveModel {
            entity_key: Set(entity_key.to_string()),
            last_sync_at: Set(synced_at.fixed_offset()),
            watermark: Set(watermark.map(|w| w.fixed_offset())),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let mut update = vec![Column::LastSyncAt, Column::UpdatedAt];
        if watermark.is_some() {
            update.push(Column::Watermark);
        }

        Entity::insert(cursor)
            .on_conflict(
                OnConflict::column(Column::EntityKey)
                    .update_columns(update)
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        tracing::debug!(entity_key, synced_at = %synced_at, "Cursor updated");
        Ok(())
    }

    pub async fn count(&self) -> Result<u64, DbErr> {
        Entity::find().count(&self.db).await
    }
}

#[async_trait]
impl CursorStore for SyncCursorRepository {
    async fn get(&self, entity_key: &str) -> Result<Option<DateTime<Utc>>, DbErr> {
        Ok(self
            .find(entity_key)
            .await?
            .map(|cursor| cursor.last_sync_at.with_timezone(&Utc)))
    }

    async fn set(&self, entity_key: &str, watermark: Option<DateTime<Utc>>) -> Result<(), DbErr> {
        self.set_at(entity_key, Utc::now(), watermark).await
    }
}
