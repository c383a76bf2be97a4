//! # Record Store
//!
//! Bulk persistence for fetched upstream records. Incremental entities are
//! upserted on their natural key; full-refresh entities delete their
//! partition and insert the fresh snapshot.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::synced_record::{ActiveModel, Column, Entity, Model};

/// Rows per INSERT statement.
const INSERT_CHUNK: usize = 200;

/// Storage partition of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordPartition {
    pub tenant: String,
    pub sub_tenant: String,
    pub entity_type: String,
    pub entity_id: String,
}

/// A record ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordInput {
    pub natural_key: String,
    pub source_updated_at: Option<DateTime<Utc>>,
    pub payload: JsonValue,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or update `records` by natural key. Returns rows written.
    async fn upsert_batch(
        &self,
        partition: &RecordPartition,
        records: Vec<RecordInput>,
    ) -> Result<u64, DbErr>;

    /// Remove every record of `partition`. Returns rows deleted.
    async fn delete_partition(&self, partition: &RecordPartition) -> Result<u64, DbErr>;
}

/// SeaORM-backed [`RecordStore`].
#[derive(Clone)]
pub struct SyncedRecordRepository {
    db: DatabaseConnection,
}

impl SyncedRecordRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Records of a partition ordered by natural key.
    pub async fn list_partition(&self, partition: &RecordPartition) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::Tenant.eq(partition.tenant.as_str()))
            .filter(Column::SubTenant.eq(partition.sub_tenant.as_str()))
            .filter(Column::EntityType.eq(partition.entity_type.as_str()))
            .filter(Column::EntityId.eq(partition.entity_id.as_str()))
            .order_by_asc(Column::NaturalKey)
            .all(&self.db)
            .await
    }

    pub async fn count_partition(&self, partition: &RecordPartition) -> Result<u64, DbErr> {
        Entity::find()
            .filter(Column::Tenant.eq(partition.tenant.as_str()))
            .filter(Column::SubTenant.eq(partition.sub_tenant.as_str()))
            .filter(Column::EntityType.eq(partition.entity_type.as_str()))
            .filter(Column::EntityId.eq(partition.entity_id.as_str()))
            .count(&self.db)
            .await
    }

    pub async fn count(&self) -> Result<u64, DbErr> {
        Entity::find().count(&self.db).await
    }
}

#[async_trait]
impl RecordStore for SyncedRecordRepository {
    async fn upsert_batch(
        &self,
        partition: &RecordPartition,
        records: Vec<RecordInput>,
    ) -> Result<u64, DbErr> {
        let records = dedupe_by_key(records);
        if records.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().fixed_offset();
        let rows: Vec<ActiveModel> = records
            .into_iter()
            .map(|record| ActiveModel {
                id: Set(Uuid::new_v4()),
                tenant: Set(partition.tenant.clone()),
                sub_tenant: Set(partition.sub_tenant.clone()),
                entity_type: Set(partition.entity_type.clone()),
                entity_id: Set(partition.entity_id.clone()),
                natural_key: Set(record.natural_key),
                source_updated_at: Set(record.source_updated_at.map(|ts| ts.fixed_offset())),
                payload: Set(record.payload),
                fetched_at: Set(now),
            })
            .collect();

        let mut written = 0;
        for chunk in rows.chunks(INSERT_CHUNK) {
            written += Entity::insert_many(chunk.to_vec())
                .on_conflict(
                    OnConflict::columns([
                        Column::Tenant,
                        Column::SubTenant,
                        Column::EntityType,
                        Column::EntityId,
                        Column::NaturalKey,
                    ])
                    .update_columns([Column::SourceUpdatedAt, Column::Payload, Column::FetchedAt])
                    .to_owned(),
                )
                .exec_without_returning(&self.db)
                .await?;
        }

        tracing::debug!(
            tenant = %partition.tenant,
            entity_type = %partition.entity_type,
            written,
            "Upserted record batch"
        );
        Ok(written)
    }

    async fn delete_partition(&self, partition: &RecordPartition) -> Result<u64, DbErr> {
        let result = Entity::delete_many()
            .filter(Column::Tenant.eq(partition.tenant.as_str()))
            .filter(Column::SubTenant.eq(partition.sub_tenant.as_str()))
            .filter(Column::EntityType.eq(partition.entity_type.as_str()))
            .filter(Column::EntityId.eq(partition.entity_id.as_str()))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }
}

/// Keep the last occurrence of each natural key, preserving first-seen order.
fn dedupe_by_key(records: Vec<RecordInput>) -> Vec<RecordInput> {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(records.len());
    let mut unique: Vec<RecordInput> = Vec::with_capacity(records.len());

    for record in records {
        match positions.get(&record.natural_key) {
            Some(&at) => unique[at] = record,
            None => {
                positions.insert(record.natural_key.clone(), unique.len());
                unique.push(record);
            }
        }
    }
    unique
}
