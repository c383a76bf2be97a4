//! SyncedRecord entity model
//!
//! SeaORM entity for the `synced_records` table. Records are partitioned by
//! `(tenant, sub_tenant, entity_type, entity_id)` and unique per natural key
//! within a partition; absent sub-tenant or entity id are stored as `""`.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "synced_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub tenant: String,

    #[sea_orm(column_type = "Text")]
    pub sub_tenant: String,

    /// Entity kind, e.g. `commits`
    #[sea_orm(column_type = "Text")]
    pub entity_type: String,

    #[sea_orm(column_type = "Text")]
    pub entity_id: String,

    /// Upstream identifier of the record (commit id, build id, ...)
    #[sea_orm(column_type = "Text")]
    pub natural_key: String,

    /// Upstream modification time, when the record carries one
    pub source_updated_at: Option<DateTimeWithTimeZone>,

    /// Upstream record as fetched
    #[sea_orm(column_type = "JsonBinary")]
    pub payload: JsonValue,

    pub fetched_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
