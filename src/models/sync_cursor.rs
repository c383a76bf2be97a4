//! SyncCursor entity model
//!
//! SeaORM entity for the `sync_cursors` table: one row per synchronized
//! entity, holding when it was last successfully fetched.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_cursors")]
pub struct Model {
    /// Cursor key, e.g. `acme:Web:commits:frontend`
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub entity_key: String,

    /// When the last successful fetch was attempted
    pub last_sync_at: DateTimeWithTimeZone,

    /// Newest record timestamp observed by the last successful fetch
    pub watermark: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
