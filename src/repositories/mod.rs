//! # Repository Layer
//!
//! Store traits consumed by the orchestrator and their SeaORM implementations.

pub mod sync_cursor;
pub mod synced_record;

pub use sync_cursor::{CursorStore, SyncCursorRepository};
pub use synced_record::{RecordInput, RecordPartition, RecordStore, SyncedRecordRepository};
