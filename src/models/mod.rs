//! # Data Models
//!
//! SeaORM entities backing the cursor store and the record store.

pub mod sync_cursor;
pub mod synced_record;

pub use sync_cursor::Entity as SyncCursor;
pub use synced_record::Entity as SyncedRecord;
