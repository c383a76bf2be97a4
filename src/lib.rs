//! # devsync
//!
//! Incremental synchronization engine: pulls paginated collections (commits,
//! builds, work items, ...) from a remote HTTP service into a local store,
//! refreshing each entity on an adaptive schedule and persisting it
//! idempotently.

pub mod cache;
pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod paginator;
pub mod repositories;
pub mod retry;
pub mod schedule;
pub mod scheduler;
pub mod telemetry;
pub mod transport;
pub use migration;
