//! Test utilities shared by the integration tests.
//!
//! Provides an in-memory SQLite store with migrations applied and
//! preconfigured transport/paginator instances suited to a local mock
//! upstream.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use devsync::cache::DiskCache;
use devsync::entities::Connection;
use devsync::orchestrator::{SyncOrchestrator, SyncSettings};
use devsync::paginator::{ChunkedPaginator, PaginatorSettings};
use devsync::repositories::{SyncCursorRepository, SyncedRecordRepository};
use devsync::retry::RetryPolicy;
use devsync::schedule::AdaptiveSchedule;
use devsync::transport::{RateLimitedTransport, TransportSettings};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    // A single connection keeps every query on the same in-memory database.
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).sqlx_logging(false);
    let db = Database::connect(opt).await?;

    Migrator::up(&db, None).await?;

    Ok(db)
}

/// Transport with near-instant timeout retries.
pub fn test_transport(max_concurrent: usize, timeout: Duration, retries: u32) -> RateLimitedTransport {
    RateLimitedTransport::new(TransportSettings {
        max_concurrent,
        timeout,
        retry: RetryPolicy::new(retries, Duration::from_millis(1)),
        ..TransportSettings::default()
    })
    .expect("transport builds")
}

/// Paginator over a cache rooted at `cache_dir`.
pub fn test_paginator(cache_dir: &Path, cache_ttl: Duration) -> ChunkedPaginator {
    ChunkedPaginator::new(
        test_transport(4, Duration::from_secs(5), 0),
        DiskCache::new(cache_dir),
        PaginatorSettings {
            cache_ttl,
            timeout: None,
            max_pages: 50,
        },
    )
}

pub struct TestEngine {
    pub db: DatabaseConnection,
    pub cursors: Arc<SyncCursorRepository>,
    pub records: Arc<SyncedRecordRepository>,
    pub orchestrator: SyncOrchestrator,
}

/// Orchestrator wired to a fresh in-memory store, the default tier table
/// with an hourly base frequency, a page size of 2 and caching disabled.
pub async fn test_engine(cache_dir: &Path, connections: Vec<Connection>) -> Result<TestEngine> {
    test_engine_with_cache_ttl(cache_dir, connections, Duration::ZERO).await
}

/// Same as [`test_engine`] with page caching enabled for `cache_ttl`.
pub async fn test_engine_with_cache_ttl(
    cache_dir: &Path,
    connections: Vec<Connection>,
    cache_ttl: Duration,
) -> Result<TestEngine> {
    let db = setup_test_db().await?;
    let cursors = Arc::new(SyncCursorRepository::new(db.clone()));
    let records = Arc::new(SyncedRecordRepository::new(db.clone()));

    let orchestrator = SyncOrchestrator::new(
        test_paginator(cache_dir, cache_ttl),
        cursors.clone(),
        records.clone(),
        AdaptiveSchedule::with_default_tiers(chrono::Duration::hours(1))?,
        connections,
        SyncSettings {
            page_size: 2,
            lookback: chrono::Duration::zero(),
        },
    );

    Ok(TestEngine {
        db,
        cursors,
        records,
        orchestrator,
    })
}
