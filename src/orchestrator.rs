//! # Sync Orchestrator
//!
//! Walks an entity matrix, decides per entity whether a refresh is due,
//! pages through the upstream collection and persists every page before the
//! next one is requested. Each entity runs in its own task, so a failure or a
//! panic in one entity never affects the others; the outcome of every entity
//! is a tagged [`EntityOutcome`] or a [`SyncError`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::entities::{
    Connection, EntityKind, EntityLister, EntityPageRequest, EntityRef, PersistMode,
    extract_record,
};
use crate::error::{ErrorClass, SyncError};
use crate::paginator::{ChunkHandler, ChunkedPaginator, Page};
use crate::repositories::{CursorStore, RecordPartition, RecordStore};
use crate::schedule::AdaptiveSchedule;

/// Tunables for a sync pass.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Items requested per page for offset and header-continuation kinds.
    pub page_size: u32,
    /// Overlap subtracted from the cursor when used as the fetch-from value.
    pub lookback: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: 100,
            lookback: Duration::zero(),
        }
    }
}

/// Why an entity was not fetched, or fetched nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotDue,
    NotFound,
    BadRequest,
}

/// Terminal state of a non-failed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityOutcome {
    Synced { pages: u32, records: u64 },
    Skipped(SkipReason),
}

/// Aggregate counters for one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunReport {
    pub fn total(&self) -> usize {
        self.synced + self.skipped + self.failed
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "synced={} skipped={} failed={}",
            self.synced, self.skipped, self.failed
        )
    }
}

/// Drives sync runs; clones share every collaborator.
#[derive(Clone)]
pub struct SyncOrchestrator {
    paginator: Arc<ChunkedPaginator>,
    cursors: Arc<dyn CursorStore>,
    records: Arc<dyn RecordStore>,
    schedule: Arc<AdaptiveSchedule>,
    connections: Arc<HashMap<String, Connection>>,
    settings: SyncSettings,
}

impl SyncOrchestrator {
    pub fn new(
        paginator: ChunkedPaginator,
        cursors: Arc<dyn CursorStore>,
        records: Arc<dyn RecordStore>,
        schedule: AdaptiveSchedule,
        connections: Vec<Connection>,
        settings: SyncSettings,
    ) -> Self {
        let connections = connections
            .into_iter()
            .map(|connection| (connection.tenant.clone(), connection))
            .collect();

        Self {
            paginator: Arc::new(paginator),
            cursors,
            records,
            schedule: Arc::new(schedule),
            connections: Arc::new(connections),
            settings,
        }
    }

    /// Run one pass over `matrix`, evaluating schedules against the current time.
    pub async fn run(&self, matrix: Vec<EntityRef>) -> RunReport {
        self.run_at(matrix, Utc::now()).await
    }

    /// Run one pass over `matrix` for the poller tick happening at `tick`.
    #[instrument(skip(self, matrix), fields(entities = matrix.len()))]
    pub async fn run_at(&self, matrix: Vec<EntityRef>, tick: DateTime<Utc>) -> RunReport {
        let mut tasks = JoinSet::new();
        for entity in matrix {
            let orchestrator = self.clone();
            tasks.spawn(async move {
                let outcome = orchestrator.sync_entity(&entity, tick).await;
                (entity, outcome)
            });
        }

        let mut report = RunReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((entity, Ok(outcome))) => {
                    let label = match outcome {
                        EntityOutcome::Synced { .. } => {
                            report.synced += 1;
                            "synced"
                        }
                        EntityOutcome::Skipped(_) => {
                            report.skipped += 1;
                            "skipped"
                        }
                    };
                    counter!(
                        "devsync_entities_total",
                        "kind" => entity.kind.as_str(),
                        "outcome" => label
                    )
                    .increment(1);
                }
                Ok((entity, Err(err))) => {
                    report.failed += 1;
                    error!(
                        entity = %entity,
                        class = err.class().as_str(),
                        error = %err,
                        "Entity sync failed"
                    );
                    counter!(
                        "devsync_entities_total",
                        "kind" => entity.kind.as_str(),
                        "outcome" => "failed"
                    )
                    .increment(1);
                }
                Err(join_err) => {
                    let err = SyncError::from(join_err);
                    report.failed += 1;
                    error!(class = err.class().as_str(), error = %err, "Entity sync task aborted");
                }
            }
        }

        info!(%report, "Sync run finished");
        report
    }

    /// List the matrix for `kind` and run it.
    pub async fn run_kind(
        &self,
        kind: EntityKind,
        lister: &dyn EntityLister,
    ) -> Result<RunReport, SyncError> {
        let started = Instant::now();
        let matrix = lister.list(kind).await?;
        debug!(kind = kind.as_str(), entities = matrix.len(), "Listed entity matrix");

        let report = self.run(matrix).await;
        histogram!("devsync_run_duration_ms", "kind" => kind.as_str())
            .record(started.elapsed().as_secs_f64() * 1_000.0);
        Ok(report)
    }

    /// Synchronize one entity.
    ///
    /// Expected-absence failures (404/400) become [`SkipReason`]s and leave
    /// the cursor untouched; any other failure is returned.
    #[instrument(skip(self, entity), fields(entity = %entity))]
    pub async fn sync_entity(
        &self,
        entity: &EntityRef,
        tick: DateTime<Utc>,
    ) -> Result<EntityOutcome, SyncError> {
        let key = entity.cursor_key();
        let last_sync = self.cursors.get(&key).await?;

        if let Some(last_sync) = last_sync {
            if !self.schedule.due_at(last_sync, tick) {
                debug!(last_sync = %last_sync, "Entity not due");
                return Ok(EntityOutcome::Skipped(SkipReason::NotDue));
            }
        }

        match self.fetch_and_persist(entity, last_sync).await {
            Ok(summary) => {
                self.cursors.set(&key, summary.watermark).await?;
                info!(
                    pages = summary.pages,
                    records = summary.records,
                    dropped = summary.dropped,
                    "Entity synced"
                );
                Ok(EntityOutcome::Synced {
                    pages: summary.pages,
                    records: summary.records,
                })
            }
            Err(err) => match err.class() {
                ErrorClass::NotFound => {
                    info!(error = %err, "Entity not found upstream, skipping");
                    Ok(EntityOutcome::Skipped(SkipReason::NotFound))
                }
                ErrorClass::BadRequest => {
                    info!(error = %err, "Entity has nothing to fetch, skipping");
                    Ok(EntityOutcome::Skipped(SkipReason::BadRequest))
                }
                ErrorClass::Timeout | ErrorClass::Fatal => Err(err),
            },
        }
    }

    async fn fetch_and_persist(
        &self,
        entity: &EntityRef,
        last_sync: Option<DateTime<Utc>>,
    ) -> Result<PersistSummary, SyncError> {
        let connection = self.connections.get(&entity.tenant).ok_or_else(|| {
            SyncError::Config(format!("no connection configured for tenant '{}'", entity.tenant))
        })?;

        let since = last_sync.map(|last| last - self.settings.lookback);
        let request =
            EntityPageRequest::new(entity.clone(), connection, since, self.settings.page_size)?;

        let mut handler = PersistHandler::new(entity.clone(), self.records.clone());
        let pages = self.paginator.paginate(&request, &mut handler).await?;

        Ok(PersistSummary {
            pages,
            records: handler.records,
            dropped: handler.dropped,
            watermark: handler.watermark,
        })
    }
}

struct PersistSummary {
    pages: u32,
    records: u64,
    dropped: usize,
    watermark: Option<DateTime<Utc>>,
}

/// Persists each page before the paginator advances.
struct PersistHandler {
    entity: EntityRef,
    partition: RecordPartition,
    store: Arc<dyn RecordStore>,
    cleared: bool,
    records: u64,
    dropped: usize,
    watermark: Option<DateTime<Utc>>,
}

impl PersistHandler {
    fn new(entity: EntityRef, store: Arc<dyn RecordStore>) -> Self {
        let partition = entity.partition();
        Self {
            entity,
            partition,
            store,
            cleared: false,
            records: 0,
            dropped: 0,
            watermark: None,
        }
    }
}

#[async_trait]
impl ChunkHandler<Value> for PersistHandler {
    async fn on_chunk(&mut self, page: Page<Value>) -> Result<(), SyncError> {
        if self.entity.kind.persist_mode() == PersistMode::Replace && !self.cleared {
            let deleted = self.store.delete_partition(&self.partition).await?;
            debug!(deleted, "Cleared partition for full replace");
            self.cleared = true;
        }

        let received = page.items.len();
        let batch: Vec<_> = page
            .items
            .into_iter()
            .filter_map(|item| extract_record(&self.entity, item))
            .collect();

        let dropped = received - batch.len();
        if dropped > 0 {
            warn!(page = page.index, dropped, "Dropping items without a natural key");
            self.dropped += dropped;
        }

        if let Some(newest) = batch.iter().filter_map(|r| r.source_updated_at).max() {
            self.watermark = Some(self.watermark.map_or(newest, |w| w.max(newest)));
        }

        self.records += self.store.upsert_batch(&self.partition, batch).await?;
        Ok(())
    }
}
