//! # Sync Scheduler
//!
//! Wall-clock trigger for the orchestrator. Every enabled entity kind is an
//! independent job that runs one pass immediately and then once per its
//! interval, concurrently with the other kinds, until shutdown is requested.
//! A pass already in progress when shutdown fires is allowed to finish.

use std::sync::Arc;
use std::time::Duration;

use metrics::histogram;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::entities::{EntityKind, EntityLister};
use crate::error::SyncError;
use crate::orchestrator::{RunReport, SyncOrchestrator};

/// Cadence of one entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSpec {
    pub kind: EntityKind,
    pub interval: Duration,
}

/// Background scheduler service.
#[derive(Clone)]
pub struct SyncScheduler {
    orchestrator: SyncOrchestrator,
    lister: Arc<dyn EntityLister>,
    jobs: Vec<JobSpec>,
}

impl SyncScheduler {
    pub fn new(
        orchestrator: SyncOrchestrator,
        lister: Arc<dyn EntityLister>,
        jobs: Vec<JobSpec>,
    ) -> Self {
        Self {
            orchestrator,
            lister,
            jobs,
        }
    }

    /// Run every job until `shutdown` fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(jobs = self.jobs.len(), "Starting sync scheduler");

        let mut tasks = JoinSet::new();
        for job in self.jobs.clone() {
            let scheduler = self.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move { scheduler.run_job(job, shutdown).await });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "Scheduler job aborted");
            }
        }

        info!("Sync scheduler stopped");
    }

    /// One pass over every job, concurrently.
    pub async fn run_once(&self) -> Vec<(EntityKind, RunReport)> {
        let mut tasks = JoinSet::new();
        for job in &self.jobs {
            let scheduler = self.clone();
            let kind = job.kind;
            tasks.spawn(async move { (kind, scheduler.tick(kind).await) });
        }

        let mut reports = Vec::with_capacity(self.jobs.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((kind, Ok(report))) => reports.push((kind, report)),
                Ok((kind, Err(err))) => {
                    error!(kind = kind.as_str(), error = %err, "Sync pass failed");
                }
                Err(err) => error!(error = %err, "Sync pass aborted"),
            }
        }
        reports.sort_by_key(|(kind, _)| *kind);
        reports
    }

    async fn run_job(&self, job: JobSpec, shutdown: CancellationToken) {
        info!(
            kind = job.kind.as_str(),
            interval_secs = job.interval.as_secs(),
            "Scheduling sync job"
        );

        loop {
            let tick_started = Instant::now();
            if let Err(err) = self.tick(job.kind).await {
                error!(kind = job.kind.as_str(), error = %err, "Sync tick failed");
            }
            histogram!("devsync_tick_duration_ms", "kind" => job.kind.as_str())
                .record(tick_started.elapsed().as_secs_f64() * 1_000.0);

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(kind = job.kind.as_str(), "Sync job shutdown requested");
                    break;
                }
                _ = sleep(job.interval) => {}
            }
        }
    }

    async fn tick(&self, kind: EntityKind) -> Result<RunReport, SyncError> {
        let report = self.orchestrator.run_kind(kind, self.lister.as_ref()).await?;
        info!(
            kind = kind.as_str(),
            synced = report.synced,
            skipped = report.skipped,
            failed = report.failed,
            "Sync tick complete"
        );
        Ok(report)
    }
}
