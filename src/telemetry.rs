//! Structured logging for the sync daemon.
//!
//! Events are written to stdout as JSON lines (`DEVSYNC_LOG_FORMAT=json`, the
//! default) or as multi-line human output (`pretty`). `RUST_LOG` overrides
//! `DEVSYNC_LOG_LEVEL` when set. Records sqlx and [`crate::db`] emit through
//! the `log` crate are bridged into the same subscriber.

use std::any::type_name_of_val;
use std::sync::atomic::{AtomicBool, Ordering};

use log::LevelFilter;
use thiserror::Error;
use tracing::Subscriber;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
};

use crate::config::AppConfig;

#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("log crate already has a non-tracing logger: {0}")]
    LogBridge(#[from] log::SetLoggerError),
    #[error("a global tracing subscriber is already installed: {0}")]
    Subscriber(#[from] SetGlobalDefaultError),
}

static SUBSCRIBER_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Install the process-wide subscriber. Calls after the first successful one
/// return `Ok` without touching anything.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if SUBSCRIBER_INSTALLED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    let subscriber = tracing_subscriber::registry()
        .with(level_filter(&config.log_level))
        .with(output_layer(&config.log_format));
    let installed = tracing::subscriber::set_global_default(subscriber)
        .map_err(TelemetryInitError::from)
        .and_then(|()| install_log_bridge());
    if installed.is_err() {
        SUBSCRIBER_INSTALLED.store(false, Ordering::SeqCst);
    }
    installed
}

fn install_log_bridge() -> Result<(), TelemetryInitError> {
    match LogTracer::builder().with_max_level(LevelFilter::Trace).init() {
        Ok(()) => Ok(()),
        // A bridge left over from an earlier attempt still forwards to us.
        Err(_) if type_name_of_val(log::logger()).contains("LogTracer") => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn level_filter(configured: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured))
}

fn output_layer<S>(format: &str) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    match format {
        "pretty" => fmt::layer().pretty().boxed(),
        // entity and run spans ride along on every line
        _ => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
    }
}
