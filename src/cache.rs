//! # Disk Cache
//!
//! Key→JSON cache stored under a single directory. Each entry is a
//! `<segments>.json` file with a sibling `<segments>.last-fetch` marker
//! holding the RFC 3339 write time; validity is judged at read time against
//! the caller's TTL and nothing is evicted proactively. Entries are returned
//! exactly as written; date fields come back as dates when `T` declares them
//! as `DateTime`.
//!
//! Concurrent misses on the same key both run their producer and both write;
//! the last writer wins.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use metrics::counter;
use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{CacheError, SyncError};

const ENTRY_SUFFIX: &str = ".json";
const MARKER_SUFFIX: &str = ".last-fetch";
const SEGMENT_SEPARATOR: &str = "__";

static ISO_DATE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})$").ok()
});

/// Shared cache directory handle; cheap to clone.
#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Entry path for `key_parts`.
    pub fn entry_path(&self, key_parts: &[String]) -> PathBuf {
        self.root
            .join(format!("{}{}", file_stem(key_parts), ENTRY_SUFFIX))
    }

    fn marker_path(&self, key_parts: &[String]) -> PathBuf {
        self.root
            .join(format!("{}{}", file_stem(key_parts), MARKER_SUFFIX))
    }

    /// Return the cached value for `key_parts` if it is younger than `ttl`,
    /// otherwise run `producer`, persist its output and return it.
    ///
    /// A zero `ttl` bypasses reads but still writes the fresh value.
    pub async fn using_cache<T, F, Fut>(
        &self,
        key_parts: &[String],
        ttl: Duration,
        producer: F,
    ) -> Result<T, SyncError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        if !ttl.is_zero() {
            if let Some(value) = self.read_fresh(key_parts, ttl).await? {
                counter!("devsync_cache_lookups_total", "result" => "hit").increment(1);
                return Ok(value);
            }
        }
        counter!("devsync_cache_lookups_total", "result" => "miss").increment(1);

        let value = producer().await?;
        self.write(key_parts, &value).await?;
        Ok(value)
    }

    async fn read_fresh<T: DeserializeOwned>(
        &self,
        key_parts: &[String],
        ttl: Duration,
    ) -> Result<Option<T>, CacheError> {
        let marker = self.marker_path(key_parts);
        let Some(written_at) = read_marker(&marker).await? else {
            return Ok(None);
        };

        let age = Utc::now() - written_at;
        let Ok(age) = age.to_std() else {
            // marker in the future: clock moved backwards, treat as stale
            return Ok(None);
        };
        if age >= ttl {
            debug!(path = %marker.display(), age_secs = age.as_secs(), "Cache entry expired");
            return Ok(None);
        }

        let path = self.entry_path(key_parts);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };

        match serde_json::from_str::<T>(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Discarding unreadable cache entry");
                Ok(None)
            }
        }
    }

    async fn write<T: Serialize>(&self, key_parts: &[String], value: &T) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_error(&self.root, e))?;

        let path = self.entry_path(key_parts);
        let body = serde_json::to_vec(value)?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| io_error(&path, e))?;

        let marker = self.marker_path(key_parts);
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        tokio::fs::write(&marker, stamp)
            .await
            .map_err(|e| io_error(&marker, e))?;

        Ok(())
    }
}

async fn read_marker(path: &Path) -> Result<Option<DateTime<Utc>>, CacheError> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => Ok(DateTime::parse_from_rfc3339(raw.trim())
            .ok()
            .map(|ts| ts.with_timezone(&Utc))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error(path, e)),
    }
}

fn io_error(path: &Path, source: std::io::Error) -> CacheError {
    CacheError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn file_stem(key_parts: &[String]) -> String {
    key_parts
        .iter()
        .map(|part| encode_segment(part))
        .collect::<Vec<_>>()
        .join(SEGMENT_SEPARATOR)
}

/// Percent-encode a key segment so that distinct segments never share a
/// file name. `_` is escaped too, keeping the separator unambiguous.
fn encode_segment(segment: &str) -> String {
    urlencoding::encode(segment).replace('_', "%5F")
}

/// Parse a date-shaped string (optional fractional seconds, `Z` or offset).
pub fn parse_iso_date(s: &str) -> Option<DateTime<Utc>> {
    let pattern = ISO_DATE.as_ref()?;
    if !pattern.is_match(s) {
        return None;
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_date_shapes() {
        assert!(parse_iso_date("2025-03-04T05:06:07Z").is_some());
        assert!(parse_iso_date("2025-03-04T05:06:07.123456Z").is_some());
        assert!(parse_iso_date("2025-03-04T05:06:07+02:00").is_some());
        assert!(parse_iso_date("2025-03-04").is_none());
        assert!(parse_iso_date("build 2025-03-04T05:06:07Z").is_none());
        assert!(parse_iso_date("2025-13-04T05:06:07Z").is_none());
    }

    #[test]
    fn entry_path_joins_encoded_segments() {
        let cache = DiskCache::new("/tmp/cache");
        let path = cache.entry_path(&[
            "acme".to_string(),
            "Web App".to_string(),
            "commits".to_string(),
            "page-0".to_string(),
        ]);
        assert_eq!(
            path,
            PathBuf::from("/tmp/cache/acme__Web%20App__commits__page-0.json")
        );
    }

    #[test]
    fn similar_segments_map_to_distinct_files() {
        let stems: Vec<String> = [
            vec!["front end"],
            vec!["front-end"],
            vec!["front_end"],
            vec!["front", "end"],
            vec!["front_", "end"],
            vec!["front", "_end"],
            vec!["front/end"],
        ]
        .iter()
        .map(|parts| file_stem(&parts.iter().map(|p| p.to_string()).collect::<Vec<_>>()))
        .collect();

        for (i, a) in stems.iter().enumerate() {
            for b in &stems[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
