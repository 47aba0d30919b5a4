//! Per-run recording hook: a small JSON blob persisted to
//! `<STATE_DIRECTORY>/stats/<timestamp>.json` through the same atomic-write
//! routine the Store uses, and read back (newest-first, capped) by the
//! admin API's `GET /api/stats`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub feeds_total: usize,
    pub feeds_fetched: usize,
    pub feeds_not_modified: usize,
    pub feeds_failed: usize,
    pub feeds_disabled: usize,
    pub feeds_rate_limited: usize,
    pub items_processed: usize,
    pub items_skipped: usize,
    pub messages_sent: usize,
    pub duration_ms: u64,
    /// Resident set size at the time the run finished, in bytes. `None` on
    /// platforms `/proc/self/status` doesn't exist on.
    pub rss_bytes: Option<u64>,
}

/// Reads this process's current RSS from `/proc/self/status`'s `VmRSS` line.
#[cfg(target_os = "linux")]
pub fn current_rss_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find_map(|line| line.strip_prefix("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().next()?.parse().ok()?;
    Some(kb * 1024)
}

#[cfg(not(target_os = "linux"))]
pub fn current_rss_bytes() -> Option<u64> {
    None
}

const MAX_RETURNED: usize = 100;

/// Writes one stats blob to `<dir>/stats/<timestamp>.json`, where `timestamp`
/// is `now` formatted `YYYYMMDDhhmmss`.
pub fn record(dir: &Path, stats: &RunStats, now: DateTime<Utc>) -> Result<PathBuf, StatsError> {
    let stats_dir = dir.join("stats");
    std::fs::create_dir_all(&stats_dir)?;

    let filename = format!("{}.json", now.format("%Y%m%d%H%M%S"));
    let path = stats_dir.join(filename);
    let json = serde_json::to_string_pretty(stats)?;

    let temp_path = stats_dir.join(format!(".{}.tmp.{}", path.file_name().unwrap().to_str().unwrap(), std::process::id()));
    {
        let mut f = std::fs::OpenOptions::new().write(true).create(true).truncate(true).open(&temp_path)?;
        f.write_all(json.as_bytes())?;
        f.sync_all()?;
    }
    std::fs::rename(&temp_path, &path)?;

    Ok(path)
}

/// Reads up to `MAX_RETURNED` most-recent run stats blobs, newest first.
pub fn load_recent(dir: &Path) -> Result<Vec<RunStats>, StatsError> {
    let stats_dir = dir.join("stats");
    if !stats_dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries: Vec<PathBuf> = std::fs::read_dir(&stats_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    entries.sort();
    entries.reverse();
    entries.truncate(MAX_RETURNED);

    entries
        .into_iter()
        .map(|p| {
            let raw = std::fs::read_to_string(&p)?;
            Ok(serde_json::from_str(&raw)?)
        })
        .collect()
}
