//! Per-cycle log files in `.homeostat/logs/`.
//!
//! One `cycle_NNNN.json` is written per successful cycle. These are product
//! artifacts and are written regardless of `RUST_LOG`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::types::truncate_chars;
use crate::io::atomic::write_json_atomic;

/// Characters of output kept in a cycle log.
pub const LOG_SUMMARY_CHARS: usize = 300;
/// Characters of a log summary carried into the next prompt.
pub const RECENT_SUMMARY_CHARS: usize = 200;
/// Number of recent logs carried into the next prompt.
pub const RECENT_LOGS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleLog {
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub model: String,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub was_exploration: bool,
    #[serde(default)]
    pub summary: String,
}

/// Condensed view of a past cycle for prompt context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleLogSummary {
    pub cycle: u64,
    pub success: bool,
    pub summary: String,
}

pub fn cycle_log_path(logs_dir: &Path, cycle: u64) -> PathBuf {
    logs_dir.join(format!("cycle_{cycle:04}.json"))
}

/// Write the log for `log.cycle`, truncating the summary.
pub fn write_cycle_log(logs_dir: &Path, log: &CycleLog) -> Result<PathBuf> {
    let path = cycle_log_path(logs_dir, log.cycle);
    let log = CycleLog {
        summary: truncate_chars(&log.summary, LOG_SUMMARY_CHARS),
        ..log.clone()
    };
    write_json_atomic(&path, &log)?;
    debug!(path = %path.display(), "cycle log written");
    Ok(path)
}

/// Cycle number from a `cycle_<N>.json` file name.
fn log_cycle_number(path: &Path) -> Option<u64> {
    path.file_name()?
        .to_str()?
        .strip_prefix("cycle_")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

/// The newest `n` cycle logs, newest first. Unreadable files are skipped.
pub fn recent_cycle_logs(logs_dir: &Path, n: usize) -> Vec<CycleLogSummary> {
    let entries = match fs::read_dir(logs_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Vec::new(),
        Err(err) => {
            warn!(dir = %logs_dir.display(), err = %err, "cannot read cycle logs");
            return Vec::new();
        }
    };
    let mut files: Vec<(u64, PathBuf)> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter_map(|path| Some((log_cycle_number(&path)?, path)))
        .collect();
    files.sort_by(|a, b| b.0.cmp(&a.0));

    files
        .iter()
        .filter_map(|(_, path)| {
            let contents = fs::read_to_string(path).ok()?;
            let log: CycleLog = serde_json::from_str(&contents).ok()?;
            Some(CycleLogSummary {
                cycle: log.cycle,
                success: log.success,
                summary: truncate_chars(&log.summary, RECENT_SUMMARY_CHARS),
            })
        })
        .take(n)
        .collect()
}
