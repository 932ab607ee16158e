//! Shared deterministic types for homeostat core logic.
//!
//! These types define stable contracts between core components and the
//! persisted state files. They carry no I/O and must serialize identically
//! across runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Host health observed at the start of a cycle.
///
/// Probes that could not be read are `None` and contribute no penalty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Percentage of the root filesystem in use (0–100).
    pub disk_used_pct: Option<f64>,
    /// Memory available to new processes, in MiB.
    pub mem_available_mb: Option<u64>,
    /// Actionable items in the task backlog.
    pub pending_tasks: usize,
    /// Whether the periodic trigger that drives cycles is still installed.
    pub scheduler_ok: bool,
}

impl Default for HealthSnapshot {
    fn default() -> Self {
        Self {
            disk_used_pct: None,
            mem_available_mb: None,
            pending_tasks: 0,
            scheduler_ok: true,
        }
    }
}

/// A delegate failure remembered for backoff and criticality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub time: DateTime<Utc>,
    #[serde(alias = "error")]
    pub message: String,
}

impl ErrorRecord {
    pub fn new(time: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            time,
            message: message.into(),
        }
    }
}

/// Truncate `text` to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
