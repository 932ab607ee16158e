//! System state storage (`.homeostat/state/state.json`).

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::types::{ErrorRecord, HealthSnapshot};
use crate::io::atomic::write_json_atomic;

pub const DEFAULT_CRITICALITY: f64 = 0.5;

/// Persisted controller state, rewritten at the end of every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    /// Number of successful cycles so far.
    #[serde(default)]
    pub cycle_count: u64,
    #[serde(default = "default_criticality")]
    pub criticality: f64,
    /// Recent failures, newest last.
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
    /// Last observed health, kept for observability.
    #[serde(default)]
    pub health: Option<HealthSnapshot>,
    /// Continuation token for the reasoner session.
    #[serde(default)]
    pub last_session_id: Option<String>,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
}

fn default_criticality() -> f64 {
    DEFAULT_CRITICALITY
}

impl SystemState {
    pub fn new(created: DateTime<Utc>) -> Self {
        Self {
            cycle_count: 0,
            criticality: DEFAULT_CRITICALITY,
            errors: Vec::new(),
            health: None,
            last_session_id: None,
            created,
            updated: None,
        }
    }
}

/// Load state from disk.
///
/// A missing or unreadable file yields fresh state created at `now`; the
/// corruption case is logged so it is not silently papered over.
pub fn load_state(path: &Path, now: DateTime<Utc>) -> SystemState {
    debug!(path = %path.display(), "loading state");
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!("no state file, starting fresh");
            return SystemState::new(now);
        }
        Err(err) => {
            warn!(path = %path.display(), err = %err, "cannot read state, starting fresh");
            return SystemState::new(now);
        }
    };
    match serde_json::from_str::<SystemState>(&contents) {
        Ok(state) => {
            debug!(
                cycle_count = state.cycle_count,
                errors = state.errors.len(),
                "state loaded"
            );
            state
        }
        Err(err) => {
            warn!(path = %path.display(), err = %err, "corrupt state, starting fresh");
            SystemState::new(now)
        }
    }
}

/// Atomically write state to disk (temp file + rename).
pub fn write_state(path: &Path, state: &SystemState) -> Result<()> {
    debug!(
        path = %path.display(),
        cycle_count = state.cycle_count,
        criticality = state.criticality,
        "writing state"
    );
    write_json_atomic(path, state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixed_now;
    use chrono::TimeDelta;

    /// Verifies write then read preserves every field, floats included.
    #[test]
    fn state_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        let now = fixed_now();
        let state = SystemState {
            cycle_count: 42,
            criticality: 0.37,
            errors: vec![
                ErrorRecord::new(now - TimeDelta::minutes(20), "timeout"),
                ErrorRecord::new(now - TimeDelta::minutes(5), "exit 1"),
            ],
            health: Some(HealthSnapshot {
                disk_used_pct: Some(71.3),
                mem_available_mb: Some(2048),
                pending_tasks: 3,
                scheduler_ok: true,
            }),
            last_session_id: Some("sess-9".to_string()),
            created: now - TimeDelta::days(3),
            updated: Some(now),
        };

        write_state(&path, &state).expect("write");
        assert_eq!(load_state(&path, now), state);
    }

    #[test]
    fn missing_file_yields_fresh_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = load_state(&temp.path().join("state.json"), fixed_now());
        assert_eq!(state, SystemState::new(fixed_now()));
        assert_eq!(state.criticality, 0.5);
    }

    #[test]
    fn corrupt_file_yields_fresh_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        fs::write(&path, "{\"cycle_count\": 3,").expect("write");
        assert_eq!(load_state(&path, fixed_now()), SystemState::new(fixed_now()));
    }

    #[test]
    fn legacy_error_field_name_is_accepted() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        fs::write(
            &path,
            r#"{"cycle_count": 7, "created": "2026-01-01T00:00:00Z",
                "errors": [{"time": "2026-01-01T00:10:00Z", "error": "boom"}]}"#,
        )
        .expect("write");
        let state = load_state(&path, fixed_now());
        assert_eq!(state.cycle_count, 7);
        assert_eq!(state.criticality, DEFAULT_CRITICALITY);
        assert_eq!(state.errors[0].message, "boom");
    }
}
