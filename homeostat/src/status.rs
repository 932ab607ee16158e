//! Read-only views for `homeostat status` and `homeostat health`.
//!
//! Neither report takes the cycle lock or writes any file.

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::backoff::prune_expired;
use crate::core::criticality::{CriticalityEstimate, CriticalityInputs, estimate_detailed};
use crate::core::experience::MAX_EXPERIENCES;
use crate::core::types::{ErrorRecord, HealthSnapshot};
use crate::io::backlog::load_backlog;
use crate::io::config::load_config;
use crate::io::experience_store::load_experiences;
use crate::io::init::HomeostatPaths;
use crate::io::registry_store::load_registry;
use crate::io::state_store::load_state;
use crate::io::telemetry::TelemetrySource;

/// Capabilities listed in a status report.
pub const STATUS_CAPABILITIES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilitySummary {
    pub id: String,
    pub confidence: f64,
    pub times_used: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub cycle_count: u64,
    pub criticality: f64,
    /// Errors still inside the backoff window.
    pub recent_errors: usize,
    pub last_error: Option<ErrorRecord>,
    pub last_session_id: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: Option<DateTime<Utc>>,
    pub pending_tasks: usize,
    pub exploration_rate: f64,
    pub experiences: usize,
    pub capabilities: usize,
    pub top_capabilities: Vec<CapabilitySummary>,
    pub anti_patterns: usize,
    pub lock_held: bool,
}

/// Summarize persisted state as of `now`.
pub fn status_report(root: &Path, now: DateTime<Utc>) -> Result<StatusReport> {
    let paths = HomeostatPaths::new(root);
    let cfg = load_config(&paths.config_path)?;
    let mut state = load_state(&paths.state_path, now);
    prune_expired(&mut state.errors, now, &cfg.backoff);
    let registry = load_registry(&paths.registry_path);
    let experiences = load_experiences(&paths.experiences_path, MAX_EXPERIENCES);

    let top_capabilities = registry
        .ids_by_confidence()
        .into_iter()
        .take(STATUS_CAPABILITIES)
        .filter_map(|id| {
            registry.capabilities.get(id).map(|cap| CapabilitySummary {
                id: id.to_string(),
                confidence: cap.confidence,
                times_used: cap.times_used,
            })
        })
        .collect();

    Ok(StatusReport {
        cycle_count: state.cycle_count,
        criticality: state.criticality,
        recent_errors: state.errors.len(),
        last_error: state.errors.last().cloned(),
        last_session_id: state.last_session_id,
        created: state.created,
        updated: state.updated,
        pending_tasks: load_backlog(&paths.tasks_dir).len(),
        exploration_rate: registry.exploration_log.exploration_rate,
        experiences: experiences.len(),
        capabilities: registry.capabilities.len(),
        top_capabilities,
        anti_patterns: registry.anti_patterns.len(),
        lock_held: paths.lock_path.exists(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub health: HealthSnapshot,
    #[serde(flatten)]
    pub estimate: CriticalityEstimate,
}

/// Take a fresh snapshot and estimate criticality without persisting either.
pub fn health_report<T: TelemetrySource>(
    root: &Path,
    telemetry: &T,
    now: DateTime<Utc>,
) -> Result<HealthReport> {
    let paths = HomeostatPaths::new(root);
    let cfg = load_config(&paths.config_path)?;
    let mut state = load_state(&paths.state_path, now);
    prune_expired(&mut state.errors, now, &cfg.backoff);
    let health = telemetry.snapshot();
    let estimate = estimate_detailed(
        &CriticalityInputs {
            health: &health,
            errors: &state.errors,
            last_update: state.updated,
            cycle_count: state.cycle_count,
            created: state.created,
            now,
        },
        &cfg.criticality,
    );
    Ok(HealthReport { health, estimate })
}
