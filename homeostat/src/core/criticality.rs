//! Criticality estimation: health and error history folded into one scalar.
//!
//! `0.0` means chaos (stabilize), `0.5` viable, `1.0` stagnant (explore).
//! Everything here is a pure function of its inputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::backoff::saturating_seconds;
use crate::core::types::{ErrorRecord, HealthSnapshot, round2};

/// Weights and thresholds for the chaos and stagnation sub-scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CriticalityPolicy {
    /// Errors younger than this count toward chaos.
    pub error_window_secs: i64,
    /// Number of recent errors that saturates the error term.
    pub error_saturation: f64,
    /// Maximum chaos contributed by recent errors.
    pub error_weight: f64,
    /// Chaos added when the scheduler is not installed.
    pub scheduler_penalty: f64,
    pub disk_used_pct_limit: f64,
    pub disk_penalty: f64,
    pub mem_available_mb_floor: u64,
    pub mem_penalty: f64,
    /// Idle hours that saturate the idle term.
    pub idle_saturation_hours: f64,
    pub idle_weight: f64,
    /// Backlog depth tolerated before it counts as stagnation.
    pub backlog_threshold: usize,
    /// Items beyond the threshold that saturate the backlog term.
    pub backlog_saturation: f64,
    pub backlog_weight: f64,
    /// Expected cadence; `None` disables the throughput term.
    pub target_cycles_per_hour: Option<f64>,
    pub throughput_weight: f64,
}

impl Default for CriticalityPolicy {
    fn default() -> Self {
        Self {
            error_window_secs: 3600,
            error_saturation: 5.0,
            error_weight: 0.7,
            scheduler_penalty: 0.3,
            disk_used_pct_limit: 90.0,
            disk_penalty: 0.1,
            mem_available_mb_floor: 500,
            mem_penalty: 0.1,
            idle_saturation_hours: 2.0,
            idle_weight: 0.6,
            backlog_threshold: 5,
            backlog_saturation: 10.0,
            backlog_weight: 0.4,
            target_cycles_per_hour: None,
            throughput_weight: 0.2,
        }
    }
}

/// Everything the estimator reads. Borrowed so callers never clone state.
#[derive(Debug, Clone, Copy)]
pub struct CriticalityInputs<'a> {
    pub health: &'a HealthSnapshot,
    pub errors: &'a [ErrorRecord],
    /// Last time a cycle completed and persisted state.
    pub last_update: Option<DateTime<Utc>>,
    pub cycle_count: u64,
    /// Installation time, used by the throughput term.
    pub created: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

/// Breakdown of an estimate, kept for logging and the `health` command.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CriticalityEstimate {
    pub chaos: f64,
    pub stagnation: f64,
    pub criticality: f64,
}

/// Estimate criticality; see [`estimate_detailed`] for the sub-scores.
pub fn estimate(inputs: &CriticalityInputs<'_>, policy: &CriticalityPolicy) -> f64 {
    estimate_detailed(inputs, policy).criticality
}

pub fn estimate_detailed(
    inputs: &CriticalityInputs<'_>,
    policy: &CriticalityPolicy,
) -> CriticalityEstimate {
    let chaos = chaos_score(inputs, policy);
    let stagnation = stagnation_score(inputs, policy);
    CriticalityEstimate {
        chaos,
        stagnation,
        criticality: combine(chaos, stagnation),
    }
}

/// `clamp(0.5 - 0.5·chaos + 0.5·stagnation, 0, 1)` rounded to two decimals.
pub fn combine(chaos: f64, stagnation: f64) -> f64 {
    round2((0.5 - 0.5 * chaos + 0.5 * stagnation).clamp(0.0, 1.0))
}

pub fn chaos_score(inputs: &CriticalityInputs<'_>, policy: &CriticalityPolicy) -> f64 {
    let window = saturating_seconds(policy.error_window_secs);
    let recent = inputs
        .errors
        .iter()
        .filter(|err| inputs.now - err.time < window)
        .count();

    let mut chaos = saturating_ratio(recent as f64, policy.error_saturation) * policy.error_weight;
    if !inputs.health.scheduler_ok {
        chaos += policy.scheduler_penalty.clamp(0.0, 1.0);
    }
    if inputs
        .health
        .disk_used_pct
        .is_some_and(|pct| pct > policy.disk_used_pct_limit)
    {
        chaos += policy.disk_penalty.clamp(0.0, 1.0);
    }
    if inputs
        .health
        .mem_available_mb
        .is_some_and(|mb| mb < policy.mem_available_mb_floor)
    {
        chaos += policy.mem_penalty.clamp(0.0, 1.0);
    }
    chaos.min(1.0)
}

pub fn stagnation_score(inputs: &CriticalityInputs<'_>, policy: &CriticalityPolicy) -> f64 {
    let mut stagnation = 0.0;

    if let Some(updated) = inputs.last_update {
        let idle_hours = hours_between(updated, inputs.now);
        stagnation +=
            saturating_ratio(idle_hours, policy.idle_saturation_hours) * policy.idle_weight;
    }

    let pending = inputs.health.pending_tasks;
    if pending > policy.backlog_threshold {
        let overflow = (pending - policy.backlog_threshold) as f64;
        stagnation +=
            saturating_ratio(overflow, policy.backlog_saturation) * policy.backlog_weight;
    }

    if let Some(target) = policy.target_cycles_per_hour {
        let expected = hours_between(inputs.created, inputs.now) * target;
        if expected >= 1.0 {
            let deficit = 1.0 - inputs.cycle_count as f64 / expected;
            stagnation += deficit.clamp(0.0, 1.0) * policy.throughput_weight;
        }
    }

    stagnation.min(1.0)
}

/// `value / saturation` clamped to `[0, 1]`; a non-positive saturation yields 0.
fn saturating_ratio(value: f64, saturation: f64) -> f64 {
    if saturation <= 0.0 || !value.is_finite() {
        return 0.0;
    }
    (value / saturation).clamp(0.0, 1.0)
}

fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let millis = (to - from).num_milliseconds().max(0);
    millis as f64 / 3_600_000.0
}
