//! Failure-driven cooldown gate.
//!
//! The gate's only state is the error list in `SystemState`. Expired entries
//! are removed from that list (not just skipped), so the persisted history
//! always reflects the current window.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::ErrorRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Errors older than this are pruned.
    pub window_secs: i64,
    /// Fewer recent failures than this never trigger a cooldown.
    pub min_failures: usize,
    /// Cooldown added per recent failure.
    pub cooldown_per_failure_secs: i64,
    /// Maximum number of errors retained.
    pub max_errors: usize,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            window_secs: 60 * 60,
            min_failures: 2,
            cooldown_per_failure_secs: 5 * 60,
            max_errors: 10,
        }
    }
}

/// Result of evaluating the gate for the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffDecision {
    Proceed,
    /// Skip this cycle; `remaining` is the time left in the cooldown.
    Skip {
        recent_failures: usize,
        cooldown: TimeDelta,
        remaining: TimeDelta,
    },
}

impl BackoffDecision {
    pub fn is_skip(&self) -> bool {
        matches!(self, BackoffDecision::Skip { .. })
    }
}

/// Drop errors older than the window. Returns how many were removed.
pub fn prune_expired(
    errors: &mut Vec<ErrorRecord>,
    now: DateTime<Utc>,
    policy: &BackoffPolicy,
) -> usize {
    let window = saturating_seconds(policy.window_secs);
    let before = errors.len();
    errors.retain(|err| now - err.time < window);
    before - errors.len()
}

/// Decide whether to run. Call after [`prune_expired`].
pub fn evaluate(
    errors: &[ErrorRecord],
    now: DateTime<Utc>,
    policy: &BackoffPolicy,
) -> BackoffDecision {
    let recent_failures = errors.len();
    if recent_failures < policy.min_failures.max(1) {
        return BackoffDecision::Proceed;
    }
    let Some(newest) = errors.iter().map(|err| err.time).max() else {
        return BackoffDecision::Proceed;
    };

    let per_failure = saturating_seconds(policy.cooldown_per_failure_secs);
    let cooldown = i32::try_from(recent_failures)
        .ok()
        .and_then(|n| per_failure.checked_mul(n))
        .unwrap_or(TimeDelta::MAX);
    let elapsed = now - newest;
    if elapsed < cooldown {
        return BackoffDecision::Skip {
            recent_failures,
            cooldown,
            remaining: cooldown.checked_sub(&elapsed).unwrap_or(TimeDelta::MAX),
        };
    }
    BackoffDecision::Proceed
}

/// `TimeDelta` of `secs` seconds, clamped to the representable range.
pub(crate) fn saturating_seconds(secs: i64) -> TimeDelta {
    TimeDelta::try_seconds(secs).unwrap_or(if secs < 0 {
        TimeDelta::MIN
    } else {
        TimeDelta::MAX
    })
}

/// Remember a failure, keeping only the newest `max_errors` entries.
pub fn record_failure(
    errors: &mut Vec<ErrorRecord>,
    now: DateTime<Utc>,
    message: impl Into<String>,
    policy: &BackoffPolicy,
) {
    errors.push(ErrorRecord::new(now, message));
    if errors.len() > policy.max_errors {
        let excess = errors.len() - policy.max_errors;
        errors.drain(..excess);
    }
}
