//! Exploit-vs-explore decision for a cycle.
//!
//! The exploration rate is self-tuning: repeated failed experiments lower
//! it, long runs of pure exploitation raise it, and criticality overrides
//! both. The adjusted rate is written back to the registry before the coin
//! flip so drift is visible whatever the flip decides.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::experience::Experience;
use crate::core::registry::ExplorationLog;
use crate::core::types::round2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorationPolicy {
    pub min_rate: f64,
    pub max_rate: f64,
    /// Consecutive failed experiments that trigger a rate decrease.
    pub failed_experiments_window: usize,
    pub failure_step: f64,
    /// Consecutive exploitation cycles that trigger a rate increase.
    pub exploitation_streak: usize,
    pub streak_step: f64,
    /// Ceiling for the streak increase.
    pub streak_ceiling: f64,
    /// Below this criticality the system only exploits.
    pub chaos_threshold: f64,
    /// Above this criticality the rate is raised further.
    pub stagnation_threshold: f64,
    pub stagnation_step: f64,
}

impl Default for ExplorationPolicy {
    fn default() -> Self {
        Self {
            min_rate: 0.05,
            max_rate: 0.40,
            failed_experiments_window: 3,
            failure_step: 0.05,
            exploitation_streak: 5,
            streak_step: 0.05,
            streak_ceiling: 0.30,
            chaos_threshold: 0.3,
            stagnation_threshold: 0.7,
            stagnation_step: 0.10,
        }
    }
}

/// Why the rate moved (or the decision was forced) this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RateAdjustments {
    pub failed_experiments: bool,
    pub exploitation_streak: bool,
    pub stagnation_boost: bool,
    pub chaos_override: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateDecision {
    pub rate: f64,
    pub adjustments: RateAdjustments,
}

/// Compute the adjusted rate from the current rate, recent history, and criticality.
///
/// `recent` is oldest-first and should hold the last handful of experiences.
pub fn adjust_rate(
    current_rate: f64,
    recent: &[Experience],
    criticality: f64,
    policy: &ExplorationPolicy,
) -> RateDecision {
    let mut rate = current_rate;
    let mut adjustments = RateAdjustments::default();

    let explorations: Vec<&Experience> = recent.iter().filter(|e| e.was_exploration).collect();
    let window = policy.failed_experiments_window;
    if window > 0
        && explorations.len() >= window
        && explorations[explorations.len() - window..]
            .iter()
            .all(|e| !e.success)
    {
        rate = (rate - policy.failure_step).max(policy.min_rate);
        adjustments.failed_experiments = true;
    }

    let streak = policy.exploitation_streak;
    if streak > 0
        && recent.len() >= streak
        && recent[recent.len() - streak..]
            .iter()
            .all(|e| !e.was_exploration)
    {
        rate = (rate + policy.streak_step).min(policy.streak_ceiling);
        adjustments.exploitation_streak = true;
    }

    if criticality < policy.chaos_threshold {
        adjustments.chaos_override = true;
    } else if criticality > policy.stagnation_threshold {
        rate = (rate + policy.stagnation_step).min(policy.max_rate);
        adjustments.stagnation_boost = true;
    }

    RateDecision {
        rate: round2(rate.clamp(policy.min_rate, policy.max_rate)),
        adjustments,
    }
}

/// Outcome of [`should_explore`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExplorationDecision {
    pub explore: bool,
    pub rate: f64,
    pub adjustments: RateAdjustments,
}

/// Decide whether this cycle explores, persisting the adjusted rate into `log`.
///
/// Under chaos (`criticality < chaos_threshold`) the answer is always
/// `false` and the random source is not consulted.
pub fn should_explore<R: Rng + ?Sized>(
    log: &mut ExplorationLog,
    recent: &[Experience],
    criticality: f64,
    policy: &ExplorationPolicy,
    rng: &mut R,
) -> ExplorationDecision {
    let decision = adjust_rate(log.exploration_rate, recent, criticality, policy);
    log.exploration_rate = decision.rate;

    let explore = if decision.adjustments.chaos_override {
        false
    } else {
        rng.gen_bool(decision.rate.clamp(0.0, 1.0))
    };

    ExplorationDecision {
        explore,
        rate: decision.rate,
        adjustments: decision.adjustments,
    }
}
