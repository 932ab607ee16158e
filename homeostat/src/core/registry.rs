//! Capability registry: learned capabilities, anti-patterns, exploration log.
//!
//! Records are never removed. Capabilities are created only by consolidation;
//! the per-cycle path may only credit an existing capability.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::experience::Experience;
use crate::core::matcher::{MatchKeys, OutcomeMatcher};

pub const REGISTRY_VERSION: u32 = 1;

/// Beta(1, 1) prior: one pseudo-success and one pseudo-failure.
pub const PRIOR_SUCCESSES: f64 = 1.0;
pub const PRIOR_FAILURES: f64 = 1.0;

pub const DEFAULT_EXPLORATION_RATE: f64 = 0.15;

/// Number of experiments kept in the exploration log.
pub const RECENT_EXPERIMENTS: usize = 5;

/// Posterior mean of a Beta(1, 1) prior after `successes` and `failures`.
///
/// Always strictly inside `(0, 1)`; `confidence(0, 0) == 0.5`.
pub fn confidence(successes: u64, failures: u64) -> f64 {
    let s = successes as f64 + PRIOR_SUCCESSES;
    let f = failures as f64 + PRIOR_FAILURES;
    s / (s + f)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    #[serde(default)]
    pub description: String,
    pub confidence: f64,
    #[serde(default)]
    pub times_used: u64,
    #[serde(default)]
    pub times_succeeded: u64,
    #[serde(default)]
    pub times_failed: u64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub notes: String,
    pub first_learned: DateTime<Utc>,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
}

impl Capability {
    /// A freshly learned capability at the prior mean.
    pub fn learned(
        description: impl Into<String>,
        tags: impl IntoIterator<Item = String>,
        notes: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            description: description.into(),
            confidence: confidence(0, 0),
            times_used: 0,
            times_succeeded: 0,
            times_failed: 0,
            tags: tags.into_iter().collect(),
            notes: notes.into(),
            first_learned: now,
            last_used: None,
        }
    }

    /// Credit one use with the given outcome and recompute confidence.
    pub fn record_use(&mut self, success: bool, at: DateTime<Utc>) {
        self.times_used += 1;
        if success {
            self.times_succeeded += 1;
        } else {
            self.times_failed += 1;
        }
        self.last_used = Some(at);
        self.confidence = confidence(self.times_succeeded, self.times_failed);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AntiPattern {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mitigation: String,
    #[serde(default)]
    pub times_observed: u64,
    pub first_observed: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experiment {
    pub cycle: u64,
    pub hypothesis: String,
    pub result: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorationLog {
    pub exploration_rate: f64,
    pub last_exploration_cycle: u64,
    pub recent_experiments: Vec<Experiment>,
}

impl Default for ExplorationLog {
    fn default() -> Self {
        Self {
            exploration_rate: DEFAULT_EXPLORATION_RATE,
            last_exploration_cycle: 0,
            recent_experiments: Vec::new(),
        }
    }
}

impl ExplorationLog {
    /// Record an experiment, keeping the newest [`RECENT_EXPERIMENTS`].
    pub fn record_experiment(&mut self, experiment: Experiment) {
        self.last_exploration_cycle = experiment.cycle;
        self.recent_experiments.push(experiment);
        if self.recent_experiments.len() > RECENT_EXPERIMENTS {
            let excess = self.recent_experiments.len() - RECENT_EXPERIMENTS;
            self.recent_experiments.drain(..excess);
        }
    }
}

/// Persisted registry (`capabilities.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityRegistry {
    pub version: u32,
    pub capabilities: BTreeMap<String, Capability>,
    pub anti_patterns: BTreeMap<String, AntiPattern>,
    pub exploration_log: ExplorationLog,
    pub updated: Option<DateTime<Utc>>,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            capabilities: BTreeMap::new(),
            anti_patterns: BTreeMap::new(),
            exploration_log: ExplorationLog::default(),
            updated: None,
        }
    }
}

impl CapabilityRegistry {
    /// Capability ids ordered by descending confidence, ties by id.
    pub fn ids_by_confidence(&self) -> Vec<&str> {
        let mut ranked: Vec<(&str, f64)> = self
            .capabilities
            .iter()
            .map(|(id, cap)| (id.as_str(), cap.confidence))
            .collect();
        // BTreeMap iteration is id-ordered and the sort is stable, so ties keep id order.
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.into_iter().map(|(id, _)| id).collect()
    }

    /// Credit the experience to at most one capability.
    ///
    /// Capabilities are tried in descending confidence order and the first
    /// match wins; no other capability is touched even if it would also
    /// match. Returns the credited id.
    pub fn attribute<M: OutcomeMatcher>(
        &mut self,
        experience: &Experience,
        matcher: &M,
    ) -> Option<String> {
        if experience.output_summary.trim().is_empty() {
            return None;
        }
        let credited = self.ids_by_confidence().into_iter().find(|id| {
            self.capabilities
                .get(*id)
                .map(|cap| MatchKeys::for_capability(id, cap))
                .is_some_and(|keys| matcher.matches(&keys, &experience.output_summary))
        })?;
        let credited = credited.to_string();
        if let Some(cap) = self.capabilities.get_mut(&credited) {
            cap.record_use(experience.success, experience.timestamp);
        }
        Some(credited)
    }
}
