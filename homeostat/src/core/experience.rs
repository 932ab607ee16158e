//! Bounded FIFO of per-cycle outcomes.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::truncate_chars;

/// Maximum number of experiences retained; older ones are evicted first.
pub const MAX_EXPERIENCES: usize = 100;

/// Characters of delegate output kept in an experience.
pub const OUTPUT_SUMMARY_CHARS: usize = 300;

/// Outcome of one completed cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    /// Delegate identifier (model name).
    pub model: String,
    pub success: bool,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub output_summary: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub was_exploration: bool,
}

/// Fields needed to build an [`Experience`]; the summary is truncated on build.
#[derive(Debug, Clone)]
pub struct ExperienceDraft<'a> {
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    pub model: &'a str,
    pub success: bool,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub output: &'a str,
    pub error: Option<&'a str>,
    pub was_exploration: bool,
}

impl Experience {
    pub fn from_draft(draft: &ExperienceDraft<'_>) -> Self {
        Self {
            cycle: draft.cycle,
            timestamp: draft.timestamp,
            model: draft.model.to_string(),
            success: draft.success,
            cost_usd: draft.cost_usd,
            duration_ms: draft.duration_ms,
            output_summary: truncate_chars(draft.output, OUTPUT_SUMMARY_CHARS),
            error: draft.error.map(str::to_string),
            was_exploration: draft.was_exploration,
        }
    }
}

/// In-memory view of the experience log. Length never exceeds `capacity`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperienceLog {
    capacity: usize,
    entries: VecDeque<Experience>,
}

impl Default for ExperienceLog {
    fn default() -> Self {
        Self::with_capacity(MAX_EXPERIENCES)
    }
}

impl ExperienceLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Build a log from existing records, keeping only the newest `capacity`.
    pub fn from_entries(capacity: usize, entries: impl IntoIterator<Item = Experience>) -> Self {
        let mut log = Self::with_capacity(capacity);
        for entry in entries {
            log.push(entry);
        }
        log
    }

    /// Append, evicting the oldest record when full. Returns the evicted record.
    pub fn push(&mut self, experience: Experience) -> Option<Experience> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(experience);
        evicted
    }

    /// The newest `n` records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Experience> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Experience> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Serialize as JSON Lines, one record per line, trailing newline.
    pub fn to_jsonl(&self) -> serde_json::Result<String> {
        let mut buf = String::new();
        for entry in &self.entries {
            buf.push_str(&serde_json::to_string(entry)?);
            buf.push('\n');
        }
        Ok(buf)
    }

    /// Parse JSON Lines. Blank and malformed lines are skipped and counted.
    pub fn from_jsonl(capacity: usize, contents: &str) -> (Self, usize) {
        let mut skipped = 0usize;
        let entries = contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<Experience>(line) {
                Ok(entry) => Some(entry),
                Err(_) => {
                    skipped += 1;
                    None
                }
            })
            .collect::<Vec<_>>();
        (Self::from_entries(capacity, entries), skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::experience;

    #[test]
    fn push_past_capacity_evicts_oldest() {
        let mut log = ExperienceLog::default();
        for cycle in 0..(MAX_EXPERIENCES as u64 + 5) {
            log.push(experience(cycle, true, false));
            assert!(log.len() <= MAX_EXPERIENCES);
        }
        assert_eq!(log.len(), MAX_EXPERIENCES);
        let cycles: Vec<u64> = log.iter().map(|e| e.cycle).collect();
        assert_eq!(cycles.first(), Some(&5));
        assert_eq!(cycles.last(), Some(&(MAX_EXPERIENCES as u64 + 4)));
    }

    #[test]
    fn push_returns_evicted_record() {
        let mut log = ExperienceLog::with_capacity(2);
        assert!(log.push(experience(1, true, false)).is_none());
        assert!(log.push(experience(2, true, false)).is_none());
        let evicted = log.push(experience(3, true, false)).expect("evicted");
        assert_eq!(evicted.cycle, 1);
    }

    #[test]
    fn recent_returns_newest_in_order() {
        let log = ExperienceLog::from_entries(10, (1..=6).map(|c| experience(c, true, false)));
        let recent: Vec<u64> = log.recent(3).iter().map(|e| e.cycle).collect();
        assert_eq!(recent, vec![4, 5, 6]);
        assert_eq!(log.recent(50).len(), 6);
    }

    #[test]
    fn jsonl_round_trips_and_skips_garbage() {
        let mut original = ExperienceLog::with_capacity(5);
        original.push(experience(1, true, false));
        let mut failed = experience(2, false, true);
        failed.error = Some("timeout".to_string());
        failed.cost_usd = 0.125;
        original.push(failed);

        let encoded = original.to_jsonl().expect("encode");
        let (decoded, skipped) = ExperienceLog::from_jsonl(5, &encoded);
        assert_eq!(skipped, 0);
        assert_eq!(decoded, original);

        let noisy = format!("not json\n\n{encoded}{{\"cycle\":");
        let (decoded, skipped) = ExperienceLog::from_jsonl(5, &noisy);
        assert_eq!(skipped, 2);
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn draft_truncates_output_summary() {
        let long = "x".repeat(OUTPUT_SUMMARY_CHARS * 2);
        let built = Experience::from_draft(&ExperienceDraft {
            cycle: 1,
            timestamp: Utc::now(),
            model: "opus",
            success: true,
            cost_usd: 0.0,
            duration_ms: 10,
            output: &long,
            error: None,
            was_exploration: false,
        });
        assert_eq!(built.output_summary.chars().count(), OUTPUT_SUMMARY_CHARS);
    }
}
