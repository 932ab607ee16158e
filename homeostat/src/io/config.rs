//! Homeostat configuration stored under `.homeostat/state/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::core::backoff::BackoffPolicy;
use crate::core::criticality::CriticalityPolicy;
use crate::core::exploration::ExplorationPolicy;
use crate::io::atomic::write_atomic;

/// Homeostat configuration (TOML).
///
/// Intended to be edited by humans. Missing fields take the defaults below,
/// so an empty file is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HomeostatConfig {
    /// Consolidate after every N-th successful cycle.
    pub consolidation_interval: u64,

    /// Experiences handed to the exploration policy and consolidation.
    pub recent_experience_window: usize,

    /// A cycle lock older than this is considered abandoned and reclaimed.
    pub stale_lock_secs: u64,

    /// Substring the crontab must mention for the scheduler to count as healthy.
    pub scheduler_marker: String,

    pub delegate: DelegateConfig,
    pub improve: ImproveConfig,
    pub criticality: CriticalityPolicy,
    pub backoff: BackoffPolicy,
    pub exploration: ExplorationPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DelegateConfig {
    /// Reasoner CLI executable (e.g. `claude`).
    pub command: String,
    pub model: String,
    pub fallback_model: Option<String>,
    /// Cheaper model used for consolidation.
    pub consolidation_model: String,
    pub timeout_secs: u64,
    pub consolidation_timeout_secs: u64,
    pub max_budget_usd: Option<f64>,
    /// Extra arguments appended to every invocation.
    pub extra_args: Vec<String>,
    /// Truncate reasoner stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for DelegateConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            model: "opus".to_string(),
            fallback_model: Some("sonnet".to_string()),
            consolidation_model: "haiku".to_string(),
            timeout_secs: 300,
            consolidation_timeout_secs: 60,
            max_budget_usd: Some(2.0),
            extra_args: Vec::new(),
            output_limit_bytes: 1_000_000,
        }
    }
}

/// Post-consolidation self-improvement: an audit pass, then one change
/// committed on a branch and fast-forwarded into the current branch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImproveConfig {
    /// Off unless the root is a git checkout the agent may change.
    pub enabled: bool,
    pub auditor_agent: String,
    pub improver_agent: String,
    pub audit_timeout_secs: u64,
    pub improve_timeout_secs: u64,
}

impl Default for ImproveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auditor_agent: "auditor".to_string(),
            improver_agent: "improver".to_string(),
            audit_timeout_secs: 120,
            improve_timeout_secs: 180,
        }
    }
}

impl Default for HomeostatConfig {
    fn default() -> Self {
        Self {
            consolidation_interval: 10,
            recent_experience_window: 10,
            stale_lock_secs: 60 * 60,
            scheduler_marker: "homeostat".to_string(),
            delegate: DelegateConfig::default(),
            improve: ImproveConfig::default(),
            criticality: CriticalityPolicy::default(),
            backoff: BackoffPolicy::default(),
            exploration: ExplorationPolicy::default(),
        }
    }
}

impl HomeostatConfig {
    pub fn validate(&self) -> Result<()> {
        if self.consolidation_interval == 0 {
            return Err(anyhow!("consolidation_interval must be > 0"));
        }
        if self.recent_experience_window == 0 {
            return Err(anyhow!("recent_experience_window must be > 0"));
        }
        if self.delegate.command.trim().is_empty() {
            return Err(anyhow!("delegate.command must be non-empty"));
        }
        if self.delegate.model.trim().is_empty() {
            return Err(anyhow!("delegate.model must be non-empty"));
        }
        if self.delegate.timeout_secs == 0 || self.delegate.consolidation_timeout_secs == 0 {
            return Err(anyhow!("delegate timeouts must be > 0"));
        }
        if self.delegate.output_limit_bytes == 0 {
            return Err(anyhow!("delegate.output_limit_bytes must be > 0"));
        }
        if self.backoff.window_secs <= 0 {
            return Err(anyhow!("backoff.window_secs must be > 0"));
        }
        if self.backoff.cooldown_per_failure_secs < 0 {
            return Err(anyhow!("backoff.cooldown_per_failure_secs must be >= 0"));
        }
        if self.criticality.error_window_secs <= 0 {
            return Err(anyhow!("criticality.error_window_secs must be > 0"));
        }
        if self.backoff.max_errors == 0 {
            return Err(anyhow!("backoff.max_errors must be > 0"));
        }
        let exp = &self.exploration;
        if !(0.0..=1.0).contains(&exp.min_rate)
            || !(0.0..=1.0).contains(&exp.max_rate)
            || exp.min_rate > exp.max_rate
        {
            return Err(anyhow!(
                "exploration rates must satisfy 0 <= min_rate <= max_rate <= 1"
            ));
        }
        if exp.chaos_threshold > exp.stagnation_threshold {
            return Err(anyhow!(
                "exploration.chaos_threshold must not exceed stagnation_threshold"
            ));
        }
        if self.criticality.error_saturation <= 0.0 || self.criticality.idle_saturation_hours <= 0.0
        {
            return Err(anyhow!("criticality saturation values must be > 0"));
        }
        let improve = &self.improve;
        if improve.enabled
            && (improve.auditor_agent.trim().is_empty() || improve.improver_agent.trim().is_empty())
        {
            return Err(anyhow!("improve agents must be non-empty"));
        }
        if improve.audit_timeout_secs == 0 || improve.improve_timeout_secs == 0 {
            return Err(anyhow!("improve timeouts must be > 0"));
        }
        if self.stale_lock_secs == 0 {
            return Err(anyhow!("stale_lock_secs must be > 0"));
        }
        Ok(())
    }

    /// Age after which a cycle lock is considered abandoned.
    pub fn stale_lock_after(&self) -> TimeDelta {
        i64::try_from(self.stale_lock_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `HomeostatConfig::default()`.
pub fn load_config(path: &Path) -> Result<HomeostatConfig> {
    if !path.exists() {
        let cfg = HomeostatConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: HomeostatConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &HomeostatConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}
