//! Orchestration for a single `homeostat cycle`.
//!
//! A cycle moves through `Gathering → (BackoffSkipped | Deciding) →
//! Delegating → Reflecting → (Consolidating → (Improving)) → Persisted`. Reasoner failures
//! become recorded errors; only lock, config, and storage-write failures
//! surface as `Err`.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{Span, debug, info, instrument, warn};

use crate::consolidate::{ConsolidationOutcome, consolidate_registry};
use crate::core::backoff::{BackoffDecision, evaluate, prune_expired, record_failure};
use crate::core::criticality::{CriticalityInputs, estimate_detailed};
use crate::core::experience::{Experience, ExperienceDraft, MAX_EXPERIENCES};
use crate::core::exploration::should_explore;
use crate::core::matcher::KeywordMatcher;
use crate::core::registry::Experiment;
use crate::core::types::truncate_chars;
use crate::improve::{ImprovementContext, ImprovementOutcome, self_improve};
use crate::io::backlog::load_backlog;
use crate::io::config::load_config;
use crate::io::cycle_log::{CycleLog, RECENT_LOGS, recent_cycle_logs, write_cycle_log};
use crate::io::experience_store::{append_experience, load_experiences};
use crate::io::init::HomeostatPaths;
use crate::io::lock::CycleLock;
use crate::io::prompt::{CyclePromptInputs, PromptEngine};
use crate::io::reasoner::{ReasonRequest, Reasoner, ReasonerResponse};
use crate::io::registry_store::{load_registry, write_registry};
use crate::io::state_store::{load_state, write_state};
use crate::io::telemetry::TelemetrySource;

/// Characters of the output summary used as an experiment hypothesis.
const HYPOTHESIS_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    Gathering,
    BackoffSkipped,
    Deciding,
    Delegating,
    Reflecting,
    Consolidating,
    Improving,
    Persisted,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Gathering => "gathering",
            CyclePhase::BackoffSkipped => "backoff_skipped",
            CyclePhase::Deciding => "deciding",
            CyclePhase::Delegating => "delegating",
            CyclePhase::Reflecting => "reflecting",
            CyclePhase::Consolidating => "consolidating",
            CyclePhase::Improving => "improving",
            CyclePhase::Persisted => "persisted",
        };
        f.write_str(name)
    }
}

fn enter(phase: CyclePhase) {
    Span::current().record("phase", tracing::field::display(phase));
    debug!(%phase, "cycle phase");
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleStatus {
    /// The reasoner ran; `success` reports its outcome.
    Completed {
        success: bool,
        explored: bool,
        exploration_rate: f64,
        cost_usd: f64,
        credited: Option<String>,
        error: Option<String>,
        consolidation: Option<ConsolidationOutcome>,
        improvement: Option<ImprovementOutcome>,
    },
    /// Too many recent failures; nothing was invoked.
    BackoffSkipped {
        recent_failures: usize,
        remaining_secs: i64,
    },
    /// Empty backlog and no heartbeat instructions.
    Idle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleOutcome {
    pub cycle_count: u64,
    pub criticality: f64,
    #[serde(flatten)]
    pub status: CycleStatus,
}

/// Run one cycle with real time and thread-local randomness.
pub fn run_cycle<R: Reasoner, T: TelemetrySource>(
    root: &Path,
    reasoner: &R,
    telemetry: &T,
) -> Result<CycleOutcome> {
    run_cycle_at(root, reasoner, telemetry, &mut rand::thread_rng(), Utc::now())
}

/// Run one cycle at `now`, drawing the exploration decision from `rng`.
#[instrument(skip_all, fields(root = %root.display(), phase = tracing::field::Empty))]
pub fn run_cycle_at<R: Reasoner, T: TelemetrySource, G: Rng + ?Sized>(
    root: &Path,
    reasoner: &R,
    telemetry: &T,
    rng: &mut G,
    now: DateTime<Utc>,
) -> Result<CycleOutcome> {
    let paths = HomeostatPaths::new(root);
    let cfg = load_config(&paths.config_path)?;
    paths.ensure_dirs()?;
    let _lock = CycleLock::acquire(&paths.lock_path, cfg.stale_lock_after(), now)?;

    enter(CyclePhase::Gathering);
    let mut state = load_state(&paths.state_path, now);
    let pruned = prune_expired(&mut state.errors, now, &cfg.backoff);
    if pruned > 0 {
        debug!(pruned, "pruned expired errors");
    }

    if let BackoffDecision::Skip {
        recent_failures,
        cooldown,
        remaining,
    } = evaluate(&state.errors, now, &cfg.backoff)
    {
        enter(CyclePhase::BackoffSkipped);
        info!(
            recent_failures,
            cooldown_mins = cooldown.num_minutes(),
            remaining_secs = remaining.num_seconds(),
            "backoff: skipping cycle"
        );
        write_state(&paths.state_path, &state)?;
        return Ok(CycleOutcome {
            cycle_count: state.cycle_count,
            criticality: state.criticality,
            status: CycleStatus::BackoffSkipped {
                recent_failures,
                remaining_secs: remaining.num_seconds(),
            },
        });
    }

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
    info!(
        chaos = estimate.chaos,
        stagnation = estimate.stagnation,
        criticality = estimate.criticality,
        "criticality estimated"
    );
    state.criticality = estimate.criticality;
    state.health = Some(health.clone());

    let backlog = load_backlog(&paths.tasks_dir);
    if backlog.is_empty() && !paths.heartbeat_path.exists() {
        enter(CyclePhase::Idle);
        info!("idle: no tasks and no heartbeat");
        state.updated = Some(now);
        write_state(&paths.state_path, &state)?;
        enter(CyclePhase::Persisted);
        return Ok(CycleOutcome {
            cycle_count: state.cycle_count,
            criticality: state.criticality,
            status: CycleStatus::Idle,
        });
    }

    enter(CyclePhase::Deciding);
    let mut registry = load_registry(&paths.registry_path);
    let history = load_experiences(&paths.experiences_path, MAX_EXPERIENCES);
    let recent = history.recent(cfg.recent_experience_window);
    let decision = should_explore(
        &mut registry.exploration_log,
        &recent,
        state.criticality,
        &cfg.exploration,
        rng,
    );
    if decision.explore {
        info!(rate = decision.rate, "exploration cycle");
    } else {
        debug!(rate = decision.rate, adjustments = ?decision.adjustments, "exploitation cycle");
    }

    let recent_logs = recent_cycle_logs(&paths.logs_dir, RECENT_LOGS);
    let prompt = PromptEngine::new()?.render_cycle(&CyclePromptInputs {
        cycle_count: state.cycle_count,
        criticality: state.criticality,
        recent_errors: state.errors.len(),
        health: &health,
        backlog: &backlog,
        recent_logs: &recent_logs,
        registry: &registry,
        is_exploration: decision.explore,
    })?;

    enter(CyclePhase::Delegating);
    let attempted_cycle = state.cycle_count + 1;
    info!(
        cycle = attempted_cycle,
        criticality = state.criticality,
        "invoking reasoner"
    );
    let request = ReasonRequest {
        workdir: root.to_path_buf(),
        prompt,
        agent: None,
        model: cfg.delegate.model.clone(),
        fallback_model: cfg.delegate.fallback_model.clone(),
        resume_session: state.last_session_id.clone(),
        max_budget_usd: cfg.delegate.max_budget_usd,
        timeout: Duration::from_secs(cfg.delegate.timeout_secs),
    };
    let response = match reasoner.invoke(&request) {
        Ok(response) => response,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "reasoner invocation failed");
            ReasonerResponse::failure(&cfg.delegate.model, format!("{err:#}"))
        }
    };

    if let Some(session_id) = &response.session_id {
        state.last_session_id = Some(session_id.clone());
    }
    let error_message = response
        .error_text
        .clone()
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    if response.success {
        state.cycle_count = attempted_cycle;
        state.errors.clear();
        write_cycle_log(
            &paths.logs_dir,
            &CycleLog {
                cycle: state.cycle_count,
                timestamp: now,
                success: true,
                model: response.model.clone(),
                cost_usd: response.cost_usd,
                was_exploration: decision.explore,
                summary: response.output_text.clone(),
            },
        )?;
        info!(
            cycle = state.cycle_count,
            cost_usd = response.cost_usd,
            "cycle succeeded"
        );
    } else {
        warn!(error = %error_message, "cycle failed");
        record_failure(&mut state.errors, now, &error_message, &cfg.backoff);
    }

    enter(CyclePhase::Reflecting);
    let experience = Experience::from_draft(&ExperienceDraft {
        cycle: attempted_cycle,
        timestamp: now,
        model: &response.model,
        success: response.success,
        cost_usd: response.cost_usd,
        duration_ms: response.duration_ms,
        output: &response.output_text,
        error: (!response.success).then_some(error_message.as_str()),
        was_exploration: decision.explore,
    });
    let credited = registry.attribute(&experience, &KeywordMatcher::default());
    if let Some(id) = &credited {
        debug!(capability = %id, "experience attributed");
    }
    if decision.explore {
        registry.exploration_log.record_experiment(Experiment {
            cycle: attempted_cycle,
            hypothesis: hypothesis_from(&experience.output_summary),
            result: if response.success {
                "succeeded"
            } else {
                "failed"
            }
            .to_string(),
        });
    }
    let history = append_experience(&paths.experiences_path, MAX_EXPERIENCES, experience)?;

    let (consolidation, improvement) = if response.success
        && state.cycle_count % cfg.consolidation_interval == 0
    {
        enter(CyclePhase::Consolidating);
        info!(cycle = state.cycle_count, "consolidating recent experiences");
        let recent = history.recent(cfg.recent_experience_window);
        let consolidation = consolidate_registry(
            &mut registry,
            &recent,
            reasoner,
            root,
            &cfg.delegate,
            now,
        );
        let improvement = cfg.improve.enabled.then(|| {
            enter(CyclePhase::Improving);
            self_improve(
                &ImprovementContext {
                    cycle: state.cycle_count,
                    registry: &registry,
                    experiences: &recent,
                    delegate: &cfg.delegate,
                    improve: &cfg.improve,
                },
                reasoner,
                root,
            )
        });
        (Some(consolidation), improvement)
    } else {
        (None, None)
    };

    registry.updated = Some(now);
    write_registry(&paths.registry_path, &registry)?;
    state.updated = Some(now);
    write_state(&paths.state_path, &state)?;
    enter(CyclePhase::Persisted);

    Ok(CycleOutcome {
        cycle_count: state.cycle_count,
        criticality: state.criticality,
        status: CycleStatus::Completed {
            success: response.success,
            explored: decision.explore,
            exploration_rate: decision.rate,
            cost_usd: response.cost_usd,
            credited,
            error: (!response.success).then_some(error_message),
            consolidation,
            improvement,
        },
    })
}

/// First non-empty line of the output, or a placeholder when there was none.
fn hypothesis_from(summary: &str) -> String {
    summary
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| truncate_chars(line, HYPOTHESIS_CHARS))
        .unwrap_or_else(|| "(no output)".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hypothesis_uses_first_non_empty_line() {
        assert_eq!(hypothesis_from("\n  Tried RSS digest\nmore"), "Tried RSS digest");
        assert_eq!(hypothesis_from("   "), "(no output)");
    }

    #[test]
    fn phases_render_snake_case() {
        assert_eq!(CyclePhase::BackoffSkipped.to_string(), "backoff_skipped");
        assert_eq!(
            serde_json::to_string(&CyclePhase::Persisted).expect("encode"),
            "\"persisted\""
        );
    }
}
