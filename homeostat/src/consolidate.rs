//! Batch review of recent experiences into the capability registry.
//!
//! Consolidation is advisory: a failed invocation or an unusable response
//! leaves the registry exactly as it was and is never recorded as a cycle
//! error.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::consolidation::{MergeSummary, apply_proposal, parse_proposal};
use crate::core::experience::{Experience, MAX_EXPERIENCES};
use crate::core::registry::CapabilityRegistry;
use crate::io::config::{DelegateConfig, load_config};
use crate::io::experience_store::load_experiences;
use crate::io::init::HomeostatPaths;
use crate::io::lock::CycleLock;
use crate::io::prompt::PromptEngine;
use crate::io::reasoner::{ReasonRequest, Reasoner};
use crate::io::registry_store::{load_registry, write_registry};

/// Outcome of one consolidation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ConsolidationOutcome {
    /// No experiences to review.
    NothingToReview,
    /// The reasoner failed or its response was unusable; registry untouched.
    Discarded { reason: String },
    Merged(MergeSummary),
}

impl ConsolidationOutcome {
    pub fn merged(&self) -> Option<&MergeSummary> {
        match self {
            ConsolidationOutcome::Merged(summary) => Some(summary),
            _ => None,
        }
    }
}

/// Ask the reasoner to review `experiences` and merge its proposal into `registry`.
#[instrument(skip_all, fields(experiences = experiences.len(), model = %delegate.consolidation_model))]
pub fn consolidate_registry<R: Reasoner>(
    registry: &mut CapabilityRegistry,
    experiences: &[Experience],
    reasoner: &R,
    workdir: &Path,
    delegate: &DelegateConfig,
    now: DateTime<Utc>,
) -> ConsolidationOutcome {
    if experiences.is_empty() {
        debug!("no experiences to consolidate");
        return ConsolidationOutcome::NothingToReview;
    }

    let prompt = match PromptEngine::new()
        .and_then(|engine| engine.render_consolidation(experiences, registry))
    {
        Ok(prompt) => prompt,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "cannot render consolidation prompt");
            return discarded(format!("render prompt: {err:#}"));
        }
    };

    let request = ReasonRequest {
        workdir: workdir.to_path_buf(),
        prompt,
        agent: None,
        model: delegate.consolidation_model.clone(),
        fallback_model: None,
        resume_session: None,
        max_budget_usd: None,
        timeout: Duration::from_secs(delegate.consolidation_timeout_secs),
    };
    let response = match reasoner.invoke(&request) {
        Ok(response) => response,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "consolidation reasoner failed to run");
            return discarded(format!("invoke: {err:#}"));
        }
    };
    if !response.success {
        debug!(error = ?response.error_text, "consolidation reasoner reported failure");
        return discarded(
            response
                .error_text
                .unwrap_or_else(|| "reasoner reported failure".to_string()),
        );
    }

    let proposal = match parse_proposal(&response.output_text) {
        Ok(proposal) => proposal,
        Err(rejection) => {
            debug!(?rejection, "consolidation response discarded");
            return discarded(format!("{rejection:?}"));
        }
    };
    if let Some(insights) = proposal.insights.as_deref().filter(|s| !s.trim().is_empty()) {
        info!(insights, "consolidation insights");
    }

    let summary = apply_proposal(registry, &proposal, now);
    info!(
        added = summary.capabilities_added.len(),
        updated = summary.capabilities_updated.len(),
        anti_patterns = summary.anti_patterns_added.len(),
        adjusted = summary.confidence_adjusted.len(),
        ignored = summary.ignored,
        "consolidation merged"
    );
    ConsolidationOutcome::Merged(summary)
}

fn discarded(reason: String) -> ConsolidationOutcome {
    ConsolidationOutcome::Discarded { reason }
}

/// `homeostat consolidate`: run a pass outside the cycle schedule.
///
/// Takes the cycle lock so it never interleaves with a running cycle.
pub fn run_consolidation<R: Reasoner>(
    root: &Path,
    reasoner: &R,
    now: DateTime<Utc>,
) -> Result<ConsolidationOutcome> {
    let paths = HomeostatPaths::new(root);
    let cfg = load_config(&paths.config_path)?;
    let _lock = CycleLock::acquire(&paths.lock_path, cfg.stale_lock_after(), now)?;

    let mut registry = load_registry(&paths.registry_path);
    let log = load_experiences(&paths.experiences_path, MAX_EXPERIENCES);
    let recent = log.recent(cfg.recent_experience_window);

    let outcome =
        consolidate_registry(&mut registry, &recent, reasoner, root, &cfg.delegate, now);
    if let Some(summary) = outcome.merged()
        && !summary.is_empty()
    {
        registry.updated = Some(now);
        write_registry(&paths.registry_path, &registry)?;
    }
    Ok(outcome)
}
