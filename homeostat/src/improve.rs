//! Self-improvement after consolidation: audit, improve on a branch, merge.
//!
//! The auditor reviews the registry against the repository history; the
//! improver makes one change on `improve/cycle-NNNN`. A branch that
//! fast-forwards cleanly is merged into the branch the cycle started on and
//! deleted. Every failure is reported in the outcome and never fails the cycle.

use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::experience::Experience;
use crate::core::registry::CapabilityRegistry;
use crate::core::types::truncate_chars;
use crate::io::config::{DelegateConfig, ImproveConfig};
use crate::io::git::Git;
use crate::io::prompt::PromptEngine;
use crate::io::reasoner::{ReasonRequest, Reasoner, ReasonerResponse};

/// Characters of auditor output handed to the improver.
pub const AUDIT_FINDINGS_CHARS: usize = 2000;
const NO_FINDINGS: &str = "No findings";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ImprovementOutcome {
    /// Nothing was merged; `reason` says why the step stopped early.
    Skipped { reason: String },
    /// The improver succeeded but left no branch behind.
    NoChange,
    Merged { branch: String },
    /// The branch exists but could not be fast-forwarded; it is kept for review.
    MergeFailed { branch: String, reason: String },
}

/// Branch name the improver is asked to commit on.
pub fn improvement_branch(cycle: u64) -> String {
    format!("improve/cycle-{cycle:04}")
}

/// Inputs shared by both improvement invocations.
#[derive(Debug, Clone, Copy)]
pub struct ImprovementContext<'a> {
    pub cycle: u64,
    pub registry: &'a CapabilityRegistry,
    pub experiences: &'a [Experience],
    pub delegate: &'a DelegateConfig,
    pub improve: &'a ImproveConfig,
}

#[instrument(skip_all, fields(cycle = ctx.cycle))]
pub fn self_improve<R: Reasoner>(
    ctx: &ImprovementContext<'_>,
    reasoner: &R,
    root: &Path,
) -> ImprovementOutcome {
    let git = Git::new(root);
    let branch = improvement_branch(ctx.cycle);

    let base = match git.current_branch() {
        Ok(base) => base,
        Err(err) => return skipped(format!("no usable git branch: {err:#}")),
    };
    match git.branch_exists(&branch) {
        Ok(false) => {}
        Ok(true) => return skipped(format!("branch {branch} already exists")),
        Err(err) => return skipped(format!("inspect {branch}: {err:#}")),
    }

    let engine = match PromptEngine::new() {
        Ok(engine) => engine,
        Err(err) => return skipped(format!("load prompts: {err:#}")),
    };

    let audit_prompt = match engine.render_audit(ctx.cycle, ctx.experiences, ctx.registry) {
        Ok(prompt) => prompt,
        Err(err) => return skipped(format!("render audit prompt: {err:#}")),
    };
    let audit = run_agent(
        reasoner,
        ctx,
        root,
        &ctx.improve.auditor_agent,
        audit_prompt,
        ctx.improve.audit_timeout_secs,
    );
    let findings = audit
        .filter(|r| r.success && !r.output_text.trim().is_empty())
        .map(|r| truncate_chars(&r.output_text, AUDIT_FINDINGS_CHARS))
        .unwrap_or_else(|| NO_FINDINGS.to_string());
    debug!(findings_chars = findings.chars().count(), "audit finished");

    let improve_prompt = match engine.render_improve(
        ctx.cycle,
        &findings,
        &branch,
        ctx.experiences,
        ctx.registry,
    ) {
        Ok(prompt) => prompt,
        Err(err) => return skipped(format!("render improve prompt: {err:#}")),
    };
    let improved = run_agent(
        reasoner,
        ctx,
        root,
        &ctx.improve.improver_agent,
        improve_prompt,
        ctx.improve.improve_timeout_secs,
    );
    match improved {
        Some(response) if response.success => {
            info!(summary = %truncate_chars(&response.output_text, 200), "improver finished");
        }
        Some(response) => {
            return skipped(
                response
                    .error_text
                    .unwrap_or_else(|| "improver reported failure".to_string()),
            );
        }
        None => return skipped("improver could not be run".to_string()),
    }

    merge_branch(&git, &base, &branch)
}

fn run_agent<R: Reasoner>(
    reasoner: &R,
    ctx: &ImprovementContext<'_>,
    root: &Path,
    agent: &str,
    prompt: String,
    timeout_secs: u64,
) -> Option<ReasonerResponse> {
    let request = ReasonRequest {
        workdir: root.to_path_buf(),
        prompt,
        agent: Some(agent.to_string()),
        model: ctx.delegate.model.clone(),
        fallback_model: ctx.delegate.fallback_model.clone(),
        resume_session: None,
        max_budget_usd: ctx.delegate.max_budget_usd,
        timeout: Duration::from_secs(timeout_secs),
    };
    match reasoner.invoke(&request) {
        Ok(response) => Some(response),
        Err(err) => {
            warn!(agent, err = %format!("{err:#}"), "agent failed to run");
            None
        }
    }
}

/// Fast-forward `base` to `branch` and delete `branch`. A missing branch is [`ImprovementOutcome::NoChange`].
fn merge_branch(git: &Git, base: &str, branch: &str) -> ImprovementOutcome {
    match git.branch_exists(branch) {
        Ok(true) => {}
        Ok(false) => {
            debug!(branch, "improver created no branch");
            return ImprovementOutcome::NoChange;
        }
        Err(err) => return merge_failed(branch, format!("{err:#}")),
    }

    let on_base = git.current_branch().is_ok_and(|current| current == base);
    if !on_base && let Err(err) = git.checkout_branch(base) {
        return merge_failed(branch, format!("{err:#}"));
    }
    if let Err(err) = git.merge_ff_only(branch) {
        return merge_failed(branch, format!("{err:#}"));
    }
    if let Err(err) = git.delete_branch(branch) {
        warn!(branch, err = %format!("{err:#}"), "merged branch not deleted");
    }
    info!(branch, base, "improvement merged");
    ImprovementOutcome::Merged {
        branch: branch.to_string(),
    }
}

fn skipped(reason: String) -> ImprovementOutcome {
    debug!(%reason, "self-improvement skipped");
    ImprovementOutcome::Skipped { reason }
}

fn merge_failed(branch: &str, reason: String) -> ImprovementOutcome {
    warn!(branch, %reason, "improvement branch left unmerged");
    ImprovementOutcome::MergeFailed {
        branch: branch.to_string(),
        reason,
    }
}
