//! Reasoner abstraction for delegate invocation.
//!
//! The [`Reasoner`] trait decouples the cycle from the actual delegate
//! backend (a `claude`-style CLI). Tests use scripted reasoners that return
//! predetermined responses without spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::types::truncate_chars;
use crate::io::config::DelegateConfig;
use crate::io::process::run_command_with_timeout;

/// Characters of reasoner output kept in a response.
pub const OUTPUT_TEXT_CHARS: usize = 4000;
/// Characters of error text kept in a response.
pub const ERROR_TEXT_CHARS: usize = 500;

/// Parameters for one reasoner invocation.
#[derive(Debug, Clone)]
pub struct ReasonRequest {
    /// Working directory for the reasoner process.
    pub workdir: PathBuf,
    pub prompt: String,
    /// Named agent definition to run the prompt under, if any.
    pub agent: Option<String>,
    pub model: String,
    pub fallback_model: Option<String>,
    /// Session to continue, from the previous cycle.
    pub resume_session: Option<String>,
    pub max_budget_usd: Option<f64>,
    pub timeout: Duration,
}

/// Normalized result of an invocation. A failed run is still `Ok` at the trait level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasonerResponse {
    pub success: bool,
    pub output_text: String,
    pub error_text: Option<String>,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub session_id: Option<String>,
    pub model: String,
}

impl ReasonerResponse {
    pub fn failure(model: impl Into<String>, error: impl AsRef<str>) -> Self {
        Self {
            success: false,
            output_text: String::new(),
            error_text: Some(truncate_chars(error.as_ref(), ERROR_TEXT_CHARS)),
            cost_usd: 0.0,
            duration_ms: 0,
            session_id: None,
            model: model.into(),
        }
    }
}

/// Abstraction over delegate backends.
pub trait Reasoner {
    /// Run the delegate. `Err` means the delegate could not be run at all.
    fn invoke(&self, request: &ReasonRequest) -> Result<ReasonerResponse>;
}

/// Reasoner that spawns a `claude -p` compatible CLI.
#[derive(Debug, Clone)]
pub struct ClaudeReasoner {
    command: String,
    extra_args: Vec<String>,
    output_limit_bytes: usize,
}

impl ClaudeReasoner {
    pub fn from_config(config: &DelegateConfig) -> Self {
        Self {
            command: config.command.clone(),
            extra_args: config.extra_args.clone(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    fn build_command(&self, request: &ReasonRequest) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.arg("-p")
            .arg(&request.prompt)
            .arg("--model")
            .arg(&request.model)
            .arg("--output-format")
            .arg("json");
        if let Some(agent) = &request.agent {
            cmd.arg("--agent").arg(agent);
        }
        if let Some(budget) = request.max_budget_usd {
            cmd.arg("--max-budget-usd").arg(format!("{budget:.2}"));
        }
        if let Some(fallback) = &request.fallback_model
            && fallback != &request.model
        {
            cmd.arg("--fallback-model").arg(fallback);
        }
        if let Some(session) = &request.resume_session {
            cmd.arg("--resume").arg(session);
        }
        cmd.args(&self.extra_args)
            .current_dir(&request.workdir)
            // A nested CLI refuses to start when it detects a parent session.
            .env_remove("CLAUDECODE");
        cmd
    }
}

impl Reasoner for ClaudeReasoner {
    #[instrument(skip_all, fields(model = %request.model, timeout_secs = request.timeout.as_secs(), resume = request.resume_session.is_some()))]
    fn invoke(&self, request: &ReasonRequest) -> Result<ReasonerResponse> {
        info!(workdir = %request.workdir.display(), "invoking reasoner");
        let cmd = self.build_command(request);
        let output = run_command_with_timeout(cmd, request.timeout, self.output_limit_bytes)
            .with_context(|| format!("run {}", self.command))?;

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "reasoner timed out");
            return Ok(ReasonerResponse::failure(
                &request.model,
                format!("Timeout ({}s)", request.timeout.as_secs()),
            ));
        }

        let response = parse_reasoner_output(
            &request.model,
            &output.stdout_text(),
            &output.stderr_text(),
            output.status.success(),
            output.status.code(),
        );
        debug!(
            success = response.success,
            cost_usd = response.cost_usd,
            "reasoner finished"
        );
        Ok(response)
    }
}

/// JSON envelope printed by `--output-format json`.
#[derive(Debug, Deserialize)]
struct ResultEnvelope {
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    total_cost_usd: Option<f64>,
    #[serde(default)]
    duration_ms: Option<u64>,
}

/// Normalize raw process output into a response.
///
/// A well-formed envelope is authoritative. Anything else falls back to the
/// exit status, with stdout as output and stderr as the error text.
pub fn parse_reasoner_output(
    model: &str,
    stdout: &str,
    stderr: &str,
    exit_ok: bool,
    exit_code: Option<i32>,
) -> ReasonerResponse {
    match serde_json::from_str::<ResultEnvelope>(stdout.trim()) {
        Ok(envelope) => {
            let result = envelope.result.unwrap_or_default();
            let success = envelope.subtype.as_deref() == Some("success") && !envelope.is_error;
            let error_text = if envelope.is_error {
                Some(truncate_chars(&result, ERROR_TEXT_CHARS))
            } else if !success {
                Some(format!(
                    "reasoner ended with {}",
                    envelope.subtype.as_deref().unwrap_or("no subtype")
                ))
            } else {
                None
            };
            ReasonerResponse {
                success,
                output_text: truncate_chars(&result, OUTPUT_TEXT_CHARS),
                error_text,
                cost_usd: envelope.total_cost_usd.unwrap_or(0.0),
                duration_ms: envelope.duration_ms.unwrap_or(0),
                session_id: envelope.session_id.filter(|s| !s.is_empty()),
                model: model.to_string(),
            }
        }
        Err(err) => {
            debug!(err = %err, "reasoner output is not a result envelope");
            let error_text = (!exit_ok).then(|| {
                if stderr.trim().is_empty() {
                    format!("exit status {exit_code:?}")
                } else {
                    truncate_chars(stderr, ERROR_TEXT_CHARS)
                }
            });
            ReasonerResponse {
                success: exit_ok,
                output_text: truncate_chars(stdout, OUTPUT_TEXT_CHARS),
                error_text,
                cost_usd: 0.0,
                duration_ms: 0,
                session_id: None,
                model: model.to_string(),
            }
        }
    }
}
