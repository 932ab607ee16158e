//! Test-only helpers: fixed clocks, record builders, and scripted fakes.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;
use std::process::Command;

use anyhow::{Result, anyhow};
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use crate::core::experience::Experience;
use crate::core::registry::Capability;
use crate::core::types::HealthSnapshot;
use crate::io::init::{HomeostatPaths, InitOptions, init_homeostat};
use crate::io::reasoner::{ReasonRequest, Reasoner, ReasonerResponse};
use crate::io::telemetry::TelemetrySource;

/// Deterministic "now" shared by tests.
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

/// An experience for `cycle` with a generic summary.
pub fn experience(cycle: u64, success: bool, was_exploration: bool) -> Experience {
    Experience {
        cycle,
        timestamp: fixed_now(),
        model: "opus".to_string(),
        success,
        cost_usd: 0.25,
        duration_ms: 1_000,
        output_summary: format!("cycle {cycle} output"),
        error: (!success).then(|| format!("cycle {cycle} failed")),
        was_exploration,
    }
}

/// An exploitation experience with an explicit output summary.
pub fn experience_with_output(cycle: u64, success: bool, output: &str) -> Experience {
    Experience {
        output_summary: output.to_string(),
        ..experience(cycle, success, false)
    }
}

/// A capability with the given tags and confidence and no recorded uses.
pub fn capability(tags: &[&str], confidence: f64) -> Capability {
    Capability {
        description: String::new(),
        confidence,
        times_used: 0,
        times_succeeded: 0,
        times_failed: 0,
        tags: tags.iter().map(|t| t.to_string()).collect(),
        notes: String::new(),
        first_learned: fixed_now(),
        last_used: None,
    }
}

/// Fresh temp workspace with `homeostat init` already applied.
pub struct TestWorkspace {
    pub temp: TempDir,
    pub paths: HomeostatPaths,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let paths = init_homeostat(temp.path(), &InitOptions { force: false }, fixed_now())?;
        Ok(Self { temp, paths })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Drop a task file into the backlog.
    pub fn add_task(&self, id: &str, title: &str) -> Result<()> {
        let body = serde_json::json!({ "id": id, "title": title, "status": "pending" });
        std::fs::write(
            self.paths.tasks_dir.join(format!("{id}.json")),
            serde_json::to_string_pretty(&body)?,
        )?;
        Ok(())
    }

    pub fn remove_heartbeat(&self) -> Result<()> {
        if self.paths.heartbeat_path.exists() {
            std::fs::remove_file(&self.paths.heartbeat_path)?;
        }
        Ok(())
    }
}

fn git(root: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(root)
        .status()
        .unwrap_or_else(|err| panic!("git {}: {err}", args.join(" ")));
    assert!(status.success(), "git {} failed", args.join(" "));
}

/// `git init` with a committer identity and one initial commit.
pub fn init_git_repo(root: &Path) {
    git(root, &["init", "-q"]);
    git(root, &["config", "user.email", "test@example.com"]);
    git(root, &["config", "user.name", "test"]);
    git_commit_file(root, None, "README.md", "hi\n");
}

/// Commit `file` with `contents`, first creating and switching to `branch` if given.
pub fn git_commit_file(root: &Path, branch: Option<&str>, file: &str, contents: &str) {
    if let Some(branch) = branch {
        git(root, &["checkout", "-q", "-b", branch]);
    }
    if let Err(err) = std::fs::write(root.join(file), contents) {
        panic!("write {file}: {err}");
    }
    git(root, &["add", file]);
    git(root, &["commit", "-q", "-m", &format!("update {file}")]);
}

/// Reasoner that replays a fixed script and records every request.
///
/// Invocations past the end of the script return an error.
#[derive(Debug, Default)]
pub struct ScriptedReasoner {
    script: RefCell<VecDeque<Result<ReasonerResponse>>>,
    requests: RefCell<Vec<ReasonRequest>>,
}

impl ScriptedReasoner {
    pub fn new(responses: Vec<ReasonerResponse>) -> Self {
        Self::from_results(responses.into_iter().map(Ok).collect())
    }

    pub fn from_results(results: Vec<Result<ReasonerResponse>>) -> Self {
        Self {
            script: RefCell::new(results.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// A successful response carrying `output`.
    pub fn success(output: &str) -> ReasonerResponse {
        ReasonerResponse {
            success: true,
            output_text: output.to_string(),
            error_text: None,
            cost_usd: 0.42,
            duration_ms: 1_500,
            session_id: Some("session-1".to_string()),
            model: "opus".to_string(),
        }
    }

    pub fn requests(&self) -> Vec<ReasonRequest> {
        self.requests.borrow().clone()
    }
}

impl Reasoner for ScriptedReasoner {
    fn invoke(&self, request: &ReasonRequest) -> Result<ReasonerResponse> {
        self.requests.borrow_mut().push(request.clone());
        self.script
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("scripted reasoner exhausted")))
    }
}

/// Telemetry that always reports the same snapshot.
#[derive(Debug, Clone, Default)]
pub struct FixedTelemetry(pub HealthSnapshot);

impl TelemetrySource for FixedTelemetry {
    fn snapshot(&self) -> HealthSnapshot {
        self.0.clone()
    }
}
