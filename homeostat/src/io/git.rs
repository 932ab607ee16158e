//! Git adapter for self-improvement merges.
//!
//! Only the handful of branch operations the improvement step needs. Every
//! call is bounded by [`GIT_TIMEOUT`] so a wedged repository cannot stall a
//! cycle.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::io::process::{CommandOutput, run_command_with_timeout};

pub const GIT_TIMEOUT: Duration = Duration::from_secs(60);
const GIT_OUTPUT_LIMIT: usize = 64 * 1024;

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Return the current branch name (errors on detached HEAD or outside a repository).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_checked(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.stdout_text().trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let reference = format!("refs/heads/{branch}");
        let out = self.run(&["show-ref", "--verify", "--quiet", &reference])?;
        Ok(out.succeeded())
    }

    #[instrument(skip_all, fields(branch))]
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out branch");
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    /// Fast-forward the current branch to `branch`; fails if histories diverged.
    #[instrument(skip_all, fields(branch))]
    pub fn merge_ff_only(&self, branch: &str) -> Result<()> {
        debug!(branch, "fast-forward merge");
        self.run_checked(&["merge", "--ff-only", branch])?;
        Ok(())
    }

    /// Delete a fully merged local branch.
    pub fn delete_branch(&self, branch: &str) -> Result<()> {
        self.run_checked(&["branch", "-d", branch])?;
        Ok(())
    }

    fn run_checked(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = self.run(args)?;
        if output.timed_out {
            return Err(anyhow!(
                "git {} timed out after {}s",
                args.join(" "),
                GIT_TIMEOUT.as_secs()
            ));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                output.stderr_text().trim()
            ));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.workdir);
        run_command_with_timeout(cmd, GIT_TIMEOUT, GIT_OUTPUT_LIMIT)
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{git_commit_file, init_git_repo};

    #[test]
    fn reports_branch_and_existence() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_git_repo(temp.path());
        let git = Git::new(temp.path());

        let base = git.current_branch().expect("branch");
        assert!(git.branch_exists(&base).expect("exists"));
        assert!(!git.branch_exists("improve/cycle-0001").expect("exists"));
    }

    #[test]
    fn fast_forwards_and_deletes_a_branch() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_git_repo(temp.path());
        let git = Git::new(temp.path());
        let base = git.current_branch().expect("branch");

        git_commit_file(temp.path(), Some("feature"), "notes.md", "hello\n");
        git.checkout_branch(&base).expect("checkout");
        assert!(!temp.path().join("notes.md").exists());

        git.merge_ff_only("feature").expect("merge");
        git.delete_branch("feature").expect("delete");
        assert!(temp.path().join("notes.md").is_file());
        assert!(!git.branch_exists("feature").expect("exists"));
    }

    #[test]
    fn outside_a_repository_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path());
        let err = git.current_branch().unwrap_err();
        assert!(format!("{err:#}").contains("git rev-parse"));
    }
}
