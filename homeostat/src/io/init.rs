//! Canonical `.homeostat/` layout and `homeostat init` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use tracing::info;

use super::config::{HomeostatConfig, write_config};
use super::registry_store::write_registry;
use super::state_store::{SystemState, write_state};
use crate::core::registry::CapabilityRegistry;

/// All canonical paths within `.homeostat/` for a project root.
#[derive(Debug, Clone)]
pub struct HomeostatPaths {
    pub root: PathBuf,
    pub home_dir: PathBuf,
    pub state_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub tasks_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub heartbeat_path: PathBuf,
    pub config_path: PathBuf,
    pub state_path: PathBuf,
    pub registry_path: PathBuf,
    pub experiences_path: PathBuf,
    pub lock_path: PathBuf,
}

impl HomeostatPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let home_dir = root.join(".homeostat");
        let state_dir = home_dir.join("state");
        Self {
            root: root.clone(),
            home_dir: home_dir.clone(),
            state_dir: state_dir.clone(),
            logs_dir: home_dir.join("logs"),
            tasks_dir: home_dir.join("tasks"),
            gitignore_path: home_dir.join(".gitignore"),
            heartbeat_path: home_dir.join("HEARTBEAT.md"),
            config_path: state_dir.join("config.toml"),
            state_path: state_dir.join("state.json"),
            registry_path: state_dir.join("capabilities.json"),
            experiences_path: state_dir.join("experiences.jsonl"),
            lock_path: state_dir.join("cycle.lock"),
        }
    }

    /// Create the directories a cycle writes into. Idempotent.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.state_dir, &self.logs_dir, &self.tasks_dir] {
            create_dir(dir)?;
        }
        Ok(())
    }
}

/// Options for `init_homeostat`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing homeostat-owned files.
    pub force: bool,
}

/// Create `.homeostat/` scaffolding in `root`.
///
/// Fails if `.homeostat/` already exists unless `options.force` is set.
/// With `force`, config and placeholders are rewritten and state, registry,
/// and experience log are reset.
pub fn init_homeostat(
    root: &Path,
    options: &InitOptions,
    now: DateTime<Utc>,
) -> Result<HomeostatPaths> {
    let paths = HomeostatPaths::new(root);
    if paths.home_dir.exists() && !options.force {
        return Err(anyhow!(
            "homeostat init: .homeostat already exists (use --force to overwrite)"
        ));
    }
    if paths.home_dir.exists() && !paths.home_dir.is_dir() {
        return Err(anyhow!(
            "homeostat init: .homeostat exists but is not a directory"
        ));
    }

    create_dir(&paths.home_dir)?;
    paths.ensure_dirs()?;

    write_file(&paths.gitignore_path, HOMEOSTAT_GITIGNORE)?;
    write_file(&paths.heartbeat_path, HEARTBEAT_PLACEHOLDER)?;
    write_config(&paths.config_path, &HomeostatConfig::default())?;
    write_state(&paths.state_path, &SystemState::new(now))?;
    write_registry(&paths.registry_path, &CapabilityRegistry::default())?;
    write_file(&paths.experiences_path, "")?;

    info!(root = %paths.root.display(), "initialized .homeostat");
    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const HEARTBEAT_PLACEHOLDER: &str = "# Heartbeat\n\nStanding instructions for cycles with an empty task backlog.\nDelete this file to let empty cycles go idle.\n";
const HOMEOSTAT_GITIGNORE: &str = "logs/\nstate/cycle.lock\nstate/*.tmp\n";
