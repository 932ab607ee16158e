//! Host telemetry collection.
//!
//! Every probe is best effort: a probe that cannot run or whose output
//! cannot be parsed reports `None` (no penalty) instead of failing the cycle.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::core::types::HealthSnapshot;
use crate::io::backlog::load_backlog;
use crate::io::process::run_command_with_timeout;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_OUTPUT_LIMIT: usize = 64 * 1024;

/// Source of health snapshots.
pub trait TelemetrySource {
    fn snapshot(&self) -> HealthSnapshot;
}

/// Probes the local host: `df`, `/proc/meminfo`, the task backlog, and `crontab -l`.
#[derive(Debug, Clone)]
pub struct HostTelemetry {
    /// Filesystem whose usage is reported.
    pub disk_path: PathBuf,
    pub meminfo_path: PathBuf,
    pub tasks_dir: PathBuf,
    /// Substring the crontab must mention for the scheduler to count as healthy.
    pub scheduler_marker: String,
}

impl HostTelemetry {
    pub fn new(root: &Path, tasks_dir: &Path, scheduler_marker: &str) -> Self {
        Self {
            disk_path: root.to_path_buf(),
            meminfo_path: PathBuf::from("/proc/meminfo"),
            tasks_dir: tasks_dir.to_path_buf(),
            scheduler_marker: scheduler_marker.to_string(),
        }
    }

    fn disk_used_pct(&self) -> Option<f64> {
        let mut cmd = Command::new("df");
        cmd.arg("-Pk").arg(&self.disk_path);
        let output = run_command_with_timeout(cmd, PROBE_TIMEOUT, PROBE_OUTPUT_LIMIT).ok()?;
        if !output.succeeded() {
            return None;
        }
        parse_df_used_pct(&output.stdout_text())
    }

    fn mem_available_mb(&self) -> Option<u64> {
        let contents = fs::read_to_string(&self.meminfo_path).ok()?;
        parse_meminfo_available_mb(&contents)
    }

    fn scheduler_ok(&self) -> bool {
        let mut cmd = Command::new("crontab");
        cmd.arg("-l");
        match run_command_with_timeout(cmd, PROBE_TIMEOUT, PROBE_OUTPUT_LIMIT) {
            Ok(output) if output.succeeded() => {
                crontab_mentions(&output.stdout_text(), &self.scheduler_marker)
            }
            Ok(_) => false,
            Err(err) => {
                debug!(err = %err, "crontab probe failed");
                false
            }
        }
    }
}

impl TelemetrySource for HostTelemetry {
    #[instrument(skip_all)]
    fn snapshot(&self) -> HealthSnapshot {
        let snapshot = HealthSnapshot {
            disk_used_pct: self.disk_used_pct(),
            mem_available_mb: self.mem_available_mb(),
            pending_tasks: load_backlog(&self.tasks_dir).len(),
            scheduler_ok: self.scheduler_ok(),
        };
        debug!(?snapshot, "health collected");
        snapshot
    }
}

/// Used percentage from POSIX `df -Pk` output, rounded to one decimal.
pub fn parse_df_used_pct(output: &str) -> Option<f64> {
    let line = output.lines().nth(1)?;
    let mut fields = line.split_whitespace();
    let _filesystem = fields.next()?;
    let total: f64 = fields.next()?.parse().ok()?;
    let used: f64 = fields.next()?.parse().ok()?;
    if total <= 0.0 {
        return None;
    }
    Some((used / total * 1000.0).round() / 10.0)
}

/// `MemAvailable` from `/proc/meminfo`, converted from kB to MB.
pub fn parse_meminfo_available_mb(contents: &str) -> Option<u64> {
    let line = contents
        .lines()
        .find(|line| line.starts_with("MemAvailable:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / 1024)
}

/// Case-insensitive check that the crontab schedules this system.
pub fn crontab_mentions(crontab: &str, marker: &str) -> bool {
    let marker = marker.trim().to_lowercase();
    !marker.is_empty()
        && crontab
            .lines()
            .map(str::trim)
            .filter(|line| !line.starts_with('#'))
            .any(|line| line.to_lowercase().contains(&marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_df_output() {
        let output = "Filesystem     1024-blocks      Used Available Capacity Mounted on\n\
                      /dev/nvme0n1p2   488245288 439420759  48824529      91% /\n";
        assert_eq!(parse_df_used_pct(output), Some(90.0));
    }

    #[test]
    fn df_output_without_data_row_is_none() {
        assert_eq!(parse_df_used_pct("Filesystem 1024-blocks Used\n"), None);
        assert_eq!(parse_df_used_pct(""), None);
    }

    #[test]
    fn parses_meminfo_available() {
        let contents = "MemTotal:       16302508 kB\nMemFree:          812340 kB\nMemAvailable:    6553600 kB\n";
        assert_eq!(parse_meminfo_available_mb(contents), Some(6400));
        assert_eq!(parse_meminfo_available_mb("MemTotal: 1 kB\n"), None);
    }

    #[test]
    fn crontab_marker_ignores_comments_and_case() {
        let crontab = "# homeostat disabled\n*/5 * * * * /usr/bin/backup\n";
        assert!(!crontab_mentions(crontab, "homeostat"));
        let crontab = "*/5 * * * * cd /srv && HOMEOSTAT_ROOT=/srv /usr/local/bin/homeostat cycle\n";
        assert!(crontab_mentions(crontab, "Homeostat"));
        assert!(!crontab_mentions(crontab, "  "));
    }

    #[test]
    fn snapshot_counts_backlog_and_tolerates_missing_meminfo() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tasks = temp.path().join("tasks");
        fs::create_dir_all(&tasks).expect("mkdir");
        fs::write(tasks.join("a.json"), r#"{"id":"a","title":"A"}"#).expect("write");
        fs::write(tasks.join("b.json"), r#"{"id":"b","title":"B","status":"blocked"}"#)
            .expect("write");

        let telemetry = HostTelemetry {
            meminfo_path: temp.path().join("no-meminfo"),
            ..HostTelemetry::new(temp.path(), &tasks, "homeostat")
        };
        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.pending_tasks, 1);
        assert_eq!(snapshot.mem_available_mb, None);
    }
}
