//! Experience log storage (`.homeostat/state/experiences.jsonl`).
//!
//! The file is rewritten whole on every append so it never holds more than
//! the log capacity and a crash leaves either the old or the new contents.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::experience::{Experience, ExperienceLog};
use crate::io::atomic::write_atomic;

/// Load the log. Missing file means empty; malformed lines are skipped.
pub fn load_experiences(path: &Path, capacity: usize) -> ExperienceLog {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return ExperienceLog::with_capacity(capacity);
        }
        Err(err) => {
            warn!(path = %path.display(), err = %err, "cannot read experience log, starting empty");
            return ExperienceLog::with_capacity(capacity);
        }
    };
    let (log, skipped) = ExperienceLog::from_jsonl(capacity, &contents);
    if skipped > 0 {
        warn!(path = %path.display(), skipped, "skipped malformed experience lines");
    }
    debug!(entries = log.len(), "experience log loaded");
    log
}

/// Atomically write the whole log.
pub fn write_experiences(path: &Path, log: &ExperienceLog) -> Result<()> {
    let contents = log.to_jsonl().context("serialize experience log")?;
    write_atomic(path, &contents)
}

/// Append one experience, rotating out the oldest past capacity.
///
/// Returns the updated in-memory log.
pub fn append_experience(
    path: &Path,
    capacity: usize,
    experience: Experience,
) -> Result<ExperienceLog> {
    let mut log = load_experiences(path, capacity);
    if let Some(evicted) = log.push(experience) {
        debug!(evicted_cycle = evicted.cycle, "experience log rotated");
    }
    write_experiences(path, &log)?;
    Ok(log)
}
