//! Advisory cycle lock (`.homeostat/state/cycle.lock`).
//!
//! The lock file is created with `create_new`, so exactly one process wins.
//! It records the holder's pid and acquisition time; a lock older than the
//! configured staleness limit (or one that cannot be parsed) is assumed to
//! belong to a crashed cycle and is reclaimed.
//!
//! Removal never deletes a lock by path alone: the file is first renamed
//! aside, and only deleted if it is the one the caller expected. Anything
//! else is linked back into place.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};

/// Another cycle holds the lock.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cycle lock {} is held by pid {pid} since {acquired_at}", .path.display())]
pub struct CycleLockedError {
    pub path: PathBuf,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

/// Lock file contents: holder pid and acquisition time.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LockInfo {
    pid: u32,
    acquired_at: DateTime<Utc>,
}

impl LockInfo {
    fn render(&self) -> String {
        format!("{}\n{}\n", self.pid, self.acquired_at.to_rfc3339())
    }

    fn parse(contents: &str) -> Option<Self> {
        let mut lines = contents.lines();
        let pid = lines.next()?.trim().parse().ok()?;
        let acquired_at = DateTime::parse_from_rfc3339(lines.next()?.trim())
            .ok()?
            .with_timezone(&Utc);
        Some(Self { pid, acquired_at })
    }
}

/// RAII guard; the lock file is removed on drop if it is still this guard's.
#[derive(Debug)]
pub struct CycleLock {
    path: PathBuf,
    info: LockInfo,
}

impl CycleLock {
    /// Acquire the lock, reclaiming it if the current holder is stale.
    ///
    /// Fails with [`CycleLockedError`] when a fresh lock is held.
    pub fn acquire(path: &Path, stale_after: TimeDelta, now: DateTime<Utc>) -> Result<Self> {
        let info = LockInfo {
            pid: std::process::id(),
            acquired_at: now,
        };
        if try_create(path, &info)? {
            debug!(path = %path.display(), "cycle lock acquired");
            return Ok(Self {
                path: path.to_path_buf(),
                info,
            });
        }

        let seen = fs::read_to_string(path).ok();
        let holder = seen.as_deref().and_then(LockInfo::parse);
        if let Some(holder) = &holder
            && now - holder.acquired_at <= stale_after
        {
            return Err(locked(path, holder));
        }

        warn!(
            path = %path.display(),
            holder_pid = holder.as_ref().map(|h| h.pid),
            "reclaiming stale cycle lock"
        );
        if let Some(seen) = &seen {
            remove_if(path, |contents| contents == seen)
                .with_context(|| format!("remove stale lock {}", path.display()))?;
        }
        if try_create(path, &info)? {
            debug!(path = %path.display(), "stale cycle lock reclaimed");
            return Ok(Self {
                path: path.to_path_buf(),
                info,
            });
        }

        // Another process reclaimed it first.
        let current = fs::read_to_string(path)
            .ok()
            .and_then(|contents| LockInfo::parse(&contents))
            .unwrap_or(LockInfo {
                pid: 0,
                acquired_at: now,
            });
        Err(locked(path, &current))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CycleLock {
    fn drop(&mut self) {
        let info = &self.info;
        match remove_if(&self.path, |contents| {
            LockInfo::parse(contents).as_ref() == Some(info)
        }) {
            Ok(true) => debug!(path = %self.path.display(), "cycle lock released"),
            Ok(false) => warn!(
                path = %self.path.display(),
                "cycle lock was reclaimed by another holder; leaving it in place"
            ),
            Err(err) => {
                warn!(path = %self.path.display(), err = %format!("{err:#}"), "failed to release cycle lock");
            }
        }
    }
}

fn locked(path: &Path, holder: &LockInfo) -> anyhow::Error {
    CycleLockedError {
        path: path.to_path_buf(),
        pid: holder.pid,
        acquired_at: holder.acquired_at,
    }
    .into()
}

fn try_create(path: &Path, info: &LockInfo) -> Result<bool> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            file.write_all(info.render().as_bytes())
                .with_context(|| format!("write lock {}", path.display()))?;
            Ok(true)
        }
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err).with_context(|| format!("create lock {}", path.display())),
    }
}

/// Unique sibling name used while a lock file is inspected off its path.
fn aside_path(path: &Path) -> PathBuf {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{name}.{}-{n}.aside", std::process::id()))
}

/// Remove the lock file at `path` only if `expected` accepts its contents.
///
/// Returns `Ok(false)` when the file is missing or belongs to someone else;
/// in the latter case it is linked back at `path` unless a new lock already
/// took its place.
fn remove_if(path: &Path, expected: impl Fn(&str) -> bool) -> Result<bool> {
    let aside = aside_path(path);
    match fs::rename(path, &aside) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
        Err(err) => {
            return Err(err).with_context(|| format!("move lock {} aside", path.display()));
        }
    }
    let contents = fs::read_to_string(&aside).unwrap_or_default();
    let ours = expected(&contents);
    if !ours {
        match fs::hard_link(&aside, path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                warn!(path = %path.display(), "lock replaced while restoring foreign holder");
            }
            Err(err) => {
                let _ = fs::remove_file(&aside);
                return Err(err).with_context(|| format!("restore lock {}", path.display()));
            }
        }
    }
    fs::remove_file(&aside).with_context(|| format!("remove {}", aside.display()))?;
    Ok(ours)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixed_now;

    fn hour() -> TimeDelta {
        TimeDelta::hours(1)
    }

    #[test]
    fn lock_is_exclusive_and_released_on_drop() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("cycle.lock");

        let guard = CycleLock::acquire(&path, hour(), fixed_now()).expect("acquire");
        assert!(path.is_file());

        let err = CycleLock::acquire(&path, hour(), fixed_now()).unwrap_err();
        let locked = err.downcast_ref::<CycleLockedError>().expect("typed error");
        assert_eq!(locked.pid, std::process::id());

        drop(guard);
        assert!(!path.exists());
        CycleLock::acquire(&path, hour(), fixed_now()).expect("re-acquire");
    }

    #[test]
    fn stale_lock_is_reclaimed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("cycle.lock");
        let old = LockInfo {
            pid: 4242,
            acquired_at: fixed_now() - TimeDelta::hours(2),
        };
        fs::write(&path, old.render()).expect("write");

        let guard = CycleLock::acquire(&path, hour(), fixed_now()).expect("reclaim");
        let contents = fs::read_to_string(guard.path()).expect("read");
        assert_eq!(
            LockInfo::parse(&contents).map(|i| i.pid),
            Some(std::process::id())
        );
    }

    #[test]
    fn corrupt_lock_is_reclaimed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("cycle.lock");
        fs::write(&path, "garbage").expect("write");
        CycleLock::acquire(&path, hour(), fixed_now()).expect("reclaim");
    }

    #[test]
    fn dropping_a_reclaimed_guard_keeps_the_new_holders_lock() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("cycle.lock");
        let later = fixed_now() + TimeDelta::hours(2);

        let first = CycleLock::acquire(&path, hour(), fixed_now()).expect("first");
        let second = CycleLock::acquire(&path, hour(), later).expect("reclaim");
        drop(first);

        assert!(path.is_file());
        let contents = fs::read_to_string(&path).expect("read");
        assert_eq!(
            LockInfo::parse(&contents).map(|i| i.acquired_at),
            Some(later)
        );
        let err = CycleLock::acquire(&path, hour(), later).unwrap_err();
        assert!(err.downcast_ref::<CycleLockedError>().is_some());

        drop(second);
        assert!(!path.exists());
    }

    #[test]
    fn reclaim_leaves_a_lock_that_changed_since_it_was_read() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("cycle.lock");
        let stale = LockInfo {
            pid: 4242,
            acquired_at: fixed_now() - TimeDelta::hours(2),
        }
        .render();
        let fresh = LockInfo {
            pid: 5151,
            acquired_at: fixed_now(),
        }
        .render();
        fs::write(&path, &fresh).expect("write");

        let removed = remove_if(&path, |contents| contents == stale).expect("remove_if");

        assert!(!removed);
        assert_eq!(fs::read_to_string(&path).expect("read"), fresh);
        let leftovers: Vec<_> = fs::read_dir(temp.path())
            .expect("read_dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != "cycle.lock")
            .collect();
        assert!(leftovers.is_empty());
    }
}
