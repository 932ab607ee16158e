//! Task backlog reader (`.homeostat/tasks/*.json`).
//!
//! The backlog is owned by an external collaborator; this module only reads
//! it. Files are visited in name order and unparsable ones are skipped.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::types::truncate_chars;

/// Characters of a task description carried into the prompt.
pub const DESCRIPTION_CHARS: usize = 200;
pub const DEFAULT_PRIORITY: i64 = 5;

/// An actionable backlog item as presented to the reasoner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BacklogItem {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: i64,
}

#[derive(Debug, Deserialize)]
struct TaskFile {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    priority: Option<i64>,
    #[serde(default)]
    status: Option<String>,
}

impl TaskFile {
    fn is_actionable(&self) -> bool {
        !matches!(self.status.as_deref(), Some("blocked" | "completed"))
    }
}

/// Load actionable items. A missing directory is an empty backlog.
pub fn load_backlog(tasks_dir: &Path) -> Vec<BacklogItem> {
    let entries = match fs::read_dir(tasks_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Vec::new(),
        Err(err) => {
            warn!(dir = %tasks_dir.display(), err = %err, "cannot read task backlog");
            return Vec::new();
        }
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let items: Vec<BacklogItem> = files.iter().filter_map(|path| read_task(path)).collect();
    debug!(dir = %tasks_dir.display(), files = files.len(), actionable = items.len(), "backlog loaded");
    items
}

fn read_task(path: &Path) -> Option<BacklogItem> {
    let task: TaskFile = match fs::read_to_string(path)
        .map_err(|err| err.to_string())
        .and_then(|contents| serde_json::from_str(&contents).map_err(|err| err.to_string()))
    {
        Ok(task) => task,
        Err(err) => {
            debug!(path = %path.display(), err = %err, "skipping unreadable task");
            return None;
        }
    };
    if !task.is_actionable() {
        return None;
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    Some(BacklogItem {
        id: task.id.unwrap_or(stem),
        title: task.title.unwrap_or_default(),
        description: truncate_chars(&task.description, DESCRIPTION_CHARS),
        priority: task.priority.unwrap_or(DEFAULT_PRIORITY),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).expect("write task");
    }

    #[test]
    fn loads_actionable_tasks_in_name_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path();
        write(dir, "b.json", r#"{"id": "t-b", "title": "Second", "priority": 2}"#);
        write(dir, "a.json", r#"{"id": "t-a", "title": "First", "description": "do a"}"#);
        write(dir, "c.json", r#"{"id": "t-c", "title": "Blocked", "status": "blocked"}"#);
        write(dir, "d.json", r#"{"id": "t-d", "title": "Done", "status": "completed"}"#);
        write(dir, "e.json", "{ not json");
        write(dir, "notes.txt", "ignored");

        let items = load_backlog(dir);
        let ids: Vec<&str> = items.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t-a", "t-b"]);
        assert_eq!(items[0].priority, DEFAULT_PRIORITY);
        assert_eq!(items[0].description, "do a");
        assert_eq!(items[1].priority, 2);
    }

    #[test]
    fn long_descriptions_are_truncated_and_ids_default_to_stem() {
        let temp = tempfile::tempdir().expect("tempdir");
        let long = "d".repeat(DESCRIPTION_CHARS + 50);
        write(
            temp.path(),
            "refresh-feeds.json",
            &serde_json::json!({ "title": "Refresh", "description": long }).to_string(),
        );
        let items = load_backlog(temp.path());
        assert_eq!(items[0].id, "refresh-feeds");
        assert_eq!(items[0].description.chars().count(), DESCRIPTION_CHARS);
    }

    #[test]
    fn missing_directory_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(load_backlog(&temp.path().join("tasks")).is_empty());
    }
}
