//! Normalized change records emitted by watch strategies.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeAction {
    Created,
    Modified,
    Deleted,
}

/// One changed file, path relative to the project root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub action: ChangeAction,
    /// ISO-8601 detection time.
    pub timestamp: String,
}

impl FileChange {
    pub fn new(path: impl Into<String>, action: ChangeAction, at: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            action,
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// A batch of file changes for one project. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub project_id: String,
    pub files: Vec<FileChange>,
}

impl ChangeEvent {
    /// Build an event; `None` when `files` is empty.
    pub fn new(project_id: impl Into<String>, files: Vec<FileChange>) -> Option<Self> {
        if files.is_empty() {
            return None;
        }
        Some(Self {
            project_id: project_id.into(),
            files,
        })
    }

    pub fn single(project_id: impl Into<String>, change: FileChange) -> Self {
        Self {
            project_id: project_id.into(),
            files: vec![change],
        }
    }
}
