//! Event filter: raw filesystem notifications in, normalized changes out.

use super::event::{ChangeAction, FileChange};
use chrono::{DateTime, Utc};

/// Directory names whose contents are never source code.
pub const IGNORED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    ".svn",
    ".hg",
    ".next",
    ".nuxt",
    ".svelte-kit",
    ".turbo",
    ".cache",
    ".vite",
    "dist",
    "build",
];

/// Editor swap and temp file suffixes.
pub const IGNORED_SUFFIXES: &[&str] = &[".swp", ".swo", ".swx", ".tmp", ".temp", "~"];

/// Classifies raw notifications relative to one project root.
#[derive(Debug, Clone)]
pub struct EventFilter {
    root: String,
}

impl EventFilter {
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let root = root.trim_end_matches('/').to_string();
        Self { root }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Classify a raw notification detected now.
    pub fn classify(&self, raw_path: &str, raw_kind: &str) -> Option<FileChange> {
        self.classify_at(raw_path, raw_kind, Utc::now())
    }

    /// Classify a raw notification; `None` means ignore.
    pub fn classify_at(
        &self,
        raw_path: &str,
        raw_kind: &str,
        at: DateTime<Utc>,
    ) -> Option<FileChange> {
        let path = self.normalize(raw_path)?;
        if is_ignored(&path) {
            return None;
        }
        Some(FileChange::new(path, action_for(raw_kind), at))
    }

    /// Make `raw_path` relative to the project root. Paths outside the root
    /// cannot be expressed relative to it and are dropped.
    fn normalize(&self, raw_path: &str) -> Option<String> {
        let raw_path = raw_path.trim();
        let relative = if raw_path.starts_with('/') {
            if self.root.is_empty() {
                raw_path
            } else if raw_path == self.root {
                ""
            } else {
                raw_path.strip_prefix(&self.root)?.strip_prefix('/')?
            }
        } else {
            raw_path
        };

        let mut relative = relative;
        while let Some(rest) = relative.strip_prefix("./") {
            relative = rest;
        }
        let relative = relative.trim_start_matches('/').trim_end_matches('/');

        if relative.is_empty() || relative == "." {
            return None;
        }
        Some(relative.to_string())
    }
}

fn is_ignored(path: &str) -> bool {
    if IGNORED_SUFFIXES.iter().any(|s| path.ends_with(s)) {
        return true;
    }
    path.split('/')
        .any(|segment| segment.starts_with('.') || IGNORED_DIRS.contains(&segment))
}

/// Map a backend-specific event token onto a coarse action.
pub fn action_for(raw_kind: &str) -> ChangeAction {
    let kind = raw_kind.to_ascii_lowercase();
    if ["delete", "remove", "unlink", "moved_from"]
        .iter()
        .any(|t| kind.contains(t))
    {
        ChangeAction::Deleted
    } else if ["create", "add", "moved_to"].iter().any(|t| kind.contains(t)) {
        ChangeAction::Created
    } else {
        ChangeAction::Modified
    }
}
