//! Version control capability
//!
//! A backend syncs a local checkout to a target ref and answers "what
//! changed" between two commits. Git is the only backend; it is selected by
//! the `vcs.kind` discriminator in [`backend_for`].

pub mod git;
pub mod walker;

use crate::config::{EnvConfig, VcsConfig, VcsKind};
use crate::error::VcsError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub use git::GitBackend;

/// One commit in a synced range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Full commit id
    pub id: String,
    /// Abbreviated id (7 characters)
    pub short_id: String,
    /// Author name
    pub author: String,
    pub email: String,
    /// Author timestamp (Unix seconds)
    pub timestamp: i64,
    /// First line of the commit message
    pub message: String,
}

/// Read-only answer to "what changed between two commits"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffInfo {
    pub from: Option<String>,
    pub to: String,
    /// Oldest first
    pub commits: Vec<CommitInfo>,
    pub authors: BTreeSet<String>,
    pub files_changed: u32,
    pub insertions: u32,
    pub deletions: u32,
}

/// Submodule pointer that moved during a sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmoduleChange {
    pub path: String,
    pub from: Option<String>,
    pub to: Option<String>,
}

/// Outcome of a successful VCS stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    /// Commit the checkout now points at
    pub commit: String,
    /// Commit the checkout pointed at before the sync, `None` for a fresh clone
    pub previous: Option<String>,
    /// Commits between `previous` and `commit`, oldest first
    pub commits: Vec<CommitInfo>,
    pub authors: BTreeSet<String>,
    pub files_changed: u32,
    pub insertions: u32,
    pub deletions: u32,
    pub fresh_clone: bool,
    #[serde(default)]
    pub submodules: Vec<SubmoduleChange>,
}

impl SyncResult {
    pub fn from_diff(diff: DiffInfo, fresh_clone: bool, submodules: Vec<SubmoduleChange>) -> Self {
        Self {
            commit: diff.to,
            previous: diff.from,
            commits: diff.commits,
            authors: diff.authors,
            files_changed: diff.files_changed,
            insertions: diff.insertions,
            deletions: diff.deletions,
            fresh_clone,
            submodules,
        }
    }

    /// Whether the sync moved the checkout
    pub fn changed(&self) -> bool {
        self.previous.as_deref() != Some(self.commit.as_str())
    }

    /// Up to `limit` commits, newest first
    pub fn newest_commits(&self, limit: usize) -> Vec<&CommitInfo> {
        self.commits.iter().rev().take(limit).collect()
    }
}

/// Version control backend
#[async_trait::async_trait]
pub trait VcsBackend: Send + Sync {
    /// Bring the checkout at `config.local_path` to `config.reference`.
    ///
    /// Clones when the checkout is missing, fetches and hard-resets when it
    /// is clean, and refuses with `DirtyWorkingTree` when tracked files have
    /// uncommitted changes.
    async fn sync(&self, config: &VcsConfig) -> Result<SyncResult, VcsError>;

    /// Commits reachable from `remote` but not from `local`. Never mutates the checkout.
    async fn diff(&self, config: &VcsConfig, local: &str, remote: &str) -> Result<DiffInfo, VcsError>;

    /// Backend name (e.g., "git")
    fn name(&self) -> &str;
}

/// Select the backend named by the configuration
pub fn backend_for(kind: VcsKind, env: &EnvConfig) -> Box<dyn VcsBackend> {
    match kind {
        VcsKind::Git => Box::new(GitBackend::new(env)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(id: &str, author: &str) -> CommitInfo {
        CommitInfo {
            id: id.to_string(),
            short_id: id.chars().take(7).collect(),
            author: author.to_string(),
            email: format!("{}@example.com", author),
            timestamp: 0,
            message: format!("commit {}", id),
        }
    }

    #[test]
    fn test_newest_commits_bounded() {
        let result = SyncResult {
            commit: "c".to_string(),
            previous: Some("a".to_string()),
            commits: vec![commit("b", "alice"), commit("c", "bob"), commit("d", "carol")],
            authors: BTreeSet::new(),
            files_changed: 0,
            insertions: 0,
            deletions: 0,
            fresh_clone: false,
            submodules: vec![],
        };
        let newest: Vec<&str> = result.newest_commits(2).iter().map(|c| c.id.as_str()).collect();
        assert_eq!(newest, vec!["d", "c"]);
    }

    #[test]
    fn test_changed() {
        let diff = DiffInfo {
            from: Some("a".to_string()),
            to: "a".to_string(),
            ..Default::default()
        };
        assert!(!SyncResult::from_diff(diff, false, vec![]).changed());

        let fresh = DiffInfo {
            from: None,
            to: "a".to_string(),
            ..Default::default()
        };
        assert!(SyncResult::from_diff(fresh, true, vec![]).changed());
    }
}
