//! Read-only repository inspection with git2
//!
//! Everything here opens the repository, reads, and closes it again:
//! - Current HEAD commit
//! - Dirty check for tracked files
//! - Target ref resolution after a fetch
//! - Commit range walking with diff statistics
//! - Submodule pointers

use super::{CommitInfo, DiffInfo, SubmoduleChange};
use anyhow::{Context, Result};
use git2::{Oid, Repository, Sort, StatusOptions};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Where the checkout should end up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// `origin/<name>` exists; check out a local branch tracking it
    RemoteBranch { name: String, oid: String },
    /// Tag or commit id; check out detached
    Detached { oid: String },
}

impl Target {
    pub fn oid(&self) -> &str {
        match self {
            Target::RemoteBranch { oid, .. } | Target::Detached { oid } => oid,
        }
    }
}

/// Whether `path` holds a repository git2 can open
pub fn is_repository(path: &Path) -> bool {
    Repository::open(path).is_ok()
}

/// Commit id HEAD points at, `None` for an unborn branch
pub fn head_commit(repo_path: &Path) -> Result<Option<String>> {
    let repo = open(repo_path)?;
    let head = match repo.head() {
        Ok(head) => head,
        Err(e) if e.code() == git2::ErrorCode::UnbornBranch => return Ok(None),
        Err(e) => return Err(e).context("Failed to read HEAD"),
    };
    let commit = head.peel_to_commit().context("HEAD does not point at a commit")?;
    Ok(Some(commit.id().to_string()))
}

/// Tracked paths with staged or unstaged modifications.
///
/// Untracked and ignored files are left out: a hard reset never touches
/// them. Submodule pointer drift is handled by the submodule update.
pub fn dirty_paths(repo_path: &Path) -> Result<Vec<String>> {
    let repo = open(repo_path)?;
    let mut options = StatusOptions::new();
    options
        .include_untracked(false)
        .include_ignored(false)
        .exclude_submodules(true);

    let statuses = repo
        .statuses(Some(&mut options))
        .context("Failed to read working tree status")?;

    Ok(statuses
        .iter()
        .filter(|entry| !entry.status().is_empty() && !entry.status().is_ignored())
        .filter_map(|entry| entry.path().map(str::to_string))
        .collect())
}

/// Resolve `reference` against freshly fetched refs
pub fn resolve_target(repo_path: &Path, reference: &str) -> Result<Option<Target>> {
    let repo = open(repo_path)?;

    let remote_ref = format!("refs/remotes/origin/{}", reference);
    if let Ok(found) = repo.find_reference(&remote_ref) {
        let commit = found
            .peel_to_commit()
            .with_context(|| format!("{} does not point at a commit", remote_ref))?;
        return Ok(Some(Target::RemoteBranch {
            name: reference.to_string(),
            oid: commit.id().to_string(),
        }));
    }

    let resolved = match repo.revparse_single(reference) {
        Ok(object) => {
            let commit = object
                .peel_to_commit()
                .with_context(|| format!("{} does not point at a commit", reference))?;
            Ok(Some(Target::Detached {
                oid: commit.id().to_string(),
            }))
        }
        Err(_) => Ok(None),
    };
    resolved
}

/// Walk commits reachable from `to` and not from `from`, oldest first.
///
/// With no `from` (fresh clone) there is no meaningful range: the result
/// carries no commits.
pub fn commits_between(repo_path: &Path, from: Option<&str>, to: &str) -> Result<DiffInfo> {
    let repo = open(repo_path)?;
    let to_oid = peel(&repo, to).with_context(|| format!("Unknown revision: {}", to))?;

    let mut info = DiffInfo {
        from: None,
        to: to_oid.to_string(),
        ..Default::default()
    };

    let from_oid = match from {
        // A commit dropped by a force push no longer resolves but is still a valid bound
        Some(rev) => match peel(&repo, rev) {
            Some(oid) => oid,
            None => Oid::from_str(rev).with_context(|| format!("Unknown revision: {}", rev))?,
        },
        None => return Ok(info),
    };
    info.from = Some(from_oid.to_string());
    if from_oid == to_oid {
        return Ok(info);
    }

    let mut revwalk = repo.revwalk().context("Failed to create revision walker")?;
    revwalk
        .set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)
        .context("Failed to set revwalk sorting")?;
    revwalk
        .push(to_oid)
        .with_context(|| format!("Failed to push commit {} to revwalk", to))?;
    // `from` may be unrelated to `to` after a force push; the walk then covers all of `to`
    if repo.find_commit(from_oid).is_ok() {
        revwalk
            .hide(from_oid)
            .with_context(|| format!("Failed to hide commit {} from revwalk", from_oid))?;
    }

    let mut authors = BTreeSet::new();
    for oid_result in revwalk {
        let oid = oid_result.context("Failed to get commit OID")?;
        let commit = repo
            .find_commit(oid)
            .with_context(|| format!("Failed to find commit {}", oid))?;
        let metadata = extract_commit_info(&commit);
        authors.insert(metadata.author.clone());
        info.commits.push(metadata);
    }
    info.authors = authors;

    // Range-wide statistics; zeros if `from` is not in this repository
    let (files_changed, insertions, deletions) =
        range_diff_stats(&repo, from_oid, to_oid).unwrap_or((0, 0, 0));
    info.files_changed = files_changed;
    info.insertions = insertions;
    info.deletions = deletions;

    Ok(info)
}

/// Commit recorded in the superproject for each submodule path
/// Full commit hash a revision (branch, tag, `HEAD~2`, hash) points at
pub fn resolve_commit(repo_path: &Path, revision: &str) -> Result<Option<String>> {
    let repo = open(repo_path)?;
    Ok(peel(&repo, revision).map(|oid| oid.to_string()))
}

pub fn submodule_heads(repo_path: &Path) -> Result<BTreeMap<String, Option<String>>> {
    let repo = open(repo_path)?;
    let submodules = repo.submodules().context("Failed to list submodules")?;
    Ok(submodules
        .iter()
        .map(|sm| {
            (
                sm.path().to_string_lossy().into_owned(),
                sm.head_id().map(|oid| oid.to_string()),
            )
        })
        .collect())
}

/// Submodule pointers that differ between two snapshots
pub fn submodule_changes(
    before: &BTreeMap<String, Option<String>>,
    after: &BTreeMap<String, Option<String>>,
) -> Vec<SubmoduleChange> {
    let paths: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    paths
        .into_iter()
        .filter_map(|path| {
            let from = before.get(path).cloned().flatten();
            let to = after.get(path).cloned().flatten();
            (from != to).then(|| SubmoduleChange {
                path: path.clone(),
                from,
                to,
            })
        })
        .collect()
}

fn open(repo_path: &Path) -> Result<Repository> {
    Repository::open(repo_path)
        .with_context(|| format!("Failed to open git repository at {}", repo_path.display()))
}

fn peel(repo: &Repository, revision: &str) -> Option<Oid> {
    let object = repo.revparse_single(revision).ok()?;
    object.peel_to_commit().ok().map(|commit| commit.id())
}

fn extract_commit_info(commit: &git2::Commit) -> CommitInfo {
    let id = commit.id().to_string();
    let short_id = commit
        .as_object()
        .short_id()
        .ok()
        .and_then(|buf| buf.as_str().map(str::to_string))
        .unwrap_or_else(|| id[..7].to_string());

    let author = commit.author();
    CommitInfo {
        id,
        short_id,
        author: author.name().unwrap_or("Unknown").to_string(),
        email: author.email().unwrap_or("unknown@example.com").to_string(),
        timestamp: author.when().seconds(),
        message: commit.summary().unwrap_or("").to_string(),
    }
}

fn range_diff_stats(repo: &Repository, from: Oid, to: Oid) -> Result<(u32, u32, u32)> {
    let old_tree = repo
        .find_commit(from)
        .context("Failed to find range start")?
        .tree()
        .context("Failed to get start tree")?;
    let new_tree = repo
        .find_commit(to)
        .context("Failed to find range end")?
        .tree()
        .context("Failed to get end tree")?;

    let diff = repo
        .diff_tree_to_tree(Some(&old_tree), Some(&new_tree), None)
        .context("Failed to create diff")?;
    let stats = diff.stats().context("Failed to calculate diff stats")?;

    Ok((
        stats.files_changed() as u32,
        stats.insertions() as u32,
        stats.deletions() as u32,
    ))
}
