//! Git backend: network and mutating work through the `git` CLI
//!
//! Clone, fetch, checkout, reset, submodule and LFS commands shell out to
//! `git` so credentials helpers, SSH config and LFS filters behave exactly
//! as they do for a human. Inspection goes through [`walker`].

use super::walker::{self, Target};
use super::{DiffInfo, SyncResult, VcsBackend};
use crate::config::{EnvConfig, VcsConfig};
use crate::error::{ProcessError, VcsError};
use crate::process::{self, CommandSpec};
use crate::retry::{retry, RetryPolicy};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const GIT_PROGRAM: &str = "git";

/// Git CLI backend
#[derive(Debug, Clone)]
pub struct GitBackend {
    program: String,
    env_vars: BTreeMap<String, String>,
    working_dir: PathBuf,
}

impl GitBackend {
    pub fn new(env: &EnvConfig) -> Self {
        Self {
            program: GIT_PROGRAM.to_string(),
            env_vars: env.vars.clone(),
            working_dir: env.working_dir.clone(),
        }
    }

    fn command(&self, config: &VcsConfig, cwd: &Path, args: &[&str]) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.program, Duration::from_secs(config.timeout_secs))
            .args(args.iter().copied())
            .cwd(cwd)
            .envs(&self.env_vars)
            // Never block on an interactive credential prompt
            .env("GIT_TERMINAL_PROMPT", "0");

        if let Some(key) = &config.ssh_key {
            let null_dev = if cfg!(windows) { "NUL" } else { "/dev/null" };
            spec = spec.env(
                "GIT_SSH_COMMAND",
                format!(
                    "ssh -i '{}' -o StrictHostKeyChecking=no -o UserKnownHostsFile={} -o BatchMode=yes",
                    key.display(),
                    null_dev
                ),
            );
        }
        spec
    }

    /// Run one git command, mapping failures onto the VCS taxonomy
    async fn git(
        &self,
        config: &VcsConfig,
        operation: &str,
        cwd: &Path,
        args: &[&str],
    ) -> Result<String, VcsError> {
        let spec = self.command(config, cwd, args);
        info!("[git] {} (cwd={})", spec.display(), cwd.display());

        let output = process::run(&spec).await.map_err(|e| match e {
            ProcessError::NotFound { program } => {
                VcsError::NotFound(format!("git executable '{}'", program))
            }
            ProcessError::Timeout { secs, .. } => VcsError::Timeout {
                operation: operation.to_string(),
                secs,
            },
            other => VcsError::CommandFailed {
                operation: operation.to_string(),
                details: other.to_string(),
            },
        })?;

        if !output.success() {
            return Err(classify_failure(operation, &output.stderr));
        }
        Ok(output.stdout.trim().to_string())
    }

    /// Run a network-bound git command under the configured retry policy
    async fn git_network(
        &self,
        config: &VcsConfig,
        operation: &str,
        cwd: &Path,
        args: &[&str],
    ) -> Result<String, VcsError> {
        let policy = RetryPolicy::new(config.retries, config.retry_backoff_ms);
        retry(
            &format!("git {}", operation),
            policy,
            VcsError::is_retryable,
            || self.git(config, operation, cwd, args),
        )
        .await
    }

    async fn clone_fresh(&self, config: &VcsConfig) -> Result<(), VcsError> {
        let dest = &config.local_path;
        let parent = dest.parent().unwrap_or(self.working_dir.as_path());
        fs::create_dir_all(parent).map_err(|e| VcsError::CommandFailed {
            operation: "clone".to_string(),
            details: format!("Failed to create {}: {}", parent.display(), e),
        })?;

        let dest_str = dest.to_string_lossy();
        let result = self
            .git_network(config, "clone", parent, &["clone", config.url.as_str(), &*dest_str])
            .await;

        // A failed clone can leave a partial directory behind; a clone never
        // starts in a populated directory, so removing it loses nothing
        if result.is_err() && dest.exists() && walker::head_commit(dest).ok().flatten().is_none() {
            if let Err(e) = fs::remove_dir_all(dest) {
                warn!("Failed to remove partial clone at {}: {}", dest.display(), e);
            }
        }
        result.map(|_| ())
    }

    async fn checkout_target(&self, config: &VcsConfig, target: &Target) -> Result<(), VcsError> {
        let path = &config.local_path;
        match target {
            Target::RemoteBranch { name, .. } => {
                let remote = format!("origin/{}", name);
                self.git(config, "checkout", path, &["checkout", "-B", name.as_str(), remote.as_str()])
                    .await?;
                self.git(config, "reset", path, &["reset", "--hard", remote.as_str()])
                    .await?;
            }
            Target::Detached { oid } => {
                self.git(config, "checkout", path, &["checkout", "--detach", oid.as_str()])
                    .await?;
                self.git(config, "reset", path, &["reset", "--hard", oid.as_str()]).await?;
            }
        }
        Ok(())
    }

    async fn sync_submodules(&self, config: &VcsConfig) -> Result<(), VcsError> {
        let path = &config.local_path;
        self.git(config, "submodule sync", path, &["submodule", "sync", "--recursive"])
            .await?;
        self.git_network(
            config,
            "submodule update",
            path,
            &["submodule", "update", "--init", "--recursive"],
        )
        .await?;
        Ok(())
    }

    async fn pull_lfs(&self, config: &VcsConfig) -> Result<(), VcsError> {
        let path = &config.local_path;
        self.git(config, "lfs install", path, &["lfs", "install", "--local"])
            .await?;
        self.git_network(config, "lfs pull", path, &["lfs", "pull"]).await?;
        if config.submodules {
            self.git_network(
                config,
                "lfs pull (submodules)",
                path,
                &["submodule", "foreach", "--recursive", "git lfs pull"],
            )
            .await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl VcsBackend for GitBackend {
    async fn sync(&self, config: &VcsConfig) -> Result<SyncResult, VcsError> {
        let path = &config.local_path;
        let fresh_clone = !path.exists() || is_empty_dir(path);

        if !fresh_clone && !walker::is_repository(path) {
            return Err(VcsError::NotFound(format!(
                "{} exists but is not a git repository",
                path.display()
            )));
        }

        let (previous, submodules_before) = if fresh_clone {
            (None, BTreeMap::new())
        } else {
            let dirty = walker::dirty_paths(path).map_err(|e| inspect_failed("status", e))?;
            if !dirty.is_empty() {
                warn!(
                    "Refusing to reset {}: {} tracked paths modified",
                    path.display(),
                    dirty.len()
                );
                return Err(VcsError::DirtyWorkingTree {
                    path: path.clone(),
                    paths: dirty,
                });
            }
            let previous = walker::head_commit(path).map_err(|e| inspect_failed("rev-parse", e))?;
            let submodules = if config.submodules {
                walker::submodule_heads(path).map_err(|e| inspect_failed("submodule status", e))?
            } else {
                BTreeMap::new()
            };
            (previous, submodules)
        };

        if fresh_clone {
            info!("Cloning {} into {}", config.url, path.display());
            self.clone_fresh(config).await?;
        } else {
            info!("Fetching {} in {}", config.url, path.display());
            self.git_network(config, "fetch", path, &["fetch", "--prune", "origin"])
                .await?;
        }

        let target = walker::resolve_target(path, &config.reference)
            .map_err(|e| inspect_failed("rev-parse", e))?
            .ok_or_else(|| {
                VcsError::NotFound(format!("ref '{}' in {}", config.reference, config.url))
            })?;
        debug!("Resolved {} to {:?}", config.reference, target);

        self.checkout_target(config, &target).await?;

        let submodules = if config.submodules {
            self.sync_submodules(config).await?;
            let after = walker::submodule_heads(path).map_err(|e| inspect_failed("submodule status", e))?;
            walker::submodule_changes(&submodules_before, &after)
        } else {
            Vec::new()
        };

        if config.lfs {
            self.pull_lfs(config).await?;
        }

        let head = walker::head_commit(path)
            .map_err(|e| inspect_failed("rev-parse", e))?
            .ok_or_else(|| VcsError::NotFound(format!("HEAD commit in {}", path.display())))?;

        let diff = self.diff(config, previous.as_deref().unwrap_or(""), &head).await?;
        let result = SyncResult::from_diff(diff, fresh_clone, submodules);

        info!(
            "Synced {} to {} ({} new commits, {} authors)",
            path.display(),
            &result.commit[..result.commit.len().min(7)],
            result.commits.len(),
            result.authors.len()
        );
        Ok(result)
    }

    async fn diff(&self, config: &VcsConfig, local: &str, remote: &str) -> Result<DiffInfo, VcsError> {
        let known = |rev: &str| -> Result<bool, VcsError> {
            walker::resolve_commit(&config.local_path, rev)
                .map(|oid| oid.is_some())
                .map_err(|e| inspect_failed("rev-parse", e))
        };
        if !known(remote)? {
            return Err(VcsError::NotFound(format!("revision '{}' in {}", remote, config.local_path.display())));
        }
        let from = Some(local).filter(|l| !l.is_empty());
        if let Some(rev) = from {
            // Full hashes may name commits a force push removed
            let full_hash = rev.len() == 40 && rev.chars().all(|c| c.is_ascii_hexdigit());
            if !full_hash && !known(rev)? {
                return Err(VcsError::NotFound(format!("revision '{}' in {}", rev, config.local_path.display())));
            }
        }
        walker::commits_between(&config.local_path, from, remote).map_err(|e| inspect_failed("log", e))
    }

    fn name(&self) -> &str {
        "git"
    }
}

/// Map git's stderr onto the VCS error taxonomy
pub fn classify_failure(operation: &str, stderr: &str) -> VcsError {
    let lower = stderr.to_lowercase();
    let detail = stderr.trim().lines().last().unwrap_or("").to_string();

    if lower.contains("authentication failed")
        || lower.contains("permission denied")
        || lower.contains("could not read username")
        || lower.contains("could not read password")
        || lower.contains("403")
    {
        return VcsError::AuthFailure(detail);
    }

    if lower.contains("could not resolve host")
        || lower.contains("connection timed out")
        || lower.contains("connection refused")
        || lower.contains("connection reset")
        || lower.contains("network is unreachable")
        || lower.contains("early eof")
        || lower.contains("the remote end hung up")
        || lower.contains("rpc failed")
        || lower.contains("unable to access")
    {
        return VcsError::NetworkError(detail);
    }

    if lower.contains("repository not found")
        || lower.contains("does not appear to be a git repository")
        || lower.contains("couldn't find remote ref")
        || lower.contains("did not match any")
        || lower.contains("does not exist")
    {
        return VcsError::NotFound(detail);
    }

    VcsError::CommandFailed {
        operation: operation.to_string(),
        details: if detail.is_empty() {
            "git exited with a non-zero status".to_string()
        } else {
            detail
        },
    }
}

fn inspect_failed(operation: &str, err: anyhow::Error) -> VcsError {
    VcsError::CommandFailed {
        operation: operation.to_string(),
        details: format!("{:#}", err),
    }
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_auth_failure() {
        let stderr = "fatal: Authentication failed for 'https://example.com/repo.git/'";
        assert!(matches!(
            classify_failure("fetch", stderr),
            VcsError::AuthFailure(_)
        ));

        let ssh = "git@example.com: Permission denied (publickey).\nfatal: Could not read from remote repository.";
        assert!(matches!(classify_failure("fetch", ssh), VcsError::AuthFailure(_)));
    }

    #[test]
    fn test_classify_network_error() {
        let stderr = "fatal: unable to access 'https://example.com/repo.git/': Could not resolve host: example.com";
        let err = classify_failure("fetch", stderr);
        assert!(matches!(err, VcsError::NetworkError(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_not_found() {
        let stderr = "fatal: '/tmp/nope' does not appear to be a git repository\nfatal: Could not read from remote repository.";
        assert!(matches!(classify_failure("clone", stderr), VcsError::NotFound(_)));
    }

    #[test]
    fn test_classify_other() {
        let err = classify_failure("checkout", "error: pathspec conflict\n");
        assert_eq!(
            err,
            VcsError::CommandFailed {
                operation: "checkout".to_string(),
                details: "error: pathspec conflict".to_string(),
            }
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_ssh_key_sets_ssh_command() {
        let env = EnvConfig {
            working_dir: PathBuf::from("/w"),
            vars: BTreeMap::new(),
            ci: true,
        };
        let backend = GitBackend::new(&env);
        let config = VcsConfig {
            kind: crate::config::VcsKind::Git,
            url: "git@example.com:repo.git".to_string(),
            reference: "main".to_string(),
            local_path: PathBuf::from("/w/repo"),
            submodules: false,
            lfs: false,
            ssh_key: Some(PathBuf::from("/keys/id_ed25519")),
            timeout_secs: 30,
            retries: 0,
            retry_backoff_ms: 0,
        };
        let spec = backend.command(&config, Path::new("/w/repo"), &["fetch"]);
        let ssh = spec.env.get("GIT_SSH_COMMAND").unwrap();
        assert!(ssh.contains("-i '/keys/id_ed25519'"));
        assert_eq!(spec.env.get("GIT_TERMINAL_PROMPT").map(String::as_str), Some("0"));
    }
}
