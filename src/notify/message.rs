//! Message composition from a run report

use crate::config::{NotifyConfig, Verbosity};
use crate::pipeline::{report::human_duration, RunReport, RunStatus};
use serde::Serialize;

/// Knobs that shape a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageOptions {
    pub verbosity: Verbosity,
    /// Bound on listed commits
    pub max_commits: usize,
}

impl MessageOptions {
    pub fn from_config(config: &NotifyConfig) -> Self {
        Self {
            verbosity: config.verbosity,
            max_commits: config.max_commits,
        }
    }
}

impl Default for MessageOptions {
    fn default() -> Self {
        Self {
            verbosity: Verbosity::Normal,
            max_commits: crate::config::notify::DEFAULT_MAX_COMMITS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitLine {
    pub id: String,
    pub author: String,
    pub message: String,
}

/// Structured notification, independent of the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPayload {
    pub title: String,
    pub trigger: String,
    pub branch: String,
    pub status: RunStatus,
    /// Total commits in the synced range (may exceed `commits.len()`)
    pub commit_count: usize,
    /// Newest first, bounded
    pub commits: Vec<CommitLine>,
    pub authors: Vec<String>,
    /// Bounded build diagnostics; only on build failure
    pub error_excerpt: Option<String>,
    /// Why a sync failed or a run aborted
    pub failure: Option<String>,
    /// Why the build was skipped
    pub build_skipped: Option<String>,
    pub console_url: Option<String>,
    pub duration: Option<String>,
    /// Extra key/value lines at verbose level
    pub details: Vec<(String, String)>,
}

impl NotificationPayload {
    pub fn from_report(report: &RunReport, options: &MessageOptions) -> Self {
        let status = report.status();
        let sync = report.sync();

        let commits = sync
            .map(|s| {
                s.newest_commits(options.max_commits)
                    .into_iter()
                    .map(|c| CommitLine {
                        id: c.short_id.clone(),
                        author: c.author.clone(),
                        message: c.message.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let error_excerpt = match status {
            RunStatus::BuildFailed => report
                .build()
                .and_then(|b| b.error_excerpt.clone())
                .or_else(|| report.build_error().map(str::to_string)),
            _ => None,
        };

        let failure = match status {
            RunStatus::SyncFailed | RunStatus::Aborted => {
                report.failure_summary().map(str::to_string)
            }
            _ => None,
        };

        let console_url = if status.is_success() {
            None
        } else {
            report.trigger().console_url()
        };

        let duration = (options.verbosity >= Verbosity::Normal)
            .then(|| human_duration(report.elapsed_ms()));

        let details = if options.verbosity >= Verbosity::Verbose {
            verbose_details(report)
        } else {
            Vec::new()
        };

        Self {
            title: match report.build_skipped() {
                Some(_) => "Build Skipped".to_string(),
                None => title(status),
            },
            trigger: report.trigger().source(),
            branch: report.reference().to_string(),
            status,
            commit_count: sync.map(|s| s.commits.len()).unwrap_or(0),
            commits,
            authors: sync
                .map(|s| s.authors.iter().cloned().collect())
                .unwrap_or_default(),
            error_excerpt,
            failure,
            build_skipped: report.build_skipped().map(str::to_string),
            console_url,
            duration,
            details,
        }
    }

    /// Plain-text body
    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("[{}] {}", self.title, self.branch),
            format!("Trigger: {}", self.trigger),
            format!("Status: {}", self.status),
        ];

        if let Some(reason) = &self.build_skipped {
            lines.push(format!("Build: skipped ({})", reason));
        }
        if let Some(duration) = &self.duration {
            lines.push(format!("Duration: {}", duration));
        }

        if self.commit_count > 0 {
            if self.commit_count > self.commits.len() {
                lines.push(format!(
                    "Commits ({}, latest {}):",
                    self.commit_count,
                    self.commits.len()
                ));
            } else {
                lines.push(format!("Commits ({}):", self.commit_count));
            }
            for commit in &self.commits {
                lines.push(format!("  {} {}: {}", commit.id, commit.author, commit.message));
            }
        } else {
            lines.push("Commits (0)".to_string());
        }

        if !self.authors.is_empty() {
            lines.push(format!("Authors: {}", self.authors.join(", ")));
        }

        for (key, value) in &self.details {
            lines.push(format!("{}: {}", key, value));
        }

        if let Some(failure) = &self.failure {
            lines.push(format!("Error: {}", failure));
        }
        if let Some(excerpt) = &self.error_excerpt {
            lines.push("Error output:".to_string());
            lines.push(excerpt.clone());
        }
        if let Some(url) = &self.console_url {
            lines.push(format!("Console: {}", url));
        }

        lines.join("\n")
    }
}

fn title(status: RunStatus) -> String {
    match status {
        RunStatus::Succeeded => "Build Success",
        RunStatus::BuildFailed => "Build Failed",
        RunStatus::SyncFailed => "Sync Failed",
        RunStatus::Aborted => "Run Aborted",
    }
    .to_string()
}

fn verbose_details(report: &RunReport) -> Vec<(String, String)> {
    let mut details = Vec::new();
    let trigger = report.trigger();

    if let Some(sync) = report.sync() {
        details.push((
            "Changes".to_string(),
            format!(
                "{} files changed, +{} -{}",
                sync.files_changed, sync.insertions, sync.deletions
            ),
        ));
        if !sync.submodules.is_empty() {
            details.push(("Submodules updated".to_string(), sync.submodules.len().to_string()));
        }
    }
    if let Some(artifact) = report.build().and_then(|b| b.artifact.as_ref()) {
        details.push(("Artifact".to_string(), artifact.display().to_string()));
    }
    if let Some(node) = &trigger.node_name {
        details.push(("Node".to_string(), node.clone()));
    }
    if let Some(job) = &trigger.job_url {
        details.push(("Job".to_string(), job.clone()));
    }
    details
}
