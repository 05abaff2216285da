//! Pipeline orchestrator
//!
//! Drives one run through `Init -> Syncing -> Building -> Notifying -> Done`.
//! A failed sync skips straight to Notifying, as does a failed build, and so
//! does an unchanged checkout when `build.skip_unchanged` is set. Notify is
//! reached exactly once on every path, and its outcome never changes the run
//! status decided before it.

pub mod report;

pub use report::{PipelineState, RunReport, RunStatus};

use crate::build::excerpt::truncate_front;
use crate::build::{self, BuildBackend, BuildResult};
use crate::config::RunConfig;
use crate::error::NotifyError;
use crate::notify::{self, Notifier};
use crate::trigger::TriggerContext;
use crate::vcs::{self, VcsBackend};
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{error, info, warn};

/// Hooks for progress display. All methods default to no-ops.
pub trait PipelineObserver: Send + Sync {
    fn stage_started(&self, _state: PipelineState) {}

    fn stage_finished(&self, _state: PipelineState, _ok: bool, _summary: &str) {}
}

/// Observer that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// The three collaborators for one run
pub struct Pipeline {
    vcs: Box<dyn VcsBackend>,
    build: Box<dyn BuildBackend>,
    notifier: Box<dyn Notifier>,
    observer: Box<dyn PipelineObserver>,
}

impl Pipeline {
    pub fn new(
        vcs: Box<dyn VcsBackend>,
        build: Box<dyn BuildBackend>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        Self {
            vcs,
            build,
            notifier,
            observer: Box::new(NoopObserver),
        }
    }

    /// Backends selected by the configuration's kind discriminators
    pub fn from_config(config: &RunConfig) -> Result<Self, NotifyError> {
        Ok(Self::new(
            vcs::backend_for(config.vcs.kind, &config.env),
            build::backend_for(config.build.kind, &config.env),
            notify::backend_for(&config.notify)?,
        ))
    }

    pub fn with_observer(mut self, observer: Box<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Execute one run and return its finished report
    pub async fn run(&self, config: &RunConfig, trigger: TriggerContext) -> RunReport {
        let mut report = RunReport::new(trigger, config.vcs.reference.clone());
        info!(
            "Run started: {} @ {} ({})",
            config.vcs.url,
            config.vcs.reference,
            report.trigger().source()
        );

        match ensure_dir(&config.env.working_dir) {
            Ok(()) => self.sync_stage(config, &mut report).await,
            Err(reason) => abort(&mut report, reason),
        }

        let unchanged = report.sync().map(|s| !s.changed());
        match unchanged {
            Some(true) if config.build.skip_unchanged => skip_build(&mut report),
            Some(_) => match ensure_dir(&config.build.output_dir) {
                Ok(()) => self.build_stage(config, &mut report).await,
                Err(reason) => abort(&mut report, reason),
            },
            None => {}
        }

        self.notify_stage(&mut report).await;

        report.enter(PipelineState::Done);
        report.finish();
        info!(
            "Run finished: {} in {}",
            report.status(),
            report.duration_human().unwrap_or("-")
        );
        report
    }

    async fn sync_stage(&self, config: &RunConfig, report: &mut RunReport) {
        report.enter(PipelineState::Syncing);
        self.observer.stage_started(PipelineState::Syncing);
        info!("[sync] {} via {}", config.vcs.local_path.display(), self.vcs.name());

        match self.vcs.sync(&config.vcs).await {
            Ok(result) => {
                let summary = format!(
                    "{} at {} ({} new commits)",
                    config.vcs.reference,
                    &result.commit[..result.commit.len().min(7)],
                    result.commits.len()
                );
                info!("[sync] {}", summary);
                self.observer.stage_finished(PipelineState::Syncing, true, &summary);
                report.set_sync(result);
            }
            Err(e) => {
                error!("[sync] {}", e);
                self.observer
                    .stage_finished(PipelineState::Syncing, false, &e.to_string());
                report.set_sync_error(e.to_string());
                report.set_status(RunStatus::SyncFailed);
            }
        }
    }

    async fn build_stage(&self, config: &RunConfig, report: &mut RunReport) {
        report.enter(PipelineState::Building);
        self.observer.stage_started(PipelineState::Building);
        info!(
            "[build] {} ({}) via {}",
            config.build.project.display(),
            config.build.configuration,
            self.build.name()
        );

        let start = Instant::now();
        match self.build.build(&config.build).await {
            Ok(result) if result.success => {
                let summary = format!("built in {}ms", result.duration_ms);
                info!("[build] {}", summary);
                self.observer.stage_finished(PipelineState::Building, true, &summary);
                report.set_build(result);
                report.set_status(RunStatus::Succeeded);
            }
            Ok(mut result) => {
                warn!("[build] backend reported failure");
                result.error_excerpt = result
                    .error_excerpt
                    .map(|text| truncate_front(&text, config.build.error_tail_max_chars));
                self.observer
                    .stage_finished(PipelineState::Building, false, "build failed");
                report.set_build_error(format!(
                    "Build failed (exit code {})",
                    result
                        .exit_code
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "none".to_string())
                ));
                report.set_build(result);
                report.set_status(RunStatus::BuildFailed);
            }
            Err(e) => {
                error!("[build] {}", e);
                self.observer
                    .stage_finished(PipelineState::Building, false, &e.to_string());
                let elapsed = start.elapsed().as_millis() as u64;
                report.set_build(BuildResult::failed(
                    &e,
                    elapsed,
                    config.build.error_tail_max_chars,
                ));
                report.set_build_error(e.to_string());
                report.set_status(RunStatus::BuildFailed);
            }
        }
    }

    async fn notify_stage(&self, report: &mut RunReport) {
        report.enter(PipelineState::Notifying);
        self.observer.stage_started(PipelineState::Notifying);
        info!("[notify] {} via {}", report.status(), self.notifier.name());

        let result = self.notifier.send(report).await;
        let summary = if result.skipped {
            "skipped".to_string()
        } else if result.delivered {
            "delivered".to_string()
        } else {
            let reason = result.error.clone().unwrap_or_default();
            warn!("[notify] delivery failed, run status unchanged: {}", reason);
            format!("failed: {}", reason)
        };
        self.observer
            .stage_finished(PipelineState::Notifying, !result.failed_delivery(), &summary);
        report.set_notify(result);
    }
}

fn ensure_dir(path: &Path) -> Result<(), String> {
    fs::create_dir_all(path).map_err(|e| format!("Cannot create {}: {}", path.display(), e))
}

fn skip_build(report: &mut RunReport) {
    let reason = match report.sync() {
        Some(sync) => format!("no new commits at {}", &sync.commit[..sync.commit.len().min(7)]),
        None => "no new commits".to_string(),
    };
    info!("[build] skipped: {}", reason);
    report.set_build_skipped(reason);
    report.set_status(RunStatus::Succeeded);
}

fn abort(report: &mut RunReport, reason: String) {
    error!("Run aborted: {}", reason);
    report.set_abort_reason(reason);
    report.set_status(RunStatus::Aborted);
}
