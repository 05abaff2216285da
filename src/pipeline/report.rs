//! The run report: an append-only record of one run's outcome

use crate::build::BuildResult;
use crate::notify::NotifyResult;
use crate::trigger::TriggerContext;
use crate::vcs::SyncResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Process exit code for a payload that failed to parse
pub const EXIT_CONFIG_ERROR: i32 = 2;

/// Process exit code for a run that could not start or finish a stage
pub const EXIT_ABORTED: i32 = 5;

/// Final outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    BuildFailed,
    SyncFailed,
    /// A stage could not be started at all
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::BuildFailed => "build_failed",
            RunStatus::SyncFailed => "sync_failed",
            RunStatus::Aborted => "aborted",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Succeeded)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Init,
    Syncing,
    Building,
    Notifying,
    Done,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Init => "init",
            PipelineState::Syncing => "syncing",
            PipelineState::Building => "building",
            PipelineState::Notifying => "notifying",
            PipelineState::Done => "done",
        }
    }
}

/// Aggregate threaded through the pipeline.
///
/// Every stage field is write-once: a second write is ignored and logged, so
/// no stage can rewrite an earlier stage's result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    trigger: TriggerContext,
    #[serde(rename = "ref")]
    reference: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    states: Vec<PipelineState>,
    status: Option<RunStatus>,
    sync: Option<SyncResult>,
    sync_error: Option<String>,
    build: Option<BuildResult>,
    build_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    build_skipped: Option<String>,
    abort_reason: Option<String>,
    notify: Option<NotifyResult>,
    duration_human: Option<String>,
}

impl RunReport {
    pub fn new(trigger: TriggerContext, reference: impl Into<String>) -> Self {
        Self {
            trigger,
            reference: reference.into(),
            started_at: Utc::now(),
            finished_at: None,
            states: vec![PipelineState::Init],
            status: None,
            sync: None,
            sync_error: None,
            build: None,
            build_error: None,
            build_skipped: None,
            abort_reason: None,
            notify: None,
            duration_human: None,
        }
    }

    pub fn trigger(&self) -> &TriggerContext {
        &self.trigger
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// States visited so far, in order
    pub fn states(&self) -> &[PipelineState] {
        &self.states
    }

    pub fn state(&self) -> PipelineState {
        self.states.last().copied().unwrap_or(PipelineState::Init)
    }

    /// `Aborted` until a status has been recorded
    pub fn status(&self) -> RunStatus {
        self.status.unwrap_or(RunStatus::Aborted)
    }

    pub fn sync(&self) -> Option<&SyncResult> {
        self.sync.as_ref()
    }

    pub fn sync_error(&self) -> Option<&str> {
        self.sync_error.as_deref()
    }

    pub fn build(&self) -> Option<&BuildResult> {
        self.build.as_ref()
    }

    pub fn build_error(&self) -> Option<&str> {
        self.build_error.as_deref()
    }

    /// Why the build stage was skipped, if it was
    pub fn build_skipped(&self) -> Option<&str> {
        self.build_skipped.as_deref()
    }

    pub fn abort_reason(&self) -> Option<&str> {
        self.abort_reason.as_deref()
    }

    pub fn notify(&self) -> Option<&NotifyResult> {
        self.notify.as_ref()
    }

    pub fn duration_human(&self) -> Option<&str> {
        self.duration_human.as_deref()
    }

    /// Elapsed time so far, or total time once finished
    pub fn elapsed_ms(&self) -> i64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0)
    }

    /// One-line reason the run did not succeed
    pub fn failure_summary(&self) -> Option<&str> {
        match self.status {
            Some(RunStatus::SyncFailed) => self.sync_error.as_deref(),
            Some(RunStatus::BuildFailed) => self.build_error.as_deref(),
            Some(RunStatus::Aborted) | None => self.abort_reason.as_deref(),
            Some(RunStatus::Succeeded) => None,
        }
    }

    /// Process exit code for the calling CI system
    pub fn exit_code(&self) -> i32 {
        match self.status() {
            RunStatus::Succeeded => match &self.notify {
                Some(n) if n.failed_delivery() => 6,
                _ => 0,
            },
            RunStatus::SyncFailed => 3,
            RunStatus::BuildFailed => 4,
            RunStatus::Aborted => EXIT_ABORTED,
        }
    }

    pub(crate) fn enter(&mut self, state: PipelineState) {
        self.states.push(state);
    }

    pub(crate) fn set_status(&mut self, status: RunStatus) {
        set_once(&mut self.status, status, "status");
    }

    pub(crate) fn set_sync(&mut self, result: SyncResult) {
        set_once(&mut self.sync, result, "sync");
    }

    pub(crate) fn set_sync_error(&mut self, error: String) {
        set_once(&mut self.sync_error, error, "sync_error");
    }

    pub(crate) fn set_build(&mut self, result: BuildResult) {
        set_once(&mut self.build, result, "build");
    }

    pub(crate) fn set_build_error(&mut self, error: String) {
        set_once(&mut self.build_error, error, "build_error");
    }

    pub(crate) fn set_build_skipped(&mut self, reason: String) {
        set_once(&mut self.build_skipped, reason, "build_skipped");
    }

    pub(crate) fn set_abort_reason(&mut self, reason: String) {
        set_once(&mut self.abort_reason, reason, "abort_reason");
    }

    pub(crate) fn set_notify(&mut self, result: NotifyResult) {
        set_once(&mut self.notify, result, "notify");
    }

    pub(crate) fn finish(&mut self) {
        let now = Utc::now();
        set_once(&mut self.finished_at, now, "finished_at");
        let human = human_duration(self.elapsed_ms());
        set_once(&mut self.duration_human, human, "duration_human");
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, field: &str) {
    if slot.is_some() {
        warn!("Run report field '{}' already set, keeping the first value", field);
        return;
    }
    *slot = Some(value);
}

/// `4.2s`, `3m 05s`, `1h 02m 09s`
pub fn human_duration(ms: i64) -> String {
    let secs = ms / 1000;
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}
