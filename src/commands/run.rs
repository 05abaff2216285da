//! The single `buildrelay` command: load a payload, then check it or run it

use crate::config::{self, ParseOptions, RunConfig};
use crate::error::{ConfigError, Error};
use crate::pipeline::report::{EXIT_ABORTED, EXIT_CONFIG_ERROR};
use crate::pipeline::{Pipeline, PipelineObserver, PipelineState, RunReport, RunStatus};
use crate::trigger::TriggerContext;
use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error, info};

/// Where the payload comes from
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// TOML file; relative paths resolve against its directory
    File(PathBuf),
    /// TOML string; relative paths resolve against the current directory
    Inline(String),
}

/// Read and validate the payload
pub fn load_config(
    source: &ConfigSource,
    cwd: &Path,
    ambient_env: HashMap<String, String>,
) -> Result<RunConfig> {
    let (raw, base_dir) = match source {
        ConfigSource::File(path) => {
            let path = config::paths::resolve(cwd, &path.to_string_lossy());
            let raw = fs::read_to_string(&path).map_err(|e| {
                Error::Config(ConfigError::Unreadable {
                    path: path.clone(),
                    reason: e.to_string(),
                })
            })?;
            let base = path.parent().map(Path::to_path_buf).unwrap_or_else(|| cwd.to_path_buf());
            (raw, base)
        }
        ConfigSource::Inline(raw) => (raw.clone(), cwd.to_path_buf()),
    };

    let options = ParseOptions::new(base_dir)
        .check_paths(true)
        .ambient_env(ambient_env);
    let config = config::parse(&raw, &options)
        .map_err(Error::from)
        .context("Invalid run configuration")?;
    Ok(config)
}

/// Snapshot of the process environment; variables that are not valid UTF-8 are left out
pub fn collect_ambient<I>(vars: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut skipped = 0;
    let mut ambient = HashMap::new();
    for (key, value) in vars {
        match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => {
                ambient.insert(key, value);
            }
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!("Ignored {} environment variables that are not valid UTF-8", skipped);
    }
    ambient
}

/// Exit code for a failure that ended the process before a report existed
pub fn failure_exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<Error>() {
        Some(e) if e.is_fatal() => EXIT_CONFIG_ERROR,
        Some(e) => {
            debug!("Run could not start ({})", e.context());
            EXIT_ABORTED
        }
        None => EXIT_ABORTED,
    }
}

/// `--check`: print the normalized payload with secrets masked
pub fn check_command(config: &RunConfig) -> Result<()> {
    let toml = config.redacted().to_toml()?;
    println!("{}", toml.trim_end());
    println!();
    println!("{} configuration is valid", "✓".green());
    Ok(())
}

/// Execute one run; returns the process exit code
pub async fn run_command(
    config: &RunConfig,
    ambient_env: &HashMap<String, String>,
    report_path: Option<&Path>,
    show_progress: bool,
) -> Result<i32> {
    let trigger = TriggerContext::from_env(ambient_env, config.env.ci);
    let mut pipeline = Pipeline::from_config(config)
        .map_err(Error::from)
        .context("Failed to set up notifier")?;
    if show_progress && !config.env.ci {
        pipeline = pipeline.with_observer(Box::new(SpinnerObserver::default()));
    }

    let report = pipeline.run(config, trigger).await;

    // The run already happened; a report write failure must not hide its status
    if let Some(path) = report_path {
        match write_report(&report, path) {
            Ok(()) => info!("Report written to {}", path.display()),
            Err(e) => error!("{:#}", e),
        }
    }

    print_summary(&report);
    Ok(report.exit_code())
}

/// Write the report as pretty JSON
pub fn write_report(report: &RunReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, json).with_context(|| format!("Failed to write report to {}", path.display()))
}

/// One coloured line describing the run
pub fn summary_line(report: &RunReport) -> String {
    let commit = report
        .sync()
        .map(|s| format!(" @ {}", &s.commit[..s.commit.len().min(7)]))
        .unwrap_or_default();
    let commits = report
        .sync()
        .map(|s| format!(", {} commits", s.commits.len()))
        .unwrap_or_default();
    let notify = match report.notify() {
        Some(n) if n.skipped => "notify skipped",
        Some(n) if n.delivered => "notify delivered",
        Some(_) => "notify FAILED",
        None => "notify not reached",
    };

    let text = format!(
        "{} {}{} in {} ({}{})",
        report.status(),
        report.reference(),
        commit,
        report.duration_human().unwrap_or("-"),
        notify,
        commits
    );

    match report.status() {
        RunStatus::Succeeded if report.exit_code() == 0 => format!("{} {}", "✓".green(), text.green()),
        RunStatus::Succeeded => format!("{} {}", "!".yellow(), text.yellow()),
        _ => {
            let reason = report.failure_summary().unwrap_or("");
            format!("{} {} {}", "✗".red(), text.red(), reason)
        }
    }
}

fn print_summary(report: &RunReport) {
    println!("{}", summary_line(report).trim_end());
}

/// Spinner per stage for interactive shells
#[derive(Default)]
pub struct SpinnerObserver {
    current: Mutex<Option<ProgressBar>>,
}

impl PipelineObserver for SpinnerObserver {
    fn stage_started(&self, state: PipelineState) {
        let pb = spinner(&format!("{}...", stage_label(state)));
        if let Ok(mut slot) = self.current.lock() {
            if let Some(previous) = slot.replace(pb) {
                previous.finish_and_clear();
            }
        }
    }

    fn stage_finished(&self, state: PipelineState, ok: bool, summary: &str) {
        let Ok(mut slot) = self.current.lock() else {
            return;
        };
        if let Some(pb) = slot.take() {
            let mark = if ok { "✓".green() } else { "✗".red() };
            pb.finish_with_message(format!("{} {}: {}", mark, stage_label(state), summary));
        }
    }
}

fn stage_label(state: PipelineState) -> &'static str {
    match state {
        PipelineState::Syncing => "Sync",
        PipelineState::Building => "Build",
        PipelineState::Notifying => "Notify",
        PipelineState::Init => "Init",
        PipelineState::Done => "Done",
    }
}

/// Create a spinner-style progress bar
fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PAYLOAD: &str = r#"
[vcs]
url = "https://example.com/game.git"
ref = "main"
local_path = "src"

[build]
project = "Game.sln"

[notify]
endpoint = "https://chat.example.com/msg"
room = "builds"
"#;

    #[test]
    fn test_file_config_resolves_against_its_directory() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("relay.toml");
        fs::write(&file, PAYLOAD).unwrap();

        let mut ambient = HashMap::new();
        ambient.insert("IGGCHAT_TOKEN".to_string(), "tok".to_string());
        let config = load_config(&ConfigSource::File(file), Path::new("/elsewhere"), ambient).unwrap();
        assert_eq!(config.env.working_dir, temp.path());
        assert_eq!(config.vcs.local_path, temp.path().join("src"));
        assert_eq!(config.notify.delivery.unwrap().token, "tok");
    }

    #[test]
    fn test_inline_config_missing_token() {
        let temp = TempDir::new().unwrap();
        let err = load_config(
            &ConfigSource::Inline(PAYLOAD.to_string()),
            temp.path(),
            HashMap::new(),
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("notify.token"));
    }

    #[test]
    fn test_missing_file() {
        let temp = TempDir::new().unwrap();
        let err = load_config(
            &ConfigSource::File(PathBuf::from("nope.toml")),
            temp.path(),
            HashMap::new(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("Cannot read config file"));
        assert_eq!(failure_exit_code(&err), EXIT_CONFIG_ERROR);
    }

    #[test]
    fn test_setup_failure_exits_as_aborted() {
        let invalid = load_config(&ConfigSource::Inline(PAYLOAD.to_string()), Path::new("/w"), HashMap::new())
            .unwrap_err();
        assert_eq!(failure_exit_code(&invalid), EXIT_CONFIG_ERROR);

        let setup = anyhow::Error::from(Error::Notify(crate::error::NotifyError::TransportFailure(
            "TLS backend unavailable".to_string(),
        )))
        .context("Failed to set up notifier");
        assert_eq!(failure_exit_code(&setup), EXIT_ABORTED);

        assert_eq!(failure_exit_code(&anyhow::anyhow!("unexpected")), EXIT_ABORTED);
    }

    #[test]
    fn test_collect_ambient_keeps_utf8_pairs() {
        let vars = vec![
            (OsString::from("CI"), OsString::from("true")),
            (OsString::from("BUILD_NUMBER"), OsString::from("42")),
        ];
        let ambient = collect_ambient(vars);
        assert_eq!(ambient.len(), 2);
        assert_eq!(ambient.get("BUILD_NUMBER").map(String::as_str), Some("42"));
    }

    #[cfg(unix)]
    #[test]
    fn test_collect_ambient_skips_non_utf8() {
        use std::os::unix::ffi::OsStringExt;

        let vars = vec![
            (OsString::from("JENKINS_URL"), OsString::from("https://ci/")),
            (OsString::from("LEGACY_PATH"), OsString::from_vec(vec![b'/', 0xff, 0xfe])),
            (OsString::from_vec(vec![0xff]), OsString::from("x")),
        ];
        let ambient = collect_ambient(vars);
        assert_eq!(ambient.len(), 1);
        assert!(ambient.contains_key("JENKINS_URL"));
    }

    #[test]
    fn test_write_report_json() {
        let temp = TempDir::new().unwrap();
        let report = RunReport::new(TriggerContext::default(), "main");
        let path = temp.path().join("out/report.json");
        write_report(&report, &path).unwrap();

        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["ref"], "main");
    }

    #[test]
    fn test_summary_line_names_status() {
        colored::control::set_override(false);
        let report = RunReport::new(TriggerContext::default(), "main");
        let line = summary_line(&report);
        assert!(line.starts_with("✗ aborted main"));
        assert!(line.contains("notify not reached"));
    }
}
