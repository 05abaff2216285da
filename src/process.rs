//! Scoped external command execution
//!
//! Every child is spawned with stdin closed, stdout/stderr captured and a
//! hard timeout. `kill_on_drop` guarantees the child is reaped when the
//! timeout fires or the caller's future is dropped.

use crate::error::ProcessError;
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::debug;

type Captured = Arc<Mutex<Vec<u8>>>;

/// Description of one command invocation
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Printable command line for logs
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.contains(' ') {
                line.push('"');
                line.push_str(arg);
                line.push('"');
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// `None` when terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Run a command to completion or until its timeout expires
pub async fn run(spec: &CommandSpec) -> Result<ProcessOutput, ProcessError> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }

    debug!("Executing: {}", spec.display());

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ProcessError::NotFound {
            program: spec.program.clone(),
        },
        _ => ProcessError::Spawn {
            program: spec.program.clone(),
            source: e,
        },
    })?;

    // Output is drained as it arrives so a timeout still leaves the tail behind
    let (stdout, mut stdout_task) = capture(child.stdout.take());
    let (stderr, mut stderr_task) = capture(child.stderr.take());

    let finished = tokio::time::timeout(spec.timeout, async {
        let status = child.wait().await;
        let _ = tokio::join!(&mut stdout_task, &mut stderr_task);
        status
    })
    .await;

    let status = match finished {
        Ok(status) => status.map_err(|e| ProcessError::Spawn {
            program: spec.program.clone(),
            source: e,
        })?,
        Err(_) => {
            if let Err(e) = child.kill().await {
                debug!("Failed to kill {}: {}", spec.program, e);
            }
            stdout_task.abort();
            stderr_task.abort();
            let partial = ProcessOutput {
                exit_code: None,
                stdout: snapshot(&stdout),
                stderr: snapshot(&stderr),
                duration: start.elapsed(),
            };
            return Err(ProcessError::Timeout {
                program: spec.program.clone(),
                secs: spec.timeout.as_secs(),
                output: partial.combined(),
            });
        }
    };

    let duration = start.elapsed();
    debug!(
        "{} exited with {:?} after {}ms",
        spec.program,
        status.code(),
        duration.as_millis()
    );

    Ok(ProcessOutput {
        exit_code: status.code(),
        stdout: snapshot(&stdout),
        stderr: snapshot(&stderr),
        duration,
    })
}

fn capture<R>(reader: Option<R>) -> (Captured, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buffer = Captured::default();
    let sink = buffer.clone();
    let task = tokio::spawn(async move {
        let Some(mut reader) = reader else {
            return;
        };
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut sink) = sink.lock() {
                        sink.extend_from_slice(&chunk[..n]);
                    }
                }
            }
        }
    });
    (buffer, task)
}

fn snapshot(buffer: &Captured) -> String {
    buffer
        .lock()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}
