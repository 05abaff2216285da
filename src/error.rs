//! Error types for buildrelay
//!
//! One enum per failure category, matching the pipeline stages:
//! - Configuration (parse-time, fatal before any external effect)
//! - Version control (sync/diff against the checkout)
//! - Build (toolchain invocation)
//! - Notify (outbound delivery)
//! - Process (spawning and supervising external commands)

use std::io;
use std::path::PathBuf;
use thiserror::Error as ThisError;

/// Result type alias for buildrelay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for buildrelay
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("VCS error: {0}")]
    Vcs(#[from] VcsError),
    #[error("Build error: {0}")]
    Build(#[from] BuildError),
    #[error("Notify error: {0}")]
    Notify(#[from] NotifyError),
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration errors, raised while parsing the run payload
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ConfigError {
    /// Payload is not valid TOML or has the wrong shape
    #[error("Invalid config syntax: {0}")]
    Syntax(String),
    /// Required field absent from a group
    #[error("Missing required field '{group}.{field}'")]
    MissingField { group: String, field: String },
    /// Enum-like field holds an unrecognized value
    #[error("Invalid value '{value}' for '{group}.{field}' (expected {expected})")]
    InvalidValue {
        group: String,
        field: String,
        value: String,
        expected: String,
    },
    /// Path marked as required does not exist
    #[error("Path for '{group}.{field}' does not exist: {}", .path.display())]
    PathNotFound {
        group: String,
        field: String,
        path: PathBuf,
    },
    /// Payload file could not be read
    #[error("Cannot read config file {}: {reason}", .path.display())]
    Unreadable { path: PathBuf, reason: String },
    /// Relative paths need an absolute directory to resolve against
    #[error("Base directory must be absolute: {}", .0.display())]
    RelativeBaseDir(PathBuf),
    /// Several groups failed at once
    #[error("{} config errors: {}", .0.len(), join_errors(.0))]
    Multiple(Vec<ConfigError>),
}

/// Version control errors
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum VcsError {
    /// Repository, ref or local checkout could not be found
    #[error("Not found: {0}")]
    NotFound(String),
    /// Credentials rejected by the remote
    #[error("Authentication failed: {0}")]
    AuthFailure(String),
    /// Checkout has uncommitted changes to tracked files
    #[error("Working tree at {} has uncommitted changes ({} paths)", .path.display(), .paths.len())]
    DirtyWorkingTree { path: PathBuf, paths: Vec<String> },
    /// Transport-level failure talking to the remote
    #[error("Network error: {0}")]
    NetworkError(String),
    /// A git invocation exceeded its timeout
    #[error("Git operation '{operation}' timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },
    /// Any other non-zero git exit or repository inspection failure
    #[error("Git operation '{operation}' failed: {details}")]
    CommandFailed { operation: String, details: String },
}

/// Build errors
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum BuildError {
    /// Toolchain executable missing or not launchable
    #[error("Toolchain not found: {0}")]
    ToolchainNotFound(String),
    /// Toolchain ran and reported failure
    #[error("Compile failed (exit code {})", .exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()))]
    CompileFailed {
        exit_code: Option<i32>,
        excerpt: String,
    },
    /// Toolchain exceeded its timeout
    #[error("Build timed out after {secs}s")]
    Timeout { secs: u64, excerpt: String },
}

/// Notification delivery errors
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum NotifyError {
    /// Request never completed (connect, TLS, timeout)
    #[error("Transport failure: {0}")]
    TransportFailure(String),
    /// Endpoint answered with a non-success status
    #[error("Endpoint rejected message with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// External process errors
#[derive(Debug, ThisError)]
pub enum ProcessError {
    /// Executable not present on disk or PATH
    #[error("Executable '{program}' not found")]
    NotFound { program: String },
    /// Spawn failed for another reason
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    /// Process exceeded its timeout and was killed; `output` holds what it printed first
    #[error("'{program}' timed out after {secs}s")]
    Timeout {
        program: String,
        secs: u64,
        output: String,
    },
}

fn join_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ConfigError {
    pub(crate) fn missing(group: &str, field: &str) -> Self {
        ConfigError::MissingField {
            group: group.to_string(),
            field: field.to_string(),
        }
    }

    pub(crate) fn invalid(group: &str, field: &str, value: &str, expected: &str) -> Self {
        ConfigError::InvalidValue {
            group: group.to_string(),
            field: field.to_string(),
            value: value.to_string(),
            expected: expected.to_string(),
        }
    }

    /// Collapse a list of errors into one; `None` when the list is empty
    pub(crate) fn combine(mut errors: Vec<ConfigError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(ConfigError::Multiple(errors)),
        }
    }
}

impl VcsError {
    /// Only transport problems are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, VcsError::NetworkError(_) | VcsError::Timeout { .. })
    }
}

impl BuildError {
    /// Bounded diagnostic tail carried by the failure, empty when none
    pub fn excerpt(&self) -> &str {
        match self {
            BuildError::ToolchainNotFound(msg) => msg,
            BuildError::CompileFailed { excerpt, .. } | BuildError::Timeout { excerpt, .. } => {
                excerpt
            }
        }
    }
}

impl NotifyError {
    /// Server errors and transport problems are retried, client errors are not
    pub fn is_retryable(&self) -> bool {
        match self {
            NotifyError::TransportFailure(_) => true,
            NotifyError::Rejected { status, .. } => *status >= 500 || *status == 429,
        }
    }
}

impl Error {
    /// Check if error is fatal (aborts the run before any stage)
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Get formatted context string for logging
    pub fn context(&self) -> String {
        match self {
            Error::Config(e) => format!("config: {}", e),
            Error::Vcs(e) => format!("vcs: {}", e),
            Error::Build(e) => format!("build: {}", e),
            Error::Notify(e) => format!("notify: {}", e),
            Error::Process(e) => format!("process: {}", e),
            Error::Io(e) => format!("io: {}", e),
        }
    }
}
