//! Build capability
//!
//! Supports C# solutions and projects via an external toolchain (MSBuild or
//! the dotnet CLI). Each build kind implements the BuildBackend trait and is
//! selected by the `build.kind` discriminator.

pub mod csharp;
pub mod excerpt;

use crate::config::{BuildConfig, BuildKind, EnvConfig};
use excerpt::truncate_front;
use crate::error::BuildError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use csharp::CsBuild;

/// Outcome of the build stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub success: bool,
    /// Wall-clock duration of the toolchain run
    pub duration_ms: u64,
    /// Primary output (only on success)
    pub artifact: Option<PathBuf>,
    /// Bounded diagnostic tail (only on failure)
    pub error_excerpt: Option<String>,
    pub exit_code: Option<i32>,
    /// Command line that was run, when one was started
    pub command: Option<String>,
}

impl BuildResult {
    pub fn succeeded(duration_ms: u64, artifact: PathBuf, command: String) -> Self {
        Self {
            success: true,
            duration_ms,
            artifact: Some(artifact),
            error_excerpt: None,
            exit_code: Some(0),
            command: Some(command),
        }
    }

    /// Failed result carrying the error's excerpt, cut to `max_chars`
    pub fn failed(error: &BuildError, duration_ms: u64, max_chars: usize) -> Self {
        let excerpt = match error.excerpt().trim() {
            "" => truncate_front(&error.to_string(), max_chars),
            text => truncate_front(text, max_chars),
        };
        let exit_code = match error {
            BuildError::CompileFailed { exit_code, .. } => *exit_code,
            _ => None,
        };
        Self {
            success: false,
            duration_ms,
            artifact: None,
            error_excerpt: Some(excerpt),
            exit_code,
            command: None,
        }
    }
}

/// Build backend
#[async_trait::async_trait]
pub trait BuildBackend: Send + Sync {
    /// Compile the configured project. Failures carry a bounded excerpt of
    /// the toolchain's diagnostics.
    async fn build(&self, config: &BuildConfig) -> Result<BuildResult, BuildError>;

    /// Backend name (e.g., "cs")
    fn name(&self) -> &str;
}

/// Select the backend named by the configuration
pub fn backend_for(kind: BuildKind, env: &EnvConfig) -> Box<dyn BuildBackend> {
    match kind {
        BuildKind::Cs => Box::new(CsBuild::new(env)),
    }
}
