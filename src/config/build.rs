//! `[build]` group: what to compile and with which toolchain

use super::{paths, ParseContext};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

const GROUP: &str = "build";

pub const DEFAULT_TIMEOUT_SECS: u64 = 1800;
pub const DEFAULT_ERROR_TAIL_LINES: usize = 30;
pub const DEFAULT_ERROR_TAIL_MAX_CHARS: usize = 4000;
const DEFAULT_OUTPUT_DIR: &str = "output";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildKind {
    /// C# solution or project
    Cs,
}

impl BuildKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cs" | "csharp" => Some(BuildKind::Cs),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildKind::Cs => "cs",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Configuration {
    Debug,
    Release,
}

impl Configuration {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(Configuration::Debug),
            "release" => Some(Configuration::Release),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Configuration::Debug => "Debug",
            Configuration::Release => "Release",
        }
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Toolchain {
    Msbuild,
    Dotnet,
}

impl Toolchain {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "msbuild" => Some(Toolchain::Msbuild),
            "dotnet" => Some(Toolchain::Dotnet),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Toolchain::Msbuild => "msbuild",
            Toolchain::Dotnet => "dotnet",
        }
    }

    /// Program name looked up on PATH when no explicit executable is given
    pub fn default_program(&self) -> &'static str {
        self.as_str()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawBuild {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toolchain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toolchain_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rebuild: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_tail_lines: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_tail_max_chars: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_unchanged: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    pub kind: BuildKind,
    /// Absolute path to the .sln/.csproj; relative input resolves inside the checkout
    pub project: PathBuf,
    pub configuration: Configuration,
    /// Absolute output directory; relative input resolves inside the working dir
    pub output_dir: PathBuf,
    pub toolchain: Toolchain,
    /// Explicit toolchain executable; `None` means look it up on PATH
    pub toolchain_path: Option<PathBuf>,
    pub restore: bool,
    pub rebuild: bool,
    pub timeout_secs: u64,
    /// Bound on diagnostic lines kept from a failed build
    pub error_tail_lines: usize,
    /// Bound on characters kept from a failed build
    pub error_tail_max_chars: usize,
    /// Skip the build when the sync brought no new commits
    pub skip_unchanged: bool,
}

impl BuildConfig {
    pub fn to_raw(&self) -> RawBuild {
        RawBuild {
            kind: Some(self.kind.as_str().to_string()),
            project: Some(paths::display(&self.project)),
            configuration: Some(self.configuration.as_str().to_string()),
            output_dir: Some(paths::display(&self.output_dir)),
            toolchain: Some(self.toolchain.as_str().to_string()),
            toolchain_path: self.toolchain_path.as_deref().map(paths::display),
            restore: Some(self.restore),
            rebuild: Some(self.rebuild),
            timeout_secs: Some(self.timeout_secs),
            error_tail_lines: Some(self.error_tail_lines),
            error_tail_max_chars: Some(self.error_tail_max_chars),
            skip_unchanged: Some(self.skip_unchanged),
        }
    }

    /// Executable to launch
    pub fn program(&self) -> String {
        match &self.toolchain_path {
            Some(path) => paths::display(path),
            None => self.toolchain.default_program().to_string(),
        }
    }
}

pub(crate) fn parse_build(raw: &RawBuild, ctx: &ParseContext<'_>) -> Result<BuildConfig, Vec<ConfigError>> {
    let mut errors = Vec::new();

    let kind = match raw.kind.as_deref() {
        None => Some(BuildKind::Cs),
        Some(value) => {
            let kind = BuildKind::parse(value);
            if kind.is_none() {
                errors.push(ConfigError::invalid(GROUP, "kind", value, "cs"));
            }
            kind
        }
    };

    let project = match raw.project.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(p) => Some(paths::resolve(&ctx.checkout_dir, p)),
        None => {
            errors.push(ConfigError::missing(GROUP, "project"));
            None
        }
    };

    let configuration = match raw.configuration.as_deref() {
        None => Some(Configuration::Release),
        Some(value) => {
            let parsed = Configuration::parse(value);
            if parsed.is_none() {
                errors.push(ConfigError::invalid(GROUP, "configuration", value, "Debug|Release"));
            }
            parsed
        }
    };

    let toolchain = match raw.toolchain.as_deref() {
        None => Some(Toolchain::Msbuild),
        Some(value) => {
            let parsed = Toolchain::parse(value);
            if parsed.is_none() {
                errors.push(ConfigError::invalid(GROUP, "toolchain", value, "msbuild|dotnet"));
            }
            parsed
        }
    };

    let output_dir = paths::resolve(
        &ctx.working_dir,
        raw.output_dir.as_deref().unwrap_or(DEFAULT_OUTPUT_DIR),
    );

    let toolchain_path = raw
        .toolchain_path
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .or_else(|| match toolchain {
            Some(Toolchain::Msbuild) => ctx.ambient("MSBUILD_PATH"),
            _ => None,
        })
        .map(|p| paths::resolve(ctx.base_dir, p));
    if let Some(path) = &toolchain_path {
        if let Err(e) = ctx.require_existing(GROUP, "toolchain_path", path) {
            errors.push(e);
        }
    }

    let timeout_secs = raw.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
    if timeout_secs == 0 {
        errors.push(ConfigError::invalid(GROUP, "timeout_secs", "0", "a positive number of seconds"));
    }
    let error_tail_lines = raw.error_tail_lines.unwrap_or(DEFAULT_ERROR_TAIL_LINES);
    if error_tail_lines == 0 {
        errors.push(ConfigError::invalid(GROUP, "error_tail_lines", "0", "at least 1"));
    }
    let error_tail_max_chars = raw.error_tail_max_chars.unwrap_or(DEFAULT_ERROR_TAIL_MAX_CHARS);
    if error_tail_max_chars == 0 {
        errors.push(ConfigError::invalid(GROUP, "error_tail_max_chars", "0", "at least 1"));
    }

    match (kind, project, configuration, toolchain) {
        (Some(kind), Some(project), Some(configuration), Some(toolchain)) if errors.is_empty() => {
            Ok(BuildConfig {
                kind,
                project,
                configuration,
                output_dir,
                toolchain,
                toolchain_path,
                restore: raw.restore.unwrap_or(true),
                rebuild: raw.rebuild.unwrap_or(true),
                timeout_secs,
                error_tail_lines,
                error_tail_max_chars,
                skip_unchanged: raw.skip_unchanged.unwrap_or(false),
            })
        }
        _ => Err(errors),
    }
}
