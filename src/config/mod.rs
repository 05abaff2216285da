//! Run configuration: four loosely-typed argument groups in one TOML payload
//!
//! The payload has `[env]`, `[vcs]`, `[build]` and `[notify]` tables. Each
//! table deserializes into an all-optional raw struct and is then validated
//! by its own sub-parser into a typed section. A `RunConfig` only exists if
//! all four sub-parsers succeed.

pub mod build;
pub mod env;
pub mod notify;
pub mod paths;
pub mod vcs;

pub use build::{BuildConfig, BuildKind, Configuration, Toolchain};
pub use env::EnvConfig;
pub use notify::{IcDelivery, NotifyConfig, NotifyKind, NotifyTarget, Verbosity};
pub use vcs::{VcsConfig, VcsKind};

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Fully validated configuration for one run. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub env: EnvConfig,
    pub vcs: VcsConfig,
    pub build: BuildConfig,
    pub notify: NotifyConfig,
}

/// Caller-supplied inputs that keep `parse` free of hidden side effects
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Directory that relative paths resolve against
    pub base_dir: PathBuf,
    /// Check that required paths exist on disk
    pub check_paths: bool,
    /// Snapshot of process environment variables (CI detection, tool and token fallbacks)
    pub ambient_env: HashMap<String, String>,
}

impl ParseOptions {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    pub fn check_paths(mut self, check: bool) -> Self {
        self.check_paths = check;
        self
    }

    pub fn ambient_env(mut self, vars: HashMap<String, String>) -> Self {
        self.ambient_env = vars;
        self
    }
}

/// On-disk shape of the payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    #[serde(default)]
    pub env: env::RawEnv,
    #[serde(default)]
    pub vcs: vcs::RawVcs,
    #[serde(default)]
    pub build: build::RawBuild,
    #[serde(default)]
    pub notify: notify::RawNotify,
}

/// Shared, read-only state handed to every sub-parser
pub(crate) struct ParseContext<'a> {
    pub base_dir: &'a Path,
    pub working_dir: PathBuf,
    pub checkout_dir: PathBuf,
    pub check_paths: bool,
    ambient_env: &'a HashMap<String, String>,
}

impl<'a> ParseContext<'a> {
    fn new(raw: &RawConfig, options: &'a ParseOptions) -> Self {
        let base_dir = options.base_dir.as_path();
        let working_dir = match raw.env.working_dir.as_deref() {
            Some(dir) if !dir.trim().is_empty() => paths::resolve(base_dir, dir),
            _ => paths::normalize(base_dir),
        };
        let checkout_dir = match raw.vcs.local_path.as_deref() {
            Some(dir) if !dir.trim().is_empty() => paths::resolve(&working_dir, dir),
            _ => working_dir.clone(),
        };

        Self {
            base_dir,
            working_dir,
            checkout_dir,
            check_paths: options.check_paths,
            ambient_env: &options.ambient_env,
        }
    }

    /// Ambient variable, ignoring empty values
    pub fn ambient(&self, key: &str) -> Option<&str> {
        self.ambient_env
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn require_existing(&self, group: &str, field: &str, path: &Path) -> Result<(), ConfigError> {
        if self.check_paths && !path.exists() {
            return Err(ConfigError::PathNotFound {
                group: group.to_string(),
                field: field.to_string(),
                path: path.to_path_buf(),
            });
        }
        Ok(())
    }
}

/// Parse a TOML payload into a validated `RunConfig`.
///
/// Every group is validated even if an earlier one failed, so a single
/// error report covers the whole payload.
pub fn parse(raw: &str, options: &ParseOptions) -> Result<RunConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(raw).map_err(|e| ConfigError::Syntax(e.to_string()))?;
    from_raw(&raw, options)
}

/// Validate an already-deserialized payload
pub fn from_raw(raw: &RawConfig, options: &ParseOptions) -> Result<RunConfig, ConfigError> {
    if !options.base_dir.is_absolute() {
        return Err(ConfigError::RelativeBaseDir(options.base_dir.clone()));
    }
    let ctx = ParseContext::new(raw, options);

    let env = env::parse_env(&raw.env, &ctx);
    let vcs = vcs::parse_vcs(&raw.vcs, &ctx);
    let build = build::parse_build(&raw.build, &ctx);
    let notify = notify::parse_notify(&raw.notify, &ctx);

    match (env, vcs, build, notify) {
        (Ok(env), Ok(vcs), Ok(build), Ok(notify)) => Ok(RunConfig {
            env,
            vcs,
            build,
            notify,
        }),
        (env, vcs, build, notify) => {
            let errors: Vec<ConfigError> = [env.err(), vcs.err(), build.err(), notify.err()]
                .into_iter()
                .flatten()
                .flatten()
                .collect();
            Err(ConfigError::combine(errors)
                .unwrap_or_else(|| ConfigError::Syntax("unknown validation failure".to_string())))
        }
    }
}

impl RunConfig {
    /// Convert back to the on-disk shape with every default made explicit
    pub fn to_raw(&self) -> RawConfig {
        RawConfig {
            env: self.env.to_raw(),
            vcs: self.vcs.to_raw(),
            build: self.build.to_raw(),
            notify: self.notify.to_raw(),
        }
    }

    /// Serialize to TOML. Parsing the output yields an equal `RunConfig`.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(&self.to_raw()).map_err(|e| ConfigError::Syntax(e.to_string()))
    }

    /// Copy with secrets masked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if let Some(delivery) = copy.notify.delivery.as_mut() {
            delivery.token = "***".to_string();
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
[env]
working_dir = "/ci/work"

[vcs]
url = "git@example.com:game/client.git"
ref = "main"
local_path = "client"

[build]
project = "src/Client.sln"
configuration = "Release"

[notify]
endpoint = "https://chat.example.com/msg"
target = "group"
room = "builds"
token = "secret"
"#;

    fn options() -> ParseOptions {
        ParseOptions::new("/ci")
    }

    #[test]
    fn test_parse_valid_config() {
        let config = parse(VALID, &options()).unwrap();
        assert_eq!(config.env.working_dir, PathBuf::from("/ci/work"));
        assert_eq!(config.vcs.local_path, PathBuf::from("/ci/work/client"));
        assert_eq!(config.vcs.reference, "main");
        assert_eq!(
            config.build.project,
            PathBuf::from("/ci/work/client/src/Client.sln")
        );
        assert_eq!(config.build.configuration, Configuration::Release);
        assert!(config.notify.enabled);
    }

    #[test]
    fn test_syntax_error() {
        let err = parse("[vcs\nurl = 1", &options()).unwrap_err();
        assert!(matches!(err, ConfigError::Syntax(_)));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let payload = VALID.replace("ref = \"main\"", "ref = \"main\"\nbrnach = \"x\"");
        let err = parse(&payload, &options()).unwrap_err();
        assert!(matches!(err, ConfigError::Syntax(_)));
    }

    #[test]
    fn test_all_groups_reported() {
        let err = parse("", &options()).unwrap_err();
        match err {
            ConfigError::Multiple(errors) => {
                let text: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
                assert!(text.iter().any(|e| e.contains("vcs.url")));
                assert!(text.iter().any(|e| e.contains("build.project")));
                assert!(text.iter().any(|e| e.contains("notify.endpoint")));
            }
            other => panic!("expected Multiple, got {:?}", other),
        }
    }

    #[test]
    fn test_round_trip() {
        let config = parse(VALID, &options()).unwrap();
        let serialized = config.to_toml().unwrap();
        let reparsed = parse(&serialized, &ParseOptions::new("/elsewhere")).unwrap();
        assert_eq!(config, reparsed);
    }

    #[test]
    fn test_redacted_masks_token() {
        let config = parse(VALID, &options()).unwrap();
        let redacted = config.redacted();
        assert_eq!(redacted.notify.delivery.unwrap().token, "***");
        assert_eq!(config.notify.delivery.unwrap().token, "secret");
    }
}
