//! `[env]` group: working directory, environment overrides, CI flag

use super::{paths, ParseContext};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

const GROUP: &str = "env";

/// Variables whose presence marks a CI-scheduled run
const CI_MARKERS: &[&str] = &["JENKINS_URL", "BUILD_NUMBER", "GITLAB_CI", "GITHUB_ACTIONS"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEnv {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ci: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vars: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    /// Absolute root for relative paths and external commands
    pub working_dir: PathBuf,
    /// Extra variables passed to every external process
    pub vars: BTreeMap<String, String>,
    /// Scheduled by a CI system rather than a human shell
    pub ci: bool,
}

impl EnvConfig {
    pub fn to_raw(&self) -> RawEnv {
        RawEnv {
            working_dir: Some(paths::display(&self.working_dir)),
            ci: Some(self.ci),
            vars: if self.vars.is_empty() {
                None
            } else {
                Some(self.vars.clone())
            },
        }
    }
}

pub(crate) fn parse_env(raw: &RawEnv, ctx: &ParseContext<'_>) -> Result<EnvConfig, Vec<ConfigError>> {
    let mut errors = Vec::new();

    if let Err(e) = ctx.require_existing(GROUP, "working_dir", &ctx.working_dir) {
        errors.push(e);
    }

    let vars = raw.vars.clone().unwrap_or_default();
    for key in vars.keys() {
        if key.is_empty() || key.contains('=') {
            errors.push(ConfigError::invalid(GROUP, "vars", key, "a variable name without '='"));
        }
    }

    let ci = raw.ci.unwrap_or_else(|| detect_ci(ctx));

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(EnvConfig {
        working_dir: ctx.working_dir.clone(),
        vars,
        ci,
    })
}

fn detect_ci(ctx: &ParseContext<'_>) -> bool {
    let explicit = ctx
        .ambient("CI")
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);
    explicit || CI_MARKERS.iter().any(|key| ctx.ambient(key).is_some())
}
