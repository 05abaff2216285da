//! `[vcs]` group: where the source comes from and how to sync it

use super::{paths, ParseContext};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const GROUP: &str = "vcs";

pub const DEFAULT_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 1000;
pub(crate) const MAX_RETRIES: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VcsKind {
    Git,
}

impl VcsKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "git" => Some(VcsKind::Git),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VcsKind::Git => "git",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawVcs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submodules: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lfs: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcsConfig {
    pub kind: VcsKind,
    /// Remote URL (or local path) to clone from
    pub url: String,
    /// Branch, tag or commit to build
    pub reference: String,
    /// Absolute checkout location
    pub local_path: PathBuf,
    pub submodules: bool,
    pub lfs: bool,
    /// Private key for SSH remotes
    pub ssh_key: Option<PathBuf>,
    /// Per git invocation
    pub timeout_secs: u64,
    /// Extra attempts for network operations
    pub retries: u32,
    pub retry_backoff_ms: u64,
}

impl VcsConfig {
    pub fn to_raw(&self) -> RawVcs {
        RawVcs {
            kind: Some(self.kind.as_str().to_string()),
            url: Some(self.url.clone()),
            reference: Some(self.reference.clone()),
            local_path: Some(paths::display(&self.local_path)),
            submodules: Some(self.submodules),
            lfs: Some(self.lfs),
            ssh_key: self.ssh_key.as_deref().map(paths::display),
            timeout_secs: Some(self.timeout_secs),
            retries: Some(self.retries),
            retry_backoff_ms: Some(self.retry_backoff_ms),
        }
    }
}

pub(crate) fn parse_vcs(raw: &RawVcs, ctx: &ParseContext<'_>) -> Result<VcsConfig, Vec<ConfigError>> {
    let mut errors = Vec::new();

    let kind = match raw.kind.as_deref() {
        None => Some(VcsKind::Git),
        Some(value) => {
            let kind = VcsKind::parse(value);
            if kind.is_none() {
                errors.push(ConfigError::invalid(GROUP, "kind", value, "git"));
            }
            kind
        }
    };

    let url = required(raw.url.as_deref(), "url", &mut errors);
    let reference = required(raw.reference.as_deref(), "ref", &mut errors);
    let local_path = required(raw.local_path.as_deref(), "local_path", &mut errors)
        .map(|_| ctx.checkout_dir.clone());

    let ssh_key = raw
        .ssh_key
        .as_deref()
        .filter(|k| !k.trim().is_empty())
        .map(|k| paths::resolve(ctx.base_dir, k));
    if let Some(key) = &ssh_key {
        if let Err(e) = ctx.require_existing(GROUP, "ssh_key", key) {
            errors.push(e);
        }
    }

    let timeout_secs = raw.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
    if timeout_secs == 0 {
        errors.push(ConfigError::invalid(GROUP, "timeout_secs", "0", "a positive number of seconds"));
    }

    let retries = raw.retries.unwrap_or(DEFAULT_RETRIES);
    if retries > MAX_RETRIES {
        errors.push(ConfigError::invalid(
            GROUP,
            "retries",
            &retries.to_string(),
            &format!("at most {}", MAX_RETRIES),
        ));
    }

    match (kind, url, reference, local_path) {
        (Some(kind), Some(url), Some(reference), Some(local_path)) if errors.is_empty() => {
            Ok(VcsConfig {
                kind,
                url,
                reference,
                local_path,
                submodules: raw.submodules.unwrap_or(false),
                lfs: raw.lfs.unwrap_or(false),
                ssh_key,
                timeout_secs,
                retries,
                retry_backoff_ms: raw.retry_backoff_ms.unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
            })
        }
        _ => Err(errors),
    }
}

fn required(value: Option<&str>, field: &str, errors: &mut Vec<ConfigError>) -> Option<String> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => Some(v.to_string()),
        None => {
            errors.push(ConfigError::missing(GROUP, field));
            None
        }
    }
}
