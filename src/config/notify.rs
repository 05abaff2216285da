//! `[notify]` group: where the outcome is reported

use super::ParseContext;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

const GROUP: &str = "notify";

pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;
pub const DEFAULT_MAX_COMMITS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyKind {
    /// IC chat push over HTTP
    Ic,
}

impl NotifyKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ic" => Some(NotifyKind::Ic),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyKind::Ic => "ic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "quiet" => Some(Verbosity::Quiet),
            "normal" => Some(Verbosity::Normal),
            "verbose" => Some(Verbosity::Verbose),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "quiet",
            Verbosity::Normal => "normal",
            Verbosity::Verbose => "verbose",
        }
    }
}

/// Who receives the message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyTarget {
    Group { room: String },
    User { account: String },
}

/// Everything needed to actually deliver a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcDelivery {
    pub endpoint: String,
    pub target: NotifyTarget,
    pub token: String,
    /// Mentioned in group messages when the run fails
    pub at_user: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawNotify {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_commits: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyConfig {
    pub kind: NotifyKind,
    pub enabled: bool,
    /// Present exactly when `enabled` is true
    pub delivery: Option<IcDelivery>,
    pub verbosity: Verbosity,
    /// Bound on commits listed in a message
    pub max_commits: usize,
    pub timeout_secs: u64,
    pub retries: u32,
    pub retry_backoff_ms: u64,
}

impl NotifyConfig {
    pub fn to_raw(&self) -> RawNotify {
        let mut raw = RawNotify {
            kind: Some(self.kind.as_str().to_string()),
            enabled: Some(self.enabled),
            verbosity: Some(self.verbosity.as_str().to_string()),
            max_commits: Some(self.max_commits),
            timeout_secs: Some(self.timeout_secs),
            retries: Some(self.retries),
            retry_backoff_ms: Some(self.retry_backoff_ms),
            ..Default::default()
        };
        if let Some(delivery) = &self.delivery {
            raw.endpoint = Some(delivery.endpoint.clone());
            raw.token = Some(delivery.token.clone());
            raw.at_user = delivery.at_user.clone();
            match &delivery.target {
                NotifyTarget::Group { room } => {
                    raw.target = Some("group".to_string());
                    raw.room = Some(room.clone());
                }
                NotifyTarget::User { account } => {
                    raw.target = Some("user".to_string());
                    raw.account = Some(account.clone());
                }
            }
        }
        raw
    }
}

pub(crate) fn parse_notify(
    raw: &RawNotify,
    ctx: &ParseContext<'_>,
) -> Result<NotifyConfig, Vec<ConfigError>> {
    let mut errors = Vec::new();

    let kind = match raw.kind.as_deref() {
        None => Some(NotifyKind::Ic),
        Some(value) => {
            let kind = NotifyKind::parse(value);
            if kind.is_none() {
                errors.push(ConfigError::invalid(GROUP, "kind", value, "ic"));
            }
            kind
        }
    };

    let verbosity = match raw.verbosity.as_deref() {
        None => Some(Verbosity::Normal),
        Some(value) => {
            let parsed = Verbosity::parse(value);
            if parsed.is_none() {
                errors.push(ConfigError::invalid(GROUP, "verbosity", value, "quiet|normal|verbose"));
            }
            parsed
        }
    };

    let enabled = raw.enabled.unwrap_or(true);
    let delivery = if enabled {
        parse_delivery(raw, ctx, &mut errors)
    } else {
        None
    };

    let max_commits = raw.max_commits.unwrap_or(DEFAULT_MAX_COMMITS);
    if max_commits == 0 {
        errors.push(ConfigError::invalid(GROUP, "max_commits", "0", "at least 1"));
    }
    let timeout_secs = raw.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
    if timeout_secs == 0 {
        errors.push(ConfigError::invalid(GROUP, "timeout_secs", "0", "a positive number of seconds"));
    }
    let retries = raw.retries.unwrap_or(DEFAULT_RETRIES);
    if retries > super::vcs::MAX_RETRIES {
        errors.push(ConfigError::invalid(
            GROUP,
            "retries",
            &retries.to_string(),
            &format!("at most {}", super::vcs::MAX_RETRIES),
        ));
    }

    match (kind, verbosity) {
        (Some(kind), Some(verbosity)) if errors.is_empty() => Ok(NotifyConfig {
            kind,
            enabled,
            delivery,
            verbosity,
            max_commits,
            timeout_secs,
            retries,
            retry_backoff_ms: raw.retry_backoff_ms.unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
        }),
        _ => Err(errors),
    }
}

fn parse_delivery(
    raw: &RawNotify,
    ctx: &ParseContext<'_>,
    errors: &mut Vec<ConfigError>,
) -> Option<IcDelivery> {
    let endpoint = match non_empty(raw.endpoint.as_deref()) {
        Some(url) => match reqwest::Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Some(url.to_string()),
            _ => {
                errors.push(ConfigError::invalid(GROUP, "endpoint", url, "an http(s) URL"));
                None
            }
        },
        None => {
            errors.push(ConfigError::missing(GROUP, "endpoint"));
            None
        }
    };

    let target = match non_empty(raw.target.as_deref()).map(str::to_ascii_lowercase).as_deref() {
        Some("group") | None => match non_empty(raw.room.as_deref()) {
            Some(room) => Some(NotifyTarget::Group {
                room: room.to_string(),
            }),
            None => {
                errors.push(ConfigError::missing(GROUP, "room"));
                None
            }
        },
        Some("user") | Some("single") => match non_empty(raw.account.as_deref()) {
            Some(account) => Some(NotifyTarget::User {
                account: account.to_string(),
            }),
            None => {
                errors.push(ConfigError::missing(GROUP, "account"));
                None
            }
        },
        Some(other) => {
            errors.push(ConfigError::invalid(GROUP, "target", other, "group|user"));
            None
        }
    };

    let token = non_empty(raw.token.as_deref())
        .or_else(|| ctx.ambient("IGGCHAT_TOKEN"))
        .map(str::to_string);
    if token.is_none() {
        errors.push(ConfigError::missing(GROUP, "token"));
    }

    match (endpoint, target, token) {
        (Some(endpoint), Some(target), Some(token)) => Some(IcDelivery {
            endpoint,
            target,
            token,
            at_user: non_empty(raw.at_user.as_deref()).map(str::to_string),
        }),
        _ => None,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
