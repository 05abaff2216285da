//! Who or what started the run, captured from the CI environment

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Snapshot of the CI variables that describe a run's origin
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerContext {
    pub build_user: Option<String>,
    pub build_user_id: Option<String>,
    pub build_url: Option<String>,
    pub build_number: Option<String>,
    pub job_url: Option<String>,
    pub node_name: Option<String>,
    pub build_note: Option<String>,
    /// Login name of a local (non-CI) invoker
    pub local_user: Option<String>,
    pub ci: bool,
}

impl TriggerContext {
    /// Read the Jenkins-style variables from an environment snapshot
    pub fn from_env(vars: &HashMap<String, String>, ci: bool) -> Self {
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            build_user: get("BUILD_USER"),
            build_user_id: get("BUILD_USER_ID"),
            build_url: get("BUILD_URL"),
            build_number: get("BUILD_NUMBER"),
            job_url: get("JOB_URL"),
            node_name: get("NODE_NAME"),
            build_note: get("BUILD_NOTE"),
            local_user: get("USER").or_else(|| get("USERNAME")),
            ci,
        }
    }

    /// Human-readable origin, e.g. `jenkins #42 by alice` or `local (bob)`
    pub fn source(&self) -> String {
        if !self.ci {
            return match &self.local_user {
                Some(user) => format!("local ({})", user),
                None => "local".to_string(),
            };
        }

        let mut source = "jenkins".to_string();
        if let Some(number) = &self.build_number {
            source.push_str(&format!(" #{}", number));
        }
        if let Some(user) = self.build_user.as_ref().or(self.build_user_id.as_ref()) {
            source.push_str(&format!(" by {}", user));
        }
        if let Some(note) = &self.build_note {
            source.push_str(&format!(" ({})", note));
        }
        source
    }

    /// Full console log of the CI build, when one exists
    pub fn console_url(&self) -> Option<String> {
        self.build_url
            .as_ref()
            .map(|url| format!("{}/consoleText", url.trim_end_matches('/')))
    }
}
