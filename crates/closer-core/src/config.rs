//! Per-repository remediation configuration.
//!
//! Read from `.github/<file>` in the target repository. Keys use the
//! camelCase spelling of existing config files; snake_case is accepted too.
//! Fields present in the file override the defaults one by one; a missing or
//! unreadable file means the full default.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::collaborator::Collaborator;
use crate::types::RepoRef;

/// Config file name looked up under `.github/` in each repository.
pub const CONFIG_FILE_NAME: &str = "mistaken-pull-closer.yml";

pub const DEFAULT_LABEL_NAME: &str = "invalid";
pub const DEFAULT_LABEL_COLOR: &str = "e6e6e6";

/// Default filter set:
/// 1. the PR comes from a branch in the repository itself,
/// 2. the author is not a bot (bots are invited to open PRs),
/// 3. the author cannot push, so cannot update their own PR.
pub const DEFAULT_FILTERS: &[&str] = &[
    "@.pull_request.head.user.login == @.pull_request.base.user.login",
    "@.pull_request.user.type != \"Bot\"",
    "!@.has_push_access",
];

pub const DEFAULT_COMMENT_BODY: &str = "
Thanks for your submission.

It appears that you've created a pull request using one of our repository's branches. Since this is
almost always a mistake, we're going to go ahead and close this. If it was intentional, please
let us know what you were intending and we can see about reopening it.

Thanks again!
";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] serde_yaml::Error),
    #[error("config document must be a mapping")]
    NotAMapping,
}

/// What to do with the close step when labelling fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelFailurePolicy {
    /// Close anyway, then report the label failure.
    #[default]
    Continue,
    /// Report the label failure and leave the PR open.
    Abort,
}

impl LabelFailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Abort => "abort",
        }
    }
}

/// Filters and remediation settings for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RemediationConfig {
    /// Filter expressions, all of which must match.
    pub filters: Vec<String>,

    #[serde(alias = "comment_body")]
    pub comment_body: String,

    #[serde(alias = "add_label")]
    pub add_label: bool,

    #[serde(alias = "label_name")]
    pub label_name: String,

    /// Hex color without `#`, used only when the label has to be created.
    #[serde(alias = "label_color")]
    pub label_color: String,

    /// Skip filters and remediate every opened PR.
    #[serde(alias = "close_all")]
    pub close_all: bool,

    #[serde(alias = "on_label_failure")]
    pub on_label_failure: LabelFailurePolicy,
}

pub fn default_filters() -> Vec<String> {
    DEFAULT_FILTERS.iter().map(ToString::to_string).collect()
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            filters: default_filters(),
            comment_body: DEFAULT_COMMENT_BODY.to_string(),
            add_label: true,
            label_name: DEFAULT_LABEL_NAME.to_string(),
            label_color: DEFAULT_LABEL_COLOR.to_string(),
            close_all: false,
            on_label_failure: LabelFailurePolicy::Continue,
        }
    }
}

impl RemediationConfig {
    /// Parse a YAML (or JSON) document, merging present fields over defaults.
    ///
    /// An empty document or an explicit `null` yields the defaults.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let doc: serde_yaml::Value = serde_yaml::from_str(content)?;
        match doc {
            serde_yaml::Value::Null => Ok(Self::default()),
            serde_yaml::Value::Mapping(_) => Ok(serde_yaml::from_value(doc)?),
            _ => Err(ConfigError::NotAMapping),
        }
    }

    /// Load a config file from disk.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }
}

/// Resolve the config for `repo`, falling back to the defaults on any failure.
pub async fn load_repository_config(
    collaborator: &dyn Collaborator,
    repo: &RepoRef,
    file_name: &str,
) -> RemediationConfig {
    let path = format!(".github/{file_name}");

    match collaborator.repository_file(repo, &path).await {
        Ok(Some(content)) => match RemediationConfig::from_yaml(&content) {
            Ok(config) => {
                debug!(repo = %repo, path = %path, "loaded repository config");
                config
            }
            Err(e) => {
                warn!(
                    repo = %repo,
                    path = %path,
                    error = %e,
                    "invalid repository config, using defaults"
                );
                RemediationConfig::default()
            }
        },
        Ok(None) => {
            debug!(repo = %repo, path = %path, "no repository config, using defaults");
            RemediationConfig::default()
        }
        Err(e) => {
            warn!(
                repo = %repo,
                path = %path,
                error = %e,
                "failed to fetch repository config, using defaults"
            );
            RemediationConfig::default()
        }
    }
}
