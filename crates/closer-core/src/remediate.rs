//! Remediation sequence for a mistaken pull request.
//!
//! Steps run strictly in order: comment, label (when enabled), close.
//! Nothing is rolled back; a step that fails is reported to the caller.

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::collaborator::{Collaborator, CollaboratorError};
use crate::config::{LabelFailurePolicy, RemediationConfig};
use crate::types::{IssueEdit, IssueRef, PullRequestEvent, RepoRef};

#[derive(Debug, Error)]
pub enum RemediationError {
    #[error("failed to comment on {issue}: {source}")]
    Comment {
        issue: IssueRef,
        #[source]
        source: CollaboratorError,
    },
    #[error("failed to label {issue} (closed: {closed}): {source}")]
    Label {
        issue: IssueRef,
        /// Whether the close step still ran.
        closed: bool,
        #[source]
        source: CollaboratorError,
    },
    #[error("failed to close {issue}: {source}")]
    Close {
        issue: IssueRef,
        #[source]
        source: CollaboratorError,
    },
    #[error("failed to label {issue} ({label}) and then to close it ({close})")]
    LabelAndClose {
        issue: IssueRef,
        label: CollaboratorError,
        close: CollaboratorError,
    },
}

/// How the label came to exist on the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelProvision {
    /// Lookup found it.
    Existing,
    /// Created here.
    Created,
    /// Lookup missed it but another writer created it first.
    CreatedConcurrently,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LabelOutcome {
    Skipped,
    Applied {
        name: String,
        provision: LabelProvision,
    },
}

/// Steps completed by a successful remediation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemediationReport {
    pub commented: bool,
    pub label: LabelOutcome,
    pub closed: bool,
}

/// Make sure a label exists, creating it when the lookup misses.
///
/// Any lookup failure counts as a miss. A creation that fails because the
/// label already exists is a success, so concurrent events can race here.
pub async fn ensure_label(
    collaborator: &dyn Collaborator,
    repo: &RepoRef,
    name: &str,
    color: &str,
) -> Result<LabelProvision, CollaboratorError> {
    if collaborator.get_label(repo, name).await.is_ok() {
        return Ok(LabelProvision::Existing);
    }

    match collaborator.create_label(repo, name, color).await {
        Ok(_) => {
            info!(repo = %repo, label = name, color, "created label");
            Ok(LabelProvision::Created)
        }
        Err(e) if e.is_already_exists() => Ok(LabelProvision::CreatedConcurrently),
        Err(e) => Err(e),
    }
}

/// Ensure the label exists and apply it to the issue.
pub async fn apply_label(
    collaborator: &dyn Collaborator,
    issue: &IssueRef,
    name: &str,
    color: &str,
) -> Result<LabelProvision, CollaboratorError> {
    let provision = ensure_label(collaborator, &issue.repo, name, color).await?;
    collaborator.add_labels(issue, &[name.to_string()]).await?;
    Ok(provision)
}

async fn close(
    collaborator: &dyn Collaborator,
    event: &PullRequestEvent,
) -> Result<(), CollaboratorError> {
    info!(html_url = %event.html_url, "closing pull request");
    collaborator
        .edit_issue(&event.issue(), &IssueEdit::close())
        .await
}

/// Comment on, label, and close the pull request.
pub async fn remediate(
    collaborator: &dyn Collaborator,
    event: &PullRequestEvent,
    config: &RemediationConfig,
) -> Result<RemediationReport, RemediationError> {
    let issue = event.issue();

    collaborator
        .create_comment(&issue, &config.comment_body)
        .await
        .map_err(|source| RemediationError::Comment {
            issue: issue.clone(),
            source,
        })?;

    let label = if config.add_label {
        match apply_label(collaborator, &issue, &config.label_name, &config.label_color).await {
            Ok(provision) => LabelOutcome::Applied {
                name: config.label_name.clone(),
                provision,
            },
            Err(source) => {
                return Err(match config.on_label_failure {
                    LabelFailurePolicy::Abort => {
                        warn!(
                            issue = %issue,
                            error = %source,
                            policy = config.on_label_failure.as_str(),
                            "labelling failed, leaving pull request open"
                        );
                        RemediationError::Label {
                            issue,
                            closed: false,
                            source,
                        }
                    }
                    LabelFailurePolicy::Continue => {
                        warn!(
                            issue = %issue,
                            error = %source,
                            policy = config.on_label_failure.as_str(),
                            "labelling failed, closing anyway"
                        );
                        if let Err(close_err) = close(collaborator, event).await {
                            error!(
                                issue = %issue,
                                label_error = %source,
                                close_error = %close_err,
                                "labelling and closing both failed"
                            );
                            RemediationError::LabelAndClose {
                                issue,
                                label: source,
                                close: close_err,
                            }
                        } else {
                            RemediationError::Label {
                                issue,
                                closed: true,
                                source,
                            }
                        }
                    }
                });
            }
        }
    } else {
        LabelOutcome::Skipped
    };

    close(collaborator, event)
        .await
        .map_err(|source| RemediationError::Close { issue, source })?;

    Ok(RemediationReport {
        commented: true,
        label,
        closed: true,
    })
}
