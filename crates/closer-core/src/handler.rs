//! The "pull request opened" event handler.
//!
//! Ties the pieces together: decode the event, resolve the repository
//! config, build the context, evaluate filters, and remediate on a match.
//! Handlers hold no per-event state and are shared across concurrent events.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info};

use crate::collaborator::{Collaborator, CollaboratorError};
use crate::config::{load_repository_config, CONFIG_FILE_NAME};
use crate::context::build_context;
use crate::filter::{self, Verdict};
use crate::remediate::{remediate, RemediationError, RemediationReport};
use crate::types::{EventError, PullRequestEvent, RepoRef};

pub const PULL_REQUEST_EVENT: &str = "pull_request";
pub const OPENED_ACTION: &str = "opened";

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Event(#[from] EventError),

    #[error("permission lookup for {login} on {repo} failed: {source}")]
    Permission {
        repo: RepoRef,
        login: String,
        #[source]
        source: CollaboratorError,
    },

    #[error(transparent)]
    Remediation(#[from] RemediationError),
}

/// What the handler did with an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// A filter did not match (or was invalid); the PR was left alone.
    NoAction {
        /// Index of the first filter that did not match.
        filter_index: usize,
        invalid_filter: bool,
    },
    Remediated { report: RemediationReport },
}

/// A handler bound to one `(event, action)` pair.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(
        &self,
        collaborator: &dyn Collaborator,
        payload: &Value,
    ) -> Result<Outcome, HandlerError>;
}

/// Closes PRs that match the repository's filters.
#[derive(Debug, Clone)]
pub struct PullRequestOpenedHandler {
    config_file: String,
}

impl Default for PullRequestOpenedHandler {
    fn default() -> Self {
        Self::new(CONFIG_FILE_NAME)
    }
}

impl PullRequestOpenedHandler {
    pub fn new(config_file: impl Into<String>) -> Self {
        Self {
            config_file: config_file.into(),
        }
    }
}

#[async_trait]
impl EventHandler for PullRequestOpenedHandler {
    async fn handle(
        &self,
        collaborator: &dyn Collaborator,
        payload: &Value,
    ) -> Result<Outcome, HandlerError> {
        let event = PullRequestEvent::from_payload(payload)?;
        info!(
            html_url = %event.html_url,
            author = %event.author.login,
            bot = event.author.is_bot(),
            head = %event.head.label,
            head_owner = event.head.owner.as_deref().unwrap_or("unknown"),
            base = %event.base.branch,
            config = %self.config_file,
            "inspecting pull request"
        );

        let config = load_repository_config(collaborator, &event.repo, &self.config_file).await;

        if config.close_all {
            info!(html_url = %event.html_url, "closeAll is set, skipping filters");
        } else {
            let context = build_context(collaborator, &event, payload)
                .await
                .map_err(|source| {
                    error!(
                        repo = %event.repo,
                        login = %event.author.login,
                        error = %source,
                        "permission lookup failed"
                    );
                    HandlerError::Permission {
                        repo: event.repo.clone(),
                        login: event.author.login.clone(),
                        source,
                    }
                })?;

            match filter::check(&context, &config.filters) {
                Verdict::Matched => {
                    info!(
                        html_url = %event.html_url,
                        "all {} filters matched",
                        config.filters.len()
                    );
                }
                Verdict::Rejected { index } => {
                    info!(
                        html_url = %event.html_url,
                        "no action, filter {} of {} did not match",
                        index + 1,
                        config.filters.len()
                    );
                    return Ok(Outcome::NoAction {
                        filter_index: index,
                        invalid_filter: false,
                    });
                }
                Verdict::Invalid { index, .. } => {
                    info!(
                        html_url = %event.html_url,
                        "no action, filter {} of {} is invalid",
                        index + 1,
                        config.filters.len()
                    );
                    return Ok(Outcome::NoAction {
                        filter_index: index,
                        invalid_filter: true,
                    });
                }
            }
        }

        let report = remediate(collaborator, &event, &config).await.map_err(|e| {
            error!(html_url = %event.html_url, error = %e, "remediation failed");
            e
        })?;
        info!(html_url = %event.html_url, "closed pull request");
        Ok(Outcome::Remediated { report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_COMMENT_BODY;
    use crate::fakes::{Call, FakeCollaborator, Operation};
    use crate::remediate::{LabelOutcome, LabelProvision};
    use crate::types::tests::release_branch_payload;
    use crate::types::IssueEdit;
    use serde_json::json;

    const CONFIG_PATH: &str = ".github/mistaken-pull-closer.yml";

    fn issue_calls(fake: &FakeCollaborator) -> Vec<Call> {
        fake.calls()
            .into_iter()
            .filter(|c| {
                !matches!(
                    c.operation(),
                    Operation::RepositoryFile | Operation::PermissionLevel
                )
            })
            .collect()
    }

    async fn handle(fake: &FakeCollaborator, payload: &Value) -> Result<Outcome, HandlerError> {
        PullRequestOpenedHandler::default().handle(fake, payload).await
    }

    #[tokio::test]
    async fn release_branch_pr_from_reader_is_closed() {
        let fake = FakeCollaborator::new().with_permission("read");
        let outcome = handle(&fake, &release_branch_payload()).await.unwrap();

        assert_eq!(
            outcome,
            Outcome::Remediated {
                report: RemediationReport {
                    commented: true,
                    label: LabelOutcome::Applied {
                        name: "invalid".to_string(),
                        provision: LabelProvision::Created,
                    },
                    closed: true,
                }
            }
        );

        let repo = RepoRef::new("atom", "atom");
        let issue = repo.issue(15445);
        assert_eq!(
            fake.calls(),
            vec![
                Call::RepositoryFile {
                    repo: repo.clone(),
                    path: CONFIG_PATH.to_string(),
                },
                Call::PermissionLevel {
                    repo: repo.clone(),
                    username: "octocat".to_string(),
                },
                Call::CreateComment {
                    issue: issue.clone(),
                    body: DEFAULT_COMMENT_BODY.to_string(),
                },
                Call::GetLabel {
                    repo: repo.clone(),
                    name: "invalid".to_string(),
                },
                Call::CreateLabel {
                    repo: repo.clone(),
                    name: "invalid".to_string(),
                    color: "e6e6e6".to_string(),
                },
                Call::AddLabels {
                    issue: issue.clone(),
                    labels: vec!["invalid".to_string()],
                },
                Call::EditIssue {
                    issue,
                    edit: IssueEdit::close(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn admin_and_writer_prs_are_left_alone() {
        for role in ["admin", "write"] {
            let fake = FakeCollaborator::new().with_permission(role);
            let outcome = handle(&fake, &release_branch_payload()).await.unwrap();

            assert_eq!(
                outcome,
                Outcome::NoAction {
                    filter_index: 2,
                    invalid_filter: false,
                }
            );
            assert!(issue_calls(&fake).is_empty(), "role {role}");
            assert_eq!(fake.count(Operation::PermissionLevel), 1);
        }
    }

    #[tokio::test]
    async fn pr_from_fork_is_left_alone_regardless_of_permission() {
        let mut payload = release_branch_payload();
        payload["pull_request"]["head"]["user"]["login"] = json!("octocat");
        payload["pull_request"]["head"]["label"] = json!("octocat:patch-1");

        for role in ["none", "read", "write", "admin"] {
            let fake = FakeCollaborator::new().with_permission(role);
            let outcome = handle(&fake, &payload).await.unwrap();
            assert!(matches!(outcome, Outcome::NoAction { filter_index: 0, .. }));
            assert!(issue_calls(&fake).is_empty());
        }
    }

    #[tokio::test]
    async fn custom_comment_without_label() {
        let fake = FakeCollaborator::new()
            .with_file(CONFIG_PATH, r#"{"commentBody": "custom", "addLabel": false}"#);

        handle(&fake, &release_branch_payload()).await.unwrap();

        let issue = RepoRef::new("atom", "atom").issue(15445);
        assert_eq!(
            issue_calls(&fake),
            vec![
                Call::CreateComment {
                    issue: issue.clone(),
                    body: "custom".to_string(),
                },
                Call::EditIssue {
                    issue,
                    edit: IssueEdit::close(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn configured_label_is_created_and_applied() {
        let fake = FakeCollaborator::new()
            .with_file(CONFIG_PATH, "labelName: test label\nlabelColor: c0ffee\n");

        handle(&fake, &release_branch_payload()).await.unwrap();

        assert!(fake.has_label("test label"));
        assert!(fake.calls().contains(&Call::CreateLabel {
            repo: RepoRef::new("atom", "atom"),
            name: "test label".to_string(),
            color: "c0ffee".to_string(),
        }));
        assert!(fake.calls().contains(&Call::AddLabels {
            issue: RepoRef::new("atom", "atom").issue(15445),
            labels: vec!["test label".to_string()],
        }));
    }

    #[tokio::test]
    async fn malformed_only_filter_fails_closed() {
        let fake = FakeCollaborator::new()
            .with_file(CONFIG_PATH, "filters:\n  - '@.pull_request =='\n");

        let outcome = handle(&fake, &release_branch_payload()).await.unwrap();

        assert_eq!(
            outcome,
            Outcome::NoAction {
                filter_index: 0,
                invalid_filter: true,
            }
        );
        assert!(issue_calls(&fake).is_empty());
    }

    #[tokio::test]
    async fn close_all_closes_admin_pr_without_permission_lookup() {
        let fake = FakeCollaborator::new()
            .with_permission("admin")
            .with_file(CONFIG_PATH, "closeAll: true\n");

        let outcome = handle(&fake, &release_branch_payload()).await.unwrap();

        assert!(matches!(outcome, Outcome::Remediated { .. }));
        assert_eq!(fake.count(Operation::PermissionLevel), 0);
        assert_eq!(fake.count(Operation::EditIssue), 1);
    }

    #[tokio::test]
    async fn permission_failure_takes_no_action() {
        let fake = FakeCollaborator::new().fail(
            Operation::PermissionLevel,
            CollaboratorError::Fetch("unreachable".to_string()),
        );

        let err = handle(&fake, &release_branch_payload()).await.unwrap_err();

        assert!(matches!(err, HandlerError::Permission { .. }));
        assert!(issue_calls(&fake).is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_makes_no_calls() {
        let fake = FakeCollaborator::new();
        let err = handle(&fake, &json!({ "action": "opened" })).await.unwrap_err();

        assert!(matches!(err, HandlerError::Event(_)));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn remediation_failure_is_surfaced() {
        let fake = FakeCollaborator::new().fail(
            Operation::EditIssue,
            CollaboratorError::Http {
                status: 403,
                message: "Resource not accessible by integration".to_string(),
            },
        );

        let err = handle(&fake, &release_branch_payload()).await.unwrap_err();
        assert!(matches!(
            err,
            HandlerError::Remediation(RemediationError::Close { .. })
        ));
    }
}
