//! Core types shared by the decision engine and its collaborators.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Repository address (`owner/name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Address an issue or pull request in this repository.
    pub fn issue(&self, number: u64) -> IssueRef {
        IssueRef {
            repo: self.clone(),
            number,
        }
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Issue or pull request address. Pull requests share the issue number space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssueRef {
    pub repo: RepoRef,
    pub number: u64,
}

impl std::fmt::Display for IssueRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.repo, self.number)
    }
}

/// Repository label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub color: String,
}

/// Issue state as understood by the hosting platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueState {
    Open,
    Closed,
}


/// Partial update for an issue or pull request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueEdit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<IssueState>,
}

impl IssueEdit {
    pub fn close() -> Self {
        Self {
            state: Some(IssueState::Closed),
        }
    }
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("malformed pull request event: {0}")]
    Malformed(String),
}

/// Account that opened the pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub login: String,
    /// Account type as reported by the platform ("User", "Bot", "Organization").
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl Author {
    pub fn is_bot(&self) -> bool {
        self.kind == "Bot"
    }
}

/// One side of a pull request (head or base).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRef {
    /// `owner:branch` label.
    pub label: String,
    #[serde(rename = "ref", default)]
    pub branch: String,
    /// Login owning the repository this side lives in, if still present.
    #[serde(default)]
    pub owner: Option<String>,
}

/// The triggering "pull request opened" event, decoded from the webhook payload.
///
/// The raw payload stays the source of truth for filters; this is only the
/// subset needed to address collaborator calls and to log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequestEvent {
    pub repo: RepoRef,
    pub number: u64,
    pub author: Author,
    pub head: BranchRef,
    pub base: BranchRef,
    pub html_url: String,
}

#[derive(Deserialize)]
struct WireEvent {
    number: Option<u64>,
    pull_request: WirePullRequest,
    repository: Option<WireRepository>,
}

#[derive(Deserialize)]
struct WirePullRequest {
    number: Option<u64>,
    html_url: String,
    user: Author,
    head: WireBranch,
    base: WireBranch,
}

#[derive(Deserialize)]
struct WireBranch {
    label: String,
    #[serde(rename = "ref", default)]
    branch: String,
    user: Option<WireLogin>,
    repo: Option<WireRepository>,
}

#[derive(Deserialize)]
struct WireRepository {
    name: String,
    owner: WireLogin,
}

#[derive(Deserialize)]
struct WireLogin {
    login: String,
}

impl PullRequestEvent {
    /// Decode the addressing fields from a raw webhook payload.
    ///
    /// The repository comes from `repository`, falling back to the base
    /// side's repository for payloads that omit it.
    pub fn from_payload(payload: &Value) -> Result<Self, EventError> {
        if !payload.is_object() {
            return Err(EventError::Malformed("payload is not an object".to_string()));
        }

        let wire = WireEvent::deserialize(payload)
            .map_err(|e| EventError::Malformed(e.to_string()))?;
        let pr = wire.pull_request;

        let repository = wire
            .repository
            .or(pr.base.repo)
            .ok_or_else(|| EventError::Malformed("missing repository".to_string()))?;
        let number = wire
            .number
            .or(pr.number)
            .ok_or_else(|| EventError::Malformed("missing pull request number".to_string()))?;

        Ok(Self {
            repo: RepoRef::new(repository.owner.login, repository.name),
            number,
            author: pr.user,
            head: BranchRef {
                label: pr.head.label,
                branch: pr.head.branch,
                owner: pr.head.user.map(|u| u.login),
            },
            base: BranchRef {
                label: pr.base.label,
                branch: pr.base.branch,
                owner: pr.base.user.map(|u| u.login),
            },
            html_url: pr.html_url,
        })
    }

    /// The pull request as an issue address.
    pub fn issue(&self) -> IssueRef {
        self.repo.issue(self.number)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Pull request opened from `atom:2.0-releases` against `atom/atom`.
    pub(crate) fn release_branch_payload() -> Value {
        json!({
            "action": "opened",
            "number": 15445,
            "pull_request": {
                "number": 15445,
                "state": "open",
                "html_url": "https://github.com/atom/atom/pull/15445",
                "user": { "login": "octocat", "type": "User" },
                "head": {
                    "label": "atom:2.0-releases",
                    "ref": "2.0-releases",
                    "user": { "login": "atom", "type": "Organization" },
                    "repo": { "name": "atom", "owner": { "login": "atom" } }
                },
                "base": {
                    "label": "atom:master",
                    "ref": "master",
                    "user": { "login": "atom", "type": "Organization" },
                    "repo": { "name": "atom", "owner": { "login": "atom" } }
                }
            },
            "repository": {
                "name": "atom",
                "full_name": "atom/atom",
                "owner": { "login": "atom" }
            }
        })
    }

    #[test]
    fn decodes_release_branch_event() {
        let event = PullRequestEvent::from_payload(&release_branch_payload()).unwrap();
        assert_eq!(event.repo, RepoRef::new("atom", "atom"));
        assert_eq!(event.number, 15445);
        assert_eq!(event.author.login, "octocat");
        assert!(!event.author.is_bot());
        assert_eq!(event.head.label, "atom:2.0-releases");
        assert_eq!(event.head.owner.as_deref(), Some("atom"));
        assert_eq!(event.base.branch, "master");
        assert_eq!(event.issue().to_string(), "atom/atom#15445");
    }

    #[test]
    fn falls_back_to_base_repository_and_pr_number() {
        let mut payload = release_branch_payload();
        let map = payload.as_object_mut().unwrap();
        map.remove("repository");
        map.remove("number");

        let event = PullRequestEvent::from_payload(&payload).unwrap();
        assert_eq!(event.repo.to_string(), "atom/atom");
        assert_eq!(event.number, 15445);
    }

    #[test]
    fn rejects_payload_without_pull_request() {
        let err = PullRequestEvent::from_payload(&json!({ "action": "opened" })).unwrap_err();
        assert!(err.to_string().contains("pull_request"));
    }

    #[test]
    fn rejects_non_object_payload() {
        assert!(PullRequestEvent::from_payload(&json!([1, 2])).is_err());
    }

    #[test]
    fn issue_edit_close_serializes_state_only() {
        let body = serde_json::to_value(IssueEdit::close()).unwrap();
        assert_eq!(body, json!({ "state": "closed" }));
        assert_eq!(serde_json::to_value(IssueEdit::default()).unwrap(), json!({}));
    }
}
