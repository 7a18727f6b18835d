//! Hosting platform API consumed by the decision engine.
//!
//! Every call the engine makes goes through [`Collaborator`]. The daemon
//! backs it with the GitHub REST API; tests use [`crate::fakes`].

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{IssueEdit, IssueRef, Label, RepoRef};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("request failed: {0}")]
    Fetch(String),

    #[error("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl CollaboratorError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

pub type Result<T> = std::result::Result<T, CollaboratorError>;

/// Authenticated handle to the hosting platform.
///
/// Implementations own retry and timeout policy. Calls are independent and
/// may be issued concurrently from different events.
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Permission role of `username` on `repo` ("admin", "write", "read", "none", ...).
    async fn permission_level(&self, repo: &RepoRef, username: &str) -> Result<String>;

    async fn create_comment(&self, issue: &IssueRef, body: &str) -> Result<()>;

    /// Returns `NotFound` when the repository has no label with this name.
    async fn get_label(&self, repo: &RepoRef, name: &str) -> Result<Label>;

    /// Returns `AlreadyExists` when another writer created the label first.
    async fn create_label(&self, repo: &RepoRef, name: &str, color: &str) -> Result<Label>;

    async fn add_labels(&self, issue: &IssueRef, names: &[String]) -> Result<()>;

    async fn edit_issue(&self, issue: &IssueRef, edit: &IssueEdit) -> Result<()>;

    /// Contents of a file on the default branch, `None` when it does not exist.
    async fn repository_file(&self, repo: &RepoRef, path: &str) -> Result<Option<String>>;
}
