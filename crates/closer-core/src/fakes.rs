//! In-memory collaborator for tests.
//!
//! Records every call in order and serves scripted responses. Labels behave
//! like the real platform: creating one that exists fails with
//! `AlreadyExists`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::collaborator::{Collaborator, CollaboratorError, Result};
use crate::types::{IssueEdit, IssueRef, Label, RepoRef};

/// Collaborator operation, used to script failures and count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    PermissionLevel,
    CreateComment,
    GetLabel,
    CreateLabel,
    AddLabels,
    EditIssue,
    RepositoryFile,
}

/// A recorded collaborator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    PermissionLevel { repo: RepoRef, username: String },
    CreateComment { issue: IssueRef, body: String },
    GetLabel { repo: RepoRef, name: String },
    CreateLabel { repo: RepoRef, name: String, color: String },
    AddLabels { issue: IssueRef, labels: Vec<String> },
    EditIssue { issue: IssueRef, edit: IssueEdit },
    RepositoryFile { repo: RepoRef, path: String },
}

impl Call {
    pub fn operation(&self) -> Operation {
        match self {
            Self::PermissionLevel { .. } => Operation::PermissionLevel,
            Self::CreateComment { .. } => Operation::CreateComment,
            Self::GetLabel { .. } => Operation::GetLabel,
            Self::CreateLabel { .. } => Operation::CreateLabel,
            Self::AddLabels { .. } => Operation::AddLabels,
            Self::EditIssue { .. } => Operation::EditIssue,
            Self::RepositoryFile { .. } => Operation::RepositoryFile,
        }
    }
}

#[derive(Debug)]
struct FakeState {
    permission: String,
    labels: HashMap<String, Label>,
    files: HashMap<String, String>,
    failures: HashMap<Operation, CollaboratorError>,
    calls: Vec<Call>,
}

/// Recording collaborator that serves a single repository's worth of state.
#[derive(Debug)]
pub struct FakeCollaborator {
    state: Mutex<FakeState>,
}

impl Default for FakeCollaborator {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCollaborator {
    /// Author role "read", no labels, no files.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                permission: "read".to_string(),
                labels: HashMap::new(),
                files: HashMap::new(),
                failures: HashMap::new(),
                calls: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_permission(self, role: &str) -> Self {
        self.state().permission = role.to_string();
        self
    }

    pub fn with_label(self, name: &str, color: &str) -> Self {
        self.state().labels.insert(
            name.to_string(),
            Label {
                name: name.to_string(),
                color: color.to_string(),
            },
        );
        self
    }

    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.state()
            .files
            .insert(path.to_string(), content.to_string());
        self
    }

    /// Make every call to `operation` fail with `error`.
    pub fn fail(self, operation: Operation, error: CollaboratorError) -> Self {
        self.state().failures.insert(operation, error);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn count(&self, operation: Operation) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.operation() == operation)
            .count()
    }

    pub fn has_label(&self, name: &str) -> bool {
        self.state().labels.contains_key(name)
    }

    /// Record the call and return the scripted failure for it, if any.
    fn record(&self, call: Call) -> Result<()> {
        let mut state = self.state();
        let operation = call.operation();
        state.calls.push(call);
        match state.failures.get(&operation) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Collaborator for FakeCollaborator {
    async fn permission_level(&self, repo: &RepoRef, username: &str) -> Result<String> {
        self.record(Call::PermissionLevel {
            repo: repo.clone(),
            username: username.to_string(),
        })?;
        Ok(self.state().permission.clone())
    }

    async fn create_comment(&self, issue: &IssueRef, body: &str) -> Result<()> {
        self.record(Call::CreateComment {
            issue: issue.clone(),
            body: body.to_string(),
        })
    }

    async fn get_label(&self, repo: &RepoRef, name: &str) -> Result<Label> {
        self.record(Call::GetLabel {
            repo: repo.clone(),
            name: name.to_string(),
        })?;
        self.state()
            .labels
            .get(name)
            .cloned()
            .ok_or_else(|| CollaboratorError::NotFound(format!("label {name}")))
    }

    async fn create_label(&self, repo: &RepoRef, name: &str, color: &str) -> Result<Label> {
        self.record(Call::CreateLabel {
            repo: repo.clone(),
            name: name.to_string(),
            color: color.to_string(),
        })?;
        let mut state = self.state();
        if state.labels.contains_key(name) {
            return Err(CollaboratorError::AlreadyExists(format!("label {name}")));
        }
        let label = Label {
            name: name.to_string(),
            color: color.to_string(),
        };
        state.labels.insert(name.to_string(), label.clone());
        Ok(label)
    }

    async fn add_labels(&self, issue: &IssueRef, names: &[String]) -> Result<()> {
        self.record(Call::AddLabels {
            issue: issue.clone(),
            labels: names.to_vec(),
        })
    }

    async fn edit_issue(&self, issue: &IssueRef, edit: &IssueEdit) -> Result<()> {
        self.record(Call::EditIssue {
            issue: issue.clone(),
            edit: edit.clone(),
        })
    }

    async fn repository_file(&self, repo: &RepoRef, path: &str) -> Result<Option<String>> {
        self.record(Call::RepositoryFile {
            repo: repo.clone(),
            path: path.to_string(),
        })?;
        Ok(self.state().files.get(path).cloned())
    }
}
