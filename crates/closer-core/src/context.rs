//! Evaluation context construction.
//!
//! The context is the raw event payload plus the derived `has_push_access`
//! fact. The permission lookup behind that fact is the only network call made
//! before deciding, and it happens exactly once per event.

use serde_json::Value;
use tracing::debug;

use crate::collaborator::{Collaborator, CollaboratorError};
use crate::types::{EventError, PullRequestEvent};

/// Name of the synthetic top-level field holding the push-access fact.
pub const HAS_PUSH_ACCESS: &str = "has_push_access";

/// Permission roles that can push to the repository's branches.
pub const PUSH_ROLES: &[&str] = &["admin", "write"];

/// Read-only view of an event handed to filters.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationContext(Value);

impl EvaluationContext {
    /// Build a context from a payload and an already computed fact.
    ///
    /// A payload field named `has_push_access` is overwritten.
    pub fn from_payload(payload: &Value, has_push_access: bool) -> Result<Self, EventError> {
        let Value::Object(map) = payload else {
            return Err(EventError::Malformed("payload is not an object".to_string()));
        };
        let mut map = map.clone();
        map.insert(HAS_PUSH_ACCESS.to_string(), Value::Bool(has_push_access));
        Ok(Self(Value::Object(map)))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn has_push_access(&self) -> bool {
        self.0
            .get(HAS_PUSH_ACCESS)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Whether a permission role grants push access. Unknown roles do not.
pub fn role_grants_push(role: &str) -> bool {
    PUSH_ROLES.contains(&role)
}

/// Query the author's permission and assemble the evaluation context.
pub async fn build_context(
    collaborator: &dyn Collaborator,
    event: &PullRequestEvent,
    payload: &Value,
) -> Result<EvaluationContext, CollaboratorError> {
    let role = collaborator
        .permission_level(&event.repo, &event.author.login)
        .await?;
    let has_push_access = role_grants_push(&role);
    debug!(
        repo = %event.repo,
        login = %event.author.login,
        role = %role,
        has_push_access,
        "resolved author permission"
    );

    // `event` was decoded from this payload, so it is an object.
    EvaluationContext::from_payload(payload, has_push_access)
        .map_err(|e| CollaboratorError::InvalidResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeCollaborator, Operation};
    use crate::types::tests::release_branch_payload;
    use serde_json::json;

    #[test]
    fn only_admin_and_write_grant_push() {
        assert!(role_grants_push("admin"));
        assert!(role_grants_push("write"));
        assert!(!role_grants_push("read"));
        assert!(!role_grants_push("none"));
        assert!(!role_grants_push("triage"));
        assert!(!role_grants_push("Admin"));
        assert!(!role_grants_push(""));
    }

    #[test]
    fn synthetic_fact_overrides_payload_field() {
        let payload = json!({ "has_push_access": true, "x": 1 });
        let context = EvaluationContext::from_payload(&payload, false).unwrap();
        assert!(!context.has_push_access());
        assert_eq!(context.as_value()["x"], 1);
    }

    #[tokio::test]
    async fn builds_context_with_single_permission_query() {
        let payload = release_branch_payload();
        let event = PullRequestEvent::from_payload(&payload).unwrap();
        let fake = FakeCollaborator::new().with_permission("write");

        let context = build_context(&fake, &event, &payload).await.unwrap();

        assert!(context.has_push_access());
        assert_eq!(
            context.as_value()["pull_request"]["head"]["label"],
            "atom:2.0-releases"
        );
        assert_eq!(fake.count(Operation::PermissionLevel), 1);
        assert_eq!(fake.calls().len(), 1);
    }

    #[tokio::test]
    async fn permission_failure_propagates() {
        let payload = release_branch_payload();
        let event = PullRequestEvent::from_payload(&payload).unwrap();
        let fake = FakeCollaborator::new().fail(
            Operation::PermissionLevel,
            CollaboratorError::Fetch("connection reset".to_string()),
        );

        let err = build_context(&fake, &event, &payload).await.unwrap_err();
        assert_eq!(err, CollaboratorError::Fetch("connection reset".to_string()));
    }
}
