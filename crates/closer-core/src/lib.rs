//! Core decision logic for closing mistaken pull requests.
//!
//! An opened pull request is turned into an evaluation context
//! ([`context`]), checked against the repository's filters ([`filter`]),
//! and remediated when every filter matches ([`remediate`]).

pub mod collaborator;
pub mod config;
pub mod context;
pub mod fakes;
pub mod filter;
pub mod handler;
pub mod remediate;
pub mod types;

pub use collaborator::{Collaborator, CollaboratorError};
pub use config::{LabelFailurePolicy, RemediationConfig};
pub use context::EvaluationContext;
pub use filter::Filter;
pub use handler::{EventHandler, HandlerError, Outcome, PullRequestOpenedHandler};
pub use remediate::{RemediationError, RemediationReport};
pub use types::*;
