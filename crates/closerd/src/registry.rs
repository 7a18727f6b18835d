//! Event handler registry keyed by `(event, action)`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use closer_core::handler::{
    EventHandler, PullRequestOpenedHandler, OPENED_ACTION, PULL_REQUEST_EVENT,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a handler is already registered for {event}.{action}")]
    Duplicate { event: String, action: String },
}

/// Maps webhook `(event, action)` pairs to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<(String, String), Arc<dyn EventHandler>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self
            .handlers
            .keys()
            .map(|(event, action)| format!("{event}.{action}"))
            .collect();
        keys.sort();
        f.debug_struct("HandlerRegistry").field("handlers", &keys).finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the pull-request-opened handler reading `config_file`.
    pub fn with_default_handlers(config_file: &str) -> Self {
        let mut registry = Self::new();
        registry.handlers.insert(
            (PULL_REQUEST_EVENT.to_string(), OPENED_ACTION.to_string()),
            Arc::new(PullRequestOpenedHandler::new(config_file)),
        );
        registry
    }

    pub fn register(
        &mut self,
        event: &str,
        action: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), RegistryError> {
        let key = (event.to_string(), action.to_string());
        if self.handlers.contains_key(&key) {
            return Err(RegistryError::Duplicate {
                event: event.to_string(),
                action: action.to_string(),
            });
        }
        self.handlers.insert(key, handler);
        Ok(())
    }

    pub fn get(&self, event: &str, action: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers
            .get(&(event.to_string(), action.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
