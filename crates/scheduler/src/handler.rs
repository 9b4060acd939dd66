//! Task handler seam and registry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use deferq_core::{TaskError, TaskKind};

/// Asynchronous unit of work invoked with a task's payload.
///
/// Returning `Ok` marks the task completed; `Err` feeds the retry/backoff
/// state machine. The scheduler imposes no timeout on `execute`.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, payload: Value) -> Result<(), TaskError>;
}

#[async_trait]
impl<F, Fut> TaskHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TaskError>> + Send,
{
    async fn execute(&self, payload: Value) -> Result<(), TaskError> {
        (self)(payload).await
    }
}

/// Maps task kinds to their handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a kind, replacing any existing one.
    pub fn register(&mut self, kind: impl Into<TaskKind>, handler: impl TaskHandler + 'static) {
        self.handlers.insert(kind.into(), Arc::new(handler));
    }

    pub fn get(&self, kind: &TaskKind) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(kind).cloned()
    }

    pub fn has(&self, kind: &TaskKind) -> bool {
        self.handlers.contains_key(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn closures_are_handlers() {
        let mut registry = HandlerRegistry::new();
        registry.register("echo", |payload: Value| async move {
            if payload == json!({"ok": true}) {
                Ok(())
            } else {
                Err(TaskError::msg("unexpected payload"))
            }
        });

        let handler = registry.get(&TaskKind::from("echo")).unwrap();
        assert!(handler.execute(json!({"ok": true})).await.is_ok());
        assert!(handler.execute(json!({"ok": false})).await.is_err());
    }

    #[test]
    fn unknown_kind_is_absent() {
        let registry = HandlerRegistry::new();
        assert!(!registry.has(&TaskKind::from("missing")));
        assert!(registry.get(&TaskKind::from("missing")).is_none());
    }
}
