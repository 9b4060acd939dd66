//! Task failure model.

use thiserror::Error;

/// Result type returned by task handlers.
pub type TaskResult = Result<(), TaskError>;

/// Failure reported by a task handler.
///
/// The cause is opaque to the scheduler: any `TaskError` is treated as a
/// transient failure and fed to the retry policy until the attempt budget
/// runs out. Nothing here distinguishes retriable from permanent causes;
/// the budget is the only permanence boundary.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct TaskError(#[from] anyhow::Error);

impl TaskError {
    /// Build a failure from a plain message.
    pub fn msg(msg: impl Into<String>) -> Self {
        let msg: String = msg.into();
        Self(anyhow::Error::msg(msg))
    }
}
