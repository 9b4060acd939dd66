//! Observable queue events and the sink they are reported to.

use std::time::Duration;

use serde::Serialize;

use deferq_core::TaskId;

/// Externally observable scheduling events.
///
/// `task` carries the record's human-readable rendering ("kind(payload)").
#[derive(Debug, Clone, Serialize)]
pub enum QueueEvent {
    /// A pending task was evicted to make room under the capacity bound.
    Evicted { id: TaskId, task: String },
    /// A task's handler completed successfully. `attempts` counts
    /// dispatches including the successful one.
    Completed {
        id: TaskId,
        task: String,
        attempts: u32,
    },
    /// A task failed and was rescheduled with a longer interval.
    RetryScheduled {
        id: TaskId,
        task: String,
        error: String,
        attempt: u32,
        max_attempts: u32,
        retry_in: Duration,
    },
    /// A task failed on its final attempt and was dropped.
    GaveUp {
        id: TaskId,
        task: String,
        error: String,
        attempts: u32,
    },
}

/// Observer for queue events.
///
/// Injected at construction; the queue never falls back to hidden global
/// state for reporting.
pub trait TaskEventSink: Send + Sync {
    fn emit(&self, event: QueueEvent);
}

/// Default sink: structured `tracing` output.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl TaskEventSink for TracingEventSink {
    fn emit(&self, event: QueueEvent) {
        match event {
            QueueEvent::Evicted { id, task } => {
                tracing::info!(task_id = %id, task = %task, "queue full, evicting oldest pending task");
            }
            QueueEvent::Completed { id, task, attempts } => {
                tracing::info!(task_id = %id, task = %task, attempts, "task completed successfully");
            }
            QueueEvent::RetryScheduled {
                id,
                task,
                error,
                attempt,
                max_attempts,
                retry_in,
            } => {
                tracing::error!(
                    task_id = %id,
                    task = %task,
                    error = %error,
                    attempt,
                    max_attempts,
                    retry_in_ms = retry_in.as_millis() as u64,
                    "task failed, retrying"
                );
            }
            QueueEvent::GaveUp {
                id,
                task,
                error,
                attempts,
            } => {
                tracing::error!(
                    task_id = %id,
                    task = %task,
                    error = %error,
                    attempts,
                    "task failed permanently, giving up"
                );
            }
        }
    }
}
