//! Single-consumer retry scheduling for deferred work.
//!
//! ## Design
//!
//! - Tasks are identified by (kind, payload); enqueue is idempotent per identity
//! - One consumer loop drains a time-ordered pending set
//! - Exponential backoff with a cap; a spent attempt budget drops the task
//! - Completions, retries, and evictions are reported to an injected sink
//!
//! ## Components
//!
//! - `RetryQueue`: ordered pending set, completed identities, run loop
//! - `TaskHandler`/`HandlerRegistry`: work functions routed by kind
//! - `TaskEventSink`: observer for completion/retry/eviction events

pub mod config;
pub mod events;
pub mod handler;
pub mod queue;

pub use config::QueueConfig;
pub use events::{QueueEvent, TaskEventSink, TracingEventSink};
pub use handler::{HandlerRegistry, TaskHandler};
pub use queue::{DispatchOutcome, EnqueueOutcome, QueueHandle, QueueStats, RetryQueue};
