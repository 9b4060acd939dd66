//! Queue configuration.

use deferq_core::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Retry queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Name used in log context.
    pub name: String,
    /// Maximum number of pending tasks; unbounded when `None`. When the
    /// bound is reached, the oldest-by-eligibility task is evicted to
    /// make room.
    pub capacity: Option<usize>,
    /// Maximum number of completed identities remembered for
    /// deduplication; unbounded when `None`.
    pub completed_capacity: Option<usize>,
    /// Backoff and attempt-budget policy for failed tasks.
    pub policy: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "retry-queue".to_string(),
            capacity: None,
            completed_capacity: None,
            policy: RetryPolicy::default(),
        }
    }
}

impl QueueConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn with_completed_capacity(mut self, capacity: usize) -> Self {
        self.completed_capacity = Some(capacity);
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}
