//! Task records and their identity.

use core::fmt;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Name of the handler a task is routed to.
///
/// Part of task identity together with the payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskKind(String);

impl TaskKind {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskKind {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskKind {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Unique task identifier, used for log correlation only.
///
/// Not part of task identity: re-enqueueing equal work yields a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Uses UUIDv7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Deduplication key of a task: its kind plus the canonical rendering of
/// its payload.
///
/// `serde_json` maps are BTreeMap-backed, so equal payload values always
/// render to the same string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskIdentity {
    kind: TaskKind,
    payload: String,
}

impl TaskIdentity {
    pub fn new(kind: TaskKind, payload: &Value) -> Self {
        Self {
            kind,
            payload: payload.to_string(),
        }
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }
}

impl fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.payload)
    }
}

/// One unit of deferred work.
///
/// Equality and hashing cover only (`kind`, `payload`); scheduling state
/// (`eligible_at`, `backoff`, `attempts`) and the correlation fields never
/// participate in deduplication.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    /// Correlation id for logs and events.
    pub id: TaskId,
    /// Handler the task is routed to.
    pub kind: TaskKind,
    /// Opaque data handed to the handler.
    pub payload: Value,
    /// Earliest monotonic instant at which the task may be dispatched.
    pub eligible_at: Instant,
    /// Current retry interval; grows on each failure up to the policy cap.
    pub backoff: Duration,
    /// Dispatch attempts so far.
    pub attempts: u32,
    /// Wall-clock creation time.
    pub created_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Create a record eligible immediately, with the policy's initial
    /// backoff and zero attempts.
    pub fn new(kind: TaskKind, payload: Value, now: Instant, initial_backoff: Duration) -> Self {
        Self {
            id: TaskId::new(),
            kind,
            payload,
            eligible_at: now,
            backoff: initial_backoff,
            attempts: 0,
            created_at: Utc::now(),
        }
    }

    pub fn identity(&self) -> TaskIdentity {
        TaskIdentity::new(self.kind.clone(), &self.payload)
    }

    pub fn is_eligible(&self, now: Instant) -> bool {
        now >= self.eligible_at
    }
}

impl PartialEq for TaskRecord {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.payload == other.payload
    }
}

impl Eq for TaskRecord {}

impl Hash for TaskRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.payload.to_string().hash(state);
    }
}

impl fmt::Display for TaskRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn record(kind: &str, payload: Value) -> TaskRecord {
        TaskRecord::new(
            TaskKind::from(kind),
            payload,
            Instant::now(),
            Duration::from_millis(500),
        )
    }

    #[test]
    fn equality_ignores_scheduling_state() {
        let a = record("resolve", json!({"host": "example.org"}));
        let mut b = record("resolve", json!({"host": "example.org"}));
        b.attempts = 7;
        b.backoff = Duration::from_secs(64);
        b.eligible_at = Instant::now() + Duration::from_secs(3600);

        assert_eq!(a, b);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn different_kind_or_payload_differ() {
        let a = record("resolve", json!({"host": "example.org"}));
        let b = record("probe", json!({"host": "example.org"}));
        let c = record("resolve", json!({"host": "example.net"}));

        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn hash_set_containment_follows_identity() {
        let mut seen = HashSet::new();
        seen.insert(record("resolve", json!({"host": "example.org"})));

        let mut later = record("resolve", json!({"host": "example.org"}));
        later.attempts = 3;
        assert!(seen.contains(&later));
        assert!(!seen.contains(&record("resolve", json!({"host": "other"}))));
    }

    #[test]
    fn identity_is_stable_across_map_key_order() {
        // serde_json maps sort keys, so insertion order cannot split identity.
        let mut first = serde_json::Map::new();
        first.insert("a".to_string(), json!(1));
        first.insert("b".to_string(), json!(2));

        let mut second = serde_json::Map::new();
        second.insert("b".to_string(), json!(2));
        second.insert("a".to_string(), json!(1));

        let x = TaskIdentity::new(TaskKind::from("t"), &Value::Object(first));
        let y = TaskIdentity::new(TaskKind::from("t"), &Value::Object(second));
        assert_eq!(x, y);
    }

    #[test]
    fn display_renders_kind_and_payload() {
        let r = record("resolve", json!({"host": "example.org"}));
        assert_eq!(r.to_string(), r#"resolve({"host":"example.org"})"#);
        assert_eq!(r.identity().to_string(), r.to_string());
    }
}
