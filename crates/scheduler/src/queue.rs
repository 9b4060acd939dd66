//! The retry queue: ordered pending set, dedup, and the run loop.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, info};

use deferq_core::{RetryDecision, TaskError, TaskId, TaskIdentity, TaskKind, TaskRecord};

use crate::config::QueueConfig;
use crate::events::{QueueEvent, TaskEventSink, TracingEventSink};
use crate::handler::{HandlerRegistry, TaskHandler};

/// Result of an enqueue call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The task was inserted into the pending set.
    Enqueued { id: TaskId },
    /// An equal task is already pending; the call was a no-op.
    DuplicatePending,
    /// An equal task already completed; the call was a no-op.
    AlreadyCompleted,
}

/// Result of a single run-loop iteration (one dispatch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The task completed and its identity was recorded.
    Completed { id: TaskId },
    /// The task failed and was rescheduled.
    Retried {
        id: TaskId,
        attempt: u32,
        retry_in: Duration,
    },
    /// The task failed on its final attempt and was dropped.
    GaveUp { id: TaskId, attempts: u32 },
}

/// Snapshot of queue counters.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub deduplicated: u64,
    pub evicted: u64,
    pub completed: u64,
    pub retried: u64,
    pub gave_up: u64,
}

/// Pending-heap entry: earliest `eligible_at` surfaces first, insertion
/// order breaks ties so equal due times dispatch in arrival order.
struct PendingEntry {
    record: TaskRecord,
    seq: u64,
}

impl PartialEq for PendingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PendingEntry {}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse both keys so the earliest
        // eligible, lowest-sequence entry is at the root.
        other
            .record
            .eligible_at
            .cmp(&self.record.eligible_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState {
    pending: BinaryHeap<PendingEntry>,
    pending_ids: HashSet<TaskIdentity>,
    completed: HashSet<TaskIdentity>,
    completed_order: VecDeque<TaskIdentity>,
    seq: u64,
    stats: QueueStats,
}

enum NextStep {
    Wait,
    WaitFor(Duration),
    Dispatch(TaskRecord),
}

/// Single-consumer, time-ordered retry queue.
///
/// Any number of producers may call [`enqueue`](RetryQueue::enqueue);
/// exactly one consumer drives [`run`](RetryQueue::run) (or the loop
/// spawned by [`spawn`](RetryQueue::spawn)). State is guarded by a mutex
/// held only for short non-await sections; the consumer parks on a
/// [`Notify`] that producers signal on every insert.
pub struct RetryQueue {
    config: QueueConfig,
    registry: HandlerRegistry,
    sink: Arc<dyn TaskEventSink>,
    state: Mutex<QueueState>,
    changed: Notify,
}

/// Monotonic now from the tokio clock, so paused-clock tests drive
/// eligibility deterministically.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

impl RetryQueue {
    /// Create a queue reporting events through the default tracing sink.
    pub fn new(config: QueueConfig) -> Self {
        Self::with_event_sink(config, Arc::new(TracingEventSink))
    }

    /// Create a queue with an explicitly injected event sink.
    pub fn with_event_sink(config: QueueConfig, sink: Arc<dyn TaskEventSink>) -> Self {
        Self {
            config,
            registry: HandlerRegistry::new(),
            sink,
            state: Mutex::new(QueueState {
                pending: BinaryHeap::new(),
                pending_ids: HashSet::new(),
                completed: HashSet::new(),
                completed_order: VecDeque::new(),
                seq: 0,
                stats: QueueStats::default(),
            }),
            changed: Notify::new(),
        }
    }

    /// Register a handler for a task kind. Call before sharing the queue.
    pub fn register_handler(
        &mut self,
        kind: impl Into<TaskKind>,
        handler: impl TaskHandler + 'static,
    ) {
        self.registry.register(kind, handler);
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn stats(&self) -> QueueStats {
        self.state.lock().unwrap().stats.clone()
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    pub fn completed_len(&self) -> usize {
        self.state.lock().unwrap().completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending_len() == 0
    }

    /// Enqueue a task, deduplicating by (kind, payload) identity.
    ///
    /// A no-op when an equal task is already pending or already
    /// completed, so at most one live instance of an identity exists.
    /// Under a capacity bound the oldest-by-eligibility pending task is
    /// evicted to make room. Wakes the consumer on every insert.
    pub fn enqueue(&self, kind: impl Into<TaskKind>, payload: Value) -> EnqueueOutcome {
        let record = TaskRecord::new(
            kind.into(),
            payload,
            now(),
            self.config.policy.backoff_initial,
        );
        let identity = record.identity();

        let evicted;
        let id = record.id;
        {
            let mut state = self.state.lock().unwrap();

            if state.pending_ids.contains(&identity) {
                state.stats.deduplicated += 1;
                debug!(queue = %self.config.name, task = %record, "duplicate of a pending task, ignoring");
                return EnqueueOutcome::DuplicatePending;
            }
            if state.completed.contains(&identity) {
                state.stats.deduplicated += 1;
                debug!(queue = %self.config.name, task = %record, "task already completed, ignoring");
                return EnqueueOutcome::AlreadyCompleted;
            }

            evicted = match self.config.capacity {
                Some(capacity) if state.pending.len() >= capacity => match state.pending.pop() {
                    Some(entry) => {
                        state.pending_ids.remove(&entry.record.identity());
                        state.stats.evicted += 1;
                        Some(entry.record)
                    }
                    None => None,
                },
                _ => None,
            };

            let seq = state.seq;
            state.seq += 1;
            state.pending_ids.insert(identity);
            state.pending.push(PendingEntry { record, seq });
            state.stats.enqueued += 1;
        }

        if let Some(old) = evicted {
            self.sink.emit(QueueEvent::Evicted {
                id: old.id,
                task: old.to_string(),
            });
        }
        self.changed.notify_one();

        EnqueueOutcome::Enqueued { id }
    }

    /// Wait for the earliest eligible task and dispatch it.
    ///
    /// Suspends while the queue is empty or the head is not yet due; an
    /// enqueue interrupts either wait, and every wake re-evaluates queue
    /// state from scratch. Handles exactly one dispatch per call. Handler
    /// failures never propagate; they feed the retry state machine.
    pub async fn run_next_task(&self) -> DispatchOutcome {
        loop {
            // Register interest before inspecting state so a signal
            // racing with the emptiness check is never lost.
            let changed = self.changed.notified();

            let step = {
                let mut state = self.state.lock().unwrap();
                let now = now();
                match state.pending.peek() {
                    None => NextStep::Wait,
                    Some(entry) if !entry.record.is_eligible(now) => {
                        NextStep::WaitFor(entry.record.eligible_at - now)
                    }
                    Some(_) => match state.pending.pop() {
                        Some(entry) => {
                            state.pending_ids.remove(&entry.record.identity());
                            NextStep::Dispatch(entry.record)
                        }
                        None => NextStep::Wait,
                    },
                }
            };

            match step {
                NextStep::Wait => {
                    changed.await;
                }
                NextStep::WaitFor(remaining) => {
                    // A newly enqueued task may be due sooner than the
                    // current head, so the wait is interruptible.
                    let _ = tokio::time::timeout(remaining, changed).await;
                }
                NextStep::Dispatch(record) => return self.dispatch(record).await,
            }
        }
    }

    /// Drive the queue forever. Termination is the caller's concern.
    pub async fn run(&self) {
        loop {
            let _ = self.run_next_task().await;
        }
    }

    /// Spawn the run loop on the current tokio runtime.
    pub fn spawn(self: Arc<Self>) -> QueueHandle {
        let queue = self;
        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();
        let join = tokio::spawn(async move {
            info!(queue = %queue.config.name, "retry queue started");
            loop {
                tokio::select! {
                    _ = signal.notified() => break,
                    _ = queue.run_next_task() => {}
                }
            }
            info!(queue = %queue.config.name, "retry queue stopped");
        });
        QueueHandle { shutdown, join }
    }

    async fn dispatch(&self, mut record: TaskRecord) -> DispatchOutcome {
        let outcome = match self.registry.get(&record.kind) {
            Some(handler) => handler.execute(record.payload.clone()).await,
            None => Err(TaskError::msg(format!(
                "no handler registered for task kind `{}`",
                record.kind
            ))),
        };

        match outcome {
            Ok(()) => {
                let identity = record.identity();
                {
                    let mut state = self.state.lock().unwrap();
                    if state.completed.insert(identity.clone()) {
                        state.completed_order.push_back(identity);
                        if let Some(cap) = self.config.completed_capacity {
                            while state.completed.len() > cap {
                                match state.completed_order.pop_front() {
                                    Some(oldest) => {
                                        state.completed.remove(&oldest);
                                    }
                                    None => break,
                                }
                            }
                        }
                    }
                    state.stats.completed += 1;
                }
                self.sink.emit(QueueEvent::Completed {
                    id: record.id,
                    task: record.to_string(),
                    attempts: record.attempts + 1,
                });
                DispatchOutcome::Completed { id: record.id }
            }
            Err(error) => match self.config.policy.on_failure(&mut record, now()) {
                RetryDecision::GiveUp { attempts } => {
                    {
                        let mut state = self.state.lock().unwrap();
                        state.stats.gave_up += 1;
                    }
                    self.sink.emit(QueueEvent::GaveUp {
                        id: record.id,
                        task: record.to_string(),
                        error: error.to_string(),
                        attempts,
                    });
                    DispatchOutcome::GaveUp {
                        id: record.id,
                        attempts,
                    }
                }
                RetryDecision::Retry { attempt, delay } => {
                    let id = record.id;
                    let task = record.to_string();
                    let identity = record.identity();
                    {
                        let mut state = self.state.lock().unwrap();
                        // The identity may have been re-enqueued while the
                        // dispatch was in flight; the pending copy is due
                        // sooner, so this retry copy is dropped.
                        if state.pending_ids.insert(identity) {
                            let seq = state.seq;
                            state.seq += 1;
                            state.pending.push(PendingEntry { record, seq });
                        } else {
                            debug!(queue = %self.config.name, task = %task, "retry superseded by a pending duplicate");
                        }
                        state.stats.retried += 1;
                    }
                    self.sink.emit(QueueEvent::RetryScheduled {
                        id,
                        task,
                        error: error.to_string(),
                        attempt,
                        max_attempts: self.config.policy.max_attempts,
                        retry_in: delay,
                    });
                    DispatchOutcome::Retried {
                        id,
                        attempt,
                        retry_in: delay,
                    }
                }
            },
        }
    }
}

/// Handle to a spawned run loop.
pub struct QueueHandle {
    shutdown: Arc<Notify>,
    join: tokio::task::JoinHandle<()>,
}

impl QueueHandle {
    /// Request shutdown and wait for the run loop to stop.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deferq_core::RetryPolicy;
    use serde_json::json;

    fn entry_at(base: Instant, eligible_in: Duration, seq: u64) -> PendingEntry {
        let mut record = TaskRecord::new(
            TaskKind::from("t"),
            json!({ "seq": seq }),
            base,
            Duration::from_millis(500),
        );
        record.eligible_at += eligible_in;
        PendingEntry { record, seq }
    }

    #[test]
    fn heap_surfaces_earliest_eligible_first() {
        let base = Instant::now();
        let mut heap = BinaryHeap::new();
        heap.push(entry_at(base, Duration::from_secs(30), 0));
        heap.push(entry_at(base, Duration::from_secs(1), 1));
        heap.push(entry_at(base, Duration::from_secs(10), 2));

        assert_eq!(heap.pop().unwrap().seq, 1);
        assert_eq!(heap.pop().unwrap().seq, 2);
        assert_eq!(heap.pop().unwrap().seq, 0);
    }

    #[test]
    fn heap_breaks_ties_by_arrival_order() {
        let base = Instant::now();
        let mut heap = BinaryHeap::new();
        for seq in [2, 0, 3, 1] {
            heap.push(entry_at(base, Duration::from_secs(5), seq));
        }

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|e| e.seq)).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn enqueue_deduplicates_pending() {
        let queue = RetryQueue::new(QueueConfig::default());

        let first = queue.enqueue("resolve", json!({"host": "a"}));
        assert!(matches!(first, EnqueueOutcome::Enqueued { .. }));
        assert_eq!(
            queue.enqueue("resolve", json!({"host": "a"})),
            EnqueueOutcome::DuplicatePending
        );

        assert_eq!(queue.pending_len(), 1);
        assert_eq!(queue.stats().deduplicated, 1);
    }

    #[tokio::test]
    async fn enqueue_evicts_oldest_under_capacity_pressure() {
        let queue = RetryQueue::new(QueueConfig::default().with_capacity(2));

        queue.enqueue("t", json!(1));
        queue.enqueue("t", json!(2));
        queue.enqueue("t", json!(3));

        assert_eq!(queue.pending_len(), 2);
        assert_eq!(queue.stats().evicted, 1);
        assert_eq!(queue.stats().enqueued, 3);
    }

    #[tokio::test]
    async fn distinct_payloads_are_distinct_tasks() {
        let queue = RetryQueue::new(QueueConfig::default());

        queue.enqueue("resolve", json!({"host": "a"}));
        queue.enqueue("resolve", json!({"host": "b"}));
        queue.enqueue("probe", json!({"host": "a"}));

        assert_eq!(queue.pending_len(), 3);
        assert_eq!(queue.stats().deduplicated, 0);
    }

    #[test]
    fn default_policy_matches_documented_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_base, 2.0);
        assert_eq!(policy.backoff_initial, Duration::from_millis(500));
        assert_eq!(policy.backoff_max, Duration::from_secs(120));
        assert_eq!(policy.max_attempts, 20);
    }
}
