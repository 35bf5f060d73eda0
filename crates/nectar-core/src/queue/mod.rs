//! Named task queues with bounded per-queue concurrency.
//!
//! Each queue owns a processor callback and a dispatcher task. `add` pushes
//! into an in-memory priority buffer and returns immediately; enqueueing
//! never blocks the caller. The dispatcher pops tasks (highest priority
//! first, FIFO within a priority) and runs the processor under a semaphore
//! sized to the queue's concurrency ceiling, so concurrently executing tasks
//! per queue never exceed `max_concurrency`.
//!
//! A processor failure (error or panic) is isolated to its task: the task is
//! counted as failed and the pool continues. Queues are in-memory only:
//! pending tasks do not survive shutdown or restart.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::{future::BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    cmp::Ordering as CmpOrdering,
    collections::{BinaryHeap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::{broadcast, Notify, Semaphore};
use uuid::Uuid;

use crate::errors::ServiceError;

/// JSON payload carried by a queued task.
pub type TaskPayload = serde_json::Value;

/// Outcome of one processor invocation.
pub type TaskOutcome = Result<(), ServiceError>;

/// Processor callback invoked once per task.
pub type TaskProcessor = Arc<dyn Fn(QueueTask) -> BoxFuture<'static, TaskOutcome> + Send + Sync>;

/// A unit of queued work.
#[derive(Debug, Clone)]
pub struct QueueTask {
    /// Unique task id returned by [`QueueManager::add`].
    pub id: String,
    pub payload: TaskPayload,
    /// Higher runs first; `0` is plain FIFO.
    pub priority: u8,
    pub enqueued_at: DateTime<Utc>,
    /// Processing attempt, starting at 1.
    pub attempt: u32,
}

/// Heap entry ordering: priority descending, then submission order ascending.
struct PendingTask {
    task: QueueTask,
    seq: u64,
}

impl PartialEq for PendingTask {
    fn eq(&self, other: &Self) -> bool {
        self.task.priority == other.task.priority && self.seq == other.seq
    }
}

impl Eq for PendingTask {}

impl PartialOrd for PendingTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap: higher priority first, then lower seq (older) first.
        self.task
            .priority
            .cmp(&other.task.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueCounters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    running: AtomicU64,
}

/// Counters for one queue.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct QueueStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Tasks currently executing.
    pub running: u64,
    /// Tasks buffered but not yet started.
    pub pending: u64,
    pub max_concurrency: usize,
}

/// Counters across all queues.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalQueueStats {
    pub total_submitted: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub queues: HashMap<String, QueueStats>,
}

struct TaskQueue {
    name: String,
    max_concurrency: usize,
    processor: TaskProcessor,
    pending: Mutex<BinaryHeap<PendingTask>>,
    notify: Notify,
    permits: Arc<Semaphore>,
    counters: QueueCounters,
    seq: AtomicU64,
}

impl TaskQueue {
    fn push(&self, task: QueueTask) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().push(PendingTask { task, seq });
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<QueueTask> {
        self.pending.lock().pop().map(|p| p.task)
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            running: self.counters.running.load(Ordering::Relaxed),
            pending: self.pending.lock().len() as u64,
            max_concurrency: self.max_concurrency,
        }
    }
}

/// Registry of named task queues.
///
/// Create queues with [`create_queue`](Self::create_queue), submit with
/// [`add`](Self::add). Dispatcher tasks stop when [`shutdown`](Self::shutdown)
/// is called; in-flight processors run to completion, pending tasks are
/// dropped.
pub struct QueueManager {
    queues: DashMap<String, Arc<TaskQueue>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueManager {
    #[must_use]
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(4);
        Self { queues: DashMap::new(), shutdown_tx }
    }

    /// Registers a queue and starts its dispatcher.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::InvalidConfiguration`] if `max_concurrency` is 0,
    ///   rejected here at creation, not at first task
    /// - [`ServiceError::InvalidConfiguration`] if the name is already taken
    pub fn create_queue(
        &self,
        name: &str,
        max_concurrency: usize,
        processor: TaskProcessor,
    ) -> Result<(), ServiceError> {
        if max_concurrency == 0 {
            return Err(ServiceError::InvalidConfiguration(format!(
                "queue {name}: max_concurrency must be at least 1"
            )));
        }
        if self.queues.contains_key(name) {
            return Err(ServiceError::InvalidConfiguration(format!(
                "queue {name} already exists"
            )));
        }

        let queue = Arc::new(TaskQueue {
            name: name.to_string(),
            max_concurrency,
            processor,
            pending: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            permits: Arc::new(Semaphore::new(max_concurrency)),
            counters: QueueCounters::default(),
            seq: AtomicU64::new(0),
        });

        self.queues.insert(name.to_string(), Arc::clone(&queue));
        Self::spawn_dispatcher(queue, self.shutdown_tx.subscribe());

        tracing::debug!(queue = name, max_concurrency, "queue created");
        Ok(())
    }

    /// Submits a FIFO task; returns its id. Never blocks the caller.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] if the queue is unknown.
    pub fn add(&self, name: &str, payload: TaskPayload) -> Result<String, ServiceError> {
        self.add_with_priority(name, payload, 0)
    }

    /// Submits a task that orders ahead of lower-priority work.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] if the queue is unknown.
    pub fn add_with_priority(
        &self,
        name: &str,
        payload: TaskPayload,
        priority: u8,
    ) -> Result<String, ServiceError> {
        let queue = self
            .queues
            .get(name)
            .ok_or_else(|| ServiceError::NotFound(format!("queue {name}")))?;

        let task = QueueTask {
            id: Uuid::new_v4().to_string(),
            payload,
            priority,
            enqueued_at: Utc::now(),
            attempt: 1,
        };
        let id = task.id.clone();
        queue.push(task);
        Ok(id)
    }

    /// Returns counters for one queue, or `None` if unknown.
    #[must_use]
    pub fn queue_stats(&self, name: &str) -> Option<QueueStats> {
        self.queues.get(name).map(|q| q.stats())
    }

    /// Returns global and per-queue counters.
    #[must_use]
    pub fn stats(&self) -> GlobalQueueStats {
        let mut queues = HashMap::new();
        let mut total_submitted = 0;
        let mut total_succeeded = 0;
        let mut total_failed = 0;

        for entry in self.queues.iter() {
            let stats = entry.value().stats();
            total_submitted += stats.submitted;
            total_succeeded += stats.succeeded;
            total_failed += stats.failed;
            queues.insert(entry.key().clone(), stats);
        }

        GlobalQueueStats { total_submitted, total_succeeded, total_failed, queues }
    }

    /// Names of registered queues.
    #[must_use]
    pub fn queue_names(&self) -> Vec<String> {
        self.queues.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Stops all dispatchers. In-flight processors finish; pending tasks are
    /// dropped (queues are non-durable by design).
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    fn spawn_dispatcher(queue: Arc<TaskQueue>, mut shutdown_rx: broadcast::Receiver<()>) {
        tokio::spawn(async move {
            loop {
                // Sleep until work is buffered.
                while queue.pending.lock().is_empty() {
                    tokio::select! {
                        () = queue.notify.notified() => {}
                        _ = shutdown_rx.recv() => {
                            tracing::debug!(queue = %queue.name, "dispatcher shutting down");
                            return;
                        }
                    }
                }

                // Acquire the permit before popping so the highest-priority
                // task at the moment a slot frees is the one that runs.
                let permit = tokio::select! {
                    permit = Arc::clone(&queue.permits).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                    _ = shutdown_rx.recv() => {
                        tracing::debug!(queue = %queue.name, "dispatcher shutting down");
                        return;
                    }
                };

                let Some(task) = queue.pop() else {
                    drop(permit);
                    continue;
                };

                let worker_queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    worker_queue.counters.running.fetch_add(1, Ordering::Relaxed);
                    let task_id = task.id.clone();
                    let outcome = std::panic::AssertUnwindSafe((worker_queue.processor)(task))
                        .catch_unwind()
                        .await;

                    match outcome {
                        Ok(Ok(())) => {
                            worker_queue.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(Err(err)) => {
                            worker_queue.counters.failed.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(
                                queue = %worker_queue.name,
                                task_id = %task_id,
                                error = %err,
                                "task failed"
                            );
                        }
                        Err(_) => {
                            worker_queue.counters.failed.fetch_add(1, Ordering::Relaxed);
                            tracing::error!(
                                queue = %worker_queue.name,
                                task_id = %task_id,
                                "task processor panicked"
                            );
                        }
                    }
                    worker_queue.counters.running.fetch_sub(1, Ordering::Relaxed);
                    drop(permit);
                });
            }
        });
    }
}
