pub mod task;
mod worker;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::{AppError, Result};

pub use task::{BuildStatus, BuildTask, StatusCallback, TaskKind};
use worker::Worker;

const SHUTDOWN_DESCRIPTION: &str = "service is shutting down";

/// Executes one build task. Supplied to the dispatcher at construction.
///
/// Implementations report progress and outcome exclusively through the
/// task's callback: any number of `Pending` updates and exactly one
/// terminal status. Failures are never surfaced to the dispatcher.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, task: &BuildTask);
}

/// The three scheduling queues, guarded by one lock.
#[derive(Default)]
struct Queues {
    /// Submitted tasks not yet handed to a worker, oldest first.
    waiting: VecDeque<BuildTask>,
    /// One entry per repository currently owning a worker slot (parked in
    /// the pool channel or executing), keyed by repository name.
    in_progress: HashMap<String, BuildTask>,
    /// Tasks parked for delayed re-submission after a same-repository
    /// collision, keyed by task id. Always empty at quiescence.
    reassigning: HashMap<String, BuildTask>,
}

/// Point-in-time view of the scheduling queues as `owner/repo: id` keys.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub waiting: Vec<String>,
    pub in_progress: Vec<String>,
    pub reassigning: Vec<String>,
}

/// State shared between the dispatcher handle, the scheduling loop, the
/// workers and the transient re-submission tasks.
struct Shared {
    queues: Mutex<Queues>,
    /// Admission gate. Deliberately not under the queue lock so the
    /// fast-path check never contends with a long queue operation.
    is_shutting_down: AtomicBool,
    ready_tx: mpsc::Sender<()>,
    pool_tx: mpsc::Sender<BuildTask>,
    reassign_delay: Duration,
}

impl Shared {
    async fn add_task(&self, task: BuildTask) -> Result<()> {
        if self.is_shutting_down.load(Ordering::SeqCst) {
            return Self::reject(task);
        }

        {
            let mut queues = self.queues.lock().await;
            // Re-check under the queue lock: the shutdown drain also runs
            // under it, so a task admitted here is guaranteed to reach a
            // worker or the drain, never neither.
            if self.is_shutting_down.load(Ordering::SeqCst) {
                drop(queues);
                return Self::reject(task);
            }
            queues.waiting.push_back(task);
        }

        // Capacity-1 ready channel: a full buffer means a wake-up is
        // already pending, so signals coalesce.
        let _ = self.ready_tx.try_send(());
        Ok(())
    }

    fn reject(task: BuildTask) -> Result<()> {
        tracing::warn!(
            repo = task.repository(),
            id = task.id(),
            "rejecting build task, dispatcher is shutting down"
        );
        task.report(BuildStatus::Error, SHUTDOWN_DESCRIPTION);
        Err(AppError::ShuttingDown)
    }

    /// Release the repository held by a finished task.
    async fn finish(&self, task: &BuildTask) {
        let mut queues = self.queues.lock().await;
        queues.in_progress.remove(task.repository());
    }

}

/// Park a collided task and re-submit it after the configured delay.
///
/// Runs in its own tokio task so the scheduling loop never waits out the
/// delay. The re-submission goes through `add_task`, so it lands at the
/// tail of the waiting queue and fails fast if shutdown began in the
/// meantime.
fn spawn_reassign(shared: &Arc<Shared>, task: BuildTask) {
    tracing::debug!(
        repo = task.repository(),
        id = task.id(),
        delay = ?shared.reassign_delay,
        "repository busy, deferring re-submission"
    );

    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        tokio::time::sleep(shared.reassign_delay).await;
        let id = task.id().to_string();
        let _ = shared.add_task(task).await;
        shared.queues.lock().await.reassigning.remove(&id);
    });
}

enum Next {
    Dispatch(BuildTask),
    Defer(BuildTask),
}

async fn run_scheduler(
    shared: Arc<Shared>,
    mut ready_rx: mpsc::Receiver<()>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tracing::debug!("scheduling loop started");

    // Separate receiver for the hand-off path so the wake-up select and
    // the bounded send can each watch for shutdown.
    let mut handoff_shutdown_rx = shutdown_rx.clone();

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            wake = ready_rx.recv() => {
                if wake.is_none() {
                    break;
                }
                if !drain_waiting(&shared, &mut handoff_shutdown_rx).await {
                    break;
                }
            }
        }
    }

    tracing::debug!("scheduling loop stopped");
}

/// Hand queued tasks to the pool until the waiting queue is empty.
///
/// Ready signals coalesce, so one wake-up may cover several submissions;
/// finding the queue already empty is normal. Returns false when the loop
/// should exit.
async fn drain_waiting(shared: &Arc<Shared>, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    loop {
        let next = {
            let mut queues = shared.queues.lock().await;
            match queues.waiting.pop_front() {
                None => return true,
                Some(task) => {
                    if queues.in_progress.contains_key(task.repository()) {
                        // Another task for this repository already owns a
                        // worker slot; defer instead of dispatching.
                        queues.reassigning.insert(task.id().to_string(), task.clone());
                        Next::Defer(task)
                    } else {
                        queues.in_progress.insert(task.repository().to_string(), task.clone());
                        Next::Dispatch(task)
                    }
                }
            }
        };

        match next {
            Next::Defer(task) => spawn_reassign(shared, task),
            Next::Dispatch(task) => {
                // Bounded send: blocks while every worker slot is taken.
                // This block is the backpressure bound on in-flight tasks.
                tokio::select! {
                    sent = shared.pool_tx.send(task) => {
                        if sent.is_err() {
                            // Workers are gone; the shutdown drain fails the
                            // in-progress entry.
                            return false;
                        }
                    }
                    _ = shutdown_rx.changed() => return false,
                }
            }
        }
    }
}

/// Build task dispatcher: a bounded worker pool behind a scheduling loop
/// that serializes tasks per repository.
///
/// Owns the waiting queue, the in-progress set and the reassignment set.
/// Tasks enter through [`Dispatcher::add_task`], run on one of `workers`
/// pool slots, and report through their own callbacks. At most one task
/// per repository occupies a worker slot at any instant; same-repository
/// submissions are re-queued after `reassign_delay`.
pub struct Dispatcher {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Start `workers` pool workers and the scheduling loop.
    ///
    /// Must be called from within a tokio runtime. A zero-sized pool is a
    /// configuration error.
    pub fn new(
        processor: Arc<dyn Processor>,
        workers: usize,
        reassign_delay: Duration,
    ) -> Result<Self> {
        if workers == 0 {
            return Err(AppError::Config(
                "dispatcher needs at least one worker".to_string(),
            ));
        }

        let (ready_tx, ready_rx) = mpsc::channel(1);
        let (pool_tx, pool_rx) = mpsc::channel(workers);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            queues: Mutex::new(Queues::default()),
            is_shutting_down: AtomicBool::new(false),
            ready_tx,
            pool_tx,
            reassign_delay,
        });

        let pool_rx = Arc::new(Mutex::new(pool_rx));
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let worker = Worker::new(
                id,
                Arc::clone(&pool_rx),
                shutdown_rx.clone(),
                Arc::clone(&processor),
                Arc::clone(&shared),
            );
            handles.push(tokio::spawn(worker.run()));
        }

        let scheduler = tokio::spawn(run_scheduler(
            Arc::clone(&shared),
            ready_rx,
            shutdown_rx,
        ));

        tracing::info!(workers, delay = ?reassign_delay, "dispatcher started");

        Ok(Self {
            shared,
            shutdown_tx,
            workers: Mutex::new(handles),
            scheduler: Mutex::new(Some(scheduler)),
        })
    }

    /// Queue a build task.
    ///
    /// Fails fast once shutdown has begun: the task's callback receives a
    /// terminal `Error` status and the submitter gets
    /// [`AppError::ShuttingDown`].
    pub async fn add_task(&self, task: BuildTask) -> Result<()> {
        self.shared.add_task(task).await
    }

    /// Read-only snapshot of the three scheduling queues.
    pub async fn snapshot(&self) -> QueueSnapshot {
        let queues = self.shared.queues.lock().await;
        QueueSnapshot {
            waiting: queues.waiting.iter().map(BuildTask::display_key).collect(),
            in_progress: queues
                .in_progress
                .values()
                .map(BuildTask::display_key)
                .collect(),
            reassigning: queues
                .reassigning
                .values()
                .map(BuildTask::display_key)
                .collect(),
        }
    }

    /// Graceful drain. Stops accepting tasks, lets running builds finish,
    /// fails everything still queued with a terminal `Error`, and waits
    /// for deferred re-submissions to resolve.
    ///
    /// Every task admitted before this call receives exactly one terminal
    /// callback, from its processor run or from the drain.
    pub async fn shutdown(&self) {
        tracing::info!("dispatcher shutting down");
        self.shared.is_shutting_down.store(true, Ordering::SeqCst);

        // Stop the pool. Workers finish the task they are on first.
        let _ = self.shutdown_tx.send(true);
        let workers: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for handle in workers {
            let _ = handle.await;
        }
        if let Some(handle) = self.scheduler.lock().await.take() {
            let _ = handle.await;
        }

        // Workers and scheduler are gone, so nothing clears these entries
        // naturally anymore. Fail whatever never reached a worker.
        let orphaned: Vec<BuildTask> = {
            let mut queues = self.shared.queues.lock().await;
            let mut orphaned: Vec<BuildTask> = queues.waiting.drain(..).collect();
            orphaned.extend(queues.in_progress.drain().map(|(_, task)| task));
            orphaned
        };
        for task in &orphaned {
            tracing::warn!(
                repo = task.repository(),
                id = task.id(),
                "cancelling build task during shutdown"
            );
            task.report(BuildStatus::Error, SHUTDOWN_DESCRIPTION);
        }

        // Deferred re-submissions still in flight resolve on their own:
        // each either re-entered the waiting queue before the drain above,
        // or fails fast in add_task.
        loop {
            if self.shared.queues.lock().await.reassigning.is_empty() {
                break;
            }
            tokio::time::sleep(self.shared.reassign_delay).await;
        }

        tracing::info!("dispatcher drained");
    }
}
