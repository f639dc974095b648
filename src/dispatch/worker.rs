use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};

use super::task::BuildTask;
use super::{Processor, Shared};

/// One slot of the worker pool.
///
/// Workers race for tasks on the shared bounded channel and run until the
/// shutdown signal flips. A stop is only observed between tasks; a build
/// that is already running is always allowed to finish.
pub(super) struct Worker {
    id: usize,
    pool: Arc<Mutex<mpsc::Receiver<BuildTask>>>,
    stop: watch::Receiver<bool>,
    processor: Arc<dyn Processor>,
    shared: Arc<Shared>,
}

impl Worker {
    pub(super) fn new(
        id: usize,
        pool: Arc<Mutex<mpsc::Receiver<BuildTask>>>,
        stop: watch::Receiver<bool>,
        processor: Arc<dyn Processor>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            id,
            pool,
            stop,
            processor,
            shared,
        }
    }

    pub(super) async fn run(mut self) {
        tracing::debug!(worker = self.id, "worker started");

        loop {
            let next = {
                let pool = Arc::clone(&self.pool);
                tokio::select! {
                    // Check the stop signal first so a pending shutdown wins
                    // over a task parked in the channel.
                    biased;
                    _ = self.stop.changed() => None,
                    task = async move { pool.lock().await.recv().await } => task,
                }
            };

            let Some(task) = next else { break };
            self.process(task).await;
        }

        tracing::debug!(worker = self.id, "worker stopped");
    }

    async fn process(&self, task: BuildTask) {
        tracing::info!(
            worker = self.id,
            repo = task.repository(),
            id = task.id(),
            "processing build task"
        );

        // The processor reports its own outcome through the task callback;
        // the worker does not interpret it.
        self.processor.process(&task).await;

        // Free the repository for the next queued task regardless of outcome.
        self.shared.finish(&task).await;

        tracing::debug!(
            worker = self.id,
            repo = task.repository(),
            id = task.id(),
            "build task finished"
        );
    }
}
