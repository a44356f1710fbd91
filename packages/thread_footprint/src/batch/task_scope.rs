use std::sync::Arc;

use tokio::runtime;
use tokio::task::JoinSet;

use crate::batch::{TaskOutcome, TaskTally};

/// Runs one lightweight task per submission on the scheduler that carries lightweight units.
///
/// Tasks are recorded in the tally when the scope drains. A task that panicked counts as failed.
///
/// # Lifecycle
///
/// Dropping the scope blocks the calling thread until every spawned task has finished. It must not
/// be dropped from inside a task running on the same scheduler.
#[derive(Debug)]
pub(crate) struct TaskScope {
    scheduler: runtime::Handle,
    tasks: JoinSet<TaskOutcome>,
    tally: Arc<TaskTally>,
}

impl TaskScope {
    pub(crate) fn new(scheduler: runtime::Handle, tally: Arc<TaskTally>) -> Self {
        Self {
            scheduler,
            tasks: JoinSet::new(),
            tally,
        }
    }

    pub(crate) fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = TaskOutcome> + Send + 'static,
    {
        self.tasks.spawn_on(task, &self.scheduler);
    }

    fn drain(&mut self) {
        let tasks = &mut self.tasks;
        let tally = &self.tally;

        self.scheduler.block_on(async {
            while let Some(result) = tasks.join_next().await {
                tally.record(result.unwrap_or(TaskOutcome::Failed));
            }
        });
    }
}

impl Drop for TaskScope {
    #[cfg_attr(test, mutants::skip)] // Impractical to test that stuff stops happening.
    fn drop(&mut self) {
        self.drain();
    }
}
