//! Batch throughput: how long it takes to push many copies of the work unit through different
//! execution strategies and wait for all of them.

mod bounded_pool;
mod queue;
mod task_scope;
mod unbounded_pool;

use std::num::NonZero;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{self, AtomicUsize};
use std::time::{Duration, Instant};

use bounded_pool::BoundedPool;
use derive_more::Display;
use queue::Job;
use task_scope::TaskScope;
use tracing::{info, warn};
use unbounded_pool::UnboundedPool;

use crate::{
    ExecutionUnitFactory, HarnessConfig, HarnessError, Interrupt, Interrupted, Payload, Result,
    WorkUnit,
};

/// How a batch of tasks is executed.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum BatchStrategy {
    /// A fixed number of heavyweight workers, capped at the batch size, pull tasks from a shared
    /// queue.
    #[display("bounded platform thread pool")]
    BoundedPool,

    /// Heavyweight workers are reused while idle and started on demand otherwise, with no upper
    /// limit.
    #[display("unbounded platform thread pool")]
    UnboundedPool,

    /// Every task runs as its own lightweight unit.
    #[display("virtual thread per task")]
    OnePerTask,
}

impl BatchStrategy {
    /// Every strategy, in the order the driver runs them.
    pub const ALL: [Self; 3] = [Self::BoundedPool, Self::UnboundedPool, Self::OnePerTask];
}

/// Timing and outcome counts of one completed batch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BatchResult {
    strategy: BatchStrategy,
    task_count: NonZero<usize>,
    elapsed: Duration,
    completed: usize,
    failed: usize,
}

impl BatchResult {
    /// The strategy that executed the batch.
    #[must_use]
    pub fn strategy(&self) -> BatchStrategy {
        self.strategy
    }

    /// Number of tasks submitted.
    #[must_use]
    pub fn task_count(&self) -> NonZero<usize> {
        self.task_count
    }

    /// Time from just before the first submission until every task had finished.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Number of tasks whose work ran to completion.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Number of tasks that panicked or were interrupted.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed
    }
}

/// Result of one task, as seen by the batch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum TaskOutcome {
    Completed,
    Failed,
}

impl From<std::result::Result<u64, Interrupted>> for TaskOutcome {
    fn from(result: std::result::Result<u64, Interrupted>) -> Self {
        match result {
            Ok(_checksum) => Self::Completed,
            Err(Interrupted) => Self::Failed,
        }
    }
}

/// Shared counters that every task of a batch reports into.
#[derive(Debug, Default)]
pub(crate) struct TaskTally {
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl TaskTally {
    pub(crate) fn record(&self, outcome: TaskOutcome) {
        let counter = match outcome {
            TaskOutcome::Completed => &self.completed,
            TaskOutcome::Failed => &self.failed,
        };

        counter.fetch_add(1, atomic::Ordering::Relaxed);
    }

    pub(crate) fn completed(&self) -> usize {
        self.completed.load(atomic::Ordering::Relaxed)
    }

    pub(crate) fn failed(&self) -> usize {
        self.failed.load(atomic::Ordering::Relaxed)
    }
}

/// Runs batches of the factory's payload through each [`BatchStrategy`] and times them.
///
/// Heavyweight pool workers use the factory's stack size, and lightweight tasks run on the
/// factory's scheduler, so a batch costs exactly what the probe measured for a single unit of the
/// same kind.
///
/// Every batch is drained before [`run()`][Self::run] returns, whatever the outcome. No task of a
/// batch is still running once the next batch starts.
#[derive(Debug)]
pub struct BatchThroughputHarness<'a, P = WorkUnit> {
    factory: &'a ExecutionUnitFactory<P>,
    config: HarnessConfig,
}

impl<'a, P: Payload> BatchThroughputHarness<'a, P> {
    /// Creates a harness that borrows `factory` for its payload, stack size, scheduler and
    /// interrupt, and takes pool settings from `config`.
    #[must_use]
    pub fn new(factory: &'a ExecutionUnitFactory<P>, config: &HarnessConfig) -> Self {
        Self {
            factory,
            config: config.clone(),
        }
    }

    /// Runs the configured number of tasks with `strategy`.
    ///
    /// # Errors
    ///
    /// See [`run()`][Self::run].
    pub fn run_configured(&self, strategy: BatchStrategy) -> Result<BatchResult> {
        self.run(strategy, self.config.batch_task_count)
    }

    /// Number of tasks each [`run_configured()`][Self::run_configured] call submits.
    #[must_use]
    pub fn task_count(&self) -> NonZero<usize> {
        self.config.batch_task_count
    }

    /// Submits `task_count` copies of the payload using `strategy` and waits until all of them
    /// have finished.
    ///
    /// A task that panics or is interrupted is counted as failed; it does not fail the batch.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::UnitCreation`] if a pool worker could not be started, and
    /// [`HarnessError::Interrupted`] if the interrupt was raised during the batch. In both cases
    /// every task that was already accepted has finished before the error is returned.
    pub fn run(&self, strategy: BatchStrategy, task_count: NonZero<usize>) -> Result<BatchResult> {
        let tally = Arc::new(TaskTally::default());

        info!(%strategy, task_count = task_count.get(), "starting batch");

        let started = Instant::now();

        let submitted = match strategy {
            BatchStrategy::BoundedPool => self.run_bounded_pool(task_count, &tally),
            BatchStrategy::UnboundedPool => self.run_unbounded_pool(task_count, &tally),
            BatchStrategy::OnePerTask => {
                self.run_one_per_task(task_count, &tally);
                Ok(())
            }
        };

        let elapsed = started.elapsed();

        submitted?;

        if self.factory.interrupt().is_raised() {
            return Err(HarnessError::Interrupted {
                stage: "running a batch",
            });
        }

        let result = BatchResult {
            strategy,
            task_count,
            elapsed,
            completed: tally.completed(),
            failed: tally.failed(),
        };

        if result.failed > 0 {
            warn!(%strategy, failed = result.failed, "some batch tasks did not complete");
        }

        info!(
            %strategy,
            elapsed = ?result.elapsed,
            completed = result.completed,
            failed = result.failed,
            "batch drained"
        );

        Ok(result)
    }

    fn run_bounded_pool(&self, task_count: NonZero<usize>, tally: &Arc<TaskTally>) -> Result<()> {
        let mut pool = BoundedPool::new(
            self.config.pool_capacity_for(task_count),
            self.factory.stack_size(),
            self.config.queue_bound,
        );

        for _ in 0..task_count.get() {
            pool.submit(self.blocking_task(tally))?;
        }

        // Dropping the pool drains it, also on the early return above.
        drop(pool);
        Ok(())
    }

    fn run_unbounded_pool(&self, task_count: NonZero<usize>, tally: &Arc<TaskTally>) -> Result<()> {
        let mut pool = UnboundedPool::new(
            self.factory.stack_size(),
            self.config.idle_keep_alive,
            self.config.queue_bound,
        );

        for _ in 0..task_count.get() {
            pool.submit(self.blocking_task(tally))?;
        }

        drop(pool);
        Ok(())
    }

    fn run_one_per_task(&self, task_count: NonZero<usize>, tally: &Arc<TaskTally>) {
        let mut scope = TaskScope::new(self.factory.scheduler().clone(), Arc::clone(tally));

        for _ in 0..task_count.get() {
            let payload = Arc::clone(self.factory.payload());
            let interrupt = self.factory.interrupt().clone();

            scope.spawn(async move { TaskOutcome::from(payload.run_async(interrupt).await) });
        }

        drop(scope);
    }

    fn blocking_task(&self, tally: &Arc<TaskTally>) -> Job {
        let payload = Arc::clone(self.factory.payload());
        let interrupt = self.factory.interrupt().clone();
        let tally = Arc::clone(tally);

        Box::new(move || tally.record(run_blocking_task(&*payload, &interrupt)))
    }
}

fn run_blocking_task<P: Payload>(payload: &P, interrupt: &Interrupt) -> TaskOutcome {
    // A panic must not take the pool worker down with it; the task is simply counted as failed.
    panic::catch_unwind(AssertUnwindSafe(|| payload.run_blocking(interrupt)))
        .map_or(TaskOutcome::Failed, TaskOutcome::from)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use new_zealand::nz;
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(BatchResult: Send, Sync);
    assert_impl_all!(BatchThroughputHarness<'static>: Send, Sync);

    const SHORT_WORK: WorkUnit = WorkUnit::new(Duration::from_millis(5), 1000);

    fn config() -> HarnessConfig {
        HarnessConfig::default()
            .work(SHORT_WORK)
            .heavyweight_stack_size(256 * 1024)
            .bounded_pool_capacity(nz!(8))
            .scheduler_workers(Some(nz!(2)))
    }

    /// Runs the real work, then reports whether the run completed through a side channel.
    #[derive(Debug, Default)]
    struct CountingPayload {
        completions: AtomicUsize,
        fail_every_third: bool,
        calls: AtomicUsize,
        panic_instead: AtomicBool,
    }

    impl CountingPayload {
        fn failing_every_third() -> Self {
            Self {
                fail_every_third: true,
                ..Self::default()
            }
        }

        fn should_fail(&self) -> bool {
            let call = self.calls.fetch_add(1, atomic::Ordering::SeqCst);
            self.fail_every_third && call % 3 == 0
        }
    }

    impl Payload for CountingPayload {
        fn run_blocking(&self, interrupt: &Interrupt) -> std::result::Result<u64, Interrupted> {
            let fail = self.should_fail();
            let checksum = SHORT_WORK.run_blocking(interrupt)?;

            if fail {
                if self.panic_instead.load(atomic::Ordering::SeqCst) {
                    panic!("task failure requested by test");
                }
                return Err(Interrupted);
            }

            self.completions.fetch_add(1, atomic::Ordering::SeqCst);
            Ok(checksum)
        }

        async fn run_async(&self, interrupt: Interrupt) -> std::result::Result<u64, Interrupted> {
            let fail = self.should_fail();
            let checksum = SHORT_WORK.run_async(interrupt).await?;

            if fail {
                if self.panic_instead.load(atomic::Ordering::SeqCst) {
                    panic!("task failure requested by test");
                }
                return Err(Interrupted);
            }

            self.completions.fetch_add(1, atomic::Ordering::SeqCst);
            Ok(checksum)
        }
    }

    #[test]
    fn every_strategy_runs_every_task_exactly_once() {
        let config = config();

        for strategy in BatchStrategy::ALL {
            let factory = ExecutionUnitFactory::with_payload(
                CountingPayload::default(),
                &config,
                Interrupt::new(),
            )
            .unwrap();
            let harness = BatchThroughputHarness::new(&factory, &config);

            let result = harness.run(strategy, nz!(40)).unwrap();

            assert_eq!(result.strategy(), strategy);
            assert_eq!(result.task_count(), nz!(40));
            assert_eq!(result.completed(), 40, "{strategy}");
            assert_eq!(result.failed(), 0, "{strategy}");
            assert_eq!(
                factory.payload().completions.load(atomic::Ordering::SeqCst),
                40,
                "{strategy}"
            );
        }
    }

    #[test]
    fn configured_task_count_is_used() {
        let config = config().batch_task_count(nz!(12));
        let factory = ExecutionUnitFactory::new(&config, Interrupt::new()).unwrap();
        let harness = BatchThroughputHarness::new(&factory, &config);

        assert_eq!(harness.task_count(), nz!(12));

        let result = harness.run_configured(BatchStrategy::BoundedPool).unwrap();

        assert_eq!(result.task_count(), nz!(12));
        assert_eq!(result.completed(), 12);
    }

    #[test]
    fn failed_tasks_are_counted_not_fatal() {
        let config = config();

        for strategy in BatchStrategy::ALL {
            let factory = ExecutionUnitFactory::with_payload(
                CountingPayload::failing_every_third(),
                &config,
                Interrupt::new(),
            )
            .unwrap();
            let harness = BatchThroughputHarness::new(&factory, &config);

            let result = harness.run(strategy, nz!(9)).unwrap();

            assert_eq!(result.completed(), 6, "{strategy}");
            assert_eq!(result.failed(), 3, "{strategy}");
        }
    }

    #[test]
    fn panicking_tasks_are_counted_not_fatal() {
        let config = config();

        for strategy in BatchStrategy::ALL {
            let payload = CountingPayload::failing_every_third();
            payload.panic_instead.store(true, atomic::Ordering::SeqCst);

            let factory =
                ExecutionUnitFactory::with_payload(payload, &config, Interrupt::new()).unwrap();
            let harness = BatchThroughputHarness::new(&factory, &config);

            let result = harness.run(strategy, nz!(6)).unwrap();

            assert_eq!(result.completed(), 4, "{strategy}");
            assert_eq!(result.failed(), 2, "{strategy}");
        }
    }

    #[test]
    fn one_per_task_outpaces_a_small_bounded_pool() {
        let work = WorkUnit::new(Duration::from_millis(50), 1000);
        let config = config().work(work).bounded_pool_capacity(nz!(2));
        let factory = ExecutionUnitFactory::new(&config, Interrupt::new()).unwrap();
        let harness = BatchThroughputHarness::new(&factory, &config);

        let pooled = harness.run(BatchStrategy::BoundedPool, nz!(8)).unwrap();
        let per_task = harness.run(BatchStrategy::OnePerTask, nz!(8)).unwrap();

        // Two workers need four rounds of 50 ms; eight tasks suspend concurrently in one round.
        assert!(pooled.elapsed() >= Duration::from_millis(200));
        assert!(per_task.elapsed() < pooled.elapsed());
    }

    #[test]
    fn raised_interrupt_fails_the_batch_after_draining() {
        let config = config().work(WorkUnit::new(Duration::from_secs(30), 1000));

        for strategy in BatchStrategy::ALL {
            let interrupt = Interrupt::new();
            let factory = ExecutionUnitFactory::new(&config, interrupt.clone()).unwrap();
            let harness = BatchThroughputHarness::new(&factory, &config);

            interrupt.raise();

            let started = Instant::now();
            let result = harness.run(strategy, nz!(16));

            assert!(
                matches!(result, Err(HarnessError::Interrupted { .. })),
                "{strategy}: {result:?}"
            );
            assert!(started.elapsed() < Duration::from_secs(10), "{strategy}");
        }
    }

    #[test]
    fn blocking_task_boundary_catches_panics() {
        #[derive(Debug)]
        struct Panicking;

        impl Payload for Panicking {
            fn run_blocking(
                &self,
                _interrupt: &Interrupt,
            ) -> std::result::Result<u64, Interrupted> {
                panic!("task failure requested by test");
            }

            async fn run_async(
                &self,
                _interrupt: Interrupt,
            ) -> std::result::Result<u64, Interrupted> {
                panic!("task failure requested by test");
            }
        }

        assert_eq!(
            run_blocking_task(&Panicking, &Interrupt::new()),
            TaskOutcome::Failed
        );
        assert_eq!(
            run_blocking_task(&SHORT_WORK, &Interrupt::new()),
            TaskOutcome::Completed
        );
    }
}
