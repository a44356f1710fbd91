use std::num::NonZero;
use std::time::Duration;

use new_zealand::nz;

use crate::{MemoryMetric, WorkUnit};

pub(crate) const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);
pub(crate) const DEFAULT_STABILIZATION_DELAY: Duration = Duration::from_millis(200);
pub(crate) const DEFAULT_INTER_PROBE_PAUSE: Duration = Duration::from_millis(1000);
pub(crate) const DEFAULT_WORK_SLEEP: Duration = Duration::from_millis(100);
pub(crate) const DEFAULT_WORK_ITERATIONS: u64 = 1000;
pub(crate) const DEFAULT_HEAVYWEIGHT_STACK_SIZE: usize = 1024 * 1024;
pub(crate) const DEFAULT_BATCH_TASK_COUNT: NonZero<usize> = nz!(1000);
pub(crate) const DEFAULT_BOUNDED_POOL_CAPACITY: NonZero<usize> = nz!(1000);
pub(crate) const DEFAULT_IDLE_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Tunables shared by the memory probe and the batch throughput harness.
///
/// The defaults reproduce the reference measurement: 500 ms settle delay, 200 ms stabilization
/// delay, 100 ms of suspension inside each work unit, 1 MiB heavyweight stacks and batches of 1000
/// tasks.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use new_zealand::nz;
/// use thread_footprint::HarnessConfig;
///
/// let config = HarnessConfig::default()
///     .settle_delay(Duration::from_millis(50))
///     .batch_task_count(nz!(200))
///     .bounded_pool_capacity(nz!(20));
/// ```
#[derive(Clone, Debug)]
pub struct HarnessConfig {
    pub(crate) settle_delay: Duration,
    pub(crate) stabilization_delay: Duration,
    pub(crate) inter_probe_pause: Duration,
    pub(crate) work: WorkUnit,
    pub(crate) heavyweight_stack_size: usize,
    pub(crate) memory_metric: MemoryMetric,
    pub(crate) batch_task_count: NonZero<usize>,
    pub(crate) bounded_pool_capacity: NonZero<usize>,
    pub(crate) queue_bound: Option<NonZero<usize>>,
    pub(crate) idle_keep_alive: Duration,
    pub(crate) scheduler_workers: Option<NonZero<usize>>,
}

impl HarnessConfig {
    /// Pause after each reclaim pass before used-memory is read.
    #[must_use]
    pub fn settle_delay(mut self, value: Duration) -> Self {
        self.settle_delay = value;
        self
    }

    /// Pause between starting the measured unit and taking the second snapshot.
    ///
    /// Whether the snapshot lands in the middle of the unit's work or after it depends on this
    /// value relative to the work unit's own suspension, so it is left tunable.
    #[must_use]
    pub fn stabilization_delay(mut self, value: Duration) -> Self {
        self.stabilization_delay = value;
        self
    }

    /// Pause between the heavyweight probe and the lightweight probe.
    #[must_use]
    pub fn inter_probe_pause(mut self, value: Duration) -> Self {
        self.inter_probe_pause = value;
        self
    }

    /// The work executed by every unit and every batch task.
    #[must_use]
    pub fn work(mut self, value: WorkUnit) -> Self {
        self.work = value;
        self
    }

    /// Stack reserved for each heavyweight unit, in bytes.
    #[must_use]
    pub fn heavyweight_stack_size(mut self, value: usize) -> Self {
        self.heavyweight_stack_size = value;
        self
    }

    /// Which process memory figure the snapshots read.
    #[must_use]
    pub fn memory_metric(mut self, value: MemoryMetric) -> Self {
        self.memory_metric = value;
        self
    }

    /// Number of tasks submitted by each batch run of the driver.
    #[must_use]
    pub fn batch_task_count(mut self, value: NonZero<usize>) -> Self {
        self.batch_task_count = value;
        self
    }

    /// Upper limit on the number of workers in the bounded pool.
    #[must_use]
    pub fn bounded_pool_capacity(mut self, value: NonZero<usize>) -> Self {
        self.bounded_pool_capacity = value;
        self
    }

    /// Maximum number of submitted-but-unclaimed tasks a pool queue holds before submission blocks.
    ///
    /// `None` lets the queue grow without limit.
    #[must_use]
    pub fn queue_bound(mut self, value: Option<NonZero<usize>>) -> Self {
        self.queue_bound = value;
        self
    }

    /// How long an idle worker of the unbounded pool waits for new work before retiring.
    #[must_use]
    pub fn idle_keep_alive(mut self, value: Duration) -> Self {
        self.idle_keep_alive = value;
        self
    }

    /// Number of scheduler worker threads that carry lightweight units.
    ///
    /// `None` uses one worker per available processor.
    #[must_use]
    pub fn scheduler_workers(mut self, value: Option<NonZero<usize>>) -> Self {
        self.scheduler_workers = value;
        self
    }

    /// Bounded pool size used for a batch of `task_count` tasks.
    ///
    /// This is `min(task_count, bounded_pool_capacity)`.
    pub(crate) fn pool_capacity_for(&self, task_count: NonZero<usize>) -> NonZero<usize> {
        task_count.min(self.bounded_pool_capacity)
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            stabilization_delay: DEFAULT_STABILIZATION_DELAY,
            inter_probe_pause: DEFAULT_INTER_PROBE_PAUSE,
            work: WorkUnit::default(),
            heavyweight_stack_size: DEFAULT_HEAVYWEIGHT_STACK_SIZE,
            memory_metric: MemoryMetric::default(),
            batch_task_count: DEFAULT_BATCH_TASK_COUNT,
            bounded_pool_capacity: DEFAULT_BOUNDED_POOL_CAPACITY,
            queue_bound: None,
            idle_keep_alive: DEFAULT_IDLE_KEEP_ALIVE,
            scheduler_workers: None,
        }
    }
}
