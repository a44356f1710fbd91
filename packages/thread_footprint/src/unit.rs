use std::num::NonZero;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use derive_more::Display;
use tokio::runtime::{self, Runtime};
use tracing::debug;

use crate::pal::{Platform, PlatformFacade};
use crate::{HarnessConfig, HarnessError, Interrupt, Payload, Result, WorkOutcome, WorkUnit};

/// The two concurrency primitives whose cost the harness compares.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum ExecutionUnitKind {
    /// An operating system thread with a fixed stack reserved when it is created.
    #[display("platform thread")]
    Heavyweight,

    /// A task multiplexed onto a small set of scheduler worker threads. It has no stack of its own;
    /// its state lives in a heap allocation sized to what it actually holds across suspensions.
    #[display("virtual thread")]
    Lightweight,
}

impl ExecutionUnitKind {
    /// Both kinds, in the order the probe measures them.
    pub const ALL: [Self; 2] = [Self::Heavyweight, Self::Lightweight];
}

/// One started unit of concurrency running the factory's payload.
///
/// The unit is owned by whoever created it until it is joined. Joining releases the resources of
/// the unit (its stack for a heavyweight unit, its task allocation for a lightweight unit).
#[derive(Debug)]
pub struct ExecutionUnit {
    name: String,
    kind: ExecutionUnitKind,
    handle: UnitHandle,
}

#[derive(Debug)]
enum UnitHandle {
    Thread(thread::JoinHandle<WorkOutcome>),
    Task {
        handle: tokio::task::JoinHandle<WorkOutcome>,
        scheduler: runtime::Handle,
    },
}

impl ExecutionUnit {
    /// The name the unit was created with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The kind of the unit.
    #[must_use]
    pub fn kind(&self) -> ExecutionUnitKind {
        self.kind
    }

    /// Whether the unit has finished running its payload.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        match &self.handle {
            UnitHandle::Thread(handle) => handle.is_finished(),
            UnitHandle::Task { handle, .. } => handle.is_finished(),
        }
    }

    /// Blocks the calling thread until the unit has finished and its resources are released.
    ///
    /// Must not be called from inside a lightweight unit.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::UnitPanicked`] if the payload panicked.
    pub fn join(self) -> Result<WorkOutcome> {
        let Self { name, handle, .. } = self;

        match handle {
            UnitHandle::Thread(handle) => handle
                .join()
                .map_err(|_panic_payload| HarnessError::UnitPanicked { name }),
            UnitHandle::Task { handle, scheduler } => scheduler
                .block_on(handle)
                .map_err(|_join_error| HarnessError::UnitPanicked { name }),
        }
    }
}

/// Creates started execution units of either kind, all running the same payload.
///
/// The factory owns the scheduler that carries lightweight units. The scheduler is started and
/// primed when the factory is created, so that its worker threads and timer state already exist
/// before anything is measured and are never attributed to a single lightweight unit.
#[derive(Debug)]
pub struct ExecutionUnitFactory<P = WorkUnit> {
    payload: Arc<P>,
    scheduler: Runtime,
    stack_size: usize,
    interrupt: Interrupt,
}

impl ExecutionUnitFactory<WorkUnit> {
    /// Creates a factory whose units run the configured [`WorkUnit`].
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::SchedulerStartup`] if the lightweight scheduler cannot be started.
    pub fn new(config: &HarnessConfig, interrupt: Interrupt) -> Result<Self> {
        Self::with_payload(config.work, config, interrupt)
    }
}

impl<P: Payload> ExecutionUnitFactory<P> {
    /// Creates a factory whose units run `payload`.
    ///
    /// Every unit observes `interrupt`; raising it makes running payloads unwind early.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::SchedulerStartup`] if the lightweight scheduler cannot be started.
    pub fn with_payload(payload: P, config: &HarnessConfig, interrupt: Interrupt) -> Result<Self> {
        // Before the scheduler threads exist, so that none of them reserves an arena of its own.
        PlatformFacade::target().limit_allocator_arenas();

        let scheduler = start_scheduler(config.scheduler_workers)?;

        Ok(Self {
            payload: Arc::new(payload),
            scheduler,
            stack_size: config.heavyweight_stack_size,
            interrupt,
        })
    }

    /// Creates and starts one execution unit of `kind` named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::UnitCreation`] if the operating system refuses to create a
    /// heavyweight unit. The caller must treat this as fatal.
    pub fn create(
        &self,
        name: impl Into<String>,
        kind: ExecutionUnitKind,
    ) -> Result<ExecutionUnit> {
        let name = name.into();
        let payload = Arc::clone(&self.payload);
        let interrupt = self.interrupt.clone();

        debug!(name, %kind, "creating execution unit");

        let handle = match kind {
            ExecutionUnitKind::Heavyweight => {
                let handle = thread::Builder::new()
                    .name(name.clone())
                    .stack_size(self.stack_size)
                    .spawn(move || WorkOutcome::from(payload.run_blocking(&interrupt)))
                    .map_err(|source| HarnessError::UnitCreation {
                        name: name.clone(),
                        kind,
                        source,
                    })?;

                UnitHandle::Thread(handle)
            }
            ExecutionUnitKind::Lightweight => UnitHandle::Task {
                handle: self.scheduler.spawn(async move {
                    WorkOutcome::from(payload.run_async(interrupt).await)
                }),
                scheduler: self.scheduler.handle().clone(),
            },
        };

        Ok(ExecutionUnit { name, kind, handle })
    }

    /// Stack reserved for every heavyweight unit, in bytes.
    #[must_use]
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// The interrupt every unit of this factory observes.
    #[must_use]
    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Handle to the scheduler that carries lightweight units.
    #[must_use]
    pub fn scheduler(&self) -> &runtime::Handle {
        self.scheduler.handle()
    }

    pub(crate) fn payload(&self) -> &Arc<P> {
        &self.payload
    }
}

const PRIMING_SLEEP: Duration = Duration::from_millis(1);

fn start_scheduler(workers: Option<NonZero<usize>>) -> Result<Runtime> {
    let mut builder = runtime::Builder::new_multi_thread();
    builder.enable_all().thread_name("lightweight-carrier");

    if let Some(workers) = workers {
        builder.worker_threads(workers.get());
    }

    let scheduler = builder.build().map_err(HarnessError::SchedulerStartup)?;

    // One timed task, run to completion from the controller thread, allocates the timer wheel and
    // the controller's own scheduler context up front.
    scheduler
        .block_on(async { tokio::spawn(tokio::time::sleep(PRIMING_SLEEP)).await })
        .map_err(|e| HarnessError::SchedulerStartup(std::io::Error::other(e)))?;

    Ok(scheduler)
}
