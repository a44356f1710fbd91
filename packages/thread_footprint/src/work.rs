use std::hint::black_box;
use std::time::Duration;

use crate::{Interrupt, Interrupted};

/// The code that runs inside every measured execution unit and every batch task.
///
/// Each implementation provides the same logical work in two forms: a blocking form for
/// heavyweight units, which own a whole thread, and an async form for lightweight units, which must
/// release their scheduler worker whenever they wait.
///
/// Both forms return a checksum of the computation so that the work cannot be optimized away and
/// so that callers can tell a completed run apart from an interrupted one.
pub trait Payload: Send + Sync + 'static {
    /// Runs the payload to completion on the current thread, blocking it while waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if `interrupt` is raised before the work completes.
    fn run_blocking(&self, interrupt: &Interrupt) -> Result<u64, Interrupted>;

    /// Runs the payload to completion as part of an async task.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if `interrupt` is raised before the work completes.
    fn run_async(
        &self,
        interrupt: Interrupt,
    ) -> impl Future<Output = Result<u64, Interrupted>> + Send;
}

/// Fixed, deterministic work: suspend briefly, then sum a fixed range of integers.
///
/// The same `WorkUnit` value is used for every unit kind and every batch strategy, so that any
/// difference in memory or time is caused by the execution mechanism and not by the work itself.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use thread_footprint::{Interrupt, Payload, WorkUnit};
///
/// let work = WorkUnit::new(Duration::from_millis(1), 1000);
/// let checksum = work.run_blocking(&Interrupt::new()).unwrap();
///
/// assert_eq!(checksum, 499_500);
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WorkUnit {
    sleep: Duration,
    iterations: u64,
}

impl WorkUnit {
    /// Creates a work unit that suspends for `sleep` and then sums `0..iterations`.
    #[must_use]
    pub const fn new(sleep: Duration, iterations: u64) -> Self {
        Self { sleep, iterations }
    }

    /// How long the unit suspends before computing.
    #[must_use]
    pub const fn sleep(&self) -> Duration {
        self.sleep
    }

    /// How many integers the unit sums.
    #[must_use]
    pub const fn iterations(&self) -> u64 {
        self.iterations
    }

    fn compute(&self) -> u64 {
        (0..black_box(self.iterations)).fold(0_u64, u64::wrapping_add)
    }
}

impl Default for WorkUnit {
    fn default() -> Self {
        Self::new(
            crate::config::DEFAULT_WORK_SLEEP,
            crate::config::DEFAULT_WORK_ITERATIONS,
        )
    }
}

impl Payload for WorkUnit {
    fn run_blocking(&self, interrupt: &Interrupt) -> Result<u64, Interrupted> {
        interrupt.sleep_blocking(self.sleep)?;
        Ok(self.compute())
    }

    fn run_async(
        &self,
        interrupt: Interrupt,
    ) -> impl Future<Output = Result<u64, Interrupted>> + Send {
        async move {
            interrupt.sleep(self.sleep).await?;
            Ok(self.compute())
        }
    }
}

/// How the work inside one execution unit ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum WorkOutcome {
    /// The payload ran to completion.
    Completed {
        /// Checksum returned by the payload.
        checksum: u64,
    },

    /// The payload observed the interrupt and unwound early.
    Interrupted,
}

impl From<Result<u64, Interrupted>> for WorkOutcome {
    fn from(result: Result<u64, Interrupted>) -> Self {
        match result {
            Ok(checksum) => Self::Completed { checksum },
            Err(Interrupted) => Self::Interrupted,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn default_work_matches_configured_constants() {
        let work = WorkUnit::default();

        assert_eq!(work.sleep(), Duration::from_millis(100));
        assert_eq!(work.iterations(), 1000);
    }

    #[test]
    fn blocking_and_async_forms_agree() {
        let work = WorkUnit::new(Duration::from_millis(1), 1000);
        let interrupt = Interrupt::new();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        let blocking = work.run_blocking(&interrupt).unwrap();
        let asynchronous = runtime.block_on(work.run_async(interrupt)).unwrap();

        assert_eq!(blocking, 499_500);
        assert_eq!(asynchronous, blocking);
    }

    #[test]
    fn blocking_form_suspends_before_computing() {
        let work = WorkUnit::new(Duration::from_millis(30), 10);

        let started = Instant::now();
        work.run_blocking(&Interrupt::new()).unwrap();

        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn raised_interrupt_unwinds_without_computing() {
        let work = WorkUnit::new(Duration::from_secs(30), 1000);
        let interrupt = Interrupt::new();
        interrupt.raise();

        let result = work.run_blocking(&interrupt);

        assert_eq!(result, Err(Interrupted));
        assert_eq!(WorkOutcome::from(result), WorkOutcome::Interrupted);
        // The latch still records the cancellation after the work unwound.
        assert!(interrupt.is_raised());
    }

    #[test]
    fn zero_iterations_sum_to_zero() {
        let work = WorkUnit::new(Duration::ZERO, 0);

        assert_eq!(work.run_blocking(&Interrupt::new()), Ok(0));
    }
}
