use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rsevents::{Awaitable, EventState, ManualResetEvent};
use thiserror::Error;
use tokio::sync::Notify;

/// Signals that a suspension point was cut short because the controlling context was interrupted.
#[derive(Clone, Copy, Debug, Default, Eq, Error, PartialEq)]
#[error("execution was interrupted")]
#[expect(
    clippy::exhaustive_structs,
    reason = "payload implementations outside the crate need to construct it"
)]
pub struct Interrupted;

/// Cooperative cancellation latch shared between the controller and the execution units it starts.
///
/// Once raised, the latch stays raised: every current and future wait on it returns
/// [`Interrupted`]. Heavyweight units wait on it by blocking their own thread, lightweight units
/// wait on it asynchronously so the scheduler worker is released while they wait.
///
/// Cloning is cheap and every clone observes the same latch.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use thread_footprint::Interrupt;
///
/// let interrupt = Interrupt::new();
/// assert!(interrupt.sleep_blocking(Duration::from_millis(1)).is_ok());
///
/// interrupt.raise();
/// assert!(interrupt.is_raised());
/// assert!(interrupt.sleep_blocking(Duration::from_secs(60)).is_err());
/// ```
#[derive(Clone)]
pub struct Interrupt {
    inner: Arc<Inner>,
}

struct Inner {
    event: ManualResetEvent,
    notify: Notify,
}

impl Interrupt {
    /// Creates a latch in the "not raised" state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                event: ManualResetEvent::new(EventState::Unset),
                notify: Notify::new(),
            }),
        }
    }

    /// Raises the latch, waking every waiter.
    pub fn raise(&self) {
        self.inner.event.set();
        self.inner.notify.notify_waiters();
    }

    /// Whether the latch has been raised.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.inner.event.wait0()
    }

    /// Blocks the calling thread for `duration` unless the latch is raised first.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the latch is raised before or during the wait.
    pub fn sleep_blocking(&self, duration: Duration) -> Result<(), Interrupted> {
        if self.inner.event.wait_for(duration) {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    /// Suspends the calling task for `duration` unless the latch is raised first.
    ///
    /// The scheduler worker running the task is free to run other tasks during the wait.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the latch is raised before or during the wait.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        tokio::select! {
            biased;
            () = self.raised() => Err(Interrupted),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Completes once the latch has been raised.
    pub async fn raised(&self) {
        loop {
            // Registered before the check, so a raise between the check and the await still
            // wakes us.
            let notified = self.inner.notify.notified();

            if self.is_raised() {
                return;
            }

            notified.await;
        }
    }
}

impl fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupt")
            .field("raised", &self.is_raised())
            .finish()
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}
