use std::mem;
use std::num::NonZero;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::batch::queue::{Job, JobSender, job_queue};
use crate::{ExecutionUnitKind, HarnessError, Result};

const ERR_POISONED_LOCK: &str = "pool state lock poisoned - a worker panicked outside a job";

/// Pool of heavyweight workers with no upper limit.
///
/// A submission is handed to an idle worker if there is one, otherwise a new worker is started for
/// it. A worker that stays idle for longer than the keep-alive period retires.
///
/// # Lifecycle
///
/// Dropping the pool closes the queue and waits for every queued job to run and every worker to
/// exit.
#[derive(Debug)]
pub(crate) struct UnboundedPool {
    sender: Option<JobSender>,
    shared: Arc<Shared>,
    stack_size: usize,
}

#[derive(Debug)]
struct Shared {
    receiver: Mutex<Receiver<Job>>,
    state: Mutex<PoolState>,
    keep_alive: Duration,
}

#[derive(Debug, Default)]
struct PoolState {
    // Workers waiting for a job that no submitter has claimed yet.
    idle: usize,
    started: usize,
    workers: Vec<JoinHandle<()>>,
}

impl UnboundedPool {
    pub(crate) fn new(
        stack_size: usize,
        keep_alive: Duration,
        queue_bound: Option<NonZero<usize>>,
    ) -> Self {
        let (sender, receiver) = job_queue(queue_bound);

        Self {
            sender: Some(sender),
            shared: Arc::new(Shared {
                receiver: Mutex::new(receiver),
                state: Mutex::new(PoolState::default()),
                keep_alive,
            }),
            stack_size,
        }
    }

    /// Total number of workers started over the lifetime of the pool.
    #[cfg(test)]
    pub(crate) fn started_workers(&self) -> usize {
        self.shared.state.lock().expect(ERR_POISONED_LOCK).started
    }

    /// Hands `job` to an idle worker, or starts a new worker for it if none is idle.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::UnitCreation`] if a new worker cannot be started. Jobs that were
    /// already accepted still run when the pool is dropped.
    pub(crate) fn submit(&mut self, job: Job) -> Result<()> {
        let mut state = self.shared.state.lock().expect(ERR_POISONED_LOCK);

        if state.idle > 0 {
            // Claim the idle worker. It will not retire while a job is queued for it.
            state.idle -= 1;
            drop(state);

            self.sender
                .as_ref()
                .expect("sender is only taken during drop")
                .send(job)
                .map_err(|_job| ())
                .expect("workers only exit after the sender is dropped");

            return Ok(());
        }

        let name = format!("unbounded-pool-{}", state.started);
        let shared = Arc::clone(&self.shared);

        let handle = thread::Builder::new()
            .name(name.clone())
            .stack_size(self.stack_size)
            .spawn(move || {
                job();
                worker_entrypoint(&shared);
            })
            .map_err(|source| HarnessError::UnitCreation {
                name,
                kind: ExecutionUnitKind::Heavyweight,
                source,
            })?;

        state.started += 1;
        state.workers.push(handle);

        Ok(())
    }
}

fn worker_entrypoint(shared: &Shared) {
    loop {
        shared.state.lock().expect(ERR_POISONED_LOCK).idle += 1;

        let job = loop {
            let received = shared
                .receiver
                .lock()
                .expect(ERR_POISONED_LOCK)
                .recv_timeout(shared.keep_alive);

            match received {
                Ok(job) => break job,
                Err(RecvTimeoutError::Timeout) => {
                    let mut state = shared.state.lock().expect(ERR_POISONED_LOCK);

                    if state.idle > 0 {
                        state.idle -= 1;
                        return;
                    }

                    // A submitter claimed this worker just before the timeout; its job is queued.
                }
                Err(RecvTimeoutError::Disconnected) => return,
            }
        };

        job();
    }
}

impl Drop for UnboundedPool {
    #[cfg_attr(test, mutants::skip)] // Impractical to test that stuff stops happening.
    fn drop(&mut self) {
        drop(self.sender.take());

        // Workers need the state lock to go idle, so it must not be held while joining.
        let workers = mem::take(&mut self.shared.state.lock().expect(ERR_POISONED_LOCK).workers);

        for worker in workers {
            _ = worker.join();
        }
    }
}
