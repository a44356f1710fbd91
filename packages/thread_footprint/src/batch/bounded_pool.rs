use std::num::NonZero;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::batch::queue::{Job, JobSender, job_queue};
use crate::{ExecutionUnitKind, HarnessError, Result};

const ERR_POISONED_LOCK: &str = "pool job queue lock poisoned - a worker panicked outside a job";

/// Fixed-capacity pool of heavyweight workers sharing one job queue.
///
/// Workers are started on demand: each submission starts a new worker (which takes that job as its
/// first) until `capacity` workers exist. After that, submissions are queued and claimed by
/// whichever worker frees up first.
///
/// # Lifecycle
///
/// Dropping the pool closes the queue and waits for every queued job to run and every worker to
/// exit.
#[derive(Debug)]
pub(crate) struct BoundedPool {
    sender: Option<JobSender>,
    receiver: Arc<Mutex<Receiver<Job>>>,
    workers: Vec<JoinHandle<()>>,
    capacity: NonZero<usize>,
    stack_size: usize,
}

impl BoundedPool {
    pub(crate) fn new(
        capacity: NonZero<usize>,
        stack_size: usize,
        queue_bound: Option<NonZero<usize>>,
    ) -> Self {
        let (sender, receiver) = job_queue(queue_bound);

        Self {
            sender: Some(sender),
            receiver: Arc::new(Mutex::new(receiver)),
            workers: Vec::with_capacity(capacity.get()),
            capacity,
            stack_size,
        }
    }

    /// Number of workers started so far. Never exceeds the capacity.
    #[cfg(test)]
    pub(crate) fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Hands `job` to a new worker if the pool is below capacity, otherwise queues it.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::UnitCreation`] if a new worker cannot be started. Jobs that were
    /// already accepted still run when the pool is dropped.
    pub(crate) fn submit(&mut self, job: Job) -> Result<()> {
        if self.workers.len() < self.capacity.get() {
            return self.start_worker(job);
        }

        self.sender
            .as_ref()
            .expect("sender is only taken during drop")
            .send(job)
            .map_err(|_job| ())
            .expect("workers only exit after the sender is dropped");

        Ok(())
    }

    fn start_worker(&mut self, first_job: Job) -> Result<()> {
        let name = format!("bounded-pool-{}", self.workers.len());
        let receiver = Arc::clone(&self.receiver);

        let handle = thread::Builder::new()
            .name(name.clone())
            .stack_size(self.stack_size)
            .spawn(move || {
                first_job();
                worker_entrypoint(&receiver);
            })
            .map_err(|source| HarnessError::UnitCreation {
                name,
                kind: ExecutionUnitKind::Heavyweight,
                source,
            })?;

        self.workers.push(handle);
        Ok(())
    }
}

fn worker_entrypoint(receiver: &Mutex<Receiver<Job>>) {
    loop {
        // The guard is released before the job runs so that other workers can claim jobs.
        let job = receiver.lock().expect(ERR_POISONED_LOCK).recv();

        match job {
            Ok(job) => job(),
            // The pool closed the queue and everything in it has been claimed.
            Err(_) => break,
        }
    }
}

impl Drop for BoundedPool {
    #[cfg_attr(test, mutants::skip)] // Impractical to test that stuff stops happening.
    fn drop(&mut self) {
        drop(self.sender.take());

        for worker in self.workers.drain(..) {
            // Jobs catch their own panics, so a failed join can only mean the queue lock was
            // poisoned. There is nothing left to drain in that case.
            _ = worker.join();
        }
    }
}
