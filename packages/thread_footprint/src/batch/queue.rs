use std::num::NonZero;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};

/// A unit of work submitted to one of the worker pools.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Sending half of a pool's job queue.
///
/// With a bound, `send` blocks while the queue already holds that many unclaimed jobs.
#[derive(Debug)]
pub(crate) enum JobSender {
    Unbounded(Sender<Job>),
    Bounded(SyncSender<Job>),
}

impl JobSender {
    /// Enqueues a job. Returns the job back if every receiver is gone.
    pub(crate) fn send(&self, job: Job) -> Result<(), Job> {
        match self {
            Self::Unbounded(sender) => sender.send(job).map_err(|e| e.0),
            Self::Bounded(sender) => sender.send(job).map_err(|e| e.0),
        }
    }
}

pub(crate) fn job_queue(bound: Option<NonZero<usize>>) -> (JobSender, Receiver<Job>) {
    match bound {
        Some(bound) => {
            let (sender, receiver) = mpsc::sync_channel(bound.get());
            (JobSender::Bounded(sender), receiver)
        }
        None => {
            let (sender, receiver) = mpsc::channel();
            (JobSender::Unbounded(sender), receiver)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::TryRecvError;

    use new_zealand::nz;

    use super::*;

    #[test]
    fn unbounded_queue_accepts_many_jobs_without_a_reader() {
        let (sender, receiver) = job_queue(None);

        for _ in 0..100 {
            assert!(sender.send(Box::new(|| {})).is_ok());
        }

        let mut received = 0;
        while receiver.try_recv().is_ok() {
            received += 1;
        }

        assert_eq!(received, 100);
    }

    #[test]
    fn send_fails_once_receiver_is_gone() {
        let (sender, receiver) = job_queue(Some(nz!(4)));
        drop(receiver);

        assert!(sender.send(Box::new(|| {})).is_err());
    }

    #[test]
    fn bounded_queue_holds_up_to_its_bound() {
        let (sender, receiver) = job_queue(Some(nz!(2)));

        assert!(sender.send(Box::new(|| {})).is_ok());
        assert!(sender.send(Box::new(|| {})).is_ok());

        let JobSender::Bounded(inner) = &sender else {
            panic!("bounded queue must use a synchronous sender");
        };
        assert!(inner.try_send(Box::new(|| {})).is_err());

        assert!(receiver.try_recv().is_ok());
        assert!(receiver.try_recv().is_ok());
        assert!(matches!(receiver.try_recv(), Err(TryRecvError::Empty)));
    }
}
