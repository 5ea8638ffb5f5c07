//! Background compaction workers.

use crate::error::{Error, Result};
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed pool of threads running compaction jobs.
///
/// Jobs are queued on a shared channel; each submission gets its own
/// single-slot channel for the result. Dropping the executor lets queued
/// jobs finish and joins the workers.
pub struct CompactExecutor {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for CompactExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactExecutor").field("workers", &self.workers.len()).finish()
    }
}

impl CompactExecutor {
    /// Start `threads` workers.
    pub fn new(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(Error::invalid_argument("Compaction executor needs at least one thread"));
        }

        let (sender, receiver) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("compaction-{}", i))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        if catch_unwind(AssertUnwindSafe(job)).is_err() {
                            log::error!("Compaction job panicked");
                        }
                    }
                })?;
            workers.push(handle);
        }

        log::debug!("Started {} compaction threads", threads);
        Ok(Self { sender: Some(sender), workers })
    }

    /// Queue a job. The returned channel yields its result once.
    pub fn submit<T, F>(&self, job: F) -> Result<Receiver<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let sender =
            self.sender.as_ref().ok_or_else(|| Error::invalid_state("Executor is shut down"))?;
        sender
            .send(Box::new(move || {
                // the submitter may have gone away, which is fine
                let _ = tx.send(job());
            }))
            .map_err(|_| Error::internal("Compaction workers are gone"))?;
        Ok(rx)
    }
}

impl Drop for CompactExecutor {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::warn!("Compaction worker exited abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_and_receive() {
        let executor = CompactExecutor::new(2).unwrap();
        let receivers: Vec<_> = (0..8).map(|i| executor.submit(move || i * 2).unwrap()).collect();
        let results: Vec<_> = receivers.into_iter().map(|rx| rx.recv().unwrap()).collect();
        assert_eq!(results, vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }

    #[test]
    fn test_panicking_job_keeps_worker_alive() {
        let executor = CompactExecutor::new(1).unwrap();
        let rx = executor.submit(|| -> i32 { panic!("boom") }).unwrap();
        assert!(rx.recv().is_err());

        let rx = executor.submit(|| 7).unwrap();
        assert_eq!(rx.recv().unwrap(), 7);
    }

    #[test]
    fn test_zero_threads_rejected() {
        assert!(CompactExecutor::new(0).is_err());
    }
}
