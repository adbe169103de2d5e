//! Fixed-size worker pools feeding results back over channels.
//!
//! Workers are pure producers: they receive owned job closures, run them and
//! push results into crossbeam channels the main thread drains with
//! `try_recv` under per-frame budgets. A pool constructed with zero threads
//! runs every job inline on the caller, which keeps single-threaded tools
//! and tests deterministic.

use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed set of named worker threads consuming jobs from a shared queue.
pub struct WorkerPool {
    job_tx: Option<Sender<Job>>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `thread_count` workers named `<name>-<index>`.
    pub fn new(name: &str, thread_count: usize) -> Self {
        if thread_count == 0 {
            return Self {
                job_tx: None,
                threads: Vec::new(),
            };
        }
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
        let threads = (0..thread_count)
            .map(|index| {
                let rx: Receiver<Job> = job_rx.clone();
                std::thread::Builder::new()
                    .name(format!("{name}-{index}"))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            job();
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();
        Self {
            job_tx: Some(job_tx),
            threads,
        }
    }

    /// Number of worker threads (0 = inline execution).
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Runs the job on a worker, or inline when the pool has no threads.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        match &self.job_tx {
            Some(tx) => {
                // The receiver outlives the sender until Drop, so this only
                // fails mid-teardown, where dropping the job is fine.
                let _ = tx.send(Box::new(job));
            }
            None => job(),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets workers drain remaining jobs and exit.
        self.job_tx = None;
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::prelude::*;

    #[test]
    fn zero_threads_runs_inline() {
        let pool = WorkerPool::new("inline", 0);
        assert_eq!(pool.thread_count(), 0);
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        pool.execute(move || flag.store(true, AtomicOrdering::Relaxed));
        assert!(ran.load(AtomicOrdering::Relaxed));
    }

    #[test]
    fn jobs_complete_before_join() {
        let (tx, rx) = crossbeam_channel::unbounded();
        {
            let pool = WorkerPool::new("worker", 2);
            for i in 0..16 {
                let tx = tx.clone();
                pool.execute(move || {
                    tx.send(i).unwrap();
                });
            }
        }
        let mut seen: Vec<i32> = rx.try_iter().collect();
        seen.sort();
        assert_eq!(seen, (0..16).collect::<Vec<_>>());
    }
}
