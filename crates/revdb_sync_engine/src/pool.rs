//! Bounded worker pool for per-document jobs.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// Runs the jobs of one batch on a fixed number of scoped threads.
///
/// All threads are joined before [`WorkerPool::run`] returns, so a batch
/// never outlives its call.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    /// Creates a pool with `workers` threads (at least one).
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Returns the number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `work` over `jobs`, returning results in job order.
    ///
    /// `should_stop` is checked before each job is taken; jobs not started
    /// once it returns true yield `None`. Jobs already running finish.
    pub fn run<J, R, W, S>(&self, jobs: &[J], should_stop: S, work: W) -> Vec<Option<R>>
    where
        J: Sync,
        R: Send,
        W: Fn(&J) -> R + Sync,
        S: Fn() -> bool + Sync,
    {
        let results: Mutex<Vec<Option<R>>> =
            Mutex::new(std::iter::repeat_with(|| None).take(jobs.len()).collect());
        let next = AtomicUsize::new(0);
        let threads = self.workers.min(jobs.len());

        thread::scope(|scope| {
            for _ in 0..threads {
                scope.spawn(|| loop {
                    if should_stop() {
                        break;
                    }
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(job) = jobs.get(index) else {
                        break;
                    };
                    let result = work(job);
                    results.lock()[index] = Some(result);
                });
            }
        });

        results.into_inner()
    }
}
