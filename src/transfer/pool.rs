/*!
 * Bounded worker pool for part transfers
 *
 * A producer preloads part descriptors onto a channel; a fixed worker
 * set drains it. The first error flips a shared abort flag: in-flight
 * work finishes its current call, queued work is skipped, and the
 * coordinator reports that first error. Partial work already recorded
 * stays recorded; the caller resumes by re-invoking the operation.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;

use crossbeam_channel::unbounded;
use tracing::debug;

use crate::error::{OssError, Result};

pub struct TaskPool {
    workers: usize,
}

impl TaskPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Run `job` over every task; fail fast on the first error.
    ///
    /// Tasks complete in no particular order; any ordering requirement
    /// (like the sorted complete-multipart call) is the caller's.
    pub fn run<T, F>(&self, tasks: Vec<T>, job: F) -> Result<()>
    where
        T: Send,
        F: Fn(T) -> Result<()> + Sync,
    {
        if tasks.is_empty() {
            return Ok(());
        }

        let (tx, rx) = unbounded();
        let task_count = tasks.len();
        for task in tasks {
            let _ = tx.send(task);
        }
        drop(tx);

        let abort = AtomicBool::new(false);
        let first_error: Mutex<Option<OssError>> = Mutex::new(None);
        let workers = self.workers.min(task_count);

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    while let Ok(task) = rx.recv() {
                        if abort.load(Ordering::SeqCst) {
                            break;
                        }
                        if let Err(e) = job(task) {
                            debug!(error = %e, "worker failed, cancelling pool");
                            abort.store(true, Ordering::SeqCst);
                            let mut slot = first_error.lock().unwrap();
                            if slot.is_none() {
                                *slot = Some(e);
                            }
                            break;
                        }
                    }
                });
            }
        });

        match first_error.into_inner().unwrap() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_runs_every_task() {
        let executed = AtomicUsize::new(0);
        let pool = TaskPool::new(4);
        pool.run((0..50).collect(), |_| {
            executed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        assert_eq!(executed.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn test_concurrency_stays_bounded() {
        let current = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let pool = TaskPool::new(3);
        pool.run((0..20).collect(), |_| {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            current.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn test_first_error_wins_and_halts() {
        let executed = AtomicUsize::new(0);
        let pool = TaskPool::new(1);
        let result = pool.run((0..100).collect::<Vec<u32>>(), |task| {
            executed.fetch_add(1, Ordering::SeqCst);
            if task == 3 {
                Err(OssError::Request(format!("boom at {}", task)))
            } else {
                Ok(())
            }
        });

        let err = result.unwrap_err();
        assert!(matches!(err, OssError::Request(msg) if msg.contains("boom at 3")));
        // Single worker stops right after the failing task
        assert_eq!(executed.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_empty_task_set() {
        let pool = TaskPool::new(4);
        pool.run(Vec::<u32>::new(), |_| panic!("must not run")).unwrap();
    }
}
