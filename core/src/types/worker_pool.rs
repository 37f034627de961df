//! A fixed-size worker pool servicing queued jobs as promises.

use crate::types::rpc_promise::{RpcThreadPromise, RpcThreadPromiseKeeper};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Promise for a queued job's outcome. Errors (including panics inside the
/// job) resolve the promise as failed; consumers must check for failure.
pub type WorkerPoolPromise<T> = RpcThreadPromise<T, String>;

struct Shared {
    queue: Mutex<VecDeque<Task>>,
    available: Condvar,
    shutdown: AtomicBool,
}

/// Services blocking jobs on a fixed set of named threads.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(name: &str, threads: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let workers = (0..threads.max(1))
            .map(|i| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("{name}-{i}"))
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        WorkerPool { shared, workers }
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Queues a job, returning a promise for its result.
    pub fn add_task<T, F>(&self, job: F) -> WorkerPoolPromise<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> std::result::Result<T, String> + Send + 'static,
    {
        let (promise, keeper) = RpcThreadPromise::<T, String>::create_pair();
        self.queue_task(Box::new(move || run_job(job, keeper)));
        promise
    }

    fn queue_task(&self, task: Task) {
        let mut queue = self.shared.queue.lock().unwrap();
        queue.push_back(task);
        self.shared.available.notify_one();
    }

    /// Signals shutdown and joins all workers; queued-but-unstarted jobs
    /// are dropped with their promises unresolved.
    pub fn stop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.available.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if shared.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(task) = queue.pop_front() {
                    break task;
                }
                queue = shared.available.wait(queue).unwrap();
            }
        };
        task();
    }
}

fn run_job<T, F>(job: F, keeper: RpcThreadPromiseKeeper<T, String>)
where
    T: Clone + Send + 'static,
    F: FnOnce() -> std::result::Result<T, String>,
{
    match catch_unwind(AssertUnwindSafe(job)) {
        Ok(Ok(value)) => {
            let _ = keeper.fulfill(value);
        }
        Ok(Err(error)) => {
            let _ = keeper.fail(error);
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "worker job panicked".to_string());
            let _ = keeper.fail(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn wait_for<T: Clone, F: Fn() -> bool>(condition: F) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        panic!("condition never became true");
    }

    #[test]
    fn jobs_resolve_their_promises() {
        let pool = WorkerPool::new("test", 2);
        let promise = pool.add_task(|| Ok::<_, String>(6 * 7));
        wait_for::<i32, _>(|| promise.finished());
        assert_eq!(promise.result(), Some(42));
    }

    #[test]
    fn job_errors_fail_the_promise() {
        let pool = WorkerPool::new("test", 1);
        let promise = pool.add_task(|| Err::<i32, _>("boom".to_string()));
        wait_for::<i32, _>(|| promise.finished());
        assert_eq!(promise.error(), Some("boom".to_string()));
    }

    #[test]
    fn panics_become_failures() {
        let pool = WorkerPool::new("test", 1);
        let promise = pool.add_task(|| -> std::result::Result<i32, String> {
            panic!("exploded");
        });
        wait_for::<i32, _>(|| promise.finished());
        assert!(promise.error().unwrap().contains("exploded"));
    }

    #[test]
    fn many_jobs_complete() {
        let pool = WorkerPool::new("test", 4);
        let promises: Vec<_> = (0..64)
            .map(|i| pool.add_task(move || Ok::<_, String>(i * i)))
            .collect();
        for (i, promise) in promises.iter().enumerate() {
            wait_for::<i32, _>(|| promise.finished());
            assert_eq!(promise.result(), Some((i * i) as i32));
        }
    }
}
