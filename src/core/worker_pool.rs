//! Fixed-size worker pool
//!
//! A [`WorkerPool`] owns `worker_count` named OS threads that drain one
//! shared, unbounded FIFO queue. Services use one pool for connections (one
//! task per connection, held for the connection's lifetime) and the finance
//! service keeps a second, server-lifetime pool for short batch jobs.
//!
//! Because a connection task occupies its worker until the peer disconnects,
//! a pool with `n` workers serves at most `n` connections at once; further
//! accepted connections wait in the queue until a worker frees up. This is
//! the service's backpressure point.
//!
//! Teardown is a graceful drain: queued tasks still run, and
//! [`WorkerPool::shutdown`] returns only after every worker has finished its
//! last task and exited.

use crate::types::ServiceError;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error, info};

/// A unit of work; it reports its own outcome
pub type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Queue {
    tasks: VecDeque<Task>,
    stopping: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed set of workers draining a shared FIFO queue
pub struct WorkerPool {
    name: String,
    worker_count: usize,
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_ids: Vec<ThreadId>,
}

impl WorkerPool {
    /// Start `worker_count` workers named `<name>-<index>`
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Config`] if `worker_count` is zero and
    /// [`ServiceError::Resource`] if a thread cannot be spawned.
    pub fn new(name: &str, worker_count: usize) -> Result<Self, ServiceError> {
        if worker_count == 0 {
            return Err(ServiceError::config(format!(
                "worker pool '{}' needs at least one worker",
                name
            )));
        }

        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            available: Condvar::new(),
        });

        let mut pool = WorkerPool {
            name: name.to_string(),
            worker_count,
            shared,
            workers: Mutex::new(Vec::with_capacity(worker_count)),
            worker_ids: Vec::with_capacity(worker_count),
        };

        for index in 0..worker_count {
            let shared = pool.shared.clone();
            let thread_name = format!("{}-{}", name, index);
            let handle = thread::Builder::new()
                .name(thread_name)
                .spawn(move || worker_loop(&shared))
                .map_err(|e| ServiceError::resource("Failed to start worker thread", e))?;
            pool.worker_ids.push(handle.thread().id());
            pool.lock_workers().push(handle);
        }

        info!(pool = %pool.name, workers = worker_count, "worker pool started");
        Ok(pool)
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `task` and wake one idle worker; never blocks on capacity
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::ShuttingDown`] once teardown has started.
    pub fn submit<F>(&self, task: F) -> Result<(), ServiceError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.shared.lock();
        if queue.stopping {
            return Err(ServiceError::ShuttingDown);
        }
        queue.tasks.push_back(Box::new(task));
        drop(queue);
        self.shared.available.notify_one();
        Ok(())
    }

    /// Number of workers
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Pool name used for thread names and logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tasks waiting for a worker
    pub fn queued(&self) -> usize {
        self.shared.lock().tasks.len()
    }

    /// Drain the queue, then stop and join every worker
    ///
    /// Idempotent. Tasks already queued run to completion; new submissions
    /// are refused. Concurrent callers all return only after the workers
    /// have been joined. Called from one of the pool's own tasks it only
    /// stops intake.
    pub fn shutdown(&self) {
        self.shared.lock().stopping = true;
        self.shared.available.notify_all();

        if self.worker_ids.contains(&thread::current().id()) {
            debug!(pool = %self.name, "shutdown requested from a worker");
            return;
        }

        // Late callers block here until the joins below finish.
        let mut workers = self.lock_workers();
        if workers.is_empty() {
            return;
        }
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                error!(pool = %self.name, "worker thread exited abnormally");
            }
        }
        info!(pool = %self.name, "worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let task = {
            let mut queue = shared.lock();
            loop {
                if let Some(task) = queue.tasks.pop_front() {
                    break Some(task);
                }
                if queue.stopping {
                    break None;
                }
                queue = shared
                    .available
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        let Some(task) = task else {
            debug!("worker exiting");
            return;
        };

        if let Err(cause) = panic::catch_unwind(AssertUnwindSafe(task)) {
            let message = cause
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| cause.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(panic = %message, "task panicked");
        }
    }
}
