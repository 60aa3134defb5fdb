//! Bounded worker pool.
//!
//! A fixed set of OS threads draining a bounded queue. Submission never
//! blocks: a full queue rejects the task. Each task runs under the correlation
//! context that was active when it was submitted, and the worker's own context
//! is restored when the task ends, panics included.

use crate::{HttpClientError, Result};
use courier_core::propagation;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Tasks that may wait for a worker before submissions are rejected.
    pub queue_capacity: usize,
    /// Worker thread name prefix.
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 100,
            thread_name: "courier-worker".to_string(),
        }
    }
}

impl PoolConfig {
    /// Create a config with `workers` threads and `queue_capacity` slots.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        Self {
            workers,
            queue_capacity,
            ..Default::default()
        }
    }

    /// Set the thread name prefix.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
    active: AtomicUsize,
}

/// Pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Tasks accepted.
    pub submitted: u64,
    /// Tasks refused because the queue was full or the pool shut down.
    pub rejected: u64,
    /// Tasks that ran to completion.
    pub completed: u64,
    /// Tasks that panicked.
    pub panicked: u64,
    /// Tasks running right now.
    pub active: usize,
}

/// Fixed-size thread pool with a bounded queue.
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
    config: PoolConfig,
}

impl WorkerPool {
    /// Start the worker threads.
    pub fn new(config: PoolConfig) -> std::io::Result<Self> {
        let workers = config.workers.max(1);
        let (sender, receiver) = crossbeam_channel::bounded::<Job>(config.queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let receiver = receiver.clone();
            let handle = std::thread::Builder::new()
                .name(format!("{}-{}", config.thread_name, index))
                .spawn(move || run_worker(receiver))?;
            handles.push(handle);
        }

        debug!(
            workers,
            queue_capacity = config.queue_capacity,
            "Worker pool started"
        );

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
            counters: Arc::new(Counters::default()),
            config,
        })
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Queue `task`, capturing the current correlation context.
    ///
    /// Fails with [`HttpClientError::Rejected`] when the queue is full or the
    /// pool has shut down.
    pub fn submit<F, T>(&self, task: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.submit_fallible(move || Ok(task()))
    }

    /// [`submit`](Self::submit) for a task that reports its own errors.
    pub fn submit_fallible<F, T>(&self, task: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task = propagation::decorate(task);
        let counters = self.counters.clone();

        let job: Job = Box::new(move || {
            counters.active.fetch_add(1, Ordering::SeqCst);
            let outcome = panic::catch_unwind(AssertUnwindSafe(task));
            counters.active.fetch_sub(1, Ordering::SeqCst);

            let result = match outcome {
                Ok(result) => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                    result
                }
                Err(payload) => {
                    counters.panicked.fetch_add(1, Ordering::Relaxed);
                    let message = panic_message(payload.as_ref());
                    warn!(error = %message, "Pool task panicked");
                    Err(HttpClientError::WorkerLost(message))
                }
            };
            let _ = tx.send(result);
        });

        let sender = self.sender.lock().clone();
        let Some(sender) = sender else {
            return Err(self.reject("worker pool is shut down".to_string()));
        };

        match sender.try_send(job) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(TaskHandle { rx })
            }
            Err(TrySendError::Full(_)) => Err(self.reject(format!(
                "worker pool queue is full ({} queued)",
                self.config.queue_capacity
            ))),
            Err(TrySendError::Disconnected(_)) => {
                Err(self.reject("worker pool is shut down".to_string()))
            }
        }
    }

    fn reject(&self, reason: String) -> HttpClientError {
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        warn!(reason = %reason, "Task rejected");
        HttpClientError::Rejected { reason }
    }

    /// Get pool counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
            active: self.counters.active.load(Ordering::SeqCst),
        }
    }

    /// Stop accepting tasks, drain the queue, and join the workers.
    ///
    /// Must not be called from a pool thread.
    pub fn shutdown(&self) {
        let sender = self.sender.lock().take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!("Worker thread exited abnormally");
            }
        }
        debug!("Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

fn run_worker(receiver: Receiver<Job>) {
    // Ends once every sender is gone and the queue is drained.
    for job in receiver.iter() {
        job();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

/// Handle to a queued task's result.
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Block until the task finishes.
    ///
    /// Panics if called from within an async runtime; use
    /// [`wait`](Self::wait) there.
    pub fn join(self) -> Result<T> {
        self.rx.blocking_recv().unwrap_or_else(|_| Err(lost()))
    }

    /// Wait for the task without blocking the thread.
    pub async fn wait(self) -> Result<T> {
        self.rx.await.unwrap_or_else(|_| Err(lost()))
    }
}

fn lost() -> HttpClientError {
    HttpClientError::WorkerLost("task dropped before completion".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::CorrelationContext;
    use std::sync::Barrier;
    use std::time::Duration;

    #[test]
    fn test_runs_tasks() {
        let pool = WorkerPool::new(PoolConfig::new(2, 8)).unwrap();
        let handles: Vec<_> = (0..8).map(|i| pool.submit(move || i * 2).unwrap()).collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results, vec![0, 2, 4, 6, 8, 10, 12, 14]);
        assert_eq!(pool.stats().completed, 8);
    }

    #[test]
    fn test_context_travels_with_task() {
        let pool = WorkerPool::new(PoolConfig::new(1, 4)).unwrap();

        let handle = {
            let _guard = propagation::enter(&CorrelationContext::with_id("submit-side"));
            pool.submit(|| propagation::current().map(|c| c.correlation_id().to_string()))
                .unwrap()
        };
        assert_eq!(handle.join().unwrap().as_deref(), Some("submit-side"));

        // The worker thread is clean for the next task.
        let next = pool.submit(propagation::current).unwrap();
        assert!(next.join().unwrap().is_none());
    }

    #[test]
    fn test_full_queue_rejects() {
        let pool = WorkerPool::new(PoolConfig::new(1, 1)).unwrap();
        let gate = Arc::new(Barrier::new(2));

        let blocker = {
            let gate = gate.clone();
            pool.submit(move || {
                gate.wait();
            })
            .unwrap()
        };
        // Wait until the worker has taken the blocker off the queue.
        while pool.stats().active == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }

        let queued = pool.submit(|| ()).unwrap();
        let err = pool.submit(|| ()).unwrap_err();
        assert!(err.is_rejected());
        assert_eq!(pool.stats().rejected, 1);

        gate.wait();
        blocker.join().unwrap();
        queued.join().unwrap();
    }

    #[test]
    fn test_panic_surfaces_as_worker_lost() {
        let pool = WorkerPool::new(PoolConfig::new(1, 2)).unwrap();
        let err = pool
            .submit(|| -> u32 { panic!("kaboom") })
            .unwrap()
            .join()
            .unwrap_err();

        assert!(matches!(err, HttpClientError::WorkerLost(ref m) if m == "kaboom"));

        // The worker survives.
        assert_eq!(pool.submit(|| 7).unwrap().join().unwrap(), 7);
        assert_eq!(pool.stats().panicked, 1);
    }

    #[test]
    fn test_shutdown_rejects() {
        let pool = WorkerPool::new(PoolConfig::default()).unwrap();
        pool.shutdown();
        assert!(pool.submit(|| ()).unwrap_err().is_rejected());
    }

    #[test]
    fn test_shutdown_drains_queued_tasks() {
        let pool = WorkerPool::new(PoolConfig::new(2, 16)).unwrap();
        let gate = Arc::new(Barrier::new(3));
        let ran = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let gate = gate.clone();
            pool.submit(move || {
                gate.wait();
            })
            .unwrap();
        }
        let queued: Vec<_> = (0..10)
            .map(|_| {
                let ran = ran.clone();
                pool.submit(move || ran.fetch_add(1, Ordering::SeqCst)).unwrap()
            })
            .collect();

        gate.wait();
        pool.shutdown();

        assert_eq!(ran.load(Ordering::SeqCst), 10);
        assert!(queued.into_iter().all(|h| h.join().is_ok()));
        assert_eq!(pool.stats().completed, 12);
    }

    #[tokio::test]
    async fn test_wait_async() {
        let pool = WorkerPool::new(PoolConfig::new(2, 4)).unwrap();
        let value = pool.submit(|| "done").unwrap().wait().await.unwrap();
        assert_eq!(value, "done");
    }
}
