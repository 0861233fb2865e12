//! Decode worker pool
//!
//! Background threads that pull decode jobs from a [`DecodeQueue`]. Workers
//! never touch cache state themselves: a job decodes, then posts its result to
//! the owner context.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace};

use crate::{DecodeQueue, Result, SchedulerError};

/// Configuration for the worker pool
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads.
    /// Default: number of logical CPU cores.
    pub num_workers: usize,

    /// Longest a worker sleeps without re-checking for shutdown.
    /// Default: 100ms.
    pub poll_interval: Duration,

    /// Thread name prefix
    pub thread_name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::new(num_cpus())
    }
}

impl WorkerPoolConfig {
    /// Pool with `num_workers` threads (at least one)
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
            poll_interval: Duration::from_millis(100),
            thread_name: "imagine-decode".to_string(),
        }
    }

    /// Set the poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the thread name prefix
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

/// Pool of decode threads sharing one [`DecodeQueue`]
///
/// Dropping the pool signals shutdown and joins the threads; jobs still queued
/// at that point are cancelled.
///
/// # Example
///
/// ```
/// use imagine_scheduler::{CancellationToken, DecodeQueue, JobPriority, WorkerPool, WorkerPoolConfig};
/// use std::sync::{mpsc, Arc};
///
/// let queue = Arc::new(DecodeQueue::new());
/// let pool = WorkerPool::new(queue.clone(), WorkerPoolConfig::new(2)).unwrap();
///
/// let (tx, rx) = mpsc::channel();
/// queue.submit(JobPriority::Visible, "demo", move |_token: &CancellationToken| {
///     tx.send(42).unwrap();
/// });
/// assert_eq!(rx.recv().unwrap(), 42);
///
/// pool.shutdown();
/// ```
#[derive(Debug)]
pub struct WorkerPool {
    queue: Arc<DecodeQueue>,
    workers: Vec<Worker>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawn the worker threads
    pub fn new(queue: Arc<DecodeQueue>, config: WorkerPoolConfig) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut pool = Self {
            queue: queue.clone(),
            workers: Vec::with_capacity(config.num_workers),
            shutdown: shutdown.clone(),
        };

        for id in 0..config.num_workers {
            // On failure the partially built pool is dropped, which joins what was spawned
            let worker = Worker::spawn(
                format!("{}-{}", config.thread_name, id),
                queue.clone(),
                shutdown.clone(),
                config.poll_interval,
            )?;
            pool.workers.push(worker);
        }

        debug!(workers = pool.workers.len(), "decode worker pool started");
        Ok(pool)
    }

    /// Queue the pool pulls from
    pub fn queue(&self) -> &Arc<DecodeQueue> {
        &self.queue
    }

    /// Number of worker threads
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Whether shutdown has been signalled
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Cancel queued jobs, stop the workers and wait for them
    ///
    /// A job already running finishes first.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.shutdown.store(true, Ordering::Release);
        self.queue.clear();
        self.queue.wake_all();

        for worker in self.workers.drain(..) {
            worker.join();
        }
        debug!("decode worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug)]
struct Worker {
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(
        name: String,
        queue: Arc<DecodeQueue>,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> Result<Self> {
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || Self::run(queue, shutdown, poll_interval))
            .map_err(|source| SchedulerError::Spawn { name, source })?;

        Ok(Self {
            thread: Some(thread),
        })
    }

    fn run(queue: Arc<DecodeQueue>, shutdown: Arc<AtomicBool>, poll_interval: Duration) {
        loop {
            if shutdown.load(Ordering::Acquire) {
                break;
            }

            let Some(job) = queue.next_job() else {
                queue.wait_for_job(poll_interval);
                continue;
            };

            let job_id = job.id;
            if job.token().is_cancelled() {
                trace!(job_id, label = %job.label, "skipping cancelled job");
            } else {
                job.run();
            }

            queue.complete_job(job_id);
        }
    }

    fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            // A panicking job already reported itself through the panic hook
            let _ = thread.join();
        }
    }
}

fn num_cpus() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
