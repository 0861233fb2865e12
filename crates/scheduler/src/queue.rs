//! Decode job queue
//!
//! Owns the priority heap and the cancellation tokens of queued and running
//! jobs. Workers pull from it; requesters submit to it and may cancel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::cancel::{CancellationRegistry, CancellationToken};
use crate::priority::{Job, JobId, JobPriority, JobTask, PriorityQueue};

/// Queue statistics
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    /// Total jobs submitted
    pub jobs_submitted: u64,

    /// Total jobs that ran to completion (including ones skipped as cancelled after dequeue)
    pub jobs_completed: u64,

    /// Total jobs dropped from the queue before they started
    pub jobs_cancelled: u64,

    /// Current queue size
    pub queue_size: usize,
}

impl QueueStats {
    /// Jobs accepted but not yet finished or dropped
    pub fn pending_jobs(&self) -> u64 {
        self.jobs_submitted - self.jobs_completed - self.jobs_cancelled
    }
}

/// Thread-safe decode job queue
///
/// # Example
///
/// ```
/// use imagine_scheduler::{CancellationToken, DecodeQueue, JobPriority};
///
/// let queue = DecodeQueue::new();
/// let (job_id, token) = queue.submit(JobPriority::Visible, "REM_x", |_token: &CancellationToken| {
///     // decode...
/// });
///
/// if let Some(job) = queue.next_job() {
///     assert_eq!(job.id, job_id);
///     assert!(job.token().same_as(&token));
///     job.run();
///     queue.complete_job(job_id);
/// }
/// ```
pub struct DecodeQueue {
    queue: PriorityQueue,
    next_job_id: AtomicU64,
    stats: Mutex<QueueStats>,
    cancellation: CancellationRegistry,
    signal: Mutex<u64>,
    available: Condvar,
}

impl DecodeQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            queue: PriorityQueue::new(),
            next_job_id: AtomicU64::new(1),
            stats: Mutex::new(QueueStats::default()),
            cancellation: CancellationRegistry::new(),
            signal: Mutex::new(0),
            available: Condvar::new(),
        }
    }

    /// Submit a job
    ///
    /// Returns the job id and the token the job will be handed when it runs.
    pub fn submit<F>(&self, priority: JobPriority, label: impl Into<String>, task: F) -> (JobId, CancellationToken)
    where
        F: FnOnce(&CancellationToken) + Send + 'static,
    {
        let task: JobTask = Box::new(task);
        let job_id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        // Registered before the push so a worker can never dequeue an untracked job
        let token = self.cancellation.register(job_id);
        self.queue.push(job_id, priority, label.into(), task, token.clone());

        self.stats.lock().unwrap().jobs_submitted += 1;

        *self.signal.lock().unwrap() += 1;
        self.available.notify_one();

        (job_id, token)
    }

    /// Pop the next job to run
    ///
    /// The job's token stays registered until `complete_job()`.
    pub fn next_job(&self) -> Option<Job> {
        self.queue.pop()
    }

    /// Block for up to `timeout` until a submit happens
    ///
    /// Returns immediately if jobs are already queued.
    pub fn wait_for_job(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut signal = self.signal.lock().unwrap();
        let seen = *signal;
        loop {
            if !self.queue.is_empty() || *signal != seen {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            signal = self.available.wait_timeout(signal, deadline - now).unwrap().0;
        }
    }

    /// Wake every waiting worker (used on shutdown)
    pub(crate) fn wake_all(&self) {
        *self.signal.lock().unwrap() += 1;
        self.available.notify_all();
    }

    /// Mark a dequeued job as finished and forget its token
    pub fn complete_job(&self, job_id: JobId) {
        self.stats.lock().unwrap().jobs_completed += 1;
        self.cancellation.unregister(job_id);
    }

    /// Cancel a job
    ///
    /// Queued jobs are dropped outright. Running jobs only see their token
    /// flip. Returns `true` if the job was queued or running.
    pub fn cancel_job(&self, job_id: JobId) -> bool {
        let token_found = self.cancellation.cancel(job_id);
        let removed = self.queue.remove_if(|job| job.id == job_id);

        if removed.is_empty() {
            return token_found;
        }

        self.stats.lock().unwrap().jobs_cancelled += removed.len() as u64;
        self.cancellation.unregister(job_id);
        true
    }

    /// Token of a queued or running job
    pub fn get_cancellation_token(&self, job_id: JobId) -> Option<CancellationToken> {
        self.cancellation.get(job_id)
    }

    /// Number of queued jobs
    pub fn pending_jobs(&self) -> usize {
        self.queue.len()
    }

    /// Number of jobs queued or running
    pub fn tracked_jobs(&self) -> usize {
        self.cancellation.len()
    }

    /// Cancel everything: drop queued jobs and flip tokens of running ones
    ///
    /// Dropped jobs are forgotten; running ones stay tracked until
    /// `complete_job()`.
    pub fn clear(&self) {
        self.cancellation.cancel_all();
        let dropped = self.queue.clear();
        for job_id in &dropped {
            self.cancellation.unregister(*job_id);
        }
        if !dropped.is_empty() {
            self.stats.lock().unwrap().jobs_cancelled += dropped.len() as u64;
        }
    }

    /// Snapshot of the statistics
    pub fn stats(&self) -> QueueStats {
        let mut stats = self.stats.lock().unwrap().clone();
        stats.queue_size = self.queue.len();
        stats
    }
}

impl Default for DecodeQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DecodeQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeQueue")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_token: &CancellationToken) {}

    #[test]
    fn test_submit_and_complete() {
        let queue = DecodeQueue::new();
        let (job_id, token) = queue.submit(JobPriority::Visible, "a", noop);

        assert_eq!(queue.pending_jobs(), 1);
        assert!(!token.is_cancelled());

        let job = queue.next_job().unwrap();
        assert_eq!(job.id, job_id);
        assert_eq!(job.label, "a");
        assert_eq!(queue.tracked_jobs(), 1);

        queue.complete_job(job_id);
        assert_eq!(queue.tracked_jobs(), 0);

        let stats = queue.stats();
        assert_eq!(stats.jobs_submitted, 1);
        assert_eq!(stats.jobs_completed, 1);
        assert_eq!(stats.pending_jobs(), 0);
    }

    #[test]
    fn test_cancel_queued_job_drops_it() {
        let queue = DecodeQueue::new();
        let (job_id, token) = queue.submit(JobPriority::Visible, "a", noop);

        assert!(queue.cancel_job(job_id));
        assert!(token.is_cancelled());
        assert!(queue.next_job().is_none());
        assert_eq!(queue.stats().jobs_cancelled, 1);
        assert!(queue.get_cancellation_token(job_id).is_none());
    }

    #[test]
    fn test_cancel_running_job_flips_token_only() {
        let queue = DecodeQueue::new();
        let (job_id, token) = queue.submit(JobPriority::Visible, "a", noop);
        let _running = queue.next_job().unwrap();

        assert!(queue.cancel_job(job_id));
        assert!(token.is_cancelled());
        assert_eq!(queue.stats().jobs_cancelled, 0);

        queue.complete_job(job_id);
        assert!(!queue.cancel_job(job_id));
    }

    #[test]
    fn test_clear_cancels_everything() {
        let queue = DecodeQueue::new();
        let (_, queued) = queue.submit(JobPriority::Prefetch, "a", noop);
        let (_, running) = queue.submit(JobPriority::Visible, "b", noop);
        let _job = queue.next_job().unwrap();

        queue.clear();
        assert!(queued.is_cancelled());
        assert!(running.is_cancelled());
        assert_eq!(queue.pending_jobs(), 0);
        assert_eq!(queue.stats().jobs_cancelled, 1);
    }

    #[test]
    fn test_clear_forgets_dropped_jobs() {
        let queue = DecodeQueue::new();
        let (dropped_id, _) = queue.submit(JobPriority::Prefetch, "a", noop);
        let (running_id, _) = queue.submit(JobPriority::Visible, "b", noop);
        let _job = queue.next_job().unwrap();

        queue.clear();
        assert!(queue.get_cancellation_token(dropped_id).is_none());
        assert!(queue.get_cancellation_token(running_id).is_some());
        assert_eq!(queue.tracked_jobs(), 1);

        queue.complete_job(running_id);
        assert_eq!(queue.tracked_jobs(), 0);
    }

    #[test]
    fn test_wait_returns_immediately_when_jobs_queued() {
        let queue = DecodeQueue::new();
        queue.submit(JobPriority::Visible, "a", noop);

        let start = Instant::now();
        queue.wait_for_job(Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_wait_times_out_on_empty_queue() {
        let queue = DecodeQueue::new();
        let start = Instant::now();
        queue.wait_for_job(Duration::from_millis(20));
        assert!(start.elapsed() >= Duration::from_millis(15));
    }
}
