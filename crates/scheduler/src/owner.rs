//! Owner context
//!
//! One thread owns consumer-facing state. Anything produced elsewhere
//! (decode completions, detach notifications) is posted here as a task and
//! runs when the owner drains the queue.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use tracing::trace;

/// Task executed on the owner context
pub type OwnerTask = Box<dyn FnOnce() + Send + 'static>;

/// Cloneable, thread-safe handle for posting tasks to the owner context
#[derive(Debug, Clone)]
pub struct OwnerHandle {
    sender: Sender<OwnerTask>,
}

impl OwnerHandle {
    /// Post a task; it runs the next time the owner drains the queue
    ///
    /// Returns `false` if the owner queue no longer exists.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender.send(Box::new(task)).is_ok()
    }
}

/// Queue of tasks waiting for the owner context
///
/// Tasks run in the order they were posted.
///
/// # Example
///
/// ```
/// use imagine_scheduler::OwnerQueue;
/// use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
///
/// let owner = OwnerQueue::new();
/// let handle = owner.handle();
/// let hits = Arc::new(AtomicUsize::new(0));
///
/// let hits_clone = hits.clone();
/// std::thread::spawn(move || {
///     handle.post(move || { hits_clone.fetch_add(1, Ordering::SeqCst); });
/// })
/// .join()
/// .unwrap();
///
/// assert_eq!(owner.run_pending(), 1);
/// assert_eq!(hits.load(Ordering::SeqCst), 1);
/// ```
#[derive(Debug)]
pub struct OwnerQueue {
    handle: OwnerHandle,
    receiver: Receiver<OwnerTask>,
}

impl OwnerQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            handle: OwnerHandle { sender },
            receiver,
        }
    }

    /// Handle for posting to this queue
    pub fn handle(&self) -> OwnerHandle {
        self.handle.clone()
    }

    /// Run every task already posted, returning how many ran
    ///
    /// Tasks posted by the tasks themselves also run before this returns.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.receiver.try_recv() {
            task();
            ran += 1;
        }
        if ran > 0 {
            trace!(ran, "owner tasks drained");
        }
        ran
    }

    /// Run tasks until `done()` holds or `timeout` elapses
    ///
    /// Returns the final value of `done()`.
    pub fn run_until<F>(&self, mut done: F, timeout: Duration) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_pending();
            if done() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.receiver.recv_timeout(deadline - now) {
                Ok(task) => task(),
                Err(RecvTimeoutError::Timeout) => return done(),
                // Unreachable while `self.handle` holds a sender
                Err(RecvTimeoutError::Disconnected) => return done(),
            }
        }
    }
}

impl Default for OwnerQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::thread;

    #[test]
    fn test_tasks_run_in_post_order() {
        let owner = OwnerQueue::new();
        let handle = owner.handle();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..4 {
            let seen = seen.clone();
            handle.post(move || seen.lock().unwrap().push(i));
        }

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(owner.run_pending(), 4);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_nested_posts_run_in_same_drain() {
        let owner = OwnerQueue::new();
        let handle = owner.handle();
        let inner = owner.handle();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_outer = seen.clone();
        handle.post(move || {
            seen_outer.lock().unwrap().push("outer");
            let seen_inner = seen_outer.clone();
            inner.post(move || seen_inner.lock().unwrap().push("inner"));
        });

        assert_eq!(owner.run_pending(), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_run_until_waits_for_background_post() {
        let owner = OwnerQueue::new();
        let handle = owner.handle();
        let flag = Arc::new(Mutex::new(false));

        let flag_clone = flag.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handle.post(move || *flag_clone.lock().unwrap() = true);
        });

        let done = owner.run_until(|| *flag.lock().unwrap(), Duration::from_secs(5));
        assert!(done);
    }

    #[test]
    fn test_run_until_times_out() {
        let owner = OwnerQueue::new();
        assert!(!owner.run_until(|| false, Duration::from_millis(10)));
    }

    #[test]
    fn test_post_after_queue_dropped_reports_failure() {
        let owner = OwnerQueue::new();
        let handle = owner.handle();
        drop(owner);
        assert!(!handle.post(|| {}));
    }
}
