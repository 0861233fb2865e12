//! Priority ordering for decode jobs
//!
//! Decodes for something on screen run before speculative preloads. Within a
//! priority level jobs run in the order they were accepted.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Mutex;

use crate::CancellationToken;

/// Job priority levels
///
/// Higher values are dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobPriority {
    /// Preload for a variant nobody is waiting on yet
    Prefetch = 0,

    /// Decode a consumer is waiting on
    Visible = 1,
}

/// Unique job identifier
pub type JobId = u64;

/// Work executed on a background thread
///
/// The token is the job's own cancellation token; long-running work may poll it.
pub type JobTask = Box<dyn FnOnce(&CancellationToken) + Send + 'static>;

/// A queued job
pub struct Job {
    /// Unique job identifier
    pub id: JobId,

    /// Job priority level
    pub priority: JobPriority,

    /// Human readable tag used in logs (usually the image key)
    pub label: String,

    task: JobTask,

    token: CancellationToken,

    /// FIFO tiebreak within a priority
    insertion_order: u64,
}

impl Job {
    /// Token handed to the task when it runs
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Consume the job and run its task
    pub fn run(self) {
        let Job { task, token, .. } = self;
        task(&token)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            // BinaryHeap is a max heap: earlier insertion must compare greater
            Ordering::Equal => other.insertion_order.cmp(&self.insertion_order),
            other => other,
        }
    }
}

/// Thread-safe job heap
pub(crate) struct PriorityQueue {
    state: Mutex<QueueState>,
}

struct QueueState {
    heap: BinaryHeap<Job>,
    insertion_counter: u64,
}

impl PriorityQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                insertion_counter: 0,
            }),
        }
    }

    /// Push a job under an id the caller allocated
    pub(crate) fn push(
        &self,
        id: JobId,
        priority: JobPriority,
        label: String,
        task: JobTask,
        token: CancellationToken,
    ) {
        let mut state = self.state.lock().unwrap();
        let insertion_order = state.insertion_counter;
        state.insertion_counter += 1;

        state.heap.push(Job {
            id,
            priority,
            label,
            task,
            token,
            insertion_order,
        });
    }

    pub(crate) fn pop(&self) -> Option<Job> {
        self.state.lock().unwrap().heap.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().unwrap().heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.state.lock().unwrap().heap.is_empty()
    }

    /// Drop every queued job, returning the dropped ids
    pub(crate) fn clear(&self) -> Vec<JobId> {
        let mut state = self.state.lock().unwrap();
        state.heap.drain().map(|job| job.id).collect()
    }

    /// Remove queued jobs matching `predicate`, returning their ids
    pub(crate) fn remove_if<F>(&self, predicate: F) -> Vec<JobId>
    where
        F: Fn(&Job) -> bool,
    {
        let mut state = self.state.lock().unwrap();
        let (removed, kept): (Vec<Job>, Vec<Job>) =
            std::mem::take(&mut state.heap).into_iter().partition(|job| predicate(job));
        state.heap = kept.into_iter().collect();
        removed.into_iter().map(|job| job.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> JobTask {
        Box::new(|_token: &CancellationToken| {})
    }

    fn push(queue: &PriorityQueue, id: JobId, priority: JobPriority, label: &str) -> JobId {
        queue.push(id, priority, label.to_string(), noop(), CancellationToken::new());
        id
    }

    #[test]
    fn test_visible_outranks_prefetch() {
        assert!(JobPriority::Visible > JobPriority::Prefetch);
    }

    #[test]
    fn test_queue_pops_by_priority_then_fifo() {
        let queue = PriorityQueue::new();
        let prefetch = push(&queue, 1, JobPriority::Prefetch, "a");
        let visible1 = push(&queue, 2, JobPriority::Visible, "b");
        let visible2 = push(&queue, 3, JobPriority::Visible, "c");

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop().unwrap().id, visible1);
        assert_eq!(queue.pop().unwrap().id, visible2);
        assert_eq!(queue.pop().unwrap().id, prefetch);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove_if_keeps_order_of_survivors() {
        let queue = PriorityQueue::new();
        let first = push(&queue, 1, JobPriority::Visible, "keep");
        let dropped = push(&queue, 2, JobPriority::Visible, "drop");
        let last = push(&queue, 3, JobPriority::Visible, "keep");

        let removed = queue.remove_if(|job| job.label == "drop");
        assert_eq!(removed, vec![dropped]);
        assert_eq!(queue.pop().unwrap().id, first);
        assert_eq!(queue.pop().unwrap().id, last);
    }

    #[test]
    fn test_run_hands_task_its_own_token() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let saw_cancel = Arc::new(AtomicBool::new(false));
        let saw_cancel_clone = saw_cancel.clone();
        let queue = PriorityQueue::new();
        let token = CancellationToken::new();
        queue.push(
            7,
            JobPriority::Visible,
            "x".into(),
            Box::new(move |token: &CancellationToken| {
                saw_cancel_clone.store(token.is_cancelled(), Ordering::SeqCst)
            }),
            token.clone(),
        );

        token.cancel();
        let job = queue.pop().unwrap();
        assert!(job.token().same_as(&token));
        job.run();
        assert!(saw_cancel.load(Ordering::SeqCst));
    }

    #[test]
    fn test_clear_reports_dropped_jobs() {
        let queue = PriorityQueue::new();
        push(&queue, 1, JobPriority::Visible, "a");
        push(&queue, 2, JobPriority::Prefetch, "b");
        assert_eq!(queue.clear().len(), 2);
        assert!(queue.pop().is_none());
    }
}
