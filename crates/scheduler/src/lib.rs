//! Imagine Scheduler Library
//!
//! Background plumbing for the image cache: a priority queue of decode jobs
//! with cooperative cancellation, the worker pool that drains it, and the
//! owner-context queue that results are marshalled back through.
//!
//! # Example
//!
//! ```
//! use imagine_scheduler::{CancellationToken, DecodeQueue, JobPriority, OwnerQueue, WorkerPool, WorkerPoolConfig};
//! use std::sync::{Arc, Mutex};
//! use std::time::Duration;
//!
//! let owner = OwnerQueue::new();
//! let queue = Arc::new(DecodeQueue::new());
//! let pool = WorkerPool::new(queue.clone(), WorkerPoolConfig::new(1)).unwrap();
//!
//! let result = Arc::new(Mutex::new(None));
//! let handle = owner.handle();
//! let slot = result.clone();
//! queue.submit(JobPriority::Visible, "REM_example", move |token: &CancellationToken| {
//!     let decoded = 4 * 4; // expensive work happens here
//!     let token = token.clone();
//!     handle.post(move || {
//!         if !token.is_cancelled() {
//!             *slot.lock().unwrap() = Some(decoded);
//!         }
//!     });
//! });
//!
//! assert!(owner.run_until(|| result.lock().unwrap().is_some(), Duration::from_secs(5)));
//! pool.shutdown();
//! ```

mod cancel;
mod owner;
mod priority;
mod queue;
mod worker;

pub use cancel::CancellationToken;
pub use owner::{OwnerHandle, OwnerQueue, OwnerTask};
pub use priority::{Job, JobId, JobPriority, JobTask};
pub use queue::{DecodeQueue, QueueStats};
pub use worker::{WorkerPool, WorkerPoolConfig};

/// Errors raised while managing background threads
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("failed to spawn worker thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
