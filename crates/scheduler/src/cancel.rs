//! Cooperative cancellation for background decodes
//!
//! A decode superseded by a newer request is never interrupted mid-flight.
//! Instead its token is flipped and both the worker (before starting) and the
//! completion (before touching shared state) check it.

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use crate::JobId;

/// Shared cancellation flag
///
/// Clones observe the same flag, so the requester can keep one copy and hand
/// another to the job.
///
/// # Example
///
/// ```
/// use imagine_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let job_token = token.clone();
///
/// token.cancel();
/// assert!(job_token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token in the non-cancelled state
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the token (and every clone) as cancelled. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether `cancel()` was called on this token or any clone
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether two tokens share the same flag
    pub fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}

/// Tokens of jobs that are queued or running, indexed by job id
#[derive(Debug, Default)]
pub(crate) struct CancellationRegistry {
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
}

impl CancellationRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Create and remember a fresh token for `job_id`
    pub(crate) fn register(&self, job_id: JobId) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.lock().unwrap().insert(job_id, token.clone());
        token
    }

    /// Returns `true` if the job was known
    pub(crate) fn cancel(&self, job_id: JobId) -> bool {
        match self.tokens.lock().unwrap().get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) fn cancel_all(&self) -> usize {
        let tokens = self.tokens.lock().unwrap();
        for token in tokens.values() {
            token.cancel();
        }
        tokens.len()
    }

    pub(crate) fn unregister(&self, job_id: JobId) -> bool {
        self.tokens.lock().unwrap().remove(&job_id).is_some()
    }

    pub(crate) fn get(&self, job_id: JobId) -> Option<CancellationToken> {
        self.tokens.lock().unwrap().get(&job_id).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.tokens.lock().unwrap().len()
    }
}
