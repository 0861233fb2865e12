//! Byte budget for decoded variants
//!
//! Shared between the manager and every variant so a disposal can give its
//! bytes back without going through the manager's locks.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Memory pressure level indicating cache health
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryPressure {
    /// At or below the trim target
    Low,
    /// Between the trim target and the ceiling
    Moderate,
    /// Over the ceiling
    Critical,
}

/// Tracks bytes held by live variants against a ceiling and a trim target
///
/// # Example
///
/// ```
/// use imagine_cache::MemoryBudget;
///
/// let budget = MemoryBudget::new(1000, 500);
/// budget.record_allocation(600);
/// assert!(!budget.is_over_budget());
/// assert!(budget.is_over_trim_target());
///
/// budget.record_allocation(600);
/// assert!(budget.is_over_budget());
///
/// budget.record_deallocation(1200);
/// assert_eq!(budget.current_usage(), 0);
/// ```
#[derive(Debug)]
pub struct MemoryBudget {
    current_usage: AtomicUsize,
    max_bytes: AtomicUsize,
    trim_target: AtomicUsize,
}

impl MemoryBudget {
    pub fn new(max_bytes: usize, trim_target: usize) -> Self {
        Self {
            current_usage: AtomicUsize::new(0),
            max_bytes: AtomicUsize::new(max_bytes),
            trim_target: AtomicUsize::new(trim_target),
        }
    }

    /// Get the current memory usage in bytes
    pub fn current_usage(&self) -> usize {
        self.current_usage.load(Ordering::Acquire)
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes.load(Ordering::Acquire)
    }

    pub fn trim_target(&self) -> usize {
        self.trim_target.load(Ordering::Acquire)
    }

    pub fn set_max_bytes(&self, bytes: usize) {
        self.max_bytes.store(bytes, Ordering::Release);
    }

    pub fn set_trim_target(&self, bytes: usize) {
        self.trim_target.store(bytes, Ordering::Release);
    }

    /// Record a memory allocation, returning the new total
    pub fn record_allocation(&self, bytes: usize) -> usize {
        self.current_usage.fetch_add(bytes, Ordering::AcqRel) + bytes
    }

    /// Record a memory deallocation, returning the new total
    pub fn record_deallocation(&self, bytes: usize) -> usize {
        let previous = self
            .current_usage
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(bytes))
            })
            .unwrap_or_else(|current| current);
        previous.saturating_sub(bytes)
    }

    pub fn is_over_budget(&self) -> bool {
        self.current_usage() > self.max_bytes()
    }

    pub fn is_over_trim_target(&self) -> bool {
        self.current_usage() > self.trim_target()
    }

    /// Get the current utilization ratio of the ceiling
    pub fn utilization(&self) -> f64 {
        let max = self.max_bytes();
        if max == 0 {
            0.0
        } else {
            self.current_usage() as f64 / max as f64
        }
    }

    pub fn pressure(&self) -> MemoryPressure {
        if self.is_over_budget() {
            MemoryPressure::Critical
        } else if self.is_over_trim_target() {
            MemoryPressure::Moderate
        } else {
            MemoryPressure::Low
        }
    }
}

/// Monotonic access counter shared by all variants of one manager
///
/// Stamps are strictly increasing, so recency order has no ties.
#[derive(Debug, Default)]
pub(crate) struct AccessClock {
    ticks: AtomicU64,
}

impl AccessClock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed) + 1
    }
}
