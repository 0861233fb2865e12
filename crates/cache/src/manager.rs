//! Decoded image cache manager
//!
//! Registry of logical images plus the byte budget all their variants share.
//! Crossing the budget evicts synchronously, inside the call that reported
//! the allocation:
//!
//! 1. Unpinned variants go first, oldest access first, until usage is at or
//!    below the trim target.
//! 2. If usage is still above the ceiling, pinned variants go, oldest first,
//!    but never below `min_pinned_alive` survivors. Their consumers get a
//!    removal notice on the owner context.
//!
//! Eviction that cannot reach its target stops early; the ceiling is then a
//! soft cap.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use image::RgbaImage;
use imagine_decode::{DecoderSet, ImageKey, Source};
use imagine_scheduler::{DecodeQueue, OwnerHandle, OwnerQueue, WorkerPool, WorkerPoolConfig};
use tracing::{debug, info};

use crate::budget::AccessClock;
use crate::variant::VariantContext;
use crate::{CacheConfig, ImageVariant, LogicalImage, MemoryBudget, MemoryPressure};

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    /// Registered logical images
    pub image_count: usize,

    /// Live variants across all images
    pub variant_count: usize,

    /// Bytes held by live variants
    pub memory_used: usize,

    /// Budget ceiling (bytes)
    pub memory_limit: usize,

    /// Level eviction of unpinned variants aims for (bytes)
    pub trim_target: usize,

    /// Requests answered by an existing variant
    pub hits: u64,

    /// Requests that needed a decode
    pub misses: u64,

    /// Decodes that produced a new variant
    pub decodes: u64,

    pub decode_failures: u64,

    /// Unpinned variants disposed by eviction
    pub safe_evictions: u64,

    /// Pinned variants disposed by eviction
    pub pinned_evictions: u64,

    /// Eviction passes run
    pub trims: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Calculate memory utilization (0.0 to 1.0)
    pub fn memory_utilization(&self) -> f64 {
        if self.memory_limit == 0 {
            0.0
        } else {
            self.memory_used as f64 / self.memory_limit as f64
        }
    }

    pub fn evictions(&self) -> u64 {
        self.safe_evictions + self.pinned_evictions
    }
}

/// What one eviction pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionOutcome {
    pub safe_disposed: usize,
    pub pinned_disposed: usize,
    pub bytes_freed: usize,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    decodes: AtomicU64,
    decode_failures: AtomicU64,
    safe_evictions: AtomicU64,
    pinned_evictions: AtomicU64,
    trims: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode(&self) {
        self.decodes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_eviction(&self, outcome: &EvictionOutcome) {
        self.trims.fetch_add(1, Ordering::Relaxed);
        self.safe_evictions
            .fetch_add(outcome.safe_disposed as u64, Ordering::Relaxed);
        self.pinned_evictions
            .fetch_add(outcome.pinned_disposed as u64, Ordering::Relaxed);
    }
}

/// An eviction candidate: a variant and the image holding it
struct Candidate {
    image: Arc<LogicalImage>,
    variant: Arc<ImageVariant>,
    stamp: u64,
}

impl Candidate {
    /// Dispose the variant and detach it from its image
    fn dispose(self) -> Option<usize> {
        let disposed = self.variant.dispose();
        self.image.remove_variant(&self.variant);
        disposed.then(|| self.variant.byte_size())
    }
}

/// Insert keeping the list ordered oldest access first
fn insert_by_age(list: &mut Vec<Candidate>, candidate: Candidate) {
    let position = list
        .iter()
        .position(|existing| existing.stamp > candidate.stamp)
        .unwrap_or(list.len());
    list.insert(position, candidate);
}

/// State shared with logical images and background completions
pub(crate) struct ManagerInner {
    images: Mutex<HashMap<ImageKey, Arc<LogicalImage>>>,
    budget: Arc<MemoryBudget>,
    trim_fraction: f64,
    min_pinned_alive: AtomicUsize,
    pub(crate) stats: StatsCounters,
    pub(crate) decoders: Arc<DecoderSet>,
    pub(crate) owner: OwnerHandle,
    pub(crate) queue: Arc<DecodeQueue>,
    clock: Arc<AccessClock>,
    /// Serializes eviction passes
    eviction: Mutex<()>,
}

impl ManagerInner {
    pub(crate) fn variant_context(&self) -> VariantContext {
        VariantContext {
            budget: Arc::clone(&self.budget),
            clock: Arc::clone(&self.clock),
            owner: self.owner.clone(),
        }
    }

    /// Charge bytes to the budget, evicting before returning if the
    /// ceiling is crossed
    pub(crate) fn on_memory_increased(&self, bytes: usize) {
        let current = self.budget.record_allocation(bytes);
        debug!(bytes, current, "memory increased");
        if current > self.budget.max_bytes() {
            self.evict();
        }
    }

    pub(crate) fn on_memory_decreased(&self, bytes: usize) {
        let current = self.budget.record_deallocation(bytes);
        debug!(bytes, current, "memory decreased");
    }

    fn min_pinned_alive(&self) -> usize {
        self.min_pinned_alive.load(Ordering::Acquire)
    }

    fn evict(&self) -> EvictionOutcome {
        let _guard = self.eviction.lock().unwrap();
        let before = self.budget.current_usage();

        let images: Vec<Arc<LogicalImage>> = self.images.lock().unwrap().values().cloned().collect();
        let mut safe = Vec::new();
        let mut pinned = Vec::new();
        for image in &images {
            for variant in image.live_variants() {
                let list = if variant.is_safe_to_dispose() {
                    &mut safe
                } else {
                    &mut pinned
                };
                let stamp = variant.last_used();
                insert_by_age(
                    list,
                    Candidate {
                        image: Arc::clone(image),
                        variant,
                        stamp,
                    },
                );
            }
        }

        let mut outcome = EvictionOutcome::default();

        let mut safe = safe.into_iter();
        while self.budget.is_over_trim_target() {
            let Some(candidate) = safe.next() else { break };
            if let Some(bytes) = candidate.dispose() {
                outcome.safe_disposed += 1;
                outcome.bytes_freed += bytes;
            }
        }

        let floor = self.min_pinned_alive();
        let mut survivors = pinned.len();
        let mut pinned = pinned.into_iter();
        while self.budget.is_over_budget() && survivors > floor {
            let Some(candidate) = pinned.next() else { break };
            survivors -= 1;
            if let Some(bytes) = candidate.dispose() {
                outcome.pinned_disposed += 1;
                outcome.bytes_freed += bytes;
            }
        }

        self.stats.record_eviction(&outcome);
        info!(
            before,
            current = self.budget.current_usage(),
            max = self.budget.max_bytes(),
            trim_target = self.budget.trim_target(),
            safe = outcome.safe_disposed,
            pinned = outcome.pinned_disposed,
            "cache trimmed"
        );
        outcome
    }
}

/// Registry of logical images under one memory budget
///
/// The thread that owns the manager is the owner context: it must drain
/// [`run_pending`](Self::run_pending) (or the [`owner`](Self::owner) queue) to
/// receive async completions and consumer notifications.
///
/// # Example
///
/// ```
/// use imagine_cache::{CacheConfig, ImageCacheManager};
/// use image::RgbaImage;
/// use std::sync::Arc;
///
/// let config = CacheConfig::default().with_memory_ceiling(64 * 1024 * 1024);
/// let manager = ImageCacheManager::new(&config).unwrap();
///
/// let image = manager.raw(Arc::new(RgbaImage::new(640, 480)));
/// let variant = image.get_variant(100, 100).unwrap();
/// assert_eq!(variant.size_factor(), 4);
/// assert!(image.is_ready(100, 100));
/// assert_eq!(manager.current_bytes(), variant.byte_size());
/// ```
pub struct ImageCacheManager {
    pool: WorkerPool,
    owner: OwnerQueue,
    inner: Arc<ManagerInner>,
}

impl ImageCacheManager {
    /// Manager with the stock decode backends
    pub fn new(config: &CacheConfig) -> imagine_scheduler::Result<Self> {
        Self::with_decoders(config, DecoderSet::default())
    }

    pub fn with_decoders(
        config: &CacheConfig,
        decoders: DecoderSet,
    ) -> imagine_scheduler::Result<Self> {
        let owner = OwnerQueue::new();
        let queue = Arc::new(DecodeQueue::new());
        let pool = WorkerPool::new(
            Arc::clone(&queue),
            WorkerPoolConfig::new(config.decode_workers),
        )?;

        let inner = Arc::new(ManagerInner {
            images: Mutex::new(HashMap::new()),
            budget: Arc::new(MemoryBudget::new(
                config.max_bytes(),
                config.trim_target_bytes(),
            )),
            trim_fraction: config.trim_fraction,
            min_pinned_alive: AtomicUsize::new(config.min_pinned_alive),
            stats: StatsCounters::default(),
            decoders: Arc::new(decoders),
            owner: owner.handle(),
            queue,
            clock: Arc::new(AccessClock::new()),
            eviction: Mutex::new(()),
        });

        debug!(
            max = config.max_bytes(),
            trim_target = config.trim_target_bytes(),
            min_pinned_alive = config.min_pinned_alive,
            workers = pool.num_workers(),
            "image cache manager created"
        );

        Ok(Self { pool, owner, inner })
    }

    /// Get or create the logical image for a source
    pub fn image(&self, source: Source) -> Arc<LogicalImage> {
        let key = source.key();
        let mut images = self.inner.images.lock().unwrap();
        Arc::clone(images.entry(key.clone()).or_insert_with(|| {
            Arc::new(LogicalImage::new(key, source, Arc::downgrade(&self.inner)))
        }))
    }

    pub fn remote(&self, url: impl Into<String>) -> Arc<LogicalImage> {
        self.image(Source::remote(url))
    }

    pub fn file(&self, path: impl Into<PathBuf>) -> Arc<LogicalImage> {
        self.image(Source::file(path))
    }

    pub fn resource(&self, name: impl Into<String>) -> Arc<LogicalImage> {
        self.image(Source::resource(name))
    }

    /// Register an in-memory buffer
    ///
    /// Every call creates a new image, even for the same buffer. Keep the
    /// returned image (or its [`LogicalImage::source`]) to refer to it again.
    pub fn raw(&self, image: Arc<RgbaImage>) -> Arc<LogicalImage> {
        self.image(Source::raw(image))
    }

    /// Registered image for a key, without creating one
    pub fn find(&self, key: &ImageKey) -> Option<Arc<LogicalImage>> {
        self.inner.images.lock().unwrap().get(key).cloned()
    }

    pub fn image_count(&self) -> usize {
        self.inner.images.lock().unwrap().len()
    }

    /// Charge bytes to the budget; evicts before returning if over the ceiling
    pub fn on_memory_increased(&self, bytes: usize) {
        self.inner.on_memory_increased(bytes);
    }

    pub fn on_memory_decreased(&self, bytes: usize) {
        self.inner.on_memory_decreased(bytes);
    }

    pub fn current_bytes(&self) -> usize {
        self.inner.budget.current_usage()
    }

    pub fn max_bytes(&self) -> usize {
        self.inner.budget.max_bytes()
    }

    pub fn trim_target_bytes(&self) -> usize {
        self.inner.budget.trim_target()
    }

    pub fn pressure(&self) -> MemoryPressure {
        self.inner.budget.pressure()
    }

    /// Set the ceiling; the trim target follows the configured fraction
    ///
    /// Takes effect at the next allocation or [`trim`](Self::trim).
    pub fn set_max_bytes(&self, bytes: usize) {
        let trim_target = (bytes as f64 * self.inner.trim_fraction) as usize;
        self.inner.budget.set_max_bytes(bytes);
        self.inner.budget.set_trim_target(trim_target);
        debug!(max = bytes, trim_target, "budget changed");
    }

    pub fn set_trim_target_bytes(&self, bytes: usize) {
        self.inner.budget.set_trim_target(bytes);
        debug!(trim_target = bytes, "trim target changed");
    }

    pub fn set_min_pinned_alive(&self, count: usize) {
        self.inner.min_pinned_alive.store(count, Ordering::Release);
    }

    pub fn min_pinned_alive(&self) -> usize {
        self.inner.min_pinned_alive()
    }

    /// Run an eviction pass now
    pub fn trim(&self) -> EvictionOutcome {
        self.inner.evict()
    }

    /// Dispose every variant; the images stay registered
    pub fn clear(&self) -> usize {
        let images: Vec<_> = self.inner.images.lock().unwrap().values().cloned().collect();
        let disposed = images.iter().map(|image| image.dispose_all()).sum();
        debug!(disposed, "cache cleared");
        disposed
    }

    /// Run queued owner-context tasks (completions, consumer notices)
    pub fn run_pending(&self) -> usize {
        self.owner.run_pending()
    }

    /// The owner-context queue
    pub fn owner(&self) -> &OwnerQueue {
        &self.owner
    }

    pub fn stats(&self) -> CacheStats {
        let images: Vec<_> = self.inner.images.lock().unwrap().values().cloned().collect();
        let counters = &self.inner.stats;
        CacheStats {
            image_count: images.len(),
            variant_count: images.iter().map(|image| image.variant_count()).sum(),
            memory_used: self.inner.budget.current_usage(),
            memory_limit: self.inner.budget.max_bytes(),
            trim_target: self.inner.budget.trim_target(),
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            decodes: counters.decodes.load(Ordering::Relaxed),
            decode_failures: counters.decode_failures.load(Ordering::Relaxed),
            safe_evictions: counters.safe_evictions.load(Ordering::Relaxed),
            pinned_evictions: counters.pinned_evictions.load(Ordering::Relaxed),
            trims: counters.trims.load(Ordering::Relaxed),
        }
    }

    /// Decode jobs queued but not started
    pub fn pending_decodes(&self) -> usize {
        self.pool.queue().pending_jobs()
    }

    /// Background queue serviced by this manager's workers
    ///
    /// Shared with [`DiskCacheManager::insert_async`](crate::DiskCacheManager::insert_async)
    /// so disk writes run on the same pool.
    pub fn decode_queue(&self) -> &Arc<DecodeQueue> {
        self.pool.queue()
    }
}

impl fmt::Debug for ImageCacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageCacheManager")
            .field("stats", &self.stats())
            .field("workers", &self.pool.num_workers())
            .finish()
    }
}
