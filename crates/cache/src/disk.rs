//! Second-tier cache of encoded rasters on disk.
//!
//! Single-tier recency eviction over a [`BlobStore`]: nothing pins a disk
//! entry, so when the running total passes the ceiling the oldest entries go
//! until the total is back under the trim size.
//!
//! Bytes are counted once per tracked entry, either when it is inserted or
//! when an entry written by an earlier process is first looked up. Reading a
//! blob never changes the total.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use image::buffer::ConvertBuffer;
use image::codecs::jpeg::JpegEncoder;
use image::{RgbImage, RgbaImage};
use imagine_scheduler::{DecodeQueue, JobId, JobPriority};
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::{DiskCacheError, DiskResult};
use crate::store::{BlobStore, DiskEntry, FsBlobStore};

/// JPEG quality used for rasters written to disk
pub const DISK_JPEG_QUALITY: u8 = 90;

/// Statistics for monitoring disk cache performance
#[derive(Debug, Clone, Default)]
pub struct DiskCacheStats {
    /// Blob reads that found a payload
    pub hits: u64,
    /// Blob reads that found nothing
    pub misses: u64,
    /// Entries written
    pub inserts: u64,
    /// Inserts dropped because a larger factor was already stored
    pub skipped_inserts: u64,
    /// Entries picked up from the store on first lookup
    pub adopted: u64,
    /// Entries evicted to get back under the trim size
    pub evictions: u64,
    /// Eviction passes run
    pub trims: u64,
    /// Entries currently tracked
    pub entry_count: usize,
    /// Bytes currently tracked
    pub disk_used: usize,
}

impl DiskCacheStats {
    /// Cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Disk utilization against `limit` (0.0 to 1.0 while under it)
    pub fn disk_utilization(&self, limit: usize) -> f64 {
        if limit == 0 {
            0.0
        } else {
            self.disk_used as f64 / limit as f64
        }
    }
}

struct DiskState {
    entries: HashMap<String, DiskEntry>,
    /// front = least recently used, back = most recently used
    lru_queue: VecDeque<String>,
    current_bytes: usize,
    max_bytes: usize,
    trim_bytes: usize,
    stats: DiskCacheStats,
}

impl DiskState {
    fn touch(&mut self, key: &str) {
        self.lru_queue.retain(|k| k != key);
        self.lru_queue.push_back(key.to_string());
        if let Some(entry) = self.entries.get_mut(key) {
            entry.touch();
        }
    }

    /// Start tracking `entry`, queued by its `last_used` stamp
    ///
    /// Fresh entries land at the back; entries adopted from the store slot in
    /// before anything used more recently.
    fn track(&mut self, entry: DiskEntry) {
        self.current_bytes += entry.byte_size;
        let entries = &self.entries;
        let at = self
            .lru_queue
            .iter()
            .position(|k| entries.get(k).is_some_and(|e| e.last_used > entry.last_used))
            .unwrap_or(self.lru_queue.len());
        self.lru_queue.insert(at, entry.key.clone());
        self.entries.insert(entry.key.clone(), entry);
    }

    fn forget(&mut self, key: &str) -> Option<DiskEntry> {
        let entry = self.entries.remove(key)?;
        self.lru_queue.retain(|k| k != key);
        self.current_bytes = self.current_bytes.saturating_sub(entry.byte_size);
        Some(entry)
    }
}

/// Disk-backed cache of encoded variant rasters
///
/// Cloning yields another handle to the same cache. Store I/O runs under the
/// cache lock, so handles may be used from worker threads freely.
#[derive(Clone)]
pub struct DiskCacheManager {
    store: Arc<dyn BlobStore>,
    state: Arc<Mutex<DiskState>>,
}

impl DiskCacheManager {
    /// Create a cache over `store` that evicts past `max_bytes` down to `trim_bytes`
    pub fn new(store: Arc<dyn BlobStore>, max_bytes: usize, trim_bytes: usize) -> Self {
        info!(
            max_kb = max_bytes / 1024,
            trim_kb = trim_bytes / 1024,
            "starting disk cache"
        );
        let state = DiskState {
            entries: HashMap::new(),
            lru_queue: VecDeque::new(),
            current_bytes: 0,
            max_bytes,
            trim_bytes: trim_bytes.min(max_bytes),
            stats: DiskCacheStats::default(),
        };
        Self {
            store,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Filesystem-backed cache using the configured directory and sizes
    pub fn from_config(config: &CacheConfig) -> DiskResult<Self> {
        let store = FsBlobStore::open(&config.disk_cache_dir)?;
        Ok(Self::new(
            Arc::new(store),
            config.disk_cache_size,
            config.disk_trim_size,
        ))
    }

    /// Store an encoded blob under `key`
    ///
    /// An existing entry is replaced only by one with a strictly larger size
    /// factor. Returns whether the blob was written.
    pub fn insert(&self, key: &str, blob: &[u8], size_factor: u32) -> DiskResult<bool> {
        let mut state = self.state.lock().unwrap();

        let existing = self.lookup(&mut state, key)?;
        if let Some(old) = &existing {
            if old.size_factor >= size_factor {
                state.stats.skipped_inserts += 1;
                debug!(key, stored = old.size_factor, factor = size_factor, "disk insert skipped");
                return Ok(false);
            }
        }

        let entry = DiskEntry::new(key, size_factor, blob.len());
        self.store.put(&entry, blob)?;

        if let Some(old) = existing {
            state.forget(key);
            self.store.delete(old.blob_id)?;
        }

        state.track(entry);
        state.stats.inserts += 1;
        debug!(
            key,
            factor = size_factor,
            bytes = blob.len(),
            current = state.current_bytes,
            "disk entry written"
        );

        if state.current_bytes > state.max_bytes {
            self.trim_locked(&mut state)?;
        }
        Ok(true)
    }

    /// Encode `raster` as JPEG and store it
    pub fn insert_raster(&self, key: &str, raster: &RgbaImage, size_factor: u32) -> DiskResult<bool> {
        let blob = encode_jpeg(raster)?;
        self.insert(key, &blob, size_factor)
    }

    /// Encode and store `raster` on a worker thread
    ///
    /// Failures are logged; a cancelled job writes nothing.
    pub fn insert_async(
        &self,
        queue: &DecodeQueue,
        key: impl Into<String>,
        raster: Arc<RgbaImage>,
        size_factor: u32,
    ) -> JobId {
        let key = key.into();
        let cache = self.clone();
        let label = format!("disk:{}", key);
        let (job_id, _) = queue.submit(JobPriority::Prefetch, label, move |token| {
            if token.is_cancelled() {
                return;
            }
            if let Err(e) = cache.insert_raster(&key, &raster, size_factor) {
                warn!(key = %key, error = %e, "disk insert failed");
            }
        });
        job_id
    }

    /// Metadata for `key`, adopting it from the store on a miss
    pub fn entry(&self, key: &str) -> DiskResult<Option<DiskEntry>> {
        let mut state = self.state.lock().unwrap();
        self.lookup(&mut state, key)
    }

    /// Read the payload stored under `key` and mark it recently used
    ///
    /// A tracked entry whose payload has vanished from the store is dropped
    /// and reported as [`DiskCacheError::MissingBlob`].
    pub fn blob(&self, key: &str) -> DiskResult<Option<Vec<u8>>> {
        let mut state = self.state.lock().unwrap();

        let Some(entry) = self.lookup(&mut state, key)? else {
            state.stats.misses += 1;
            return Ok(None);
        };

        match self.store.get_blob(entry.blob_id)? {
            Some(bytes) => {
                state.touch(key);
                state.stats.hits += 1;
                Ok(Some(bytes))
            }
            None => {
                state.forget(key);
                state.stats.misses += 1;
                self.store.remove_entry(key)?;
                warn!(key, blob = %entry.blob_id, "disk entry lost its payload");
                Err(DiskCacheError::MissingBlob(entry.blob_id))
            }
        }
    }

    /// Drop `key` from the cache and the store
    pub fn remove(&self, key: &str) -> DiskResult<bool> {
        let mut state = self.state.lock().unwrap();
        let entry = match state.forget(key) {
            Some(entry) => Some(entry),
            None => self.store.get(key)?,
        };

        match entry {
            Some(entry) => {
                self.store.delete(entry.blob_id)?;
                self.store.remove_entry(key)?;
                debug!(key, current = state.current_bytes, "disk entry removed");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Evict oldest entries until the total is at or under the trim size
    ///
    /// Returns the number of entries evicted.
    pub fn trim(&self) -> DiskResult<usize> {
        let mut state = self.state.lock().unwrap();
        self.trim_locked(&mut state)
    }

    /// Whether `key` is tracked in this process (no store lookup)
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().unwrap().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current_bytes(&self) -> usize {
        self.state.lock().unwrap().current_bytes
    }

    pub fn max_bytes(&self) -> usize {
        self.state.lock().unwrap().max_bytes
    }

    pub fn trim_bytes(&self) -> usize {
        self.state.lock().unwrap().trim_bytes
    }

    pub fn stats(&self) -> DiskCacheStats {
        let state = self.state.lock().unwrap();
        let mut stats = state.stats.clone();
        stats.entry_count = state.entries.len();
        stats.disk_used = state.current_bytes;
        stats
    }

    /// Tracked entry, or the store's record adopted into the running total
    fn lookup(&self, state: &mut DiskState, key: &str) -> DiskResult<Option<DiskEntry>> {
        if let Some(entry) = state.entries.get(key) {
            return Ok(Some(entry.clone()));
        }

        let Some(entry) = self.store.get(key)? else {
            return Ok(None);
        };

        state.track(entry);
        state.stats.adopted += 1;
        debug!(key, current = state.current_bytes, "disk entry adopted from store");

        if state.current_bytes > state.max_bytes {
            self.trim_locked(state)?;
        }
        Ok(state.entries.get(key).cloned())
    }

    fn trim_locked(&self, state: &mut DiskState) -> DiskResult<usize> {
        if state.current_bytes <= state.trim_bytes {
            return Ok(0);
        }

        info!(
            current_kb = state.current_bytes / 1024,
            max_kb = state.max_bytes / 1024,
            "disk trim started"
        );

        let mut evicted = 0;
        while state.current_bytes > state.trim_bytes {
            let Some(key) = state.lru_queue.front().cloned() else {
                break;
            };
            let Some(entry) = state.forget(&key) else {
                state.lru_queue.pop_front();
                continue;
            };
            self.store.delete(entry.blob_id)?;
            self.store.remove_entry(&key)?;
            evicted += 1;
            state.stats.evictions += 1;
        }
        state.stats.trims += 1;

        info!(
            evicted,
            current_kb = state.current_bytes / 1024,
            trim_kb = state.trim_bytes / 1024,
            "disk trim finished"
        );
        Ok(evicted)
    }
}

impl std::fmt::Debug for DiskCacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("DiskCacheManager")
            .field("entries", &state.entries.len())
            .field("current_bytes", &state.current_bytes)
            .field("max_bytes", &state.max_bytes)
            .field("trim_bytes", &state.trim_bytes)
            .finish()
    }
}

fn encode_jpeg(raster: &RgbaImage) -> DiskResult<Vec<u8>> {
    // JPEG has no alpha channel
    let rgb: RgbImage = raster.convert();
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, DISK_JPEG_QUALITY).encode_image(&rgb)?;
    Ok(bytes)
}
