//! Logical images
//!
//! A logical image is one source, independent of decoded size. It owns at
//! most one live variant per size factor and at most one outstanding
//! background decode. A newer visible request cancels the older one, and
//! completions of superseded decodes are dropped on the owner context before
//! they can touch any state.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use image::RgbaImage;
use imagine_decode::{
    size_factor, Bounds, DecodeBackend, DecodeRequest, DecodedRaster, ImageKey, Source,
};
use imagine_scheduler::{CancellationToken, JobId, JobPriority};
use tracing::{debug, trace, warn};

use crate::manager::ManagerInner;
use crate::{ConsumerHandle, ImageError, ImageVariant};

/// Outcome of a variant request
pub type LoadResult = Result<Arc<ImageVariant>, ImageError>;

type LoadCallback = Box<dyn FnOnce(LoadResult) + Send + 'static>;

struct PendingDecode {
    ticket: u64,
    job: JobId,
    token: CancellationToken,
}

struct ImageState {
    source: Source,
    natural: Option<Bounds>,
    malformed: bool,
    variants: Vec<Arc<ImageVariant>>,
    pending: Option<PendingDecode>,
    next_ticket: u64,
    /// Bumped whenever the source changes; rasters from older generations are discarded
    generation: u64,
}

impl ImageState {
    /// Live variant with exactly this factor, pruning disposed ones on the way
    fn live(&mut self, factor: u32) -> Option<Arc<ImageVariant>> {
        self.variants.retain(|variant| !variant.is_disposed());
        self.variants
            .iter()
            .find(|variant| variant.size_factor() == factor)
            .cloned()
    }

    fn factor_for(&self, width: u32, height: u32) -> Option<u32> {
        self.natural
            .map(|natural| size_factor(natural.width, natural.height, width, height))
    }
}

/// One source-identified image and its decoded variants
pub struct LogicalImage {
    key: ImageKey,
    manager: Weak<ManagerInner>,
    state: Mutex<ImageState>,
}

impl LogicalImage {
    pub(crate) fn new(key: ImageKey, source: Source, manager: Weak<ManagerInner>) -> Self {
        Self {
            key,
            manager,
            state: Mutex::new(ImageState {
                source,
                natural: None,
                malformed: false,
                variants: Vec::new(),
                pending: None,
                next_ticket: 0,
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ImageState> {
        self.state.lock().unwrap()
    }

    fn manager(&self) -> Result<Arc<ManagerInner>, ImageError> {
        self.manager.upgrade().ok_or(ImageError::Detached)
    }

    /// Key this image is registered under; fixed for its lifetime
    pub fn key(&self) -> &ImageKey {
        &self.key
    }

    pub fn source(&self) -> Source {
        self.lock().source.clone()
    }

    /// URL or file path of the source, if it has one
    pub fn path(&self) -> Option<String> {
        self.lock().source.path()
    }

    /// Natural bounds, known after the first successful decode
    pub fn natural_bounds(&self) -> Option<Bounds> {
        self.lock().natural
    }

    /// True once a decode proved the source unusable, and always while the
    /// source is empty
    pub fn is_malformed(&self) -> bool {
        let state = self.lock();
        state.malformed || state.source.is_empty()
    }

    /// Number of live variants
    pub fn variant_count(&self) -> usize {
        let mut state = self.lock();
        state.variants.retain(|variant| !variant.is_disposed());
        state.variants.len()
    }

    /// Whether a decode is queued or running
    pub fn has_pending_decode(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// Existing live variant for the requested box, without decoding
    pub fn variant(&self, width: u32, height: u32) -> Option<Arc<ImageVariant>> {
        let mut state = self.lock();
        let factor = state.factor_for(width, height)?;
        state.live(factor)
    }

    /// True iff a live variant at the matching factor exists
    pub fn is_ready(&self, width: u32, height: u32) -> bool {
        self.variant(width, height).is_some()
    }

    /// Pixels of an existing variant; never decodes
    pub fn raw_pixels(&self, width: u32, height: u32) -> Option<Arc<RgbaImage>> {
        self.variant(width, height)?.pixels()
    }

    /// Variant for the requested box, decoding on the calling thread if needed
    ///
    /// A zero width or height asks for the natural size.
    pub fn get_variant(&self, width: u32, height: u32) -> LoadResult {
        let manager = self.manager()?;
        let (source, generation) = {
            let mut state = self.lock();
            if let Some(result) = self.resolve_cached(&mut state, &manager, width, height) {
                return result;
            }
            (state.source.clone(), state.generation)
        };

        manager.stats.record_miss();
        let decoded = manager
            .decoders
            .decode(&source, DecodeRequest::new(width, height));
        self.finish_decode(&manager, generation, decoded)
    }

    /// Natural-size variant
    pub fn get_variant_full(&self) -> LoadResult {
        self.get_variant(0, 0)
    }

    /// Decode in the background and deliver the result on the owner context
    ///
    /// Cancels any decode already in flight for this image; its callback will
    /// never run. A variant that is already cached is delivered immediately,
    /// on the calling thread.
    pub fn get_variant_async<F>(self: &Arc<Self>, width: u32, height: u32, callback: F)
    where
        F: FnOnce(LoadResult) + Send + 'static,
    {
        self.request_async(width, height, JobPriority::Visible, Some(Box::new(callback)));
    }

    /// Natural-size variant, in the background
    pub fn get_variant_full_async<F>(self: &Arc<Self>, callback: F)
    where
        F: FnOnce(LoadResult) + Send + 'static,
    {
        self.get_variant_async(0, 0, callback);
    }

    /// Make sure a variant for the box exists, decoding synchronously
    ///
    /// Returns whether a variant is now available.
    pub fn preload(&self, width: u32, height: u32) -> bool {
        match self.get_variant(width, height) {
            Ok(_) => true,
            Err(err) => {
                debug!(key = %self.key, error = %err, "preload failed");
                false
            }
        }
    }

    /// Queue a low-priority decode for the box
    ///
    /// Skipped while another decode is pending, so a preload never
    /// supersedes a request somebody is waiting on.
    pub fn preload_async(self: &Arc<Self>, width: u32, height: u32) {
        self.request_async(width, height, JobPriority::Prefetch, None);
    }

    /// Cancel the outstanding decode, if any; its completion is suppressed
    pub fn cancel_pending(&self) -> bool {
        let mut state = self.lock();
        self.cancel_pending_locked(&mut state)
    }

    /// Bind a consumer to the variant for the box
    ///
    /// Returns `false` if no live variant matches.
    pub fn retain(&self, width: u32, height: u32, consumer: &ConsumerHandle) -> bool {
        self.variant(width, height)
            .is_some_and(|variant| variant.retain(consumer))
    }

    /// Unbind a consumer from the variant for the box
    ///
    /// The variant only becomes eligible for eviction; it is not disposed here.
    /// Once no variant has a consumer left, any pending background decode is
    /// cancelled and its callback never runs.
    pub fn release(&self, width: u32, height: u32, consumer: &ConsumerHandle) -> bool {
        let released = self
            .variant(width, height)
            .is_some_and(|variant| variant.release(consumer));
        if released {
            let mut state = self.lock();
            let in_use = state
                .variants
                .iter()
                .any(|variant| !variant.is_disposed() && variant.consumer_count() > 0);
            if !in_use {
                self.cancel_pending_locked(&mut state);
            }
        }
        released
    }

    /// Point the image at a different source
    ///
    /// No-op if `source` equals the current one. Otherwise the pending decode
    /// is cancelled, every variant is disposed, and the malformed flag and
    /// natural bounds are reset.
    pub fn invalidate_source(&self, source: Source) {
        let stale = {
            let mut state = self.lock();
            if state.source == source {
                return;
            }
            self.cancel_pending_locked(&mut state);
            state.source = source;
            state.malformed = false;
            state.natural = None;
            state.generation += 1;
            std::mem::take(&mut state.variants)
        };

        debug!(key = %self.key, variants = stale.len(), "source invalidated");
        for variant in stale {
            variant.dispose();
        }
    }

    /// Snapshot of the live variants
    pub(crate) fn live_variants(&self) -> Vec<Arc<ImageVariant>> {
        let mut state = self.lock();
        state.variants.retain(|variant| !variant.is_disposed());
        state.variants.clone()
    }

    pub(crate) fn remove_variant(&self, target: &Arc<ImageVariant>) {
        self.lock()
            .variants
            .retain(|variant| !Arc::ptr_eq(variant, target));
    }

    /// Dispose and drop every variant, returning how many were live
    pub(crate) fn dispose_all(&self) -> usize {
        let variants = std::mem::take(&mut self.lock().variants);
        variants
            .into_iter()
            .filter(|variant| variant.dispose())
            .count()
    }

    /// Answer a request without decoding, when possible
    ///
    /// `None` means a decode is needed.
    fn resolve_cached(
        &self,
        state: &mut ImageState,
        manager: &ManagerInner,
        width: u32,
        height: u32,
    ) -> Option<LoadResult> {
        if state.source.is_empty() {
            state.malformed = true;
            return Some(Err(ImageError::Malformed(format!(
                "{} has an empty source",
                self.key
            ))));
        }
        if state.malformed {
            return Some(Err(ImageError::Malformed(format!(
                "{} is malformed",
                self.key
            ))));
        }

        let factor = state.factor_for(width, height)?;
        let variant = state.live(factor)?;
        manager.stats.record_hit();
        Some(Ok(variant))
    }

    fn request_async(
        self: &Arc<Self>,
        width: u32,
        height: u32,
        priority: JobPriority,
        callback: Option<LoadCallback>,
    ) {
        let manager = match self.manager() {
            Ok(manager) => manager,
            Err(err) => {
                if let Some(callback) = callback {
                    callback(Err(err));
                }
                return;
            }
        };

        let cached = {
            let mut state = self.lock();
            if priority == JobPriority::Visible {
                self.cancel_pending_locked(&mut state);
            } else if state.pending.is_some() {
                trace!(key = %self.key, "preload skipped, decode already pending");
                return;
            }

            match self.resolve_cached(&mut state, &manager, width, height) {
                Some(result) => result,
                None => {
                    manager.stats.record_miss();
                    self.submit_decode(&mut state, &manager, width, height, priority, callback);
                    return;
                }
            }
        };

        if let Some(callback) = callback {
            callback(cached);
        }
    }

    fn submit_decode(
        self: &Arc<Self>,
        state: &mut ImageState,
        manager: &ManagerInner,
        width: u32,
        height: u32,
        priority: JobPriority,
        callback: Option<LoadCallback>,
    ) {
        state.next_ticket += 1;
        let ticket = state.next_ticket;
        let generation = state.generation;
        let source = state.source.clone();
        let request = DecodeRequest::new(width, height);

        let image = Arc::clone(self);
        let decoders = Arc::clone(&manager.decoders);
        let owner = manager.owner.clone();

        let (job, token) = manager.queue.submit(priority, self.key.as_str(), move |token: &CancellationToken| {
            if token.is_cancelled() {
                return;
            }
            let decoded = decoders.decode(&source, request);
            let token = token.clone();
            owner.post(move || image.complete_async(ticket, generation, &token, decoded, callback));
        });

        trace!(key = %self.key, job, ?priority, width, height, "decode queued");
        state.pending = Some(PendingDecode { ticket, job, token });
    }

    /// Runs on the owner context when a background decode finishes
    fn complete_async(
        &self,
        ticket: u64,
        generation: u64,
        token: &CancellationToken,
        decoded: imagine_decode::Result<DecodedRaster>,
        callback: Option<LoadCallback>,
    ) {
        if token.is_cancelled() {
            trace!(key = %self.key, ticket, "cancelled decode completion dropped");
            return;
        }
        {
            let mut state = self.lock();
            match &state.pending {
                Some(pending) if pending.ticket == ticket => state.pending = None,
                _ => {
                    trace!(key = %self.key, ticket, "superseded decode completion dropped");
                    return;
                }
            }
        }

        let result = match self.manager() {
            Ok(manager) => self.finish_decode(&manager, generation, decoded),
            Err(err) => Err(err),
        };
        if let Some(callback) = callback {
            callback(result);
        }
    }

    /// Register a decode outcome
    ///
    /// Memory is reported before the variant is inserted, so eviction
    /// triggered by the report can never pick the new variant.
    fn finish_decode(
        &self,
        manager: &ManagerInner,
        generation: u64,
        decoded: imagine_decode::Result<DecodedRaster>,
    ) -> LoadResult {
        let raster = match decoded {
            Ok(raster) => raster,
            Err(err) => {
                manager.stats.record_decode_failure();
                if err.is_permanent() {
                    let mut state = self.lock();
                    if state.generation == generation {
                        state.malformed = true;
                    }
                }
                warn!(key = %self.key, error = %err, "decode failed");
                return Err(err.into());
            }
        };

        {
            let mut state = self.lock();
            if state.generation != generation {
                return Err(ImageError::Superseded);
            }
            state.natural.get_or_insert(raster.natural);
            if let Some(existing) = state.live(raster.factor) {
                trace!(key = %self.key, factor = raster.factor, "duplicate decode discarded");
                return Ok(existing);
            }
        }

        let factor = raster.factor;
        let bytes = raster.byte_size();
        manager.on_memory_increased(bytes);
        let variant = ImageVariant::new(raster.image, factor, manager.variant_context());

        let mut state = self.lock();
        if state.generation != generation {
            drop(state);
            variant.dispose();
            return Err(ImageError::Superseded);
        }
        if let Some(existing) = state.live(factor) {
            drop(state);
            variant.dispose();
            return Ok(existing);
        }
        state.variants.push(Arc::clone(&variant));
        drop(state);

        manager.stats.record_decode();
        debug!(key = %self.key, factor, bytes, "variant registered");
        Ok(variant)
    }

    fn cancel_pending_locked(&self, state: &mut ImageState) -> bool {
        let Some(pending) = state.pending.take() else {
            return false;
        };
        pending.token.cancel();
        if let Some(manager) = self.manager.upgrade() {
            manager.queue.cancel_job(pending.job);
        }
        trace!(key = %self.key, job = pending.job, "pending decode cancelled");
        true
    }
}

impl fmt::Debug for LogicalImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("LogicalImage")
            .field("key", &self.key)
            .field("source", &state.source)
            .field("natural", &state.natural)
            .field("malformed", &state.malformed)
            .field("variants", &state.variants.len())
            .field("pending", &state.pending.is_some())
            .finish()
    }
}
