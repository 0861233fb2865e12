//! One decoded raster at one size factor

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use image::RgbaImage;
use imagine_scheduler::OwnerHandle;
use tracing::trace;

use crate::budget::AccessClock;
use crate::{ConsumerHandle, ConsumerId, MemoryBudget};

/// What a variant needs from its manager, without pointing back at it
#[derive(Debug, Clone)]
pub(crate) struct VariantContext {
    pub(crate) budget: Arc<MemoryBudget>,
    pub(crate) clock: Arc<AccessClock>,
    pub(crate) owner: OwnerHandle,
}

struct VariantState {
    /// `None` once disposed
    pixels: Option<Arc<RgbaImage>>,
    consumers: HashMap<ConsumerId, ConsumerHandle>,
}

/// A decoded raster for one logical image at one size factor
///
/// Bound consumers pin the variant: eviction prefers variants nobody
/// displays. Disposal frees the pixels, returns the bytes to the budget and
/// tells every still-bound consumer to detach.
pub struct ImageVariant {
    size_factor: u32,
    width: u32,
    height: u32,
    byte_size: usize,
    last_used: AtomicU64,
    state: Mutex<VariantState>,
    ctx: VariantContext,
}

impl ImageVariant {
    /// Wrap decoded pixels
    ///
    /// The caller has already charged the bytes to the budget.
    pub(crate) fn new(image: RgbaImage, size_factor: u32, ctx: VariantContext) -> Arc<Self> {
        let byte_size = image.as_raw().len();
        Arc::new(Self {
            size_factor,
            width: image.width(),
            height: image.height(),
            byte_size,
            last_used: AtomicU64::new(ctx.clock.tick()),
            state: Mutex::new(VariantState {
                pixels: Some(Arc::new(image)),
                consumers: HashMap::new(),
            }),
            ctx,
        })
    }

    pub fn size_factor(&self) -> u32 {
        self.size_factor
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes this variant charges to the budget while alive
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// Decoded pixels, or `None` once disposed
    pub fn pixels(&self) -> Option<Arc<RgbaImage>> {
        self.state.lock().unwrap().pixels.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().unwrap().pixels.is_none()
    }

    pub fn consumer_count(&self) -> usize {
        self.state.lock().unwrap().consumers.len()
    }

    /// Access stamp; larger is more recent
    pub fn last_used(&self) -> u64 {
        self.last_used.load(Ordering::Acquire)
    }

    /// Bind a consumer and refresh the access stamp
    ///
    /// The consumer is told via `on_variant_ready` on the owner context.
    /// Returns `false` if the variant is already disposed.
    pub fn retain(self: &Arc<Self>, consumer: &ConsumerHandle) -> bool {
        let newly_bound = {
            let mut state = self.state.lock().unwrap();
            if state.pixels.is_none() {
                return false;
            }
            self.last_used.store(self.ctx.clock.tick(), Ordering::Release);
            state
                .consumers
                .insert(consumer.id(), consumer.clone())
                .is_none()
        };

        if newly_bound {
            let variant = Arc::clone(self);
            let consumer = consumer.clone();
            self.ctx.owner.post(move || {
                // Disposed in the meantime: the removal notice is already queued
                if !variant.is_disposed() {
                    consumer.consumer().on_variant_ready(&variant);
                }
            });
        }
        true
    }

    /// Unbind a consumer; returns `true` if it was bound
    pub fn release(&self, consumer: &ConsumerHandle) -> bool {
        self.state
            .lock()
            .unwrap()
            .consumers
            .remove(&consumer.id())
            .is_some()
    }

    /// True when no consumer is bound
    pub fn is_safe_to_dispose(&self) -> bool {
        self.state.lock().unwrap().consumers.is_empty()
    }

    /// Free the pixels
    ///
    /// Idempotent. The bytes go back to the budget immediately; bound
    /// consumers are notified on the owner context. Returns `true` if this
    /// call did the disposal.
    pub fn dispose(&self) -> bool {
        let detached = {
            let mut state = self.state.lock().unwrap();
            if state.pixels.take().is_none() {
                return false;
            }
            std::mem::take(&mut state.consumers)
        };

        let current = self.ctx.budget.record_deallocation(self.byte_size);
        trace!(
            factor = self.size_factor,
            bytes = self.byte_size,
            current,
            consumers = detached.len(),
            "variant disposed"
        );

        for (_, handle) in detached {
            self.ctx
                .owner
                .post(move || handle.consumer().on_variant_removed());
        }
        true
    }
}

impl fmt::Debug for ImageVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageVariant")
            .field("size_factor", &self.size_factor)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("byte_size", &self.byte_size)
            .field("last_used", &self.last_used())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
