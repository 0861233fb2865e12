//! Display surfaces bound to variants

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::ImageVariant;

/// Process-unique consumer identity
pub type ConsumerId = u64;

static NEXT_CONSUMER_ID: AtomicU64 = AtomicU64::new(1);

/// Something that displays a variant
///
/// Both callbacks run on the owner context, never inline from the code that
/// triggered them.
pub trait ImageConsumer: Send + Sync {
    /// The consumer was bound to `variant`
    fn on_variant_ready(&self, variant: &Arc<ImageVariant>);

    /// The bound variant was disposed; stop drawing it
    fn on_variant_removed(&self);
}

/// Identity of a consumer, as held in a variant's consumer set
///
/// Clones share the identity, so binding the same handle twice is a no-op.
#[derive(Clone)]
pub struct ConsumerHandle {
    id: ConsumerId,
    consumer: Arc<dyn ImageConsumer>,
}

impl ConsumerHandle {
    pub fn new(consumer: Arc<dyn ImageConsumer>) -> Self {
        Self {
            id: NEXT_CONSUMER_ID.fetch_add(1, Ordering::Relaxed),
            consumer,
        }
    }

    pub fn id(&self) -> ConsumerId {
        self.id
    }

    pub fn consumer(&self) -> &Arc<dyn ImageConsumer> {
        &self.consumer
    }
}

impl PartialEq for ConsumerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConsumerHandle {}

impl Hash for ConsumerHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerHandle").field("id", &self.id).finish()
    }
}
