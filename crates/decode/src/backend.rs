//! Decode capability contract
//!
//! One backend per source kind sits behind [`DecodeBackend`]; the cache only
//! ever talks to a [`DecoderSet`].

use std::fmt;
use std::sync::Arc;

use image::RgbaImage;

use crate::{
    Bounds, DecodeError, DecodeRequest, FileDecoder, RawDecoder, RemoteDecoder, ResourceDecoder,
    Result, Source, SourceKind,
};

/// Pixels produced by a decode, plus the source's natural size
#[derive(Debug, Clone)]
pub struct DecodedRaster {
    pub image: RgbaImage,
    /// Natural bounds of the source, after orientation
    pub natural: Bounds,
    /// Sub-sampling factor that was applied
    pub factor: u32,
}

impl DecodedRaster {
    /// Bytes held by the buffer
    pub fn byte_size(&self) -> usize {
        self.image.as_raw().len()
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.image.width(), self.image.height())
    }
}

/// Turns a [`Source`] into pixels
///
/// Implementations run on decode worker threads and must not touch cache
/// state.
pub trait DecodeBackend: Send + Sync {
    /// Decode the source, sub-sampled by the factor `request` implies for
    /// the source's natural bounds
    fn decode(&self, source: &Source, request: DecodeRequest) -> Result<DecodedRaster>;
}

/// Error for a source routed to the wrong backend
pub(crate) fn wrong_kind(expected: SourceKind, source: &Source) -> DecodeError {
    DecodeError::Malformed(format!(
        "{:?} backend cannot decode {:?} source",
        expected,
        source.kind()
    ))
}

/// One backend per source kind
#[derive(Clone)]
pub struct DecoderSet {
    remote: Arc<dyn DecodeBackend>,
    file: Arc<dyn DecodeBackend>,
    resource: Arc<dyn DecodeBackend>,
    raw: Arc<dyn DecodeBackend>,
}

impl Default for DecoderSet {
    fn default() -> Self {
        Self {
            remote: Arc::new(RemoteDecoder::new()),
            file: Arc::new(FileDecoder::new()),
            resource: Arc::new(ResourceDecoder::new()),
            raw: Arc::new(RawDecoder::new()),
        }
    }
}

impl DecoderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route every kind to the same backend
    pub fn uniform(backend: Arc<dyn DecodeBackend>) -> Self {
        Self {
            remote: backend.clone(),
            file: backend.clone(),
            resource: backend.clone(),
            raw: backend,
        }
    }

    /// Replace the backend for one kind
    pub fn with_backend(mut self, kind: SourceKind, backend: Arc<dyn DecodeBackend>) -> Self {
        *self.slot_mut(kind) = backend;
        self
    }

    pub fn backend(&self, kind: SourceKind) -> &Arc<dyn DecodeBackend> {
        match kind {
            SourceKind::Remote => &self.remote,
            SourceKind::File => &self.file,
            SourceKind::Resource => &self.resource,
            SourceKind::Raw => &self.raw,
        }
    }

    fn slot_mut(&mut self, kind: SourceKind) -> &mut Arc<dyn DecodeBackend> {
        match kind {
            SourceKind::Remote => &mut self.remote,
            SourceKind::File => &mut self.file,
            SourceKind::Resource => &mut self.resource,
            SourceKind::Raw => &mut self.raw,
        }
    }
}

impl DecodeBackend for DecoderSet {
    fn decode(&self, source: &Source, request: DecodeRequest) -> Result<DecodedRaster> {
        self.backend(source.kind()).decode(source, request)
    }
}

impl fmt::Debug for DecoderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderSet").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
    }

    impl DecodeBackend for Counting {
        fn decode(&self, _source: &Source, request: DecodeRequest) -> Result<DecodedRaster> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let natural = Bounds::new(8, 8);
            let factor = request.factor_for(natural);
            let scaled = natural.scaled(factor);
            Ok(DecodedRaster {
                image: RgbaImage::new(scaled.width, scaled.height),
                natural,
                factor,
            })
        }
    }

    #[test]
    fn test_with_backend_replaces_one_kind() {
        let counting = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let set = DecoderSet::new().with_backend(SourceKind::Resource, counting.clone());

        let raster = set
            .decode(&Source::resource("anything"), DecodeRequest::full())
            .unwrap();
        assert_eq!(raster.natural, Bounds::new(8, 8));
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);

        // Other kinds still go to the stock backends
        let err = set
            .decode(&Source::file(""), DecodeRequest::full())
            .unwrap_err();
        assert!(err.is_permanent());
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_uniform_routes_everything() {
        let counting = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let set = DecoderSet::uniform(counting.clone());

        set.decode(&Source::remote("x"), DecodeRequest::full()).unwrap();
        set.decode(&Source::file("x"), DecodeRequest::full()).unwrap();
        set.decode(&Source::resource("x"), DecodeRequest::full()).unwrap();
        set.decode(&Source::raw(Arc::new(RgbaImage::new(1, 1))), DecodeRequest::full())
            .unwrap();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_raster_byte_size_is_rgba() {
        let raster = DecodedRaster {
            image: RgbaImage::new(10, 3),
            natural: Bounds::new(20, 6),
            factor: 2,
        };
        assert_eq!(raster.byte_size(), 120);
        assert_eq!(raster.bounds(), Bounds::new(10, 3));
    }
}
