//! In-memory buffers

use crate::backend::wrong_kind;
use crate::codec::subsample;
use crate::{Bounds, DecodeBackend, DecodeError, DecodeRequest, DecodedRaster, Result, Source, SourceKind};

/// Rescales an in-memory RGBA buffer by the requested factor
#[derive(Debug, Clone, Default)]
pub struct RawDecoder;

impl RawDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl DecodeBackend for RawDecoder {
    fn decode(&self, source: &Source, request: DecodeRequest) -> Result<DecodedRaster> {
        let Source::Raw { image, .. } = source else {
            return Err(wrong_kind(SourceKind::Raw, source));
        };
        let natural = Bounds::new(image.width(), image.height());
        if natural.is_empty() {
            return Err(DecodeError::Malformed("empty raw buffer".to_string()));
        }
        let factor = request.factor_for(natural);
        Ok(DecodedRaster {
            image: subsample(image, factor),
            natural,
            factor,
        })
    }
}
