//! Named, embedded byte bundles

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, RwLock};

use image::ImageReader;

use crate::backend::wrong_kind;
use crate::codec::{rasterize, read_oriented};
use crate::{DecodeBackend, DecodeError, DecodeRequest, DecodedRaster, Result, Source, SourceKind};

/// Decodes encoded images registered under a name
///
/// Bundles are usually registered at startup (e.g. from `include_bytes!`).
#[derive(Debug, Default)]
pub struct ResourceDecoder {
    bundles: RwLock<HashMap<String, Arc<[u8]>>>,
}

impl ResourceDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource(self, name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        self.register(name, bytes);
        self
    }

    /// Register (or replace) a bundle
    pub fn register(&self, name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) {
        self.bundles
            .write()
            .unwrap()
            .insert(name.into(), bytes.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bundles.read().unwrap().contains_key(name)
    }

    fn lookup(&self, source: &Source) -> Result<Arc<[u8]>> {
        let Source::Resource { name } = source else {
            return Err(wrong_kind(SourceKind::Resource, source));
        };
        self.bundles
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| DecodeError::Malformed(format!("unknown resource: {name}")))
    }
}

impl DecodeBackend for ResourceDecoder {
    fn decode(&self, source: &Source, request: DecodeRequest) -> Result<DecodedRaster> {
        let bytes = self.lookup(source)?;
        let image = read_oriented(ImageReader::new(Cursor::new(&bytes[..])))?;
        Ok(rasterize(image, request))
    }
}
