//! Filesystem backend

use std::path::Path;

use image::ImageReader;
use tracing::debug;

use crate::backend::wrong_kind;
use crate::codec::{rasterize, read_oriented};
use crate::{DecodeBackend, DecodeError, DecodeRequest, DecodedRaster, Result, Source, SourceKind};

/// Decodes image files, honoring EXIF orientation
#[derive(Debug, Clone, Default)]
pub struct FileDecoder;

impl FileDecoder {
    pub fn new() -> Self {
        Self
    }

    fn resolve<'a>(&self, source: &'a Source) -> Result<&'a Path> {
        let Source::File { path } = source else {
            return Err(wrong_kind(SourceKind::File, source));
        };
        if path.as_os_str().is_empty() {
            return Err(DecodeError::Malformed("empty file path".to_string()));
        }
        if !path.is_file() {
            return Err(DecodeError::Malformed(format!(
                "no such file: {}",
                path.display()
            )));
        }
        Ok(path)
    }
}

impl DecodeBackend for FileDecoder {
    fn decode(&self, source: &Source, request: DecodeRequest) -> Result<DecodedRaster> {
        let path = self.resolve(source)?;
        let image = read_oriented(ImageReader::open(path)?)?;
        let raster = rasterize(image, request);
        debug!(
            path = %path.display(),
            factor = raster.factor,
            bytes = raster.byte_size(),
            "decoded file"
        );
        Ok(raster)
    }
}
