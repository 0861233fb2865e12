//! Imagine Decode Library
//!
//! Source descriptors, cache key namespaces, and the decode backends that turn
//! a source into an RGBA raster sub-sampled for a requested display size.
//!
//! # Example
//!
//! ```
//! use imagine_decode::{size_factor, DecodeBackend, DecodeRequest, DecoderSet, Source};
//! use image::RgbaImage;
//! use std::sync::Arc;
//!
//! let buffer = Arc::new(RgbaImage::new(400, 300));
//! let source = Source::raw(buffer);
//! assert!(source.key().as_str().starts_with("RAW_"));
//!
//! let raster = DecoderSet::new()
//!     .decode(&source, DecodeRequest::new(100, 100))
//!     .unwrap();
//! assert_eq!(raster.factor, size_factor(400, 300, 100, 100));
//! assert_eq!(raster.natural.width, 400);
//! ```

mod backend;
mod codec;
mod error;
mod file;
mod raw;
mod remote;
mod resource;
mod sampling;
mod source;

pub use backend::{DecodeBackend, DecodedRaster, DecoderSet};
pub use error::{DecodeError, Result};
pub use file::FileDecoder;
pub use raw::RawDecoder;
pub use remote::RemoteDecoder;
pub use resource::ResourceDecoder;
pub use sampling::{size_factor, Bounds, DecodeRequest};
pub use source::{sanitize, ImageKey, Source, SourceKind};
