//! Imagine Cache Library
//!
//! Decoded-image cache: logical images with per-size variants, consumer
//! reference counting, a shared byte budget with two-tier eviction,
//! background decoding with supersession, and an on-disk second tier.
//!
//! # Example
//!
//! ```
//! use imagine_cache::{CacheConfig, ImageCacheManager};
//! use image::RgbaImage;
//! use std::sync::Arc;
//!
//! let config = CacheConfig::default()
//!     .with_memory_ceiling_mb(64)
//!     .with_decode_workers(1);
//! let manager = ImageCacheManager::new(&config).unwrap();
//!
//! let image = manager.raw(Arc::new(RgbaImage::new(200, 200)));
//! let variant = image.get_variant(50, 50).unwrap();
//! assert_eq!(variant.size_factor(), 2);
//! assert_eq!(manager.current_bytes(), variant.byte_size());
//! ```

mod budget;
mod config;
mod consumer;
mod disk;
mod error;
mod logical;
mod manager;
mod store;
mod variant;

pub use budget::{MemoryBudget, MemoryPressure};
pub use config::{detect_memory_ceiling, CacheConfig, ConfigError};
pub use consumer::{ConsumerHandle, ConsumerId, ImageConsumer};
pub use disk::{DiskCacheManager, DiskCacheStats, DISK_JPEG_QUALITY};
pub use error::{DiskCacheError, DiskResult, ImageError};
pub use logical::{LoadResult, LogicalImage};
pub use manager::{CacheStats, EvictionOutcome, ImageCacheManager};
pub use store::{BlobStore, DiskEntry, FsBlobStore, MemoryBlobStore};
pub use variant::ImageVariant;

pub use imagine_decode::{Bounds, DecodeRequest, ImageKey, Source, SourceKind};
