//! Shared fixtures for the cache integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use image::RgbaImage;
use imagine_cache::{CacheConfig, ImageCacheManager, ImageConsumer, ImageVariant};
use imagine_decode::{
    Bounds, DecodeBackend, DecodeError, DecodeRequest, DecodedRaster, DecoderSet, Source,
};

/// Backend whose resource names carry the natural size: `"15x5#tag"`
#[derive(Default)]
pub struct SizedBackend;

impl SizedBackend {
    pub fn natural(source: &Source) -> imagine_decode::Result<Bounds> {
        let name = match source {
            Source::Resource { name } => name,
            Source::Remote { url } => url,
            _ => return Err(DecodeError::Malformed("unsupported source".into())),
        };
        if name.is_empty() {
            return Err(DecodeError::Malformed("empty source".into()));
        }
        let size = name.split('#').next().unwrap_or_default();
        let (w, h) = size
            .split_once('x')
            .ok_or_else(|| DecodeError::Malformed(name.clone()))?;
        let parse = |s: &str| {
            s.parse::<u32>()
                .map_err(|_| DecodeError::Malformed(name.clone()))
        };
        Ok(Bounds::new(parse(w)?, parse(h)?))
    }
}

impl DecodeBackend for SizedBackend {
    fn decode(&self, source: &Source, request: DecodeRequest) -> imagine_decode::Result<DecodedRaster> {
        let natural = Self::natural(source)?;
        let factor = request.factor_for(natural);
        let scaled = natural.scaled(factor);
        Ok(DecodedRaster {
            image: RgbaImage::new(scaled.width, scaled.height),
            natural,
            factor,
        })
    }
}

/// Sized backend that blocks every decode until the gate opens
#[derive(Default)]
pub struct GatedBackend {
    open: Mutex<bool>,
    changed: Condvar,
    started: AtomicUsize,
}

impl GatedBackend {
    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.changed.notify_all();
    }

    pub fn close(&self) {
        *self.open.lock().unwrap() = false;
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Spin until `n` decodes have entered the backend
    pub fn wait_started(&self, n: usize) -> bool {
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while self.started() < n {
            if std::time::Instant::now() > deadline {
                return false;
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        true
    }
}

impl DecodeBackend for GatedBackend {
    fn decode(&self, source: &Source, request: DecodeRequest) -> imagine_decode::Result<DecodedRaster> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.changed.wait(open).unwrap();
        }
        drop(open);
        SizedBackend.decode(source, request)
    }
}

/// Sized backend whose first decode fails with a network error
#[derive(Default)]
pub struct FlakyBackend {
    failed: AtomicBool,
}

impl DecodeBackend for FlakyBackend {
    fn decode(&self, source: &Source, request: DecodeRequest) -> imagine_decode::Result<DecodedRaster> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            return Err(DecodeError::Http("connection reset".into()));
        }
        SizedBackend.decode(source, request)
    }
}

/// Manager whose budget ceiling is exactly `max` bytes
pub fn manager_with(max: usize, backend: Arc<dyn DecodeBackend>) -> ImageCacheManager {
    let config = CacheConfig::default()
        .with_memory_ceiling(max * 8)
        .with_decode_workers(1);
    ImageCacheManager::with_decoders(&config, DecoderSet::uniform(backend)).unwrap()
}

pub fn manager(max: usize) -> ImageCacheManager {
    manager_with(max, Arc::new(SizedBackend))
}

/// Decode a 300-byte variant (15x5 RGBA) under a fresh key
pub fn load_300(manager: &ImageCacheManager, tag: &str) -> Arc<ImageVariant> {
    manager
        .resource(format!("15x5#{tag}"))
        .get_variant_full()
        .unwrap()
}

/// Consumer that counts its notifications
#[derive(Default)]
pub struct CountingConsumer {
    ready: AtomicUsize,
    removed: AtomicUsize,
}

impl CountingConsumer {
    pub fn ready(&self) -> usize {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }
}

impl ImageConsumer for CountingConsumer {
    fn on_variant_ready(&self, _variant: &Arc<ImageVariant>) {
        self.ready.fetch_add(1, Ordering::SeqCst);
    }

    fn on_variant_removed(&self) {
        self.removed.fetch_add(1, Ordering::SeqCst);
    }
}
