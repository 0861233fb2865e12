//! Background decoding, supersession, and source changes

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{manager, manager_with, CountingConsumer, FlakyBackend, GatedBackend};
use image::RgbaImage;
use imagine_cache::{CacheConfig, ConsumerHandle, ImageCacheManager, ImageError, LoadResult, Source};

const TIMEOUT: Duration = Duration::from_secs(5);

type Slot = Arc<Mutex<Option<LoadResult>>>;

fn slot() -> Slot {
    Arc::new(Mutex::new(None))
}

fn filled(slot: &Slot) -> bool {
    slot.lock().unwrap().is_some()
}

#[test]
fn superseded_completion_never_runs() {
    let backend = Arc::new(GatedBackend::default());
    let m = manager_with(1_000_000, backend.clone());
    let image = m.resource("40x40#a");

    let first_ran = Arc::new(AtomicBool::new(false));
    let flag = first_ran.clone();
    image.get_variant_async(10, 10, move |_| flag.store(true, Ordering::SeqCst));
    assert!(backend.wait_started(1));

    let second = slot();
    let out = second.clone();
    image.get_variant_async(20, 20, move |result| *out.lock().unwrap() = Some(result));

    backend.open();
    assert!(m.owner().run_until(|| filled(&second), TIMEOUT));
    m.run_pending();

    assert!(!first_ran.load(Ordering::SeqCst));
    let variant = second.lock().unwrap().take().unwrap().unwrap();
    assert_eq!(variant.size_factor(), 1);
    // The superseded raster was never registered
    assert_eq!(image.variant_count(), 1);
    assert!(!image.has_pending_decode());
}

#[test]
fn cached_variant_is_delivered_inline() {
    let m = manager(1_000_000);
    let image = m.resource("32x32");
    let expected = image.get_variant(8, 8).unwrap();

    let got = slot();
    let out = got.clone();
    image.get_variant_async(8, 8, move |result| *out.lock().unwrap() = Some(result));

    // No owner drain needed
    let variant = got.lock().unwrap().take().unwrap().unwrap();
    assert!(Arc::ptr_eq(&variant, &expected));
}

#[test]
fn async_error_reaches_callback() {
    let m = manager(1_000_000);
    let image = m.resource("not-a-size");

    let got = slot();
    let out = got.clone();
    image.get_variant_async(8, 8, move |result| *out.lock().unwrap() = Some(result));
    assert!(m.owner().run_until(|| filled(&got), TIMEOUT));

    let result = got.lock().unwrap().take().unwrap();
    assert!(matches!(result, Err(ImageError::Malformed(_))));
    assert!(image.is_malformed());
    assert_eq!(m.stats().decode_failures, 1);
}

#[test]
fn preload_does_not_supersede_pending_request() {
    let backend = Arc::new(GatedBackend::default());
    let m = manager_with(1_000_000, backend.clone());
    let image = m.resource("16x16");

    let got = slot();
    let out = got.clone();
    image.get_variant_async(16, 16, move |result| *out.lock().unwrap() = Some(result));
    image.preload_async(4, 4);
    assert_eq!(m.decode_queue().stats().jobs_submitted, 1);

    backend.open();
    assert!(m.owner().run_until(|| filled(&got), TIMEOUT));
    assert!(got.lock().unwrap().take().unwrap().is_ok());
    assert_eq!(backend.started(), 1);
}

#[test]
fn preload_async_decodes_when_idle() {
    let m = manager(1_000_000);
    let image = m.resource("64x64");

    image.preload_async(16, 16);
    assert!(m.owner().run_until(|| image.is_ready(16, 16), TIMEOUT));
    assert_eq!(image.variant(16, 16).map(|v| v.size_factor()), Some(2));
}

#[test]
fn empty_source_stays_malformed() {
    let m = manager(1_000_000);
    let image = m.remote("");

    assert!(matches!(image.get_variant(10, 10), Err(ImageError::Malformed(_))));
    assert!(image.is_malformed());

    // Another empty descriptor resets state but the image is still unusable
    image.invalidate_source(Source::remote("   "));
    assert!(image.is_malformed());
    assert!(image.get_variant(10, 10).is_err());
    assert!(!image.preload(10, 10));

    image.invalidate_source(Source::remote("8x8"));
    assert!(!image.is_malformed());
    let variant = image.get_variant_full().unwrap();
    assert_eq!((variant.width(), variant.height()), (8, 8));
}

#[test]
fn malformed_image_is_not_retried() {
    let m = manager(1_000_000);
    let image = m.resource("garbage");

    assert!(image.get_variant(4, 4).is_err());
    assert!(image.get_variant(4, 4).is_err());
    // Second call answered from the malformed flag, no second decode
    assert_eq!(m.stats().decode_failures, 1);
}

#[test]
fn invalidate_source_disposes_variants() {
    let m = manager(1_000_000);
    let image = m.resource("8x8");
    let old = image.get_variant_full().unwrap();
    let consumer = Arc::new(CountingConsumer::default());
    let handle = ConsumerHandle::new(consumer.clone());
    assert!(old.retain(&handle));

    image.invalidate_source(Source::resource("16x16"));
    assert!(old.is_disposed());
    assert_eq!(m.current_bytes(), 0);
    assert_eq!(image.natural_bounds(), None);

    m.run_pending();
    assert_eq!(consumer.removed(), 1);
    assert_eq!(consumer.ready(), 0);

    let fresh = image.get_variant_full().unwrap();
    assert_eq!(fresh.byte_size(), 16 * 16 * 4);
    assert_eq!(m.current_bytes(), fresh.byte_size());

    // Same descriptor again is a no-op
    image.invalidate_source(Source::resource("16x16"));
    assert!(!fresh.is_disposed());
}

#[test]
fn invalidate_cancels_pending_decode() {
    let backend = Arc::new(GatedBackend::default());
    let m = manager_with(1_000_000, backend.clone());
    let image = m.resource("16x16");

    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    image.get_variant_async(8, 8, move |_| flag.store(true, Ordering::SeqCst));
    assert!(backend.wait_started(1));

    image.invalidate_source(Source::resource("32x32"));
    assert!(!image.has_pending_decode());

    backend.open();
    let done = image.clone();
    assert!(m.owner().run_until(|| done.get_variant(8, 8).is_ok(), TIMEOUT));
    m.run_pending();
    assert!(!ran.load(Ordering::SeqCst));
}

#[test]
fn transient_failure_is_retried() {
    let m = manager_with(1_000_000, Arc::new(FlakyBackend::default()));
    let image = m.remote("12x12");

    assert!(matches!(image.get_variant(12, 12), Err(ImageError::Decode(_))));
    assert!(!image.is_malformed());
    assert_eq!(image.variant_count(), 0);

    let variant = image.get_variant(12, 12).unwrap();
    assert_eq!((variant.width(), variant.height()), (12, 12));
    assert_eq!(m.stats().decode_failures, 1);
}

#[test]
fn last_release_cancels_pending_decode() {
    let backend = Arc::new(GatedBackend::default());
    let m = manager_with(1_000_000, backend.clone());
    let image = m.resource("16x16");

    backend.open();
    let shown = image.get_variant_full().unwrap();
    let consumer = Arc::new(CountingConsumer::default());
    let handle = ConsumerHandle::new(consumer.clone());
    assert!(image.retain(16, 16, &handle));

    backend.close();
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    image.get_variant_async(4, 4, move |_| flag.store(true, Ordering::SeqCst));
    assert!(backend.wait_started(2));
    assert!(image.has_pending_decode());

    assert!(image.release(16, 16, &handle));
    assert!(!image.has_pending_decode());

    backend.open();
    let queue = m.decode_queue().clone();
    assert!(m.owner().run_until(|| queue.tracked_jobs() == 0, TIMEOUT));
    m.run_pending();
    assert!(!ran.load(Ordering::SeqCst));
    assert!(!image.is_ready(4, 4));
    assert!(!shown.is_disposed());
}

#[test]
fn release_keeps_decode_while_other_consumers_remain() {
    let backend = Arc::new(GatedBackend::default());
    let m = manager_with(1_000_000, backend.clone());
    let image = m.resource("16x16");

    backend.open();
    image.get_variant_full().unwrap();
    let first = ConsumerHandle::new(Arc::new(CountingConsumer::default()));
    let second = ConsumerHandle::new(Arc::new(CountingConsumer::default()));
    assert!(image.retain(16, 16, &first));
    assert!(image.retain(16, 16, &second));

    backend.close();
    image.preload_async(4, 4);
    assert!(backend.wait_started(2));

    assert!(image.release(16, 16, &first));
    assert!(image.has_pending_decode());

    backend.open();
    assert!(m.owner().run_until(|| image.is_ready(4, 4), TIMEOUT));
}

#[test]
fn raw_buffers_never_alias_after_reuse() {
    let config = CacheConfig::default().with_decode_workers(1);
    let m = ImageCacheManager::new(&config).unwrap();
    let mut seen = Vec::new();

    for _ in 0..200 {
        let a = Arc::new(RgbaImage::new(4, 4));
        let image = m.raw(a.clone());
        image.invalidate_source(Source::raw(Arc::new(RgbaImage::new(2, 2))));
        drop(a);

        // A fresh buffer may land on the address just freed
        let c = Source::raw(Arc::new(RgbaImage::new(4, 4)));
        let got = m.image(c.clone());
        assert_eq!(got.source(), c);
        assert!(!Arc::ptr_eq(&got, &image));
        assert_eq!(got.get_variant_full().unwrap().width(), 4);
        seen.push(image);
    }
    assert_eq!(m.image_count(), 400);
}

#[test]
fn image_outliving_manager_is_detached() {
    let m = manager(1_000_000);
    let image = m.resource("8x8");
    drop(m);

    assert_eq!(image.get_variant_full().unwrap_err(), ImageError::Detached);
}
