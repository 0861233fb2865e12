//! Memory tier feeding the disk tier

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::manager;
use imagine_cache::{CacheConfig, DiskCacheManager, FsBlobStore};
use tempfile::TempDir;

#[test]
fn decoded_variant_round_trips_through_disk() {
    let dir = TempDir::new().unwrap();
    let m = manager(1_000_000);
    let image = m.resource("64x48");
    let variant = image.get_variant(16, 16).unwrap();
    let key = image.key().as_str().to_string();

    let store = Arc::new(FsBlobStore::open(dir.path()).unwrap());
    let disk = DiskCacheManager::new(store, 1 << 20, 1 << 19);
    disk.insert_async(
        m.decode_queue(),
        key.clone(),
        variant.pixels().unwrap(),
        variant.size_factor(),
    );

    let deadline = Instant::now() + Duration::from_secs(5);
    while !disk.contains(&key) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }

    let entry = disk.entry(&key).unwrap().unwrap();
    assert_eq!(entry.size_factor, 2);

    let bytes = disk.blob(&key).unwrap().unwrap();
    let decoded = image::load_from_memory(&bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (32, 24));
}

#[test]
fn smaller_factor_never_replaces_disk_entry() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig::default().with_disk_dir(dir.path());
    let disk = DiskCacheManager::from_config(&config).unwrap();
    let m = manager(1_000_000);
    let image = m.resource("64x64");

    let coarse = image.get_variant(8, 8).unwrap();
    let full = image.get_variant_full().unwrap();
    assert!(coarse.size_factor() > full.size_factor());

    assert!(disk
        .insert_raster("k", &coarse.pixels().unwrap(), coarse.size_factor())
        .unwrap());
    assert!(!disk
        .insert_raster("k", &full.pixels().unwrap(), full.size_factor())
        .unwrap());
    assert_eq!(disk.entry("k").unwrap().unwrap().size_factor, coarse.size_factor());
}

#[test]
fn reopened_cache_adopts_entries_lazily() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig::default()
        .with_disk_dir(dir.path())
        .with_disk_mb(1)
        .with_disk_trim_mb(1);

    {
        let disk = DiskCacheManager::from_config(&config).unwrap();
        disk.insert("a", &[1; 100], 1).unwrap();
        disk.insert("b", &[2; 200], 1).unwrap();
    }

    let disk = DiskCacheManager::from_config(&config).unwrap();
    assert_eq!(disk.current_bytes(), 0);

    assert_eq!(disk.blob("b").unwrap(), Some(vec![2; 200]));
    assert_eq!(disk.current_bytes(), 200);
    assert_eq!(disk.entry("a").unwrap().map(|e| e.byte_size), Some(100));
    assert_eq!(disk.current_bytes(), 300);
}
