//! Backing stores for the disk tier.
//!
//! A store persists two things: a small metadata record per key and an opaque
//! payload per blob id. The disk cache manager owns all budget and recency
//! decisions; stores only read and write.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::DiskResult;

/// Metadata for one disk-cached blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskEntry {
    /// Cache key the blob was stored under
    pub key: String,
    /// Identifier of the payload in the store
    pub blob_id: Uuid,
    /// Sub-sampling factor the blob was encoded at
    pub size_factor: u32,
    /// Last access, unix milliseconds
    pub last_used: u64,
    /// Payload length in bytes
    pub byte_size: usize,
}

impl DiskEntry {
    /// New entry with a fresh blob id, stamped now
    pub fn new(key: impl Into<String>, size_factor: u32, byte_size: usize) -> Self {
        Self {
            key: key.into(),
            blob_id: Uuid::new_v4(),
            size_factor,
            last_used: now_millis(),
            byte_size,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = now_millis();
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Persistence contract for the disk tier
///
/// Lookups that find nothing return `Ok(None)`; errors are reserved for I/O
/// and decoding failures.
pub trait BlobStore: Send + Sync {
    /// Write the payload and then the metadata for `entry.key`
    ///
    /// Any previous metadata for the key is overwritten. The previous payload
    /// is left alone; callers delete it by id.
    fn put(&self, entry: &DiskEntry, blob: &[u8]) -> DiskResult<()>;

    /// Metadata stored for `key`
    fn get(&self, key: &str) -> DiskResult<Option<DiskEntry>>;

    /// Payload stored under `blob_id`
    fn get_blob(&self, blob_id: Uuid) -> DiskResult<Option<Vec<u8>>>;

    /// Delete a payload. Deleting a missing blob is not an error.
    fn delete(&self, blob_id: Uuid) -> DiskResult<()>;

    /// Delete the metadata for `key`. Deleting a missing record is not an error.
    fn remove_entry(&self, key: &str) -> DiskResult<()>;
}

/// Filesystem store: `<uuid>.blob` payloads next to per-key JSON metadata
///
/// Metadata file names are derived from the key with a name-based UUID so
/// arbitrary keys (long URLs included) map to short, valid file names.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    dir: PathBuf,
}

impl FsBlobStore {
    /// Open a store rooted at `dir`, creating it if needed
    pub fn open<P: AsRef<Path>>(dir: P) -> DiskResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "opened blob store");
        Ok(Self { dir })
    }

    /// Root directory of the store
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, blob_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.blob", blob_id))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        let name = Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes());
        self.dir.join(format!("{}.json", name))
    }

    /// Write through a temp file so a crash never leaves a torn file behind
    fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, bytes)?;
        fs::rename(&temp_path, path)
    }

    fn remove_if_present(path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, entry: &DiskEntry, blob: &[u8]) -> DiskResult<()> {
        Self::write_atomic(&self.blob_path(entry.blob_id), blob)?;
        let json = serde_json::to_vec_pretty(entry)?;
        Self::write_atomic(&self.meta_path(&entry.key), &json)?;
        Ok(())
    }

    fn get(&self, key: &str) -> DiskResult<Option<DiskEntry>> {
        let bytes = match fs::read(self.meta_path(key)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entry: DiskEntry = serde_json::from_slice(&bytes)?;
        // Name-based ids can in principle collide; the stored key is authoritative
        if entry.key != key {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    fn get_blob(&self, blob_id: Uuid) -> DiskResult<Option<Vec<u8>>> {
        match fs::read(self.blob_path(blob_id)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, blob_id: Uuid) -> DiskResult<()> {
        Self::remove_if_present(&self.blob_path(blob_id))?;
        Ok(())
    }

    fn remove_entry(&self, key: &str) -> DiskResult<()> {
        Self::remove_if_present(&self.meta_path(key))?;
        Ok(())
    }
}

/// In-process store for tests and ephemeral caches
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    entries: Mutex<HashMap<String, DiskEntry>>,
    blobs: Mutex<HashMap<Uuid, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of payloads held
    pub fn blob_count(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, entry: &DiskEntry, blob: &[u8]) -> DiskResult<()> {
        self.blobs.lock().unwrap().insert(entry.blob_id, blob.to_vec());
        self.entries
            .lock()
            .unwrap()
            .insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    fn get(&self, key: &str) -> DiskResult<Option<DiskEntry>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn get_blob(&self, blob_id: Uuid) -> DiskResult<Option<Vec<u8>>> {
        Ok(self.blobs.lock().unwrap().get(&blob_id).cloned())
    }

    fn delete(&self, blob_id: Uuid) -> DiskResult<()> {
        self.blobs.lock().unwrap().remove(&blob_id);
        Ok(())
    }

    fn remove_entry(&self, key: &str) -> DiskResult<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}
