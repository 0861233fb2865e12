//! Image sources and their cache keys
//!
//! Every source kind has its own key namespace, so identical raw identifiers
//! coming from different kinds can never collide.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use image::RgbaImage;

/// The kind of a [`Source`], used to pick a decode backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Remote,
    File,
    Resource,
    Raw,
}

impl SourceKind {
    /// Key prefix of this kind's namespace
    pub fn prefix(self) -> &'static str {
        match self {
            SourceKind::Remote => "REM_",
            SourceKind::File => "FIL_",
            SourceKind::Resource => "RES_",
            SourceKind::Raw => "RAW_",
        }
    }
}

/// Where a logical image's pixels come from
#[derive(Clone)]
pub enum Source {
    /// Fetched over HTTP(S)
    Remote { url: String },
    /// Read from the local filesystem
    File { path: PathBuf },
    /// A named byte bundle registered with the resource decoder
    Resource { name: String },
    /// An in-memory RGBA buffer
    ///
    /// `id` is unique per [`Source::raw`] call and shared by clones, so a
    /// freed buffer's address being reused can never alias an older source.
    Raw { id: u64, image: Arc<RgbaImage> },
}

static NEXT_RAW_ID: AtomicU64 = AtomicU64::new(1);

impl Source {
    pub fn remote(url: impl Into<String>) -> Self {
        Source::Remote { url: url.into() }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Source::File { path: path.into() }
    }

    pub fn resource(name: impl Into<String>) -> Self {
        Source::Resource { name: name.into() }
    }

    /// Wrap an in-memory buffer as a new source
    ///
    /// Every call yields a distinct source (and key), even for the same
    /// buffer; clone the returned value to refer to it again.
    pub fn raw(image: Arc<RgbaImage>) -> Self {
        Source::Raw {
            id: NEXT_RAW_ID.fetch_add(1, Ordering::Relaxed),
            image,
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Source::Remote { .. } => SourceKind::Remote,
            Source::File { .. } => SourceKind::File,
            Source::Resource { .. } => SourceKind::Resource,
            Source::Raw { .. } => SourceKind::Raw,
        }
    }

    /// True when the descriptor cannot possibly name an image
    pub fn is_empty(&self) -> bool {
        match self {
            Source::Remote { url } => url.trim().is_empty(),
            Source::File { path } => path.as_os_str().is_empty(),
            Source::Resource { name } => name.trim().is_empty(),
            Source::Raw { image, .. } => image.width() == 0 || image.height() == 0,
        }
    }

    /// URL or filesystem path, for the kinds that have one
    pub fn path(&self) -> Option<String> {
        match self {
            Source::Remote { url } => Some(url.clone()),
            Source::File { path } => Some(path.to_string_lossy().into_owned()),
            Source::Resource { .. } | Source::Raw { .. } => None,
        }
    }

    /// Namespaced cache key for this source
    pub fn key(&self) -> ImageKey {
        match self {
            Source::Remote { url } => ImageKey::new(SourceKind::Remote, url),
            Source::File { path } => ImageKey::new(SourceKind::File, &path.to_string_lossy()),
            Source::Resource { name } => ImageKey::new(SourceKind::Resource, name),
            Source::Raw { id, .. } => ImageKey::new(SourceKind::Raw, &id.to_string()),
        }
    }
}

impl PartialEq for Source {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Source::Remote { url: a }, Source::Remote { url: b }) => a == b,
            (Source::File { path: a }, Source::File { path: b }) => a == b,
            (Source::Resource { name: a }, Source::Resource { name: b }) => a == b,
            (Source::Raw { id: a, .. }, Source::Raw { id: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Eq for Source {}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Remote { url } => f.debug_struct("Remote").field("url", url).finish(),
            Source::File { path } => f.debug_struct("File").field("path", path).finish(),
            Source::Resource { name } => f.debug_struct("Resource").field("name", name).finish(),
            Source::Raw { id, image } => f
                .debug_struct("Raw")
                .field("id", id)
                .field("width", &image.width())
                .field("height", &image.height())
                .finish(),
        }
    }
}

/// Sanitized, namespaced key identifying a logical image
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageKey(String);

impl ImageKey {
    /// Build a key from a kind and a raw identifier
    pub fn new(kind: SourceKind, id: &str) -> Self {
        let mut key = String::with_capacity(kind.prefix().len() + id.len());
        key.push_str(kind.prefix());
        key.push_str(&sanitize(id));
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Kind whose namespace this key belongs to
    pub fn kind(&self) -> Option<SourceKind> {
        [
            SourceKind::Remote,
            SourceKind::File,
            SourceKind::Resource,
            SourceKind::Raw,
        ]
        .into_iter()
        .find(|kind| self.0.starts_with(kind.prefix()))
    }
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ImageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Replace characters that clash with storage naming (`\ / . :`) by `-`
pub fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| match c {
            '\\' | '/' | '.' | ':' => '-',
            other => other,
        })
        .collect()
}
