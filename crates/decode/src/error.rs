use thiserror::Error;

/// Errors produced by decode backends
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The source can never produce an image (bad URL, absent path, unknown resource)
    #[error("malformed source: {0}")]
    Malformed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("network error: {0}")]
    Http(String),

    /// The bytes arrived but cannot be used (e.g. an oversized body)
    #[error("decode failed: {0}")]
    Failed(String),
}

impl DecodeError {
    /// Whether retrying the same source is pointless
    pub fn is_permanent(&self) -> bool {
        matches!(self, DecodeError::Malformed(_))
    }
}

pub type Result<T> = std::result::Result<T, DecodeError>;
