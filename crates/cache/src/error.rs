use imagine_decode::DecodeError;
use thiserror::Error;
use uuid::Uuid;

/// Why a variant request produced no variant
///
/// Cloneable so the same failure can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    /// The source can never decode; the image will not try again
    #[error("malformed image source: {0}")]
    Malformed(String),

    /// Transient failure; a later request may succeed
    #[error("decode failed: {0}")]
    Decode(String),

    /// The source changed while the decode was running
    #[error("request superseded by a source change")]
    Superseded,

    /// The owning manager no longer exists
    #[error("image cache manager has been dropped")]
    Detached,
}

impl ImageError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, ImageError::Malformed(_) | ImageError::Detached)
    }
}

impl From<DecodeError> for ImageError {
    fn from(err: DecodeError) -> Self {
        if err.is_permanent() {
            ImageError::Malformed(err.to_string())
        } else {
            ImageError::Decode(err.to_string())
        }
    }
}

/// Errors from the disk tier and its blob stores
#[derive(Debug, Error)]
pub enum DiskCacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("failed to encode blob: {0}")]
    Encode(#[from] image::ImageError),

    #[error("blob {0} is missing from the store")]
    MissingBlob(Uuid),
}

pub type DiskResult<T> = std::result::Result<T, DiskCacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_mapping() {
        let permanent: ImageError = DecodeError::Malformed("empty url".into()).into();
        assert!(matches!(permanent, ImageError::Malformed(_)));
        assert!(permanent.is_permanent());

        let transient: ImageError = DecodeError::Http("HTTP 503".into()).into();
        assert!(matches!(transient, ImageError::Decode(_)));
        assert!(!transient.is_permanent());
    }
}
