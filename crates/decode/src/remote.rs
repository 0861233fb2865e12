//! HTTP backend

use std::fmt;
use std::io::{Cursor, Read};
use std::time::Duration;

use image::ImageReader;
use tracing::debug;

use crate::backend::wrong_kind;
use crate::codec::{rasterize, read_oriented};
use crate::{DecodeBackend, DecodeError, DecodeRequest, DecodedRaster, Result, Source, SourceKind};

/// Bodies larger than this are rejected
const DEFAULT_MAX_BODY_BYTES: u64 = 64 * 1024 * 1024;

/// Fetches images over HTTP(S) and decodes them
pub struct RemoteDecoder {
    agent: ureq::Agent,
    max_body_bytes: u64,
}

impl Default for RemoteDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteDecoder {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent("imagine-cache")
            .build();
        Self {
            agent,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, max: u64) -> Self {
        self.max_body_bytes = max;
        self
    }

    fn fetch(&self, source: &Source) -> Result<Vec<u8>> {
        let Source::Remote { url } = source else {
            return Err(wrong_kind(SourceKind::Remote, source));
        };
        validate_url(url)?;

        let response = self.agent.get(url).call().map_err(|err| match err {
            ureq::Error::Status(code, _) => DecodeError::Http(format!("{url}: HTTP {code}")),
            ureq::Error::Transport(transport)
                if matches!(
                    transport.kind(),
                    ureq::ErrorKind::InvalidUrl | ureq::ErrorKind::UnknownScheme
                ) =>
            {
                DecodeError::Malformed(transport.to_string())
            }
            other => DecodeError::Http(other.to_string()),
        })?;

        let body = read_capped(response.into_reader(), self.max_body_bytes)?;
        debug!(url = %url, bytes = body.len(), "fetched remote image");
        Ok(body)
    }
}

impl DecodeBackend for RemoteDecoder {
    fn decode(&self, source: &Source, request: DecodeRequest) -> Result<DecodedRaster> {
        let body = self.fetch(source)?;
        let image = read_oriented(ImageReader::new(Cursor::new(body.as_slice())))?;
        Ok(rasterize(image, request))
    }
}

impl fmt::Debug for RemoteDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteDecoder")
            .field("max_body_bytes", &self.max_body_bytes)
            .finish_non_exhaustive()
    }
}

/// Read a whole body, failing once it grows past `max` bytes
fn read_capped(reader: impl Read, max: u64) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    reader.take(max.saturating_add(1)).read_to_end(&mut body)?;
    if body.len() as u64 > max {
        return Err(DecodeError::Failed(format!("body exceeds {max} bytes")));
    }
    Ok(body)
}

/// Reject URLs that can never be fetched
fn validate_url(url: &str) -> Result<()> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(DecodeError::Malformed("empty url".to_string()));
    }

    let lower = trimmed.to_ascii_lowercase();
    let rest = lower
        .strip_prefix("http://")
        .or_else(|| lower.strip_prefix("https://"))
        .ok_or_else(|| DecodeError::Malformed(format!("unsupported url: {trimmed}")))?;

    if rest.is_empty() || rest.starts_with('/') {
        return Err(DecodeError::Malformed(format!("url has no host: {trimmed}")));
    }
    Ok(())
}
