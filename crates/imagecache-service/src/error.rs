use std::error::Error as _;
use std::io;

use thiserror::Error;

use crate::transform::TransformError;

/// An error resolving or caching an image.
///
/// Errors of the serving path are returned to the caller. [`Transform`](Self::Transform) and
/// [`CacheWrite`](Self::CacheWrite) only occur while populating the cache and are never seen
/// by a caller.
#[derive(Debug, Error)]
pub enum ImageError {
    /// A required query parameter is missing or empty.
    #[error("missing required parameter `{0}`")]
    MissingParam(&'static str),
    /// The requested path escapes its root, or the file could not be read.
    #[error("invalid or unreadable image path")]
    InvalidPath,
    /// The remote image URL cannot be parsed or has an unsupported scheme.
    #[error("invalid image url: {0}")]
    InvalidUrl(String),
    /// The remote image URL points to a host outside of the allow-list.
    #[error("not allowed remote URL origin: {0}")]
    OriginNotAllowed(String),
    /// The remote image is larger than allowed.
    #[error("content-length {size} exceeds maximum allowed {max} bytes")]
    SizeExceeded { size: u64, max: u64 },
    /// The remote image could not be downloaded.
    #[error("error downloading image: {0}")]
    FetchFailed(String),
    /// The image could not be resized for the cache.
    #[error("failed to transform image")]
    Transform(#[from] TransformError),
    /// The cache file could not be written.
    #[error("failed to write cache file")]
    CacheWrite(#[source] io::Error),
    /// None of the configured sources accepts the request.
    #[error("no source accepts this request")]
    NoMatchingSource,
}

impl From<reqwest::Error> for ImageError {
    fn from(err: reqwest::Error) -> Self {
        // reqwest wraps the interesting part, like a refused connection, in its source chain.
        let mut source = err.source();
        while let Some(inner) = source.and_then(|err| err.source()) {
            source = Some(inner);
        }
        let reason = match source {
            Some(source) => source.to_string(),
            None => err.to_string(),
        };

        if err.is_timeout() {
            Self::FetchFailed(format!("timed out: {reason}"))
        } else {
            Self::FetchFailed(reason)
        }
    }
}
