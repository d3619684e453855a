//! Image source types.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

mod filesystem;
mod http;
pub use filesystem::*;
pub use http::*;

/// An identifier for image sources.
///
/// This is essentially a newtype for a string.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct SourceId(pub(crate) String);

impl SourceId {
    /// Creates a new [`SourceId`].
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Deref the [`SourceId`] to a `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configuration for an image source.
///
/// Sources are consulted in the order they are configured, the first one accepting a request
/// serves it.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Local file system, mirrored into a cache directory.
    Filesystem(Arc<FilesystemSourceConfig>),
    /// Remote images fetched over HTTP.
    Http(Arc<HttpSourceConfig>),
}

impl SourceConfig {
    /// The unique identifier of this source.
    pub fn id(&self) -> &SourceId {
        match self {
            Self::Filesystem(x) => &x.id,
            Self::Http(x) => &x.id,
        }
    }

    /// Name of this source.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Filesystem(..) => "filesystem",
            Self::Http(..) => "http",
        }
    }

    /// The directory cached images of this source are written to.
    pub fn cache_dir(&self) -> &Path {
        match self {
            Self::Filesystem(x) => &x.cache_dir,
            Self::Http(x) => &x.cache_dir,
        }
    }
}
