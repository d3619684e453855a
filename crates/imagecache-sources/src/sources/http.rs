use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{CacheLayout, SourceId};

/// Configuration for fetching images from remote HTTP origins.
///
/// Downloaded images are stored verbatim below [`cache_dir`](Self::cache_dir), in a directory
/// hierarchy derived from the image URL by the configured [`layout`](Self::layout).
///
/// Cached downloads are never revalidated against their origin.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HttpSourceConfig {
    /// Unique source identifier.
    pub id: SourceId,

    /// Path to the directory holding downloaded images.
    pub cache_dir: PathBuf,

    /// Hosts images may be fetched from.
    ///
    /// Entries are either plain hosts (`example.com`, `example.com:8080`) or URLs, in which
    /// case only their host and port are considered. An empty list allows every host.
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Maximum size in bytes of a remote image, checked before downloading.
    ///
    /// `0` disables the check.
    #[serde(default)]
    pub max_allowed_size: u64,

    /// Value of the `Authorization` header sent with every download.
    #[serde(default)]
    pub authorization: Option<String>,

    /// Whether to pass the caller's own authorization on to the origin.
    ///
    /// The `X-Forward-Authorization` header is preferred over `Authorization`. A configured
    /// [`authorization`](Self::authorization) always wins.
    #[serde(default)]
    pub forward_authorization: bool,

    /// How cache paths are derived from image URLs.
    #[serde(default)]
    pub layout: CacheLayout,
}
