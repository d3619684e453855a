use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::SourceId;

/// Configuration for serving images from the local file system.
///
/// Requested files are resolved relative to [`path`](Self::path). A resized copy of every
/// served file is kept in [`cache_dir`](Self::cache_dir), mirroring the directory structure of
/// the mount and carrying the modification time of its origin.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FilesystemSourceConfig {
    /// Unique source identifier.
    pub id: SourceId,

    /// Path to the mounted image directory.
    pub path: PathBuf,

    /// Path to the directory holding the resized copies.
    pub cache_dir: PathBuf,
}
