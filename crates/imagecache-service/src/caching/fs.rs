use std::fs::{self, Metadata};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use filetime::FileTime;
use tempfile::NamedTempFile;

use crate::error::ImageError;
use crate::utils::paths::{clean_path, join_sandboxed};

/// Files below a cache directory, addressed by paths inside of it.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: clean_path(root.as_ref()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `relative` to a path inside the cache directory.
    ///
    /// Fails with [`ImageError::InvalidPath`] if the path would escape the cache directory.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, ImageError> {
        join_sandboxed(&self.root, relative).ok_or(ImageError::InvalidPath)
    }

    /// Returns the metadata of the cache entry at `path`, if there is one.
    pub async fn lookup(&self, path: &Path) -> Option<Metadata> {
        file_metadata(path).await
    }

    /// Reads the cache entry at `path`.
    pub async fn read(&self, path: &Path) -> io::Result<Bytes> {
        tokio::fs::read(path).await.map(Bytes::from)
    }

    /// Refreshes the access time of `path` to now, leaving its modification time untouched.
    pub fn touch(&self, path: &Path) -> io::Result<()> {
        filetime::set_file_atime(path, FileTime::now())
    }

    /// Removes the cache entry at `path`.
    ///
    /// Returns `false` if there was no entry to begin with.
    pub fn remove(&self, path: &Path) -> io::Result<bool> {
        Ok(catch_not_found(|| fs::remove_file(path))?.is_some())
    }

    /// Stores `contents` at `path`.
    ///
    /// The modification time of the new entry is set to `mtime`, or now if not given, and its
    /// access time to now. An empty `contents` is rejected. On failure, no entry is left at
    /// `path`, not even one that existed before.
    pub fn store(
        &self,
        path: &Path,
        contents: &[u8],
        mtime: Option<FileTime>,
    ) -> Result<u64, ImageError> {
        let result = if contents.is_empty() {
            Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "refusing to cache an empty file",
            ))
        } else {
            self.write(path, contents, mtime)
        };

        result.map_err(|error| {
            self.discard(path);
            ImageError::CacheWrite(error)
        })
    }

    /// Removes whatever is left at `path` after a failed population.
    pub fn discard(&self, path: &Path) {
        if let Err(error) = self.remove(path) {
            tracing::error!(
                error = %error,
                path = %path.display(),
                "Failed to remove cache entry"
            );
        }
    }

    fn write(&self, path: &Path, contents: &[u8], mtime: Option<FileTime>) -> io::Result<u64> {
        let mut temp_file = self.tempfile_for(path)?;
        temp_file.write_all(contents)?;
        temp_file.flush()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            temp_file
                .as_file()
                .set_permissions(fs::Permissions::from_mode(0o664))?;
        }

        let now = FileTime::now();
        filetime::set_file_times(temp_file.path(), now, mtime.unwrap_or(now))?;

        temp_file.persist(path).map_err(|error| error.error)?;
        Ok(contents.len() as u64)
    }

    /// Creates a temporary file next to `path`, creating the parent directories as needed.
    ///
    /// The temporary file lives in the same directory so that it can be renamed into place.
    fn tempfile_for(&self, path: &Path) -> io::Result<NamedTempFile> {
        let Some(dir) = path.parent() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cache path has no parent directory",
            ));
        };

        // A concurrent removal of an empty parent directory is retried once.
        const MAX_RETRIES: usize = 1;
        let mut retries = 0;
        loop {
            fs::create_dir_all(dir)?;
            match tempfile::Builder::new().prefix(".tmp").tempfile_in(dir) {
                Ok(temp_file) => return Ok(temp_file),
                Err(error) if error.kind() == io::ErrorKind::NotFound && retries < MAX_RETRIES => {
                    retries += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Returns the metadata of the regular file at `path`.
///
/// Directories and missing or inaccessible files all yield `None`.
pub async fn file_metadata(path: &Path) -> Option<Metadata> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => Some(metadata),
        Ok(_) => None,
        Err(error) => {
            if error.kind() != io::ErrorKind::NotFound {
                tracing::warn!(
                    error = %error,
                    path = %path.display(),
                    "Failed to stat file"
                );
            }
            None
        }
    }
}

pub(crate) fn catch_not_found<F, R>(f: F) -> io::Result<Option<R>>
where
    F: FnOnce() -> io::Result<R>,
{
    match f() {
        Ok(x) => Ok(Some(x)),
        Err(e) => match e.kind() {
            io::ErrorKind::NotFound => Ok(None),
            _ => Err(e),
        },
    }
}
