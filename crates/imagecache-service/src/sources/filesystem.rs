//! Images from the local file system.
//!
//! The cache mirrors the mounted directory tree. Each cached copy is a resized version of its
//! origin, and carries the origin's modification time. An origin modified since its copy was
//! made is detected by comparing both mtimes, and the stale copy is dropped.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use filetime::FileTime;

use imagecache_sources::{FilesystemSourceConfig, SourceId};

use crate::caching::{CacheStore, PopulationQueue, file_metadata};
use crate::config::TransformConfig;
use crate::error::ImageError;
use crate::request::ImageRequest;
use crate::sources::{ImageSource, SourceServices};
use crate::transform::{ImageTransform, TransformOptions};
use crate::utils::paths::{clean_path, join_sandboxed};

const TYPE_NAME: &str = "filesystem";

/// Serves images below a mounted directory, keeping resized copies in a cache directory.
#[derive(Debug)]
pub struct FilesystemSource {
    config: Arc<FilesystemSourceConfig>,
    mount: PathBuf,
    store: CacheStore,
    population: PopulationQueue,
    transform: Arc<dyn ImageTransform>,
    limits: TransformConfig,
}

impl FilesystemSource {
    pub fn new(config: Arc<FilesystemSourceConfig>, services: &SourceServices) -> Self {
        Self {
            mount: clean_path(&config.path),
            store: CacheStore::new(&config.cache_dir),
            population: services.population.clone(),
            transform: Arc::clone(&services.transform),
            limits: services.transform_config,
            config,
        }
    }

    /// Queues writing a resized copy of `data` to `cache_path`.
    fn populate(&self, cache_path: PathBuf, data: Bytes, origin_mtime: FileTime) {
        let store = self.store.clone();
        let transform = Arc::clone(&self.transform);
        let limits = self.limits;
        let key = cache_path.clone();

        let task = async move {
            tokio::task::spawn_blocking(move || {
                match resize_for_cache(transform.as_ref(), &limits, &data) {
                    Ok(resized) => store.store(&cache_path, &resized, Some(origin_mtime)),
                    Err(error) => {
                        store.discard(&cache_path);
                        Err(error)
                    }
                }
            })
            .await
            .map_err(|_| ImageError::CacheWrite(std::io::Error::other("population panicked")))?
        };

        self.population.submit(TYPE_NAME, key, task);
    }
}

/// Whether a cache entry with `cached` mtime is a copy of an origin with `origin` mtime.
///
/// Entries carry the origin's mtime, as stored by the cache file system. A cache on a file
/// system with whole-second timestamps drops the fraction, so an entry without one matches on
/// the seconds alone. Coarser granularities are not supported and make every entry stale.
fn mtime_matches(cached: FileTime, origin: FileTime) -> bool {
    if cached.nanoseconds() == 0 {
        cached.unix_seconds() == origin.unix_seconds()
    } else {
        cached == origin
    }
}

fn resize_for_cache(
    transform: &dyn ImageTransform,
    limits: &TransformConfig,
    data: &[u8],
) -> Result<Vec<u8>, ImageError> {
    let metadata = transform.metadata(data)?;
    let options = TransformOptions::for_cache(&metadata, limits);
    Ok(transform.transform(data, &options)?)
}

#[async_trait]
impl ImageSource for FilesystemSource {
    fn id(&self) -> &SourceId {
        &self.config.id
    }

    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn matches(&self, request: &ImageRequest) -> bool {
        request.is_read() && request.param("file").is_some()
    }

    async fn get_image(&self, request: &ImageRequest) -> Result<Bytes, ImageError> {
        let file = request.param("file").ok_or(ImageError::MissingParam("file"))?;

        // Both paths are checked before touching the file system at all.
        let cache_path = self.store.resolve(file)?;
        let origin_path = join_sandboxed(&self.mount, file).ok_or(ImageError::InvalidPath)?;

        let origin = file_metadata(&origin_path).await;
        let mut cached = self.store.lookup(&cache_path).await;

        if let (Some(cached_meta), Some(origin_meta)) = (&cached, &origin) {
            let cached_mtime = FileTime::from_last_modification_time(cached_meta);
            let origin_mtime = FileTime::from_last_modification_time(origin_meta);
            if !mtime_matches(cached_mtime, origin_mtime) {
                metric!(counter("source.filesystem.cache.stale") += 1);
                tracing::debug!(
                    path = %cache_path.display(),
                    %cached_mtime,
                    %origin_mtime,
                    "Removing stale cache entry"
                );
                self.store.discard(&cache_path);
                cached = None;
            }
        }

        if cached.is_some() {
            let data = self
                .store
                .read(&cache_path)
                .await
                .map_err(|_| ImageError::InvalidPath)?;
            if let Err(error) = self.store.touch(&cache_path) {
                tracing::warn!(path = %cache_path.display(), error = %error, "Failed to touch cache entry");
            }
            metric!(counter("source.filesystem.cache.hit") += 1);
            return Ok(data);
        }

        metric!(counter("source.filesystem.cache.miss") += 1);
        let Some(origin) = origin else {
            return Err(ImageError::InvalidPath);
        };

        // The mtime is taken before reading, so a concurrent change of the origin can only
        // make the copy look stale.
        let origin_mtime = FileTime::from_last_modification_time(&origin);
        let data = tokio::fs::read(&origin_path)
            .await
            .map(Bytes::from)
            .map_err(|_| ImageError::InvalidPath)?;

        self.populate(cache_path, data.clone(), origin_mtime);
        Ok(data)
    }
}
