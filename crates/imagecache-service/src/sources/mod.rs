//! Resolution of image requests to the source serving them.
//!
//! Every configured [`SourceConfig`] becomes one [`ImageSource`] in the [`SourceRegistry`]. The
//! registry asks the sources in configuration order, and the first source whose
//! [`matches`](ImageSource::matches) accepts the request serves it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use imagecache_sources::{SourceConfig, SourceId};

use crate::caching::PopulationQueue;
use crate::config::TransformConfig;
use crate::error::ImageError;
use crate::request::ImageRequest;
use crate::transform::ImageTransform;

mod filesystem;
mod http;

pub use filesystem::FilesystemSource;
pub use http::HttpSource;

/// A place images are served from.
#[async_trait]
pub trait ImageSource: fmt::Debug + Send + Sync {
    /// The unique identifier of this source.
    fn id(&self) -> &SourceId;

    /// Name of the type of this source, used for metrics.
    fn type_name(&self) -> &'static str;

    /// Whether this source is responsible for `request`.
    fn matches(&self, request: &ImageRequest) -> bool;

    /// Returns the image bytes for `request`.
    ///
    /// A cache miss is served from the origin. Populating the cache happens in the background
    /// and is never waited for.
    async fn get_image(&self, request: &ImageRequest) -> Result<Bytes, ImageError>;
}

/// Collaborators shared by all sources.
#[derive(Clone, Debug)]
pub struct SourceServices {
    /// Client for requests to image origins.
    pub client: reqwest::Client,
    pub population: PopulationQueue,
    pub transform: Arc<dyn ImageTransform>,
    pub transform_config: TransformConfig,
}

/// The ordered list of configured sources.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn ImageSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates one source per entry of `sources`, keeping their order.
    pub fn from_config(
        sources: &[SourceConfig],
        services: &SourceServices,
    ) -> anyhow::Result<Self> {
        let mut registry = Self::new();

        for config in sources {
            if registry.sources.iter().any(|s| s.id() == config.id()) {
                anyhow::bail!("duplicate source id `{}`", config.id());
            }

            match config {
                SourceConfig::Filesystem(config) => {
                    registry.register(FilesystemSource::new(Arc::clone(config), services))
                }
                SourceConfig::Http(config) => {
                    registry.register(HttpSource::new(Arc::clone(config), services)?)
                }
            }
            tracing::info!(
                id = %config.id(),
                source_type = config.type_name(),
                cache_dir = %config.cache_dir().display(),
                "Registered image source"
            );
        }

        Ok(registry)
    }

    /// Appends `source`. It is consulted after all previously registered sources.
    pub fn register(&mut self, source: impl ImageSource + 'static) {
        self.sources.push(Arc::new(source));
    }

    /// The registered sources, in the order they are consulted.
    pub fn sources(&self) -> &[Arc<dyn ImageSource>] {
        &self.sources
    }

    /// Returns the first source accepting `request`.
    pub fn resolve(&self, request: &ImageRequest) -> Option<&dyn ImageSource> {
        self.sources
            .iter()
            .find(|source| source.matches(request))
            .map(|source| source.as_ref())
    }

    /// Serves `request` from the first source accepting it.
    pub async fn get_image(&self, request: &ImageRequest) -> Result<Bytes, ImageError> {
        let source = self.resolve(request).ok_or(ImageError::NoMatchingSource)?;
        tracing::trace!(source = %source.id(), "Resolved image source");

        let result = source.get_image(request).await;
        if let Err(ref error) = result {
            metric!(
                counter("source.errors") += 1,
                "source" => source.type_name(),
            );
            tracing::debug!(source = %source.id(), error = %error, "Failed to serve image");
        }
        result
    }
}
