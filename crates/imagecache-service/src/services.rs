//! Creation of the image services from a [`Config`].
//!
//! Cache population runs on a separate runtime dedicated to I/O, which is passed in by the
//! caller. Requests are served from whichever runtime calls into the [`SourceRegistry`].

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::caching::PopulationQueue;
use crate::config::Config;
use crate::sources::{SourceRegistry, SourceServices};
use crate::transform::RasterTransform;
use crate::utils::http::{DownloadTimeouts, create_client};

/// Everything needed to serve image requests.
#[derive(Clone, Debug)]
pub struct SharedServices {
    pub registry: Arc<SourceRegistry>,
    pub population: PopulationQueue,
}

impl SharedServices {
    pub fn new(config: &Config, io_pool: tokio::runtime::Handle) -> Result<Self> {
        let client = create_client(&DownloadTimeouts::from_config(config))
            .context("failed to create http client")?;
        let population = PopulationQueue::new(&config.population, io_pool);

        let services = SourceServices {
            client,
            population: population.clone(),
            transform: Arc::new(RasterTransform),
            transform_config: config.transform,
        };
        let registry = SourceRegistry::from_config(&config.sources, &services)
            .context("failed to create image sources")?;

        Ok(Self {
            registry: Arc::new(registry),
            population,
        })
    }
}
