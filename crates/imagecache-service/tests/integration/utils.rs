use std::sync::Arc;

use imagecache_service::caching::PopulationQueue;
use imagecache_service::config::Config;
use imagecache_service::request::ImageRequest;
use imagecache_service::services::SharedServices;
use imagecache_service::sources::SourceRegistry;
use imagecache_sources::SourceConfig;

pub use imagecache_test::*;

/// Creates the services for `sources`, on top of an otherwise default config.
///
/// Population runs on the current runtime. Use [`PopulationQueue::wait_idle`] to wait for
/// cache entries to be written.
pub fn setup_services(
    sources: Vec<SourceConfig>,
    update_config: impl FnOnce(&mut Config),
) -> (Arc<SourceRegistry>, PopulationQueue) {
    setup();

    let mut config = Config {
        sources: sources.into(),
        ..Default::default()
    };
    update_config(&mut config);

    let services = SharedServices::new(&config, tokio::runtime::Handle::current()).unwrap();
    (services.registry, services.population)
}

pub fn file_request(file: &str) -> ImageRequest {
    ImageRequest::get().with_param("file", file)
}

pub fn url_request(url: impl ToString) -> ImageRequest {
    ImageRequest::get().with_param("url", url.to_string())
}
