//! Images from remote HTTP origins.
//!
//! Downloads are cached verbatim. Cache entries are never checked against their origin again:
//! once an image was fetched, it is served from disk until the entry is removed externally.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Client, RequestBuilder, Response};
use url::Url;

use imagecache_sources::{HttpSourceConfig, SourceId};

use crate::caching::{CacheStore, PopulationQueue};
use crate::error::ImageError;
use crate::request::{ImageRequest, X_FORWARD_AUTHORIZATION};
use crate::sources::{ImageSource, SourceServices};
use crate::utils::http::{declared_content_length, is_allowed_origin, normalize_origin};

const TYPE_NAME: &str = "http";

/// Serves images downloaded from remote origins, keeping the downloads in a cache directory.
#[derive(Debug)]
pub struct HttpSource {
    config: Arc<HttpSourceConfig>,
    store: CacheStore,
    allowed_origins: Vec<String>,
    authorization: Option<HeaderValue>,
    client: Client,
    population: PopulationQueue,
}

impl HttpSource {
    pub fn new(config: Arc<HttpSourceConfig>, services: &SourceServices) -> anyhow::Result<Self> {
        let allowed_origins = config
            .allowed_origins
            .iter()
            .filter_map(|origin| normalize_origin(origin))
            .collect();

        let authorization = match config.authorization.as_deref() {
            Some(value) if !value.is_empty() => {
                let mut value = HeaderValue::from_str(value).with_context(|| {
                    format!("invalid authorization for source `{}`", config.id)
                })?;
                value.set_sensitive(true);
                Some(value)
            }
            _ => None,
        };

        Ok(Self {
            store: CacheStore::new(&config.cache_dir),
            allowed_origins,
            authorization,
            client: services.client.clone(),
            population: services.population.clone(),
            config,
        })
    }

    /// Picks the `Authorization` sent to the origin.
    ///
    /// A configured credential wins over anything the caller sent. Forwarded credentials are
    /// taken from `X-Forward-Authorization` first, then from `Authorization`.
    fn authorization<'a>(&'a self, request: &'a ImageRequest) -> Option<&'a HeaderValue> {
        if let Some(ref value) = self.authorization {
            return Some(value);
        }
        if !self.config.forward_authorization {
            return None;
        }
        request
            .header(X_FORWARD_AUTHORIZATION)
            .or_else(|| request.header(AUTHORIZATION.as_str()))
    }

    fn with_authorization(
        builder: RequestBuilder,
        authorization: Option<&HeaderValue>,
    ) -> RequestBuilder {
        match authorization {
            Some(value) => builder.header(AUTHORIZATION, value.clone()),
            None => builder,
        }
    }

    /// Checks the size the origin declares for `url`, without downloading it.
    async fn check_size(
        &self,
        url: &Url,
        authorization: Option<&HeaderValue>,
    ) -> Result<(), ImageError> {
        let max = self.config.max_allowed_size;
        let builder = self.client.head(url.clone());
        let response = Self::with_authorization(builder, authorization).send().await?;
        let response = ensure_success(response, url)?;

        let size = declared_content_length(response.headers());
        if size > max {
            tracing::debug!(%url, size, max, "Remote image exceeds maximum size");
            return Err(ImageError::SizeExceeded { size, max });
        }
        Ok(())
    }

    async fn download(
        &self,
        url: &Url,
        authorization: Option<&HeaderValue>,
    ) -> Result<Bytes, ImageError> {
        let builder = self.client.get(url.clone());
        let response = Self::with_authorization(builder, authorization).send().await?;
        let response = ensure_success(response, url)?;

        let max = self.config.max_allowed_size;
        if max == 0 {
            return Ok(response.bytes().await?);
        }

        // The origin may understate the size in its `HEAD` response, or omit it entirely.
        let declared = response.content_length().unwrap_or(0);
        if declared > max {
            tracing::debug!(%url, size = declared, max, "Remote image exceeds maximum size");
            return Err(ImageError::SizeExceeded {
                size: declared,
                max,
            });
        }

        let mut data = BytesMut::with_capacity(declared as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            let size = (data.len() + chunk.len()) as u64;
            if size > max {
                tracing::debug!(%url, size, max, "Remote image exceeds maximum size");
                return Err(ImageError::SizeExceeded { size, max });
            }
            data.extend_from_slice(&chunk);
        }
        Ok(data.freeze())
    }

    /// Derives the cache path of `url`, or `None` if the layout does not apply to it.
    fn cache_path(&self, url: &Url) -> Result<Option<PathBuf>, ImageError> {
        match self.config.layout.cache_path(url.as_str()) {
            Some(relative) => self.store.resolve(&relative).map(Some),
            None => {
                tracing::debug!(%url, "Cache layout does not match, serving uncached");
                Ok(None)
            }
        }
    }

    fn populate(&self, cache_path: PathBuf, data: Bytes) {
        let store = self.store.clone();
        let key = cache_path.clone();

        let task = async move {
            tokio::task::spawn_blocking(move || store.store(&cache_path, &data, None))
                .await
                .map_err(|_| ImageError::CacheWrite(std::io::Error::other("population panicked")))?
        };

        self.population.submit(TYPE_NAME, key, task);
    }
}

fn ensure_success(response: Response, url: &Url) -> Result<Response, ImageError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        tracing::debug!(%url, %status, "Unexpected status code from origin");
        Err(ImageError::FetchFailed(format!(
            "(status={}) (url={url})",
            status.as_u16()
        )))
    }
}

fn parse_url(raw: &str) -> Result<Url, ImageError> {
    let url = Url::parse(raw).map_err(|error| ImageError::InvalidUrl(error.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ImageError::InvalidUrl(format!(
            "unsupported scheme `{scheme}`"
        ))),
    }
}

#[async_trait]
impl ImageSource for HttpSource {
    fn id(&self) -> &SourceId {
        &self.config.id
    }

    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn matches(&self, request: &ImageRequest) -> bool {
        request.method == reqwest::Method::GET && request.param("url").is_some()
    }

    async fn get_image(&self, request: &ImageRequest) -> Result<Bytes, ImageError> {
        let raw_url = request.param("url").ok_or(ImageError::MissingParam("url"))?;
        let url = parse_url(raw_url)?;

        if !is_allowed_origin(&url, &self.allowed_origins) {
            metric!(counter("source.http.origin_rejected") += 1);
            let origin = url.host_str().unwrap_or_default().to_owned();
            return Err(ImageError::OriginNotAllowed(origin));
        }

        let cache_path = self.cache_path(&url)?;

        // Entries are served as long as they exist, there is no revalidation.
        if let Some(ref path) = cache_path {
            if self.store.lookup(path).await.is_some() {
                match self.store.read(path).await {
                    Ok(data) => {
                        if let Err(error) = self.store.touch(path) {
                            tracing::warn!(path = %path.display(), error = %error, "Failed to touch cache entry");
                        }
                        metric!(counter("source.http.cache.hit") += 1);
                        return Ok(data);
                    }
                    Err(error) => {
                        tracing::warn!(path = %path.display(), error = %error, "Failed to read cache entry");
                    }
                }
            }
        }
        metric!(counter("source.http.cache.miss") += 1);

        let authorization = self.authorization(request);
        if self.config.max_allowed_size > 0 {
            self.check_size(&url, authorization).await?;
        }
        let data = self.download(&url, authorization).await?;

        if let Some(path) = cache_path {
            self.populate(path, data.clone());
        }
        Ok(data)
    }
}
