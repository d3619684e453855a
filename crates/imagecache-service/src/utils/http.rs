use std::time::Duration;

use reqwest::Url;
use reqwest::header::{CONTENT_LENGTH, HeaderMap};

use crate::config::Config;

/// The user agent sent with every request to an image origin.
pub const USER_AGENT: &str = concat!("imagecache/", env!("CARGO_PKG_VERSION"));

/// Timeouts for requests to image origins.
#[derive(Copy, Clone, Debug)]
pub struct DownloadTimeouts {
    /// The timeout for establishing a connection.
    pub connect: Duration,
    /// Global timeout for one request, including reading the body.
    pub max_download: Duration,
}

impl DownloadTimeouts {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect: config.connect_timeout,
            max_download: config.max_download_timeout,
        }
    }
}

impl Default for DownloadTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(1),
            max_download: Duration::from_secs(60),
        }
    }
}

/// Creates the [`reqwest::Client`] shared by all HTTP sources.
pub fn create_client(timeouts: &DownloadTimeouts) -> reqwest::Result<reqwest::Client> {
    reqwest::ClientBuilder::new()
        .user_agent(USER_AGENT)
        .gzip(true)
        .hickory_dns(true)
        .connect_timeout(timeouts.connect)
        .timeout(timeouts.max_download)
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
}

/// Returns the `host[:port]` of `url`, the way origins are listed in the allow-list.
///
/// The port is only included if it differs from the scheme's default.
pub fn origin_host(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    })
}

/// Normalizes a configured allow-list entry to `host[:port]`.
///
/// Entries may be given as plain hosts, or as URLs of which only host and port are kept.
pub fn normalize_origin(entry: &str) -> Option<String> {
    let entry = entry.trim();
    if entry.is_empty() {
        return None;
    }

    if entry.contains("://") {
        let url = Url::parse(entry).ok()?;
        return origin_host(&url);
    }

    Some(entry.trim_end_matches('/').to_ascii_lowercase())
}

/// Checks whether the host of `url` is one of the `allowed` origins.
///
/// `allowed` has to be normalized with [`normalize_origin`]. An empty list allows every origin.
pub fn is_allowed_origin(url: &Url, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }

    match origin_host(url) {
        Some(host) => allowed.iter().any(|origin| *origin == host),
        None => false,
    }
}

/// Reads the declared `Content-Length`, treating a missing or malformed header as `0`.
pub fn declared_content_length(headers: &HeaderMap) -> u64 {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}
