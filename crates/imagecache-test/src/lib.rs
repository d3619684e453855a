//! Helpers for testing the image services and the web server.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Hold the handle returned by [`tempdir`] for the entire lifetime of the test. The cache
//!    creates directories lazily, so a directory dropped too early is silently recreated and
//!    leaked.
//!
//!  - Hold the [`OriginServer`] until all requests to it have been made. A dropped server stops
//!    accepting connections, and downloads from it fail.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::io::Cursor;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::{self, Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::stream;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use reqwest::Url;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

use imagecache_sources::{
    CacheLayout, FilesystemSourceConfig, HttpSourceConfig, SourceConfig, SourceId,
};

pub use tempfile::TempDir;

/// Setup the test environment.
///
/// Initializes logs: only logs of the `imagecache` crates are captured.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new(
            "imagecache=trace,imagecache_service=trace,imagecache_sources=trace",
        ))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Encodes a solid PNG image of the given size.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba([220, 40, 40, 255]));
    encode(DynamicImage::ImageRgba8(image), ImageFormat::Png)
}

/// Encodes a solid JPEG image of the given size.
pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([30, 110, 200]));
    encode(DynamicImage::ImageRgb8(image), ImageFormat::Jpeg)
}

fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buffer = Vec::new();
    image.write_to(&mut Cursor::new(&mut buffer), format).unwrap();
    buffer
}

/// Returns the dimensions of an encoded image.
pub fn dimensions(data: &[u8]) -> (u32, u32) {
    let image = image::load_from_memory(data).unwrap();
    (image.width(), image.height())
}

/// Writes `contents` to `path` below `root`, creating parent directories.
pub fn write_file(root: &Path, path: &str, contents: &[u8]) {
    let full_path = root.join(path);
    std::fs::create_dir_all(full_path.parent().unwrap()).unwrap();
    std::fs::write(full_path, contents).unwrap();
}

/// A file system source serving `mount`, caching into `cache_dir`.
pub fn filesystem_source(id: &str, mount: &Path, cache_dir: &Path) -> SourceConfig {
    SourceConfig::Filesystem(Arc::new(FilesystemSourceConfig {
        id: SourceId::new(id),
        path: mount.to_owned(),
        cache_dir: cache_dir.to_owned(),
    }))
}

/// An HTTP source caching into `cache_dir`, with the default layout and no restrictions.
///
/// Adjust the returned config before wrapping it into a [`SourceConfig::Http`].
pub fn http_source_config(id: &str, cache_dir: &Path) -> HttpSourceConfig {
    HttpSourceConfig {
        id: SourceId::new(id),
        cache_dir: cache_dir.to_owned(),
        allowed_origins: Vec::new(),
        max_allowed_size: 0,
        authorization: None,
        forward_authorization: false,
        layout: CacheLayout::default(),
    }
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
}

impl Server {
    /// Serves `router` on an ephemeral port of the loopback interface.
    pub fn with_router(router: Router) -> Self {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the `host:port` of this server, as it appears in an allow-list.
    pub fn host(&self) -> String {
        self.socket.to_string()
    }

    /// Returns a full URL pointing to the given path.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://{}/{}", self.socket, path).parse().unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Clone, Debug)]
struct OriginFile {
    data: Bytes,
    status: StatusCode,
    declared_size: Option<u64>,
    endless: bool,
}

#[derive(Clone, Debug, Default)]
struct OriginState {
    files: Arc<Mutex<BTreeMap<String, OriginFile>>>,
    hits: Arc<Mutex<BTreeMap<String, usize>>>,
    authorizations: Arc<Mutex<Vec<Option<String>>>>,
}

/// An image origin serving files put into it below `/images/`.
///
/// Every request is counted by method and path, and the `Authorization` header it carried is
/// recorded.
#[derive(Debug)]
pub struct OriginServer {
    server: Server,
    state: OriginState,
}

impl OriginServer {
    pub fn new() -> Self {
        let state = OriginState::default();

        let recorder = {
            let state = state.clone();
            move |req: Request, next: Next| {
                let state = state.clone();
                async move {
                    let key = format!("{} {}", req.method(), req.uri().path());
                    *state.hits.lock().unwrap().entry(key).or_default() += 1;

                    let authorization = req
                        .headers()
                        .get(header::AUTHORIZATION)
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_owned);
                    state.authorizations.lock().unwrap().push(authorization);

                    next.run(req).await
                }
            }
        };

        let router = Router::new()
            .route("/images/*path", get(serve_file).head(serve_file))
            .with_state(state.clone())
            .layer(middleware::from_fn(recorder));

        Self {
            server: Server::with_router(router),
            state,
        }
    }

    /// Serves `data` at `/images/{path}`.
    pub fn put(&self, path: &str, data: impl Into<Bytes>) {
        self.put_file(path, data.into(), StatusCode::OK, None, false);
    }

    /// Serves `data` at `/images/{path}`, but declares `size` bytes in `HEAD` responses.
    pub fn put_with_declared_size(&self, path: &str, data: impl Into<Bytes>, size: u64) {
        self.put_file(path, data.into(), StatusCode::OK, Some(size), false);
    }

    /// Streams zeroes at `/images/{path}` until the client hangs up, without declaring a size.
    pub fn put_endless(&self, path: &str) {
        self.put_file(path, Bytes::new(), StatusCode::OK, None, true);
    }

    /// Responds to requests for `/images/{path}` with `status` and an empty body.
    pub fn put_status(&self, path: &str, status: StatusCode) {
        self.put_file(path, Bytes::new(), status, None, false);
    }

    fn put_file(
        &self,
        path: &str,
        data: Bytes,
        status: StatusCode,
        declared_size: Option<u64>,
        endless: bool,
    ) {
        let file = OriginFile {
            data,
            status,
            declared_size,
            endless,
        };
        self.state
            .files
            .lock()
            .unwrap()
            .insert(path.trim_start_matches('/').to_owned(), file);
    }

    /// The URL of `/images/{path}`.
    pub fn url(&self, path: &str) -> Url {
        self.server.url(&format!("images/{}", path.trim_start_matches('/')))
    }

    /// The `host:port` of this origin.
    pub fn host(&self) -> String {
        self.server.host()
    }

    /// Number of `method` requests made for `/images/{path}`.
    pub fn hits(&self, method: &str, path: &str) -> usize {
        let key = format!("{method} /images/{}", path.trim_start_matches('/'));
        self.state.hits.lock().unwrap().get(&key).copied().unwrap_or(0)
    }

    /// Number of requests made to this origin in total.
    pub fn total_hits(&self) -> usize {
        self.state.hits.lock().unwrap().values().sum()
    }

    /// The `Authorization` header of every request so far, in order.
    pub fn authorizations(&self) -> Vec<Option<String>> {
        self.state.authorizations.lock().unwrap().clone()
    }
}

impl Default for OriginServer {
    fn default() -> Self {
        Self::new()
    }
}

async fn serve_file(
    State(state): State<OriginState>,
    extract::Path(path): extract::Path<String>,
    method: Method,
) -> Response {
    let Some(file) = state.files.lock().unwrap().get(&path).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    if !file.status.is_success() {
        return file.status.into_response();
    }

    if file.endless {
        if method == Method::HEAD {
            return Response::new(Body::empty());
        }
        let chunk = Bytes::from(vec![0; 64 * 1024]);
        return Response::new(Body::from_stream(stream::repeat(Ok::<_, Infallible>(chunk))));
    }

    let size = if method == Method::HEAD {
        file.declared_size.unwrap_or(file.data.len() as u64)
    } else {
        file.data.len() as u64
    };
    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        Body::from(file.data)
    };

    let mut response = Response::new(body);
    response
        .headers_mut()
        .insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    response
}
