use std::fs;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderName, HeaderValue};

use imagecache_service::error::ImageError;
use imagecache_sources::{HttpSourceConfig, SourceConfig};

use crate::{OriginServer, http_source_config, jpeg, setup_services, tempdir, url_request};

const SHOE: &str = "pre/b12345/6/shoe.jpg";
const SHOE_CACHE_PATH: &str = "pre/b/1/2/3/4/5/6/shoe.jpg";

fn source(config: HttpSourceConfig) -> Vec<SourceConfig> {
    vec![SourceConfig::Http(Arc::new(config))]
}

#[tokio::test]
async fn test_download_and_cache() {
    let origin = OriginServer::new();
    let cache_dir = tempdir();
    let image = jpeg(40, 30);
    origin.put(SHOE, image.clone());

    let (registry, population) =
        setup_services(source(http_source_config("remote", cache_dir.path())), |_| ());

    let response = registry.get_image(&url_request(origin.url(SHOE))).await.unwrap();
    assert_eq!(&response[..], &image[..]);
    assert_eq!(origin.hits("GET", SHOE), 1);

    // Downloads are cached verbatim.
    population.wait_idle().await;
    let cache_path = cache_dir.path().join(SHOE_CACHE_PATH);
    assert_eq!(fs::read(&cache_path).unwrap(), image);

    let response = registry.get_image(&url_request(origin.url(SHOE))).await.unwrap();
    assert_eq!(&response[..], &image[..]);
    assert_eq!(origin.hits("GET", SHOE), 1);
}

#[tokio::test]
async fn test_cached_entries_are_not_revalidated() {
    let origin = OriginServer::new();
    let cache_dir = tempdir();
    let image = jpeg(8, 8);
    origin.put(SHOE, image.clone());

    let (registry, population) =
        setup_services(source(http_source_config("remote", cache_dir.path())), |_| ());

    registry.get_image(&url_request(origin.url(SHOE))).await.unwrap();
    population.wait_idle().await;

    origin.put(SHOE, jpeg(16, 16));
    let response = registry.get_image(&url_request(origin.url(SHOE))).await.unwrap();
    assert_eq!(&response[..], &image[..]);
    assert_eq!(origin.total_hits(), 1);
}

#[tokio::test]
async fn test_layout_mismatch_is_served_uncached() {
    let origin = OriginServer::new();
    let cache_dir = tempdir();
    let image = jpeg(8, 8);
    origin.put("other/photo.jpg", image.clone());

    let (registry, population) =
        setup_services(source(http_source_config("remote", cache_dir.path())), |_| ());

    for _ in 0..2 {
        let response = registry
            .get_image(&url_request(origin.url("other/photo.jpg")))
            .await
            .unwrap();
        assert_eq!(&response[..], &image[..]);
        population.wait_idle().await;
    }

    assert_eq!(origin.hits("GET", "other/photo.jpg"), 2);
    assert_eq!(fs::read_dir(cache_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_allowed_origins() {
    let origin = OriginServer::new();
    let cache_dir = tempdir();
    origin.put(SHOE, jpeg(8, 8));

    let mut config = http_source_config("remote", cache_dir.path());
    config.allowed_origins = vec!["example.com".into(), format!("http://{}", origin.host())];
    let (registry, _population) = setup_services(source(config), |_| ());

    let result = registry
        .get_image(&url_request("http://evil.com/pre/a12345/6/x.jpg"))
        .await;
    match result {
        Err(ImageError::OriginNotAllowed(host)) => assert_eq!(host, "evil.com"),
        other => panic!("unexpected result: {other:?}"),
    }

    // The port is part of the origin.
    let other_port = format!("http://127.0.0.1:1/{SHOE}");
    assert!(matches!(
        registry.get_image(&url_request(other_port)).await,
        Err(ImageError::OriginNotAllowed(_))
    ));
    assert_eq!(origin.total_hits(), 0);

    assert!(registry.get_image(&url_request(origin.url(SHOE))).await.is_ok());
    assert_eq!(origin.hits("GET", SHOE), 1);
}

#[tokio::test]
async fn test_size_guard_precedes_download() {
    let origin = OriginServer::new();
    let cache_dir = tempdir();
    origin.put_with_declared_size(SHOE, jpeg(8, 8), 1000);

    let mut config = http_source_config("remote", cache_dir.path());
    config.max_allowed_size = 100;
    let (registry, population) = setup_services(source(config), |_| ());

    let result = registry.get_image(&url_request(origin.url(SHOE))).await;
    assert!(
        matches!(
            result,
            Err(ImageError::SizeExceeded {
                size: 1000,
                max: 100
            })
        ),
        "{result:?}"
    );
    assert_eq!(origin.hits("HEAD", SHOE), 1);
    assert_eq!(origin.hits("GET", SHOE), 0);

    assert_eq!(population.pending(), 0);
    assert!(!cache_dir.path().join(SHOE_CACHE_PATH).exists());
}

#[tokio::test]
async fn test_size_guard_allows_small_images() {
    let origin = OriginServer::new();
    let cache_dir = tempdir();
    let image = jpeg(4, 4);
    let size = image.len() as u64;
    origin.put(SHOE, image.clone());

    let mut config = http_source_config("remote", cache_dir.path());
    config.max_allowed_size = size;
    let (registry, _population) = setup_services(source(config), |_| ());

    let response = registry.get_image(&url_request(origin.url(SHOE))).await.unwrap();
    assert_eq!(&response[..], &image[..]);
    assert_eq!(origin.hits("HEAD", SHOE), 1);
    assert_eq!(origin.hits("GET", SHOE), 1);
}

#[tokio::test]
async fn test_size_guard_checks_body() {
    let origin = OriginServer::new();
    let cache_dir = tempdir();
    let image = jpeg(64, 64);
    let size = image.len() as u64;
    // The origin understates the size in its HEAD response.
    origin.put_with_declared_size(SHOE, image, 10);

    let mut config = http_source_config("remote", cache_dir.path());
    config.max_allowed_size = 100;
    let (registry, _population) = setup_services(source(config), |_| ());

    let result = registry.get_image(&url_request(origin.url(SHOE))).await;
    match result {
        Err(ImageError::SizeExceeded { size: actual, max }) => {
            assert_eq!((actual, max), (size, 100));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_size_guard_stops_endless_body() {
    let origin = OriginServer::new();
    let cache_dir = tempdir();
    origin.put_endless(SHOE);

    let mut config = http_source_config("remote", cache_dir.path());
    config.max_allowed_size = 100;
    let (registry, population) = setup_services(source(config), |config| {
        config.max_download_timeout = Duration::from_secs(60);
    });

    let request = url_request(origin.url(SHOE));
    let result = tokio::time::timeout(Duration::from_secs(10), registry.get_image(&request))
        .await
        .expect("download was not cut short");
    match result {
        Err(ImageError::SizeExceeded { size, max }) => {
            assert_eq!(max, 100);
            assert!(size > max);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(origin.hits("GET", SHOE), 1);

    population.wait_idle().await;
    assert!(!cache_dir.path().join(SHOE_CACHE_PATH).exists());
}

#[tokio::test]
async fn test_cache_path_escape() {
    let origin = OriginServer::new();
    let cache_dir = tempdir();
    origin.put("pre/a1/x", jpeg(2, 2));

    let (registry, population) =
        setup_services(source(http_source_config("remote", cache_dir.path())), |_| ());

    // The image name is taken verbatim from the URL, query included.
    let url = format!("{}?/../../../../../etc/passwd", origin.url("pre/a1/x"));
    let result = registry.get_image(&url_request(url)).await;
    assert!(matches!(result, Err(ImageError::InvalidPath)), "{result:?}");

    assert_eq!(origin.total_hits(), 0);
    assert_eq!(population.pending(), 0);
    assert_eq!(fs::read_dir(cache_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_fetch_errors() {
    let origin = OriginServer::new();
    let cache_dir = tempdir();
    origin.put_status("pre/a12345/6/gone.jpg", StatusCode::GONE);
    origin.put_status("pre/a12345/6/moved.jpg", StatusCode::NOT_MODIFIED);

    let (registry, population) =
        setup_services(source(http_source_config("remote", cache_dir.path())), |_| ());

    for path in [
        "pre/a12345/6/gone.jpg",
        "pre/a12345/6/moved.jpg",
        "pre/a12345/6/missing.jpg",
    ] {
        let result = registry.get_image(&url_request(origin.url(path))).await;
        assert!(matches!(result, Err(ImageError::FetchFailed(_))), "{path}");
    }

    // Nothing listens on port 1.
    let result = registry
        .get_image(&url_request("http://127.0.0.1:1/pre/a12345/6/x.jpg"))
        .await;
    assert!(matches!(result, Err(ImageError::FetchFailed(_))));

    population.wait_idle().await;
    assert_eq!(fs::read_dir(cache_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_head_errors_fail_the_request() {
    let origin = OriginServer::new();
    let cache_dir = tempdir();
    origin.put_status(SHOE, StatusCode::FORBIDDEN);

    let mut config = http_source_config("remote", cache_dir.path());
    config.max_allowed_size = 1000;
    let (registry, _population) = setup_services(source(config), |_| ());

    let result = registry.get_image(&url_request(origin.url(SHOE))).await;
    match result {
        Err(ImageError::FetchFailed(details)) => assert!(details.contains("status=403")),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(origin.hits("GET", SHOE), 0);
}

#[tokio::test]
async fn test_invalid_urls() {
    let cache_dir = tempdir();
    let (registry, _population) =
        setup_services(source(http_source_config("remote", cache_dir.path())), |_| ());

    for url in ["not a url", "ftp://example.com/pre/a1/x.jpg", "/pre/a1/x.jpg"] {
        let result = registry.get_image(&url_request(url)).await;
        assert!(matches!(result, Err(ImageError::InvalidUrl(_))), "{url}");
    }
}

#[tokio::test]
async fn test_authorization_precedence() {
    let origin = OriginServer::new();
    let cache_dir = tempdir();
    let forward_header = HeaderName::from_static("x-forward-authorization");

    let last_authorization = || origin.authorizations().last().cloned().flatten();
    let request = |path: &str, forwarded: Option<&'static str>, plain: Option<&'static str>| {
        let mut request = url_request(origin.url(path));
        if let Some(value) = forwarded {
            request = request.with_header(forward_header.clone(), HeaderValue::from_static(value));
        }
        if let Some(value) = plain {
            request = request.with_header(AUTHORIZATION, HeaderValue::from_static(value));
        }
        request
    };

    for index in 0..5 {
        origin.put(&format!("other/{index}.jpg"), jpeg(2, 2));
    }

    // A configured credential always wins.
    let mut config = http_source_config("static", &cache_dir.path().join("static"));
    config.authorization = Some("Bearer static".into());
    config.forward_authorization = true;
    let (registry, _population) = setup_services(source(config), |_| ());
    registry
        .get_image(&request("other/0.jpg", Some("Bearer forwarded"), Some("Bearer plain")))
        .await
        .unwrap();
    assert_eq!(last_authorization().as_deref(), Some("Bearer static"));

    // Forwarded credentials prefer the explicit forward header.
    let mut config = http_source_config("forward", &cache_dir.path().join("forward"));
    config.forward_authorization = true;
    let (registry, _population) = setup_services(source(config), |_| ());
    registry
        .get_image(&request("other/1.jpg", Some("Bearer forwarded"), Some("Bearer plain")))
        .await
        .unwrap();
    assert_eq!(last_authorization().as_deref(), Some("Bearer forwarded"));

    registry
        .get_image(&request("other/2.jpg", None, Some("Bearer plain")))
        .await
        .unwrap();
    assert_eq!(last_authorization().as_deref(), Some("Bearer plain"));

    registry
        .get_image(&request("other/3.jpg", None, None))
        .await
        .unwrap();
    assert_eq!(last_authorization(), None);

    // Without forwarding, caller credentials stay with us.
    let config = http_source_config("private", &cache_dir.path().join("private"));
    let (registry, _population) = setup_services(source(config), |_| ());
    registry
        .get_image(&request("other/4.jpg", Some("Bearer forwarded"), Some("Bearer plain")))
        .await
        .unwrap();
    assert_eq!(last_authorization(), None);
}

#[tokio::test]
async fn test_size_check_carries_authorization() {
    let origin = OriginServer::new();
    let cache_dir = tempdir();
    origin.put(SHOE, jpeg(2, 2));

    let mut config = http_source_config("remote", cache_dir.path());
    config.authorization = Some("Basic c2VjcmV0".into());
    config.max_allowed_size = 10_000;
    let (registry, _population) = setup_services(source(config), |_| ());

    registry.get_image(&url_request(origin.url(SHOE))).await.unwrap();
    assert_eq!(
        origin.authorizations(),
        [Some("Basic c2VjcmV0".to_owned()), Some("Basic c2VjcmV0".to_owned())]
    );
}
