use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use reqwest::Method;

use imagecache_service::error::ImageError;
use imagecache_service::request::ImageRequest;

use crate::{
    dimensions, file_request, filesystem_source, jpeg, png, setup_services, tempdir, write_file,
};

fn mtime(path: &Path) -> FileTime {
    FileTime::from_last_modification_time(&fs::metadata(path).unwrap())
}

fn atime(path: &Path) -> FileTime {
    FileTime::from_last_access_time(&fs::metadata(path).unwrap())
}

/// Names of all files below `dir`, including hidden ones.
fn list_files(dir: &Path) -> Vec<String> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_owned()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let entry = entry.unwrap();
            if entry.file_type().unwrap().is_dir() {
                stack.push(entry.path());
            } else {
                files.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
    }
    files.sort();
    files
}

#[tokio::test]
async fn test_miss_then_hit() {
    let data_dir = tempdir();
    let cache_dir = tempdir();
    let origin = jpeg(2000, 1000);
    write_file(data_dir.path(), "a/b.jpg", &origin);
    let origin_path = data_dir.path().join("a/b.jpg");
    let origin_mtime = FileTime::from_unix_time(1_600_000_000, 0);
    filetime::set_file_mtime(&origin_path, origin_mtime).unwrap();

    let (registry, population) = setup_services(
        vec![filesystem_source("data", data_dir.path(), cache_dir.path())],
        |_| (),
    );

    // The first request is served from the origin.
    let response = registry.get_image(&file_request("a/b.jpg")).await.unwrap();
    assert_eq!(&response[..], &origin[..]);

    population.wait_idle().await;
    let cache_path = cache_dir.path().join("a/b.jpg");
    assert_eq!(mtime(&cache_path), origin_mtime);
    let cached = fs::read(&cache_path).unwrap();
    assert_eq!(dimensions(&cached), (1200, 600));

    // The second one from the cache, refreshing only its access time.
    let past = FileTime::from_system_time(SystemTime::now() - Duration::from_secs(7200));
    filetime::set_file_atime(&cache_path, past).unwrap();

    let response = registry.get_image(&file_request("a/b.jpg")).await.unwrap();
    assert_eq!(&response[..], &cached[..]);
    assert_ne!(&response[..], &origin[..]);
    assert!(atime(&cache_path) > past);
    assert_eq!(mtime(&cache_path), origin_mtime);

    population.wait_idle().await;
    assert_eq!(list_files(cache_dir.path()), ["b.jpg"]);
}

#[tokio::test]
async fn test_small_image_keeps_size() {
    let data_dir = tempdir();
    let cache_dir = tempdir();
    write_file(data_dir.path(), "small.png", &png(300, 200));

    let (registry, population) = setup_services(
        vec![filesystem_source("data", data_dir.path(), cache_dir.path())],
        |_| (),
    );

    registry.get_image(&file_request("small.png")).await.unwrap();
    population.wait_idle().await;

    let cached = fs::read(cache_dir.path().join("small.png")).unwrap();
    assert_eq!(dimensions(&cached), (300, 200));
}

#[tokio::test]
async fn test_transform_limits_from_config() {
    let data_dir = tempdir();
    let cache_dir = tempdir();
    write_file(data_dir.path(), "wide.png", &png(400, 100));

    let (registry, population) = setup_services(
        vec![filesystem_source("data", data_dir.path(), cache_dir.path())],
        |config| {
            config.transform.max_width = 200;
            config.transform.max_height = 200;
        },
    );

    registry.get_image(&file_request("wide.png")).await.unwrap();
    population.wait_idle().await;

    let cached = fs::read(cache_dir.path().join("wide.png")).unwrap();
    assert_eq!(dimensions(&cached), (200, 50));
}

#[tokio::test]
async fn test_stale_entry_is_replaced() {
    let data_dir = tempdir();
    let cache_dir = tempdir();
    let origin_path = data_dir.path().join("photo.png");
    write_file(data_dir.path(), "photo.png", &png(64, 64));
    filetime::set_file_mtime(&origin_path, FileTime::from_unix_time(1_500_000_000, 0)).unwrap();

    let (registry, population) = setup_services(
        vec![filesystem_source("data", data_dir.path(), cache_dir.path())],
        |_| (),
    );

    registry.get_image(&file_request("photo.png")).await.unwrap();
    population.wait_idle().await;
    let cache_path = cache_dir.path().join("photo.png");
    let old_cached = fs::read(&cache_path).unwrap();

    let updated = png(32, 16);
    let updated_mtime = FileTime::from_unix_time(1_700_000_000, 0);
    fs::write(&origin_path, &updated).unwrap();
    filetime::set_file_mtime(&origin_path, updated_mtime).unwrap();

    let response = registry.get_image(&file_request("photo.png")).await.unwrap();
    assert_eq!(&response[..], &updated[..]);
    assert_ne!(&response[..], &old_cached[..]);

    population.wait_idle().await;
    assert_eq!(mtime(&cache_path), updated_mtime);
    assert_eq!(dimensions(&fs::read(&cache_path).unwrap()), (32, 16));
}

#[tokio::test]
async fn test_path_traversal() {
    let data_dir = tempdir();
    let cache_dir = tempdir();
    write_file(data_dir.path(), "inside.png", &png(4, 4));

    let (registry, population) = setup_services(
        vec![filesystem_source("data", data_dir.path(), cache_dir.path())],
        |_| (),
    );

    for file in ["../../etc/passwd", "a/../../etc/passwd", "..", "."] {
        let result = registry.get_image(&file_request(file)).await;
        assert!(
            matches!(result, Err(ImageError::InvalidPath)),
            "{file}: {result:?}"
        );
    }

    assert_eq!(population.pending(), 0);
    assert!(list_files(cache_dir.path()).is_empty());
}

#[tokio::test]
async fn test_missing_file() {
    let data_dir = tempdir();
    let cache_dir = tempdir();
    fs::create_dir_all(data_dir.path().join("dir")).unwrap();

    let (registry, population) = setup_services(
        vec![filesystem_source("data", data_dir.path(), cache_dir.path())],
        |_| (),
    );

    for file in ["missing.jpg", "dir"] {
        let result = registry.get_image(&file_request(file)).await;
        assert!(matches!(result, Err(ImageError::InvalidPath)), "{file}");
    }
    assert_eq!(population.pending(), 0);
}

#[tokio::test]
async fn test_failed_population_leaves_no_entry() {
    let data_dir = tempdir();
    let cache_dir = tempdir();
    write_file(data_dir.path(), "broken.jpg", b"definitely not a jpeg");
    write_file(data_dir.path(), "empty.jpg", b"");

    let (registry, population) = setup_services(
        vec![filesystem_source("data", data_dir.path(), cache_dir.path())],
        |_| (),
    );

    // The origin is served even though it cannot be cached.
    let response = registry.get_image(&file_request("broken.jpg")).await.unwrap();
    assert_eq!(&response[..], b"definitely not a jpeg");
    let response = registry.get_image(&file_request("empty.jpg")).await.unwrap();
    assert!(response.is_empty());

    population.wait_idle().await;
    assert!(list_files(cache_dir.path()).is_empty());
}

#[tokio::test]
async fn test_concurrent_requests() {
    let data_dir = tempdir();
    let cache_dir = tempdir();
    write_file(data_dir.path(), "x/same.png", &png(500, 500));

    let (registry, population) = setup_services(
        vec![filesystem_source("data", data_dir.path(), cache_dir.path())],
        |_| (),
    );

    let requests = (0..8).map(|_| {
        let registry = registry.clone();
        async move { registry.get_image(&file_request("x/same.png")).await }
    });
    // Late requests may already be served from the cache.
    for response in futures::future::join_all(requests).await {
        assert_eq!(dimensions(&response.unwrap()), (500, 500));
    }

    population.wait_idle().await;
    // No temporary files are left behind next to the entry.
    assert_eq!(list_files(cache_dir.path()), ["same.png"]);
}

#[tokio::test]
async fn test_head_request() {
    let data_dir = tempdir();
    let cache_dir = tempdir();
    let origin = png(8, 8);
    write_file(data_dir.path(), "head.png", &origin);

    let (registry, population) = setup_services(
        vec![filesystem_source("data", data_dir.path(), cache_dir.path())],
        |_| (),
    );

    let request = ImageRequest::new(Method::HEAD).with_param("file", "head.png");
    let response = registry.get_image(&request).await.unwrap();
    assert_eq!(&response[..], &origin[..]);
    population.wait_idle().await;

    let request = ImageRequest::new(Method::POST).with_param("file", "head.png");
    assert!(matches!(
        registry.get_image(&request).await,
        Err(ImageError::NoMatchingSource)
    ));
}

#[tokio::test]
async fn test_first_source_wins() {
    let first_dir = tempdir();
    let second_dir = tempdir();
    let cache_dir = tempdir();
    let first = png(2, 2);
    write_file(first_dir.path(), "shared.png", &first);
    write_file(second_dir.path(), "shared.png", &png(3, 3));

    let (registry, population) = setup_services(
        vec![
            filesystem_source("first", first_dir.path(), &cache_dir.path().join("first")),
            filesystem_source("second", second_dir.path(), &cache_dir.path().join("second")),
        ],
        |_| (),
    );

    let response = registry.get_image(&file_request("shared.png")).await.unwrap();
    assert_eq!(&response[..], &first[..]);

    population.wait_idle().await;
    assert!(cache_dir.path().join("first/shared.png").exists());
    assert!(!cache_dir.path().join("second").exists());
}
