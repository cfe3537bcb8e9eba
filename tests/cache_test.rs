use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use image::{DynamicImage, ImageFormat, RgbImage};
use photokeep::config::CacheConfig;
use photokeep::models::{Photo, PhotoStatus};
use photokeep::services::cache::{ImageCache, ImageFetcher, ImageVariant};
use photokeep::store::StoreError;

fn test_png(width: u32, height: u32) -> Bytes {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    Bytes::from(out)
}

fn photo(id: &str) -> Photo {
    Photo {
        id: id.to_string(),
        request_id: "r1".into(),
        family_id: "f1".into(),
        created_at: Utc::now(),
        created_by_user_id: "u1".into(),
        blob_path: format!("families/f1/requests/r1/{id}.jpg"),
        is_blocked: false,
        status: PhotoStatus::Active,
        expires_at: None,
        trashed_at: None,
        purge_at: None,
    }
}

/// Counts fetches and holds each one open briefly so concurrent callers
/// actually overlap with the in-flight request.
struct CountingFetcher {
    image: Option<Bytes>,
    calls: AtomicUsize,
}

impl CountingFetcher {
    fn serving(image: Bytes) -> Arc<Self> {
        Arc::new(Self {
            image: Some(image),
            calls: AtomicUsize::new(0),
        })
    }

    fn empty() -> Arc<Self> {
        Arc::new(Self {
            image: None,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageFetcher for CountingFetcher {
    async fn fetch(&self, _photo: &Photo) -> Result<Option<Bytes>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(self.image.clone())
    }
}

fn cache_config(dir: &std::path::Path) -> CacheConfig {
    CacheConfig {
        dir: dir.to_path_buf(),
        eviction_check_secs: 0,
        ..CacheConfig::default()
    }
}

#[tokio::test]
async fn concurrent_loads_trigger_exactly_one_fetch() {
    let tmp = tempfile::tempdir().unwrap();
    let fetcher = CountingFetcher::serving(test_png(640, 480));
    let cache = Arc::new(ImageCache::new(cache_config(tmp.path()), fetcher.clone()).unwrap());

    let mut handles = Vec::new();
    for i in 0..10 {
        let cache = cache.clone();
        let variant = if i % 2 == 0 {
            ImageVariant::Thumbnail
        } else {
            ImageVariant::Full
        };
        handles.push(tokio::spawn(async move {
            cache.load(&photo("p1"), variant).await
        }));
    }

    for handle in handles {
        assert!(handle.await.unwrap().is_some());
    }
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn one_fetch_populates_both_variants_in_both_tiers() {
    let tmp = tempfile::tempdir().unwrap();
    let fetcher = CountingFetcher::serving(test_png(640, 480));
    let cache = ImageCache::new(cache_config(tmp.path()), fetcher.clone()).unwrap();

    let full = cache.load(&photo("p1"), ImageVariant::Full).await.unwrap();
    assert_eq!(fetcher.calls(), 1);

    // Thumbnail comes out of the cache without a second fetch, bounded at
    // 300 on the longest side.
    let thumb = cache
        .load(&photo("p1"), ImageVariant::Thumbnail)
        .await
        .unwrap();
    assert_eq!(fetcher.calls(), 1);

    let full_img = image::load_from_memory(&full).unwrap();
    let thumb_img = image::load_from_memory(&thumb).unwrap();
    assert_eq!((full_img.width(), full_img.height()), (640, 480));
    assert_eq!((thumb_img.width(), thumb_img.height()), (300, 225));

    // Both variants landed on disk under the documented names.
    assert!(tmp.path().join("p1_full.jpg").exists());
    assert!(tmp.path().join("p1_thumb.jpg").exists());
}

#[tokio::test]
async fn disk_tier_survives_a_fresh_cache_instance() {
    let tmp = tempfile::tempdir().unwrap();
    let fetcher = CountingFetcher::serving(test_png(640, 480));
    {
        let cache = ImageCache::new(cache_config(tmp.path()), fetcher.clone()).unwrap();
        cache.load(&photo("p1"), ImageVariant::Full).await.unwrap();
    }
    assert_eq!(fetcher.calls(), 1);

    // New instance, empty memory tier: served straight from disk.
    let cache = ImageCache::new(cache_config(tmp.path()), fetcher.clone()).unwrap();
    assert!(cache.load(&photo("p1"), ImageVariant::Full).await.is_some());
    assert!(
        cache
            .load(&photo("p1"), ImageVariant::Thumbnail)
            .await
            .is_some()
    );
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn a_miss_is_not_cached() {
    let tmp = tempfile::tempdir().unwrap();
    let fetcher = CountingFetcher::empty();
    let cache = ImageCache::new(cache_config(tmp.path()), fetcher.clone()).unwrap();

    assert!(cache.load(&photo("p1"), ImageVariant::Full).await.is_none());
    assert!(cache.load(&photo("p1"), ImageVariant::Full).await.is_none());

    // No negative caching: every load retried the source.
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn evict_clears_both_tiers_for_one_photo() {
    let tmp = tempfile::tempdir().unwrap();
    let fetcher = CountingFetcher::serving(test_png(640, 480));
    let cache = ImageCache::new(cache_config(tmp.path()), fetcher.clone()).unwrap();

    cache.load(&photo("p1"), ImageVariant::Full).await.unwrap();
    cache.evict("p1").await;

    assert!(!tmp.path().join("p1_full.jpg").exists());
    assert!(!tmp.path().join("p1_thumb.jpg").exists());

    // Next load goes back to the source.
    cache.load(&photo("p1"), ImageVariant::Full).await.unwrap();
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn evict_expired_leaves_a_clean_miss_for_deleted_photos() {
    let tmp = tempfile::tempdir().unwrap();
    let fetcher = CountingFetcher::serving(test_png(640, 480));
    let cache = ImageCache::new(cache_config(tmp.path()), fetcher.clone()).unwrap();

    cache.load(&photo("keep"), ImageVariant::Full).await.unwrap();
    cache.load(&photo("gone"), ImageVariant::Full).await.unwrap();
    assert_eq!(fetcher.calls(), 2);

    let valid: HashSet<String> = ["keep".to_string()].into();
    cache.evict_expired(&valid).await;

    assert!(tmp.path().join("keep_full.jpg").exists());
    assert!(!tmp.path().join("gone_full.jpg").exists());
    assert!(!tmp.path().join("gone_thumb.jpg").exists());

    // Surviving entry still serves without a fetch; the evicted one
    // refetches cleanly.
    cache.load(&photo("keep"), ImageVariant::Full).await.unwrap();
    assert_eq!(fetcher.calls(), 2);
    cache.load(&photo("gone"), ImageVariant::Full).await.unwrap();
    assert_eq!(fetcher.calls(), 3);
}

#[tokio::test]
async fn clear_all_empties_the_cache_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let fetcher = CountingFetcher::serving(test_png(640, 480));
    let cache = ImageCache::new(cache_config(tmp.path()), fetcher.clone()).unwrap();

    cache.load(&photo("p1"), ImageVariant::Full).await.unwrap();
    cache.load(&photo("p2"), ImageVariant::Thumbnail).await.unwrap();

    cache.clear_all().await;

    let entries: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
    assert!(entries.is_empty());

    cache.load(&photo("p1"), ImageVariant::Full).await.unwrap();
    assert_eq!(fetcher.calls(), 3);
}

#[tokio::test]
async fn disk_eviction_drops_oldest_files_down_to_the_target() {
    let tmp = tempfile::tempdir().unwrap();
    let fetcher = CountingFetcher::serving(test_png(64, 64));

    // 100 KB cap, 75 KB target, throttle disabled.
    let cfg = CacheConfig {
        dir: tmp.path().to_path_buf(),
        max_disk_bytes: 100 * 1024,
        eviction_target: 0.75,
        eviction_check_secs: 0,
        ..CacheConfig::default()
    };
    let cache = ImageCache::new(cfg, fetcher).unwrap();

    // Four 40 KB files with strictly increasing mtimes, oldest first.
    let payload = vec![0u8; 40 * 1024];
    for (i, name) in ["a_full.jpg", "b_full.jpg", "c_full.jpg", "d_full.jpg"]
        .iter()
        .enumerate()
    {
        let path = tmp.path().join(name);
        std::fs::write(&path, &payload).unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(1000 - i as u64 * 100);
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
    }

    cache.evict_disk_if_needed().await;

    // 160 KB -> evict a, b, c (oldest first) to get to 40 KB <= 75 KB.
    assert!(!tmp.path().join("a_full.jpg").exists());
    assert!(!tmp.path().join("b_full.jpg").exists());
    assert!(!tmp.path().join("c_full.jpg").exists());
    assert!(tmp.path().join("d_full.jpg").exists());
}

#[tokio::test]
async fn concurrent_load_storm_never_surfaces_partial_files() {
    let tmp = tempfile::tempdir().unwrap();
    let fetcher = CountingFetcher::serving(test_png(640, 480));
    let cache = Arc::new(ImageCache::new(cache_config(tmp.path()), fetcher.clone()).unwrap());

    // Many photos, overlapping thumbnail and full loads per photo.
    let mut handles = Vec::new();
    for p in 0..5 {
        for i in 0..6 {
            let cache = cache.clone();
            let id = format!("p{p}");
            let variant = if i % 2 == 0 {
                ImageVariant::Thumbnail
            } else {
                ImageVariant::Full
            };
            handles.push(tokio::spawn(
                async move { cache.load(&photo(&id), variant).await },
            ));
        }
    }

    // Every payload handed to a caller decodes cleanly.
    for handle in handles {
        let bytes = handle.await.unwrap().unwrap();
        assert!(image::load_from_memory(&bytes).is_ok());
    }

    // Every file on disk is a complete JPEG; no in-progress temp files left.
    for entry in std::fs::read_dir(tmp.path()).unwrap() {
        let path = entry.unwrap().path();
        assert_eq!(path.extension().unwrap(), "jpg");
        let data = std::fs::read(&path).unwrap();
        assert!(image::load_from_memory(&data).is_ok(), "torn file {path:?}");
    }
}

#[tokio::test]
async fn disk_eviction_is_a_noop_under_the_cap() {
    let tmp = tempfile::tempdir().unwrap();
    let fetcher = CountingFetcher::serving(test_png(64, 64));
    let cfg = CacheConfig {
        dir: tmp.path().to_path_buf(),
        max_disk_bytes: 100 * 1024,
        eviction_check_secs: 0,
        ..CacheConfig::default()
    };
    let cache = ImageCache::new(cfg, fetcher).unwrap();

    std::fs::write(tmp.path().join("a_full.jpg"), vec![0u8; 10 * 1024]).unwrap();
    cache.evict_disk_if_needed().await;
    assert!(tmp.path().join("a_full.jpg").exists());
}
