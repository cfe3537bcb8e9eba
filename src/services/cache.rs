use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use tokio::sync::{Mutex, watch};
use tokio::task::AbortHandle;

use crate::config::CacheConfig;
use crate::models::Photo;
use crate::services::imaging;
use crate::store::{FamilyStore, StoreError};

/// The two cached renditions of a photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageVariant {
    Thumbnail,
    Full,
}

impl ImageVariant {
    fn suffix(self) -> &'static str {
        match self {
            ImageVariant::Thumbnail => "_thumb",
            ImageVariant::Full => "_full",
        }
    }
}

/// Source of original photo bytes on a cache miss.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, photo: &Photo) -> Result<Option<Bytes>, StoreError>;
}

/// Adapter feeding the cache from whichever FamilyStore backend is active.
pub struct StoreImageFetcher(pub Arc<dyn FamilyStore>);

#[async_trait]
impl ImageFetcher for StoreImageFetcher {
    async fn fetch(&self, photo: &Photo) -> Result<Option<Bytes>, StoreError> {
        self.0.load_image_data(photo).await
    }
}

/// Recover the photo id from a cache file name. Names follow
/// `{photoId}_thumb.jpg` / `{photoId}_full.jpg`.
fn photo_id_from_filename(name: &str) -> Option<&str> {
    let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name);
    stem.strip_suffix("_thumb")
        .or_else(|| stem.strip_suffix("_full"))
}

/// The fetch result published to every waiter: `None` while pending, then
/// `Some(outcome)` where the outcome carries the full-size bytes or the miss.
type FetchSlot = Option<Option<Bytes>>;

struct InFlight {
    rx: watch::Receiver<FetchSlot>,
    abort: AbortHandle,
}

/// Everything behind the single serialization point. Lookups and inserts are
/// synchronous under the lock; disk and network I/O always happen off it.
struct Tables {
    thumbs: LruCache<String, Bytes>,
    fulls: LruCache<String, Bytes>,
    in_flight: HashMap<String, InFlight>,
    last_eviction_check: Option<Instant>,
    /// Bumped by clear_all so late completions of aborted fetches cannot
    /// repopulate the tables or remove a successor's in-flight entry.
    epoch: u64,
}

impl Tables {
    fn mem(&mut self, variant: ImageVariant) -> &mut LruCache<String, Bytes> {
        match variant {
            ImageVariant::Thumbnail => &mut self.thumbs,
            ImageVariant::Full => &mut self.fulls,
        }
    }
}

struct Inner {
    dir: PathBuf,
    cfg: CacheConfig,
    fetcher: Arc<dyn ImageFetcher>,
    tables: Mutex<Tables>,
}

/// Client-resident two-tier image cache: bounded in-memory LRU per variant,
/// LRU-evicted disk tier, deduplicated fetches. Every I/O failure degrades
/// to a miss; the public surface never raises.
pub struct ImageCache {
    inner: Arc<Inner>,
}

impl ImageCache {
    pub fn new(cfg: CacheConfig, fetcher: Arc<dyn ImageFetcher>) -> Result<Self> {
        std::fs::create_dir_all(&cfg.dir)
            .with_context(|| format!("creating cache directory {}", cfg.dir.display()))?;

        let thumb_slots = NonZeroUsize::new(cfg.thumbnail_slots).unwrap_or(NonZeroUsize::MIN);
        let full_slots = NonZeroUsize::new(cfg.full_slots).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            inner: Arc::new(Inner {
                dir: cfg.dir.clone(),
                cfg,
                fetcher,
                tables: Mutex::new(Tables {
                    thumbs: LruCache::new(thumb_slots),
                    fulls: LruCache::new(full_slots),
                    in_flight: HashMap::new(),
                    last_eviction_check: None,
                    epoch: 0,
                }),
            }),
        })
    }

    /// Resolve in order: memory, disk, thumbnail-from-full-on-disk, then a
    /// deduplicated fetch that populates both variants in both tiers.
    /// Returns `None` on any failure; a miss is never an error.
    pub async fn load(&self, photo: &Photo, variant: ImageVariant) -> Option<Bytes> {
        let key = photo.id.clone();

        // 1. Memory hit
        {
            let mut tables = self.inner.tables.lock().await;
            if let Some(hit) = tables.mem(variant).get(&key) {
                return Some(hit.clone());
            }
        }

        // 2. Disk hit
        let path = self.inner.disk_path(&key, variant);
        if let Ok(data) = tokio::fs::read(&path).await {
            let bytes = Bytes::from(data);
            {
                let mut tables = self.inner.tables.lock().await;
                tables.mem(variant).put(key.clone(), bytes.clone());
            }
            touch(path).await; // keep the LRU ranking honest
            return Some(bytes);
        }

        // 3. Thumbnail derivable from a full-size already on disk
        if variant == ImageVariant::Thumbnail {
            let full_path = self.inner.disk_path(&key, ImageVariant::Full);
            if let Ok(data) = tokio::fs::read(&full_path).await {
                let full = Bytes::from(data);
                if let Some(thumb) = self.inner.derive_thumbnail(&full).await {
                    let _ = write_atomic(&path, &thumb).await;
                    {
                        let mut tables = self.inner.tables.lock().await;
                        tables.thumbs.put(key.clone(), thumb.clone());
                        // Promote the full-size while we have it decoded-adjacent.
                        tables.fulls.put(key.clone(), full);
                    }
                    touch(full_path).await;
                    return Some(thumb);
                }
            }
        }

        // 4. Fetch (deduplicated per photo id)
        self.fetch_and_cache(photo, variant).await
    }

    /// Remove both variants from memory and disk for one photo. Safe when
    /// nothing is cached.
    pub async fn evict(&self, photo_id: &str) {
        {
            let mut tables = self.inner.tables.lock().await;
            tables.thumbs.pop(photo_id);
            tables.fulls.pop(photo_id);
        }
        for variant in [ImageVariant::Thumbnail, ImageVariant::Full] {
            let _ = tokio::fs::remove_file(self.inner.disk_path(photo_id, variant)).await;
        }
    }

    /// Drop every cached entry whose photo id is not in the valid set. This
    /// is how the cache stays consistent with lifecycle deletions: the
    /// coordinator hands over the authoritative id set after each pass.
    pub async fn evict_expired(&self, valid_ids: &HashSet<String>) {
        {
            let mut tables = self.inner.tables.lock().await;
            let stale: Vec<String> = tables
                .thumbs
                .iter()
                .chain(tables.fulls.iter())
                .map(|(k, _)| k.clone())
                .filter(|k| !valid_ids.contains(k))
                .collect();
            for key in stale {
                tables.thumbs.pop(&key);
                tables.fulls.pop(&key);
            }
        }

        let Ok(mut entries) = tokio::fs::read_dir(&self.inner.dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = photo_id_from_filename(name) {
                if !valid_ids.contains(id) {
                    let _ = tokio::fs::remove_file(entry.path()).await;
                }
            }
        }
    }

    /// Drop all memory entries, cancel in-flight fetches (best effort) and
    /// delete every on-disk entry.
    pub async fn clear_all(&self) {
        {
            let mut tables = self.inner.tables.lock().await;
            tables.epoch += 1;
            tables.thumbs.clear();
            tables.fulls.clear();
            for (_, in_flight) in tables.in_flight.drain() {
                in_flight.abort.abort();
            }
        }

        let Ok(mut entries) = tokio::fs::read_dir(&self.inner.dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let _ = tokio::fs::remove_file(entry.path()).await;
        }
    }

    /// Throttled disk-budget check; see [`CacheConfig::eviction_check_secs`].
    pub async fn evict_disk_if_needed(&self) {
        self.inner.evict_disk_if_needed().await;
    }

    async fn fetch_and_cache(&self, photo: &Photo, variant: ImageVariant) -> Option<Bytes> {
        let rx = {
            let mut tables = self.inner.tables.lock().await;
            if let Some(existing) = tables.in_flight.get(&photo.id) {
                existing.rx.clone()
            } else {
                let (tx, rx) = watch::channel::<FetchSlot>(None);
                let inner = self.inner.clone();
                let task_photo = photo.clone();
                let epoch = tables.epoch;

                let handle = tokio::spawn(async move {
                    let outcome = inner.run_fetch(&task_photo, epoch).await;

                    // Always clear the in-flight marker before publishing,
                    // success or failure, unless a clear_all superseded us.
                    {
                        let mut tables = inner.tables.lock().await;
                        if tables.epoch == epoch {
                            tables.in_flight.remove(&task_photo.id);
                        }
                    }
                    let _ = tx.send(Some(outcome));

                    inner.evict_disk_if_needed().await;
                });

                tables.in_flight.insert(
                    photo.id.clone(),
                    InFlight {
                        rx: rx.clone(),
                        abort: handle.abort_handle(),
                    },
                );
                rx
            }
        };

        let mut rx = rx;
        // A dropped sender means the fetch was cancelled; that is a miss.
        let full = match rx.wait_for(|slot| slot.is_some()).await {
            Ok(slot) => slot.clone().flatten(),
            Err(_) => None,
        };

        match (variant, full) {
            (ImageVariant::Full, full) => full,
            (ImageVariant::Thumbnail, Some(full)) => {
                self.thumbnail_from_full(&photo.id, full).await
            }
            (ImageVariant::Thumbnail, None) => None,
        }
    }

    /// Serve the thumbnail for a photo whose full-size bytes we already
    /// have, deriving and caching it in memory if a concurrent fetch has
    /// not done so already.
    async fn thumbnail_from_full(&self, photo_id: &str, full: Bytes) -> Option<Bytes> {
        {
            let mut tables = self.inner.tables.lock().await;
            if let Some(thumb) = tables.thumbs.get(photo_id) {
                return Some(thumb.clone());
            }
        }
        let thumb = self.inner.derive_thumbnail(&full).await?;
        let mut tables = self.inner.tables.lock().await;
        tables.thumbs.put(photo_id.to_string(), thumb.clone());
        Some(thumb)
    }
}

impl Inner {
    fn disk_path(&self, photo_id: &str, variant: ImageVariant) -> PathBuf {
        self.dir.join(format!("{photo_id}{}.jpg", variant.suffix()))
    }

    async fn derive_thumbnail(&self, full: &Bytes) -> Option<Bytes> {
        let data = full.clone();
        let max_dim = self.cfg.thumbnail_max_dim;
        let quality = self.cfg.thumbnail_quality;
        let result = tokio::task::spawn_blocking(move || {
            imaging::derive_thumbnail(&data, max_dim, quality)
        })
        .await;
        match result {
            Ok(Ok(thumb)) => Some(Bytes::from(thumb)),
            Ok(Err(e)) => {
                tracing::warn!("Thumbnail derivation failed: {}", e);
                None
            }
            Err(e) => {
                tracing::warn!("Thumbnail derivation task failed: {}", e);
                None
            }
        }
    }

    /// The single fetch for a photo id: pull originals, produce both
    /// variants, write disk, then memory. Any failure on the way is a miss;
    /// disk-write failures only cost us the disk tier.
    async fn run_fetch(&self, photo: &Photo, epoch: u64) -> Option<Bytes> {
        let data = match self.fetcher.fetch(photo).await {
            Ok(Some(data)) => data,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Fetch failed for photo {}: {}", photo.id, e);
                return None;
            }
        };

        let max_dim = self.cfg.thumbnail_max_dim;
        let thumb_quality = self.cfg.thumbnail_quality;
        let full_quality = self.cfg.full_quality;
        let processed = tokio::task::spawn_blocking(move || {
            imaging::process_original(&data, max_dim, thumb_quality, full_quality)
        })
        .await;

        let (full, thumb) = match processed {
            Ok(Ok(variants)) => variants,
            Ok(Err(e)) => {
                tracing::warn!("Could not decode photo {}: {}", photo.id, e);
                return None;
            }
            Err(e) => {
                tracing::warn!("Image processing task failed for {}: {}", photo.id, e);
                return None;
            }
        };
        let full = Bytes::from(full);
        let thumb = Bytes::from(thumb);

        let _ = write_atomic(&self.disk_path(&photo.id, ImageVariant::Full), &full).await;
        let _ = write_atomic(&self.disk_path(&photo.id, ImageVariant::Thumbnail), &thumb).await;

        {
            let mut tables = self.tables.lock().await;
            if tables.epoch == epoch {
                tables.fulls.put(photo.id.clone(), full.clone());
                tables.thumbs.put(photo.id.clone(), thumb);
            }
        }

        Some(full)
    }

    async fn evict_disk_if_needed(&self) {
        {
            let mut tables = self.tables.lock().await;
            let now = Instant::now();
            if let Some(last) = tables.last_eviction_check {
                if now.duration_since(last) < Duration::from_secs(self.cfg.eviction_check_secs) {
                    return;
                }
            }
            tables.last_eviction_check = Some(now);
        }

        let dir = self.dir.clone();
        let cap = self.cfg.max_disk_bytes;
        let target = (cap as f64 * self.cfg.eviction_target) as u64;

        let result = tokio::task::spawn_blocking(move || {
            let entries = std::fs::read_dir(&dir)?;

            let mut total: u64 = 0;
            let mut files: Vec<(PathBuf, SystemTime, u64)> = Vec::new();
            for entry in entries.flatten() {
                let Ok(meta) = entry.metadata() else { continue };
                if !meta.is_file() {
                    continue;
                }
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                total += meta.len();
                files.push((entry.path(), modified, meta.len()));
            }

            if total <= cap {
                return Ok::<u64, std::io::Error>(0);
            }

            // Oldest first
            files.sort_by_key(|(_, modified, _)| *modified);

            let mut evicted = 0u64;
            for (path, _, size) in files {
                if total <= target {
                    break;
                }
                if std::fs::remove_file(&path).is_ok() {
                    total -= size;
                    evicted += size;
                }
            }
            Ok(evicted)
        })
        .await;

        match result {
            Ok(Ok(evicted)) if evicted > 0 => {
                tracing::info!("Disk cache eviction freed {} bytes", evicted);
            }
            Ok(Err(e)) => tracing::warn!("Disk cache eviction failed: {}", e),
            _ => {}
        }
    }
}

/// Write-then-rename so a concurrent reader only ever sees a complete file;
/// the disk-hit path hands bytes back without decoding, so an in-place write
/// would let it serve a torn file.
async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Bump a cache file's modification time so LRU ranking follows access
/// recency, not just write order.
async fn touch(path: PathBuf) {
    let _ = tokio::task::spawn_blocking(move || {
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .and_then(|f| f.set_modified(SystemTime::now()))
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_parsing_recovers_photo_ids() {
        assert_eq!(photo_id_from_filename("abc-123_thumb.jpg"), Some("abc-123"));
        assert_eq!(photo_id_from_filename("abc-123_full.jpg"), Some("abc-123"));
        assert_eq!(photo_id_from_filename("abc-123_full"), Some("abc-123"));
        assert_eq!(photo_id_from_filename("junk.jpg"), None);
        assert_eq!(photo_id_from_filename("store.json"), None);
    }
}
