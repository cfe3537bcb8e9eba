use std::env;
use std::path::PathBuf;

use crate::services::imaging;
use crate::store::record::MAX_BATCH_OPS;

/// Configuration for the two-tier image cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory owned exclusively by the cache. No other component may
    /// touch it.
    pub dir: PathBuf,

    /// Disk byte budget (default: 200 MB).
    pub max_disk_bytes: u64,

    /// When over budget, evict down to this fraction of the cap (default: 0.75).
    pub eviction_target: f64,

    /// Minimum seconds between disk eviction checks (default: 30).
    pub eviction_check_secs: u64,

    /// Memory slots for thumbnails (default: 100).
    pub thumbnail_slots: usize,

    /// Memory slots for full-size images (default: 20).
    pub full_slots: usize,

    /// Thumbnail bound on the longest side, in pixels (default: 300).
    pub thumbnail_max_dim: u32,

    /// JPEG quality for the thumbnail variant (default: 70).
    pub thumbnail_quality: u8,

    /// JPEG quality for the full-size variant on disk (default: 95).
    pub full_quality: u8,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("image-cache"),
            max_disk_bytes: 200 * 1024 * 1024, // 200 MB
            eviction_target: 0.75,
            eviction_check_secs: 30,
            thumbnail_slots: 100,
            full_slots: 20,
            thumbnail_max_dim: imaging::THUMB_MAX_DIM,
            thumbnail_quality: imaging::THUMB_JPEG_QUALITY,
            full_quality: imaging::FULL_JPEG_QUALITY,
        }
    }
}

impl CacheConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            dir: env::var("PHOTOKEEP_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.dir),

            max_disk_bytes: env::var("PHOTOKEEP_CACHE_MAX_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_disk_bytes),

            eviction_target: env::var("PHOTOKEEP_CACHE_EVICTION_TARGET")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|t| (0.0..1.0).contains(t))
                .unwrap_or(default.eviction_target),

            eviction_check_secs: env::var("PHOTOKEEP_CACHE_EVICTION_CHECK_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.eviction_check_secs),

            thumbnail_slots: env::var("PHOTOKEEP_CACHE_THUMBNAIL_SLOTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.thumbnail_slots),

            full_slots: env::var("PHOTOKEEP_CACHE_FULL_SLOTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.full_slots),

            thumbnail_max_dim: default.thumbnail_max_dim,
            thumbnail_quality: default.thumbnail_quality,
            full_quality: default.full_quality,
        }
    }
}

/// Configuration for the scheduled lifecycle jobs.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Ops per RecordStore batch; clamped to the store's 500-op ceiling.
    pub batch_size: usize,

    /// UTC hour at which the daily soft-delete job fires (default: 3).
    pub soft_delete_hour_utc: u32,

    /// UTC hour at which the daily purge job fires; must come after
    /// soft-delete (default: 4).
    pub purge_hour_utc: u32,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            batch_size: MAX_BATCH_OPS,
            soft_delete_hour_utc: 3,
            purge_hour_utc: 4,
        }
    }
}

impl JobConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            batch_size: env::var("PHOTOKEEP_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.batch_size)
                .clamp(1, MAX_BATCH_OPS),

            soft_delete_hour_utc: env::var("PHOTOKEEP_SOFT_DELETE_HOUR_UTC")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|h| *h < 24)
                .unwrap_or(default.soft_delete_hour_utc),

            purge_hour_utc: env::var("PHOTOKEEP_PURGE_HOUR_UTC")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|h| *h < 24)
                .unwrap_or(default.purge_hour_utc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cache_config() {
        let config = CacheConfig::default();
        assert_eq!(config.max_disk_bytes, 200 * 1024 * 1024);
        assert_eq!(config.eviction_target, 0.75);
        assert_eq!(config.eviction_check_secs, 30);
        assert_eq!(config.thumbnail_slots, 100);
        assert_eq!(config.full_slots, 20);
        assert_eq!(config.thumbnail_max_dim, 300);
    }

    #[test]
    fn test_default_job_config() {
        let config = JobConfig::default();
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.soft_delete_hour_utc, 3);
        assert_eq!(config.purge_hour_utc, 4);
        assert!(config.purge_hour_utc > config.soft_delete_hour_utc);
    }
}
