use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Timelike, Utc};
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

use crate::config::JobConfig;
use crate::services::cache::ImageCache;
use crate::services::lifecycle::{PhotoLifecycleEngine, delete_expired_local_photos};
use crate::store::family_store::LOCAL_FAMILY_ID;
use crate::store::FamilyStore;

/// Drives the daily lifecycle jobs: soft-delete at one UTC hour, purge at a
/// later one. Each job fires at most once per calendar day and failures only
/// cost that day's run.
pub struct CleanupCoordinator {
    engine: Arc<PhotoLifecycleEngine>,
    cfg: JobConfig,
    shutdown: watch::Receiver<bool>,
}

impl CleanupCoordinator {
    pub fn new(
        engine: Arc<PhotoLifecycleEngine>,
        cfg: JobConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            cfg,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            "Cleanup coordinator started (soft-delete {:02}:00 UTC, purge {:02}:00 UTC)",
            self.cfg.soft_delete_hour_utc,
            self.cfg.purge_hour_utc
        );

        let mut last_soft_delete: Option<NaiveDate> = None;
        let mut last_purge: Option<NaiveDate> = None;

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("Cleanup coordinator shutting down");
                    break;
                }
                _ = sleep(Duration::from_secs(60)) => {
                    let now = Utc::now();

                    if due(now, self.cfg.soft_delete_hour_utc, last_soft_delete) {
                        last_soft_delete = Some(now.date_naive());
                        if let Err(e) = self.engine.soft_delete_expired_photos(now).await {
                            tracing::error!("Soft-delete job failed: {:#}", e);
                        }
                    }

                    if due(now, self.cfg.purge_hour_utc, last_purge) {
                        last_purge = Some(now.date_naive());
                        if let Err(e) = self.engine.purge_expired_trash(now).await {
                            tracing::error!("Purge job failed: {:#}", e);
                        }
                    }
                }
            }
        }
    }

    /// Run both passes back to back, soft-delete first so freshly trashed
    /// photos get their full recovery window before purge ever sees them.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<()> {
        self.engine.soft_delete_expired_photos(now).await?;
        self.engine.purge_expired_trash(now).await?;
        Ok(())
    }
}

fn due(now: DateTime<Utc>, hour_utc: u32, last_run: Option<NaiveDate>) -> bool {
    now.hour() == hour_utc && last_run != Some(now.date_naive())
}

/// Local-mode launch hook: hard-delete every expired photo, then drop any
/// cache entries whose photo no longer exists. There is no server scheduler
/// in local mode, so app startup is the only sweep point. Exempt accounts
/// skip the deletion but still get the cache sweep.
pub async fn run_local_startup_cleanup(
    store: Arc<dyn FamilyStore>,
    cache: &ImageCache,
    now: DateTime<Utc>,
) -> Result<usize> {
    let deleted = if store.is_exempt_tier(LOCAL_FAMILY_ID).await? {
        0
    } else {
        delete_expired_local_photos(store.as_ref(), LOCAL_FAMILY_ID, now).await?
    };

    let rx = store.subscribe();
    let valid_ids = rx.borrow().valid_photo_ids();
    cache.evict_expired(&valid_ids).await;

    Ok(deleted)
}
