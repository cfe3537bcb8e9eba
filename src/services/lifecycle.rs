use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use crate::models::photo::RECOVERY_DAYS;
use crate::models::{Family, Photo};
use crate::store::family_store::{FAMILIES, PHOTOS};
use crate::store::record::{Condition, WriteOp};
use crate::store::{BlobStore, FamilyStore, RecordStore};

/// Outcome of one soft-delete run. Per-family failures are counted, never
/// raised; only an unreachable store aborts the run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SoftDeleteReport {
    pub families_scanned: usize,
    pub photos_trashed: usize,
    pub errors: usize,
}

/// Outcome of one purge run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PurgeReport {
    pub photos_deleted: usize,
    pub errors: usize,
}

/// Owns the photo state machine:
///
/// ```text
/// active --(effectiveExpiresAt passed, tier non-exempt)--> trashed
/// trashed --(restore, purgeAt not passed)--> active
/// trashed --(purgeAt passed)--> [deleted]
/// ```
///
/// The pure predicates live on [`Photo`]; this service applies them at scale
/// against the record and blob stores.
pub struct PhotoLifecycleEngine {
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    batch_size: usize,
}

impl PhotoLifecycleEngine {
    pub fn new(
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        batch_size: usize,
    ) -> Self {
        Self {
            records,
            blobs,
            batch_size: batch_size.clamp(1, crate::store::record::MAX_BATCH_OPS),
        }
    }

    /// Trash every expired active photo in every non-exempt family.
    /// Idempotent: photos already trashed are not considered, so a second
    /// run at the same instant trashes nothing extra.
    pub async fn soft_delete_expired_photos(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SoftDeleteReport> {
        let families = self
            .records
            .query(FAMILIES, &[])
            .await
            .context("querying families")?;

        let mut report = SoftDeleteReport::default();

        for record in families {
            report.families_scanned += 1;

            let family: Family = match record.parse() {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!("Skipping malformed family {}: {}", record.id, e);
                    report.errors += 1;
                    continue;
                }
            };

            if family.subscription_tier.is_exempt() {
                continue;
            }

            match self.soft_delete_family(&family.id, now).await {
                Ok((trashed, malformed)) => {
                    report.photos_trashed += trashed;
                    report.errors += malformed;
                }
                Err(e) => {
                    tracing::error!("Soft-delete failed for family {}: {}", family.id, e);
                    report.errors += 1;
                }
            }
        }

        tracing::info!(
            "Soft-delete pass: {} families scanned, {} photos trashed, {} errors",
            report.families_scanned,
            report.photos_trashed,
            report.errors
        );
        Ok(report)
    }

    /// Returns (photos trashed, malformed records skipped) so the run report
    /// counts parse failures the same way the purge pass does.
    async fn soft_delete_family(
        &self,
        family_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(usize, usize)> {
        let records = self
            .records
            .query(
                PHOTOS,
                &[
                    Condition::eq("familyId", family_id),
                    Condition::eq("status", "active"),
                ],
            )
            .await?;

        let purge_at = now + Duration::days(RECOVERY_DAYS);
        let mut updates = Vec::new();
        let mut malformed = 0;
        for record in records {
            let photo: Photo = match record.parse() {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!("Skipping malformed photo {}: {}", record.id, e);
                    malformed += 1;
                    continue;
                }
            };
            if photo.effective_expires_at() <= now {
                updates.push(WriteOp::Update {
                    collection: PHOTOS.to_string(),
                    id: photo.id,
                    fields: json!({
                        "status": "trashed",
                        "trashedAt": now,
                        "purgeAt": purge_at,
                    }),
                });
            }
        }

        let trashed = updates.len();
        for chunk in updates.chunks(self.batch_size) {
            self.records.batch_write(chunk.to_vec()).await?;
        }
        if trashed > 0 {
            tracing::info!("Trashed {} expired photos in family {}", trashed, family_id);
        }
        Ok((trashed, malformed))
    }

    /// Permanently delete every trashed photo whose recovery window has
    /// closed, regardless of the family's current tier. Blob-not-found is
    /// success; any other blob failure is counted but never blocks the
    /// record deletion, keeping the job maximally forward-progressing.
    pub async fn purge_expired_trash(&self, now: DateTime<Utc>) -> Result<PurgeReport> {
        let records = self
            .records
            .query(PHOTOS, &[Condition::eq("status", "trashed")])
            .await
            .context("querying trashed photos")?;

        let mut report = PurgeReport::default();

        for record in records {
            let photo: Photo = match record.parse() {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!("Skipping malformed photo {}: {}", record.id, e);
                    report.errors += 1;
                    continue;
                }
            };

            let Some(purge_at) = photo.purge_at else {
                continue;
            };
            if purge_at > now {
                continue;
            }

            if let Err(e) = self.blobs.delete(&photo.blob_path).await {
                // Orphaned bytes are an accepted degraded state, reconciled
                // by a later sweep; the record still goes away.
                tracing::error!("Failed to delete blob {}: {}", photo.blob_path, e);
                report.errors += 1;
            }

            match self.records.delete(PHOTOS, &photo.id).await {
                Ok(()) => report.photos_deleted += 1,
                Err(e) => {
                    tracing::error!("Failed to delete photo record {}: {}", photo.id, e);
                    report.errors += 1;
                }
            }
        }

        tracing::info!(
            "Purge pass: {} photos deleted, {} errors",
            report.photos_deleted,
            report.errors
        );
        Ok(report)
    }

    /// Bring every still-recoverable trashed photo in the family back to
    /// active, clearing the trash markers. Photos past their purge deadline
    /// are silently left for the purge job; that race is expected and the
    /// result converges either way. Returns the number restored.
    pub async fn restore_trashed_photos(
        &self,
        family_id: &str,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let records = self
            .records
            .query(
                PHOTOS,
                &[
                    Condition::eq("familyId", family_id),
                    Condition::eq("status", "trashed"),
                ],
            )
            .await
            .context("querying trashed photos")?;

        let mut updates = Vec::new();
        for record in records {
            let photo: Photo = match record.parse() {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!("Skipping malformed photo {}: {}", record.id, e);
                    continue;
                }
            };
            if photo.is_recoverable(now) {
                updates.push(WriteOp::Update {
                    collection: PHOTOS.to_string(),
                    id: photo.id,
                    fields: json!({
                        "status": "active",
                        "trashedAt": null,
                        "purgeAt": null,
                    }),
                });
            }
        }

        let restored = updates.len();
        for chunk in updates.chunks(self.batch_size) {
            self.records.batch_write(chunk.to_vec()).await?;
        }
        tracing::info!("Restored {} photos in family {}", restored, family_id);
        Ok(restored)
    }
}

/// Local-mode cleanup: no server scheduler, no trash/recovery window. Every
/// expired photo is hard-deleted on the spot; per-photo failures are logged
/// and skipped. Returns the number deleted.
pub async fn delete_expired_local_photos(
    store: &dyn FamilyStore,
    family_id: &str,
    now: DateTime<Utc>,
) -> Result<usize> {
    let photos = store
        .all_photos(family_id)
        .await
        .context("listing local photos")?;

    let mut deleted = 0;
    for photo in photos {
        if !photo.is_expired(now) {
            continue;
        }
        match store.delete_photo(&photo).await {
            Ok(()) => deleted += 1,
            Err(e) => {
                tracing::error!("Failed to delete expired photo {}: {}", photo.id, e);
            }
        }
    }

    if deleted > 0 {
        tracing::info!("Deleted {} expired local photos", deleted);
    }
    Ok(deleted)
}
