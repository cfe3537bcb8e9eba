use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{Mutex, watch};
use uuid::Uuid;

use crate::models::{Family, Photo, PhotoRequest, PhotoStatus, RequestStatus, Role, SubscriptionTier};
use crate::services::imaging;

use super::record::Condition;
use super::{BlobStore, RecordStore, StoreError};

/// Hours a fresh pairing code stays valid.
const PAIRING_CODE_TTL_HOURS: i64 = 24;

pub const FAMILIES: &str = "families";
pub const REQUESTS: &str = "requests";
pub const PHOTOS: &str = "photos";
pub const CONNECTIONS: &str = "connections";
pub const REPORTS: &str = "reports";

/// One observed view of the record set: requests plus photos per request.
/// Consumers that need to stay consistent with the lifecycle engine (the
/// image cache above all) read the valid-id set off the latest snapshot.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub requests: Vec<PhotoRequest>,
    pub photos_by_request: HashMap<String, Vec<Photo>>,
}

impl StoreSnapshot {
    pub fn valid_photo_ids(&self) -> HashSet<String> {
        self.photos_by_request
            .values()
            .flatten()
            .map(|p| p.id.clone())
            .collect()
    }
}

/// The storage capability set behind which the local/demo and server-synced
/// backends are interchangeable. The lifecycle engine and the image cache
/// depend only on this trait, never on which backend is active.
#[async_trait]
pub trait FamilyStore: Send + Sync {
    async fn create_family(&self, user_id: &str) -> Result<Family, StoreError>;

    async fn join_family(
        &self,
        pairing_code: &str,
        user_id: &str,
        role: Role,
    ) -> Result<Family, StoreError>;

    /// A requester asks for photos: a new pending request.
    async fn create_request(&self, family_id: &str, user_id: &str)
    -> Result<PhotoRequest, StoreError>;

    /// A fulfiller sends photos unsolicited: the request is born fulfilled.
    async fn send_photos(
        &self,
        family_id: &str,
        user_id: &str,
        images: Vec<Bytes>,
    ) -> Result<PhotoRequest, StoreError>;

    /// Upload photos against a pending request, then mark it fulfilled.
    /// The pending -> fulfilled transition happens at most once.
    async fn fulfill_request(
        &self,
        family_id: &str,
        request_id: &str,
        user_id: &str,
        images: Vec<Bytes>,
    ) -> Result<(), StoreError>;

    async fn requests(&self, family_id: &str) -> Result<Vec<PhotoRequest>, StoreError>;

    async fn photos(&self, family_id: &str, request_id: &str) -> Result<Vec<Photo>, StoreError>;

    async fn all_photos(&self, family_id: &str) -> Result<Vec<Photo>, StoreError>;

    async fn load_image_data(&self, photo: &Photo) -> Result<Option<Bytes>, StoreError>;

    /// Hard delete: blob first, then the record.
    async fn delete_photo(&self, photo: &Photo) -> Result<(), StoreError>;

    /// Cascades to every child photo and its blob.
    async fn delete_request(&self, family_id: &str, request_id: &str) -> Result<(), StoreError>;

    /// Files a moderation report and blocks the photo. Moderation is
    /// orthogonal to the lifecycle state machine.
    async fn report_photo(&self, photo: &Photo, reported_by: &str) -> Result<(), StoreError>;

    async fn update_subscription_tier(
        &self,
        family_id: &str,
        tier: SubscriptionTier,
    ) -> Result<(), StoreError>;

    async fn is_exempt_tier(&self, family_id: &str) -> Result<bool, StoreError>;

    /// Observable stream of record-set snapshots; every mutation publishes a
    /// fresh one.
    fn subscribe(&self) -> watch::Receiver<StoreSnapshot>;
}

async fn normalize_upload(data: Bytes) -> Result<Bytes, StoreError> {
    let encoded = tokio::task::spawn_blocking(move || {
        imaging::reencode_jpeg(&data, imaging::UPLOAD_JPEG_QUALITY)
    })
    .await
    .map_err(|e| StoreError::Backend(e.to_string()))?
    .map_err(|e| StoreError::InvalidImage(e.to_string()))?;
    Ok(Bytes::from(encoded))
}

// ---------------------------------------------------------------------------
// Server-synced backend
// ---------------------------------------------------------------------------

/// Backend over the generic RecordStore/BlobStore contracts; collections are
/// flat with familyId/requestId fields, blob paths follow
/// `families/{fid}/requests/{rid}/{photoId}.jpg`.
pub struct RemoteFamilyStore {
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    snapshot_tx: watch::Sender<StoreSnapshot>,
}

impl RemoteFamilyStore {
    pub fn new(records: Arc<dyn RecordStore>, blobs: Arc<dyn BlobStore>) -> Self {
        let (snapshot_tx, _) = watch::channel(StoreSnapshot::default());
        Self {
            records,
            blobs,
            snapshot_tx,
        }
    }

    fn blob_path(family_id: &str, request_id: &str, photo_id: &str) -> String {
        format!("families/{family_id}/requests/{request_id}/{photo_id}.jpg")
    }

    async fn upload_photos(
        &self,
        family_id: &str,
        request_id: &str,
        user_id: &str,
        images: Vec<Bytes>,
    ) -> Result<(), StoreError> {
        for data in images {
            let data = normalize_upload(data).await?;
            let photo_id = Uuid::new_v4().to_string();
            let blob_path = Self::blob_path(family_id, request_id, &photo_id);

            self.blobs.put(&blob_path, data, "image/jpeg").await?;

            let photo = Photo {
                id: photo_id.clone(),
                request_id: request_id.to_string(),
                family_id: family_id.to_string(),
                created_at: Utc::now(),
                created_by_user_id: user_id.to_string(),
                blob_path,
                is_blocked: false,
                status: PhotoStatus::Active,
                expires_at: None,
                trashed_at: None,
                purge_at: None,
            };
            self.records
                .create(PHOTOS, &photo_id, serde_json::to_value(&photo)?)
                .await?;
        }
        Ok(())
    }

    /// Re-query the family's record set and push it to subscribers. Snapshot
    /// publication is best-effort; a failed query never fails the mutation
    /// that triggered it.
    async fn publish_snapshot(&self, family_id: &str) {
        let requests = match self.requests(family_id).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Snapshot refresh failed for family {}: {}", family_id, e);
                return;
            }
        };
        let photos = match self.all_photos(family_id).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("Snapshot refresh failed for family {}: {}", family_id, e);
                return;
            }
        };

        let mut photos_by_request: HashMap<String, Vec<Photo>> = HashMap::new();
        for photo in photos {
            photos_by_request
                .entry(photo.request_id.clone())
                .or_default()
                .push(photo);
        }

        let _ = self.snapshot_tx.send(StoreSnapshot {
            requests,
            photos_by_request,
        });
    }
}

#[async_trait]
impl FamilyStore for RemoteFamilyStore {
    async fn create_family(&self, user_id: &str) -> Result<Family, StoreError> {
        let now = Utc::now();
        let family = Family {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            created_by_user_id: user_id.to_string(),
            pairing_code: Uuid::new_v4().to_string(),
            pairing_expires_at: Some(now + Duration::hours(PAIRING_CODE_TTL_HOURS)),
            subscription_tier: SubscriptionTier::Free,
        };
        self.records
            .create(FAMILIES, &family.id, serde_json::to_value(&family)?)
            .await?;

        self.records
            .create(
                CONNECTIONS,
                &format!("{}:{}", family.id, user_id),
                json!({
                    "familyId": family.id,
                    "userId": user_id,
                    "role": Role::Fulfiller,
                    "createdAt": now,
                }),
            )
            .await?;

        Ok(family)
    }

    async fn join_family(
        &self,
        pairing_code: &str,
        user_id: &str,
        role: Role,
    ) -> Result<Family, StoreError> {
        let hits = self
            .records
            .query(FAMILIES, &[Condition::eq("pairingCode", pairing_code)])
            .await?;
        let record = hits.first().ok_or(StoreError::InvalidPairingCode)?;
        let family: Family = record.parse()?;

        if let Some(expires_at) = family.pairing_expires_at {
            if expires_at < Utc::now() {
                return Err(StoreError::PairingCodeExpired);
            }
        }

        self.records
            .create(
                CONNECTIONS,
                &format!("{}:{}", family.id, user_id),
                json!({
                    "familyId": family.id,
                    "userId": user_id,
                    "role": role,
                    "createdAt": Utc::now(),
                }),
            )
            .await?;

        Ok(family)
    }

    async fn create_request(
        &self,
        family_id: &str,
        user_id: &str,
    ) -> Result<PhotoRequest, StoreError> {
        let request = PhotoRequest {
            id: Uuid::new_v4().to_string(),
            family_id: family_id.to_string(),
            created_at: Utc::now(),
            created_by_user_id: user_id.to_string(),
            from_role: Role::Requester,
            status: RequestStatus::Pending,
            fulfilled_at: None,
            fulfilled_by_user_id: None,
        };
        self.records
            .create(REQUESTS, &request.id, serde_json::to_value(&request)?)
            .await?;
        self.publish_snapshot(family_id).await;
        Ok(request)
    }

    async fn send_photos(
        &self,
        family_id: &str,
        user_id: &str,
        images: Vec<Bytes>,
    ) -> Result<PhotoRequest, StoreError> {
        let now = Utc::now();
        let request = PhotoRequest {
            id: Uuid::new_v4().to_string(),
            family_id: family_id.to_string(),
            created_at: now,
            created_by_user_id: user_id.to_string(),
            from_role: Role::Fulfiller,
            status: RequestStatus::Fulfilled,
            fulfilled_at: Some(now),
            fulfilled_by_user_id: Some(user_id.to_string()),
        };
        self.records
            .create(REQUESTS, &request.id, serde_json::to_value(&request)?)
            .await?;
        self.upload_photos(family_id, &request.id, user_id, images)
            .await?;
        self.publish_snapshot(family_id).await;
        Ok(request)
    }

    async fn fulfill_request(
        &self,
        family_id: &str,
        request_id: &str,
        user_id: &str,
        images: Vec<Bytes>,
    ) -> Result<(), StoreError> {
        let fields = self
            .records
            .read(REQUESTS, request_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("{REQUESTS}/{request_id}")))?;
        let request: PhotoRequest = serde_json::from_value(fields)?;

        self.upload_photos(family_id, request_id, user_id, images)
            .await?;

        if !request.is_fulfilled() {
            self.records
                .update(
                    REQUESTS,
                    request_id,
                    json!({
                        "status": RequestStatus::Fulfilled,
                        "fulfilledAt": Utc::now(),
                        "fulfilledByUserId": user_id,
                    }),
                )
                .await?;
        }
        self.publish_snapshot(family_id).await;
        Ok(())
    }

    async fn requests(&self, family_id: &str) -> Result<Vec<PhotoRequest>, StoreError> {
        let records = self
            .records
            .query(REQUESTS, &[Condition::eq("familyId", family_id)])
            .await?;
        let mut requests = Vec::with_capacity(records.len());
        for record in records {
            match record.parse::<PhotoRequest>() {
                Ok(request) => requests.push(request),
                Err(e) => tracing::warn!("Skipping malformed request {}: {}", record.id, e),
            }
        }
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests)
    }

    async fn photos(&self, family_id: &str, request_id: &str) -> Result<Vec<Photo>, StoreError> {
        let records = self
            .records
            .query(
                PHOTOS,
                &[
                    Condition::eq("familyId", family_id),
                    Condition::eq("requestId", request_id),
                ],
            )
            .await?;
        let mut photos = Vec::with_capacity(records.len());
        for record in records {
            match record.parse::<Photo>() {
                Ok(photo) => photos.push(photo),
                Err(e) => tracing::warn!("Skipping malformed photo {}: {}", record.id, e),
            }
        }
        Ok(photos)
    }

    async fn all_photos(&self, family_id: &str) -> Result<Vec<Photo>, StoreError> {
        let records = self
            .records
            .query(PHOTOS, &[Condition::eq("familyId", family_id)])
            .await?;
        let mut photos = Vec::with_capacity(records.len());
        for record in records {
            match record.parse::<Photo>() {
                Ok(photo) => photos.push(photo),
                Err(e) => tracing::warn!("Skipping malformed photo {}: {}", record.id, e),
            }
        }
        Ok(photos)
    }

    async fn load_image_data(&self, photo: &Photo) -> Result<Option<Bytes>, StoreError> {
        self.blobs.get(&photo.blob_path).await
    }

    async fn delete_photo(&self, photo: &Photo) -> Result<(), StoreError> {
        self.blobs.delete(&photo.blob_path).await?;
        self.records.delete(PHOTOS, &photo.id).await?;
        self.publish_snapshot(&photo.family_id).await;
        Ok(())
    }

    async fn delete_request(&self, family_id: &str, request_id: &str) -> Result<(), StoreError> {
        let photos = self.photos(family_id, request_id).await?;
        for photo in photos {
            if let Err(e) = self.blobs.delete(&photo.blob_path).await {
                tracing::error!("Failed to delete blob {}: {}", photo.blob_path, e);
            }
            self.records.delete(PHOTOS, &photo.id).await?;
        }
        self.records.delete(REQUESTS, request_id).await?;
        self.publish_snapshot(family_id).await;
        Ok(())
    }

    async fn report_photo(&self, photo: &Photo, reported_by: &str) -> Result<(), StoreError> {
        self.records
            .create(
                REPORTS,
                &Uuid::new_v4().to_string(),
                json!({
                    "photoId": photo.id,
                    "requestId": photo.request_id,
                    "familyId": photo.family_id,
                    "blobPath": photo.blob_path,
                    "reportedByUserId": reported_by,
                    "createdAt": Utc::now(),
                }),
            )
            .await?;

        // Block immediately so the next snapshot hides it on all clients.
        self.records
            .update(PHOTOS, &photo.id, json!({"isBlocked": true}))
            .await?;
        self.publish_snapshot(&photo.family_id).await;
        Ok(())
    }

    async fn update_subscription_tier(
        &self,
        family_id: &str,
        tier: SubscriptionTier,
    ) -> Result<(), StoreError> {
        self.records
            .update(FAMILIES, family_id, json!({"subscriptionTier": tier}))
            .await
    }

    async fn is_exempt_tier(&self, family_id: &str) -> Result<bool, StoreError> {
        let fields = self
            .records
            .read(FAMILIES, family_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("{FAMILIES}/{family_id}")))?;
        let family: Family = serde_json::from_value(fields)?;
        Ok(family.subscription_tier.is_exempt())
    }

    fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.snapshot_tx.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Local/offline backend
// ---------------------------------------------------------------------------

pub const LOCAL_FAMILY_ID: &str = "local-demo";
const LOCAL_PAIRING_CODE: &str = "1234";
const LOCAL_STATE_FILE: &str = "store.json";

#[derive(Serialize, Deserialize)]
struct PersistedState {
    family: Family,
    requests: Vec<PhotoRequest>,
    photos_by_request: HashMap<String, Vec<Photo>>,
}

struct LocalState {
    family: Family,
    requests: Vec<PhotoRequest>,
    photos_by_request: HashMap<String, Vec<Photo>>,
}

impl LocalState {
    fn fresh() -> Self {
        Self {
            family: Family {
                id: LOCAL_FAMILY_ID.to_string(),
                created_at: Utc::now(),
                created_by_user_id: "local-fulfiller".to_string(),
                pairing_code: LOCAL_PAIRING_CODE.to_string(),
                pairing_expires_at: None,
                subscription_tier: SubscriptionTier::Free,
            },
            requests: Vec::new(),
            photos_by_request: HashMap::new(),
        }
    }

    fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            requests: self.requests.clone(),
            photos_by_request: self.photos_by_request.clone(),
        }
    }
}

/// Fully local/offline deployment: state in memory, photo bytes under a data
/// directory, JSON snapshot persistence across restarts. There is no server
/// scheduler in this mode; cleanup happens opportunistically at startup.
pub struct LocalFamilyStore {
    data_dir: PathBuf,
    photos_dir: PathBuf,
    state: Mutex<LocalState>,
    snapshot_tx: watch::Sender<StoreSnapshot>,
}

impl LocalFamilyStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        let photos_dir = data_dir.join("photos");
        std::fs::create_dir_all(&photos_dir)?;

        let state = match std::fs::read(data_dir.join(LOCAL_STATE_FILE)) {
            Ok(data) => {
                let persisted: PersistedState = serde_json::from_slice(&data)?;
                LocalState {
                    family: persisted.family,
                    requests: persisted.requests,
                    photos_by_request: persisted.photos_by_request,
                }
            }
            Err(_) => LocalState::fresh(),
        };

        let (snapshot_tx, _) = watch::channel(state.snapshot());
        Ok(Self {
            data_dir,
            photos_dir,
            state: Mutex::new(state),
            snapshot_tx,
        })
    }

    async fn save_and_publish(&self, state: &LocalState) -> Result<(), StoreError> {
        let persisted = PersistedState {
            family: state.family.clone(),
            requests: state.requests.clone(),
            photos_by_request: state.photos_by_request.clone(),
        };
        let data = serde_json::to_vec_pretty(&persisted)?;
        tokio::fs::write(self.data_dir.join(LOCAL_STATE_FILE), data).await?;
        let _ = self.snapshot_tx.send(state.snapshot());
        Ok(())
    }

    async fn write_photos(
        &self,
        state: &mut LocalState,
        request_id: &str,
        user_id: &str,
        images: Vec<Bytes>,
    ) -> Result<(), StoreError> {
        let family_id = state.family.id.clone();
        for data in images {
            let data = normalize_upload(data).await?;
            let photo_id = Uuid::new_v4().to_string();
            let path = self.photos_dir.join(format!("{photo_id}.jpg"));
            tokio::fs::write(&path, &data).await?;

            state
                .photos_by_request
                .entry(request_id.to_string())
                .or_default()
                .push(Photo {
                    id: photo_id,
                    request_id: request_id.to_string(),
                    family_id: family_id.clone(),
                    created_at: Utc::now(),
                    created_by_user_id: user_id.to_string(),
                    blob_path: path.to_string_lossy().into_owned(),
                    is_blocked: false,
                    status: PhotoStatus::Active,
                    expires_at: None,
                    trashed_at: None,
                    purge_at: None,
                });
        }
        Ok(())
    }
}

#[async_trait]
impl FamilyStore for LocalFamilyStore {
    async fn create_family(&self, user_id: &str) -> Result<Family, StoreError> {
        let mut state = self.state.lock().await;
        state.family.created_by_user_id = user_id.to_string();
        let family = state.family.clone();
        self.save_and_publish(&state).await?;
        Ok(family)
    }

    async fn join_family(
        &self,
        pairing_code: &str,
        _user_id: &str,
        _role: Role,
    ) -> Result<Family, StoreError> {
        if pairing_code != LOCAL_PAIRING_CODE {
            return Err(StoreError::InvalidPairingCode);
        }
        Ok(self.state.lock().await.family.clone())
    }

    async fn create_request(
        &self,
        _family_id: &str,
        user_id: &str,
    ) -> Result<PhotoRequest, StoreError> {
        let mut state = self.state.lock().await;
        let request = PhotoRequest {
            id: Uuid::new_v4().to_string(),
            family_id: state.family.id.clone(),
            created_at: Utc::now(),
            created_by_user_id: user_id.to_string(),
            from_role: Role::Requester,
            status: RequestStatus::Pending,
            fulfilled_at: None,
            fulfilled_by_user_id: None,
        };
        state.requests.insert(0, request.clone());
        self.save_and_publish(&state).await?;
        Ok(request)
    }

    async fn send_photos(
        &self,
        _family_id: &str,
        user_id: &str,
        images: Vec<Bytes>,
    ) -> Result<PhotoRequest, StoreError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let request = PhotoRequest {
            id: Uuid::new_v4().to_string(),
            family_id: state.family.id.clone(),
            created_at: now,
            created_by_user_id: user_id.to_string(),
            from_role: Role::Fulfiller,
            status: RequestStatus::Fulfilled,
            fulfilled_at: Some(now),
            fulfilled_by_user_id: Some(user_id.to_string()),
        };
        let request_id = request.id.clone();
        state.requests.insert(0, request.clone());
        self.write_photos(&mut state, &request_id, user_id, images)
            .await?;
        self.save_and_publish(&state).await?;
        Ok(request)
    }

    async fn fulfill_request(
        &self,
        _family_id: &str,
        request_id: &str,
        user_id: &str,
        images: Vec<Bytes>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let idx = state
            .requests
            .iter()
            .position(|r| r.id == request_id)
            .ok_or_else(|| StoreError::NotFound(format!("{REQUESTS}/{request_id}")))?;

        self.write_photos(&mut state, request_id, user_id, images)
            .await?;

        if state.requests[idx].status == RequestStatus::Pending {
            state.requests[idx].status = RequestStatus::Fulfilled;
            state.requests[idx].fulfilled_at = Some(Utc::now());
            state.requests[idx].fulfilled_by_user_id = Some(user_id.to_string());
        }
        self.save_and_publish(&state).await?;
        Ok(())
    }

    async fn requests(&self, _family_id: &str) -> Result<Vec<PhotoRequest>, StoreError> {
        Ok(self.state.lock().await.requests.clone())
    }

    async fn photos(&self, _family_id: &str, request_id: &str) -> Result<Vec<Photo>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .photos_by_request
            .get(request_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn all_photos(&self, _family_id: &str) -> Result<Vec<Photo>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .photos_by_request
            .values()
            .flatten()
            .cloned()
            .collect())
    }

    async fn load_image_data(&self, photo: &Photo) -> Result<Option<Bytes>, StoreError> {
        match tokio::fs::read(&photo.blob_path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn delete_photo(&self, photo: &Photo) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(photos) = state.photos_by_request.get_mut(&photo.request_id) {
            photos.retain(|p| p.id != photo.id);
        }
        if let Err(e) = tokio::fs::remove_file(&photo.blob_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove photo file {}: {}", photo.blob_path, e);
            }
        }
        self.save_and_publish(&state).await?;
        Ok(())
    }

    async fn delete_request(&self, _family_id: &str, request_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.requests.retain(|r| r.id != request_id);
        if let Some(photos) = state.photos_by_request.remove(request_id) {
            for photo in photos {
                if let Err(e) = tokio::fs::remove_file(&photo.blob_path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(
                            "Failed to remove photo file {}: {}",
                            photo.blob_path,
                            e
                        );
                    }
                }
            }
        }
        self.save_and_publish(&state).await?;
        Ok(())
    }

    async fn report_photo(&self, photo: &Photo, _reported_by: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(photos) = state.photos_by_request.get_mut(&photo.request_id) {
            for p in photos.iter_mut() {
                if p.id == photo.id {
                    p.is_blocked = true;
                }
            }
        }
        self.save_and_publish(&state).await?;
        Ok(())
    }

    async fn update_subscription_tier(
        &self,
        _family_id: &str,
        tier: SubscriptionTier,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.family.subscription_tier = tier;
        self.save_and_publish(&state).await?;
        Ok(())
    }

    async fn is_exempt_tier(&self, _family_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .family
            .subscription_tier
            .is_exempt())
    }

    fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.snapshot_tx.subscribe()
    }
}
