use std::sync::Arc;

use chrono::{Duration, Utc};
use photokeep::config::CacheConfig;
use photokeep::models::SubscriptionTier;
use photokeep::services::cache::{ImageCache, StoreImageFetcher};
use photokeep::services::cleanup::run_local_startup_cleanup;
use photokeep::store::{FamilyStore, LocalFamilyStore};
use serde_json::json;

/// Seed a persisted local store with one photo well past its TTL and one
/// fresh one, plus the matching photo files.
fn seed_local_store(data_dir: &std::path::Path) {
    let photos_dir = data_dir.join("photos");
    std::fs::create_dir_all(&photos_dir).unwrap();

    let old_path = photos_dir.join("old.jpg");
    let new_path = photos_dir.join("new.jpg");
    std::fs::write(&old_path, b"old-jpeg").unwrap();
    std::fs::write(&new_path, b"new-jpeg").unwrap();

    let now = Utc::now();
    let photo = |id: &str, created_at: chrono::DateTime<Utc>, path: &std::path::Path| {
        json!({
            "id": id,
            "requestId": "r1",
            "familyId": "local-demo",
            "createdAt": created_at,
            "createdByUserId": "u1",
            "blobPath": path.to_string_lossy(),
            "isBlocked": false,
            "status": "active",
        })
    };

    let state = json!({
        "family": {
            "id": "local-demo",
            "createdAt": now - Duration::days(60),
            "createdByUserId": "u1",
            "pairingCode": "1234",
        },
        "requests": [{
            "id": "r1",
            "familyId": "local-demo",
            "createdAt": now - Duration::days(60),
            "createdByUserId": "u1",
            "fromRole": "requester",
            "status": "fulfilled",
            "fulfilledAt": now - Duration::days(60),
            "fulfilledByUserId": "u1",
        }],
        "photos_by_request": {
            "r1": [
                photo("old", now - Duration::days(40), &old_path),
                photo("new", now, &new_path),
            ],
        },
    });
    std::fs::write(
        data_dir.join("store.json"),
        serde_json::to_vec_pretty(&state).unwrap(),
    )
    .unwrap();
}

#[tokio::test]
async fn startup_cleanup_deletes_expired_photos_and_sweeps_the_cache() {
    let data_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    seed_local_store(data_dir.path());

    let store: Arc<dyn FamilyStore> = Arc::new(LocalFamilyStore::new(data_dir.path()).unwrap());
    let cache = ImageCache::new(
        CacheConfig {
            dir: cache_dir.path().to_path_buf(),
            ..CacheConfig::default()
        },
        Arc::new(StoreImageFetcher(store.clone())),
    )
    .unwrap();

    // Stale cache entries for the expired photo, plus live ones.
    std::fs::write(cache_dir.path().join("old_thumb.jpg"), b"t").unwrap();
    std::fs::write(cache_dir.path().join("old_full.jpg"), b"f").unwrap();
    std::fs::write(cache_dir.path().join("new_thumb.jpg"), b"t").unwrap();

    let deleted = run_local_startup_cleanup(store.clone(), &cache, Utc::now())
        .await
        .unwrap();
    assert_eq!(deleted, 1);

    let remaining = store.all_photos("local-demo").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "new");
    assert!(!data_dir.path().join("photos/old.jpg").exists());
    assert!(data_dir.path().join("photos/new.jpg").exists());

    assert!(!cache_dir.path().join("old_thumb.jpg").exists());
    assert!(!cache_dir.path().join("old_full.jpg").exists());
    assert!(cache_dir.path().join("new_thumb.jpg").exists());
}

#[tokio::test]
async fn startup_cleanup_spares_exempt_accounts() {
    let data_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    seed_local_store(data_dir.path());

    let store: Arc<dyn FamilyStore> = Arc::new(LocalFamilyStore::new(data_dir.path()).unwrap());
    store
        .update_subscription_tier("local-demo", SubscriptionTier::Premium)
        .await
        .unwrap();

    let cache = ImageCache::new(
        CacheConfig {
            dir: cache_dir.path().to_path_buf(),
            ..CacheConfig::default()
        },
        Arc::new(StoreImageFetcher(store.clone())),
    )
    .unwrap();

    let deleted = run_local_startup_cleanup(store.clone(), &cache, Utc::now())
        .await
        .unwrap();
    assert_eq!(deleted, 0);
    assert_eq!(store.all_photos("local-demo").await.unwrap().len(), 2);
}
