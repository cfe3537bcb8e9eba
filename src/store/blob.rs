use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use tokio::sync::Mutex;

use super::StoreError;

/// Content-addressable blob storage keyed by path. Deleting a missing path
/// is a success: already-gone is the desired end state for every caller.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, data: Bytes, content_type: &str) -> Result<(), StoreError>;

    async fn get(&self, path: &str) -> Result<Option<Bytes>, StoreError>;

    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    async fn exists(&self, path: &str) -> Result<bool, StoreError>;
}

/// S3/MinIO-backed blob store.
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, path: &str, data: Bytes, content_type: &str) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StoreError::Backend(e.into_service_error().to_string()))?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Bytes>, StoreError> {
        let res = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await;

        match res {
            Ok(out) => {
                let data = out
                    .body
                    .collect()
                    .await
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                Ok(Some(data.into_bytes()))
            }
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(StoreError::Backend(service_error.to_string()))
                }
            }
        }
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        // S3 DeleteObject on a missing key already succeeds, which is
        // exactly the contract.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| StoreError::Backend(e.into_service_error().to_string()))?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        let res = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await;

        match res {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(false)
                } else {
                    Err(StoreError::Backend(service_error.to_string()))
                }
            }
        }
    }
}

/// In-memory blob store for tests and the local/demo deployment.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.lock().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, data: Bytes, _content_type: &str) -> Result<(), StoreError> {
        self.blobs.lock().await.insert(path.to_string(), data);
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Bytes>, StoreError> {
        Ok(self.blobs.lock().await.get(path).cloned())
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.blobs.lock().await.remove(path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        Ok(self.blobs.lock().await.contains_key(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delete_missing_blob_succeeds() {
        let store = MemoryBlobStore::new();
        assert!(store.delete("nope.jpg").await.is_ok());
    }

    #[tokio::test]
    async fn put_get_roundtrip() {
        let store = MemoryBlobStore::new();
        store
            .put("a/b.jpg", Bytes::from_static(b"bytes"), "image/jpeg")
            .await
            .unwrap();
        assert!(store.exists("a/b.jpg").await.unwrap());
        assert_eq!(
            store.get("a/b.jpg").await.unwrap(),
            Some(Bytes::from_static(b"bytes"))
        );
    }
}
