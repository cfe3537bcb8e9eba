use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use aws_sdk_s3::config::Region;
use tracing::info;

use crate::store::{BlobStore, MemoryBlobStore, S3BlobStore};

/// Build the blob store from the environment. With `S3_ENDPOINT` set this
/// connects to an S3-compatible endpoint (MinIO in development) and makes
/// sure the bucket exists; without it, falls back to the in-memory store so
/// the binary stays runnable offline.
pub async fn setup_blob_store() -> Result<Arc<dyn BlobStore>> {
    let Ok(endpoint_url) = env::var("S3_ENDPOINT") else {
        info!("S3_ENDPOINT not set, using in-memory blob store");
        return Ok(Arc::new(MemoryBlobStore::new()));
    };

    let access_key = env::var("S3_ACCESS_KEY").context("S3_ACCESS_KEY must be set")?;
    let secret_key = env::var("S3_SECRET_KEY").context("S3_SECRET_KEY must be set")?;
    let bucket = env::var("S3_BUCKET").context("S3_BUCKET must be set")?;

    info!("☁️  S3 Storage: {} (Bucket: {})", endpoint_url, bucket);

    let aws_config = aws_config::from_env()
        .endpoint_url(&endpoint_url)
        .region(Region::new("us-east-1"))
        .credentials_provider(aws_sdk_s3::config::Credentials::new(
            access_key, secret_key, None, None, "static",
        ))
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
        .force_path_style(true)
        .build();

    let client = aws_sdk_s3::Client::from_conf(s3_config);
    ensure_bucket(&client, &bucket).await?;

    Ok(Arc::new(S3BlobStore::new(client, bucket)))
}

async fn ensure_bucket(client: &aws_sdk_s3::Client, bucket: &str) -> Result<()> {
    if client.head_bucket().bucket(bucket).send().await.is_ok() {
        return Ok(());
    }
    client
        .create_bucket()
        .bucket(bucket)
        .send()
        .await
        .with_context(|| format!("creating bucket {bucket}"))?;
    info!("Created bucket: {}", bucket);
    Ok(())
}
