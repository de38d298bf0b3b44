// MinIO object store backed by rust-s3

use super::ObjectStore;
use crate::config::MinioConfig;
use crate::errors::StorageError;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::region::Region;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, instrument, warn};

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

fn status_error(operation: &str, key: &str, status: u16) -> StorageError {
    if status == 404 {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::MinioError(format!(
            "{} '{}' returned HTTP {}",
            operation, key, status
        ))
    }
}

/// MinIO bucket client; cheap to clone
#[derive(Clone, Debug)]
pub struct MinioObjectStore {
    bucket: Arc<Bucket>,
    page_size: usize,
}

impl MinioObjectStore {
    #[instrument(skip(config), fields(endpoint = %config.endpoint, bucket = %config.bucket))]
    pub fn new(config: &MinioConfig) -> Result<Self, StorageError> {
        info!("Initializing MinIO client");

        // rust-s3 expects the custom endpoint without scheme
        let endpoint = config
            .endpoint
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .to_string();

        let credentials = Credentials::new(
            Some(&config.access_key),
            Some(&config.secret_key),
            None,
            None,
            None,
        )
        .map_err(|e| {
            error!(error = %e, "Failed to create MinIO credentials");
            StorageError::MinioError(format!("Failed to create credentials: {}", e))
        })?;

        let region = Region::Custom {
            region: config.region.clone(),
            endpoint,
        };

        let bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|e| {
                error!(error = %e, "Failed to create MinIO bucket handle");
                StorageError::MinioError(format!("Failed to create bucket: {}", e))
            })?
            .with_path_style();

        info!(bucket = %config.bucket, "MinIO client initialized");

        Ok(Self {
            bucket: Arc::from(bucket),
            page_size: config.list_page_size.max(1),
        })
    }

    /// Fetch one key to confirm the bucket is reachable
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), StorageError> {
        let (_, status) = self
            .bucket
            .list_page(String::new(), None, None, None, Some(1))
            .await
            .map_err(|e| {
                error!(error = %e, "MinIO health check failed");
                StorageError::MinioError(format!("Health check failed: {}", e))
            })?;

        if !is_success(status) {
            error!(status = status, "MinIO health check failed");
            return Err(StorageError::MinioError(format!(
                "Health check returned HTTP {}",
                status
            )));
        }

        debug!("MinIO health check passed");
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MinioObjectStore {
    #[instrument(skip(self, body), fields(key = %key, size = body.len()))]
    async fn upload(
        &self,
        key: &str,
        body: &[u8],
        content_length: u64,
    ) -> Result<(), StorageError> {
        if body.len() as u64 != content_length {
            return Err(StorageError::ContentLength {
                key: key.to_string(),
                declared: content_length,
                actual: body.len() as u64,
            });
        }

        let response = self.bucket.put_object(key, body).await.map_err(|e| {
            error!(error = %e, key = %key, "Failed to upload object");
            StorageError::MinioError(format!("Failed to put object '{}': {}", key, e))
        })?;

        if !is_success(response.status_code()) {
            error!(key = %key, status = response.status_code(), "Upload rejected");
            return Err(status_error("Put object", key, response.status_code()));
        }

        debug!(key = %key, "Object uploaded");
        Ok(())
    }

    fn list_keys(&self, prefix: &str) -> BoxStream<'static, Result<String, StorageError>> {
        let bucket = Arc::clone(&self.bucket);
        let prefix = prefix.to_string();
        let page_size = self.page_size;

        // `None` once the store stops returning a continuation token
        let start: Option<Option<String>> = Some(None);

        stream::try_unfold(start, move |cursor| {
            let bucket = Arc::clone(&bucket);
            let prefix = prefix.clone();
            async move {
                let token = match cursor {
                    Some(token) => token,
                    None => return Ok(None),
                };

                let (page, status) = bucket
                    .list_page(prefix.clone(), None, token, None, Some(page_size))
                    .await
                    .map_err(|e| {
                        error!(error = %e, prefix = %prefix, "Failed to list objects");
                        StorageError::MinioError(format!(
                            "Failed to list objects under '{}': {}",
                            prefix, e
                        ))
                    })?;

                if !is_success(status) {
                    return Err(status_error("List objects", &prefix, status));
                }

                debug!(prefix = %prefix, count = page.contents.len(), "Listed object page");

                let keys: Vec<Result<String, StorageError>> =
                    page.contents.into_iter().map(|object| Ok(object.key)).collect();
                let next = page.next_continuation_token.map(Some);

                Ok(Some((stream::iter(keys), next)))
            }
        })
        .try_flatten()
        .boxed()
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket.get_object(key).await.map_err(|e| {
            error!(error = %e, key = %key, "Failed to download object");
            StorageError::MinioError(format!("Failed to get object '{}': {}", key, e))
        })?;

        if !is_success(response.status_code()) {
            return Err(status_error("Get object", key, response.status_code()));
        }

        let data = response.bytes().to_vec();
        debug!(key = %key, size = data.len(), "Object downloaded");
        Ok(data)
    }

    #[instrument(skip(self, writer), fields(key = %key))]
    async fn download_to(
        &self,
        key: &str,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), StorageError> {
        let status = self
            .bucket
            .get_object_to_writer(key, &mut &mut *writer)
            .await
            .map_err(|e| {
                error!(error = %e, key = %key, "Failed to stream object");
                StorageError::MinioError(format!("Failed to stream object '{}': {}", key, e))
            })?;

        if !is_success(status) {
            return Err(status_error("Get object", key, status));
        }

        writer.flush().await.map_err(|e| {
            error!(error = %e, key = %key, "Failed to flush streamed object");
            StorageError::FileSystemError(format!("Failed to flush '{}': {}", key, e))
        })
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn get_tag(&self, key: &str, name: &str) -> Result<Option<String>, StorageError> {
        let (tags, status) = self.bucket.get_object_tagging(key).await?;
        if !is_success(status) {
            return Err(status_error("Get object tagging", key, status));
        }

        Ok(tags
            .into_iter()
            .find(|tag| tag.key() == name)
            .map(|tag| tag.value()))
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn set_tag(&self, key: &str, name: &str, value: &str) -> Result<(), StorageError> {
        let (existing, status) = self.bucket.get_object_tagging(key).await?;
        if !is_success(status) {
            return Err(status_error("Get object tagging", key, status));
        }

        let mut tags: Vec<(String, String)> = existing
            .into_iter()
            .map(|tag| (tag.key(), tag.value()))
            .filter(|(k, _)| k != name)
            .collect();
        tags.push((name.to_string(), value.to_string()));

        let pairs: Vec<(&str, &str)> = tags
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let response = self.bucket.put_object_tagging(key, &pairs).await?;
        if !is_success(response.status_code()) {
            warn!(key = %key, status = response.status_code(), "Object tagging rejected");
            return Err(status_error("Put object tagging", key, response.status_code()));
        }

        debug!(key = %key, tag = %name, value = %value, "Object tag set");
        Ok(())
    }
}
