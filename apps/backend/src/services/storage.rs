//! Blob storage for the remote Kobo database, markup images and cached covers.
//!
//! The remote side is any S3-compatible bucket (Backblaze B2, Cloudflare R2,
//! AWS S3). `BlobStore` is the seam the sync executor and routes depend on;
//! `StorageService` is the S3 implementation and `MemoryStore` an in-process
//! one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::{ByteStream, DateTime},
    Client, Config,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("S3 error: {0}")]
    S3(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("File not found: {0}")]
    NotFound(String),
}

/// Metadata for one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    /// Upload time in milliseconds since the epoch (0 if unknown).
    pub uploaded_at_ms: i64,
}

/// Remote object storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Download an object's full content.
    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Upload an object, replacing any existing one.
    async fn upload(
        &self,
        key: &str,
        content: &[u8],
        content_type: Option<&str>,
    ) -> Result<(), StorageError>;

    /// List objects whose key starts with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StorageError>;

    /// Fetch an object's metadata; `NotFound` if it does not exist.
    async fn stat(&self, key: &str) -> Result<ObjectMeta, StorageError>;
}

/// Try candidate keys in order and return the first one that exists.
///
/// A `NotFound` moves on to the next candidate; any other failure aborts.
pub async fn download_first(
    store: &dyn BlobStore,
    candidates: &[String],
) -> Result<Option<(String, Vec<u8>)>, StorageError> {
    for key in candidates {
        match store.download(key).await {
            Ok(bytes) => return Ok(Some((key.clone(), bytes))),
            Err(StorageError::NotFound(_)) => {
                tracing::debug!("No object at {}", key);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

fn to_millis(time: Option<&DateTime>) -> i64 {
    time.and_then(|t| t.to_millis().ok()).unwrap_or(0)
}

/// S3-compatible storage service.
pub struct StorageService {
    client: Client,
    bucket: String,
}

impl StorageService {
    /// Create a new storage service from environment variables.
    ///
    /// Required env vars:
    /// - S3_BUCKET: Bucket name
    /// - S3_REGION: Region (use "auto" for Cloudflare R2)
    /// - S3_ENDPOINT: Custom endpoint URL (required for B2 and R2)
    /// - S3_ACCESS_KEY: Access key ID
    /// - S3_SECRET_KEY: Secret access key
    pub async fn new() -> Result<Self, StorageError> {
        let bucket = std::env::var("S3_BUCKET")
            .map_err(|_| StorageError::Config("S3_BUCKET not set".to_string()))?;

        let region = std::env::var("S3_REGION").unwrap_or_else(|_| "auto".to_string());

        let endpoint = std::env::var("S3_ENDPOINT").ok();

        let access_key = std::env::var("S3_ACCESS_KEY")
            .map_err(|_| StorageError::Config("S3_ACCESS_KEY not set".to_string()))?;

        let secret_key = std::env::var("S3_SECRET_KEY")
            .map_err(|_| StorageError::Config("S3_SECRET_KEY not set".to_string()))?;

        let credentials = Credentials::new(
            access_key,
            secret_key,
            None,  // session token
            None,  // expiry
            "env", // provider name
        );

        let mut config_builder = Config::builder()
            .region(Region::new(region))
            .credentials_provider(credentials)
            .behavior_version_latest();

        if let Some(endpoint_url) = endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }

        let config = config_builder.build();
        let client = Client::from_conf(config);

        tracing::info!("Using bucket {}", bucket);
        Ok(Self { client, bucket })
    }
}

#[async_trait]
impl BlobStore for StorageService {
    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::S3(DisplayErrorContext(&e).to_string())
                }
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?
            .into_bytes()
            .to_vec();

        Ok(bytes)
    }

    async fn upload(
        &self,
        key: &str,
        content: &[u8],
        content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        let body = ByteStream::from(content.to_vec());

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body);

        if let Some(ct) = content_type {
            request = request.content_type(ct);
        }

        request
            .send()
            .await
            .map_err(|e| StorageError::S3(DisplayErrorContext(&e).to_string()))?;

        tracing::info!("Uploaded {} ({} bytes)", key, content.len());
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StorageError> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .send()
            .await
            .map_err(|e| StorageError::S3(DisplayErrorContext(&e).to_string()))?;

        let objects = response
            .contents()
            .iter()
            .filter_map(|obj| {
                obj.key().map(|key| ObjectMeta {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    uploaded_at_ms: to_millis(obj.last_modified()),
                })
            })
            .collect();

        Ok(objects)
    }

    async fn stat(&self, key: &str) -> Result<ObjectMeta, StorageError> {
        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::S3(DisplayErrorContext(&e).to_string())
                }
            })?;

        Ok(ObjectMeta {
            key: key.to_string(),
            size: response.content_length().unwrap_or(0).max(0) as u64,
            uploaded_at_ms: to_millis(response.last_modified()),
        })
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    content: Vec<u8>,
    uploaded_at_ms: i64,
}

/// In-process blob store.
///
/// Counts downloads and can inject latency or failures, which makes it the
/// store of choice for exercising the sync executor.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    downloads: AtomicUsize,
    download_delay: Mutex<Option<Duration>>,
    fail_downloads: AtomicBool,
    fail_stat: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object with an explicit upload time.
    pub fn put(&self, key: &str, content: &[u8], uploaded_at_ms: i64) {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.to_string(),
                StoredObject {
                    content: content.to_vec(),
                    uploaded_at_ms,
                },
            );
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn set_download_delay(&self, delay: Option<Duration>) {
        *self
            .download_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    pub fn set_fail_downloads(&self, fail: bool) {
        self.fail_downloads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_stat(&self, fail: bool) {
        self.fail_stat.store(fail, Ordering::SeqCst);
    }

    fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);

        let delay = *self
            .download_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_downloads.load(Ordering::SeqCst) {
            return Err(StorageError::S3("connection reset by peer".to_string()));
        }

        self.get(key)
            .map(|obj| obj.content)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn upload(
        &self,
        key: &str,
        content: &[u8],
        _content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        self.put(key, content, chrono::Utc::now().timestamp_millis());
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StorageError> {
        let objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        let mut listed: Vec<ObjectMeta> = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, obj)| ObjectMeta {
                key: key.clone(),
                size: obj.content.len() as u64,
                uploaded_at_ms: obj.uploaded_at_ms,
            })
            .collect();
        listed.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(listed)
    }

    async fn stat(&self, key: &str) -> Result<ObjectMeta, StorageError> {
        if self.fail_stat.load(Ordering::SeqCst) {
            return Err(StorageError::S3("request timed out".to_string()));
        }

        self.get(key)
            .map(|obj| ObjectMeta {
                key: key.to_string(),
                size: obj.content.len() as u64,
                uploaded_at_ms: obj.uploaded_at_ms,
            })
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}
