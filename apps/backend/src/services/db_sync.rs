//! Replica synchronization: freshness check and atomic replacement of the
//! local Kobo database from the blob store.
//!
//! The replica is never written in place. A download lands in a uniquely
//! named temporary file next to the replica, is checked, stamped with the
//! remote upload time and renamed over the canonical path, so readers see
//! either the previous complete file or the new one.

use std::fs::FileTimes;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{TimeZone, Utc};
use kobo_core::{Freshness, RemoteStamp};
use thiserror::Error;

use crate::services::storage::{BlobStore, ObjectMeta, StorageError};
use crate::services::sync_state::{InFlight, SyncStateTracker};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("file system error: {0}")]
    Io(#[from] std::io::Error),

    #[error("downloaded file for {0} is empty")]
    EmptyDownload(String),

    #[error("remote operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("remote database {0} not found in bucket")]
    RemoteMissing(String),

    #[error("sync task failed: {0}")]
    Join(String),
}

/// Result of one completed sync.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub remote_key: String,
    pub size_bytes: u64,
    pub uploaded_at_ms: i64,
}

impl SyncReport {
    pub fn size_mb(&self) -> f64 {
        bytes_to_mb(self.size_bytes)
    }
}

fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

fn format_timestamp(secs: f64) -> String {
    if secs <= 0.0 {
        return "N/A".to_string();
    }
    Utc.timestamp_millis_opt((secs * 1000.0) as i64)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

/// Freshness decision plus whatever was learned about the remote object.
#[derive(Debug)]
pub struct FreshnessCheck {
    pub freshness: Freshness,
    pub remote: Result<ObjectMeta, SyncError>,
}

/// Keeps the local replica in step with the remote database.
pub struct DbSyncService {
    store: Arc<dyn BlobStore>,
    local_path: PathBuf,
    remote_key: String,
    timeout: Duration,
    state: Arc<SyncStateTracker>,
}

impl DbSyncService {
    pub fn new(
        store: Arc<dyn BlobStore>,
        local_path: impl Into<PathBuf>,
        remote_key: impl Into<String>,
        timeout: Duration,
        state: Arc<SyncStateTracker>,
    ) -> Self {
        Self {
            store,
            local_path: local_path.into(),
            remote_key: remote_key.into(),
            timeout,
            state,
        }
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn state(&self) -> &Arc<SyncStateTracker> {
        &self.state
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, SyncError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| SyncError::Timeout(self.timeout))?
            .map_err(SyncError::from)
    }

    /// Local replica mtime in seconds since the epoch, 0 if absent.
    pub async fn local_mtime(&self) -> f64 {
        match tokio::fs::metadata(&self.local_path).await {
            Ok(meta) => meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
            Err(_) => 0.0,
        }
    }

    /// Locate the remote database.
    ///
    /// Falls back to the first object in the bucket whose key ends with the
    /// configured file name when the configured key is absent.
    pub async fn resolve_remote(&self) -> Result<ObjectMeta, SyncError> {
        match self.bounded(self.store.stat(&self.remote_key)).await {
            Ok(meta) => Ok(meta),
            Err(SyncError::Storage(StorageError::NotFound(_))) => {
                let file_name = Path::new(&self.remote_key)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| self.remote_key.clone());

                tracing::warn!(
                    "Remote database {} not found, searching bucket for *{}",
                    self.remote_key,
                    file_name
                );

                let objects = self.bounded(self.store.list("")).await?;
                objects
                    .into_iter()
                    .find(|obj| obj.key.ends_with(&file_name))
                    .inspect(|obj| tracing::info!("Found remote database at {}", obj.key))
                    .ok_or_else(|| SyncError::RemoteMissing(self.remote_key.clone()))
            }
            Err(e) => Err(e),
        }
    }

    /// Compare the replica with the remote object.
    pub async fn check(&self) -> FreshnessCheck {
        let local = self.local_mtime().await;
        let remote = self.resolve_remote().await;

        let stamp = match &remote {
            Ok(meta) => RemoteStamp::from_millis(meta.uploaded_at_ms),
            Err(SyncError::RemoteMissing(_)) => RemoteStamp::Missing,
            Err(e) => RemoteStamp::Unavailable {
                reason: e.to_string(),
            },
        };

        tracing::info!(
            "Timestamp check - Local: {} ({}), Remote: {} ({})",
            format_timestamp(local),
            local,
            format_timestamp(stamp.uploaded_at().unwrap_or(0.0)),
            stamp.uploaded_at().unwrap_or(0.0)
        );

        let freshness = Freshness::compare(local, &stamp);
        match &freshness {
            Freshness::NoReplica => tracing::info!("No local replica found"),
            Freshness::Stale { local, remote } => {
                tracing::info!("Replica is stale ({} > {} + 1s)", remote, local)
            }
            Freshness::Fresh { .. } => tracing::info!("Replica is up to date"),
            Freshness::RemoteMissing { .. } => {
                tracing::warn!("Remote database is missing; keeping local replica")
            }
            Freshness::RemoteUnavailable { reason, .. } => {
                tracing::warn!("Could not get remote timestamp ({}); keeping local replica", reason)
            }
        }

        FreshnessCheck { freshness, remote }
    }

    pub async fn is_local_cache_stale(&self) -> bool {
        self.check().await.freshness.is_stale()
    }

    /// Download the remote object and swap it in as the replica.
    async fn execute(&self, remote: &ObjectMeta) -> Result<SyncReport, SyncError> {
        // Captured before the download so the replica is stamped with the
        // version that was checked.
        let uploaded_at_ms = remote.uploaded_at_ms;

        tracing::info!("Downloading {} ...", remote.key);
        let bytes = self.bounded(self.store.download(&remote.key)).await?;

        let target = self.local_path.clone();
        let key = remote.key.clone();
        let size_bytes = tokio::task::spawn_blocking(move || {
            write_replica(&target, &bytes, uploaded_at_ms, &key)
        })
        .await
        .map_err(|e| SyncError::Join(e.to_string()))??;

        let report = SyncReport {
            remote_key: remote.key.clone(),
            size_bytes,
            uploaded_at_ms,
        };
        tracing::info!("Synced {} ({:.2} MB)", report.remote_key, report.size_mb());
        Ok(report)
    }

    /// Sync if the replica is missing or stale; returns whether a sync ran.
    ///
    /// Failures are logged and reported as `false`; the prior replica is kept.
    pub async fn sync_if_needed(&self) -> bool {
        match self.try_sync().await {
            Ok(report) => report.is_some(),
            Err(e) => {
                tracing::error!("Sync failed: {}", e);
                false
            }
        }
    }

    /// Like `sync_if_needed`, but surfaces the failure.
    pub async fn try_sync(&self) -> Result<Option<SyncReport>, SyncError> {
        let check = self.check().await;
        if !check.freshness.is_stale() {
            return Ok(None);
        }
        let remote = check.remote?;
        self.execute(&remote).await.map(Some)
    }

    /// Sync under the state machine. Returns false without doing any I/O
    /// when another sync is already in flight.
    pub async fn sync_with_state_tracking(&self) -> bool {
        match self.state.try_begin() {
            Some(flight) => self.run_tracked(flight).await,
            None => {
                tracing::info!("Sync already in progress");
                false
            }
        }
    }

    /// Drive a claimed sync slot to a terminal state.
    pub async fn run_tracked(&self, flight: InFlight) -> bool {
        let tracker = flight.tracker();
        let outcome = async {
            let check = self.check().await;
            if !check.freshness.is_stale() {
                tracker.set_up_to_date();
                return Ok(false);
            }

            let remote = check.remote?;
            tracker.set_downloading(Some(bytes_to_mb(remote.size)));
            let report = self.execute(&remote).await?;
            tracker.set_completed(Some(report.size_mb()));
            Ok::<bool, SyncError>(true)
        }
        .await;

        match outcome {
            Ok(performed) => performed,
            Err(e) => {
                tracker.set_error(e.to_string());
                false
            }
        }
    }
}

/// Atomically replace `target` with `bytes`.
///
/// Writes a temporary file in the target's directory, verifies it is
/// non-empty, sets its mtime to `uploaded_at_ms` and renames it into place.
/// The temporary file is removed on every failure path.
pub fn write_replica(
    target: &Path,
    bytes: &[u8],
    uploaded_at_ms: i64,
    remote_key: &str,
) -> Result<u64, SyncError> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let prefix = format!(
        ".{}.",
        target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "replica".to_string())
    );
    let mut tmp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".part")
        .tempfile_in(dir)?;

    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;

    let size = tmp.as_file().metadata()?.len();
    if size == 0 {
        return Err(SyncError::EmptyDownload(remote_key.to_string()));
    }

    if uploaded_at_ms > 0 {
        let mtime: SystemTime = UNIX_EPOCH + Duration::from_millis(uploaded_at_ms as u64);
        tmp.as_file()
            .set_times(FileTimes::new().set_modified(mtime).set_accessed(mtime))?;
        tracing::info!(
            "Set replica mtime to match remote: {}",
            format_timestamp(uploaded_at_ms as f64 / 1000.0)
        );
    }

    tmp.persist(target).map_err(|e| SyncError::Io(e.error))?;
    Ok(size)
}
