//! Sync state tracking for background database syncs.
//!
//! One `SyncStateTracker` is created at startup and shared by handle with the
//! request handlers and the background sync task. Every read and write goes
//! through one mutex, held only for the field update or snapshot copy.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a sync attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    Checking,
    Downloading,
    Completed,
    UpToDate,
    Error,
}

impl SyncStatus {
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Checking | Self::Downloading)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::UpToDate | Self::Error)
    }
}

/// Immutable copy of the sync state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStateSnapshot {
    pub status: SyncStatus,
    pub message: String,
    /// 0 - 100 while downloading.
    pub progress: Option<f64>,
    pub error: Option<String>,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub file_size_mb: Option<f64>,
}

/// Process-wide sync state machine.
#[derive(Debug, Default)]
pub struct SyncStateTracker {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    state: SyncStateSnapshot,
    /// Bumped by every `try_begin`; identifies the current `InFlight`.
    flight: u64,
}

impl SyncStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the single in-flight slot: `Checking` if idle or terminal,
    /// `None` if a sync is already running.
    pub fn try_begin(self: &Arc<Self>) -> Option<InFlight> {
        let flight = {
            let mut inner = self.lock();
            if inner.state.status.is_busy() {
                return None;
            }
            Self::apply_checking(&mut inner.state);
            inner.flight += 1;
            inner.flight
        };
        Some(InFlight {
            tracker: Arc::clone(self),
            flight,
        })
    }

    pub fn set_checking(&self) {
        Self::apply_checking(&mut self.lock().state);
    }

    fn apply_checking(state: &mut SyncStateSnapshot) {
        state.status = SyncStatus::Checking;
        state.message = "Checking for updates...".to_string();
        state.error = None;
        state.progress = None;
        tracing::info!("Sync status: CHECKING");
    }

    pub fn set_downloading(&self, file_size_mb: Option<f64>) {
        let mut inner = self.lock();
        let state = &mut inner.state;
        state.status = SyncStatus::Downloading;
        state.message = "Downloading database...".to_string();
        state.error = None;
        state.progress = Some(0.0);
        state.file_size_mb = file_size_mb;
        match file_size_mb {
            Some(size) => tracing::info!("Sync status: DOWNLOADING (size: {:.2} MB)", size),
            None => tracing::info!("Sync status: DOWNLOADING"),
        }
    }

    pub fn set_completed(&self, file_size_mb: Option<f64>) {
        let mut inner = self.lock();
        let state = &mut inner.state;
        state.status = SyncStatus::Completed;
        state.message = match file_size_mb {
            Some(size) => format!("Sync completed ({:.2} MB)", size),
            None => "Sync completed".to_string(),
        };
        state.error = None;
        state.progress = Some(100.0);
        state.last_sync_time = Some(Utc::now());
        state.file_size_mb = file_size_mb;
        tracing::info!("Sync status: COMPLETED");
    }

    pub fn set_up_to_date(&self) {
        let mut inner = self.lock();
        let state = &mut inner.state;
        state.status = SyncStatus::UpToDate;
        state.message = "Database is up to date".to_string();
        state.error = None;
        state.progress = None;
        tracing::info!("Sync status: UP_TO_DATE");
    }

    pub fn set_error(&self, error_message: impl Into<String>) {
        Self::apply_error(&mut self.lock().state, error_message.into());
    }

    fn apply_error(state: &mut SyncStateSnapshot, error_message: String) {
        state.status = SyncStatus::Error;
        state.message = "Sync failed".to_string();
        state.progress = None;
        tracing::error!("Sync status: ERROR - {}", error_message);
        state.error = Some(error_message);
    }

    /// Reset transient fields. Refused (returns false) while a sync is in flight.
    pub fn set_idle(&self) -> bool {
        let mut inner = self.lock();
        let state = &mut inner.state;
        if state.status.is_busy() {
            return false;
        }
        state.status = SyncStatus::Idle;
        state.message = String::new();
        state.error = None;
        state.progress = None;
        tracing::info!("Sync status: IDLE");
        true
    }

    pub fn get_state(&self) -> SyncStateSnapshot {
        self.lock().state.clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.lock().state.status
    }

    pub fn is_busy(&self) -> bool {
        self.lock().state.status.is_busy()
    }
}

/// Ownership of the in-flight sync slot.
///
/// Dropping it while its own sync is still `Checking`/`Downloading` (a panic
/// or a cancelled task) records an error so the state never stays busy. A
/// guard whose slot was already released and reclaimed leaves the newer sync
/// alone.
#[derive(Debug)]
pub struct InFlight {
    tracker: Arc<SyncStateTracker>,
    flight: u64,
}

impl InFlight {
    pub fn tracker(&self) -> &SyncStateTracker {
        &self.tracker
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut inner = self.tracker.lock();
        if inner.flight == self.flight && inner.state.status.is_busy() {
            SyncStateTracker::apply_error(
                &mut inner.state,
                "Sync was interrupted before completing".to_string(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_initial_state_is_idle() {
        let tracker = SyncStateTracker::new();
        assert_eq!(tracker.get_state(), SyncStateSnapshot::default());
        assert!(!tracker.is_busy());
    }

    #[test]
    fn test_full_cycle() {
        let tracker = Arc::new(SyncStateTracker::new());
        let flight = tracker.try_begin().unwrap();
        assert_eq!(tracker.status(), SyncStatus::Checking);
        assert!(tracker.is_busy());

        tracker.set_downloading(Some(12.5));
        let state = tracker.get_state();
        assert_eq!(state.status, SyncStatus::Downloading);
        assert_eq!(state.progress, Some(0.0));
        assert_eq!(state.file_size_mb, Some(12.5));

        tracker.set_completed(Some(12.5));
        drop(flight);

        let state = tracker.get_state();
        assert_eq!(state.status, SyncStatus::Completed);
        assert_eq!(state.progress, Some(100.0));
        assert_eq!(state.message, "Sync completed (12.50 MB)");
        assert!(state.last_sync_time.is_some());
        assert!(!tracker.is_busy());
    }

    #[test]
    fn test_try_begin_is_single_flight() {
        let tracker = Arc::new(SyncStateTracker::new());
        let first = tracker.try_begin();
        assert!(first.is_some());
        assert!(tracker.try_begin().is_none());

        tracker.set_up_to_date();
        drop(first);
        assert!(tracker.try_begin().is_some());
    }

    #[test]
    fn test_dropped_flight_records_error() {
        let tracker = Arc::new(SyncStateTracker::new());
        let flight = tracker.try_begin().unwrap();
        tracker.set_downloading(None);
        drop(flight);

        let state = tracker.get_state();
        assert_eq!(state.status, SyncStatus::Error);
        assert_eq!(
            state.error.as_deref(),
            Some("Sync was interrupted before completing")
        );
    }

    #[test]
    fn test_stale_guard_leaves_newer_sync_running() {
        let tracker = Arc::new(SyncStateTracker::new());
        let first = tracker.try_begin().unwrap();
        tracker.set_completed(None);

        let second = tracker.try_begin().unwrap();
        tracker.set_downloading(None);
        drop(first);

        let state = tracker.get_state();
        assert_eq!(state.status, SyncStatus::Downloading);
        assert_eq!(state.error, None);
        assert!(tracker.is_busy());
        assert!(tracker.try_begin().is_none());

        drop(second);
        assert_eq!(tracker.status(), SyncStatus::Error);
        assert!(tracker.try_begin().is_some());
    }

    #[test]
    fn test_error_clears_progress() {
        let tracker = SyncStateTracker::new();
        tracker.set_downloading(None);
        tracker.set_error("network down");

        let state = tracker.get_state();
        assert_eq!(state.status, SyncStatus::Error);
        assert_eq!(state.message, "Sync failed");
        assert_eq!(state.progress, None);
        assert_eq!(state.error.as_deref(), Some("network down"));
    }

    #[test]
    fn test_checking_clears_previous_error() {
        let tracker = SyncStateTracker::new();
        tracker.set_error("boom");
        tracker.set_checking();
        assert_eq!(tracker.get_state().error, None);
    }

    #[test]
    fn test_set_idle_refused_while_busy() {
        let tracker = SyncStateTracker::new();
        tracker.set_checking();
        assert!(!tracker.set_idle());
        assert_eq!(tracker.status(), SyncStatus::Checking);

        tracker.set_error("failed");
        assert!(tracker.set_idle());
        let state = tracker.get_state();
        assert_eq!(state.status, SyncStatus::Idle);
        assert_eq!(state.error, None);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let tracker = SyncStateTracker::new();
        let before = tracker.get_state();
        tracker.set_up_to_date();
        assert_eq!(before.status, SyncStatus::Idle);
        assert_eq!(tracker.get_state().status, SyncStatus::UpToDate);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_value(SyncStatus::UpToDate).unwrap();
        assert_eq!(json, serde_json::json!("up_to_date"));
    }
}
