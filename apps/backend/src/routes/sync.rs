//! Sync endpoints

use axum::{extract::State, Json};

use crate::models::*;
use crate::services::sync_state::SyncStatus;
use crate::AppState;

/// POST /api/sync
/// Sync now if the replica is missing or stale, waiting for the result
pub async fn sync_now(State(state): State<AppState>) -> Json<SyncResponse> {
    let synced = state.sync.sync_if_needed().await;
    Json(SyncResponse {
        synced,
        state: state.sync.state().get_state(),
    })
}

/// POST /api/check-and-sync
/// Start a background sync and return immediately; poll /api/sync-status
pub async fn check_and_sync(State(state): State<AppState>) -> Json<CheckAndSyncResponse> {
    let tracker = state.sync.state();

    if tracker.is_busy() {
        return Json(CheckAndSyncResponse {
            initiated: false,
            message: "Sync already in progress".to_string(),
            state: tracker.get_state(),
        });
    }

    let current = tracker.get_state();
    if matches!(current.status, SyncStatus::Completed | SyncStatus::UpToDate)
        && !state.sync.is_local_cache_stale().await
    {
        return Json(CheckAndSyncResponse {
            initiated: false,
            message: "Database is already up to date".to_string(),
            state: current,
        });
    }

    tracker.set_idle();
    let Some(flight) = tracker.try_begin() else {
        return Json(CheckAndSyncResponse {
            initiated: false,
            message: "Sync already in progress".to_string(),
            state: tracker.get_state(),
        });
    };

    let sync = state.sync.clone();
    tokio::spawn(async move {
        sync.run_tracked(flight).await;
    });

    Json(CheckAndSyncResponse {
        initiated: true,
        message: "Sync started".to_string(),
        state: tracker.get_state(),
    })
}

/// GET /api/sync-status
pub async fn status(State(state): State<AppState>) -> Json<SyncStatusResponse> {
    Json(SyncStatusResponse::from(state.sync.state().get_state()))
}
