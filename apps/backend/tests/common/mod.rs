//! Common test utilities for integration tests.
//!
//! Every context gets its own temporary directory for the replica and an
//! in-memory blob store holding the "remote" database, so tests run without
//! S3 credentials or network access.

#![allow(dead_code)]

pub mod fixtures;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderValue};
use axum_test::TestServer;

use kobo_core::PartPattern;
use kobo_highlights_backend::db::Library;
use kobo_highlights_backend::services::covers::{Cover, CoverError, CoverResolver};
use kobo_highlights_backend::services::db_sync::DbSyncService;
use kobo_highlights_backend::services::storage::MemoryStore;
use kobo_highlights_backend::services::sync_state::SyncStateTracker;
use kobo_highlights_backend::{router, AppState};

pub const REMOTE_KEY: &str = "kobo/KoboReader.sqlite";
pub const UPLOADED_AT_MS: i64 = 1_714_000_000_000;
pub const FAKE_JPEG: &[u8] = b"\xff\xd8\xff\xe0fake-cover";

/// Cover resolver that only knows "Dune".
pub struct FakeCovers;

#[async_trait]
impl CoverResolver for FakeCovers {
    async fn resolve(
        &self,
        title: &str,
        _author: Option<&str>,
    ) -> Result<Option<Cover>, CoverError> {
        Ok((title == "Dune").then(|| Cover::new(FAKE_JPEG.to_vec())))
    }
}

/// Test context with a remote database in memory and no local replica yet.
pub struct TestContext {
    _dir: tempfile::TempDir,
    pub store: Arc<MemoryStore>,
    pub state: AppState,
}

impl TestContext {
    /// Context whose remote holds `inserts` applied to an empty Kobo schema.
    pub async fn with_remote(inserts: &str) -> Self {
        Self::build(Some(inserts), None).await
    }

    /// Context with the standard fixture library as its remote.
    pub async fn new() -> Self {
        Self::with_remote(&fixtures::library_inserts()).await
    }

    /// Context with an empty bucket.
    pub async fn without_remote() -> Self {
        Self::build(None, None).await
    }

    /// Context whose `/api/*` routes require `token`.
    pub async fn with_token(token: &str) -> Self {
        Self::build(Some(&fixtures::library_inserts()), Some(token)).await
    }

    async fn build(inserts: Option<&str>, token: Option<&str>) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = Arc::new(MemoryStore::new());

        if let Some(inserts) = inserts {
            let bytes = fixtures::build_replica(&dir.path().join("remote.sqlite"), inserts).await;
            store.put(REMOTE_KEY, &bytes, UPLOADED_AT_MS);
        }

        let replica = dir.path().join("replica").join("KoboReader.sqlite");
        let sync = Arc::new(DbSyncService::new(
            store.clone(),
            replica.clone(),
            REMOTE_KEY,
            Duration::from_secs(5),
            Arc::new(SyncStateTracker::new()),
        ));

        let state = AppState {
            library: Arc::new(Library::new(replica, PartPattern::default())),
            sync,
            storage: store.clone(),
            covers: Arc::new(FakeCovers),
            api_token: token.map(Arc::from),
        };

        Self {
            _dir: dir,
            store,
            state,
        }
    }

    pub fn server(&self) -> TestServer {
        TestServer::new(router(self.state.clone())).expect("Failed to build test server")
    }

    pub fn replica_path(&self) -> PathBuf {
        self.state.library.path().to_path_buf()
    }

    /// Pull the remote database into the replica.
    pub async fn sync(&self) {
        assert!(self.state.sync.sync_if_needed().await, "fixture sync did not run");
    }

    /// Format authorization header value.
    pub fn auth_header_value(token: &str) -> HeaderValue {
        HeaderValue::from_str(&format!("Bearer {}", token)).expect("valid header value")
    }

    pub fn auth_header_name() -> axum::http::HeaderName {
        AUTHORIZATION
    }
}

/// Percent-encode a book identifier for use in a path segment.
pub fn encode_id(id: &str) -> String {
    urlencoding::encode(id).into_owned()
}
