pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Library;
use crate::services::covers::{CachedCoverResolver, CoverResolver, OnlineCoverProvider};
use crate::services::db_sync::DbSyncService;
use crate::services::storage::{BlobStore, StorageService};
use crate::services::sync_state::SyncStateTracker;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub library: Arc<Library>,
    pub sync: Arc<DbSyncService>,
    pub storage: Arc<dyn BlobStore>,
    pub covers: Arc<dyn CoverResolver>,
    /// Bearer token for `/api/*`; `None` disables auth.
    pub api_token: Option<Arc<str>>,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let protected_routes = Router::new()
        // Sync routes
        .route("/api/sync", post(routes::sync::sync_now))
        .route("/api/check-and-sync", post(routes::sync::check_and_sync))
        .route("/api/sync-status", get(routes::sync::status))
        // Library routes
        .route("/api/books", get(routes::books::list))
        .route("/api/books/*rest", get(routes::books::resource))
        .route("/api/book/*rest", get(routes::covers::cover))
        // Markup images
        .route("/api/markup/:id/svg", get(routes::markups::svg))
        .route("/api/markup/:id/jpg", get(routes::markups::jpg))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            routes::auth::auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Make sure a replica exists before serving.
///
/// Without a replica the first sync runs inline and a failure aborts startup.
/// With one, a stale replica is refreshed in the background.
pub async fn initial_sync(sync: &Arc<DbSyncService>) -> anyhow::Result<()> {
    if sync.local_path().is_file() {
        let sync = sync.clone();
        tokio::spawn(async move {
            sync.sync_with_state_tracking().await;
        });
        return Ok(());
    }

    tracing::info!("No local replica at {}, syncing before start...", sync.local_path().display());
    sync.try_sync()
        .await
        .context("initial database sync failed")?;
    Ok(())
}

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    tracing::info!("Initializing S3 storage...");
    let storage: Arc<dyn BlobStore> = Arc::new(StorageService::new().await?);

    let sync = Arc::new(DbSyncService::new(
        storage.clone(),
        config.local_db_path.clone(),
        config.remote_db_key.clone(),
        config.remote_timeout,
        Arc::new(SyncStateTracker::new()),
    ));
    initial_sync(&sync).await?;

    let covers = CachedCoverResolver::new(
        storage.clone(),
        config.covers_prefix.clone(),
        OnlineCoverProvider::new()?,
    );

    if config.api_token.is_none() {
        tracing::warn!("API_TOKEN not set, API authentication is disabled");
    }

    let state = AppState {
        library: Arc::new(Library::new(
            config.local_db_path.clone(),
            config.part_pattern.clone(),
        )),
        sync,
        storage,
        covers: Arc::new(covers),
        api_token: config.api_token.as_deref().map(Arc::from),
    };

    let app = router(state);

    let addr = config.listen_addr();
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}
