//! Markup image endpoints

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};

use crate::error::{ApiError, Result};
use crate::services::storage::download_first;
use crate::AppState;

/// Blob store keys to probe for a markup image, in order.
pub fn markup_keys(markup_id: &str, ext: &str) -> Vec<String> {
    vec![
        format!("kobo/markups/{}.{}", markup_id, ext),
        format!("markups/{}.{}", markup_id, ext),
        format!("{}.{}", markup_id, ext),
    ]
}

async fn serve_markup(
    state: &AppState,
    markup_id: &str,
    ext: &str,
    content_type: &'static str,
) -> Result<Response> {
    if markup_id.is_empty() {
        return Err(ApiError::BadRequest("missing markup id".to_string()));
    }

    let candidates = markup_keys(markup_id, ext);
    let (key, bytes) = download_first(state.storage.as_ref(), &candidates)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Markup {} ({})", markup_id, ext)))?;

    tracing::debug!("Serving markup {} from {}", markup_id, key);
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "public, max-age=86400"),
        ],
        bytes,
    )
        .into_response())
}

/// GET /api/markup/:id/svg
pub async fn svg(State(state): State<AppState>, Path(markup_id): Path<String>) -> Result<Response> {
    serve_markup(&state, &markup_id, "svg", "image/svg+xml").await
}

/// GET /api/markup/:id/jpg
pub async fn jpg(State(state): State<AppState>, Path(markup_id): Path<String>) -> Result<Response> {
    serve_markup(&state, &markup_id, "jpg", "image/jpeg").await
}
