//! Cover image endpoint

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
};

use crate::error::{ApiError, Result};
use crate::models::CoverQuery;
use crate::AppState;

/// GET /api/book/*rest, where rest is `{id}/cover`
///
/// Title and author come from the query string, or from the replica when no
/// title is given.
pub async fn cover(
    State(state): State<AppState>,
    Path(rest): Path<String>,
    Query(params): Query<CoverQuery>,
) -> Result<Response> {
    let book_id = rest
        .trim_start_matches('/')
        .strip_suffix("/cover")
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::NotFound(format!("No route for /api/book/{}", rest)))?;

    let given_title = params.title.as_deref().map(str::trim).filter(|t| !t.is_empty());
    let (title, author) = match given_title {
        Some(title) => (
            title.to_string(),
            params.author.filter(|a| !a.trim().is_empty()),
        ),
        None => {
            let stored = match state.library.title_and_author(book_id).await {
                Err(ApiError::ReplicaMissing) => None,
                other => other?,
            };
            stored.ok_or_else(|| {
                ApiError::BadRequest(
                    "Title is required. Pass 'title' as query parameter: \
                     /api/book/{book_id}/cover?title=Book Title"
                        .to_string(),
                )
            })?
        }
    };

    let cover = state
        .covers
        .resolve(&title, author.as_deref())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("Cover for '{}'", title)))?;

    Ok((
        [
            (header::CONTENT_TYPE, cover.content_type),
            (header::CACHE_CONTROL, "public, max-age=604800".to_string()),
        ],
        cover.bytes,
    )
        .into_response())
}
