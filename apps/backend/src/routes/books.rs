//! Book, highlight and markup endpoints

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use kobo_core::{BookQuery, ContentCategory};

use crate::error::{ApiError, Result};
use crate::models::*;
use crate::AppState;

/// GET /api/books
/// Deduplicated, searchable, paginated book listing
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<BookListQuery>,
) -> Result<Json<BookListResponse>> {
    if params.page < 1 {
        return Err(ApiError::BadRequest("page must be at least 1".to_string()));
    }
    if !(1..=MAX_PAGE_SIZE).contains(&params.page_size) {
        return Err(ApiError::BadRequest(format!(
            "page_size must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }

    let category = params
        .content_type
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .map(|c| c.parse::<ContentCategory>())
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    if !state.library.exists() {
        tracing::info!("No local replica, syncing before listing books");
        state.sync.sync_if_needed().await;
    }

    let query = BookQuery::new(params.search.as_deref(), category);
    let page = state
        .library
        .page_books(params.page, params.page_size, &query)
        .await?;

    Ok(Json(BookListResponse {
        books: page.items,
        pagination: page.pagination,
    }))
}

/// GET /api/books/*rest
/// Dispatches `{id}`, `{id}/highlights` and `{id}/markups`; book IDs may contain slashes
pub async fn resource(
    State(state): State<AppState>,
    Path(rest): Path<String>,
) -> Result<Response> {
    let rest = rest.trim_start_matches('/');

    if let Some(id) = rest.strip_suffix("/highlights") {
        let highlights = state.library.list_highlights(non_empty(id)?).await?;
        return Ok(Json(highlights).into_response());
    }

    if let Some(id) = rest.strip_suffix("/markups") {
        let markups = state.library.list_markups(non_empty(id)?).await?;
        return Ok(Json(markups).into_response());
    }

    let id = non_empty(rest)?;
    let book = state
        .library
        .get_book(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Book {}", id)))?;
    Ok(Json(book).into_response())
}

fn non_empty(id: &str) -> Result<&str> {
    if id.is_empty() {
        Err(ApiError::BadRequest("missing book id".to_string()))
    } else {
        Ok(id)
    }
}
