//! Replica row types and API types

use kobo_core::{
    extract_book_part_number, extract_ordering_number, Book, ContentCategory, Highlight, Markup,
    Pagination,
};
use serde::{Deserialize, Serialize};
use sqlx::error::BoxDynError;
use sqlx::sqlite::{Sqlite, SqliteTypeInfo, SqliteValueRef};
use sqlx::{Decode, FromRow, Type};

use crate::services::sync_state::{SyncStateSnapshot, SyncStatus};

// === Replica Row Types ===

/// Kobo writes whatever bytes the book carried, so text columns are not
/// guaranteed to be UTF-8. Decodes UTF-8 when valid and hex otherwise.
pub fn decode_text(raw: Vec<u8>) -> String {
    String::from_utf8(raw).unwrap_or_else(|e| hex::encode(e.into_bytes()))
}

/// A text column read through [`decode_text`] instead of strict UTF-8.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KoboText(String);

impl From<KoboText> for String {
    fn from(text: KoboText) -> Self {
        text.0
    }
}

impl From<&str> for KoboText {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

impl Type<Sqlite> for KoboText {
    fn type_info() -> SqliteTypeInfo {
        <String as Type<Sqlite>>::type_info()
    }

    fn compatible(ty: &SqliteTypeInfo) -> bool {
        <String as Type<Sqlite>>::compatible(ty) || <Vec<u8> as Type<Sqlite>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Sqlite> for KoboText {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
        let raw = <&[u8] as Decode<Sqlite>>::decode(value)?;
        Ok(Self(decode_text(raw.to_vec())))
    }
}

fn text(value: Option<KoboText>) -> Option<String> {
    value.map(String::from)
}

/// Book row from the Kobo `content` table
#[derive(Debug, Clone, FromRow)]
pub struct DbBook {
    pub content_id: KoboText,
    pub title: KoboText,
    pub author: Option<KoboText>,
    pub date_created: Option<KoboText>,
    /// Kobo stores `___PercentRead` as 0 - 100.
    pub percent_read: Option<f64>,
    pub image_url: Option<KoboText>,
    pub isbn: Option<KoboText>,
    pub mime_type: Option<KoboText>,
}

impl DbBook {
    /// Convert to the core book type
    pub fn into_book(self) -> Book {
        let percent_read = (self.percent_read.unwrap_or(0.0) / 100.0).clamp(0.0, 1.0);
        let mime_type = text(self.mime_type);
        let category = ContentCategory::from_mime_type(mime_type.as_deref());
        Book {
            content_id: self.content_id.into(),
            title: self.title.into(),
            author: text(self.author).filter(|a| !a.is_empty()),
            date_created: text(self.date_created),
            percent_read,
            image_url: text(self.image_url),
            isbn: text(self.isbn),
            mime_type,
            category,
        }
    }
}

/// Bookmark row joined with its section in `content`
#[derive(Debug, Clone, FromRow)]
pub struct DbBookmark {
    pub bookmark_id: KoboText,
    pub volume_id: KoboText,
    pub content_id: Option<KoboText>,
    pub text: Option<KoboText>,
    pub annotation: Option<KoboText>,
    pub date_created: Option<KoboText>,
    pub chapter_progress: Option<f64>,
    pub start_container_path: Option<KoboText>,
    pub section_title: Option<KoboText>,
    pub section_index: Option<i64>,
}

impl DbBookmark {
    pub fn into_highlight(self) -> Highlight {
        let start_container_path = text(self.start_container_path);
        let ordering_number = start_container_path
            .as_deref()
            .and_then(extract_ordering_number);
        Highlight {
            bookmark_id: self.bookmark_id.into(),
            volume_id: self.volume_id.into(),
            content_id: text(self.content_id),
            text: text(self.text),
            annotation: text(self.annotation),
            date_created: text(self.date_created),
            chapter_progress: self.chapter_progress,
            start_container_path,
            section_title: text(self.section_title),
            section_index: self.section_index,
            chapter_name: None,
            true_chapter_progress: None,
            ordering_number,
        }
    }
}

/// Markup row: a bookmark plus its annotation payload
#[derive(Debug, Clone, FromRow)]
pub struct DbMarkup {
    #[sqlx(flatten)]
    pub bookmark: DbBookmark,
    /// Raw `ExtraAnnotationData`, which may be text or binary.
    pub extra_annotation_data: Option<Vec<u8>>,
    pub adobe_location: Option<KoboText>,
}

impl DbMarkup {
    pub fn into_markup(self) -> Markup {
        let adobe_location = text(self.adobe_location);
        let book_part_number = adobe_location
            .as_deref()
            .and_then(extract_book_part_number);
        Markup {
            bookmark: self.bookmark.into_highlight(),
            extra_annotation_data: self.extra_annotation_data.map(decode_text),
            adobe_location,
            book_part_number,
        }
    }
}

/// Section index range for one part identifier
#[derive(Debug, Clone, FromRow)]
pub struct DbPartRange {
    pub min_index: Option<i64>,
    pub max_index: Option<i64>,
    pub chapter_name: Option<KoboText>,
}

/// Title and author of a content row, used for cover lookups
#[derive(Debug, Clone, FromRow)]
pub struct DbTitleAuthor {
    pub title: Option<KoboText>,
    pub author: Option<KoboText>,
}

impl DbTitleAuthor {
    /// Non-empty title and author, if the row has a title.
    pub fn into_pair(self) -> Option<(String, Option<String>)> {
        let title = text(self.title).filter(|t| !t.is_empty())?;
        Some((title, text(self.author).filter(|a| !a.is_empty())))
    }
}

// === API Request/Response Types ===

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

/// GET /api/books query
#[derive(Debug, Clone, Deserialize)]
pub struct BookListQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    pub search: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BookListResponse {
    pub books: Vec<Book>,
    pub pagination: Pagination,
}

/// POST /api/sync response
#[derive(Debug, Serialize, Deserialize)]
pub struct SyncResponse {
    pub synced: bool,
    pub state: SyncStateSnapshot,
}

/// POST /api/check-and-sync response
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckAndSyncResponse {
    pub initiated: bool,
    pub message: String,
    #[serde(flatten)]
    pub state: SyncStateSnapshot,
}

/// GET /api/sync-status response
#[derive(Debug, Serialize, Deserialize)]
pub struct SyncStatusResponse {
    #[serde(flatten)]
    pub state: SyncStateSnapshot,
    pub is_syncing: bool,
    pub needs_reload: bool,
}

impl From<SyncStateSnapshot> for SyncStatusResponse {
    fn from(state: SyncStateSnapshot) -> Self {
        Self {
            is_syncing: state.status.is_busy(),
            needs_reload: state.status == SyncStatus::Completed,
            state,
        }
    }
}

/// GET /api/book/:id/cover query
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoverQuery {
    pub title: Option<String>,
    pub author: Option<String>,
}
