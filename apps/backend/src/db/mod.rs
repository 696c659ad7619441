//! Read-only queries against the local Kobo replica
//!
//! Each operation opens its own read-only connection, so a replica swapped in
//! by the sync executor is picked up by the next query while queries already
//! running keep reading the file they opened.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use kobo_core::progress::{clear_reconstruction, distinct_parts};
use kobo_core::{
    arrange_books, lookup_candidates, paginate, reconstruct, Book, BookQuery, ChapterPositioned,
    Highlight, Markup, Page, PartPattern, PartRange,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};

use crate::error::{ApiError, Result};
use crate::models::*;

const BOOK_COLUMNS: &str = r#"
    ContentID AS content_id,
    Title AS title,
    Attribution AS author,
    DateCreated AS date_created,
    CAST(___PercentRead AS REAL) AS percent_read,
    ImageUrl AS image_url,
    ISBN AS isbn,
    MimeType AS mime_type
"#;

const BOOKMARK_COLUMNS: &str = r#"
    b.BookmarkID AS bookmark_id,
    b.VolumeID AS volume_id,
    b.ContentID AS content_id,
    b.Text AS text,
    b.Annotation AS annotation,
    b.DateCreated AS date_created,
    CAST(b.ChapterProgress AS REAL) AS chapter_progress,
    b.StartContainerPath AS start_container_path,
    c.Title AS section_title,
    CAST(c.VolumeIndex AS INTEGER) AS section_index
"#;

/// Query engine over the replica file
#[derive(Debug, Clone)]
pub struct Library {
    path: PathBuf,
    part_pattern: PartPattern,
}

impl Library {
    pub fn new(path: impl Into<PathBuf>, part_pattern: PartPattern) -> Self {
        Self {
            path: path.into(),
            part_pattern,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Open a read-only connection; `ReplicaMissing` if there is no replica yet.
    async fn connect(&self) -> Result<SqliteConnection> {
        if !self.exists() {
            return Err(ApiError::ReplicaMissing);
        }

        let conn = SqliteConnectOptions::new()
            .filename(&self.path)
            .read_only(true)
            .disable_statement_logging()
            .connect()
            .await?;
        Ok(conn)
    }

    // === Books ===

    async fn candidate_books(&self, conn: &mut SqliteConnection) -> Result<Vec<Book>> {
        let sql = format!(
            r#"
            SELECT {BOOK_COLUMNS}
            FROM content
            WHERE ContentType = 6
            AND (BookID IS NULL OR BookID = '')
            AND Title IS NOT NULL
            ORDER BY DateCreated
            "#
        );
        let rows = sqlx::query_as::<_, DbBook>(&sql).fetch_all(&mut *conn).await?;
        Ok(rows.into_iter().map(DbBook::into_book).collect())
    }

    async fn arranged_books(&self, query: &BookQuery) -> Result<Vec<Book>> {
        let mut conn = self.connect().await?;
        let rows = self.candidate_books(&mut conn).await?;
        conn.close().await.ok();
        Ok(arrange_books(rows, query))
    }

    /// Deduplicated, filtered and ordered books, optionally windowed.
    pub async fn list_books(
        &self,
        limit: Option<usize>,
        offset: Option<usize>,
        query: &BookQuery,
    ) -> Result<Vec<Book>> {
        let books = self.arranged_books(query).await?;
        let window = books
            .into_iter()
            .skip(offset.unwrap_or(0))
            .take(limit.unwrap_or(usize::MAX))
            .collect();
        Ok(window)
    }

    /// Number of books the same query would list.
    pub async fn count_books(&self, query: &BookQuery) -> Result<usize> {
        Ok(self.arranged_books(query).await?.len())
    }

    /// One 1-indexed page of books with its pagination block.
    pub async fn page_books(
        &self,
        page: usize,
        page_size: usize,
        query: &BookQuery,
    ) -> Result<Page<Book>> {
        let books = self.arranged_books(query).await?;
        Ok(paginate(books, page, page_size))
    }

    /// Look up a book by ContentID, retrying with the decoded identifier.
    pub async fn get_book(&self, id: &str) -> Result<Option<Book>> {
        let mut conn = self.connect().await?;
        let sql = format!(
            r#"
            SELECT {BOOK_COLUMNS}
            FROM content
            WHERE ContentType = 6
            AND (BookID IS NULL OR BookID = '')
            AND Title IS NOT NULL
            AND ContentID = ?
            LIMIT 1
            "#
        );

        for candidate in lookup_candidates(id) {
            let row = sqlx::query_as::<_, DbBook>(&sql)
                .bind(&candidate)
                .fetch_optional(&mut conn)
                .await?;
            if let Some(row) = row {
                return Ok(Some(row.into_book()));
            }
        }
        Ok(None)
    }

    /// Title and author of any content row, for cover lookups.
    pub async fn title_and_author(&self, id: &str) -> Result<Option<(String, Option<String>)>> {
        let mut conn = self.connect().await?;
        for candidate in lookup_candidates(id) {
            let row = sqlx::query_as::<_, DbTitleAuthor>(
                r#"
                SELECT Title AS title, Attribution AS author
                FROM content
                WHERE ContentID = ?
                LIMIT 1
                "#,
            )
            .bind(&candidate)
            .fetch_optional(&mut conn)
            .await?;

            if let Some(pair) = row.and_then(DbTitleAuthor::into_pair) {
                return Ok(Some(pair));
            }
        }
        Ok(None)
    }

    // === Highlights & Markups ===

    /// Highlights of a book, oldest first, with reconstructed chapter progress.
    ///
    /// `NotFound` when no candidate identifier has highlights and the book
    /// itself does not exist.
    pub async fn list_highlights(&self, book_id: &str) -> Result<Vec<Highlight>> {
        let mut conn = self.connect().await?;
        let sql = format!(
            r#"
            SELECT {BOOKMARK_COLUMNS}
            FROM Bookmark b
            LEFT JOIN content c ON c.ContentID = b.ContentID
            WHERE b.VolumeID = ? AND b.Type = 'highlight'
            ORDER BY b.DateCreated
            "#
        );

        for candidate in lookup_candidates(book_id) {
            let rows = sqlx::query_as::<_, DbBookmark>(&sql)
                .bind(&candidate)
                .fetch_all(&mut conn)
                .await?;
            if !rows.is_empty() {
                let mut highlights: Vec<Highlight> =
                    rows.into_iter().map(DbBookmark::into_highlight).collect();
                self.enrich(&mut conn, &candidate, &mut highlights).await;
                return Ok(highlights);
            }
        }

        self.ensure_book(&mut conn, book_id).await?;
        Ok(Vec::new())
    }

    /// Markups of a book, oldest first, with reconstructed chapter progress.
    pub async fn list_markups(&self, book_id: &str) -> Result<Vec<Markup>> {
        let mut conn = self.connect().await?;
        let sql = format!(
            r#"
            SELECT {BOOKMARK_COLUMNS},
                CAST(b.ExtraAnnotationData AS BLOB) AS extra_annotation_data,
                c.adobe_location AS adobe_location
            FROM Bookmark b
            LEFT JOIN content c ON c.ContentID = b.ContentID
            WHERE b.VolumeID = ? AND b.ExtraAnnotationData IS NOT NULL
            ORDER BY b.DateCreated
            "#
        );

        for candidate in lookup_candidates(book_id) {
            let rows = sqlx::query_as::<_, DbMarkup>(&sql)
                .bind(&candidate)
                .fetch_all(&mut conn)
                .await?;
            if !rows.is_empty() {
                let mut markups: Vec<Markup> =
                    rows.into_iter().map(DbMarkup::into_markup).collect();
                self.enrich(&mut conn, &candidate, &mut markups).await;
                return Ok(markups);
            }
        }

        self.ensure_book(&mut conn, book_id).await?;
        Ok(Vec::new())
    }

    async fn ensure_book(&self, conn: &mut SqliteConnection, book_id: &str) -> Result<()> {
        for candidate in lookup_candidates(book_id) {
            let found: Option<(KoboText,)> =
                sqlx::query_as("SELECT ContentID FROM content WHERE ContentID = ? LIMIT 1")
                    .bind(&candidate)
                    .fetch_optional(&mut *conn)
                    .await?;
            if found.is_some() {
                return Ok(());
            }
        }
        Err(ApiError::NotFound(format!("Book {}", book_id)))
    }

    /// Fill in true chapter progress. A failed range lookup degrades every
    /// row to "unavailable" instead of failing the listing.
    async fn enrich<B: ChapterPositioned>(
        &self,
        conn: &mut SqliteConnection,
        volume_id: &str,
        bookmarks: &mut [B],
    ) {
        let parts = distinct_parts(bookmarks, &self.part_pattern);
        match self.part_ranges(conn, volume_id, &parts).await {
            Ok(ranges) => reconstruct(bookmarks, &self.part_pattern, &ranges),
            Err(e) => {
                tracing::error!("Failed to reconstruct chapter progress for {}: {}", volume_id, e);
                clear_reconstruction(bookmarks);
            }
        }
    }

    /// One range query per distinct part identifier.
    async fn part_ranges(
        &self,
        conn: &mut SqliteConnection,
        volume_id: &str,
        parts: &[String],
    ) -> std::result::Result<HashMap<String, PartRange>, sqlx::Error> {
        let mut ranges = HashMap::new();

        for part in parts {
            let row = sqlx::query_as::<_, DbPartRange>(
                r#"
                SELECT
                    CAST(MIN(VolumeIndex) AS INTEGER) AS min_index,
                    CAST(MAX(VolumeIndex) AS INTEGER) AS max_index,
                    (
                        SELECT Title FROM content
                        WHERE BookID = ?1 AND Depth = 0 AND instr(ContentID, ?2) > 0
                        ORDER BY VolumeIndex
                        LIMIT 1
                    ) AS chapter_name
                FROM content
                WHERE BookID = ?1 AND Depth = 0 AND instr(ContentID, ?2) > 0
                "#,
            )
            .bind(volume_id)
            .bind(part)
            .fetch_one(&mut *conn)
            .await?;

            if let (Some(min_index), Some(max_index)) = (row.min_index, row.max_index) {
                ranges.insert(
                    part.clone(),
                    PartRange {
                        min_index,
                        max_index,
                        chapter_name: row.chapter_name.map(String::from),
                    },
                );
            }
        }

        Ok(ranges)
    }
}
