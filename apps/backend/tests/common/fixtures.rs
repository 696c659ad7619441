//! Test fixtures: miniature Kobo replicas built through sqlx.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{ConnectOptions, Connection, Executor};

pub const DUNE_ID: &str = "file:///mnt/onboard/Herbert/Dune.kepub.epub";
pub const MARKUP_ID: &str = "6b1f2d3e-markup-0001";

/// Subset of the Kobo schema the service reads.
pub const KOBO_SCHEMA: &str = r#"
    CREATE TABLE content (
        ContentID TEXT NOT NULL PRIMARY KEY,
        ContentType INTEGER,
        MimeType TEXT,
        BookID TEXT,
        Title TEXT,
        Attribution TEXT,
        DateCreated TEXT,
        ___PercentRead INTEGER,
        ImageUrl TEXT,
        ISBN TEXT,
        VolumeIndex INTEGER,
        Depth INTEGER,
        adobe_location TEXT
    );
    CREATE TABLE Bookmark (
        BookmarkID TEXT NOT NULL PRIMARY KEY,
        VolumeID TEXT NOT NULL,
        ContentID TEXT,
        StartContainerPath TEXT,
        Text TEXT,
        Annotation TEXT,
        ExtraAnnotationData BLOB,
        DateCreated TEXT,
        ChapterProgress REAL,
        Type TEXT
    );
"#;

/// Create a replica at `path` and return its bytes.
pub async fn build_replica(path: &Path, inserts: &str) -> Vec<u8> {
    let mut conn = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete)
        .connect()
        .await
        .expect("Failed to create fixture database");
    conn.execute(KOBO_SCHEMA).await.expect("Failed to create schema");
    conn.execute(inserts).await.expect("Failed to insert fixture rows");
    conn.close().await.expect("Failed to close fixture database");
    std::fs::read(path).expect("Failed to read fixture database")
}

/// A small library: a duplicated Dune entry, a PDF and an unread article,
/// with highlights and a markup on Dune.
pub fn library_inserts() -> String {
    format!(
        r#"
        INSERT INTO content (ContentID, ContentType, MimeType, BookID, Title, Attribution, DateCreated, ___PercentRead, ISBN)
        VALUES
            ('{DUNE_ID}', 6, 'application/x-kobo-epub+zip', NULL, 'Dune', 'Frank Herbert', '2024-02-01T10:00:00Z', 45, '9780441013593'),
            ('file:///mnt/onboard/old/Dune.epub', 6, 'application/epub+zip', '', 'Dune', 'Frank Herbert', '2023-01-01T10:00:00Z', 10, NULL),
            ('file:///mnt/onboard/manual.pdf', 6, 'application/pdf', NULL, 'Kobo Manual', 'Kobo', '2024-01-01T10:00:00Z', 0, NULL),
            ('pocket://article/42', 6, 'application/x-kobo-html+pocket', NULL, 'Reading at Scale', NULL, '2024-03-01T10:00:00Z', 0, NULL);

        INSERT INTO content (ContentID, ContentType, BookID, Title, VolumeIndex, Depth, adobe_location)
        VALUES
            ('{DUNE_ID}!OEBPS!part0001.xhtml', 9, '{DUNE_ID}', 'Book One: Dune', 3, 0, 'OEBPS/part0001.xhtml'),
            ('{DUNE_ID}!OEBPS!part0002_split_000.xhtml', 9, '{DUNE_ID}', 'Chapter 2', 10, 0, 'OEBPS/part0002_split_000.xhtml'),
            ('{DUNE_ID}!OEBPS!part0002_split_001.xhtml', 9, '{DUNE_ID}', 'Chapter 2 (cont.)', 11, 0, 'OEBPS/part0002_split_001.xhtml'),
            ('{DUNE_ID}!OEBPS!part0002_split_002.xhtml', 9, '{DUNE_ID}', 'Chapter 2 (end)', 12, 0, 'OEBPS/part0002_split_002.xhtml');

        INSERT INTO Bookmark (BookmarkID, VolumeID, ContentID, StartContainerPath, Text, Annotation, DateCreated, ChapterProgress, Type)
        VALUES
            ('hl-1', '{DUNE_ID}', '{DUNE_ID}!OEBPS!part0001.xhtml', 'span#kobo.4.1', 'A beginning is the time for taking the most delicate care.', NULL, '2024-02-02T10:00:00Z', 0.1, 'highlight'),
            ('hl-2', '{DUNE_ID}', '{DUNE_ID}!OEBPS!part0002_split_001.xhtml', 'span#kobo.16.2', 'I must not fear.', 'Litany', '2024-02-03T10:00:00Z', 0.5, 'highlight');

        INSERT INTO Bookmark (BookmarkID, VolumeID, ContentID, StartContainerPath, ExtraAnnotationData, DateCreated, ChapterProgress, Type)
        VALUES
            ('{MARKUP_ID}', '{DUNE_ID}', '{DUNE_ID}!OEBPS!part0002_split_002.xhtml', 'point(/1/4/2:37)', '<svg xmlns="http://www.w3.org/2000/svg"/>', '2024-02-04T10:00:00Z', 0.25, 'markup');
        "#
    )
}

/// `total` unread books, the first `matching` of which have "Dragon" in the title.
pub fn many_books_inserts(total: usize, matching: usize) -> String {
    (0..total)
        .map(|i| {
            let title = if i < matching {
                format!("Dragon Chronicle {:02}", i)
            } else {
                format!("Quiet Story {:02}", i)
            };
            format!(
                "INSERT INTO content (ContentID, ContentType, MimeType, Title, Attribution, ___PercentRead) \
                 VALUES ('book-{i}', 6, 'application/x-kobo-epub+zip', '{title}', 'Author {i}', 0);\n"
            )
        })
        .collect()
}
