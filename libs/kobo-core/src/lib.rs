//! Core library for the Kobo highlights service.
//!
//! Provides:
//! - Entity types for books, highlights and markups read from a Kobo replica
//! - Freshness comparison between the remote database and the local replica
//! - Book deduplication, ordering, filtering and pagination rules
//! - Chapter progress reconstruction and positional-token parsing
//! - Identifier encode/decode alternates for path-segment lookups

pub mod error;
pub mod freshness;
pub mod ids;
pub mod library;
pub mod progress;
pub mod types;

pub use error::{CoreError, Result};
pub use freshness::{is_stale, Freshness, RemoteStamp};
pub use ids::lookup_candidates;
pub use library::{arrange_books, paginate, total_pages, BookQuery, Page, Pagination};
pub use progress::{
    extract_book_part_number, extract_ordering_number, reconstruct, true_chapter_progress,
    ChapterPositioned, PartPattern, PartRange,
};
pub use types::{Book, ContentCategory, Highlight, Markup};
