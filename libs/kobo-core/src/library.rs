//! Book listing rules: deduplication, filtering, ordering and pagination.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::types::{Book, ContentCategory};

/// Filters applied to a book listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookQuery {
    pub search: Option<String>,
    pub category: Option<ContentCategory>,
}

impl BookQuery {
    pub fn new(search: Option<&str>, category: Option<ContentCategory>) -> Self {
        Self {
            search: search.filter(|s| !s.is_empty()).map(str::to_lowercase),
            category,
        }
    }

    /// Case-insensitive substring match on title or author, plus category.
    pub fn matches(&self, book: &Book) -> bool {
        if let Some(category) = self.category {
            if book.category != category {
                return false;
            }
        }

        match &self.search {
            Some(term) => {
                book.title.to_lowercase().contains(term)
                    || book
                        .author
                        .as_deref()
                        .is_some_and(|a| a.to_lowercase().contains(term))
            }
            None => true,
        }
    }
}

/// Keep one row per (title, author): highest progress, then most recent creation date.
///
/// Groups keep the position of their first row.
pub fn dedup_books(rows: Vec<Book>) -> Vec<Book> {
    let mut slots: HashMap<(String, Option<String>), usize> = HashMap::new();
    let mut kept: Vec<Book> = Vec::new();

    for row in rows {
        let key = (row.title.clone(), row.author.clone());
        match slots.get(&key) {
            Some(&idx) => {
                if dominates(&row, &kept[idx]) {
                    kept[idx] = row;
                }
            }
            None => {
                slots.insert(key, kept.len());
                kept.push(row);
            }
        }
    }

    kept
}

fn dominates(candidate: &Book, current: &Book) -> bool {
    match candidate.percent_read.total_cmp(&current.percent_read) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => candidate.date_created > current.date_created,
    }
}

/// Started books first, then by descending progress, then by title (case-insensitive).
pub fn compare_books(a: &Book, b: &Book) -> Ordering {
    let bucket = |book: &Book| if book.percent_read > 0.0 { 0 } else { 1 };

    bucket(a)
        .cmp(&bucket(b))
        .then_with(|| b.percent_read.total_cmp(&a.percent_read))
        .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
}

/// Dedup, filter and order raw candidate rows into the listing order.
pub fn arrange_books(rows: Vec<Book>, query: &BookQuery) -> Vec<Book> {
    let mut books: Vec<Book> = dedup_books(rows)
        .into_iter()
        .filter(|book| query.matches(book))
        .collect();
    books.sort_by(compare_books);
    books
}

/// Pagination metadata returned alongside a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
    pub total_pages: usize,
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

/// `ceil(total / page_size)`, never less than 1.
pub fn total_pages(total: usize, page_size: usize) -> usize {
    if total == 0 || page_size == 0 {
        1
    } else {
        total.div_ceil(page_size)
    }
}

/// Slice a full, ordered result set into a 1-indexed page.
pub fn paginate<T>(items: Vec<T>, page: usize, page_size: usize) -> Page<T> {
    let page = page.max(1);
    let total = items.len();
    let offset = (page - 1).saturating_mul(page_size);

    let items = items.into_iter().skip(offset).take(page_size).collect();

    Page {
        items,
        pagination: Pagination {
            page,
            page_size,
            total,
            total_pages: total_pages(total, page_size),
        },
    }
}
