//! Core types for the Kobo library replica.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Content category derived from a Kobo `MimeType` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentCategory {
    Book,
    Article,
    Pdf,
    Notebook,
    Other,
}

impl ContentCategory {
    /// Classify a MIME-type-like string.
    ///
    /// Rules are checked in order; the first match wins:
    /// 1. missing or blank → `Other`
    /// 2. contains `notebook` or `x-kobo-nb` → `Notebook`
    /// 3. contains `pdf` → `Pdf`
    /// 4. contains `pocket`, `instapaper` or `html` → `Article`
    /// 5. contains `epub` or `mobi`, or starts with `application/x-kobo` → `Book`
    /// 6. anything else → `Other`
    pub fn from_mime_type(mime: Option<&str>) -> Self {
        let mime = match mime.map(str::trim) {
            Some(m) if !m.is_empty() => m.to_lowercase(),
            _ => return Self::Other,
        };

        if mime.contains("notebook") || mime.contains("x-kobo-nb") {
            Self::Notebook
        } else if mime.contains("pdf") {
            Self::Pdf
        } else if mime.contains("pocket") || mime.contains("instapaper") || mime.contains("html") {
            Self::Article
        } else if mime.contains("epub")
            || mime.contains("mobi")
            || mime.starts_with("application/x-kobo")
        {
            Self::Book
        } else {
            Self::Other
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Book => "book",
            Self::Article => "article",
            Self::Pdf => "pdf",
            Self::Notebook => "notebook",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ContentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentCategory {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "book" => Ok(Self::Book),
            "article" => Ok(Self::Article),
            "pdf" => Ok(Self::Pdf),
            "notebook" => Ok(Self::Notebook),
            "other" => Ok(Self::Other),
            other => Err(CoreError::UnknownContentType(other.to_string())),
        }
    }
}

/// A book as surfaced by listings: one representative row per (title, author).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub content_id: String,
    pub title: String,
    pub author: Option<String>,
    pub date_created: Option<String>,
    /// Reading progress, 0.0 - 1.0.
    pub percent_read: f64,
    pub image_url: Option<String>,
    pub isbn: Option<String>,
    pub mime_type: Option<String>,
    pub category: ContentCategory,
}

/// A highlight bookmark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub bookmark_id: String,
    pub volume_id: String,
    /// Content ID of the section the bookmark sits in.
    pub content_id: Option<String>,
    pub text: Option<String>,
    pub annotation: Option<String>,
    pub date_created: Option<String>,
    /// Raw progress within the section, 0.0 - 1.0.
    pub chapter_progress: Option<f64>,
    pub start_container_path: Option<String>,
    pub section_title: Option<String>,
    pub section_index: Option<i64>,
    pub chapter_name: Option<String>,
    /// Progress through the whole chapter, 0.0 - 1.0.
    pub true_chapter_progress: Option<f64>,
    pub ordering_number: Option<String>,
}

/// A markup: a bookmark carrying extra annotation data (drawn or handwritten).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Markup {
    #[serde(flatten)]
    pub bookmark: Highlight,
    pub extra_annotation_data: Option<String>,
    pub adobe_location: Option<String>,
    pub book_part_number: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_kobo_epub() {
        assert_eq!(
            ContentCategory::from_mime_type(Some("application/x-kobo-epub+zip")),
            ContentCategory::Book
        );
        assert_eq!(
            ContentCategory::from_mime_type(Some("application/epub+zip")),
            ContentCategory::Book
        );
    }

    #[test]
    fn test_classify_pocket_article() {
        assert_eq!(
            ContentCategory::from_mime_type(Some("application/x-kobo-html+pocket")),
            ContentCategory::Article
        );
    }

    #[test]
    fn test_classify_pdf() {
        assert_eq!(
            ContentCategory::from_mime_type(Some("application/pdf")),
            ContentCategory::Pdf
        );
    }

    #[test]
    fn test_classify_notebook() {
        assert_eq!(
            ContentCategory::from_mime_type(Some("application/x-kobo-nb+html")),
            ContentCategory::Notebook
        );
    }

    #[test]
    fn test_classify_missing_or_unknown() {
        assert_eq!(ContentCategory::from_mime_type(None), ContentCategory::Other);
        assert_eq!(ContentCategory::from_mime_type(Some("  ")), ContentCategory::Other);
        assert_eq!(
            ContentCategory::from_mime_type(Some("audio/mpeg")),
            ContentCategory::Other
        );
    }

    #[test]
    fn test_classify_is_case_insensitive() {
        assert_eq!(
            ContentCategory::from_mime_type(Some("Application/PDF")),
            ContentCategory::Pdf
        );
    }

    #[test]
    fn test_category_from_str() {
        assert_eq!("Article".parse::<ContentCategory>().unwrap(), ContentCategory::Article);
        assert!("magazine".parse::<ContentCategory>().is_err());
    }

    #[test]
    fn test_category_display_matches_from_str() {
        for category in [
            ContentCategory::Book,
            ContentCategory::Article,
            ContentCategory::Pdf,
            ContentCategory::Notebook,
            ContentCategory::Other,
        ] {
            assert_eq!(category.to_string().parse::<ContentCategory>().unwrap(), category);
        }
    }
}
