//! Chapter progress reconstruction and positional-token parsing.
//!
//! Kobo stores a bookmark's `ChapterProgress` relative to the section file
//! it sits in. EPUB converters often split one chapter ("part") into several
//! section files, so the raw value restarts at 0 in each split. Knowing the
//! `VolumeIndex` range spanned by the part's sections turns the raw value into
//! progress through the whole chapter:
//!
//! ```text
//! true = (section_index - min_index + raw) / (max_index - min_index + 1)
//! ```

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::{CoreError, Result};
use crate::types::{Highlight, Markup};

/// Default rule for the part identifier embedded in section content IDs.
pub const DEFAULT_PART_PATTERN: &str = r"part\d+";

static SPAN_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^span#([\w.]+)$").expect("valid regex"));

static POINT_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^point\((/[\d/]+:\d+)\)").expect("valid regex"));

/// Extraction rule for part identifiers, e.g. `part0007` out of
/// `volume!OEBPS!Text/part0007_split_002.html`.
#[derive(Debug, Clone)]
pub struct PartPattern {
    regex: Regex,
}

impl PartPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|e| CoreError::InvalidPartPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { regex })
    }

    /// First match of the rule in a content ID.
    pub fn extract<'a>(&self, content_id: &'a str) -> Option<&'a str> {
        self.regex.find(content_id).map(|m| m.as_str())
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

impl Default for PartPattern {
    fn default() -> Self {
        Self {
            regex: Regex::new(DEFAULT_PART_PATTERN).expect("valid regex"),
        }
    }
}

/// `VolumeIndex` range of the depth-0 sections that make up one part.
#[derive(Debug, Clone, PartialEq)]
pub struct PartRange {
    pub min_index: i64,
    pub max_index: i64,
    /// Title of the part's first section.
    pub chapter_name: Option<String>,
}

impl PartRange {
    pub fn total_sections(&self) -> i64 {
        self.max_index - self.min_index + 1
    }
}

/// Progress through the whole part, clamped to `[0, 1]`.
///
/// A degenerate range (no sections) yields the raw value unchanged.
pub fn true_chapter_progress(range: &PartRange, section_index: i64, raw: f64) -> f64 {
    let total = range.total_sections();
    if total <= 0 {
        return raw;
    }

    let position = (section_index - range.min_index) as f64;
    ((position + raw) / total as f64).clamp(0.0, 1.0)
}

/// A bookmark row that can carry reconstructed chapter progress.
pub trait ChapterPositioned {
    fn section_content_id(&self) -> Option<&str>;
    fn section_index(&self) -> Option<i64>;
    fn raw_progress(&self) -> Option<f64>;
    fn set_true_progress(&mut self, value: Option<f64>);
    fn set_chapter_name(&mut self, name: Option<String>);
}

impl ChapterPositioned for Highlight {
    fn section_content_id(&self) -> Option<&str> {
        self.content_id.as_deref()
    }

    fn section_index(&self) -> Option<i64> {
        self.section_index
    }

    fn raw_progress(&self) -> Option<f64> {
        self.chapter_progress
    }

    fn set_true_progress(&mut self, value: Option<f64>) {
        self.true_chapter_progress = value;
    }

    fn set_chapter_name(&mut self, name: Option<String>) {
        self.chapter_name = name;
    }
}

impl ChapterPositioned for Markup {
    fn section_content_id(&self) -> Option<&str> {
        self.bookmark.section_content_id()
    }

    fn section_index(&self) -> Option<i64> {
        self.bookmark.section_index()
    }

    fn raw_progress(&self) -> Option<f64> {
        self.bookmark.raw_progress()
    }

    fn set_true_progress(&mut self, value: Option<f64>) {
        self.bookmark.set_true_progress(value);
    }

    fn set_chapter_name(&mut self, name: Option<String>) {
        self.bookmark.set_chapter_name(name);
    }
}

/// Distinct part identifiers, in order of first appearance.
pub fn distinct_parts<B: ChapterPositioned>(bookmarks: &[B], pattern: &PartPattern) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    for bookmark in bookmarks {
        if let Some(part) = bookmark.section_content_id().and_then(|id| pattern.extract(id)) {
            if !parts.iter().any(|p| p == part) {
                parts.push(part.to_string());
            }
        }
    }
    parts
}

/// Fill in true chapter progress from per-part ranges.
///
/// Bookmarks without a part identifier get `None`. Bookmarks whose part has
/// no usable range or whose section index is unknown keep the raw value.
pub fn reconstruct<B: ChapterPositioned>(
    bookmarks: &mut [B],
    pattern: &PartPattern,
    ranges: &HashMap<String, PartRange>,
) {
    for bookmark in bookmarks.iter_mut() {
        let part = bookmark
            .section_content_id()
            .and_then(|id| pattern.extract(id))
            .map(str::to_string);

        let Some(part) = part else {
            bookmark.set_true_progress(None);
            continue;
        };

        let raw = bookmark.raw_progress().unwrap_or(0.0);
        let range = ranges.get(&part);

        let value = match (range, bookmark.section_index()) {
            (Some(range), Some(index)) => true_chapter_progress(range, index, raw),
            _ => raw,
        };

        bookmark.set_true_progress(Some(value));
        bookmark.set_chapter_name(range.and_then(|r| r.chapter_name.clone()));
    }
}

/// Mark every bookmark's reconstructed progress as unavailable.
pub fn clear_reconstruction<B: ChapterPositioned>(bookmarks: &mut [B]) {
    for bookmark in bookmarks.iter_mut() {
        bookmark.set_true_progress(None);
    }
}

/// Ordering token from a `StartContainerPath`.
///
/// - `span#kobo.16.2` → `kobo.16.2`
/// - `point(/1/4/2:37)` → `.1.4.2.37`
pub fn extract_ordering_number(start_container_path: &str) -> Option<String> {
    let raw = SPAN_PATH
        .captures(start_container_path)
        .or_else(|| POINT_PATH.captures(start_container_path))
        .and_then(|caps| caps.get(1))?
        .as_str();

    let dotted = raw.replace([':', '/'], ".");
    (!dotted.is_empty()).then_some(dotted)
}

/// Leading segment of the last path component of an `adobe_location`,
/// e.g. `OEBPS/part0003.xhtml#point(/1/2:0)` → `part0003`.
pub fn extract_book_part_number(adobe_location: &str) -> Option<String> {
    let last = adobe_location.rsplit('/').next()?;
    let head = last.split('.').next()?;
    (!head.is_empty()).then(|| head.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn highlight(content_id: Option<&str>, index: Option<i64>, raw: Option<f64>) -> Highlight {
        Highlight {
            bookmark_id: "bm".to_string(),
            volume_id: "vol".to_string(),
            content_id: content_id.map(String::from),
            text: None,
            annotation: None,
            date_created: None,
            chapter_progress: raw,
            start_container_path: None,
            section_title: None,
            section_index: index,
            chapter_name: None,
            true_chapter_progress: None,
            ordering_number: None,
        }
    }

    fn range(min: i64, max: i64) -> PartRange {
        PartRange {
            min_index: min,
            max_index: max,
            chapter_name: Some("Chapter Three".to_string()),
        }
    }

    #[test]
    fn test_true_progress_mid_split() {
        assert_eq!(true_chapter_progress(&range(10, 12), 11, 0.5), 0.5);
    }

    #[test]
    fn test_true_progress_first_and_last_split() {
        assert!((true_chapter_progress(&range(10, 12), 10, 0.3) - 0.1).abs() < 1e-9);
        assert_eq!(true_chapter_progress(&range(10, 12), 12, 1.0), 1.0);
    }

    #[test]
    fn test_true_progress_is_clamped() {
        assert_eq!(true_chapter_progress(&range(10, 12), 20, 0.5), 1.0);
        assert_eq!(true_chapter_progress(&range(10, 12), 5, 0.5), 0.0);
    }

    #[test]
    fn test_degenerate_range_returns_raw() {
        assert_eq!(true_chapter_progress(&range(12, 10), 11, 0.42), 0.42);
    }

    #[test]
    fn test_part_pattern_extracts_token() {
        let pattern = PartPattern::default();
        assert_eq!(
            pattern.extract("vol!OEBPS!Text/part0007_split_002.html"),
            Some("part0007")
        );
        assert_eq!(pattern.extract("vol!OEBPS!chapter1.html"), None);
    }

    #[test]
    fn test_custom_part_pattern() {
        let pattern = PartPattern::new(r"ch\d{2}").unwrap();
        assert_eq!(pattern.extract("vol!!ch03-split-1.xhtml"), Some("ch03"));
    }

    #[test]
    fn test_invalid_part_pattern_is_rejected() {
        assert!(PartPattern::new(r"part(\d+").is_err());
    }

    #[test]
    fn test_reconstruct_uses_ranges() {
        let pattern = PartPattern::default();
        let mut bookmarks = vec![
            highlight(Some("vol!Text/part0003_split_001.html"), Some(11), Some(0.5)),
            highlight(Some("vol!Text/cover.html"), Some(0), Some(0.2)),
            highlight(Some("vol!Text/part0009.html"), Some(40), Some(0.25)),
        ];

        let mut ranges = HashMap::new();
        ranges.insert("part0003".to_string(), range(10, 12));

        reconstruct(&mut bookmarks, &pattern, &ranges);

        assert_eq!(bookmarks[0].true_chapter_progress, Some(0.5));
        assert_eq!(bookmarks[0].chapter_name.as_deref(), Some("Chapter Three"));
        // No part token.
        assert_eq!(bookmarks[1].true_chapter_progress, None);
        // Part token but no range: raw value.
        assert_eq!(bookmarks[2].true_chapter_progress, Some(0.25));
        assert_eq!(bookmarks[2].chapter_name, None);
    }

    #[test]
    fn test_reconstruct_missing_section_index_keeps_raw() {
        let pattern = PartPattern::default();
        let mut bookmarks = vec![highlight(Some("vol!part0003.html"), None, Some(0.7))];
        let mut ranges = HashMap::new();
        ranges.insert("part0003".to_string(), range(10, 12));

        reconstruct(&mut bookmarks, &pattern, &ranges);
        assert_eq!(bookmarks[0].true_chapter_progress, Some(0.7));
    }

    #[test]
    fn test_distinct_parts_preserves_first_appearance() {
        let pattern = PartPattern::default();
        let bookmarks = vec![
            highlight(Some("v!part0002.html"), None, None),
            highlight(Some("v!part0001.html"), None, None),
            highlight(Some("v!part0002_split_001.html"), None, None),
            highlight(None, None, None),
        ];
        assert_eq!(
            distinct_parts(&bookmarks, &pattern),
            vec!["part0002".to_string(), "part0001".to_string()]
        );
    }

    #[test]
    fn test_clear_reconstruction() {
        let mut bookmarks = vec![highlight(Some("v!part0001.html"), Some(1), Some(0.5))];
        bookmarks[0].true_chapter_progress = Some(0.5);
        clear_reconstruction(&mut bookmarks);
        assert_eq!(bookmarks[0].true_chapter_progress, None);
    }

    #[test]
    fn test_ordering_number_span() {
        assert_eq!(extract_ordering_number("span#kobo.16.2"), Some("kobo.16.2".to_string()));
    }

    #[test]
    fn test_ordering_number_point() {
        assert_eq!(extract_ordering_number("point(/1/4/2:37)"), Some(".1.4.2.37".to_string()));
    }

    #[test]
    fn test_ordering_number_unrecognised() {
        assert_eq!(extract_ordering_number(""), None);
        assert_eq!(extract_ordering_number("div#kobo.1.1"), None);
        assert_eq!(extract_ordering_number("span#kobo.1 extra"), None);
    }

    #[test]
    fn test_book_part_number() {
        assert_eq!(
            extract_book_part_number("OEBPS/Text/part0003.xhtml#point(/1/2:0)"),
            Some("part0003".to_string())
        );
        assert_eq!(extract_book_part_number("chapter1.html"), Some("chapter1".to_string()));
        assert_eq!(extract_book_part_number(""), None);
        assert_eq!(extract_book_part_number("OEBPS/"), None);
    }
}
