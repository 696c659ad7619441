//! Book cover lookup.
//!
//! Covers come from Open Library and Google Books and are cached in the blob
//! store under a content-addressed key, so each title is fetched online once.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::services::storage::{BlobStore, StorageError};

pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

const OPEN_LIBRARY_URL: &str = "https://openlibrary.org";
const OPEN_LIBRARY_COVERS_URL: &str = "https://covers.openlibrary.org";
const GOOGLE_BOOKS_URL: &str = "https://www.googleapis.com";

const GOOGLE_IMAGE_SIZES: [&str; 5] = ["large", "medium", "small", "thumbnail", "smallThumbnail"];

static NON_TITLE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s-]").expect("valid regex"));
static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

#[derive(Debug, Error)]
pub enum CoverError {
    #[error("HTTP client error: {0}")]
    Http(String),

    #[error("cover cache error: {0}")]
    Storage(#[from] StorageError),
}

/// A cover image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cover {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl Cover {
    pub fn new(bytes: Vec<u8>) -> Self {
        let content_type = sniff_content_type(&bytes).to_string();
        Self {
            bytes,
            content_type,
        }
    }
}

/// Finds a cover image for a title/author pair.
#[async_trait]
pub trait CoverResolver: Send + Sync {
    async fn resolve(&self, title: &str, author: Option<&str>) -> Result<Option<Cover>, CoverError>;
}

/// Image type from magic bytes; JPEG when unrecognized.
pub fn sniff_content_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        "image/png"
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        "image/gif"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

/// Drop punctuation and quotes, collapse whitespace.
pub fn simplify_title(title: &str) -> String {
    let replaced = NON_TITLE_CHARS.replace_all(title, " ");
    WHITESPACE_RUN.replace_all(&replaced, " ").trim().to_string()
}

/// Blob store key for a cached cover.
pub fn cache_key(prefix: &str, title: &str, author: Option<&str>) -> String {
    let normalized = format!(
        "{}|{}",
        title.trim().to_lowercase(),
        author.unwrap_or("").trim().to_lowercase()
    );
    format!("{}{:x}", prefix, Sha256::digest(normalized.as_bytes()))
}

#[derive(Debug, Default, Deserialize)]
struct OpenLibrarySearch {
    #[serde(default)]
    docs: Vec<OpenLibraryDoc>,
}

#[derive(Debug, Deserialize)]
struct OpenLibraryDoc {
    cover_i: Option<i64>,
    #[serde(default)]
    isbn: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GoogleVolumes {
    #[serde(default)]
    items: Vec<GoogleVolume>,
}

#[derive(Debug, Deserialize)]
struct GoogleVolume {
    #[serde(rename = "volumeInfo", default)]
    volume_info: GoogleVolumeInfo,
}

#[derive(Debug, Default, Deserialize)]
struct GoogleVolumeInfo {
    #[serde(rename = "imageLinks", default)]
    image_links: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy)]
enum Source {
    OpenLibrary,
    GoogleBooks,
}

/// Cascade over the public book APIs: Open Library then Google Books, each
/// with the full title and then the simplified one.
pub struct OnlineCoverProvider {
    client: Client,
    open_library_url: String,
    covers_url: String,
    google_books_url: String,
}

impl OnlineCoverProvider {
    pub fn new() -> Result<Self, CoverError> {
        Self::with_endpoints(OPEN_LIBRARY_URL, OPEN_LIBRARY_COVERS_URL, GOOGLE_BOOKS_URL)
    }

    pub fn with_endpoints(
        open_library_url: &str,
        covers_url: &str,
        google_books_url: &str,
    ) -> Result<Self, CoverError> {
        let client = Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()
            .map_err(|e| CoverError::Http(e.to_string()))?;

        Ok(Self {
            client,
            open_library_url: open_library_url.trim_end_matches('/').to_string(),
            covers_url: covers_url.trim_end_matches('/').to_string(),
            google_books_url: google_books_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch an image; `None` unless it answers 2xx with a non-empty body.
    async fn fetch_image(&self, url: &str) -> reqwest::Result<Option<Vec<u8>>> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            tracing::debug!("Cover request {} returned {}", url, response.status());
            return Ok(None);
        }
        let bytes = response.bytes().await?;
        Ok((!bytes.is_empty()).then(|| bytes.to_vec()))
    }

    async fn open_library(
        &self,
        title: &str,
        author: Option<&str>,
    ) -> reqwest::Result<Option<Vec<u8>>> {
        let query = match author {
            Some(author) => format!("{} {}", title, author),
            None => title.to_string(),
        };
        tracing::debug!("Searching Open Library for: {}", query);

        let search: OpenLibrarySearch = self
            .client
            .get(format!("{}/search.json", self.open_library_url))
            .query(&[("q", query.as_str()), ("limit", "1")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(doc) = search.docs.into_iter().next() else {
            return Ok(None);
        };

        if let Some(cover_id) = doc.cover_i {
            let url = format!("{}/b/id/{}-L.jpg", self.covers_url, cover_id);
            if let Some(bytes) = self.fetch_image(&url).await? {
                tracing::info!("Found cover from Open Library (cover_id: {})", cover_id);
                return Ok(Some(bytes));
            }
        }

        if let Some(isbn) = doc.isbn.first() {
            let url = format!("{}/b/isbn/{}-L.jpg", self.covers_url, isbn);
            if let Some(bytes) = self.fetch_image(&url).await? {
                tracing::info!("Found cover from Open Library (ISBN: {})", isbn);
                return Ok(Some(bytes));
            }
        }

        Ok(None)
    }

    async fn google_books(
        &self,
        title: &str,
        author: Option<&str>,
    ) -> reqwest::Result<Option<Vec<u8>>> {
        let query = match author {
            Some(author) => format!("intitle:{} inauthor:{}", title, author),
            None => format!("intitle:{}", title),
        };
        tracing::debug!("Searching Google Books for: {}", query);

        let volumes: GoogleVolumes = self
            .client
            .get(format!("{}/books/v1/volumes", self.google_books_url))
            .query(&[("q", query.as_str()), ("maxResults", "1")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(volume) = volumes.items.into_iter().next() else {
            return Ok(None);
        };

        for size in GOOGLE_IMAGE_SIZES {
            if let Some(link) = volume.volume_info.image_links.get(size) {
                let url = link.replacen("http://", "https://", 1);
                if let Some(bytes) = self.fetch_image(&url).await? {
                    tracing::info!("Found cover from Google Books (size: {})", size);
                    return Ok(Some(bytes));
                }
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl CoverResolver for OnlineCoverProvider {
    async fn resolve(
        &self,
        title: &str,
        author: Option<&str>,
    ) -> Result<Option<Cover>, CoverError> {
        let title = title.trim();
        if title.is_empty() {
            return Ok(None);
        }
        let author = author.map(str::trim).filter(|a| !a.is_empty());
        let simplified = simplify_title(title);
        let alternate =
            (simplified != title && !simplified.is_empty()).then_some(simplified.as_str());

        tracing::info!("Fetching cover for: '{}' by {}", title, author.unwrap_or("Unknown"));

        let mut attempts = vec![(Source::OpenLibrary, title)];
        attempts.extend(alternate.map(|t| (Source::OpenLibrary, t)));
        attempts.push((Source::GoogleBooks, title));
        attempts.extend(alternate.map(|t| (Source::GoogleBooks, t)));

        for (source, attempt_title) in attempts {
            let found = match source {
                Source::OpenLibrary => self.open_library(attempt_title, author).await,
                Source::GoogleBooks => self.google_books(attempt_title, author).await,
            };
            match found {
                Ok(Some(bytes)) => return Ok(Some(Cover::new(bytes))),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("{:?} lookup for '{}' failed: {}", source, attempt_title, e)
                }
            }
        }

        tracing::warn!("No cover found for: '{}' by {}", title, author.unwrap_or("Unknown"));
        Ok(None)
    }
}

/// Read-through cache in front of another resolver.
pub struct CachedCoverResolver<R> {
    store: Arc<dyn BlobStore>,
    prefix: String,
    inner: R,
}

impl<R: CoverResolver> CachedCoverResolver<R> {
    pub fn new(store: Arc<dyn BlobStore>, prefix: impl Into<String>, inner: R) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            inner,
        }
    }
}

#[async_trait]
impl<R: CoverResolver> CoverResolver for CachedCoverResolver<R> {
    async fn resolve(
        &self,
        title: &str,
        author: Option<&str>,
    ) -> Result<Option<Cover>, CoverError> {
        let key = cache_key(&self.prefix, title, author);

        match self.store.download(&key).await {
            Ok(bytes) if !bytes.is_empty() => {
                tracing::debug!("Cover cache hit {}", key);
                return Ok(Some(Cover::new(bytes)));
            }
            Ok(_) | Err(StorageError::NotFound(_)) => {}
            Err(e) => tracing::warn!("Cover cache read failed for {}: {}", key, e),
        }

        let Some(cover) = self.inner.resolve(title, author).await? else {
            return Ok(None);
        };

        if let Err(e) = self
            .store
            .upload(&key, &cover.bytes, Some(&cover.content_type))
            .await
        {
            tracing::warn!("Failed to cache cover {}: {}", key, e);
        }

        Ok(Some(cover))
    }
}
