//! Search sources ("indexers") and the uniform search-result contract.
//!
//! Every external search protocol is wrapped in one type implementing
//! [`Indexer`]. Implementations differ in transport and parsing but share the
//! contract: search with a [`SearchQuery`], return a list of
//! [`SearchResult`]s, test connectivity, and resolve a result's download
//! locator.
//!
//! # Architecture
//!
//! - [`Indexer`] - Async trait that individual adapters implement
//! - [`IndexerRegistry`] - Priority-ordered collection of adapters
//! - [`SessionJsonIndexer`] - JSON search API authenticated by a session cookie
//! - [`TorznabIndexer`] - Torznab/Newznab syndication feed search
//! - [`ScrapeIndexer`] - Best-effort HTML scrape of a search page
//! - [`format`] - Shared format, bitrate and duration detection
//! - [`lenient`] - Tolerant decoders for inconsistently typed JSON fields

mod error;
pub mod format;
pub mod lenient;
mod registry;
mod scrape;
mod session_json;
mod torznab;
pub(crate) mod utils;

pub use error::{IndexerError, IndexerErrorKind};
pub use registry::IndexerRegistry;
pub use scrape::{MAX_SCRAPE_RESULTS, ScrapeIndexer};
pub use session_json::SessionJsonIndexer;
pub use torznab::TorznabIndexer;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::IndexerConfig;
use crate::http_client::HttpSettings;
use crate::quality::QualityScore;

/// Kind of media being acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    /// Text books (EPUB, AZW3, MOBI, PDF, comics).
    Ebook,
    /// Spoken-word audio (M4B, M4A, MP3).
    Audiobook,
}

impl MediaType {
    /// Returns the stable string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ebook => "ebook",
            Self::Audiobook => "audiobook",
        }
    }

    /// Returns true for audiobooks.
    #[must_use]
    pub fn is_audiobook(&self) -> bool {
        matches!(self, Self::Audiobook)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ebook" | "book" => Ok(Self::Ebook),
            "audiobook" | "audio" => Ok(Self::Audiobook),
            _ => Err(format!("invalid media type: {s}")),
        }
    }
}

/// The wire protocol an indexer speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexerProtocol {
    /// JSON search API behind a session cookie.
    SessionJson,
    /// Torznab/Newznab syndication feed.
    Torznab,
    /// HTML search page scrape.
    Scrape,
}

impl IndexerProtocol {
    /// Returns the stable string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionJson => "session_json",
            Self::Torznab => "torznab",
            Self::Scrape => "scrape",
        }
    }
}

impl fmt::Display for IndexerProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a result's locator is fetched: which kind of download client can take it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadProtocol {
    /// Magnet links or `.torrent` URLs.
    Torrent,
    /// NZB URLs.
    Usenet,
    /// Plain HTTP(S) file URLs.
    Direct,
}

impl DownloadProtocol {
    /// Returns the stable string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Torrent => "torrent",
            Self::Usenet => "usenet",
            Self::Direct => "direct",
        }
    }
}

impl fmt::Display for DownloadProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable search request.
///
/// The search orchestrator derives narrower or broader variants from one
/// logical query; adapters only read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// Free-text title.
    pub title: String,
    /// Optional author name.
    pub author: Option<String>,
    /// Optional ISBN.
    pub isbn: Option<String>,
    /// Optional external catalog identifier (e.g. ASIN).
    pub external_id: Option<String>,
    /// Media type filter.
    pub media_type: MediaType,
}

impl SearchQuery {
    /// Creates a title-only query.
    #[must_use]
    pub fn new(title: impl Into<String>, media_type: MediaType) -> Self {
        Self {
            title: title.into(),
            author: None,
            isbn: None,
            external_id: None,
            media_type,
        }
    }

    /// Sets the author.
    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Sets the ISBN.
    #[must_use]
    pub fn with_isbn(mut self, isbn: impl Into<String>) -> Self {
        self.isbn = Some(isbn.into());
        self
    }

    /// Sets the external catalog identifier.
    #[must_use]
    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    /// Returns the author when present and non-blank.
    #[must_use]
    pub fn author(&self) -> Option<&str> {
        non_blank(self.author.as_deref())
    }

    /// Returns the best identifier: ISBN first, then the external id.
    #[must_use]
    pub fn identifier(&self) -> Option<&str> {
        non_blank(self.isbn.as_deref()).or_else(|| non_blank(self.external_id.as_deref()))
    }

    /// Free text for adapters: `"author title"`, trimmed.
    #[must_use]
    pub fn free_text(&self) -> String {
        let title = self.title.trim();
        match self.author() {
            Some(author) if !title.is_empty() => format!("{author} {title}"),
            Some(author) => author.to_string(),
            None => title.to_string(),
        }
    }

    /// Text an adapter should send: free text, or the identifier when there is none.
    #[must_use]
    pub fn search_text(&self) -> String {
        let text = self.free_text();
        if text.is_empty() {
            self.identifier().unwrap_or_default().to_string()
        } else {
            text
        }
    }

    /// True when neither free text nor an identifier is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.free_text().is_empty() && self.identifier().is_none()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// One candidate found by an indexer.
///
/// Results are ephemeral: they live only as long as the decision that
/// consumes them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    /// Release title as reported by the source.
    pub title: String,
    /// Author when the source reports one.
    pub author: Option<String>,
    /// Size in bytes (0 when unknown).
    pub size_bytes: u64,
    /// Normalized uppercase format tag (`EPUB`, `M4B`, ...) or `Unknown`.
    pub format: String,
    /// Seeders (torrent sources only).
    pub seeders: u32,
    /// Leechers (torrent sources only).
    pub leechers: u32,
    /// Source-specific freeleech flag.
    pub freeleech: bool,
    /// Source-specific VIP flag.
    pub vip: bool,
    /// Bitrate in kbps (audiobooks only).
    pub bitrate_kbps: Option<u32>,
    /// Duration in seconds (audiobooks only).
    pub duration_secs: Option<u64>,
    /// Language code when known.
    pub language: Option<String>,
    /// Name of the indexer that produced this result.
    pub source: String,
    /// Provider-specific download locator (URL, magnet, or opaque token).
    pub download_locator: String,
    /// Populated by the quality selector.
    pub quality: Option<QualityScore>,
}

impl SearchResult {
    /// Creates a result with the required fields; everything else defaults.
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        format: impl Into<String>,
        source: impl Into<String>,
        download_locator: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            author: None,
            size_bytes: 0,
            format: format.into(),
            seeders: 0,
            leechers: 0,
            freeleech: false,
            vip: false,
            bitrate_kbps: None,
            duration_secs: None,
            language: None,
            source: source.into(),
            download_locator: download_locator.into(),
            quality: None,
        }
    }

    /// Returns the assigned quality score, or 0 when unscored.
    #[must_use]
    pub fn score(&self) -> i32 {
        self.quality.as_ref().map_or(0, |q| q.score)
    }
}

/// Trait that all search sources implement.
///
/// # Object Safety
///
/// Uses `async_trait` to support dynamic dispatch via `Arc<dyn Indexer>`.
#[async_trait]
pub trait Indexer: Send + Sync {
    /// Returns the configured adapter name (unique within a registry).
    fn name(&self) -> &str;

    /// Returns the wire protocol this adapter speaks.
    fn protocol(&self) -> IndexerProtocol;

    /// Returns the protocol of the locators this adapter produces.
    fn download_protocol(&self) -> DownloadProtocol;

    /// Priority; lower values are searched first.
    fn priority(&self) -> i32;

    /// Searches the source.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError`] for network, authentication, or parse failures.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, IndexerError>;

    /// Verifies the source is reachable and the credentials are accepted.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError`] with the same kinds as [`Indexer::search`].
    async fn test_connection(&self) -> Result<(), IndexerError>;

    /// Resolves the locator a download client should receive for `result`.
    ///
    /// Most sources already return a usable locator; adapters that need an
    /// extra round-trip override this.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError`] when resolution needs the network and fails.
    async fn resolve_download_locator(
        &self,
        result: &SearchResult,
    ) -> Result<String, IndexerError> {
        Ok(result.download_locator.clone())
    }
}

/// Builds the adapter for one `[[indexers]]` entry.
///
/// # Errors
///
/// Returns [`IndexerError::Config`] when the entry's connection parameters are
/// unusable.
pub fn build_indexer(
    config: &IndexerConfig,
    http: &HttpSettings,
) -> Result<Arc<dyn Indexer>, IndexerError> {
    let indexer: Arc<dyn Indexer> = match config.kind {
        IndexerProtocol::SessionJson => Arc::new(SessionJsonIndexer::new(config, http)?),
        IndexerProtocol::Torznab => Arc::new(TorznabIndexer::new(config, http)?),
        IndexerProtocol::Scrape => Arc::new(ScrapeIndexer::new(config, http)?),
    };
    Ok(indexer)
}
