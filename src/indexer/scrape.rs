//! Best-effort HTML scrape of a shadow-library style search page.
//!
//! Results are located by their `/md5/<hash>` detail anchors; the anchor
//! block holds the title (`<h3>`), an italic author line, and a metadata line
//! such as `English [en], epub, 2.1MB, "dune.epub"`. The markup drifts often,
//! so anything that does not parse is skipped rather than reported, and the
//! result count is capped.

use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

use super::format::{UNKNOWN_FORMAT, detect_format};
use super::lenient::parse_human_size;
use super::utils::{
    absolutize_url, compile_static_regex, honor_retry_after, parse_base_url, strip_tags,
};
use super::{DownloadProtocol, Indexer, IndexerError, IndexerProtocol, SearchQuery, SearchResult};
use crate::config::IndexerConfig;
use crate::http_client::{HttpSettings, build_http_client};
use crate::rate_limiter::RateLimiter;
use crate::user_agent::BROWSER_USER_AGENT;

/// Upper bound on results returned from one page.
pub const MAX_SCRAPE_RESULTS: usize = 50;

const SEARCH_PATH: &str = "search";

static RESULT_ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?is)<a\s[^>]*href\s*=\s*["'](/md5/([0-9a-f]{32}))["'][^>]*>(.*?)</a>"#)
});

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)<h3[^>]*>(.*?)</h3>"));

static AUTHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?is)<div[^>]*class\s*=\s*["'][^"']*italic[^"']*["'][^>]*>(.*?)</div>"#)
});

static META_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?is)<div[^>]*class\s*=\s*["'][^"']*text-(?:xs|gray)[^"']*["'][^>]*>(.*?)</div>"#)
});

static SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)\b(\d+(?:\.\d+)?\s*(?:[KMGT]i?B))\b"));

static LANGUAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"\[([a-z]{2,3})\]"));

static MIRROR_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#"(?is)<a\s[^>]*href\s*=\s*["']([^"']+)["'][^>]*>[^<]*(?:download|mirror|slow|fast|get)[^<]*</a>"#,
    )
});

/// HTML search page adapter.
pub struct ScrapeIndexer {
    name: String,
    base_url: Url,
    priority: i32,
    download_protocol: DownloadProtocol,
    client: Client,
    limiter: RateLimiter,
}

impl ScrapeIndexer {
    /// Builds the adapter from its config entry.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Config`] for a bad base URL or HTTP client
    /// construction failure.
    pub fn new(config: &IndexerConfig, http: &HttpSettings) -> Result<Self, IndexerError> {
        let base_url = parse_base_url(&config.name, &config.base_url)?;
        let client = build_http_client(&config.name, BROWSER_USER_AGENT, None, http)
            .map_err(|e| IndexerError::config(&config.name, e.to_string()))?;
        Ok(Self {
            name: config.name.clone(),
            base_url,
            priority: config.priority,
            download_protocol: config.download_protocol.unwrap_or(DownloadProtocol::Direct),
            client,
            limiter: RateLimiter::new(config.rate_limit()),
        })
    }

    async fn fetch_page(&self, url: Url) -> Result<String, IndexerError> {
        self.limiter.acquire(url.as_str()).await;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| IndexerError::from_reqwest(&self.name, &e))?;
        let status = response.status();
        honor_retry_after(&self.limiter, url.as_str(), &response).await;
        if !status.is_success() {
            return Err(IndexerError::network(&self.name, format!("HTTP {status}")));
        }
        response
            .text()
            .await
            .map_err(|e| IndexerError::network(&self.name, e.to_string()))
    }
}

impl std::fmt::Debug for ScrapeIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScrapeIndexer")
            .field("name", &self.name)
            .field("base_url", &self.base_url.as_str())
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Extracts results from a search page. Never fails; unparseable blocks are skipped.
fn parse_results(html: &str, base_url: &Url, source: &str) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    let mut results = Vec::new();

    for caps in RESULT_ANCHOR_RE.captures_iter(html) {
        if results.len() >= MAX_SCRAPE_RESULTS {
            break;
        }
        let (Some(href), Some(hash), Some(block)) = (caps.get(1), caps.get(2), caps.get(3)) else {
            continue;
        };
        if !seen.insert(hash.as_str().to_ascii_lowercase()) {
            continue;
        }
        let block = block.as_str();

        let title = HEADING_RE
            .captures(block)
            .and_then(|c| c.get(1))
            .map(|m| strip_tags(m.as_str()))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| strip_tags(block));
        if title.is_empty() {
            continue;
        }
        let Some(locator) = absolutize_url(href.as_str(), base_url) else {
            continue;
        };

        let meta = META_RE
            .captures(block)
            .and_then(|c| c.get(1))
            .map(|m| strip_tags(m.as_str()))
            .unwrap_or_default();
        let hint = meta
            .split(',')
            .map(str::trim)
            .find(|part| detect_format(Some(part), "") != UNKNOWN_FORMAT);

        let format = detect_format(hint, &title);
        let mut result = SearchResult::new(title.clone(), format, source, locator);
        result.author = AUTHOR_RE
            .captures(block)
            .and_then(|c| c.get(1))
            .map(|m| strip_tags(m.as_str()))
            .filter(|a| !a.is_empty());
        result.size_bytes = SIZE_RE
            .captures(&meta)
            .and_then(|c| c.get(1))
            .and_then(|m| parse_human_size(m.as_str()))
            .unwrap_or(0);
        result.language = LANGUAGE_RE
            .captures(&meta)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        results.push(result);
    }
    results
}

#[async_trait]
impl Indexer for ScrapeIndexer {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> IndexerProtocol {
        IndexerProtocol::Scrape
    }

    fn download_protocol(&self) -> DownloadProtocol {
        self.download_protocol
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    #[instrument(skip(self, query), fields(indexer = %self.name, text = %query.search_text()))]
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, IndexerError> {
        let mut url = self
            .base_url
            .join(SEARCH_PATH)
            .map_err(|e| {
                IndexerError::config(&self.name, format!("cannot build search URL: {e}"))
            })?;
        url.query_pairs_mut().append_pair("q", &query.search_text());

        let html = self.fetch_page(url).await?;
        let results = parse_results(&html, &self.base_url, &self.name);
        debug!(count = results.len(), "Scraped search page");
        Ok(results)
    }

    #[instrument(skip(self), fields(indexer = %self.name))]
    async fn test_connection(&self) -> Result<(), IndexerError> {
        self.fetch_page(self.base_url.clone()).await.map(|_| ())
    }

    /// Follows the detail page to its first download link; falls back to the
    /// detail page itself when none is found.
    #[instrument(skip(self, result), fields(indexer = %self.name))]
    async fn resolve_download_locator(
        &self,
        result: &SearchResult,
    ) -> Result<String, IndexerError> {
        let detail = Url::parse(&result.download_locator)
            .map_err(|e| IndexerError::parse(&self.name, format!("bad detail URL: {e}")))?;
        let html = self.fetch_page(detail.clone()).await?;
        let resolved = MIRROR_LINK_RE
            .captures_iter(&html)
            .filter_map(|c| c.get(1))
            .filter_map(|m| absolutize_url(m.as_str(), &detail))
            .find(|link| link.starts_with("http") && *link != detail.as_str());
        match resolved {
            Some(link) => {
                debug!(link = %link, "Resolved mirror link");
                Ok(link)
            }
            None => {
                debug!("No mirror link found, using detail page");
                Ok(result.download_locator.clone())
            }
        }
    }
}
