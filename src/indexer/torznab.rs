//! Torznab/Newznab syndication feed search.
//!
//! A parameterized GET against `{base}/api` returns an RSS document. Each
//! `<item>` carries the usual RSS children plus vendor attributes written as
//! `<torznab:attr name="seeders" value="12"/>`; those are read by name since
//! feeds emit them in any order. Failures are reported in-band as a root
//! `<error code=".." description=".."/>` element.

use std::collections::HashMap;

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

use super::format::{detect_format, extract_bitrate_kbps, extract_duration_secs};
use super::lenient::{parse_human_size, parse_number_lenient};
use super::utils::{honor_retry_after, is_auth_required_status, parse_base_url};
use super::{
    DownloadProtocol, Indexer, IndexerError, IndexerProtocol, MediaType, SearchQuery, SearchResult,
};
use crate::config::IndexerConfig;
use crate::http_client::{HttpSettings, build_http_client};
use crate::rate_limiter::RateLimiter;
use crate::user_agent::default_api_user_agent;

const API_PATH: &str = "api";
const RESULT_LIMIT: &str = "100";

/// Newznab standard category: Books/EBook.
const EBOOK_CATEGORY: u32 = 7020;
/// Newznab standard category: Audio/Audiobook.
const AUDIOBOOK_CATEGORY: u32 = 3030;

/// Torznab/Newznab feed adapter.
pub struct TorznabIndexer {
    name: String,
    base_url: Url,
    api_key: String,
    categories: Vec<u32>,
    priority: i32,
    freeleech_only: bool,
    download_protocol: DownloadProtocol,
    client: Client,
    limiter: RateLimiter,
}

impl TorznabIndexer {
    /// Builds the adapter from its config entry.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Config`] for a bad base URL, a missing API key,
    /// or HTTP client construction failure.
    pub fn new(config: &IndexerConfig, http: &HttpSettings) -> Result<Self, IndexerError> {
        let base_url = parse_base_url(&config.name, &config.base_url)?;
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| IndexerError::config(&config.name, "api_key is required"))?
            .to_string();
        let client = build_http_client(&config.name, default_api_user_agent(), None, http)
            .map_err(|e| IndexerError::config(&config.name, e.to_string()))?;

        Ok(Self {
            name: config.name.clone(),
            base_url,
            api_key,
            categories: config.categories.clone(),
            priority: config.priority,
            freeleech_only: config.freeleech_only,
            download_protocol: config.download_protocol.unwrap_or(DownloadProtocol::Torrent),
            client,
            limiter: RateLimiter::new(config.rate_limit()),
        })
    }

    fn api_url(&self, params: &[(&str, &str)]) -> Result<Url, IndexerError> {
        let mut url = self
            .base_url
            .join(API_PATH)
            .map_err(|e| IndexerError::config(&self.name, format!("cannot build api URL: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
            pairs.append_pair("apikey", &self.api_key);
        }
        Ok(url)
    }

    fn categories_for(&self, media_type: MediaType) -> String {
        if self.categories.is_empty() {
            match media_type {
                MediaType::Ebook => EBOOK_CATEGORY.to_string(),
                MediaType::Audiobook => AUDIOBOOK_CATEGORY.to_string(),
            }
        } else {
            self.categories
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        }
    }

    async fn fetch(&self, url: Url) -> Result<String, IndexerError> {
        self.limiter.acquire(url.as_str()).await;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| IndexerError::from_reqwest(&self.name, &e))?;
        let status = response.status();
        honor_retry_after(&self.limiter, url.as_str(), &response).await;
        if is_auth_required_status(status.as_u16()) {
            return Err(IndexerError::auth(&self.name, format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(IndexerError::network(&self.name, format!("HTTP {status}")));
        }
        response
            .text()
            .await
            .map_err(|e| IndexerError::from_reqwest(&self.name, &e))
    }

    fn map_feed_error(&self, code: u32, description: String) -> IndexerError {
        match code {
            100..=199 => IndexerError::auth(&self.name, format!("feed error {code}: {description}")),
            200..=299 => {
                IndexerError::config(&self.name, format!("feed error {code}: {description}"))
            }
            _ => IndexerError::network(&self.name, format!("feed error {code}: {description}")),
        }
    }

    fn item_to_result(&self, item: FeedItem, media_type: MediaType) -> Option<SearchResult> {
        let title = item.title.trim().to_string();
        if title.is_empty() {
            return None;
        }
        let locator = item
            .enclosure_url
            .clone()
            .or_else(|| item.link.clone())
            .or_else(|| item.attr("magneturl").map(str::to_string))
            .filter(|l| !l.trim().is_empty())?;

        let format = detect_format(None, &title);
        let mut result = SearchResult::new(title.clone(), format, self.name.clone(), locator);
        result.size_bytes = item
            .size
            .or(item.enclosure_length)
            .or_else(|| item.attr("size").and_then(parse_human_size))
            .unwrap_or(0);
        let seeders = item.attr_u32("seeders").unwrap_or(0);
        result.seeders = seeders;
        result.leechers = item
            .attr_u32("leechers")
            .or_else(|| item.attr_u32("peers").map(|peers| peers.saturating_sub(seeders)))
            .unwrap_or(0);
        result.freeleech = item
            .attr("downloadvolumefactor")
            .and_then(parse_number_lenient)
            .is_some_and(|factor| factor.abs() < f64::EPSILON);
        result.author = item.attr("author").map(str::to_string);
        result.language = item.attr("language").map(str::to_string);

        if media_type.is_audiobook() {
            let text = format!("{} {}", title, item.description.as_deref().unwrap_or_default());
            result.bitrate_kbps = extract_bitrate_kbps(&text);
            result.duration_secs = extract_duration_secs(&text);
        }
        Some(result)
    }
}

impl std::fmt::Debug for TorznabIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TorznabIndexer")
            .field("name", &self.name)
            .field("base_url", &self.base_url.as_str())
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Indexer for TorznabIndexer {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> IndexerProtocol {
        IndexerProtocol::Torznab
    }

    fn download_protocol(&self) -> DownloadProtocol {
        self.download_protocol
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    #[instrument(skip(self, query), fields(indexer = %self.name, text = %query.search_text()))]
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, IndexerError> {
        let text = query.search_text();
        let categories = self.categories_for(query.media_type);
        let url = self.api_url(&[
            ("t", "search"),
            ("q", text.as_str()),
            ("cat", categories.as_str()),
            ("limit", RESULT_LIMIT),
        ])?;

        let body = self.fetch(url).await?;
        let items = match parse_feed(&body).map_err(|e| IndexerError::parse(&self.name, e))? {
            Feed::Items(items) => items,
            Feed::Error { code, description } => return Err(self.map_feed_error(code, description)),
        };

        let results: Vec<SearchResult> = items
            .into_iter()
            .filter_map(|item| self.item_to_result(item, query.media_type))
            .filter(|result| !self.freeleech_only || result.freeleech)
            .collect();
        debug!(count = results.len(), "Parsed feed items");
        Ok(results)
    }

    #[instrument(skip(self), fields(indexer = %self.name))]
    async fn test_connection(&self) -> Result<(), IndexerError> {
        let url = self.api_url(&[("t", "caps")])?;
        let body = self.fetch(url).await?;
        match parse_feed(&body) {
            Ok(Feed::Error { code, description }) => Err(self.map_feed_error(code, description)),
            _ if body.contains("<caps") => Ok(()),
            _ => Err(IndexerError::parse(&self.name, "capabilities document missing <caps>")),
        }
    }
}

#[derive(Debug, Default)]
struct FeedItem {
    title: String,
    link: Option<String>,
    description: Option<String>,
    size: Option<u64>,
    enclosure_url: Option<String>,
    enclosure_length: Option<u64>,
    attrs: HashMap<String, String>,
}

impl FeedItem {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    fn attr_u32(&self, name: &str) -> Option<u32> {
        self.attr(name)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
    }
}

#[derive(Debug)]
enum Feed {
    Items(Vec<FeedItem>),
    Error { code: u32, description: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemField {
    Title,
    Link,
    Description,
    Size,
}

fn attribute(element: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.trim().to_string()))
}

/// Parses an RSS/Torznab document into items, or the in-band error.
fn parse_feed(xml: &str) -> Result<Feed, String> {
    let mut reader = Reader::from_str(xml);
    let mut items = Vec::new();
    let mut current: Option<FeedItem> = None;
    let mut field: Option<ItemField> = None;
    let mut text = String::new();
    let mut saw_feed_root = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| format!("malformed XML at byte {}: {e}", reader.buffer_position()))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                let local = e.local_name();
                match local.as_ref() {
                    b"rss" | b"channel" => saw_feed_root = true,
                    b"error" if current.is_none() => {
                        let code = attribute(e, b"code").and_then(|c| c.parse().ok()).unwrap_or(0);
                        let description = attribute(e, b"description").unwrap_or_default();
                        return Ok(Feed::Error { code, description });
                    }
                    b"item" => current = Some(FeedItem::default()),
                    b"enclosure" => {
                        if let Some(item) = current.as_mut() {
                            item.enclosure_url = attribute(e, b"url");
                            item.enclosure_length =
                                attribute(e, b"length").and_then(|l| l.parse().ok());
                        }
                    }
                    b"attr" => {
                        let name = attribute(e, b"name");
                        if let (Some(item), Some(name)) = (current.as_mut(), name) {
                            let value = attribute(e, b"value").unwrap_or_default();
                            item.attrs.entry(name.to_ascii_lowercase()).or_insert(value);
                        }
                    }
                    name if current.is_some() && !is_empty => {
                        field = match name {
                            b"title" => Some(ItemField::Title),
                            b"link" => Some(ItemField::Link),
                            b"description" => Some(ItemField::Description),
                            b"size" => Some(ItemField::Size),
                            _ => None,
                        };
                        text.clear();
                    }
                    _ => {}
                }
            }
            Event::Text(ref t) if field.is_some() => {
                let unescaped = t.unescape().map_err(|e| format!("bad text escape: {e}"))?;
                text.push_str(&unescaped);
            }
            Event::CData(ref c) if field.is_some() => {
                text.push_str(&String::from_utf8_lossy(c));
            }
            Event::End(ref e) => {
                let local = e.local_name();
                if local.as_ref() == b"item" {
                    if let Some(item) = current.take() {
                        items.push(item);
                    }
                    field = None;
                } else if let (Some(kind), Some(item)) = (field.take(), current.as_mut()) {
                    let value = text.trim().to_string();
                    match kind {
                        ItemField::Title => item.title = value,
                        ItemField::Link => item.link = Some(value).filter(|v| !v.is_empty()),
                        ItemField::Description => item.description = Some(value),
                        ItemField::Size => item.size = value.parse().ok(),
                    }
                    text.clear();
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_feed_root {
        return Err("document is not an RSS feed".to_string());
    }
    Ok(Feed::Items(items))
}
