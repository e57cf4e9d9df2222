//! JSON search API authenticated with a browser session cookie.
//!
//! The tracker accepts a structured filter document (free text, which fields
//! to search, category, sort) and answers with a JSON row list whose numeric
//! fields flip between numbers and strings from one response to the next.
//! An expired session shows up as 401/403 or, on some deployments, as a 200
//! carrying the HTML login page.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};
use url::Url;

use super::format::{detect_format, extract_bitrate_kbps, extract_duration_secs};
use super::lenient::{LenientBool, LenientU64};
use super::utils::{
    honor_retry_after, is_auth_required_status, looks_like_login_page, parse_base_url,
};
use super::{
    DownloadProtocol, Indexer, IndexerError, IndexerProtocol, MediaType, SearchQuery, SearchResult,
};
use crate::config::IndexerConfig;
use crate::http_client::{HttpSettings, build_http_client};
use crate::rate_limiter::RateLimiter;
use crate::user_agent::default_api_user_agent;

/// Cookie name used when the configured cookie is a bare value.
pub const DEFAULT_SESSION_COOKIE_NAME: &str = "mam_id";

const SEARCH_PATH: &str = "tor/js/loadSearchJSONbasic.php";
const USER_INFO_PATH: &str = "jsonLoad.php";
const RESULTS_PER_PAGE: u32 = 100;

const AUDIOBOOK_CATEGORY: u32 = 13;
const EBOOK_CATEGORY: u32 = 14;

/// Session-cookie JSON search adapter.
pub struct SessionJsonIndexer {
    name: String,
    base_url: Url,
    cookie: String,
    categories: Vec<u32>,
    priority: i32,
    freeleech_only: bool,
    vip_only: bool,
    download_protocol: DownloadProtocol,
    client: Client,
    limiter: RateLimiter,
}

impl SessionJsonIndexer {
    /// Builds the adapter from its config entry.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Config`] when the base URL or session cookie is
    /// unusable, or the HTTP client cannot be built.
    pub fn new(config: &IndexerConfig, http: &HttpSettings) -> Result<Self, IndexerError> {
        let base_url = parse_base_url(&config.name, &config.base_url)?;
        let cookie = config
            .session_cookie
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| IndexerError::config(&config.name, "session_cookie is required"))?;
        let cookie = if cookie.contains('=') {
            cookie.to_string()
        } else {
            format!("{DEFAULT_SESSION_COOKIE_NAME}={cookie}")
        };
        let client = build_http_client(&config.name, default_api_user_agent(), None, http)
            .map_err(|e| IndexerError::config(&config.name, e.to_string()))?;

        Ok(Self {
            name: config.name.clone(),
            base_url,
            cookie,
            categories: config.categories.clone(),
            priority: config.priority,
            freeleech_only: config.freeleech_only,
            vip_only: config.vip_only,
            download_protocol: config.download_protocol.unwrap_or(DownloadProtocol::Torrent),
            client,
            limiter: RateLimiter::new(config.rate_limit()),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, IndexerError> {
        self.base_url
            .join(path)
            .map_err(|e| {
                IndexerError::config(&self.name, format!("cannot build URL for {path}: {e}"))
            })
    }

    fn search_type(&self) -> &'static str {
        match (self.freeleech_only, self.vip_only) {
            (true, true) => "fl-VIP",
            (true, false) => "fl",
            (false, true) => "VIP",
            (false, false) => "all",
        }
    }

    fn categories_for(&self, media_type: MediaType) -> Vec<String> {
        if self.categories.is_empty() {
            let default = match media_type {
                MediaType::Audiobook => AUDIOBOOK_CATEGORY,
                MediaType::Ebook => EBOOK_CATEGORY,
            };
            vec![default.to_string()]
        } else {
            self.categories.iter().map(ToString::to_string).collect()
        }
    }

    /// Builds the filter document for `query`.
    fn search_payload(&self, query: &SearchQuery) -> serde_json::Value {
        let text = query.search_text();
        let scope = if query.free_text().is_empty() {
            // identifier-only searches hit the description, where ISBN/ASIN live
            json!({ "description": true, "tags": true, "title": true })
        } else {
            json!({ "title": true, "author": true, "series": true })
        };
        json!({
            "tor": {
                "text": text,
                "srchIn": scope,
                "searchType": self.search_type(),
                "searchIn": "torrents",
                "main_cat": self.categories_for(query.media_type),
                "sortType": "seedersDesc",
                "startNumber": "0",
            },
            "perpage": RESULTS_PER_PAGE,
        })
    }

    async fn read_body(
        &self,
        url: &Url,
        response: reqwest::Response,
    ) -> Result<String, IndexerError> {
        let status = response.status();
        honor_retry_after(&self.limiter, url.as_str(), &response).await;
        if is_auth_required_status(status.as_u16()) {
            return Err(IndexerError::auth(&self.name, format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(IndexerError::network(&self.name, format!("HTTP {status}")));
        }
        let body = response
            .text()
            .await
            .map_err(|e| IndexerError::from_reqwest(&self.name, &e))?;
        if looks_like_login_page(&body) {
            return Err(IndexerError::auth(&self.name, "received login page instead of JSON"));
        }
        Ok(body)
    }

    fn row_to_result(&self, row: Row, media_type: MediaType) -> Option<SearchResult> {
        let title = row
            .title
            .or(row.name)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())?;

        let hint = row.filetype.as_deref();
        let mut result = SearchResult::new(
            title.clone(),
            detect_format(hint, &title),
            self.name.clone(),
            self.locator_for(row.dl.as_deref(), row.id.0),
        );
        result.author = row.author_info.as_deref().and_then(parse_author_info);
        result.size_bytes = row.size.0;
        result.seeders = u32::try_from(row.seeders.0).unwrap_or(u32::MAX);
        result.leechers = u32::try_from(row.leechers.0).unwrap_or(u32::MAX);
        result.freeleech = row.free.0 || row.personal_freeleech.0 || row.fl_vip.0;
        result.vip = row.vip.0;
        result.language = row.lang_code.filter(|l| !l.trim().is_empty());

        if media_type.is_audiobook() {
            let text = format!("{} {}", row.tags.as_deref().unwrap_or_default(), title);
            result.bitrate_kbps = extract_bitrate_kbps(&text);
            result.duration_secs = extract_duration_secs(&text);
        }
        Some(result)
    }

    fn locator_for(&self, dl_hash: Option<&str>, id: u64) -> String {
        let path = match dl_hash.map(str::trim).filter(|h| !h.is_empty()) {
            Some(hash) => format!("tor/download.php/{hash}"),
            None => format!("tor/download.php?tid={id}"),
        };
        self.base_url
            .join(&path)
            .map_or_else(|_| path.clone(), |url| url.to_string())
    }
}

impl std::fmt::Debug for SessionJsonIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionJsonIndexer")
            .field("name", &self.name)
            .field("base_url", &self.base_url.as_str())
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<Row>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Row {
    #[serde(default)]
    id: LenientU64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    author_info: Option<String>,
    #[serde(default)]
    size: LenientU64,
    #[serde(default)]
    seeders: LenientU64,
    #[serde(default)]
    leechers: LenientU64,
    #[serde(default)]
    free: LenientBool,
    #[serde(default)]
    personal_freeleech: LenientBool,
    #[serde(default)]
    fl_vip: LenientBool,
    #[serde(default)]
    vip: LenientBool,
    #[serde(default)]
    filetype: Option<String>,
    #[serde(default)]
    lang_code: Option<String>,
    #[serde(default)]
    tags: Option<String>,
    #[serde(default)]
    dl: Option<String>,
}

/// Author info arrives as a JSON object encoded inside a string: `{"12":"Name"}`.
fn parse_author_info(raw: &str) -> Option<String> {
    let authors: BTreeMap<String, String> = serde_json::from_str(raw).ok()?;
    let names: Vec<&str> = authors
        .values()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .collect();
    (!names.is_empty()).then(|| names.join(", "))
}

#[async_trait]
impl Indexer for SessionJsonIndexer {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> IndexerProtocol {
        IndexerProtocol::SessionJson
    }

    fn download_protocol(&self) -> DownloadProtocol {
        self.download_protocol
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    #[instrument(skip(self, query), fields(indexer = %self.name, text = %query.search_text()))]
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, IndexerError> {
        let url = self.endpoint(SEARCH_PATH)?;
        let payload = self.search_payload(query);

        self.limiter.acquire(url.as_str()).await;
        let response = self
            .client
            .post(url.clone())
            .header(COOKIE, &self.cookie)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_string())
            .send()
            .await
            .map_err(|e| IndexerError::from_reqwest(&self.name, &e))?;
        let body = self.read_body(&url, response).await?;

        let parsed: SearchResponse = serde_json::from_str(&body)
            .map_err(|e| {
                IndexerError::parse(&self.name, format!("unexpected search response: {e}"))
            })?;

        if parsed.data.is_empty() {
            if let Some(message) = parsed.error {
                let lower = message.to_ascii_lowercase();
                if ["log in", "login", "not logged"].iter().any(|m| lower.contains(m)) {
                    return Err(IndexerError::auth(&self.name, message));
                }
                debug!(message = %message, "Search returned no rows");
            }
            return Ok(Vec::new());
        }

        let results: Vec<SearchResult> = parsed
            .data
            .into_iter()
            .filter_map(|row| self.row_to_result(row, query.media_type))
            .filter(|result| !self.freeleech_only || result.freeleech)
            .collect();
        debug!(count = results.len(), "Parsed search rows");
        Ok(results)
    }

    #[instrument(skip(self), fields(indexer = %self.name))]
    async fn test_connection(&self) -> Result<(), IndexerError> {
        let url = self.endpoint(USER_INFO_PATH)?;
        self.limiter.acquire(url.as_str()).await;
        let response = self
            .client
            .get(url.clone())
            .header(COOKIE, &self.cookie)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| IndexerError::from_reqwest(&self.name, &e))?;
        let body = self.read_body(&url, response).await?;
        serde_json::from_str::<serde_json::Value>(&body)
            .map(|_| ())
            .map_err(|e| IndexerError::parse(&self.name, format!("user info is not JSON: {e}")))
    }
}
