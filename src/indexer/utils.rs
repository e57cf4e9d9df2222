//! Shared helpers for adapter modules: static regexes, URL joining, HTML text
//! cleanup, and auth/back-off detection.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::header::RETRY_AFTER;
use url::Url;

use super::IndexerError;
use crate::rate_limiter::{RateLimiter, parse_retry_after};

/// Compiles a regex at static init; panics on invalid pattern.
pub(crate) fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"(?s)<[^>]*>"));

static LOGIN_FORM_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?is)<form[^>]*(?:login|takelogin)|type\s*=\s*["']password["']"#)
});

/// Resolves a possibly relative URL string against a base URL.
///
/// Returns the value as-is if it already starts with `http://`, `https://` or
/// `magnet:`; normalizes `//...` to `https:...`; otherwise joins with `base_url`.
#[must_use]
pub(crate) fn absolutize_url(value: &str, base_url: &Url) -> Option<String> {
    if value.starts_with("http://") || value.starts_with("https://") || value.starts_with("magnet:")
    {
        return Some(value.to_string());
    }
    if value.starts_with("//") {
        return Some(format!("https:{value}"));
    }
    base_url.join(value).ok().map(|url| url.to_string())
}

/// Parses a configured base URL, ensuring a trailing slash so relative joins
/// keep any path prefix.
pub(crate) fn parse_base_url(indexer: &str, raw: &str) -> Result<Url, IndexerError> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&with_slash)
        .map_err(|e| IndexerError::config(indexer, format!("invalid base_url '{raw}': {e}")))
}

/// Returns true if the HTTP status code indicates authentication is required.
#[must_use]
pub(crate) fn is_auth_required_status(status: u16) -> bool {
    matches!(status, 401 | 403 | 407)
}

/// Returns true when a body looks like an HTML login page rather than data.
#[must_use]
pub(crate) fn looks_like_login_page(body: &str) -> bool {
    let head = body.trim_start();
    let is_html = head.starts_with('<')
        && head.get(..512).unwrap_or(head).to_ascii_lowercase().contains("html");
    is_html && LOGIN_FORM_RE.is_match(body)
}

/// Decodes the handful of HTML entities that appear in titles.
#[must_use]
pub(crate) fn decode_html_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
}

/// Removes tags and collapses whitespace.
#[must_use]
pub(crate) fn strip_tags(html: &str) -> String {
    let without_tags = TAG_RE.replace_all(html, " ");
    decode_html_entities(&without_tags)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Records a server back-off on `limiter` when the response asks for one.
pub(crate) async fn honor_retry_after(
    limiter: &RateLimiter,
    url: &str,
    response: &reqwest::Response,
) {
    let status = response.status().as_u16();
    if status != 429 && status != 503 {
        return;
    }
    if let Some(delay) = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_retry_after)
    {
        limiter.record_retry_after(url, delay).await;
    }
}
