//! Shared User-Agent strings for indexer and download client HTTP traffic.
//!
//! Single source for the project URL and UA format so API traffic stays
//! consistent and easy to update.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/acquirer";

/// Browser User-Agent used by scrape sources.
///
/// HTML sources frequently serve reduced or blocked markup to non-browser
/// agents, so scraping adapters send this instead of the tool UA.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Default User-Agent for API requests (single shared format; no per-adapter name in header).
#[must_use]
pub(crate) fn default_api_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("acquirer/{version} (media-acquisition; +{PROJECT_UA_URL})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_user_agent_contains_version_and_url() {
        let ua = default_api_user_agent();
        assert!(ua.contains(PROJECT_UA_URL), "UA must contain project URL");
        assert_eq!(
            env!("CARGO_PKG_VERSION"),
            ua.strip_prefix("acquirer/")
                .and_then(|s| s.split(' ').next())
                .unwrap_or_default(),
            "UA must contain crate version"
        );
    }

    #[test]
    fn test_browser_user_agent_looks_like_browser() {
        assert!(BROWSER_USER_AGENT.starts_with("Mozilla/5.0"));
        assert!(!BROWSER_USER_AGENT.contains("acquirer"));
    }
}
