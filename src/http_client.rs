//! Shared HTTP client construction policy for indexers and download clients.
//!
//! Every adapter owns its own [`reqwest::Client`], built here so timeouts,
//! user-agent, compression, proxy compatibility and cookie support stay
//! consistent. Settings are passed in explicitly; there is no process-wide
//! client or timeout state.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::{Client, ClientBuilder, Proxy};
use thiserror::Error;
use tracing::warn;

/// Default connect timeout for adapter HTTP clients.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default whole-request timeout for adapter HTTP clients.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Timeout settings injected into every adapter client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpSettings {
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Upper bound for one request including the body.
    pub request_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl HttpSettings {
    /// Builds settings from whole-second values.
    #[must_use]
    pub fn from_secs(connect_timeout_secs: u64, request_timeout_secs: u64) -> Self {
        Self {
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            request_timeout: Duration::from_secs(request_timeout_secs),
        }
    }
}

/// HTTP client construction failed for an adapter.
#[derive(Debug, Clone, Error)]
#[error("HTTP client construction failed for '{adapter}': {reason}")]
pub struct HttpClientError {
    /// Adapter that requested the client.
    pub adapter: String,
    /// Why construction failed.
    pub reason: String,
}

/// Builds an adapter HTTP client using shared project policy.
///
/// `adapter_name` is used only for error messages and logging, never in the
/// User-Agent header.
///
/// # Errors
///
/// Returns [`HttpClientError`] when client construction fails.
pub fn build_http_client(
    adapter_name: &str,
    user_agent: impl Into<String>,
    cookie_jar: Option<Arc<Jar>>,
    settings: &HttpSettings,
) -> Result<Client, HttpClientError> {
    let user_agent = user_agent.into();

    match try_build_client(&user_agent, cookie_jar.clone(), settings, false) {
        Ok(client) => Ok(client),
        Err(BuildClientFailure::Panic) => {
            // Some sandboxed environments panic when querying system proxy
            // settings. Fall back to env-proxy lookup only.
            warn!(
                adapter = adapter_name,
                "HTTP client hit system proxy panic; using env-proxy fallback builder"
            );
            match try_build_client(&user_agent, cookie_jar, settings, true) {
                Ok(client) => Ok(client),
                Err(BuildClientFailure::Panic) => Err(HttpClientError {
                    adapter: adapter_name.to_string(),
                    reason: "client construction panicked while initializing networking"
                        .to_string(),
                }),
                Err(BuildClientFailure::Build(error)) => Err(HttpClientError {
                    adapter: adapter_name.to_string(),
                    reason: error.to_string(),
                }),
            }
        }
        Err(BuildClientFailure::Build(error)) => Err(HttpClientError {
            adapter: adapter_name.to_string(),
            reason: error.to_string(),
        }),
    }
}

enum BuildClientFailure {
    Panic,
    Build(reqwest::Error),
}

fn try_build_client(
    user_agent: &str,
    cookie_jar: Option<Arc<Jar>>,
    settings: &HttpSettings,
    disable_system_proxy_lookup: bool,
) -> Result<Client, BuildClientFailure> {
    let user_agent = user_agent.to_string();
    let settings = *settings;
    catch_unwind(AssertUnwindSafe(move || {
        let mut builder = base_builder(user_agent, cookie_jar, &settings);
        if disable_system_proxy_lookup {
            builder = apply_env_proxy_fallback(builder.no_proxy());
        }
        builder.build().map_err(BuildClientFailure::Build)
    }))
    .map_err(|_| BuildClientFailure::Panic)?
}

fn base_builder(
    user_agent: String,
    cookie_jar: Option<Arc<Jar>>,
    settings: &HttpSettings,
) -> ClientBuilder {
    let mut builder = Client::builder()
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.request_timeout)
        .user_agent(user_agent)
        .gzip(true);

    if let Some(jar) = cookie_jar {
        builder = builder.cookie_provider(jar);
    }

    builder
}

fn apply_env_proxy_fallback(mut builder: ClientBuilder) -> ClientBuilder {
    if let Some(proxy) = env_proxy_for_scheme("https")
        && let Ok(resolved) = Proxy::https(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    if let Some(proxy) = env_proxy_for_scheme("http")
        && let Ok(resolved) = Proxy::http(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    builder
}

fn env_proxy_for_scheme(scheme: &str) -> Option<String> {
    match scheme {
        "https" => find_first_proxy_var(&["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"]),
        "http" => find_first_proxy_var(&["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"]),
        _ => None,
    }
}

fn find_first_proxy_var(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

/// Joins `path` onto `base_url` without doubling or dropping slashes.
#[must_use]
pub fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_settings_default_matches_constants() {
        let settings = HttpSettings::default();
        assert_eq!(settings.connect_timeout, Duration::from_secs(10));
        assert_eq!(settings.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_build_http_client_succeeds_with_defaults() {
        let client = build_http_client("test", "agent/1.0", None, &HttpSettings::default());
        assert!(client.is_ok());
    }

    #[test]
    fn test_join_url_normalizes_slashes() {
        assert_eq!(join_url("http://h:1/", "/api/v2"), "http://h:1/api/v2");
        assert_eq!(join_url("http://h:1", "api"), "http://h:1/api");
    }
}
