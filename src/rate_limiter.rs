//! Per-host request spacing for adapter HTTP traffic.
//!
//! Each adapter owns one [`RateLimiter`] (injected at construction) so search
//! sources are never hit faster than their configured spacing. Requests to
//! different hosts proceed independently; only subsequent requests to the
//! *same* host are delayed. A server-mandated `Retry-After` pushes the next
//! allowed request for that host further out.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use acquirer_core::rate_limiter::RateLimiter;
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(Duration::from_millis(500));
//! limiter.acquire("https://indexer.example/api").await;
//! limiter.acquire("https://indexer.example/api").await; // waits ~500ms
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Per-host rate limiter.
///
/// Uses `DashMap` for concurrent access to per-host state and a
/// `tokio::sync::Mutex` per host for the read-update of timing.
#[derive(Debug)]
pub struct RateLimiter {
    /// Minimum delay between requests to the same host.
    min_delay: Duration,
    /// Whether rate limiting is disabled.
    disabled: bool,
    /// Per-host state. The `Arc` lets the map shard lock be released before
    /// awaiting on the inner mutex.
    hosts: DashMap<String, Arc<HostState>>,
}

#[derive(Debug, Default)]
struct HostState {
    timing: Mutex<HostTiming>,
}

#[derive(Debug, Default)]
struct HostTiming {
    /// `None` until the first request to this host.
    last_request: Option<Instant>,
    /// Earliest instant the next request may start, set by `Retry-After`.
    blocked_until: Option<Instant>,
}

impl RateLimiter {
    /// Creates a limiter enforcing `min_delay` between requests to one host.
    #[must_use]
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            disabled: min_delay.is_zero(),
            hosts: DashMap::new(),
        }
    }

    /// Creates a limiter that never delays.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            min_delay: Duration::ZERO,
            disabled: true,
            hosts: DashMap::new(),
        }
    }

    /// Returns whether spacing is disabled.
    ///
    /// A disabled limiter still honours recorded `Retry-After` blocks.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the configured minimum delay.
    #[must_use]
    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    fn state_for(&self, host: &str) -> Arc<HostState> {
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(HostState::default()))
            .clone()
    }

    /// Waits until a request to `url`'s host is allowed, then records it.
    ///
    /// The first request to any host proceeds immediately.
    #[instrument(skip(self), fields(host))]
    pub async fn acquire(&self, url: &str) {
        let host = extract_host(url);
        tracing::Span::current().record("host", &host);

        let state = self.state_for(&host);
        let mut timing = state.timing.lock().await;

        let mut earliest = timing.blocked_until;
        if !self.disabled
            && let Some(last) = timing.last_request
        {
            let spaced = last + self.min_delay;
            earliest = Some(earliest.map_or(spaced, |blocked| blocked.max(spaced)));
        }

        if let Some(earliest) = earliest {
            let now = Instant::now();
            if earliest > now {
                let delay = earliest - now;
                debug!(host = %host, delay_ms = delay.as_millis(), "applying rate limit delay");
                tokio::time::sleep_until(earliest).await;
            }
        }

        timing.last_request = Some(Instant::now());
        timing.blocked_until = None;
    }

    /// Records a server-mandated delay (from a `Retry-After` header).
    #[instrument(skip(self), fields(host))]
    pub async fn record_retry_after(&self, url: &str, delay: Duration) {
        let host = extract_host(url);
        tracing::Span::current().record("host", &host);

        let state = self.state_for(&host);
        let mut timing = state.timing.lock().await;
        let until = Instant::now() + delay;
        timing.blocked_until = Some(timing.blocked_until.map_or(until, |b| b.max(until)));
        if delay >= Duration::from_secs(60) {
            warn!(host = %host, delay_secs = delay.as_secs(), "server requested a long back-off");
        } else {
            debug!(host = %host, delay_ms = delay.as_millis(), "recorded server rate limit");
        }
    }
}

/// Extracts the lowercase host from a URL, or `"unknown"` when unparseable.
#[must_use]
pub fn extract_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses a `Retry-After` header value (integer seconds or HTTP-date).
///
/// Returns `None` when unparseable; caps values at one hour.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        let seconds = u64::try_from(seconds).ok()?;
        return Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER));
    }

    let datetime = httpdate::parse_http_date(header_value).ok()?;
    Some(
        datetime
            .duration_since(std::time::SystemTime::now())
            .unwrap_or(Duration::ZERO)
            .min(MAX_RETRY_AFTER),
    )
}
