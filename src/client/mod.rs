//! Download back-ends ("clients") and the uniform client capability set.
//!
//! Each external download service is wrapped in one type implementing
//! [`DownloadClient`]. The wire protocols differ a lot: a cookie-session REST
//! API, a JSON-RPC endpoint that needs a login plus a daemon connection, an
//! API-key query protocol with separate queue and history collections, and
//! plain HTTP file downloads. Callers only see submit/status/list/remove and
//! pause/resume.
//!
//! # Architecture
//!
//! - [`DownloadClient`] - Async trait that individual adapters implement
//! - [`ClientRegistry`] - Read-mostly map from client id to adapter
//! - [`QbittorrentClient`] - qBittorrent Web API v2
//! - [`DelugeClient`] - Deluge Web UI JSON-RPC
//! - [`SabnzbdClient`] - `SABnzbd` HTTP API
//! - [`DirectClient`] - Streams HTTP(S) files to disk

mod deluge;
mod direct;
mod error;
mod qbittorrent;
mod registry;
mod sabnzbd;

pub use deluge::DelugeClient;
pub use direct::DirectClient;
pub use error::{ClientError, ClientErrorKind};
pub use qbittorrent::QbittorrentClient;
pub use registry::{ClientRegistry, RegisteredClient};
pub use sabnzbd::SabnzbdClient;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use crate::config::{ClientConfig, ClientKind};
use crate::http_client::HttpSettings;
use crate::indexer::DownloadProtocol;

/// Back-end view of a job's state, before it is folded into the local
/// lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    /// Waiting to start, checking, or fetching metadata.
    Queued,
    /// Transferring data (or post-processing).
    Downloading,
    /// Stopped by the user or the back-end.
    Paused,
    /// All data is present.
    Completed,
    /// The back-end gave up on the job.
    Failed,
}

impl ClientState {
    /// Returns the stable string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status snapshot of one external job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadInfo {
    /// Back-end identifier (info-hash, nzo id, ...).
    pub id: String,
    /// Display name reported by the back-end.
    pub name: String,
    /// Normalized state.
    pub state: ClientState,
    /// Fraction complete in `[0, 1]`.
    pub progress: f64,
    /// Total size in bytes; 0 when unknown.
    pub size_bytes: u64,
    /// Bytes transferred so far.
    pub downloaded_bytes: u64,
    /// Where the content lives (or will live) on the back-end's disk.
    pub output_path: Option<String>,
    /// Category or label.
    pub category: Option<String>,
    /// Back-end error text for failed jobs.
    pub error: Option<String>,
}

impl DownloadInfo {
    /// Creates a snapshot with zeroed counters.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, state: ClientState) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            state,
            progress: 0.0,
            size_bytes: 0,
            downloaded_bytes: 0,
            output_path: None,
            category: None,
            error: None,
        }
    }

    /// Sets progress, clamped to `[0, 1]`; NaN becomes 0.
    pub fn set_progress(&mut self, fraction: f64) {
        self.progress = clamp_progress(fraction);
    }
}

/// Clamps a progress fraction to `[0, 1]`; NaN becomes 0.
#[must_use]
pub fn clamp_progress(fraction: f64) -> f64 {
    if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, 1.0)
    }
}

/// Per-submission options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Category or label to apply.
    pub category: Option<String>,
    /// Destination directory on the back-end.
    pub save_path: Option<PathBuf>,
    /// Add the job in a stopped state.
    pub start_paused: bool,
    /// Back-end priority hint; 0 is normal.
    pub priority: i32,
}

impl SubmitOptions {
    /// Options derived from a client's configured defaults.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            category: config.category.clone(),
            save_path: config.save_path.clone(),
            start_paused: false,
            priority: 0,
        }
    }
}

/// Uniform capability set of a download back-end.
///
/// # Object Safety
///
/// Uses `async_trait` to support dynamic dispatch via `Arc<dyn DownloadClient>`.
#[async_trait]
pub trait DownloadClient: Send + Sync {
    /// Returns the back-end family identifier, e.g. `"qbittorrent"`.
    fn client_type(&self) -> &'static str;

    /// Returns the configured adapter name.
    fn name(&self) -> &str;

    /// Returns the locator protocol this back-end accepts.
    fn protocol(&self) -> DownloadProtocol;

    /// Verifies the back-end is reachable and the credentials work.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] describing why the back-end is unusable.
    async fn test_connection(&self) -> Result<(), ClientError>;

    /// Hands `locator` to the back-end and returns its job id.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Submit`] when the back-end refuses the job.
    async fn submit(&self, locator: &str, options: &SubmitOptions) -> Result<String, ClientError>;

    /// Fetches the current status of job `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotFound`] when the back-end no longer knows `id`.
    async fn status(&self, id: &str) -> Result<DownloadInfo, ClientError>;

    /// Lists jobs, optionally restricted to one category.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport or protocol failures.
    async fn list_all(&self, category: Option<&str>) -> Result<Vec<DownloadInfo>, ClientError>;

    /// Removes job `id`, optionally deleting its files.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport or protocol failures.
    async fn remove(&self, id: &str, delete_files: bool) -> Result<(), ClientError>;

    /// Pauses job `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on failure or when the back-end cannot pause.
    async fn pause(&self, id: &str) -> Result<(), ClientError>;

    /// Resumes job `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on failure or when the back-end cannot resume.
    async fn resume(&self, id: &str) -> Result<(), ClientError>;
}

/// Builds the adapter for one `[[clients]]` entry.
///
/// # Errors
///
/// Returns [`ClientError::Config`] when the entry's connection parameters are
/// unusable.
pub fn build_client(
    config: &ClientConfig,
    http: &HttpSettings,
) -> Result<Arc<dyn DownloadClient>, ClientError> {
    let client: Arc<dyn DownloadClient> = match config.kind {
        ClientKind::Qbittorrent => Arc::new(QbittorrentClient::new(config, http)?),
        ClientKind::Deluge => Arc::new(DelugeClient::new(config, http)?),
        ClientKind::Sabnzbd => Arc::new(SabnzbdClient::new(config, http)?),
        ClientKind::Direct => Arc::new(DirectClient::new(config, http)?),
    };
    Ok(client)
}

/// Parses a client base URL, ensuring a trailing slash.
pub(crate) fn parse_client_url(client: &str, raw: &str) -> Result<Url, ClientError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ClientError::config(client, "base_url is required"));
    }
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&with_slash)
        .map_err(|e| ClientError::config(client, format!("invalid base_url '{raw}': {e}")))
}

/// Returns a trimmed, non-empty credential or a `Config` error.
pub(crate) fn required(
    client: &str,
    value: Option<&str>,
    field: &str,
) -> Result<String, ClientError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ClientError::config(client, format!("{field} is required")))
}

/// Extracts the `BitTorrent` info-hash from a magnet link as lowercase hex.
///
/// Accepts both the 40-char hex and the 32-char base32 forms of `btih`.
#[must_use]
pub(crate) fn magnet_info_hash(locator: &str) -> Option<String> {
    let query = locator.strip_prefix("magnet:?")?;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if !key.eq_ignore_ascii_case("xt") {
            return None;
        }
        let value = urlencoding::decode(value).ok()?;
        let hash = value
            .strip_prefix("urn:btih:")
            .or_else(|| value.strip_prefix("URN:BTIH:"))?;
        match hash.len() {
            40 if hash.chars().all(|c| c.is_ascii_hexdigit()) => Some(hash.to_ascii_lowercase()),
            32 => base32_to_hex(hash),
            _ => None,
        }
    })
}

fn base32_to_hex(encoded: &str) -> Option<String> {
    let mut bits: u64 = 0;
    let mut bit_count = 0u32;
    let mut hex = String::with_capacity(40);
    for c in encoded.chars() {
        let value = match c.to_ascii_uppercase() {
            upper @ 'A'..='Z' => u64::from(upper as u8 - b'A'),
            digit @ '2'..='7' => u64::from(digit as u8 - b'2' + 26),
            _ => return None,
        };
        bits = (bits << 5) | value;
        bit_count += 5;
        while bit_count >= 4 {
            bit_count -= 4;
            let nibble = (bits >> bit_count) & 0xF;
            hex.push(char::from_digit(u32::try_from(nibble).ok()?, 16)?);
        }
        bits &= (1 << bit_count) - 1;
    }
    (hex.len() == 40).then_some(hex)
}
