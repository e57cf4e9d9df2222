//! TOML configuration: adapters, quality policies, scheduler, HTTP timeouts.
//!
//! The file is read once at startup and validated as a whole before any
//! adapter is constructed; a broken adapter entry is a startup error, never a
//! call-time one.
//!
//! ```toml
//! database_path = "/var/lib/acquirer/acquirer.db"
//! log_level = "info"
//!
//! [http]
//! connect_timeout_secs = 10
//! request_timeout_secs = 30
//!
//! [quality.audiobook]
//! formats = ["m4b", "mp3"]
//! min_bitrate = 64
//!
//! [[indexers]]
//! id = 1
//! name = "feed"
//! kind = "torznab"
//! base_url = "http://localhost:9117/api/v2.0/indexers/all/results/torznab"
//! api_key = "..."
//!
//! [[clients]]
//! id = 1
//! name = "qbit"
//! kind = "qbittorrent"
//! base_url = "http://localhost:8080"
//! username = "admin"
//! password = "..."
//! ```

use std::collections::HashSet;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::http_client::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT_SECS, HttpSettings};
use crate::indexer::{DownloadProtocol, IndexerProtocol, MediaType, SearchQuery};
use crate::quality::{PolicyError, QualityPolicy};

const APP_DIR: &str = "acquirer";

/// Configuration loading or validation failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config file {path}: {source}")]
    Read {
        /// File that failed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or has unknown/mistyped keys.
    #[error("invalid config syntax: {0}\n  Suggestion: Compare the file against the documented keys")]
    Syntax(#[from] toml::de::Error),

    /// A value is out of range or inconsistent.
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid {
        /// Dotted path of the offending field
        field: String,
        /// What is wrong
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// HTTP timeouts shared by every adapter.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    /// Connect timeout, seconds (1..=3600).
    pub connect_timeout_secs: u64,
    /// Whole-request timeout, seconds (1..=3600).
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl HttpConfig {
    /// Converts to adapter settings.
    #[must_use]
    pub fn settings(&self) -> HttpSettings {
        HttpSettings::from_secs(self.connect_timeout_secs, self.request_timeout_secs)
    }
}

/// Scheduler timing.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// How often due tasks are evaluated.
    pub tick_secs: u64,
    /// Upper bound on one task execution.
    pub task_timeout_secs: u64,
    /// Interval of the search-and-acquire task.
    pub search_interval_secs: u64,
    /// Interval of the download sync task.
    pub sync_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: 15,
            task_timeout_secs: 600,
            search_interval_secs: 3600,
            sync_interval_secs: 60,
        }
    }
}

impl SchedulerConfig {
    /// Tick period.
    #[must_use]
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    /// Per-task execution timeout.
    #[must_use]
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// One media type's format policy as written in the file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    /// Preferred formats, best first.
    pub formats: Vec<String>,
    /// Minimum bitrate in kbps (audiobooks only).
    pub min_bitrate: Option<u32>,
}

/// Format policies per media type.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QualityConfig {
    /// Ebook policy.
    pub ebook: PolicyConfig,
    /// Audiobook policy.
    pub audiobook: PolicyConfig,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            ebook: PolicyConfig {
                formats: ["epub", "azw3", "mobi", "pdf"].map(String::from).to_vec(),
                min_bitrate: None,
            },
            audiobook: PolicyConfig {
                formats: ["m4b", "mp3", "m4a"].map(String::from).to_vec(),
                min_bitrate: Some(64),
            },
        }
    }
}

impl QualityConfig {
    /// Builds the validated policy for `media_type`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] when the format list has duplicates.
    pub fn policy(&self, media_type: MediaType) -> Result<QualityPolicy, PolicyError> {
        match media_type {
            MediaType::Ebook => QualityPolicy::new(&self.ebook.formats, None),
            MediaType::Audiobook => {
                QualityPolicy::new(&self.audiobook.formats, self.audiobook.min_bitrate)
            }
        }
    }
}

/// One search source.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexerConfig {
    /// Stable numeric id.
    pub id: i64,
    /// Unique display name.
    pub name: String,
    /// Wire protocol.
    pub kind: IndexerProtocol,
    /// Base URL of the source.
    pub base_url: String,
    /// API key (torznab).
    #[serde(default)]
    pub api_key: Option<String>,
    /// Session cookie, `name=value` or a bare value (session JSON).
    #[serde(default)]
    pub session_cookie: Option<String>,
    /// Category ids; empty uses media-type defaults.
    #[serde(default)]
    pub categories: Vec<u32>,
    /// Lower values are searched first.
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Disabled entries are validated but never built.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Only return freeleech results.
    #[serde(default)]
    pub freeleech_only: bool,
    /// Only return VIP results.
    #[serde(default)]
    pub vip_only: bool,
    /// Overrides the protocol of produced locators.
    #[serde(default)]
    pub download_protocol: Option<DownloadProtocol>,
    /// Minimum spacing between requests, milliseconds.
    #[serde(default)]
    pub rate_limit_ms: u64,
}

impl IndexerConfig {
    /// Minimal entry used by tests and programmatic setups.
    #[must_use]
    pub fn new(
        id: i64,
        name: impl Into<String>,
        kind: IndexerProtocol,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            base_url: base_url.into(),
            api_key: None,
            session_cookie: None,
            categories: Vec::new(),
            priority: default_priority(),
            enabled: true,
            freeleech_only: false,
            vip_only: false,
            download_protocol: None,
            rate_limit_ms: 0,
        }
    }

    /// Request spacing.
    #[must_use]
    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }
}

impl fmt::Debug for IndexerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexerConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Download back-end family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientKind {
    /// Cookie-session REST (qBittorrent Web API).
    Qbittorrent,
    /// Persistent JSON-RPC (Deluge Web UI).
    Deluge,
    /// API-key query protocol (SABnzbd).
    Sabnzbd,
    /// Plain HTTP(S) download to disk.
    Direct,
}

impl ClientKind {
    /// Returns the stable string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qbittorrent => "qbittorrent",
            Self::Deluge => "deluge",
            Self::Sabnzbd => "sabnzbd",
            Self::Direct => "direct",
        }
    }
}

/// One download back-end.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Stable numeric id, stored on every download record.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Back-end family.
    pub kind: ClientKind,
    /// Base URL; unused by `direct`.
    #[serde(default)]
    pub base_url: String,
    /// Login user (qbittorrent).
    #[serde(default)]
    pub username: Option<String>,
    /// Login password (qbittorrent, deluge).
    #[serde(default)]
    pub password: Option<String>,
    /// API key (sabnzbd).
    #[serde(default)]
    pub api_key: Option<String>,
    /// Category/label applied to submissions.
    #[serde(default)]
    pub category: Option<String>,
    /// Destination directory.
    #[serde(default)]
    pub save_path: Option<PathBuf>,
    /// Lower values are preferred when several clients accept a protocol.
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Disabled entries are validated but never built.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ClientConfig {
    /// Minimal entry used by tests and programmatic setups.
    #[must_use]
    pub fn new(
        id: i64,
        name: impl Into<String>,
        kind: ClientKind,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            base_url: base_url.into(),
            username: None,
            password: None,
            api_key: None,
            category: None,
            save_path: None,
            priority: default_priority(),
            enabled: true,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("category", &self.category)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// A media item the search task should try to acquire.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WantedItem {
    /// Identifier of the item in the wider library.
    pub media_item_id: i64,
    /// Title to search for.
    pub title: String,
    /// Optional author.
    #[serde(default)]
    pub author: Option<String>,
    /// Optional ISBN.
    #[serde(default)]
    pub isbn: Option<String>,
    /// Optional external catalog id.
    #[serde(default)]
    pub external_id: Option<String>,
    /// Ebook or audiobook.
    pub media_type: MediaType,
}

impl WantedItem {
    /// Builds the logical search query for this item.
    #[must_use]
    pub fn query(&self) -> SearchQuery {
        SearchQuery {
            title: self.title.clone(),
            author: self.author.clone(),
            isbn: self.isbn.clone(),
            external_id: self.external_id.clone(),
            media_type: self.media_type,
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// SQLite file; defaults under the XDG data directory.
    pub database_path: Option<PathBuf>,
    /// Default tracing filter when neither flags nor `RUST_LOG` set one.
    pub log_level: Option<String>,
    /// HTTP timeouts.
    pub http: HttpConfig,
    /// Scheduler timing.
    pub scheduler: SchedulerConfig,
    /// Format policies.
    pub quality: QualityConfig,
    /// Search sources.
    pub indexers: Vec<IndexerConfig>,
    /// Download back-ends.
    pub clients: Vec<ClientConfig>,
    /// Static wanted list.
    pub wanted: Vec<WantedItem>,
}

impl Config {
    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Syntax`] for malformed TOML and
    /// [`ConfigError::Invalid`] for values that fail validation.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] when the file cannot be read, plus the
    /// errors of [`Config::from_toml_str`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Loads `explicit` if given, else the default path if it exists, else defaults.
    ///
    /// Returns the path that was read, if any.
    ///
    /// # Errors
    ///
    /// Same as [`Config::load`]. A missing explicit path is an error; a
    /// missing default path is not.
    pub fn load_or_default(
        explicit: Option<&Path>,
    ) -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }
        match resolve_default_config_path() {
            Some(path) if path.exists() => Ok((Self::load(&path)?, Some(path))),
            _ => Ok((Self::default(), None)),
        }
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::Invalid`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_timeout_secs("http.connect_timeout_secs", self.http.connect_timeout_secs)?;
        validate_timeout_secs("http.request_timeout_secs", self.http.request_timeout_secs)?;
        validate_timeout_secs("scheduler.task_timeout_secs", self.scheduler.task_timeout_secs)?;
        validate_positive("scheduler.tick_secs", self.scheduler.tick_secs)?;
        validate_positive("scheduler.search_interval_secs", self.scheduler.search_interval_secs)?;
        validate_positive("scheduler.sync_interval_secs", self.scheduler.sync_interval_secs)?;

        for media_type in [MediaType::Ebook, MediaType::Audiobook] {
            self.quality.policy(media_type).map_err(|e| {
                ConfigError::invalid(format!("quality.{media_type}.formats"), e.to_string())
            })?;
        }

        let mut indexer_ids = HashSet::new();
        let mut indexer_names = HashSet::new();
        for (i, indexer) in self.indexers.iter().enumerate() {
            let field = format!("indexers[{i}]");
            if !indexer_ids.insert(indexer.id) {
                return Err(ConfigError::invalid(
                    format!("{field}.id"),
                    format!("duplicate indexer id {}", indexer.id),
                ));
            }
            if indexer.name.trim().is_empty() {
                return Err(ConfigError::invalid(format!("{field}.name"), "must not be empty"));
            }
            if !indexer_names.insert(indexer.name.clone()) {
                return Err(ConfigError::invalid(
                    format!("{field}.name"),
                    format!("duplicate indexer name '{}'", indexer.name),
                ));
            }
            validate_base_url(&format!("{field}.base_url"), &indexer.base_url)?;
            match indexer.kind {
                IndexerProtocol::Torznab => {
                    require(&format!("{field}.api_key"), indexer.api_key.as_deref())?;
                }
                IndexerProtocol::SessionJson => {
                    require(&format!("{field}.session_cookie"), indexer.session_cookie.as_deref())?;
                }
                IndexerProtocol::Scrape => {}
            }
        }

        let mut client_ids = HashSet::new();
        for (i, client) in self.clients.iter().enumerate() {
            let field = format!("clients[{i}]");
            if !client_ids.insert(client.id) {
                return Err(ConfigError::invalid(
                    format!("{field}.id"),
                    format!("duplicate client id {}", client.id),
                ));
            }
            match client.kind {
                ClientKind::Qbittorrent => {
                    validate_base_url(&format!("{field}.base_url"), &client.base_url)?;
                    require(&format!("{field}.username"), client.username.as_deref())?;
                    require(&format!("{field}.password"), client.password.as_deref())?;
                }
                ClientKind::Deluge => {
                    validate_base_url(&format!("{field}.base_url"), &client.base_url)?;
                    require(&format!("{field}.password"), client.password.as_deref())?;
                }
                ClientKind::Sabnzbd => {
                    validate_base_url(&format!("{field}.base_url"), &client.base_url)?;
                    require(&format!("{field}.api_key"), client.api_key.as_deref())?;
                }
                ClientKind::Direct => {
                    if client.save_path.is_none() {
                        return Err(ConfigError::invalid(
                            format!("{field}.save_path"),
                            "required for direct clients",
                        ));
                    }
                }
            }
        }

        for (i, item) in self.wanted.iter().enumerate() {
            if item.query().is_empty() {
                return Err(ConfigError::invalid(
                    format!("wanted[{i}]"),
                    "needs a title, author, isbn, or external_id",
                ));
            }
        }

        Ok(())
    }

    /// Resolved database path: configured value or the XDG data default.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .or_else(resolve_default_database_path)
            .unwrap_or_else(|| PathBuf::from("acquirer.db"))
    }
}

fn default_priority() -> i32 {
    25
}

fn default_true() -> bool {
    true
}

fn validate_timeout_secs(field: &str, value: u64) -> Result<(), ConfigError> {
    if !(1..=3600).contains(&value) {
        return Err(ConfigError::invalid(field, format!("{value}. Expected range: 1..=3600")));
    }
    Ok(())
}

fn validate_positive(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::invalid(field, "must be greater than zero"));
    }
    Ok(())
}

fn validate_base_url(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::invalid(field, "must not be empty"));
    }
    let parsed = url::Url::parse(value.trim())
        .map_err(|e| ConfigError::invalid(field, format!("'{value}' is not a URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::invalid(
            field,
            format!("unsupported scheme '{}'", parsed.scheme()),
        ));
    }
    Ok(())
}

fn require(field: &str, value: Option<&str>) -> Result<(), ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(ConfigError::invalid(field, "required for this adapter kind")),
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/acquirer/config.toml`
/// 2. `$HOME/.config/acquirer/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join(APP_DIR).join("config.toml"));
    }
    let home = env_var_non_empty_os("HOME")?;
    Some(PathBuf::from(home).join(".config").join(APP_DIR).join("config.toml"))
}

fn resolve_default_database_path() -> Option<PathBuf> {
    if let Some(xdg_data_home) = env_var_non_empty_os("XDG_DATA_HOME") {
        return Some(PathBuf::from(xdg_data_home).join(APP_DIR).join("acquirer.db"));
    }
    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR)
            .join("acquirer.db"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}
