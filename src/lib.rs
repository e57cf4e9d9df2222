//! Acquirer Core Library
//!
//! Decides what to download and tracks it to completion: given a wanted
//! title, it searches heterogeneous indexers, scores the candidates against a
//! format policy, hands the winner to a download client, and reconciles the
//! client's view of the job into a persisted lifecycle record.
//!
//! # Architecture
//!
//! - [`indexer`] - Search sources (session JSON, Torznab, HTML scrape)
//! - [`quality`] - Candidate scoring and selection
//! - [`search`] - Waterfall search across indexers
//! - [`client`] - Download back-ends (qBittorrent, Deluge, SABnzbd, direct HTTP)
//! - [`download`] - Download records, persistence, and lifecycle sync
//! - [`acquire`] - Wanted item to submitted download
//! - [`scheduler`] - Periodic task runner
//! - [`events`] - In-process lifecycle events
//! - [`config`] - TOML configuration
//! - [`db`] - Database connection and schema management

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod acquire;
pub mod client;
pub mod config;
pub mod db;
pub mod download;
pub mod events;
pub mod http_client;
pub mod indexer;
pub mod quality;
pub mod rate_limiter;
pub mod scheduler;
pub mod search;
pub(crate) mod user_agent;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use acquire::{AcquireError, AcquireOutcome, AcquireReport, Acquirer};
pub use client::{
    ClientError, ClientErrorKind, ClientRegistry, ClientState, DownloadClient, DownloadInfo,
    SubmitOptions,
};
pub use config::{ClientConfig, ClientKind, Config, ConfigError, IndexerConfig, WantedItem};
pub use db::{Database, DbError};
pub use download::{
    Download, DownloadOrchestrator, DownloadRepository, DownloadStatus, OrchestratorError,
    SqliteDownloadStore, StoreError, SubmitRequest, SyncReport,
};
pub use events::{DownloadEvent, DownloadEventKind, EventBus};
pub use indexer::{
    DownloadProtocol, Indexer, IndexerError, IndexerErrorKind, IndexerProtocol, IndexerRegistry,
    MediaType, SearchQuery, SearchResult,
};
pub use quality::{QualityPolicy, QualityScore};
pub use scheduler::{Scheduler, SchedulerError, TaskOutcome, TaskStatus};
pub use search::SearchOrchestrator;
