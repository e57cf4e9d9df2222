//! Download records and their lifecycle.
//!
//! A [`Download`] is created when a client accepts a job, updated only by the
//! periodic sync (plus the user-pause flag), and deleted on explicit removal.
//!
//! ```text
//! Queued -> Downloading <-> Paused -> Completed -> Importing
//!    \___________\______________\________> Failed
//! ```
//!
//! `Importing` is entered by the import collaborator via
//! [`DownloadOrchestrator::claim_for_import`].

mod error;
mod orchestrator;
mod store;

pub use error::{OrchestratorError, StoreDbErrorKind, StoreError};
pub use orchestrator::{DownloadOrchestrator, SubmitRequest, SyncReport};
pub use store::{DownloadRepository, SqliteDownloadStore};

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::client::ClientState;
use crate::indexer::MediaType;

/// Lifecycle state of a [`Download`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Accepted by the client, not transferring yet.
    Queued,
    /// Transferring.
    Downloading,
    /// Stopped, by the user or the client.
    Paused,
    /// All data present; waiting for the importer.
    Completed,
    /// Claimed by the importer.
    Importing,
    /// Gave up.
    Failed,
}

impl DownloadStatus {
    /// Statuses the sync still polls.
    pub const ACTIVE: [Self; 3] = [Self::Queued, Self::Downloading, Self::Paused];

    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Importing => "importing",
            Self::Failed => "failed",
        }
    }

    /// True for states the sync never touches again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Importing | Self::Failed)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "downloading" => Ok(Self::Downloading),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "importing" => Ok(Self::Importing),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid download status: {s}")),
        }
    }
}

impl From<ClientState> for DownloadStatus {
    fn from(state: ClientState) -> Self {
        match state {
            ClientState::Queued => Self::Queued,
            ClientState::Downloading => Self::Downloading,
            ClientState::Paused => Self::Paused,
            ClientState::Completed => Self::Completed,
            ClientState::Failed => Self::Failed,
        }
    }
}

/// Persisted lifecycle record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Download {
    /// Local id.
    pub id: i64,
    /// Owning client (`[[clients]].id`).
    pub client_id: i64,
    /// Client-side job id.
    pub external_id: String,
    /// Media item this download acquires.
    pub media_item_id: i64,
    /// Ebook or audiobook.
    pub media_type: MediaType,
    /// Title of the chosen result.
    pub title: String,
    /// Indexer that produced the result.
    pub source: String,
    /// Locator handed to the client.
    pub source_locator: String,
    /// Category/label applied at submission.
    pub category: Option<String>,
    /// Size in bytes (declared, then as reported by the client).
    pub size_bytes: u64,
    /// Bytes transferred so far.
    pub downloaded_bytes: u64,
    /// Fraction complete in `[0, 1]`.
    pub progress: f64,
    /// Lifecycle state.
    pub status: DownloadStatus,
    /// Set by an explicit pause; the sync skips such records while paused.
    pub user_paused: bool,
    /// Resolved content location, recorded on first completion.
    pub output_path: Option<String>,
    /// Last error message.
    pub error_message: Option<String>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
    /// When the download first reached `Completed`.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Download {
    /// True when the sync should poll this record.
    #[must_use]
    pub fn needs_sync(&self) -> bool {
        !self.status.is_terminal() && !(self.status == DownloadStatus::Paused && self.user_paused)
    }
}

/// Fields supplied when a client accepts a job.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDownload {
    /// Owning client.
    pub client_id: i64,
    /// Client-side job id.
    pub external_id: String,
    /// Media item this download acquires.
    pub media_item_id: i64,
    /// Ebook or audiobook.
    pub media_type: MediaType,
    /// Title of the chosen result.
    pub title: String,
    /// Indexer that produced the result.
    pub source: String,
    /// Locator handed to the client.
    pub source_locator: String,
    /// Category/label applied at submission.
    pub category: Option<String>,
    /// Declared size in bytes.
    pub size_bytes: u64,
}
