//! In-process event bus for download lifecycle events.
//!
//! Events are opaque JSON payloads to whoever listens (notification fan-out,
//! an importer, a UI). Publishing with nobody subscribed is a no-op.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;

use crate::download::Download;

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// Semantic download events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DownloadEventKind {
    /// A download was submitted to a client.
    #[serde(rename = "download.started")]
    Started,
    /// Progress or size changed.
    #[serde(rename = "download.progress")]
    Progress,
    /// The client reports all data present.
    #[serde(rename = "download.completed")]
    Completed,
    /// The client or the importer gave up.
    #[serde(rename = "download.failed")]
    Failed,
    /// The local record was deleted.
    #[serde(rename = "download.removed")]
    Removed,
}

impl DownloadEventKind {
    /// Returns the dotted event name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "download.started",
            Self::Progress => "download.progress",
            Self::Completed => "download.completed",
            Self::Failed => "download.failed",
            Self::Removed => "download.removed",
        }
    }
}

impl fmt::Display for DownloadEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One published event.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadEvent {
    /// What happened.
    #[serde(rename = "event_type")]
    pub kind: DownloadEventKind,
    /// Local download id.
    pub download_id: i64,
    /// Media item the download belongs to.
    pub media_item_id: i64,
    /// Event-specific data.
    pub payload: serde_json::Value,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
}

impl DownloadEvent {
    /// Builds an event from the current state of `download`.
    #[must_use]
    pub fn for_download(kind: DownloadEventKind, download: &Download) -> Self {
        let payload = json!({
            "title": download.title,
            "client_id": download.client_id,
            "external_id": download.external_id,
            "status": download.status.as_str(),
            "progress": download.progress,
            "size_bytes": download.size_bytes,
            "downloaded_bytes": download.downloaded_bytes,
            "output_path": download.output_path,
            "error": download.error_message,
        });
        Self {
            kind,
            download_id: download.id,
            media_item_id: download.media_item_id,
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Fan-out bus; clone freely, all clones share one channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DownloadEvent>,
}

impl EventBus {
    /// Creates a bus with a specific channel capacity.
    ///
    /// Slow receivers that fall more than `capacity` events behind observe
    /// `RecvError::Lagged`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all current subscribers.
    pub fn publish(&self, event: DownloadEvent) {
        // A send error only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribes to every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
