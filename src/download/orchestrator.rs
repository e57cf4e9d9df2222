//! Submission, reconciliation, and removal of downloads.
//!
//! The orchestrator owns every [`Download`] record. Status changes come from
//! [`DownloadOrchestrator::sync`]; user actions (pause, resume) go straight to
//! the client and are reflected on the next sync.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use super::{
    Download, DownloadRepository, DownloadStatus, NewDownload, OrchestratorError,
    StoreDbErrorKind, StoreError,
};
use crate::client::{ClientRegistry, DownloadInfo, SubmitOptions, clamp_progress};
use crate::events::{DownloadEvent, DownloadEventKind, EventBus};
use crate::indexer::MediaType;

type Result<T> = std::result::Result<T, OrchestratorError>;

/// Everything needed to hand a chosen result to a client.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Target client (`[[clients]].id`).
    pub client_id: i64,
    /// Media item being acquired.
    pub media_item_id: i64,
    /// Ebook or audiobook.
    pub media_type: MediaType,
    /// Title of the chosen result.
    pub title: String,
    /// Indexer that produced the result.
    pub source: String,
    /// Resolved locator (magnet, URL, NZB link).
    pub locator: String,
    /// Declared size in bytes.
    pub size_bytes: u64,
    /// Client-side options.
    pub options: SubmitOptions,
}

/// Outcome counters for one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Records polled.
    pub checked: usize,
    /// Records whose state changed.
    pub updated: usize,
    /// Records that reached Completed this pass.
    pub completed: usize,
    /// Records that reached Failed this pass.
    pub failed: usize,
    /// Records skipped because the client or store errored.
    pub errors: usize,
}

/// Download lifecycle owner.
pub struct DownloadOrchestrator {
    store: Arc<dyn DownloadRepository>,
    clients: Arc<ClientRegistry>,
    events: EventBus,
}

impl std::fmt::Debug for DownloadOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOrchestrator")
            .field("clients", &self.clients)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl DownloadOrchestrator {
    /// Creates an orchestrator over a store, a client registry, and an event bus.
    #[must_use]
    pub fn new(
        store: Arc<dyn DownloadRepository>,
        clients: Arc<ClientRegistry>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            clients,
            events,
        }
    }

    /// The client registry submissions are routed through.
    #[must_use]
    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    /// The bus lifecycle events are published on.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Submits a locator to a client and records the download.
    ///
    /// Submitting a job the client already tracks under the same external id
    /// returns the existing record without a new event.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::UnknownClient`] if `client_id` is not registered,
    /// [`OrchestratorError::Client`] if the client rejects the job (no record
    /// is created), [`OrchestratorError::Store`] if persistence fails.
    #[instrument(
        skip(self, request),
        fields(client_id = request.client_id, title = %request.title)
    )]
    pub async fn submit(&self, request: SubmitRequest) -> Result<Download> {
        let client = self
            .clients
            .get(request.client_id)
            .ok_or(OrchestratorError::UnknownClient(request.client_id))?;

        let external_id = client.submit(&request.locator, &request.options).await?;
        let new = NewDownload {
            client_id: request.client_id,
            external_id,
            media_item_id: request.media_item_id,
            media_type: request.media_type,
            title: request.title,
            source: request.source,
            source_locator: request.locator,
            category: request.options.category,
            size_bytes: request.size_bytes,
        };

        if let Some(download) = self.store.insert(&new).await? {
            info!(
                id = download.id,
                client = client.name(),
                external_id = %download.external_id,
                "Download submitted"
            );
            self.publish(DownloadEventKind::Started, &download);
            return Ok(download);
        }

        debug!(external_id = %new.external_id, "Client job already tracked");
        self.store
            .find_by_external_id(new.client_id, &new.external_id)
            .await?
            .ok_or_else(|| {
                OrchestratorError::Store(StoreError::Database {
                    kind: StoreDbErrorKind::Other,
                    message: format!(
                        "download for {}:{} vanished after insert conflict",
                        new.client_id, new.external_id
                    ),
                })
            })
    }

    /// Polls every active download's client and folds the answer into the record.
    ///
    /// Client or store errors skip that record and never abort the batch.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Store`] only when the active set cannot be listed.
    #[instrument(skip(self))]
    pub async fn sync(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let active = self.store.list_by_status(&DownloadStatus::ACTIVE).await?;

        for mut download in active.into_iter().filter(Download::needs_sync) {
            report.checked += 1;

            let Some(client) = self.clients.get(download.client_id) else {
                warn!(
                    id = download.id,
                    client_id = download.client_id,
                    "Download references an unregistered client; skipping"
                );
                report.errors += 1;
                continue;
            };

            let info = match client.status(&download.external_id).await {
                Ok(info) => info,
                Err(error) => {
                    warn!(
                        id = download.id,
                        error = %error,
                        "Status check failed; retrying next sync"
                    );
                    report.errors += 1;
                    continue;
                }
            };

            let previous = download.status;
            let Some(kind) = apply_status(&mut download, &info, Utc::now()) else {
                continue;
            };

            match self.store.update_state(&download, previous).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(id = download.id, "Record changed during sync; skipping");
                    continue;
                }
                Err(error) => {
                    warn!(id = download.id, error = %error, "Failed to persist synced status");
                    report.errors += 1;
                    continue;
                }
            }

            report.updated += 1;
            match kind {
                DownloadEventKind::Completed => {
                    report.completed += 1;
                    info!(
                        id = download.id,
                        output_path = ?download.output_path,
                        "Download completed"
                    );
                }
                DownloadEventKind::Failed => {
                    report.failed += 1;
                    warn!(id = download.id, error = ?download.error_message, "Download failed");
                }
                _ => debug!(
                    id = download.id,
                    status = %download.status,
                    progress = download.progress,
                    "Download progressed"
                ),
            }
            self.publish(kind, &download);
        }

        info!(
            checked = report.checked,
            updated = report.updated,
            errors = report.errors,
            "Sync pass finished"
        );
        Ok(report)
    }

    /// Removes a download: best-effort on the client, always locally.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::NotFound`] for an unknown id,
    /// [`OrchestratorError::Store`] if the local delete fails.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: i64, delete_files: bool) -> Result<()> {
        let download = self.load(id).await?;

        match self.clients.get(download.client_id) {
            Some(client) => {
                if let Err(error) = client.remove(&download.external_id, delete_files).await {
                    warn!(id, error = %error, "Client removal failed; deleting local record");
                }
            }
            None => warn!(
                id,
                client_id = download.client_id,
                "Client no longer registered; deleting local record only"
            ),
        }

        if !self.store.delete(id).await? {
            return Err(OrchestratorError::NotFound(id));
        }
        info!(id, "Download removed");
        self.publish(DownloadEventKind::Removed, &download);
        Ok(())
    }

    /// Pauses the job on its client and marks the record user-paused.
    ///
    /// The status itself changes on the next sync.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::InvalidTransition`] for terminal records, plus
    /// the lookup and client errors of [`Self::remove`].
    #[instrument(skip(self))]
    pub async fn pause(&self, id: i64) -> Result<Download> {
        self.set_user_paused(id, true).await
    }

    /// Resumes the job on its client and clears the user-paused mark.
    ///
    /// # Errors
    ///
    /// Same as [`Self::pause`].
    #[instrument(skip(self))]
    pub async fn resume(&self, id: i64) -> Result<Download> {
        self.set_user_paused(id, false).await
    }

    async fn set_user_paused(&self, id: i64, paused: bool) -> Result<Download> {
        let download = self.load(id).await?;
        if download.status.is_terminal() {
            return Err(OrchestratorError::InvalidTransition {
                id,
                status: download.status,
                operation: if paused { "pause" } else { "resume" },
            });
        }

        let client = self
            .clients
            .get(download.client_id)
            .ok_or(OrchestratorError::UnknownClient(download.client_id))?;
        if paused {
            client.pause(&download.external_id).await?;
        } else {
            client.resume(&download.external_id).await?;
        }

        if !self.store.set_user_paused(id, paused).await? {
            return Err(OrchestratorError::NotFound(id));
        }
        info!(id, paused, "Pause state requested");
        self.load(id).await
    }

    /// Loads one record.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::NotFound`] for an unknown id.
    pub async fn get(&self, id: i64) -> Result<Download> {
        self.load(id).await
    }

    /// Returns every record, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Store`] on persistence failure.
    pub async fn list(&self) -> Result<Vec<Download>> {
        Ok(self.store.list_all().await?)
    }

    /// Returns the records acquiring one media item.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Store`] on persistence failure.
    pub async fn list_for_media_item(&self, media_item_id: i64) -> Result<Vec<Download>> {
        Ok(self.store.list_for_media_item(media_item_id).await?)
    }

    /// Completed downloads waiting for the importer.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Store`] on persistence failure.
    pub async fn list_ready_for_import(&self) -> Result<Vec<Download>> {
        Ok(self.store.list_by_status(&[DownloadStatus::Completed]).await?)
    }

    /// Moves a Completed download to Importing on behalf of the importer.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::InvalidTransition`] unless the record is Completed.
    #[instrument(skip(self))]
    pub async fn claim_for_import(&self, id: i64) -> Result<Download> {
        let claimed = self
            .store
            .compare_and_set_status(id, DownloadStatus::Completed, DownloadStatus::Importing)
            .await?;
        let download = self.load(id).await?;
        if !claimed {
            return Err(OrchestratorError::InvalidTransition {
                id,
                status: download.status,
                operation: "import",
            });
        }
        info!(id, "Download claimed for import");
        Ok(download)
    }

    /// Records the importer's verdict.
    ///
    /// Success leaves the record in Importing; failure moves it to Failed and
    /// publishes `download.failed`.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::InvalidTransition`] unless the record is Importing.
    #[instrument(skip(self, outcome))]
    pub async fn finish_import(
        &self,
        id: i64,
        outcome: std::result::Result<(), String>,
    ) -> Result<Download> {
        let mut download = self.load(id).await?;
        if download.status != DownloadStatus::Importing {
            return Err(OrchestratorError::InvalidTransition {
                id,
                status: download.status,
                operation: "finish import of",
            });
        }

        if let Err(message) = outcome {
            download.status = DownloadStatus::Failed;
            download.error_message = Some(message);
            download.updated_at = Utc::now();
            if !self
                .store
                .update_state(&download, DownloadStatus::Importing)
                .await?
            {
                let current = self.load(id).await?;
                return Err(OrchestratorError::InvalidTransition {
                    id,
                    status: current.status,
                    operation: "finish import of",
                });
            }
            warn!(id, error = ?download.error_message, "Import failed");
            self.publish(DownloadEventKind::Failed, &download);
        }
        Ok(download)
    }

    async fn load(&self, id: i64) -> Result<Download> {
        self.store
            .get(id)
            .await?
            .ok_or(OrchestratorError::NotFound(id))
    }

    fn publish(&self, kind: DownloadEventKind, download: &Download) {
        self.events.publish(DownloadEvent::for_download(kind, download));
    }
}

/// Folds a client snapshot into `download`; returns the event to emit, or
/// `None` when nothing observable changed.
fn apply_status(
    download: &mut Download,
    info: &DownloadInfo,
    now: DateTime<Utc>,
) -> Option<DownloadEventKind> {
    let mut changed = false;

    let progress = clamp_progress(info.progress);
    if (download.progress - progress).abs() > f64::EPSILON {
        download.progress = progress;
        changed = true;
    }
    if info.size_bytes > 0 && info.size_bytes != download.size_bytes {
        download.size_bytes = info.size_bytes;
        changed = true;
    }
    if info.downloaded_bytes != download.downloaded_bytes {
        download.downloaded_bytes = info.downloaded_bytes;
        changed = true;
    }

    let status = DownloadStatus::from(info.state);
    let mut kind = DownloadEventKind::Progress;
    if status != download.status {
        match status {
            DownloadStatus::Completed => {
                if download.completed_at.is_none() {
                    download.completed_at = Some(now);
                    if info.output_path.is_some() {
                        download.output_path.clone_from(&info.output_path);
                    }
                }
                kind = DownloadEventKind::Completed;
            }
            DownloadStatus::Failed => {
                download.error_message = Some(
                    info.error
                        .clone()
                        .unwrap_or_else(|| "download failed on client".to_string()),
                );
                kind = DownloadEventKind::Failed;
            }
            _ => {}
        }
        download.status = status;
        changed = true;
    }

    if !changed {
        return None;
    }
    download.updated_at = now;
    Some(kind)
}
