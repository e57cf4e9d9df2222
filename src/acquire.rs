//! Search-and-acquire pipeline.
//!
//! For one wanted item: skip if something is already in flight, run the
//! waterfall, pick the best candidate for the media type's policy, resolve its
//! locator through the indexer that found it, and submit it to the
//! highest-priority client accepting that protocol.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::client::SubmitOptions;
use crate::config::{ClientConfig, QualityConfig, WantedItem};
use crate::download::{
    Download, DownloadOrchestrator, DownloadStatus, OrchestratorError, SubmitRequest,
};
use crate::indexer::{DownloadProtocol, IndexerError};
use crate::quality::{self, PolicyError};
use crate::search::SearchOrchestrator;

/// Errors that stop acquisition of one item.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// The configured format policy is invalid.
    #[error("invalid quality policy: {0}")]
    Policy(#[from] PolicyError),

    /// A result names an indexer the registry no longer holds.
    #[error("result came from unknown indexer '{0}'")]
    UnknownIndexer(String),

    /// The indexer could not resolve the chosen result's locator.
    #[error("could not resolve download locator: {0}")]
    Locator(#[from] IndexerError),

    /// Submission or persistence failed.
    #[error(transparent)]
    Download(#[from] OrchestratorError),
}

/// What happened to one wanted item.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquireOutcome {
    /// A non-failed download already exists for the item.
    AlreadyTracked(i64),
    /// No indexer returned anything.
    NoResults,
    /// Every candidate fell below the policy.
    NoAcceptable {
        /// Number of rejected candidates.
        candidates: usize,
    },
    /// No enabled client accepts the winning result's protocol.
    NoClient(DownloadProtocol),
    /// The chosen result was handed to a client.
    Submitted(Box<Download>),
}

/// Counters for one pass over the wanted list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquireReport {
    /// Items submitted to a client.
    pub submitted: usize,
    /// Items already tracked or with nothing usable found.
    pub skipped: usize,
    /// Items that errored.
    pub failed: usize,
}

/// Wires search, selection, and submission together.
#[derive(Debug)]
pub struct Acquirer {
    search: SearchOrchestrator,
    downloads: Arc<DownloadOrchestrator>,
    quality: QualityConfig,
    clients: Vec<ClientConfig>,
}

impl Acquirer {
    /// Creates the pipeline. `clients` supplies per-client submit defaults.
    #[must_use]
    pub fn new(
        search: SearchOrchestrator,
        downloads: Arc<DownloadOrchestrator>,
        quality: QualityConfig,
        clients: Vec<ClientConfig>,
    ) -> Self {
        Self {
            search,
            downloads,
            quality,
            clients,
        }
    }

    /// Acquires one wanted item.
    ///
    /// # Errors
    ///
    /// See [`AcquireError`]. Indexer search failures are not errors; they
    /// just contribute no results.
    #[instrument(skip(self, item), fields(media_item_id = item.media_item_id, title = %item.title))]
    pub async fn acquire(&self, item: &WantedItem) -> Result<AcquireOutcome, AcquireError> {
        let existing = self.downloads.list_for_media_item(item.media_item_id).await?;
        if let Some(active) = existing.iter().find(|d| d.status != DownloadStatus::Failed) {
            debug!(download_id = active.id, status = %active.status, "Already tracked");
            return Ok(AcquireOutcome::AlreadyTracked(active.id));
        }

        let results = self.search.search(&item.query()).await;
        if results.is_empty() {
            info!("No results from any indexer");
            return Ok(AcquireOutcome::NoResults);
        }

        let policy = self.quality.policy(item.media_type)?;
        let Some(best) = quality::select_best(&results, &policy, item.media_type.is_audiobook())
        else {
            info!(candidates = results.len(), "No candidate meets the quality policy");
            return Ok(AcquireOutcome::NoAcceptable {
                candidates: results.len(),
            });
        };

        let indexer = self
            .search
            .registry()
            .get(&best.source)
            .ok_or_else(|| AcquireError::UnknownIndexer(best.source.clone()))?;
        let protocol = indexer.download_protocol();

        let Some(target) = self.downloads.clients().for_protocol(protocol) else {
            warn!(protocol = %protocol, "No enabled download client accepts this protocol");
            return Ok(AcquireOutcome::NoClient(protocol));
        };

        let locator = indexer.resolve_download_locator(&best).await?;
        let options = self
            .clients
            .iter()
            .find(|c| c.id == target.id)
            .map(SubmitOptions::from_config)
            .unwrap_or_default();

        info!(
            chosen = %best.title,
            format = %best.format,
            score = best.score(),
            source = %best.source,
            client_id = target.id,
            "Submitting best candidate"
        );
        let download = self
            .downloads
            .submit(SubmitRequest {
                client_id: target.id,
                media_item_id: item.media_item_id,
                media_type: item.media_type,
                title: best.title.clone(),
                source: best.source.clone(),
                locator,
                size_bytes: best.size_bytes,
                options,
            })
            .await?;
        Ok(AcquireOutcome::Submitted(Box::new(download)))
    }

    /// Acquires every item, logging and counting per-item failures.
    pub async fn acquire_all(&self, items: &[WantedItem]) -> AcquireReport {
        let mut report = AcquireReport::default();
        for item in items {
            match self.acquire(item).await {
                Ok(AcquireOutcome::Submitted(_)) => report.submitted += 1,
                Ok(_) => report.skipped += 1,
                Err(error) => {
                    warn!(media_item_id = item.media_item_id, error = %error, "Acquisition failed");
                    report.failed += 1;
                }
            }
        }
        info!(
            submitted = report.submitted,
            skipped = report.skipped,
            failed = report.failed,
            "Wanted list pass finished"
        );
        report
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::client::{ClientError, ClientRegistry, ClientState, DownloadClient, DownloadInfo};
    use crate::config::ClientKind;
    use crate::db::Database;
    use crate::download::SqliteDownloadStore;
    use crate::events::EventBus;
    use crate::indexer::{
        Indexer, IndexerProtocol, IndexerRegistry, MediaType, SearchQuery, SearchResult,
    };

    struct FixedIndexer {
        results: Vec<SearchResult>,
    }

    #[async_trait]
    impl Indexer for FixedIndexer {
        fn name(&self) -> &str {
            "tracker"
        }
        fn protocol(&self) -> IndexerProtocol {
            IndexerProtocol::Torznab
        }
        fn download_protocol(&self) -> DownloadProtocol {
            DownloadProtocol::Torrent
        }
        fn priority(&self) -> i32 {
            0
        }
        async fn search(&self, _: &SearchQuery) -> Result<Vec<SearchResult>, IndexerError> {
            Ok(self.results.clone())
        }
        async fn test_connection(&self) -> Result<(), IndexerError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingClient {
        submitted: Mutex<Vec<(String, SubmitOptions)>>,
    }

    #[async_trait]
    impl DownloadClient for RecordingClient {
        fn client_type(&self) -> &'static str {
            "recording"
        }
        fn name(&self) -> &str {
            "recording"
        }
        fn protocol(&self) -> DownloadProtocol {
            DownloadProtocol::Torrent
        }
        async fn test_connection(&self) -> Result<(), ClientError> {
            Ok(())
        }
        async fn submit(
            &self,
            locator: &str,
            options: &SubmitOptions,
        ) -> Result<String, ClientError> {
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push((locator.to_string(), options.clone()));
            Ok(format!("job-{}", submitted.len()))
        }
        async fn status(&self, id: &str) -> Result<DownloadInfo, ClientError> {
            Ok(DownloadInfo::new(id, "job", ClientState::Downloading))
        }
        async fn list_all(&self, _: Option<&str>) -> Result<Vec<DownloadInfo>, ClientError> {
            Ok(Vec::new())
        }
        async fn remove(&self, _: &str, _: bool) -> Result<(), ClientError> {
            Ok(())
        }
        async fn pause(&self, _: &str) -> Result<(), ClientError> {
            Ok(())
        }
        async fn resume(&self, _: &str) -> Result<(), ClientError> {
            Ok(())
        }
    }

    fn result(title: &str, format: &str, seeders: u32) -> SearchResult {
        let mut result = SearchResult::new(title, format, "tracker", format!("magnet:?xt={title}"));
        result.seeders = seeders;
        result
    }

    fn wanted(media_type: MediaType) -> WantedItem {
        WantedItem {
            media_item_id: 5,
            title: "Dune".to_string(),
            author: Some("Frank Herbert".to_string()),
            isbn: None,
            external_id: None,
            media_type,
        }
    }

    async fn acquirer(
        results: Vec<SearchResult>,
        with_client: bool,
    ) -> (Acquirer, Arc<RecordingClient>) {
        let mut indexers = IndexerRegistry::new();
        indexers.register(Arc::new(FixedIndexer { results }));

        let client = Arc::new(RecordingClient::default());
        let registry = ClientRegistry::new();
        let mut config =
            ClientConfig::new(3, "qbit", ClientKind::Qbittorrent, "http://localhost:8080");
        config.category = Some("books".to_string());
        if with_client {
            registry.register(3, 0, client.clone());
        }

        let db = Database::new_in_memory().await.unwrap();
        let downloads = Arc::new(DownloadOrchestrator::new(
            Arc::new(SqliteDownloadStore::new(&db)),
            Arc::new(registry),
            EventBus::default(),
        ));
        let acquirer = Acquirer::new(
            SearchOrchestrator::new(Arc::new(indexers)),
            downloads,
            QualityConfig::default(),
            vec![config],
        );
        (acquirer, client)
    }

    #[tokio::test]
    async fn test_acquire_submits_best_candidate_with_client_defaults() {
        let (acquirer, client) = acquirer(
            vec![result("Dune pdf", "PDF", 0), result("Dune epub", "EPUB", 12)],
            true,
        )
        .await;

        let outcome = acquirer.acquire(&wanted(MediaType::Ebook)).await.unwrap();
        let AcquireOutcome::Submitted(download) = outcome else {
            panic!("expected a submission");
        };
        assert_eq!(download.title, "Dune epub");
        assert_eq!(download.client_id, 3);
        assert_eq!(download.media_item_id, 5);

        let submitted = client.submitted.lock().unwrap();
        assert_eq!(submitted[0].0, "magnet:?xt=Dune epub");
        assert_eq!(submitted[0].1.category.as_deref(), Some("books"));
    }

    #[tokio::test]
    async fn test_acquire_skips_item_already_tracked() {
        let (acquirer, client) = acquirer(vec![result("Dune", "EPUB", 1)], true).await;
        let item = wanted(MediaType::Ebook);

        let first = acquirer.acquire(&item).await.unwrap();
        assert!(matches!(first, AcquireOutcome::Submitted(_)));
        let second = acquirer.acquire(&item).await.unwrap();
        assert!(matches!(second, AcquireOutcome::AlreadyTracked(_)));
        assert_eq!(client.submitted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_acquire_reports_no_acceptable_candidates() {
        let mut low = result("Dune 32k", "M4B", 5);
        low.bitrate_kbps = Some(32);
        let (acquirer, _) = acquirer(vec![low], true).await;

        let outcome = acquirer.acquire(&wanted(MediaType::Audiobook)).await.unwrap();
        assert_eq!(outcome, AcquireOutcome::NoAcceptable { candidates: 1 });
    }

    #[tokio::test]
    async fn test_acquire_without_matching_client() {
        let (acquirer, _) = acquirer(vec![result("Dune", "EPUB", 1)], false).await;
        let outcome = acquirer.acquire(&wanted(MediaType::Ebook)).await.unwrap();
        assert_eq!(outcome, AcquireOutcome::NoClient(DownloadProtocol::Torrent));
    }

    #[tokio::test]
    async fn test_acquire_all_counts_outcomes() {
        let (acquirer, _) = acquirer(Vec::new(), true).await;
        let report = acquirer
            .acquire_all(&[wanted(MediaType::Ebook), wanted(MediaType::Audiobook)])
            .await;
        assert_eq!(report.skipped, 2);
        assert_eq!(report.submitted, 0);
    }
}
