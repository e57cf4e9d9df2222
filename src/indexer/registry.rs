//! Priority-ordered collection of indexers.
//!
//! The [`IndexerRegistry`] owns the configured adapters and hands them out in
//! search order (lower priority value first, registration order within a tie).

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use super::{Indexer, IndexerError, build_indexer};
use crate::config::IndexerConfig;
use crate::http_client::HttpSettings;

/// A priority-ordered collection of indexers.
pub struct IndexerRegistry {
    indexers: Vec<Arc<dyn Indexer>>,
}

impl IndexerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            indexers: Vec::new(),
        }
    }

    /// Registers an indexer, keeping the list sorted by priority.
    ///
    /// A later registration with an equal priority lands after the earlier one.
    #[tracing::instrument(skip(self, indexer), fields(indexer_name))]
    pub fn register(&mut self, indexer: Arc<dyn Indexer>) {
        tracing::Span::current().record("indexer_name", indexer.name());
        debug!(
            name = indexer.name(),
            priority = indexer.priority(),
            protocol = %indexer.protocol(),
            "Registering indexer"
        );
        let position = self
            .indexers
            .iter()
            .position(|existing| existing.priority() > indexer.priority())
            .unwrap_or(self.indexers.len());
        self.indexers.insert(position, indexer);
    }

    /// Builds every enabled entry and registers it.
    ///
    /// # Errors
    ///
    /// Returns the first adapter construction failure.
    pub fn from_configs(
        configs: &[IndexerConfig],
        http: &HttpSettings,
    ) -> Result<Self, IndexerError> {
        let mut registry = Self::new();
        for config in configs.iter().filter(|c| c.enabled) {
            registry.register(build_indexer(config, http)?);
        }
        Ok(registry)
    }

    /// Returns the indexers in search order.
    #[must_use]
    pub fn ordered(&self) -> &[Arc<dyn Indexer>] {
        &self.indexers
    }

    /// Looks up an indexer by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Indexer>> {
        self.indexers
            .iter()
            .find(|indexer| indexer.name() == name)
            .cloned()
    }

    /// Returns the number of registered indexers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indexers.len()
    }

    /// Returns true if no indexers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indexers.is_empty()
    }

    /// Tests connectivity of every indexer concurrently.
    ///
    /// Results come back in search order, one per indexer.
    #[tracing::instrument(skip(self))]
    pub async fn test_all(&self) -> Vec<(String, Result<(), IndexerError>)> {
        let checks = self.indexers.iter().map(|indexer| async move {
            let outcome = indexer.test_connection().await;
            match &outcome {
                Ok(()) => info!(indexer = indexer.name(), "Indexer connection OK"),
                Err(error) => {
                    warn!(indexer = indexer.name(), error = %error, "Indexer connection failed");
                }
            }
            (indexer.name().to_string(), outcome)
        });
        join_all(checks).await
    }
}

impl std::fmt::Debug for IndexerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.indexers.iter().map(|i| i.name()).collect();
        f.debug_struct("IndexerRegistry")
            .field("indexer_count", &self.indexers.len())
            .field("indexers", &names)
            .finish()
    }
}

impl Default for IndexerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::indexer::{DownloadProtocol, IndexerProtocol, SearchQuery, SearchResult};

    struct MockIndexer {
        mock_name: &'static str,
        mock_priority: i32,
        healthy: bool,
    }

    #[async_trait]
    impl Indexer for MockIndexer {
        fn name(&self) -> &str {
            self.mock_name
        }

        fn protocol(&self) -> IndexerProtocol {
            IndexerProtocol::Torznab
        }

        fn download_protocol(&self) -> DownloadProtocol {
            DownloadProtocol::Torrent
        }

        fn priority(&self) -> i32 {
            self.mock_priority
        }

        async fn search(&self, _query: &SearchQuery) -> Result<Vec<SearchResult>, IndexerError> {
            Ok(Vec::new())
        }

        async fn test_connection(&self) -> Result<(), IndexerError> {
            if self.healthy {
                Ok(())
            } else {
                Err(IndexerError::network(self.mock_name, "connection refused"))
            }
        }
    }

    fn mock(name: &'static str, priority: i32, healthy: bool) -> Arc<dyn Indexer> {
        Arc::new(MockIndexer {
            mock_name: name,
            mock_priority: priority,
            healthy,
        })
    }

    #[test]
    fn test_register_orders_by_priority_then_registration() {
        let mut registry = IndexerRegistry::new();
        registry.register(mock("late", 50, true));
        registry.register(mock("first", 1, true));
        registry.register(mock("tie-a", 10, true));
        registry.register(mock("tie-b", 10, true));

        let names: Vec<&str> = registry.ordered().iter().map(|i| i.name()).collect();
        assert_eq!(names, vec!["first", "tie-a", "tie-b", "late"]);
    }

    #[test]
    fn test_get_by_name() {
        let mut registry = IndexerRegistry::new();
        registry.register(mock("feed", 1, true));
        assert!(registry.get("feed").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_empty());
    }

    #[tokio::test]
    async fn test_test_all_reports_each_indexer() {
        let mut registry = IndexerRegistry::new();
        registry.register(mock("up", 1, true));
        registry.register(mock("down", 2, false));

        let results = registry.test_all().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "up");
        assert!(results[0].1.is_ok());
        assert_eq!(results[1].0, "down");
        assert!(results[1].1.is_err());
    }

    #[test]
    fn test_debug_lists_names() {
        let mut registry = IndexerRegistry::new();
        registry.register(mock("feed", 1, true));
        let debug = format!("{registry:?}");
        assert!(debug.contains("feed"));
    }
}
