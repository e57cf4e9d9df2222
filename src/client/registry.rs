//! Read-mostly map from client id to adapter instance.
//!
//! Lookups happen on every sync and submission; writes only when the process
//! builds its clients. The lock is never held across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use super::{ClientError, DownloadClient, build_client};
use crate::config::ClientConfig;
use crate::http_client::HttpSettings;
use crate::indexer::DownloadProtocol;

/// One registered adapter with its routing priority.
#[derive(Clone)]
pub struct RegisteredClient {
    /// Stable id stored on download records.
    pub id: i64,
    /// Lower values are preferred when routing.
    pub priority: i32,
    /// The adapter.
    pub client: Arc<dyn DownloadClient>,
}

impl std::fmt::Debug for RegisteredClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredClient")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("name", &self.client.name())
            .field("type", &self.client.client_type())
            .finish()
    }
}

/// Client registry keyed by numeric id.
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<i64, RegisteredClient>>,
}

impl ClientRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds every enabled entry and registers it.
    ///
    /// # Errors
    ///
    /// Returns the first adapter construction failure.
    pub fn from_configs(
        configs: &[ClientConfig],
        http: &HttpSettings,
    ) -> Result<Self, ClientError> {
        let registry = Self::new();
        for config in configs.iter().filter(|c| c.enabled) {
            registry.register(config.id, config.priority, build_client(config, http)?);
        }
        Ok(registry)
    }

    /// Registers (or replaces) the adapter for `id`.
    pub fn register(&self, id: i64, priority: i32, client: Arc<dyn DownloadClient>) {
        debug!(
            id,
            priority,
            name = client.name(),
            client_type = client.client_type(),
            "Registering download client"
        );
        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        clients.insert(
            id,
            RegisteredClient {
                id,
                priority,
                client,
            },
        );
    }

    /// Returns the adapter registered under `id`.
    #[must_use]
    pub fn get(&self, id: i64) -> Option<Arc<dyn DownloadClient>> {
        let clients = self.clients.read().unwrap_or_else(PoisonError::into_inner);
        clients.get(&id).map(|entry| Arc::clone(&entry.client))
    }

    /// Picks the preferred client accepting `protocol`: lowest priority value,
    /// then lowest id.
    #[must_use]
    pub fn for_protocol(&self, protocol: DownloadProtocol) -> Option<RegisteredClient> {
        let clients = self.clients.read().unwrap_or_else(PoisonError::into_inner);
        clients
            .values()
            .filter(|entry| entry.client.protocol() == protocol)
            .min_by_key(|entry| (entry.priority, entry.id))
            .cloned()
    }

    /// Returns all entries ordered by id.
    #[must_use]
    pub fn entries(&self) -> Vec<RegisteredClient> {
        let clients = self.clients.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<RegisteredClient> = clients.values().cloned().collect();
        entries.sort_by_key(|entry| entry.id);
        entries
    }

    /// Returns the number of registered clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true if no clients are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tests connectivity of every client concurrently, ordered by id.
    #[tracing::instrument(skip(self))]
    pub async fn test_all(&self) -> Vec<(String, Result<(), ClientError>)> {
        let checks = self.entries().into_iter().map(|entry| async move {
            let outcome = entry.client.test_connection().await;
            match &outcome {
                Ok(()) => info!(client = entry.client.name(), "Download client connection OK"),
                Err(error) => {
                    warn!(
                        client = entry.client.name(),
                        error = %error,
                        "Download client connection failed"
                    );
                }
            }
            (entry.client.name().to_string(), outcome)
        });
        join_all(checks).await
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries();
        f.debug_struct("ClientRegistry")
            .field("client_count", &entries.len())
            .field("clients", &entries)
            .finish()
    }
}
