//! Wiring shared by the commands that touch the download store.

use std::sync::Arc;

use acquirer_core::{
    Acquirer, ClientRegistry, Config, Database, DownloadOrchestrator, EventBus, IndexerRegistry,
    SearchOrchestrator, SqliteDownloadStore,
};
use anyhow::{Context, Result};
use tracing::debug;

/// Everything built from one loaded config.
pub struct AppContext {
    pub db: Database,
    pub downloads: Arc<DownloadOrchestrator>,
    pub acquirer: Arc<Acquirer>,
}

pub fn build_indexers(config: &Config) -> Result<Arc<IndexerRegistry>> {
    let registry = IndexerRegistry::from_configs(&config.indexers, &config.http.settings())
        .context("failed to build indexer adapters")?;
    Ok(Arc::new(registry))
}

pub fn build_clients(config: &Config) -> Result<Arc<ClientRegistry>> {
    let registry = ClientRegistry::from_configs(&config.clients, &config.http.settings())
        .context("failed to build download client adapters")?;
    Ok(Arc::new(registry))
}

impl AppContext {
    pub async fn build(config: &Config) -> Result<Self> {
        let indexers = build_indexers(config)?;
        let clients = build_clients(config)?;

        let db_path = config.database_path();
        let db = Database::new(&db_path)
            .await
            .with_context(|| format!("failed to open database at {}", db_path.display()))?;
        debug!(
            path = %db_path.display(),
            indexers = indexers.len(),
            clients = clients.len(),
            "Context ready"
        );

        let downloads = Arc::new(DownloadOrchestrator::new(
            Arc::new(SqliteDownloadStore::new(&db)),
            clients,
            EventBus::default(),
        ));
        let acquirer = Arc::new(Acquirer::new(
            SearchOrchestrator::new(indexers),
            Arc::clone(&downloads),
            config.quality.clone(),
            config.clients.clone(),
        ));

        Ok(Self {
            db,
            downloads,
            acquirer,
        })
    }
}
