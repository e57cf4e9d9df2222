//! `run`: drive the wanted-list search and the download sync on a schedule.

use std::sync::Arc;
use std::time::Duration;

use acquirer_core::{Config, Scheduler};
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::context::AppContext;

const SEARCH_TASK: &str = "search-wanted";
const SYNC_TASK: &str = "sync-downloads";

pub async fn run_scheduler_command(config: &Config) -> Result<()> {
    let context = AppContext::build(config).await?;
    let scheduler = Arc::new(Scheduler::new(
        config.scheduler.tick(),
        config.scheduler.task_timeout(),
    ));

    let wanted = Arc::new(config.wanted.clone());
    let acquirer = Arc::clone(&context.acquirer);
    scheduler.register(
        SEARCH_TASK,
        Duration::from_secs(config.scheduler.search_interval_secs),
        move || {
            let acquirer = Arc::clone(&acquirer);
            let wanted = Arc::clone(&wanted);
            async move {
                acquirer.acquire_all(&wanted).await;
                anyhow::Ok(())
            }
        },
    )?;

    let downloads = Arc::clone(&context.downloads);
    scheduler.register(
        SYNC_TASK,
        Duration::from_secs(config.scheduler.sync_interval_secs),
        move || {
            let downloads = Arc::clone(&downloads);
            async move {
                downloads.sync().await?;
                anyhow::Ok(())
            }
        },
    )?;

    let cancel = CancellationToken::new();
    let runner = {
        let scheduler = Arc::clone(&scheduler);
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    };

    info!(wanted = config.wanted.len(), "Running; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Shutdown requested");
    cancel.cancel();
    runner.await.context("scheduler loop panicked")?;

    context.db.close().await;
    Ok(())
}
