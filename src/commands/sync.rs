//! `sync`: one reconciliation pass over active downloads.

use acquirer_core::Config;
use anyhow::{Context, Result};

use super::context::AppContext;

pub async fn run_sync_command(config: &Config) -> Result<()> {
    let context = AppContext::build(config).await?;
    let report = context.downloads.sync().await.context("download sync failed")?;

    println!(
        "checked {}, updated {}, completed {}, failed {}, errors {}",
        report.checked, report.updated, report.completed, report.failed, report.errors
    );
    for download in context.downloads.list().await? {
        println!(
            "  [{}] {:<11} {:>5.1}%  {}",
            download.id,
            download.status.as_str(),
            download.progress * 100.0,
            download.title
        );
    }

    context.db.close().await;
    Ok(())
}
