//! `check-config`: load, validate, and summarise the configuration.

use std::path::Path;

use acquirer_core::Config;
use anyhow::Result;

pub fn run_check_config_command(config: &Config, path: Option<&Path>) -> Result<()> {
    let source = path.map_or_else(
        || "<none> (using defaults)".to_string(),
        |p| p.display().to_string(),
    );
    println!("config_path = {source}");
    println!("database_path = {}", config.database_path().display());
    println!(
        "scheduler = tick {}s, search every {}s, sync every {}s, timeout {}s",
        config.scheduler.tick_secs,
        config.scheduler.search_interval_secs,
        config.scheduler.sync_interval_secs,
        config.scheduler.task_timeout_secs
    );

    println!("indexers = {}", config.indexers.len());
    for indexer in &config.indexers {
        println!(
            "  [{}] {} ({}, priority {}){}",
            indexer.id,
            indexer.name,
            indexer.kind,
            indexer.priority,
            if indexer.enabled { "" } else { " disabled" }
        );
    }

    println!("clients = {}", config.clients.len());
    for client in &config.clients {
        println!(
            "  [{}] {} ({}, priority {}){}",
            client.id,
            client.name,
            client.kind.as_str(),
            client.priority,
            if client.enabled { "" } else { " disabled" }
        );
    }

    println!("wanted = {}", config.wanted.len());
    println!("config OK");
    Ok(())
}
