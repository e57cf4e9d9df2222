//! `test`: connectivity check for every enabled adapter.

use acquirer_core::Config;
use anyhow::{Result, bail};

use super::context::{build_clients, build_indexers};

pub async fn run_test_command(config: &Config) -> Result<()> {
    let indexers = build_indexers(config)?;
    let clients = build_clients(config)?;

    let mut failures = 0usize;
    println!("indexers:");
    for (name, outcome) in indexers.test_all().await {
        match outcome {
            Ok(()) => println!("  ok    {name}"),
            Err(error) => {
                failures += 1;
                println!("  FAIL  {name}: {error}");
            }
        }
    }
    println!("clients:");
    for (name, outcome) in clients.test_all().await {
        match outcome {
            Ok(()) => println!("  ok    {name}"),
            Err(error) => {
                failures += 1;
                println!("  FAIL  {name}: {error}");
            }
        }
    }

    if failures > 0 {
        bail!("{failures} adapter(s) failed the connectivity check");
    }
    Ok(())
}
