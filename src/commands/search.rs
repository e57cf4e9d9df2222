//! `search`: waterfall search plus ranked output, no submission.

use acquirer_core::{Config, MediaType, SearchOrchestrator, SearchQuery, quality};
use anyhow::{Context, Result};

use super::context::build_indexers;
use crate::cli::SearchArgs;

pub async fn run_search_command(config: &Config, args: &SearchArgs) -> Result<()> {
    let media_type = if args.audiobook {
        MediaType::Audiobook
    } else {
        MediaType::Ebook
    };
    let mut query = SearchQuery::new(args.title.clone(), media_type);
    if let Some(author) = &args.author {
        query = query.with_author(author.clone());
    }
    if let Some(isbn) = &args.isbn {
        query = query.with_isbn(isbn.clone());
    }

    let indexers = build_indexers(config)?;
    if indexers.is_empty() {
        println!("No enabled indexers configured.");
        return Ok(());
    }

    let policy = config
        .quality
        .policy(media_type)
        .context("invalid quality policy")?;
    let results = SearchOrchestrator::new(indexers).search(&query).await;
    if results.is_empty() {
        println!("No results for \"{}\".", args.title);
        return Ok(());
    }

    let ranked = quality::rank(&results, &policy, media_type.is_audiobook());
    println!("{:>5}  {:<6} {:>9} {:>5}  {:<12} title", "score", "format", "size", "seed", "source");
    for result in ranked.iter().take(usize::from(args.limit)) {
        println!(
            "{:>5}  {:<6} {:>9} {:>5}  {:<12} {}",
            result.score(),
            result.format,
            format_size(result.size_bytes),
            result.seeders,
            result.source,
            result.title
        );
    }
    if ranked.len() > usize::from(args.limit) {
        println!("... {} more", ranked.len() - usize::from(args.limit));
    }
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
