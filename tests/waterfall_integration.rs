//! Waterfall search and quality selection through the public API.

use std::sync::{Arc, Mutex};

use acquirer_core::quality::{rank, select_best};
use acquirer_core::{
    DownloadProtocol, Indexer, IndexerError, IndexerProtocol, IndexerRegistry, MediaType,
    QualityPolicy, SearchOrchestrator, SearchQuery, SearchResult,
};
use async_trait::async_trait;

/// Answers only the query shapes it is scripted for and records every call.
struct ScriptedIndexer {
    name: String,
    priority: i32,
    fail: bool,
    /// Result format returned when the query has an author.
    author_title: Option<&'static str>,
    /// Result format returned for a bare title.
    title: Option<&'static str>,
    /// Result format returned for an identifier-only query.
    identifier: Option<&'static str>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedIndexer {
    fn new(name: &str, priority: i32) -> Self {
        Self {
            name: name.to_string(),
            priority,
            fail: false,
            author_title: None,
            title: None,
            identifier: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Indexer for ScriptedIndexer {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> IndexerProtocol {
        IndexerProtocol::Torznab
    }

    fn download_protocol(&self) -> DownloadProtocol {
        DownloadProtocol::Torrent
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, IndexerError> {
        let shape = if query.author().is_some() {
            "author_title"
        } else if !query.title.is_empty() {
            "title"
        } else {
            "identifier"
        };
        self.calls.lock().unwrap().push(shape.to_string());

        if self.fail {
            return Err(IndexerError::network(&self.name, "connection refused"));
        }
        let format = match shape {
            "author_title" => self.author_title,
            "title" => self.title,
            _ => self.identifier,
        };
        Ok(format
            .map(|format| {
                let title = format!("{} {shape}", self.name);
                vec![SearchResult::new(title, format, &self.name, "magnet:?xt=x")]
            })
            .unwrap_or_default())
    }

    async fn test_connection(&self) -> Result<(), IndexerError> {
        Ok(())
    }
}

fn orchestrator(indexers: Vec<Arc<ScriptedIndexer>>) -> SearchOrchestrator {
    let mut registry = IndexerRegistry::new();
    for indexer in indexers {
        registry.register(indexer);
    }
    SearchOrchestrator::new(Arc::new(registry))
}

fn full_query() -> SearchQuery {
    SearchQuery::new("Dune", MediaType::Ebook)
        .with_author("Frank Herbert")
        .with_isbn("9780441013593")
}

#[tokio::test]
async fn test_waterfall_stops_at_first_productive_shape() {
    let mut indexer = ScriptedIndexer::new("a", 1);
    indexer.title = Some("EPUB");
    indexer.identifier = Some("PDF");
    let indexer = Arc::new(indexer);

    let results = orchestrator(vec![Arc::clone(&indexer)])
        .search(&full_query())
        .await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].format, "EPUB");
    assert_eq!(indexer.calls(), ["author_title", "title"]);
}

#[tokio::test]
async fn test_waterfall_skips_author_shape_without_author() {
    let mut indexer = ScriptedIndexer::new("a", 1);
    indexer.identifier = Some("EPUB");
    let indexer = Arc::new(indexer);

    let query = SearchQuery::new("Dune", MediaType::Ebook).with_isbn("9780441013593");
    let results = orchestrator(vec![Arc::clone(&indexer)]).search(&query).await;

    assert_eq!(results.len(), 1);
    assert_eq!(indexer.calls(), ["title", "identifier"]);
}

#[tokio::test]
async fn test_failing_indexer_does_not_block_others() {
    let mut broken = ScriptedIndexer::new("broken", 1);
    broken.fail = true;
    let broken = Arc::new(broken);
    let mut healthy = ScriptedIndexer::new("healthy", 2);
    healthy.author_title = Some("EPUB");
    let healthy = Arc::new(healthy);

    let results = orchestrator(vec![Arc::clone(&broken), Arc::clone(&healthy)])
        .search(&full_query())
        .await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].source, "healthy");
    assert_eq!(broken.calls().len(), 3, "each shape is tried despite errors");
    assert_eq!(healthy.calls(), ["author_title"]);
}

#[tokio::test]
async fn test_results_follow_indexer_priority() {
    let mut late = ScriptedIndexer::new("late", 50);
    late.author_title = Some("MOBI");
    let mut early = ScriptedIndexer::new("early", 5);
    early.author_title = Some("PDF");

    let results = orchestrator(vec![Arc::new(late), Arc::new(early)])
        .search(&full_query())
        .await;

    let sources: Vec<&str> = results.iter().map(|r| r.source.as_str()).collect();
    assert_eq!(sources, ["early", "late"]);
}

#[tokio::test]
async fn test_search_then_select_prefers_policy_format() {
    let mut first = ScriptedIndexer::new("first", 1);
    first.author_title = Some("PDF");
    let mut second = ScriptedIndexer::new("second", 2);
    second.author_title = Some("EPUB");
    let results = orchestrator(vec![Arc::new(first), Arc::new(second)])
        .search(&full_query())
        .await;

    let policy = QualityPolicy::new(["epub", "azw3", "mobi", "pdf"], None).unwrap();
    let best = select_best(&results, &policy, false).unwrap();
    assert_eq!(best.source, "second");
    assert_eq!(best.score(), 100);

    let ranked = rank(&results, &policy, false);
    let formats: Vec<&str> = ranked.iter().map(|r| r.format.as_str()).collect();
    assert_eq!(formats, ["EPUB", "PDF"]);
}

#[test]
fn test_audiobook_bitrate_floor_rejects_low_quality() {
    let policy = QualityPolicy::new(["m4b", "mp3"], Some(64)).unwrap();
    let mut low = SearchResult::new("Dune 32k", "M4B", "a", "loc");
    low.bitrate_kbps = Some(32);
    let mut ok = SearchResult::new("Dune 128k", "MP3", "a", "loc");
    ok.bitrate_kbps = Some(128);
    ok.seeders = 3;

    let best = select_best(&[low.clone(), ok], &policy, true).unwrap();
    assert_eq!(best.title, "Dune 128k");
    assert_eq!(best.score(), 90 + 5 + 10);

    assert!(select_best(&[low], &policy, true).is_none());
}

#[test]
fn test_unknown_format_only_wins_when_nothing_matches() {
    let policy = QualityPolicy::new(["epub"], None).unwrap();
    let mut unknown = SearchResult::new("Dune", "Unknown", "a", "loc");
    unknown.seeders = 500;
    let epub = SearchResult::new("Dune", "EPUB", "b", "loc");

    let best = select_best(&[unknown.clone(), epub], &policy, false).unwrap();
    assert_eq!(best.source, "b");

    let fallback = select_best(&[unknown], &policy, false).unwrap();
    let scored = fallback.quality.unwrap();
    assert_eq!(scored.score, 0);
    assert!(!scored.matched);
}
