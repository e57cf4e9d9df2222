//! End-to-end acquisition against mock indexer and client back-ends.
//!
//! A Torznab feed and a qBittorrent Web API are served by wiremock; the
//! download store is a real SQLite file in a temp directory.

use std::sync::Arc;

use acquirer_core::{
    AcquireOutcome, Acquirer, ClientConfig, ClientKind, ClientRegistry, Database,
    DownloadEventKind, DownloadOrchestrator, DownloadStatus, EventBus, IndexerConfig,
    IndexerProtocol, IndexerRegistry, MediaType, SearchOrchestrator, SqliteDownloadStore,
    WantedItem,
};
use acquirer_core::config::QualityConfig;
use acquirer_core::http_client::HttpSettings;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

fn feed() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:torznab="http://torznab.com/schemas/2015/feed">
  <channel>
    <item>
      <title>Frank Herbert - Dune [PDF]</title>
      <link>https://tracker.example/dl/9.torrent</link>
      <size>2048</size>
      <torznab:attr name="seeders" value="40"/>
    </item>
    <item>
      <title>Frank Herbert - Dune [EPUB]</title>
      <link>magnet:?xt=urn:btih:{HASH}&amp;dn=Dune</link>
      <size>1048576</size>
      <torznab:attr name="seeders" value="12"/>
    </item>
  </channel>
</rss>"#
    )
}

fn torrent_rows(state: &str, progress: f64) -> serde_json::Value {
    serde_json::json!([{
        "hash": HASH,
        "name": "Dune",
        "state": state,
        "progress": progress,
        "size": 1_048_576,
        "total_size": 1_048_576,
        "completed": 524_288,
        "save_path": "/downloads/",
        "content_path": "/downloads/Dune.epub",
        "category": "books"
    }])
}

async fn mount_indexer(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api"))
        .and(query_param("t", "search"))
        .and(query_param("apikey", "key123"))
        .respond_with(ResponseTemplate::new(200).set_body_string(feed()))
        .mount(server)
        .await;
}

async fn mount_client(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v2/auth/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "SID=abc123; HttpOnly; path=/")
                .set_body_string("Ok."),
        )
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/torrents/add"))
        .and(body_string_contains("category=books"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Ok."))
        .expect(1)
        .mount(server)
        .await;
}

struct Harness {
    _dir: TempDir,
    downloads: Arc<DownloadOrchestrator>,
    acquirer: Acquirer,
    events: EventBus,
}

async fn harness(indexer_url: &str, client_url: &str) -> Harness {
    let dir = TempDir::new().expect("failed to create temp dir");
    let db = Database::new(&dir.path().join("acquirer.db"))
        .await
        .expect("failed to open database");

    let http = HttpSettings::default();
    let mut indexer = IndexerConfig::new(1, "feed", IndexerProtocol::Torznab, indexer_url);
    indexer.api_key = Some("key123".to_string());
    let indexers = IndexerRegistry::from_configs(&[indexer], &http).expect("indexer registry");

    let mut client = ClientConfig::new(1, "qbit", ClientKind::Qbittorrent, client_url);
    client.username = Some("admin".to_string());
    client.password = Some("secret".to_string());
    client.category = Some("books".to_string());
    let client_configs = vec![client];
    let clients = ClientRegistry::from_configs(&client_configs, &http).expect("client registry");

    let events = EventBus::default();
    let downloads = Arc::new(DownloadOrchestrator::new(
        Arc::new(SqliteDownloadStore::new(&db)),
        Arc::new(clients),
        events.clone(),
    ));
    let acquirer = Acquirer::new(
        SearchOrchestrator::new(Arc::new(indexers)),
        Arc::clone(&downloads),
        QualityConfig::default(),
        client_configs,
    );

    Harness {
        _dir: dir,
        downloads,
        acquirer,
        events,
    }
}

fn wanted() -> WantedItem {
    WantedItem {
        media_item_id: 42,
        title: "Dune".to_string(),
        author: Some("Frank Herbert".to_string()),
        isbn: None,
        external_id: None,
        media_type: MediaType::Ebook,
    }
}

#[tokio::test]
async fn test_acquire_submits_best_candidate_and_sync_completes_it() {
    let indexer_server = MockServer::start().await;
    let client_server = MockServer::start().await;
    mount_indexer(&indexer_server).await;
    mount_client(&client_server).await;

    let h = harness(&indexer_server.uri(), &client_server.uri()).await;
    let mut events = h.events.subscribe();

    let outcome = h.acquirer.acquire(&wanted()).await.expect("acquire failed");
    let AcquireOutcome::Submitted(download) = outcome else {
        panic!("expected a submission");
    };
    assert_eq!(download.external_id, HASH);
    assert!(download.title.contains("[EPUB]"), "seeded EPUB beats seeded PDF");
    assert_eq!(download.status, DownloadStatus::Queued);
    assert_eq!(download.category.as_deref(), Some("books"));
    assert_eq!(
        events.recv().await.expect("started event").kind,
        DownloadEventKind::Started
    );

    // Second pass sees the tracked record and does not resubmit.
    let again = h.acquirer.acquire(&wanted()).await.expect("acquire failed");
    assert!(matches!(again, AcquireOutcome::AlreadyTracked(id) if id == download.id));

    Mock::given(method("GET"))
        .and(path("/api/v2/torrents/info"))
        .and(query_param("hashes", HASH))
        .respond_with(ResponseTemplate::new(200).set_body_json(torrent_rows("uploading", 1.0)))
        .mount(&client_server)
        .await;

    let report = h.downloads.sync().await.expect("sync failed");
    assert_eq!(report.checked, 1);
    assert_eq!(report.completed, 1);

    let stored = h.downloads.get(download.id).await.expect("record missing");
    assert_eq!(stored.status, DownloadStatus::Completed);
    assert!(stored.completed_at.is_some());
    assert_eq!(stored.output_path.as_deref(), Some("/downloads/Dune.epub"));
    assert_eq!(
        events.recv().await.expect("completed event").kind,
        DownloadEventKind::Completed
    );

    let ready = h.downloads.list_ready_for_import().await.expect("list failed");
    assert_eq!(ready.len(), 1);
    let claimed = h.downloads.claim_for_import(download.id).await.expect("claim failed");
    assert_eq!(claimed.status, DownloadStatus::Importing);
}

#[tokio::test]
async fn test_sync_tracks_progress_until_completion() {
    let indexer_server = MockServer::start().await;
    let client_server = MockServer::start().await;
    mount_indexer(&indexer_server).await;
    mount_client(&client_server).await;

    let h = harness(&indexer_server.uri(), &client_server.uri()).await;
    let AcquireOutcome::Submitted(download) =
        h.acquirer.acquire(&wanted()).await.expect("acquire failed")
    else {
        panic!("expected a submission");
    };

    let downloading = Mock::given(method("GET"))
        .and(path("/api/v2/torrents/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(torrent_rows("downloading", 0.5)))
        .mount_as_scoped(&client_server)
        .await;

    let first = h.downloads.sync().await.expect("sync failed");
    assert_eq!(first.updated, 1);
    let stored = h.downloads.get(download.id).await.expect("record missing");
    assert_eq!(stored.status, DownloadStatus::Downloading);
    assert!((stored.progress - 0.5).abs() < f64::EPSILON);
    assert_eq!(stored.downloaded_bytes, 524_288);

    // Same client view again: nothing changes.
    let second = h.downloads.sync().await.expect("sync failed");
    assert_eq!(second.checked, 1);
    assert_eq!(second.updated, 0);
    drop(downloading);

    Mock::given(method("GET"))
        .and(path("/api/v2/torrents/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(torrent_rows("error", 0.5)))
        .mount(&client_server)
        .await;

    let third = h.downloads.sync().await.expect("sync failed");
    assert_eq!(third.failed, 1);
    let stored = h.downloads.get(download.id).await.expect("record missing");
    assert_eq!(stored.status, DownloadStatus::Failed);
    assert_eq!(
        stored.error_message.as_deref(),
        Some("torrent reported state 'error'")
    );

    // Terminal records drop out of the active set.
    let fourth = h.downloads.sync().await.expect("sync failed");
    assert_eq!(fourth.checked, 0);
}

#[tokio::test]
async fn test_acquire_with_no_indexer_results_submits_nothing() {
    let indexer_server = MockServer::start().await;
    let client_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<?xml version="1.0"?><rss version="2.0"><channel></channel></rss>"#,
        ))
        .mount(&indexer_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/torrents/add"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Ok."))
        .expect(0)
        .mount(&client_server)
        .await;

    let h = harness(&indexer_server.uri(), &client_server.uri()).await;
    let outcome = h.acquirer.acquire(&wanted()).await.expect("acquire failed");

    assert!(matches!(outcome, AcquireOutcome::NoResults));
    assert!(h.downloads.list().await.expect("list failed").is_empty());
}
