//! qBittorrent Web API v2 adapter.
//!
//! Login trades credentials for an `SID` session cookie, kept in the adapter's
//! cookie jar. The session expires silently; an expired session answers 403,
//! which triggers exactly one fresh login followed by one retry of the
//! original call.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::header::{CONTENT_TYPE, REFERER};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use url::Url;
use url::form_urlencoded;

use super::{
    ClientError, ClientState, DownloadClient, DownloadInfo, SubmitOptions, magnet_info_hash,
    parse_client_url, required,
};
use crate::config::ClientConfig;
use crate::http_client::{HttpSettings, build_http_client};
use crate::indexer::DownloadProtocol;
use crate::indexer::lenient::{LenientF64, LenientU64};
use crate::user_agent::default_api_user_agent;

const API_PREFIX: &str = "api/v2/";

/// Login bookkeeping; the cookie itself lives in the jar.
#[derive(Debug, Default)]
struct Session {
    /// Bumped on every successful login.
    generation: u64,
    active: bool,
}

/// Cookie-session REST adapter for qBittorrent.
pub struct QbittorrentClient {
    name: String,
    base_url: Url,
    username: String,
    password: String,
    client: Client,
    session: Mutex<Session>,
}

impl QbittorrentClient {
    /// Builds the adapter from its config entry.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when the URL or credentials are missing.
    pub fn new(config: &ClientConfig, http: &HttpSettings) -> Result<Self, ClientError> {
        let base_url = parse_client_url(&config.name, &config.base_url)?;
        let username = required(&config.name, config.username.as_deref(), "username")?;
        let password = required(&config.name, config.password.as_deref(), "password")?;
        let jar = Arc::new(Jar::default());
        let client = build_http_client(&config.name, default_api_user_agent(), Some(jar), http)
            .map_err(|e| ClientError::config(&config.name, e.to_string()))?;
        Ok(Self {
            name: config.name.clone(),
            base_url,
            username,
            password,
            client,
            session: Mutex::new(Session::default()),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(&format!("{API_PREFIX}{path}"))
            .map_err(|e| {
                ClientError::config(&self.name, format!("cannot build URL for {path}: {e}"))
            })
    }

    #[instrument(skip(self), fields(client = %self.name))]
    async fn login(&self) -> Result<(), ClientError> {
        let url = self.endpoint("auth/login")?;
        let body = form_urlencoded::Serializer::new(String::new())
            .append_pair("username", &self.username)
            .append_pair("password", &self.password)
            .finish();
        let response = self
            .client
            .post(url)
            .header(REFERER, self.base_url.as_str())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(&self.name, &e))?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN {
            return Err(ClientError::auth(
                &self.name,
                "login refused; too many failed attempts have banned this address",
            ));
        }
        if !status.is_success() {
            return Err(ClientError::network(&self.name, format!("login returned HTTP {status}")));
        }
        let text = response
            .text()
            .await
            .map_err(|e| ClientError::from_reqwest(&self.name, &e))?;
        if text.trim() == "Fails." {
            return Err(ClientError::auth(&self.name, "invalid username or password"));
        }
        info!("Logged in to qBittorrent");
        Ok(())
    }

    /// Logs in unless a session is active; returns the session generation.
    async fn ensure_session(&self) -> Result<u64, ClientError> {
        let mut session = self.session.lock().await;
        if !session.active {
            self.login().await?;
            session.generation += 1;
            session.active = true;
        }
        Ok(session.generation)
    }

    async fn invalidate_session(&self, stale: u64) {
        let mut session = self.session.lock().await;
        if session.generation == stale {
            session.active = false;
        }
    }

    async fn send(
        &self,
        method: &Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<reqwest::Response, ClientError> {
        let mut url = self.endpoint(path)?;
        let request = if *method == Method::GET {
            if !params.is_empty() {
                url.query_pairs_mut()
                    .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
            }
            self.client.get(url)
        } else {
            let body = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())))
                .finish();
            self.client
                .request(method.clone(), url)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(body)
        };
        request
            .header(REFERER, self.base_url.as_str())
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(&self.name, &e))
    }

    /// Sends an authenticated call, re-logging in once on 403.
    async fn call(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<(StatusCode, String), ClientError> {
        let mut relogged = false;
        loop {
            let generation = self.ensure_session().await?;
            let response = self.send(&method, path, params).await?;
            let status = response.status();
            if status == StatusCode::FORBIDDEN {
                if relogged {
                    return Err(ClientError::auth(&self.name, "session rejected right after login"));
                }
                debug!(path, "Session expired; logging in again");
                self.invalidate_session(generation).await;
                relogged = true;
                continue;
            }
            let body = response
                .text()
                .await
                .map_err(|e| ClientError::from_reqwest(&self.name, &e))?;
            return Ok((status, body));
        }
    }

    async fn call_ok(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<String, ClientError> {
        let (status, body) = self.call(method, path, params).await?;
        self.check_status(path, status)?;
        Ok(body)
    }

    fn check_status(&self, path: &str, status: StatusCode) -> Result<(), ClientError> {
        if status.is_success() {
            Ok(())
        } else if status.is_server_error() {
            Err(ClientError::network(&self.name, format!("{path} returned HTTP {status}")))
        } else {
            Err(ClientError::protocol(&self.name, format!("{path} returned HTTP {status}")))
        }
    }

    async fn torrents(&self, params: &[(&str, String)]) -> Result<Vec<TorrentRow>, ClientError> {
        let body = self.call_ok(Method::GET, "torrents/info", params).await?;
        serde_json::from_str(&body)
            .map_err(|e| {
                ClientError::protocol(&self.name, format!("unexpected torrents/info response: {e}"))
            })
    }

    /// Calls `primary`, falling back to `renamed` on 404 (v5 renamed
    /// pause/resume to stop/start).
    async fn call_renamed(
        &self,
        primary: &str,
        renamed: &str,
        id: &str,
    ) -> Result<(), ClientError> {
        let params = [("hashes", id.to_string())];
        let (status, _) = self.call(Method::POST, primary, &params).await?;
        if status == StatusCode::NOT_FOUND {
            debug!(primary, renamed, "Endpoint missing; trying renamed endpoint");
            self.call_ok(Method::POST, renamed, &params).await?;
            return Ok(());
        }
        self.check_status(primary, status)
    }
}

impl std::fmt::Debug for QbittorrentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QbittorrentClient")
            .field("name", &self.name)
            .field("base_url", &self.base_url.as_str())
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct TorrentRow {
    hash: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    progress: LenientF64,
    #[serde(default)]
    size: LenientU64,
    #[serde(default)]
    total_size: LenientU64,
    #[serde(default)]
    completed: LenientU64,
    #[serde(default)]
    save_path: Option<String>,
    #[serde(default)]
    content_path: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

impl TorrentRow {
    fn into_info(self) -> DownloadInfo {
        let state = map_state(&self.state, self.progress.0);
        let mut info = DownloadInfo::new(self.hash, self.name, state);
        info.set_progress(self.progress.0);
        info.size_bytes = if self.total_size.0 > 0 {
            self.total_size.0
        } else {
            self.size.0
        };
        info.downloaded_bytes = self.completed.0;
        info.output_path = self
            .content_path
            .filter(|p| !p.is_empty())
            .or(self.save_path.filter(|p| !p.is_empty()));
        info.category = self.category.filter(|c| !c.is_empty());
        if state == ClientState::Failed {
            info.error = Some(format!("torrent reported state '{}'", self.state));
        }
        info
    }
}

fn map_state(state: &str, progress: f64) -> ClientState {
    match state {
        "error" | "missingFiles" => ClientState::Failed,
        "pausedDL" | "stoppedDL" => ClientState::Paused,
        "uploading" | "stalledUP" | "queuedUP" | "forcedUP" | "checkingUP" | "pausedUP"
        | "stoppedUP" => ClientState::Completed,
        "downloading" | "stalledDL" | "forcedDL" | "moving" => ClientState::Downloading,
        "queuedDL" | "checkingDL" | "checkingResumeData" | "allocating" | "metaDL"
        | "forcedMetaDL" => ClientState::Queued,
        _ if progress >= 1.0 => ClientState::Completed,
        _ => ClientState::Queued,
    }
}

fn bool_param(value: bool) -> String {
    String::from(if value { "true" } else { "false" })
}

#[async_trait]
impl DownloadClient for QbittorrentClient {
    fn client_type(&self) -> &'static str {
        "qbittorrent"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> DownloadProtocol {
        DownloadProtocol::Torrent
    }

    #[instrument(skip(self), fields(client = %self.name))]
    async fn test_connection(&self) -> Result<(), ClientError> {
        let version = self.call_ok(Method::GET, "app/version", &[]).await?;
        debug!(version = version.trim(), "qBittorrent reachable");
        Ok(())
    }

    #[instrument(skip(self, locator, options), fields(client = %self.name))]
    async fn submit(&self, locator: &str, options: &SubmitOptions) -> Result<String, ClientError> {
        let mut params = vec![
            ("urls", locator.to_string()),
            ("paused", bool_param(options.start_paused)),
            ("stopped", bool_param(options.start_paused)),
        ];
        if let Some(category) = options.category.as_deref().filter(|c| !c.is_empty()) {
            params.push(("category", category.to_string()));
        }
        if let Some(save_path) = &options.save_path {
            params.push(("savepath", save_path.display().to_string()));
        }
        if options.priority > 0 {
            params.push(("addToTopOfQueue", "true".to_string()));
        }

        let (status, body) = self.call(Method::POST, "torrents/add", &params).await?;
        if status == StatusCode::UNSUPPORTED_MEDIA_TYPE {
            return Err(ClientError::submit(&self.name, "torrent is not valid"));
        }
        self.check_status("torrents/add", status)
            .map_err(|e| ClientError::submit(&self.name, e.to_string()))?;
        if body.trim() == "Fails." {
            return Err(ClientError::submit(&self.name, "qBittorrent rejected the torrent"));
        }

        if let Some(hash) = magnet_info_hash(locator) {
            info!(hash = %hash, "Torrent added");
            return Ok(hash);
        }

        let mut lookup = vec![
            ("sort", "added_on".to_string()),
            ("reverse", "true".to_string()),
            ("limit", "1".to_string()),
        ];
        if let Some(category) = options.category.as_deref().filter(|c| !c.is_empty()) {
            lookup.push(("category", category.to_string()));
        }
        let newest = self.torrents(&lookup).await?;
        let hash = newest
            .into_iter()
            .next()
            .map(|row| row.hash)
            .ok_or_else(|| ClientError::submit(&self.name, "torrent accepted but not listed"))?;
        info!(hash = %hash, "Torrent added");
        Ok(hash)
    }

    #[instrument(skip(self), fields(client = %self.name))]
    async fn status(&self, id: &str) -> Result<DownloadInfo, ClientError> {
        let rows = self.torrents(&[("hashes", id.to_string())]).await?;
        rows.into_iter()
            .find(|row| row.hash.eq_ignore_ascii_case(id))
            .map(TorrentRow::into_info)
            .ok_or_else(|| ClientError::not_found(&self.name, id))
    }

    async fn list_all(&self, category: Option<&str>) -> Result<Vec<DownloadInfo>, ClientError> {
        let params: Vec<(&str, String)> = category
            .map(|c| vec![("category", c.to_string())])
            .unwrap_or_default();
        let rows = self.torrents(&params).await?;
        Ok(rows.into_iter().map(TorrentRow::into_info).collect())
    }

    #[instrument(skip(self), fields(client = %self.name))]
    async fn remove(&self, id: &str, delete_files: bool) -> Result<(), ClientError> {
        let params = [
            ("hashes", id.to_string()),
            ("deleteFiles", bool_param(delete_files)),
        ];
        self.call_ok(Method::POST, "torrents/delete", &params).await?;
        Ok(())
    }

    async fn pause(&self, id: &str) -> Result<(), ClientError> {
        self.call_renamed("torrents/pause", "torrents/stop", id).await
    }

    async fn resume(&self, id: &str) -> Result<(), ClientError> {
        self.call_renamed("torrents/resume", "torrents/start", id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::client::ClientErrorKind;
    use crate::config::ClientKind;
    use crate::test_support::socket_guard::start_mock_server_or_skip;

    const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

    fn client_for(base_url: &str) -> QbittorrentClient {
        let mut config = ClientConfig::new(1, "qbit", ClientKind::Qbittorrent, base_url);
        config.username = Some("admin".to_string());
        config.password = Some("secret".to_string());
        QbittorrentClient::new(&config, &HttpSettings::default()).unwrap()
    }

    async fn mount_login(server: &MockServer, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/api/v2/auth/login"))
            .and(body_string_contains("username=admin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "SID=abc123; HttpOnly; path=/")
                    .set_body_string("Ok."),
            )
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    fn torrent_json(state: &str, progress: f64) -> serde_json::Value {
        serde_json::json!([{
            "hash": HASH,
            "name": "Dune",
            "state": state,
            "progress": progress,
            "size": 1000,
            "total_size": 1000,
            "completed": 500,
            "save_path": "/downloads/",
            "content_path": "/downloads/Dune",
            "category": "books"
        }])
    }

    #[test]
    fn test_new_requires_credentials() {
        let config = ClientConfig::new(1, "qbit", ClientKind::Qbittorrent, "http://localhost:8080");
        let err = QbittorrentClient::new(&config, &HttpSettings::default()).unwrap_err();
        assert_eq!(err.kind(), ClientErrorKind::Config);
    }

    #[test]
    fn test_map_state_table() {
        assert_eq!(map_state("downloading", 0.3), ClientState::Downloading);
        assert_eq!(map_state("stalledUP", 1.0), ClientState::Completed);
        assert_eq!(map_state("pausedDL", 0.3), ClientState::Paused);
        assert_eq!(map_state("stoppedUP", 1.0), ClientState::Completed);
        assert_eq!(map_state("missingFiles", 0.3), ClientState::Failed);
        assert_eq!(map_state("metaDL", 0.0), ClientState::Queued);
        assert_eq!(map_state("somethingNew", 1.0), ClientState::Completed);
    }

    #[tokio::test]
    async fn test_status_logs_in_and_sends_session_cookie() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        mount_login(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/api/v2/torrents/info"))
            .and(query_param("hashes", HASH))
            .and(header("cookie", "SID=abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(torrent_json("downloading", 0.5)))
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let info = client.status(HASH).await.unwrap();
        assert_eq!(info.state, ClientState::Downloading);
        assert!((info.progress - 0.5).abs() < f64::EPSILON);
        assert_eq!(info.size_bytes, 1000);
        assert_eq!(info.downloaded_bytes, 500);
        assert_eq!(info.output_path.as_deref(), Some("/downloads/Dune"));

        // second call reuses the session
        client.status(HASH).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_session_relogs_exactly_once() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        mount_login(&server, 2).await;
        Mock::given(method("GET"))
            .and(path("/api/v2/torrents/info"))
            .respond_with(ResponseTemplate::new(403))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/torrents/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(torrent_json("stalledUP", 1.0)))
            .mount(&server)
            .await;

        let info = client_for(&server.uri()).status(HASH).await.unwrap();
        assert_eq!(info.state, ClientState::Completed);
    }

    #[tokio::test]
    async fn test_relogin_replaces_session_cookie_in_jar() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("POST"))
            .and(path("/api/v2/auth/login"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "SID=stale; HttpOnly; path=/")
                    .set_body_string("Ok."),
            )
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v2/auth/login"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "SID=fresh; HttpOnly; path=/")
                    .set_body_string("Ok."),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/torrents/info"))
            .and(header("cookie", "SID=fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(torrent_json("downloading", 0.5)))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/torrents/info"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let info = client_for(&server.uri()).status(HASH).await.unwrap();
        assert_eq!(info.state, ClientState::Downloading);
    }

    #[tokio::test]
    async fn test_persistent_403_is_auth_error_without_loop() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        mount_login(&server, 2).await;
        Mock::given(method("GET"))
            .and(path("/api/v2/torrents/info"))
            .respond_with(ResponseTemplate::new(403))
            .expect(2)
            .mount(&server)
            .await;

        let err = client_for(&server.uri()).status(HASH).await.unwrap_err();
        assert_eq!(err.kind(), ClientErrorKind::Auth);
    }

    #[tokio::test]
    async fn test_bad_credentials_are_auth_error() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("POST"))
            .and(path("/api/v2/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Fails."))
            .mount(&server)
            .await;

        let err = client_for(&server.uri()).test_connection().await.unwrap_err();
        assert_eq!(err.kind(), ClientErrorKind::Auth);
    }

    #[tokio::test]
    async fn test_submit_magnet_returns_info_hash() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        mount_login(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/api/v2/torrents/add"))
            .and(body_string_contains("category=books"))
            .and(body_string_contains("paused=false"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Ok."))
            .expect(1)
            .mount(&server)
            .await;

        let options = SubmitOptions {
            category: Some("books".to_string()),
            ..SubmitOptions::default()
        };
        let magnet = format!("magnet:?xt=urn:btih:{}&dn=Dune", HASH.to_ascii_uppercase());
        let id = client_for(&server.uri()).submit(&magnet, &options).await.unwrap();
        assert_eq!(id, HASH);
    }

    #[tokio::test]
    async fn test_submit_torrent_url_looks_up_newest_hash() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        mount_login(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/api/v2/torrents/add"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Ok."))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/torrents/info"))
            .and(query_param("sort", "added_on"))
            .and(query_param("reverse", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(torrent_json("metaDL", 0.0)))
            .mount(&server)
            .await;

        let id = client_for(&server.uri())
            .submit("https://tracker.example/dl/1.torrent", &SubmitOptions::default())
            .await
            .unwrap();
        assert_eq!(id, HASH);
    }

    #[tokio::test]
    async fn test_submit_rejected_is_submit_error() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        mount_login(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/api/v2/torrents/add"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Fails."))
            .mount(&server)
            .await;

        let err = client_for(&server.uri())
            .submit("https://tracker.example/dl/1.torrent", &SubmitOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ClientErrorKind::Submit);
    }

    #[tokio::test]
    async fn test_status_unknown_hash_is_not_found() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        mount_login(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/api/v2/torrents/info"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&server)
            .await;

        let err = client_for(&server.uri()).status(HASH).await.unwrap_err();
        assert_eq!(err.kind(), ClientErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_pause_falls_back_to_stop_endpoint() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        mount_login(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/api/v2/torrents/pause"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v2/torrents/stop"))
            .and(body_string_contains(HASH))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server.uri()).pause(HASH).await.unwrap();
    }
}
