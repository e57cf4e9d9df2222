//! Deluge Web UI JSON-RPC adapter.
//!
//! Every call is a JSON-RPC request to `{base}/json`. A usable session needs
//! two steps: `auth.login` (boolean result, sets the `_session_id` cookie in
//! the adapter's jar) and
//! a connected daemon. When the web UI is not connected to any daemon the
//! adapter connects it to the first configured host.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use reqwest::Client;
use reqwest::cookie::Jar;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{
    ClientError, ClientState, DownloadClient, DownloadInfo, SubmitOptions, magnet_info_hash,
    parse_client_url, required,
};
use crate::config::ClientConfig;
use crate::http_client::{HttpSettings, build_http_client};
use crate::indexer::DownloadProtocol;
use crate::indexer::lenient::{LenientF64, LenientU64};
use crate::user_agent::default_api_user_agent;

const NOT_AUTHENTICATED: i64 = 1;
const STATUS_FIELDS: [&str; 8] = [
    "name",
    "state",
    "progress",
    "total_wanted",
    "total_done",
    "save_path",
    "label",
    "message",
];

/// Persistent JSON-RPC adapter for Deluge.
pub struct DelugeClient {
    name: String,
    endpoint: Url,
    password: String,
    client: Client,
    request_id: AtomicU64,
    session: Mutex<Session>,
}

#[derive(Debug, Default)]
struct Session {
    /// Bumped on every successful login.
    generation: u64,
    active: bool,
}

#[derive(Debug, Deserialize)]
struct RpcReply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcFault>,
}

#[derive(Debug, Deserialize)]
struct RpcFault {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: i64,
}

impl DelugeClient {
    /// Builds the adapter from its config entry.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when the URL or password is missing.
    pub fn new(config: &ClientConfig, http: &HttpSettings) -> Result<Self, ClientError> {
        let base_url = parse_client_url(&config.name, &config.base_url)?;
        let endpoint = base_url
            .join("json")
            .map_err(|e| ClientError::config(&config.name, e.to_string()))?;
        let password = required(&config.name, config.password.as_deref(), "password")?;
        let jar = Arc::new(Jar::default());
        let client = build_http_client(&config.name, default_api_user_agent(), Some(jar), http)
            .map_err(|e| ClientError::config(&config.name, e.to_string()))?;
        Ok(Self {
            name: config.name.clone(),
            endpoint,
            password,
            client,
            request_id: AtomicU64::new(1),
            session: Mutex::new(Session::default()),
        })
    }

    /// One raw round-trip.
    async fn rpc(&self, method: &str, params: Value) -> Result<RpcReply, ClientError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({ "method": method, "params": params, "id": id });
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(payload.to_string())
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(&self.name, &e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::network(
                &self.name,
                format!("{method} returned HTTP {status}"),
            ));
        }
        let body = response
            .text()
            .await
            .map_err(|e| ClientError::from_reqwest(&self.name, &e))?;
        serde_json::from_str(&body).map_err(|e| {
            let reason = format!("{method}: malformed JSON-RPC reply: {e}");
            ClientError::protocol(&self.name, reason)
        })
    }

    #[instrument(skip(self), fields(client = %self.name))]
    async fn open_session(&self) -> Result<(), ClientError> {
        let reply = self.rpc("auth.login", json!([self.password])).await?;
        if let Some(fault) = reply.error {
            return Err(ClientError::auth(&self.name, fault.message));
        }
        if reply.result.as_bool() != Some(true) {
            return Err(ClientError::auth(&self.name, "auth.login returned false"));
        }
        debug!("Logged in to Deluge web UI");

        let connected = self.session_call("web.connected", json!([])).await?;
        if connected.as_bool() != Some(true) {
            let hosts = self.session_call("web.get_hosts", json!([])).await?;
            let host_id = first_host_id(&hosts).ok_or_else(|| {
                ClientError::protocol(&self.name, "web UI is not connected and has no daemon hosts")
            })?;
            info!(host_id = %host_id, "Connecting web UI to daemon");
            self.session_call("web.connect", json!([host_id])).await?;
        }
        Ok(())
    }

    /// Calls `method` on an established session; faults become errors.
    async fn session_call(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let reply = self.rpc(method, params).await?;
        match reply.error {
            Some(fault) if fault.code == NOT_AUTHENTICATED => {
                Err(ClientError::auth(&self.name, format!("{method}: {}", fault.message)))
            }
            Some(fault) => {
                Err(ClientError::protocol(&self.name, format!("{method}: {}", fault.message)))
            }
            None => Ok(reply.result),
        }
    }

    /// Logs in unless a session is active; returns the session generation.
    async fn ensure_session(&self) -> Result<u64, ClientError> {
        let mut session = self.session.lock().await;
        if !session.active {
            self.open_session().await?;
            session.generation += 1;
            session.active = true;
        }
        Ok(session.generation)
    }

    /// Calls `method`, re-opening the session once if it was dropped.
    async fn call(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let generation = self.ensure_session().await?;
        match self.session_call(method, params.clone()).await {
            Err(ClientError::Auth { .. }) => {
                debug!(method, "Session dropped; logging in again");
                {
                    let mut session = self.session.lock().await;
                    if session.generation == generation {
                        session.active = false;
                    }
                }
                self.ensure_session().await?;
                self.session_call(method, params).await
            }
            other => other,
        }
    }

    async fn add_primary(
        &self,
        locator: &str,
        options: &Value,
    ) -> Result<Option<String>, ClientError> {
        let method = if locator.starts_with("magnet:") {
            "core.add_torrent_magnet"
        } else {
            "core.add_torrent_url"
        };
        let result = self.call(method, json!([locator, options])).await?;
        Ok(result.as_str().filter(|id| !id.is_empty()).map(str::to_string))
    }

    async fn add_legacy(&self, locator: &str, options: &Value) -> Result<(), ClientError> {
        let path = if locator.starts_with("magnet:") {
            locator.to_string()
        } else {
            let downloaded = self.call("web.download_torrent_from_url", json!([locator])).await?;
            downloaded
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| {
                    ClientError::submit(&self.name, "web UI could not fetch the torrent")
                })?
        };
        let added = self
            .call("web.add_torrents", json!([[{ "path": path, "options": options }]]))
            .await?;
        if added.as_bool() == Some(false) {
            return Err(ClientError::submit(&self.name, "web.add_torrents returned false"));
        }
        Ok(())
    }

    async fn newest_torrent_id(&self) -> Result<Option<String>, ClientError> {
        let all = self.call("core.get_torrents_status", json!([{}, ["time_added"]])).await?;
        let Some(map) = all.as_object() else {
            return Ok(None);
        };
        Ok(map
            .iter()
            .max_by(|(_, a), (_, b)| {
                let a = a.get("time_added").and_then(Value::as_f64).unwrap_or(0.0);
                let b = b.get("time_added").and_then(Value::as_f64).unwrap_or(0.0);
                a.total_cmp(&b)
            })
            .map(|(id, _)| id.clone()))
    }

    async fn apply_label(&self, id: &str, label: &str) {
        // label.add fails when the label exists; only set_torrent matters.
        let _ = self.call("label.add", json!([label])).await;
        if let Err(error) = self.call("label.set_torrent", json!([id, label])).await {
            warn!(id, label, error = %error, "Could not label torrent; Label plugin missing?");
        }
    }
}

impl std::fmt::Debug for DelugeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelugeClient")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}

/// Hosts arrive as `[[id, host, port, status], ...]`.
fn first_host_id(hosts: &Value) -> Option<String> {
    hosts
        .as_array()?
        .iter()
        .find_map(|host| host.get(0).and_then(Value::as_str).map(str::to_string))
}

#[derive(Debug, Default, Deserialize)]
struct TorrentStatus {
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    progress: LenientF64,
    #[serde(default)]
    total_wanted: LenientU64,
    #[serde(default)]
    total_done: LenientU64,
    #[serde(default)]
    save_path: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl TorrentStatus {
    fn into_info(self, id: &str) -> DownloadInfo {
        // Deluge reports progress as a percentage.
        let fraction = self.progress.0 / 100.0;
        let state = map_state(&self.state, fraction);
        let mut info = DownloadInfo::new(id, self.name.clone(), state);
        info.set_progress(fraction);
        info.size_bytes = self.total_wanted.0;
        info.downloaded_bytes = self.total_done.0;
        info.output_path = self
            .save_path
            .filter(|p| !p.is_empty())
            .map(|dir| format!("{}/{}", dir.trim_end_matches('/'), self.name));
        info.category = self.label.filter(|l| !l.is_empty());
        if state == ClientState::Failed {
            info.error = self.message.filter(|m| !m.is_empty() && m != "OK");
        }
        info
    }
}

fn map_state(state: &str, progress: f64) -> ClientState {
    match state {
        "Downloading" => ClientState::Downloading,
        "Seeding" => ClientState::Completed,
        "Paused" if progress >= 1.0 => ClientState::Completed,
        "Paused" => ClientState::Paused,
        "Error" => ClientState::Failed,
        _ => ClientState::Queued,
    }
}

#[async_trait]
impl DownloadClient for DelugeClient {
    fn client_type(&self) -> &'static str {
        "deluge"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> DownloadProtocol {
        DownloadProtocol::Torrent
    }

    #[instrument(skip(self), fields(client = %self.name))]
    async fn test_connection(&self) -> Result<(), ClientError> {
        let info = self.call("daemon.info", json!([])).await?;
        debug!(version = %info, "Deluge daemon reachable");
        Ok(())
    }

    #[instrument(skip(self, locator, options), fields(client = %self.name))]
    async fn submit(&self, locator: &str, options: &SubmitOptions) -> Result<String, ClientError> {
        let mut add_options = json!({ "add_paused": options.start_paused });
        if let Some(save_path) = &options.save_path {
            add_options["download_location"] = json!(save_path.display().to_string());
        }

        let primary = self.add_primary(locator, &add_options).await;
        let id = match primary {
            Ok(Some(id)) => id,
            outcome => {
                let reason = match outcome {
                    Err(error) => error.to_string(),
                    _ => "primary add method returned no id".to_string(),
                };
                debug!(reason = %reason, "Primary add failed; trying web.add_torrents");
                self.add_legacy(locator, &add_options).await.map_err(|legacy| {
                    ClientError::submit(&self.name, format!("{reason}; fallback: {legacy}"))
                })?;
                match magnet_info_hash(locator) {
                    Some(hash) => hash,
                    None => self
                        .newest_torrent_id()
                        .await
                        .map_err(|e| {
                            let reason = format!("cannot find added torrent: {e}");
                            ClientError::submit(&self.name, reason)
                        })?
                        .ok_or_else(|| {
                            ClientError::submit(&self.name, "torrent accepted but not listed")
                        })?,
                }
            }
        };

        if let Some(label) = options.category.as_deref().filter(|c| !c.is_empty()) {
            self.apply_label(&id, label).await;
        }
        info!(id = %id, "Torrent added");
        Ok(id)
    }

    #[instrument(skip(self), fields(client = %self.name))]
    async fn status(&self, id: &str) -> Result<DownloadInfo, ClientError> {
        let result = self
            .call("core.get_torrent_status", json!([id, STATUS_FIELDS]))
            .await?;
        if result.as_object().is_none_or(serde_json::Map::is_empty) {
            return Err(ClientError::not_found(&self.name, id));
        }
        let status: TorrentStatus = serde_json::from_value(result)
            .map_err(|e| {
                ClientError::protocol(&self.name, format!("unexpected torrent status: {e}"))
            })?;
        Ok(status.into_info(id))
    }

    async fn list_all(&self, category: Option<&str>) -> Result<Vec<DownloadInfo>, ClientError> {
        let filter = category.map_or_else(|| json!({}), |label| json!({ "label": label }));
        let result = self
            .call("core.get_torrents_status", json!([filter, STATUS_FIELDS]))
            .await?;
        let Some(map) = result.as_object() else {
            return Ok(Vec::new());
        };
        Ok(map
            .iter()
            .map(|(id, value)| {
                let status: TorrentStatus =
                    serde_json::from_value(value.clone()).unwrap_or_default();
                status.into_info(id)
            })
            .collect())
    }

    #[instrument(skip(self), fields(client = %self.name))]
    async fn remove(&self, id: &str, delete_files: bool) -> Result<(), ClientError> {
        let removed = self.call("core.remove_torrent", json!([id, delete_files])).await?;
        if removed.as_bool() == Some(false) {
            return Err(ClientError::not_found(&self.name, id));
        }
        Ok(())
    }

    async fn pause(&self, id: &str) -> Result<(), ClientError> {
        self.call("core.pause_torrent", json!([[id]])).await.map(|_| ())
    }

    async fn resume(&self, id: &str) -> Result<(), ClientError> {
        self.call("core.resume_torrent", json!([[id]])).await.map(|_| ())
    }
}
