//! `SABnzbd` API adapter.
//!
//! Every call is a GET to `{base}/api` with `mode`, `apikey` and
//! `output=json`. Jobs live in two separate collections: the active queue and
//! the history. A finished job leaves the queue, so lookups check the queue
//! first and then the history. Sizes and percentages arrive as strings such
//! as `"1234.5"` or `"45"`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument};
use url::Url;

use super::{
    ClientError, ClientState, DownloadClient, DownloadInfo, SubmitOptions, parse_client_url,
    required,
};
use crate::config::ClientConfig;
use crate::http_client::{HttpSettings, build_http_client};
use crate::indexer::DownloadProtocol;
use crate::indexer::lenient::{LenientF64, LenientU64};
use crate::user_agent::default_api_user_agent;

const PAUSED_PRIORITY: i32 = -2;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// API-key query adapter for `SABnzbd`.
pub struct SabnzbdClient {
    name: String,
    api_url: Url,
    api_key: String,
    client: Client,
}

impl SabnzbdClient {
    /// Builds the adapter from its config entry.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when the URL or API key is missing.
    pub fn new(config: &ClientConfig, http: &HttpSettings) -> Result<Self, ClientError> {
        let base_url = parse_client_url(&config.name, &config.base_url)?;
        let api_url = base_url
            .join("api")
            .map_err(|e| ClientError::config(&config.name, e.to_string()))?;
        let api_key = required(&config.name, config.api_key.as_deref(), "api_key")?;
        let client = build_http_client(&config.name, default_api_user_agent(), None, http)
            .map_err(|e| ClientError::config(&config.name, e.to_string()))?;
        Ok(Self {
            name: config.name.clone(),
            api_url,
            api_key,
            client,
        })
    }

    async fn api(&self, mode: &str, params: &[(&str, &str)]) -> Result<Value, ClientError> {
        let mut url = self.api_url.clone();
        url.query_pairs_mut()
            .append_pair("mode", mode)
            .extend_pairs(params.iter().copied())
            .append_pair("apikey", &self.api_key)
            .append_pair("output", "json");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(&self.name, &e))?;
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ClientError::auth(&self.name, format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(ClientError::network(
                &self.name,
                format!("mode={mode} returned HTTP {status}"),
            ));
        }
        let body = response
            .text()
            .await
            .map_err(|e| ClientError::from_reqwest(&self.name, &e))?;
        let value: Value = serde_json::from_str(&body).map_err(|e| {
            // Bad keys are answered in plain text on some versions.
            if body.to_ascii_lowercase().contains("api key") {
                ClientError::auth(&self.name, body.trim().to_string())
            } else {
                ClientError::protocol(&self.name, format!("mode={mode}: not JSON: {e}"))
            }
        })?;
        if value.get("status").and_then(Value::as_bool) == Some(false) {
            let message = value
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("request failed")
                .to_string();
            if message.to_ascii_lowercase().contains("api key") {
                return Err(ClientError::auth(&self.name, message));
            }
            return Err(ClientError::protocol(&self.name, format!("mode={mode}: {message}")));
        }
        Ok(value)
    }

    async fn queue_slots(&self) -> Result<Vec<QueueSlot>, ClientError> {
        let value = self.api("queue", &[]).await?;
        let queue: QueueEnvelope = serde_json::from_value(value)
            .map_err(|e| {
                ClientError::protocol(&self.name, format!("unexpected queue response: {e}"))
            })?;
        Ok(queue.queue.slots)
    }

    async fn history_slots(&self) -> Result<Vec<HistorySlot>, ClientError> {
        let value = self.api("history", &[]).await?;
        let history: HistoryEnvelope = serde_json::from_value(value)
            .map_err(|e| {
                ClientError::protocol(&self.name, format!("unexpected history response: {e}"))
            })?;
        Ok(history.history.slots)
    }
}

impl std::fmt::Debug for SabnzbdClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SabnzbdClient")
            .field("name", &self.name)
            .field("api_url", &self.api_url.as_str())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct QueueEnvelope {
    queue: QueueBody,
}

#[derive(Debug, Default, Deserialize)]
struct QueueBody {
    #[serde(default)]
    slots: Vec<QueueSlot>,
}

#[derive(Debug, Deserialize)]
struct QueueSlot {
    nzo_id: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    percentage: LenientF64,
    #[serde(default)]
    mb: LenientF64,
    #[serde(default)]
    mbleft: LenientF64,
    #[serde(default)]
    cat: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryEnvelope {
    history: HistoryBody,
}

#[derive(Debug, Default, Deserialize)]
struct HistoryBody {
    #[serde(default)]
    slots: Vec<HistorySlot>,
}

#[derive(Debug, Deserialize)]
struct HistorySlot {
    nzo_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    bytes: LenientU64,
    #[serde(default)]
    storage: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    fail_message: Option<String>,
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn megabytes_to_bytes(mb: f64) -> u64 {
    if mb.is_finite() && mb > 0.0 {
        (mb * BYTES_PER_MB).round() as u64
    } else {
        0
    }
}

impl QueueSlot {
    fn into_info(self) -> DownloadInfo {
        let state = match self.status.as_str() {
            "Downloading" => ClientState::Downloading,
            "Paused" => ClientState::Paused,
            _ => ClientState::Queued,
        };
        let mut info = DownloadInfo::new(self.nzo_id, self.filename, state);
        info.set_progress(self.percentage.0 / 100.0);
        let total = megabytes_to_bytes(self.mb.0);
        info.size_bytes = total;
        info.downloaded_bytes = total.saturating_sub(megabytes_to_bytes(self.mbleft.0));
        info.category = self.cat.filter(|c| !c.is_empty() && c != "*");
        info
    }
}

impl HistorySlot {
    fn into_info(self) -> DownloadInfo {
        let state = match self.status.as_str() {
            "Completed" => ClientState::Completed,
            "Failed" => ClientState::Failed,
            // Extracting, Verifying, Repairing, Moving, Running...
            _ => ClientState::Downloading,
        };
        let mut info = DownloadInfo::new(self.nzo_id, self.name, state);
        info.set_progress(if state == ClientState::Failed { 0.0 } else { 1.0 });
        info.size_bytes = self.bytes.0;
        info.downloaded_bytes = if state == ClientState::Failed { 0 } else { self.bytes.0 };
        info.output_path = self.storage.filter(|s| !s.is_empty());
        info.category = self.category.filter(|c| !c.is_empty() && c != "*");
        if state == ClientState::Failed {
            info.error = self.fail_message.filter(|m| !m.is_empty());
        }
        info
    }
}

fn in_category(info: &DownloadInfo, category: Option<&str>) -> bool {
    category.is_none_or(|wanted| info.category.as_deref() == Some(wanted))
}

#[async_trait]
impl DownloadClient for SabnzbdClient {
    fn client_type(&self) -> &'static str {
        "sabnzbd"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> DownloadProtocol {
        DownloadProtocol::Usenet
    }

    #[instrument(skip(self), fields(client = %self.name))]
    async fn test_connection(&self) -> Result<(), ClientError> {
        let version = self.api("version", &[]).await?;
        debug!(version = %version, "SABnzbd reachable");
        // `version` does not check the key; a queue read does.
        self.api("queue", &[("limit", "1")]).await?;
        Ok(())
    }

    #[instrument(skip(self, locator, options), fields(client = %self.name))]
    async fn submit(&self, locator: &str, options: &SubmitOptions) -> Result<String, ClientError> {
        let priority = if options.start_paused {
            PAUSED_PRIORITY
        } else {
            options.priority.clamp(-1, 2)
        }
        .to_string();
        let mut params = vec![("name", locator), ("priority", priority.as_str())];
        if let Some(category) = options.category.as_deref().filter(|c| !c.is_empty()) {
            params.push(("cat", category));
        }

        let value = self.api("addurl", &params).await.map_err(|e| match e {
            ClientError::Auth { .. } => e,
            other => ClientError::submit(&self.name, other.to_string()),
        })?;
        let id = value
            .get("nzo_ids")
            .and_then(Value::as_array)
            .and_then(|ids| ids.first())
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ClientError::submit(&self.name, "no nzo_id in addurl response"))?;
        info!(id = %id, "NZB added");
        Ok(id)
    }

    #[instrument(skip(self), fields(client = %self.name))]
    async fn status(&self, id: &str) -> Result<DownloadInfo, ClientError> {
        if let Some(slot) = self.queue_slots().await?.into_iter().find(|s| s.nzo_id == id) {
            return Ok(slot.into_info());
        }
        debug!(id, "Not in queue; checking history");
        self.history_slots()
            .await?
            .into_iter()
            .find(|s| s.nzo_id == id)
            .map(HistorySlot::into_info)
            .ok_or_else(|| ClientError::not_found(&self.name, id))
    }

    async fn list_all(&self, category: Option<&str>) -> Result<Vec<DownloadInfo>, ClientError> {
        let mut all: Vec<DownloadInfo> = self
            .queue_slots()
            .await?
            .into_iter()
            .map(QueueSlot::into_info)
            .collect();
        all.extend(self.history_slots().await?.into_iter().map(HistorySlot::into_info));
        all.retain(|info| in_category(info, category));
        Ok(all)
    }

    #[instrument(skip(self), fields(client = %self.name))]
    async fn remove(&self, id: &str, delete_files: bool) -> Result<(), ClientError> {
        let del_files = if delete_files { "1" } else { "0" };
        let params = [("name", "delete"), ("value", id), ("del_files", del_files)];
        let from_queue = self.api("queue", &params).await;
        let from_history = self.api("history", &params).await;
        match (from_queue, from_history) {
            (Err(error), Err(_)) => Err(error),
            (queue, history) => {
                if let Err(error) = queue.and(history) {
                    debug!(id, error = %error, "Job only present in one collection");
                }
                Ok(())
            }
        }
    }

    async fn pause(&self, id: &str) -> Result<(), ClientError> {
        self.api("queue", &[("name", "pause"), ("value", id)]).await.map(|_| ())
    }

    async fn resume(&self, id: &str) -> Result<(), ClientError> {
        self.api("queue", &[("name", "resume"), ("value", id)]).await.map(|_| ())
    }
}
