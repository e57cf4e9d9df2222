//! Plain HTTP(S) downloads written straight to disk.
//!
//! Each submission spawns one transfer task that streams the body into the
//! destination directory and records progress in a shared map keyed by job
//! id. Jobs live only as long as the process; there is no resume, pause, or
//! restart after a crash. A finished job stays visible for
//! [`TERMINAL_RETENTION`] after `status` first reports it, then is dropped.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::CONTENT_DISPOSITION;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{ClientError, ClientState, DownloadClient, DownloadInfo, SubmitOptions};
use crate::config::ClientConfig;
use crate::http_client::{HttpSettings, build_http_client};
use crate::indexer::DownloadProtocol;
use crate::user_agent::BROWSER_USER_AGENT;

/// Upper bound for a whole file transfer.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(3600);

/// How long a finished job survives after its outcome was first reported.
pub const TERMINAL_RETENTION: Duration = Duration::from_secs(600);

struct Job {
    info: DownloadInfo,
    handle: Option<AbortHandle>,
    /// Set when `status` first returns a terminal state.
    reported_at: Option<Instant>,
}

type Jobs = Arc<DashMap<String, Job>>;

/// Streams HTTP(S) locators to a local directory.
pub struct DirectClient {
    name: String,
    save_path: PathBuf,
    client: Client,
    jobs: Jobs,
    next_id: AtomicU64,
}

impl DirectClient {
    /// Builds the adapter from its config entry.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when `save_path` is missing.
    pub fn new(config: &ClientConfig, http: &HttpSettings) -> Result<Self, ClientError> {
        let save_path = config
            .save_path
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| ClientError::config(&config.name, "save_path is required"))?;
        let settings = HttpSettings {
            connect_timeout: http.connect_timeout,
            request_timeout: TRANSFER_TIMEOUT.max(http.request_timeout),
        };
        let client = build_http_client(&config.name, BROWSER_USER_AGENT, None, &settings)
            .map_err(|e| ClientError::config(&config.name, e.to_string()))?;
        Ok(Self {
            name: config.name.clone(),
            save_path,
            client,
            jobs: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    fn evict_reported(&self) {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| {
            job.reported_at
                .is_none_or(|at| at.elapsed() < TERMINAL_RETENTION)
        });
        let evicted = before.saturating_sub(self.jobs.len());
        if evicted > 0 {
            debug!(evicted, "Dropped reported direct jobs");
        }
    }

    fn next_job_id(&self) -> String {
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("direct-{}-{seq}", chrono::Utc::now().timestamp_millis())
    }
}

impl std::fmt::Debug for DirectClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectClient")
            .field("name", &self.name)
            .field("save_path", &self.save_path)
            .field("jobs", &self.jobs.len())
            .finish_non_exhaustive()
    }
}

/// Runs one transfer and records the outcome on the job.
async fn transfer(client: Client, url: Url, dir: PathBuf, id: String, jobs: Jobs) {
    match stream_to_disk(&client, &url, &dir, &id, &jobs).await {
        Ok((path, bytes)) => {
            info!(id = %id, path = %path.display(), bytes, "Direct download complete");
            if let Some(mut job) = jobs.get_mut(&id) {
                job.info.state = ClientState::Completed;
                job.info.set_progress(1.0);
                job.info.downloaded_bytes = bytes;
                job.info.size_bytes = job.info.size_bytes.max(bytes);
            }
        }
        Err(reason) => {
            warn!(id = %id, url = %url, reason = %reason, "Direct download failed");
            if let Some(mut job) = jobs.get_mut(&id) {
                job.info.state = ClientState::Failed;
                job.info.error = Some(reason);
            }
        }
    }
}

async fn stream_to_disk(
    client: &Client,
    url: &Url,
    dir: &Path,
    id: &str,
    jobs: &Jobs,
) -> Result<(PathBuf, u64), String> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| e.to_string())?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("HTTP {status}"));
    }

    let filename = response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_content_disposition)
        .unwrap_or_else(|| fallback_filename(url, id));
    let path = resolve_unique_path(dir, &filename);
    let total = response.content_length().unwrap_or(0);
    if let Some(mut job) = jobs.get_mut(id) {
        job.info.state = ClientState::Downloading;
        job.info.size_bytes = total;
        job.info.name = filename;
        job.info.output_path = Some(path.display().to_string());
    }
    debug!(id, path = %path.display(), total, "Streaming to disk");

    let file = File::create(&path).await.map_err(|e| format!("{}: {e}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    let outcome: Result<(), String> = async {
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| e.to_string())?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| format!("{}: {e}", path.display()))?;
            written += chunk.len() as u64;
            if let Some(mut job) = jobs.get_mut(id) {
                job.info.downloaded_bytes = written;
                if total > 0 {
                    job.info.set_progress(fraction(written, total));
                }
            }
        }
        writer.flush().await.map_err(|e| format!("{}: {e}", path.display()))
    }
    .await;

    if let Err(reason) = outcome {
        debug!(path = %path.display(), "Removing partial file");
        let _ = tokio::fs::remove_file(&path).await;
        return Err(reason);
    }
    Ok((path, written))
}

#[allow(clippy::cast_precision_loss)]
fn fraction(done: u64, total: u64) -> f64 {
    done as f64 / total as f64
}

/// Extracts the filename from a Content-Disposition header, preferring the
/// RFC 5987 `filename*=` form.
fn parse_content_disposition(header: &str) -> Option<String> {
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + 10..].trim();
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let encoded = encoded[..encoded.find(';').unwrap_or(encoded.len())].trim();
            if let Ok(decoded) = urlencoding::decode(encoded) {
                return Some(sanitize_filename(&decoded));
            }
        }
    }
    let pos = header.find("filename=")?;
    let value = header[pos + 9..].trim();
    let name = match value.strip_prefix('"') {
        Some(quoted) => &quoted[..quoted.find('"')?],
        None => value[..value.find(';').unwrap_or(value.len())].trim(),
    };
    (!name.is_empty()).then(|| sanitize_filename(name))
}

fn fallback_filename(url: &Url, id: &str) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|last| !last.is_empty())
        .and_then(|last| urlencoding::decode(last).ok())
        .map_or_else(|| format!("{id}.bin"), |name| sanitize_filename(&name))
}

/// Replaces characters that are invalid on common filesystems and neutralises
/// dot segments.
fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let is_dot_segment = Path::new(&sanitized)
        .components()
        .any(|c| matches!(c, Component::CurDir | Component::ParentDir));
    if sanitized.is_empty() || is_dot_segment {
        "download.bin".to_string()
    } else {
        sanitized
    }
}

/// Returns `dir/filename`, adding `_2`, `_3`, ... while the path exists.
fn resolve_unique_path(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match filename.rfind('.') {
        Some(pos) if pos > 0 => (&filename[..pos], &filename[pos..]),
        _ => (filename, ""),
    };
    (2..1000)
        .map(|i| dir.join(format!("{stem}_{i}{ext}")))
        .find(|path| !path.exists())
        .unwrap_or_else(|| dir.join(format!("{stem}_{}{ext}", chrono::Utc::now().timestamp())))
}

#[async_trait]
impl DownloadClient for DirectClient {
    fn client_type(&self) -> &'static str {
        "direct"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> DownloadProtocol {
        DownloadProtocol::Direct
    }

    async fn test_connection(&self) -> Result<(), ClientError> {
        tokio::fs::create_dir_all(&self.save_path).await.map_err(|e| {
            let reason = format!("cannot create {}: {e}", self.save_path.display());
            ClientError::config(&self.name, reason)
        })?;
        let metadata = tokio::fs::metadata(&self.save_path)
            .await
            .map_err(|e| ClientError::config(&self.name, e.to_string()))?;
        if metadata.permissions().readonly() {
            return Err(ClientError::config(
                &self.name,
                format!("{} is read-only", self.save_path.display()),
            ));
        }
        Ok(())
    }

    #[instrument(skip(self, locator, options), fields(client = %self.name))]
    async fn submit(&self, locator: &str, options: &SubmitOptions) -> Result<String, ClientError> {
        let url = Url::parse(locator)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .ok_or_else(|| {
                ClientError::submit(&self.name, format!("not an http(s) URL: {locator}"))
            })?;
        if options.start_paused {
            debug!("Direct downloads cannot start paused; starting immediately");
        }
        let dir = options.save_path.clone().unwrap_or_else(|| self.save_path.clone());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| {
                ClientError::submit(&self.name, format!("cannot create {}: {e}", dir.display()))
            })?;

        self.evict_reported();
        let id = self.next_job_id();
        let mut info = DownloadInfo::new(&id, fallback_filename(&url, &id), ClientState::Queued);
        info.category = options.category.clone();
        self.jobs.insert(
            id.clone(),
            Job {
                info,
                handle: None,
                reported_at: None,
            },
        );

        let task = tokio::spawn(transfer(
            self.client.clone(),
            url,
            dir,
            id.clone(),
            Arc::clone(&self.jobs),
        ));
        if let Some(mut job) = self.jobs.get_mut(&id) {
            job.handle = Some(task.abort_handle());
        }
        info!(id = %id, "Direct download started");
        Ok(id)
    }

    async fn status(&self, id: &str) -> Result<DownloadInfo, ClientError> {
        self.evict_reported();
        let mut job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| ClientError::not_found(&self.name, id))?;
        if job.reported_at.is_none()
            && matches!(job.info.state, ClientState::Completed | ClientState::Failed)
        {
            job.reported_at = Some(Instant::now());
        }
        Ok(job.info.clone())
    }

    async fn list_all(&self, category: Option<&str>) -> Result<Vec<DownloadInfo>, ClientError> {
        let mut all: Vec<DownloadInfo> = self
            .jobs
            .iter()
            .filter(|job| category.is_none_or(|c| job.info.category.as_deref() == Some(c)))
            .map(|job| job.info.clone())
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    #[instrument(skip(self), fields(client = %self.name))]
    async fn remove(&self, id: &str, delete_files: bool) -> Result<(), ClientError> {
        let (_, job) = self
            .jobs
            .remove(id)
            .ok_or_else(|| ClientError::not_found(&self.name, id))?;
        if let Some(handle) = job.handle {
            handle.abort();
        }
        if delete_files && let Some(path) = job.info.output_path {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path, "Deleted downloaded file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    let reason = format!("cannot delete {path}: {e}");
                    return Err(ClientError::protocol(&self.name, reason));
                }
            }
        }
        Ok(())
    }

    async fn pause(&self, _id: &str) -> Result<(), ClientError> {
        Err(ClientError::protocol(&self.name, "direct downloads cannot be paused"))
    }

    async fn resume(&self, _id: &str) -> Result<(), ClientError> {
        Err(ClientError::protocol(&self.name, "direct downloads cannot be resumed"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    use super::*;
    use crate::client::ClientErrorKind;
    use crate::config::ClientKind;
    use crate::test_support::socket_guard::start_mock_server_or_skip;

    fn client_in(dir: &Path) -> DirectClient {
        let mut config = ClientConfig::new(4, "direct", ClientKind::Direct, "");
        config.save_path = Some(dir.to_path_buf());
        DirectClient::new(&config, &HttpSettings::default()).unwrap()
    }

    async fn wait_terminal(client: &DirectClient, id: &str) -> DownloadInfo {
        for _ in 0..200 {
            let info = client.status(id).await.unwrap();
            if matches!(info.state, ClientState::Completed | ClientState::Failed) {
                return info;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("download {id} did not finish");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reported_terminal_jobs_are_evicted_after_retention() {
        let dir = TempDir::new().unwrap();
        let client = client_in(dir.path());
        for (id, state) in [("done", ClientState::Completed), ("busy", ClientState::Downloading)] {
            client.jobs.insert(
                id.to_string(),
                Job {
                    info: DownloadInfo::new(id, "Dune.epub", state),
                    handle: None,
                    reported_at: None,
                },
            );
        }

        assert_eq!(client.status("done").await.unwrap().state, ClientState::Completed);
        client.status("busy").await.unwrap();
        tokio::time::advance(TERMINAL_RETENTION / 2).await;
        assert!(client.status("done").await.is_ok(), "still inside retention");

        tokio::time::advance(TERMINAL_RETENTION).await;
        let err = client.status("done").await.unwrap_err();
        assert_eq!(err.kind(), ClientErrorKind::NotFound);
        assert_eq!(client.status("busy").await.unwrap().state, ClientState::Downloading);
    }

    #[test]
    fn test_new_requires_save_path() {
        let config = ClientConfig::new(4, "direct", ClientKind::Direct, "");
        let err = DirectClient::new(&config, &HttpSettings::default()).unwrap_err();
        assert_eq!(err.kind(), ClientErrorKind::Config);
    }

    #[test]
    fn test_parse_content_disposition_forms() {
        assert_eq!(
            parse_content_disposition(r#"attachment; filename="Dune.epub""#).unwrap(),
            "Dune.epub"
        );
        assert_eq!(
            parse_content_disposition("attachment; filename*=UTF-8''Dune%20Messiah.epub").unwrap(),
            "Dune Messiah.epub"
        );
        assert_eq!(
            parse_content_disposition("attachment; filename=\"../../etc/passwd\"").unwrap(),
            ".._.._etc_passwd"
        );
        assert!(parse_content_disposition("inline").is_none());
    }

    #[test]
    fn test_resolve_unique_path_adds_suffix() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("book.epub"), b"x").unwrap();
        assert_eq!(
            resolve_unique_path(dir.path(), "book.epub"),
            dir.path().join("book_2.epub")
        );
    }

    #[tokio::test]
    async fn test_submit_streams_file_to_save_path() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/files/123"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-disposition", r#"attachment; filename="Dune.epub""#)
                    .set_body_bytes(b"epub-bytes".to_vec()),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let client = client_in(dir.path());
        let options = SubmitOptions {
            category: Some("books".to_string()),
            ..SubmitOptions::default()
        };
        let id = client
            .submit(&format!("{}/files/123", server.uri()), &options)
            .await
            .unwrap();

        let info = wait_terminal(&client, &id).await;
        assert_eq!(info.state, ClientState::Completed);
        assert_eq!(info.downloaded_bytes, 10);
        assert!((info.progress - 1.0).abs() < f64::EPSILON);
        let written = dir.path().join("Dune.epub");
        assert_eq!(info.output_path.as_deref(), Some(written.display().to_string().as_str()));
        assert_eq!(std::fs::read(&written).unwrap(), b"epub-bytes");

        assert_eq!(client.list_all(Some("books")).await.unwrap().len(), 1);
        assert!(client.list_all(Some("audio")).await.unwrap().is_empty());

        client.remove(&id, true).await.unwrap();
        assert!(!written.exists());
        assert_eq!(client.status(&id).await.unwrap_err().kind(), ClientErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_http_error_marks_job_failed() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/missing.pdf"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let client = client_in(dir.path());
        let id = client
            .submit(&format!("{}/missing.pdf", server.uri()), &SubmitOptions::default())
            .await
            .unwrap();

        let info = wait_terminal(&client, &id).await;
        assert_eq!(info.state, ClientState::Failed);
        assert!(info.error.unwrap().contains("404"));
        assert!(!dir.path().join("missing.pdf").exists());
    }

    #[tokio::test]
    async fn test_rejects_non_http_locators_and_pause() {
        let dir = TempDir::new().unwrap();
        let client = client_in(dir.path());
        let err = client
            .submit("magnet:?xt=urn:btih:abc", &SubmitOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ClientErrorKind::Submit);
        assert_eq!(client.pause("x").await.unwrap_err().kind(), ClientErrorKind::Protocol);
    }
}
