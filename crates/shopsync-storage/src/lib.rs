//! HTTP transport + durable watermark storage for shopsync.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shopsync_core::Watermark;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "shopsync-storage";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WatermarkDocument {
    #[serde(alias = "since_iso")]
    since: DateTime<Utc>,
}

/// Single-cursor state file, `{"since": "<rfc3339>"}`.
///
/// Writes go to a temp file in the same directory and are renamed into place,
/// so a crash mid-write leaves the previous cursor intact.
#[derive(Debug, Clone)]
pub struct WatermarkFile {
    path: PathBuf,
    default_lookback: chrono::Duration,
}

impl WatermarkFile {
    pub fn new(path: impl Into<PathBuf>, default_lookback: chrono::Duration) -> Self {
        Self {
            path: path.into(),
            default_lookback,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The persisted cursor, or `None` before the first successful run.
    pub async fn load(&self) -> anyhow::Result<Option<Watermark>> {
        if !fs::try_exists(&self.path)
            .await
            .with_context(|| format!("checking watermark path {}", self.path.display()))?
        {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        let doc: WatermarkDocument = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        Ok(Some(Watermark::new(doc.since)))
    }

    pub async fn get(&self) -> anyhow::Result<Watermark> {
        self.get_at(Utc::now()).await
    }

    /// Stored cursor, falling back to `now - default_lookback` on first run.
    pub async fn get_at(&self, now: DateTime<Utc>) -> anyhow::Result<Watermark> {
        Ok(self
            .load()
            .await?
            .unwrap_or_else(|| Watermark::lookback_from(now, self.default_lookback)))
    }

    /// Overwrite the stored cursor.
    pub async fn set(&self, watermark: Watermark) -> anyhow::Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating state directory {}", parent.display()))?;

        let bytes = serde_json::to_vec(&WatermarkDocument {
            since: watermark.since,
        })
        .context("serializing watermark")?;

        let temp_path = parent.join(format!(".{}.watermark.tmp", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp watermark file {}", temp_path.display()))?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("writing temp watermark file {}", temp_path.display()))?;
        file.sync_all()
            .await
            .with_context(|| format!("syncing temp watermark file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp watermark {} -> {}",
                    temp_path.display(),
                    self.path.display()
                )
            });
        }
        debug!(path = %self.path.display(), since = %watermark.since, "watermark persisted");
        Ok(())
    }

    /// Persist `candidate` only if it is later than the stored cursor.
    /// Returns the cursor in effect afterwards.
    pub async fn advance(&self, candidate: Watermark) -> anyhow::Result<Watermark> {
        match self.load().await? {
            Some(current) if current >= candidate => Ok(current),
            _ => {
                self.set(candidate).await?;
                Ok(candidate)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Upstream HTTP transport
// ---------------------------------------------------------------------------

/// WooCommerce reports the page count of a collection in this header.
pub const TOTAL_PAGES_HEADER: &str = "x-wp-totalpages";

/// Longest `Retry-After` the client will honour before retrying.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(120);

/// 5xx and throttling responses get another attempt; other statuses are final.
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

pub fn is_transient_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// `Retry-After` in delta-seconds form, as sent with 429 responses.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

/// Exponential wait between transport attempts, capped at `ceiling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub retries: usize,
    pub initial: Duration,
    pub ceiling: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            retries: 4,
            initial: Duration::from_millis(500),
            ceiling: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    pub fn delay(&self, retry: usize) -> Duration {
        let shift = u32::try_from(retry).unwrap_or(u32::MAX).min(16);
        self.initial.saturating_mul(1u32 << shift).min(self.ceiling)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// Requests allowed in flight at once across all resources.
    pub max_in_flight: usize,
    pub backoff: Backoff,
    /// Minimum gap between request starts; `None` sends as fast as allowed.
    pub min_request_spacing: Option<Duration>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: None,
            max_in_flight: 4,
            backoff: Backoff::default(),
            min_request_spacing: None,
        }
    }
}

/// Hands out request start slots at least `spacing` apart.
#[derive(Debug)]
pub struct RequestPacer {
    spacing: Duration,
    next_slot: Mutex<Instant>,
}

impl RequestPacer {
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    pub async fn wait_turn(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let slot = (*next).max(Instant::now());
            *next = slot + self.spacing;
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub url: String,
    /// Value of the collection page-count header, when the endpoint sends one.
    pub total_pages: Option<u32>,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_slice(&self.body).map_err(|source| FetchError::Decode {
            url: self.url.clone(),
            source,
        })
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("decoding response body from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::HttpStatus { status: 404, .. })
    }
}

enum AttemptError {
    Transient {
        error: FetchError,
        wait: Option<Duration>,
    },
    Fatal(FetchError),
}

impl From<reqwest::Error> for AttemptError {
    fn from(err: reqwest::Error) -> Self {
        if is_transient_error(&err) {
            AttemptError::Transient {
                error: err.into(),
                wait: None,
            }
        } else {
            AttemptError::Fatal(err.into())
        }
    }
}

/// GET client shared by every upstream call: bounded concurrency, optional
/// pacing, and retries on transient failures.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    in_flight: Semaphore,
    pacer: Option<RequestPacer>,
    backoff: Backoff,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            in_flight: Semaphore::new(config.max_in_flight.max(1)),
            pacer: config.min_request_spacing.map(RequestPacer::new),
            backoff: config.backoff,
        })
    }

    /// GET `url` with `query`. `resource` names the endpoint family in logs.
    pub async fn get(
        &self,
        resource: &str,
        url: &str,
        query: &[(String, String)],
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", resource, url);
        self.get_with_retries(url, query).instrument(span).await
    }

    async fn get_with_retries(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<FetchedResponse, FetchError> {
        let mut retry = 0usize;
        loop {
            let wait = match self.attempt(url, query).await {
                Ok(response) => return Ok(response),
                Err(AttemptError::Fatal(error)) => return Err(error),
                Err(AttemptError::Transient { error, .. }) if retry >= self.backoff.retries => {
                    return Err(error)
                }
                Err(AttemptError::Transient { error, wait }) => {
                    let wait = wait.unwrap_or_else(|| self.backoff.delay(retry));
                    debug!(error = %error, retry, wait_ms = wait.as_millis() as u64, "retrying upstream request");
                    wait
                }
            };
            tokio::time::sleep(wait).await;
            retry += 1;
        }
    }

    async fn attempt(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<FetchedResponse, AttemptError> {
        // The semaphore is owned here and never closed.
        let _permit = self.in_flight.acquire().await.ok();
        if let Some(pacer) = &self.pacer {
            pacer.wait_turn().await;
        }

        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();
        let final_url = response.url().to_string();

        if !status.is_success() {
            let error = FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            };
            return Err(if is_transient_status(status) {
                AttemptError::Transient {
                    error,
                    wait: retry_after(response.headers()),
                }
            } else {
                AttemptError::Fatal(error)
            });
        }

        let total_pages = response
            .headers()
            .get(TOTAL_PAGES_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        let body = response.bytes().await?.to_vec();
        Ok(FetchedResponse {
            status,
            url: final_url,
            total_pages,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, h, m, 0).single().unwrap()
    }

    #[tokio::test]
    async fn first_run_falls_back_to_lookback_window() {
        let dir = tempdir().expect("tempdir");
        let store = WatermarkFile::new(dir.path().join("state.json"), chrono::Duration::days(30));
        let now = ts(12, 0);

        assert!(store.load().await.expect("load").is_none());
        let wm = store.get_at(now).await.expect("get");
        assert_eq!(wm.since, now - chrono::Duration::days(30));
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn set_overwrites_and_survives_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("state.json");
        let store = WatermarkFile::new(&path, chrono::Duration::days(30));

        store.set(Watermark::new(ts(10, 0))).await.expect("set");
        store.set(Watermark::new(ts(9, 0))).await.expect("set again");

        let reopened = WatermarkFile::new(&path, chrono::Duration::days(1));
        assert_eq!(reopened.get_at(ts(23, 0)).await.expect("get").since, ts(9, 0));

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn advance_never_moves_backwards() {
        let dir = tempdir().expect("tempdir");
        let store = WatermarkFile::new(dir.path().join("state.json"), chrono::Duration::days(30));

        let first = store.advance(Watermark::new(ts(10, 0))).await.expect("advance");
        assert_eq!(first.since, ts(10, 0));
        let kept = store.advance(Watermark::new(ts(8, 0))).await.expect("advance");
        assert_eq!(kept.since, ts(10, 0));
        let moved = store.advance(Watermark::new(ts(11, 30))).await.expect("advance");
        assert_eq!(moved.since, ts(11, 30));
        assert_eq!(store.load().await.unwrap().unwrap().since, ts(11, 30));
    }

    #[tokio::test]
    async fn reads_legacy_since_iso_key() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"since_iso": "2025-06-01T07:45:00+00:00"}"#).unwrap();
        let store = WatermarkFile::new(&path, chrono::Duration::days(30));
        assert_eq!(store.load().await.unwrap().unwrap().since, ts(7, 45));
    }

    #[tokio::test]
    async fn corrupt_state_file_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();
        let store = WatermarkFile::new(&path, chrono::Duration::days(30));
        assert!(store.get().await.is_err());
    }

    #[test]
    fn backoff_doubles_up_to_the_ceiling() {
        let backoff = Backoff {
            retries: 5,
            initial: Duration::from_millis(100),
            ceiling: Duration::from_millis(350),
        };

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(2), Duration::from_millis(350));
        assert_eq!(backoff.delay(usize::MAX), Duration::from_millis(350));
    }

    #[test]
    fn server_errors_and_throttling_are_transient() {
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
        assert!(!is_transient_status(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn retry_after_is_read_in_seconds_and_capped() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert(RETRY_AFTER, "7".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));
        headers.insert(RETRY_AFTER, "86400".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(MAX_RETRY_AFTER));
        headers.insert(RETRY_AFTER, "Wed, 21 Oct 2026 07:28:00 GMT".parse().unwrap());
        assert_eq!(retry_after(&headers), None);
    }

    #[tokio::test(start_paused = true)]
    async fn pacer_spaces_request_starts() {
        let pacer = RequestPacer::new(Duration::from_millis(250));
        let started = Instant::now();
        for _ in 0..3 {
            pacer.wait_turn().await;
        }
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[test]
    fn not_found_status_is_recognised() {
        let err = FetchError::HttpStatus {
            status: 404,
            url: "https://shop.test/wp-json/wc/v3/products/9".into(),
        };
        assert!(err.is_not_found());
        let err = FetchError::HttpStatus {
            status: 500,
            url: "https://shop.test".into(),
        };
        assert!(!err.is_not_found());
    }

    #[test]
    fn undecodable_body_names_the_url() {
        let response = FetchedResponse {
            status: StatusCode::OK,
            url: "https://shop.test/wp-json/wc/v3/orders".into(),
            total_pages: Some(1),
            body: b"<html>maintenance</html>".to_vec(),
        };
        let err = response.json::<serde_json::Value>().unwrap_err();
        assert!(err.to_string().contains("/wc/v3/orders"));
    }
}
