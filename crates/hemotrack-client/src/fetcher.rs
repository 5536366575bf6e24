use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use hemotrack_core::config::Source;
use hemotrack_core::error::{FetchKind, PipelineError};
use hemotrack_core::retry::RetryPolicy;
use hemotrack_core::traits::{FetchedPage, Fetcher};
use reqwest::{Client, StatusCode};
use tokio::sync::Mutex;

const USER_AGENT: &str = "hemotrack/0.2 (+https://github.com/hemotrack/hemotrack)";

/// HTTP fetcher using reqwest.
///
/// Owns the three responsibilities the [`Fetcher`] contract assigns to
/// implementations: the per-source request timeout, bounded retry with
/// exponential backoff for transient failures, and a per-source minimum
/// interval between requests so manual triggers cannot hammer a site.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    retry: RetryPolicy,
    /// Last request time per source id.
    last_request: Arc<Mutex<HashMap<String, Instant>>>,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, PipelineError> {
        Self::with_retry(RetryPolicy::default())
    }

    pub fn with_retry(retry: RetryPolicy) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PipelineError::permanent_fetch(format!("client setup: {e}")))?;
        Ok(Self {
            client,
            retry,
            last_request: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Sleep until the source's minimum fetch interval has elapsed since
    /// the previous request, then record the current time.
    async fn wait_for_source(&self, source_id: &str, min_interval: Duration) {
        let mut map = self.last_request.lock().await;

        if let Some(&last) = map.get(source_id) {
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                let sleep_duration = min_interval - elapsed;
                // Drop the lock while sleeping so other sources aren't blocked.
                drop(map);
                tracing::debug!(
                    %source_id,
                    sleep_ms = %sleep_duration.as_millis(),
                    "Rate gate"
                );
                tokio::time::sleep(sleep_duration).await;
                let mut map = self.last_request.lock().await;
                map.insert(source_id.to_string(), Instant::now());
                return;
            }
        }
        map.insert(source_id.to_string(), Instant::now());
    }

    async fn fetch_once(&self, source: &Source) -> Result<FetchedPage, PipelineError> {
        let response = self
            .client
            .get(&source.url)
            .timeout(source.timeout())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PipelineError::transient_fetch(format!(
                        "timeout after {}s for {}",
                        source.timeout_secs, source.url
                    ))
                } else if e.is_connect() {
                    PipelineError::transient_fetch(format!("connection failed: {e}"))
                } else if e.is_builder() || e.is_request() {
                    PipelineError::permanent_fetch(e.to_string())
                } else {
                    PipelineError::transient_fetch(e.to_string())
                }
            })?;

        let status = response.status();
        if let Some(kind) = classify_status(status) {
            let message = format!("HTTP {} for {}", status.as_u16(), source.url);
            return Err(match kind {
                FetchKind::Transient => PipelineError::transient_fetch(message),
                FetchKind::Permanent => PipelineError::permanent_fetch(message),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| PipelineError::transient_fetch(format!("reading body: {e}")))?;

        Ok(FetchedPage {
            body,
            fetched_at: Utc::now(),
        })
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, source: &Source) -> Result<FetchedPage, PipelineError> {
        self.wait_for_source(&source.id, source.min_fetch_interval())
            .await;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.fetch_once(source).await {
                Ok(page) => return Ok(page),
                Err(err) if err.is_transient() && attempt <= source.max_retries => {
                    let delay = self.retry.jittered_delay(attempt);
                    tracing::warn!(
                        source_id = %source.id,
                        attempt,
                        max_retries = source.max_retries,
                        delay_ms = %delay.as_millis(),
                        error = %err,
                        "Retrying fetch"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Map an HTTP status to a failure kind. `None` means success.
///
/// 429 and 5xx are transient (retry may help); any other non-success
/// status is permanent and fails the run immediately.
fn classify_status(status: StatusCode) -> Option<FetchKind> {
    if status.is_success() {
        None
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Some(FetchKind::Transient)
    } else {
        Some(FetchKind::Permanent)
    }
}
