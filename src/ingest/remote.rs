//! HTTP client for ArcGIS-style feature services.
//!
//! Implements [`FeaturePageSource`] over a layer's `/query` endpoint:
//! - Optional `returnCountOnly` request so progress has a denominator
//! - Paged requests with `resultOffset` / `resultRecordCount`
//! - Retry with exponential backoff on 429, 5xx and connection errors
//!
//! Retries happen inside a single request. Once a request gives up the whole
//! fetch fails and any pages already read are dropped. Backoff sleeps wake
//! early when the fetch is cancelled.

use std::time::{Duration, Instant};

use futures::future::join_all;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde_json::Value;

use super::pagination::{paginate, FeaturePage, FeaturePageSource, FetchConfig};
use super::{CancellationToken, Classification, SegmentImport, SourceContext};
use crate::error::FetchError;
use crate::progress::ProgressSink;

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF_MS: u64 = 16_000;

/// Cancellation is polled at this interval during a backoff sleep.
const CANCEL_POLL_MS: u64 = 100;

/// Feature-service layer reachable over HTTP.
pub struct FeatureServiceClient {
    client: Client,
    query_url: String,
    config: FetchConfig,
}

impl FeatureServiceClient {
    /// Client for a layer URL (`.../FeatureServer/0`) with default settings.
    pub fn new(endpoint_url: &str) -> Result<Self, FetchError> {
        Self::with_config(endpoint_url, FetchConfig::default())
    }

    pub fn with_config(endpoint_url: &str, config: FetchConfig) -> Result<Self, FetchError> {
        let query_url = query_url(endpoint_url)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| FetchError::Client {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            query_url,
            config,
        })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch every feature of the layer into segments.
    pub async fn fetch(
        &self,
        classification: Classification,
        context: &SourceContext,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<SegmentImport, FetchError> {
        let start = Instant::now();
        let source = CancellableRequests {
            client: self,
            cancel,
        };
        let import = paginate(&source, &self.config, classification, context, sink, cancel).await?;
        info!(
            "[FeatureService] Completed {} in {:.2}s",
            self.query_url,
            start.elapsed().as_secs_f64()
        );
        Ok(import)
    }

    /// GET the query endpoint with retries, returning the parsed JSON body.
    ///
    /// A cancelled token stops the retry loop with `Cancelled`; the caller
    /// fills in the page count.
    async fn get_json(
        &self,
        params: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<Value, FetchError> {
        let mut retries = 0;

        loop {
            let response = self
                .client
                .get(&self.query_url)
                .query(params)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();

                    if is_transient(status) {
                        retries += 1;
                        if retries > self.config.max_retries {
                            return Err(FetchError::Unavailable {
                                url: self.query_url.clone(),
                                status: Some(status.as_u16()),
                                message: format!("giving up after {} retries", retries - 1),
                            });
                        }
                        let backoff = backoff_for(retries);
                        warn!(
                            "[FeatureService] HTTP {} from {}, retry {} after {:?}",
                            status, self.query_url, retries, backoff
                        );
                        wait_backoff(backoff, cancel).await?;
                        continue;
                    }

                    if !status.is_success() {
                        return Err(FetchError::Unavailable {
                            url: self.query_url.clone(),
                            status: Some(status.as_u16()),
                            message: status
                                .canonical_reason()
                                .unwrap_or("request rejected")
                                .to_string(),
                        });
                    }

                    return resp.json::<Value>().await.map_err(|e| {
                        FetchError::InvalidResponse {
                            message: format!("body is not JSON: {}", e),
                        }
                    });
                }
                Err(e) => {
                    retries += 1;
                    if retries > self.config.max_retries {
                        return Err(FetchError::Unavailable {
                            url: self.query_url.clone(),
                            status: None,
                            message: format!("Request error: {}", e),
                        });
                    }
                    let backoff = backoff_for(retries);
                    warn!(
                        "[FeatureService] Error for {}: {}, retry {} after {:?}",
                        self.query_url, e, retries, backoff
                    );
                    wait_backoff(backoff, cancel).await?;
                }
            }
        }
    }
}

/// A client bound to one fetch's cancellation token.
struct CancellableRequests<'a> {
    client: &'a FeatureServiceClient,
    cancel: &'a CancellationToken,
}

impl FeaturePageSource for CancellableRequests<'_> {
    fn describe(&self) -> String {
        self.client.query_url.clone()
    }

    async fn feature_count(&self) -> Result<Option<usize>, FetchError> {
        let body = self.client.get_json(&count_params(), self.cancel).await?;
        if let Some(error) = body.get("error") {
            return Err(FetchError::InvalidResponse {
                message: format!("count query failed: {}", error),
            });
        }
        Ok(body
            .get("count")
            .and_then(Value::as_u64)
            .map(|count| count as usize))
    }

    async fn fetch_page(&self, offset: usize, page_size: usize) -> Result<FeaturePage, FetchError> {
        debug!(
            "[FeatureService] GET {} offset={} count={}",
            self.client.query_url, offset, page_size
        );
        let body = self
            .client
            .get_json(&page_params(offset, page_size), self.cancel)
            .await?;
        FeaturePage::from_json(body)
    }
}

/// Normalize a layer URL to its query endpoint.
fn query_url(endpoint_url: &str) -> Result<String, FetchError> {
    // Drop any query string the caller pasted from a browser
    let trimmed = endpoint_url.trim();
    let base = trimmed
        .split('?')
        .next()
        .unwrap_or(trimmed)
        .trim_end_matches('/');
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(FetchError::Client {
            message: format!("'{}' is not an http(s) URL", endpoint_url),
        });
    }
    if base.ends_with("/query") {
        Ok(base.to_string())
    } else {
        Ok(format!("{}/query", base))
    }
}

fn base_params() -> Vec<(&'static str, String)> {
    vec![
        ("where", "1=1".to_string()),
        ("f", "json".to_string()),
    ]
}

fn count_params() -> Vec<(&'static str, String)> {
    let mut params = base_params();
    params.push(("returnCountOnly", "true".to_string()));
    params
}

fn page_params(offset: usize, page_size: usize) -> Vec<(&'static str, String)> {
    let mut params = base_params();
    params.extend([
        ("outFields", "*".to_string()),
        ("returnGeometry", "true".to_string()),
        ("outSR", "4326".to_string()),
        ("resultOffset", offset.to_string()),
        ("resultRecordCount", page_size.to_string()),
    ]);
    params
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Sleep for `backoff`, returning `Cancelled` as soon as `cancel` fires.
async fn wait_backoff(backoff: Duration, cancel: &CancellationToken) -> Result<(), FetchError> {
    let deadline = Instant::now() + backoff;
    loop {
        if cancel.is_cancelled() {
            debug!("[FeatureService] Retry abandoned: fetch cancelled");
            return Err(FetchError::Cancelled { pages_fetched: 0 });
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        let slice = (deadline - now).min(Duration::from_millis(CANCEL_POLL_MS));
        tokio::time::sleep(slice).await;
    }
}

/// Exponential backoff: 1s, 2s, 4s, 8s, 16s.
fn backoff_for(retry: u32) -> Duration {
    let ms = 500u64.saturating_mul(1 << retry.min(5));
    Duration::from_millis(ms.min(MAX_BACKOFF_MS))
}

// ============================================================================
// Entry points
// ============================================================================

/// Fetch a remote feature service with default [`FetchConfig`].
pub async fn fetch_remote_feature_service(
    endpoint_url: &str,
    classification: Classification,
    context: &SourceContext,
    sink: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<SegmentImport, FetchError> {
    FeatureServiceClient::new(endpoint_url)?
        .fetch(classification, context, sink, cancel)
        .await
}

/// Blocking variant for callers without an async runtime.
pub fn fetch_remote_feature_service_blocking(
    endpoint_url: &str,
    classification: Classification,
    context: &SourceContext,
    sink: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<SegmentImport, FetchError> {
    let rt = tokio::runtime::Runtime::new().map_err(|e| FetchError::Client {
        message: format!("Failed to create tokio runtime: {}", e),
    })?;
    rt.block_on(fetch_remote_feature_service(
        endpoint_url,
        classification,
        context,
        sink,
        cancel,
    ))
}

/// One remote source in a multi-source import.
#[derive(Debug, Clone)]
pub struct RemoteSource {
    pub endpoint_url: String,
    pub classification: Classification,
    pub context: SourceContext,
}

/// Fetch several sources concurrently.
///
/// Each source succeeds or fails on its own; results come back in input
/// order. Cancellation applies to all of them.
pub async fn fetch_sources(
    sources: &[RemoteSource],
    config: &FetchConfig,
    sink: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Vec<Result<SegmentImport, FetchError>> {
    info!("[FeatureService] Fetching {} sources concurrently", sources.len());

    let tasks = sources.iter().map(|source| async move {
        match FeatureServiceClient::with_config(&source.endpoint_url, config.clone()) {
            Ok(client) => {
                client
                    .fetch(source.classification, &source.context, sink, cancel)
                    .await
            }
            Err(e) => Err(e),
        }
    });
    let results = join_all(tasks).await;

    let failed = results.iter().filter(|r| r.is_err()).count();
    if failed > 0 {
        warn!(
            "[FeatureService] {}/{} sources failed",
            failed,
            sources.len()
        );
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ClassifiedActivity;
    use crate::progress::NoopProgress;

    #[test]
    fn test_query_url_normalization() {
        assert_eq!(
            query_url("https://gis.example.test/arcgis/rest/services/Paths/FeatureServer/0/").unwrap(),
            "https://gis.example.test/arcgis/rest/services/Paths/FeatureServer/0/query"
        );
        assert_eq!(
            query_url("https://gis.example.test/FeatureServer/2/query?where=1%3D1").unwrap(),
            "https://gis.example.test/FeatureServer/2/query"
        );
        assert!(matches!(
            query_url("ftp://gis.example.test/layer"),
            Err(FetchError::Client { .. })
        ));
    }

    #[test]
    fn test_page_params() {
        let params = page_params(2000, 1000);
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("resultOffset"), Some("2000"));
        assert_eq!(get("resultRecordCount"), Some("1000"));
        assert_eq!(get("outSR"), Some("4326"));
        assert_eq!(get("f"), Some("json"));
        assert_eq!(get("returnCountOnly"), None);
    }

    #[test]
    fn test_backoff_growth() {
        assert_eq!(backoff_for(1), Duration::from_secs(1));
        assert_eq!(backoff_for(2), Duration::from_secs(2));
        assert_eq!(backoff_for(3), Duration::from_secs(4));
        assert_eq!(backoff_for(30), Duration::from_millis(MAX_BACKOFF_MS));
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient(StatusCode::BAD_GATEWAY));
        assert!(!is_transient(StatusCode::NOT_FOUND));
        assert!(!is_transient(StatusCode::OK));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_request() {
        let config = FetchConfig {
            request_count_first: false,
            ..FetchConfig::default()
        };
        let client =
            FeatureServiceClient::with_config("https://gis.example.test/FeatureServer/0", config)
                .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = client
            .fetch(
                Classification::new(ClassifiedActivity::Cycling),
                &SourceContext::new("council", "bike"),
                &NoopProgress,
                &cancel,
            )
            .await;
        assert_eq!(result, Err(FetchError::Cancelled { pages_fetched: 0 }));
    }

    #[tokio::test]
    async fn test_backoff_wakes_on_cancel() {
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let result = wait_backoff(Duration::from_millis(MAX_BACKOFF_MS), &cancel).await;
        assert_eq!(result, Err(FetchError::Cancelled { pages_fetched: 0 }));
        assert!(start.elapsed() < Duration::from_secs(2));

        let idle = CancellationToken::new();
        assert_eq!(wait_backoff(Duration::from_millis(10), &idle).await, Ok(()));
    }

    #[tokio::test]
    async fn test_cancelled_fetch_skips_retry_sleep() {
        // Nothing listens on the discard port, so every attempt is a transport error
        let client = FeatureServiceClient::with_config(
            "http://127.0.0.1:9/FeatureServer/0",
            FetchConfig {
                timeout_secs: 1,
                ..FetchConfig::default()
            },
        )
        .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let start = Instant::now();
        let result = client.get_json(&count_params(), &cancel).await;
        assert_eq!(result, Err(FetchError::Cancelled { pages_fetched: 0 }));
        assert!(start.elapsed() < Duration::from_secs(1) + Duration::from_millis(500));
    }
}
