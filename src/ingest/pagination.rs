//! Paged feature-service ingestion.
//!
//! The loop is independent of transport: anything implementing
//! [`FeaturePageSource`] can be drained. Pagination ends on an empty page or
//! when the service stops reporting `exceededTransferLimit`. Pages fetched
//! before a fatal error are dropped with the error, never returned.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{CancellationToken, Classification, SegmentImport, SegmentNormalizer, SourceContext};
use crate::error::FetchError;
use crate::progress::{self, ProgressPhase, ProgressSink};

/// Settings for paged fetching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Records requested per page.
    /// Default: 1000
    pub page_size: usize,
    /// Hard stop for services that never end pagination.
    /// Default: 10_000
    pub max_pages: u32,
    /// Attempts per request after the first, for transient failures only.
    /// Default: 3
    pub max_retries: u32,
    /// Per-request timeout.
    /// Default: 30 seconds
    pub timeout_secs: u64,
    /// Ask the service for a record count first, for accurate progress.
    /// Default: true
    pub request_count_first: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_size: 1000,
            max_pages: 10_000,
            max_retries: 3,
            timeout_secs: 30,
            request_count_first: true,
        }
    }
}

/// One page of features as returned by a service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeaturePage {
    pub features: Vec<Value>,
    /// Service reports more records beyond this page
    pub exceeded_transfer_limit: bool,
}

impl FeaturePage {
    /// Interpret a page body in Esri JSON or GeoJSON form.
    ///
    /// The continuation flag is read from the top level (Esri) or from
    /// `properties` (GeoJSON output of the same services).
    pub fn from_json(body: Value) -> Result<Self, FetchError> {
        if let Some(error) = body.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unspecified service error");
            let code = error.get("code").and_then(Value::as_i64);
            return Err(FetchError::InvalidResponse {
                message: match code {
                    Some(code) => format!("service error {}: {}", code, message),
                    None => format!("service error: {}", message),
                },
            });
        }

        let exceeded_transfer_limit = body
            .get("exceededTransferLimit")
            .or_else(|| {
                body.get("properties")
                    .and_then(|p| p.get("exceededTransferLimit"))
            })
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let features = match body {
            Value::Object(mut map) => match map.remove("features") {
                Some(Value::Array(features)) => features,
                Some(_) => {
                    return Err(FetchError::InvalidResponse {
                        message: "'features' is not an array".to_string(),
                    })
                }
                None => {
                    return Err(FetchError::InvalidResponse {
                        message: "page has no 'features'".to_string(),
                    })
                }
            },
            _ => {
                return Err(FetchError::InvalidResponse {
                    message: "page is not a JSON object".to_string(),
                })
            }
        };

        Ok(Self {
            features,
            exceeded_transfer_limit,
        })
    }
}

/// A paged line-feature source.
#[allow(async_fn_in_trait)]
pub trait FeaturePageSource {
    /// Human-readable source description for logs and progress text.
    fn describe(&self) -> String;

    /// Total record count if the service can report it.
    async fn feature_count(&self) -> Result<Option<usize>, FetchError> {
        Ok(None)
    }

    /// Fetch `page_size` records starting at `offset`.
    async fn fetch_page(&self, offset: usize, page_size: usize) -> Result<FeaturePage, FetchError>;
}

/// Drain a page source into segments.
///
/// `sink` receives one fetch-phase update per page with the number of
/// features read so far, then a final 100% update.
pub async fn paginate<S: FeaturePageSource>(
    source: &S,
    config: &FetchConfig,
    classification: Classification,
    context: &SourceContext,
    sink: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<SegmentImport, FetchError> {
    let description = source.describe();
    let page_size = config.page_size.max(1);

    let total = if config.request_count_first {
        match source.feature_count().await {
            Ok(total) => total,
            Err(e) => {
                warn!(
                    "[FeatureService] Count query failed for {}: {}, continuing without total",
                    description, e
                );
                None
            }
        }
    } else {
        None
    };

    info!(
        "[FeatureService] Fetching {} (expected features: {})",
        description,
        total.map_or_else(|| "unknown".to_string(), |t| t.to_string())
    );

    let mut normalizer = SegmentNormalizer::new(classification, context);
    let mut offset = 0usize;
    let mut pages = 0u32;

    loop {
        if cancel.is_cancelled() {
            info!(
                "[FeatureService] Fetch of {} cancelled after {} pages",
                description, pages
            );
            return Err(FetchError::Cancelled {
                pages_fetched: pages,
            });
        }
        if pages >= config.max_pages {
            return Err(FetchError::InvalidResponse {
                message: format!("pagination did not end after {} pages", pages),
            });
        }

        let page = match source.fetch_page(offset, page_size).await {
            Ok(page) => page,
            Err(FetchError::Cancelled { .. }) => {
                info!(
                    "[FeatureService] Fetch of {} cancelled during page {}",
                    description,
                    pages + 1
                );
                return Err(FetchError::Cancelled {
                    pages_fetched: pages,
                });
            }
            Err(e) => return Err(e),
        };
        pages += 1;
        let received = page.features.len();

        for feature in &page.features {
            normalizer.push_feature(feature);
        }
        offset += received;

        let so_far = normalizer.features_read();
        let percent = match total {
            Some(total) => progress::percent_of(so_far, total).min(99),
            None => (pages as usize * 5).min(95) as u8,
        };
        progress::emit(
            sink,
            ProgressPhase::Fetch,
            percent,
            format!("page {} of {}: {} features", pages, description, so_far),
            Some(so_far),
        );

        debug!(
            "[FeatureService] Page {} of {}: {} features ({} segments so far), more: {}",
            pages,
            description,
            received,
            normalizer.segment_count(),
            page.exceeded_transfer_limit
        );

        if received == 0 || !page.exceeded_transfer_limit {
            break;
        }
    }

    let import = normalizer.finish();
    progress::emit(
        sink,
        ProgressPhase::Fetch,
        100,
        format!("fetched {} segments from {}", import.segments.len(), description),
        Some(import.features_read),
    );
    info!(
        "[FeatureService] {}: {} segments from {} features in {} pages ({} skipped, {} degenerate)",
        description,
        import.segments.len(),
        import.features_read,
        pages,
        import.skipped_features,
        import.degenerate_geometries
    );

    Ok(import)
}
