//! Import batches.
//!
//! Every bulk write (a raw segment import or a generated route set) carries
//! one [`BatchId`] so it can be listed, replaced or deleted as a unit.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ActivityType, CuratedRoute, InfrastructureSegment};

/// Sanitized source names are cut to this many characters.
const MAX_SOURCE_CHARS: usize = 40;

/// Disambiguates ids minted within the same millisecond.
static BATCH_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Identifier shared by every record of one bulk write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for BatchId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for BatchId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Mint a new batch id: `{source}-{utc millis}-{sequence}`.
///
/// ```
/// use route_stitcher::new_batch_id;
///
/// let a = new_batch_id("City Bike Lanes (2024)");
/// let b = new_batch_id("City Bike Lanes (2024)");
/// assert!(a.as_str().starts_with("city-bike-lanes-2024-"));
/// assert_ne!(a, b);
/// ```
pub fn new_batch_id(source_name: &str) -> BatchId {
    let millis = Utc::now().timestamp_millis();
    let sequence = BATCH_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    BatchId(format!(
        "{}-{}-{}",
        sanitize_source(source_name),
        millis,
        sequence
    ))
}

/// Lowercase, non-alphanumerics to single dashes, trimmed, capped.
fn sanitize_source(source_name: &str) -> String {
    let mut out = String::with_capacity(source_name.len().min(MAX_SOURCE_CHARS));
    for c in source_name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    out.truncate(MAX_SOURCE_CHARS);
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "batch".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Records that can be stamped with batch metadata.
pub trait Batched {
    fn batch_id(&self) -> Option<&BatchId>;
    fn set_batch(&mut self, batch_id: &BatchId, source_name: &str);
}

impl Batched for InfrastructureSegment {
    fn batch_id(&self) -> Option<&BatchId> {
        self.import_batch_id.as_ref()
    }

    fn set_batch(&mut self, batch_id: &BatchId, source_name: &str) {
        self.import_batch_id = Some(batch_id.clone());
        self.source_name = source_name.to_string();
    }
}

impl Batched for CuratedRoute {
    fn batch_id(&self) -> Option<&BatchId> {
        self.import_batch_id.as_ref()
    }

    fn set_batch(&mut self, batch_id: &BatchId, source_name: &str) {
        self.import_batch_id = Some(batch_id.clone());
        self.source_name = source_name.to_string();
    }
}

/// Stamp every item with the batch before it is handed to a store.
pub fn tag_batch<T: Batched>(items: &mut [T], batch_id: &BatchId, source_name: &str) {
    for item in items.iter_mut() {
        item.set_batch(batch_id, source_name);
    }
}

/// What a batch holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    Segments,
    Routes,
}

impl BatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::Segments => "segments",
            BatchKind::Routes => "routes",
        }
    }
}

/// Listing entry for one stored batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: BatchId,
    pub source_name: String,
    pub authority_id: String,
    /// Set for route batches
    pub activity_type: Option<ActivityType>,
    pub kind: BatchKind,
    pub record_count: usize,
    pub created_at: DateTime<Utc>,
}
