//! # GIS Ingestion & Normalization
//!
//! Turns external line-feature sources into [`InfrastructureSegment`]s.
//!
//! - [`local`] parses uploaded bytes (GeoJSON, Esri JSON, or a zip of either)
//! - [`pagination`] drives any paged feature source to completion
//! - `remote` (feature `http`) is the HTTP feature-service page source
//!
//! Every segment's mode comes from the caller's [`Classification`], never from
//! geometry. Malformed features are skipped and counted; degenerate geometry
//! (non-finite coordinates, zero length) is filtered and counted. Nothing is
//! handed to persistence from here: callers get the complete in-memory list or
//! an error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{GeoPoint, InfrastructureMode, InfrastructureSegment};

pub(crate) mod features;
pub mod local;
pub mod pagination;
#[cfg(feature = "http")]
pub mod remote;

pub use local::parse_local_feature_collection;
pub use pagination::{paginate, FeaturePage, FeaturePageSource, FetchConfig};

// ============================================================================
// Classification
// ============================================================================

/// Activity a source dataset was published for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifiedActivity {
    Cycling,
    Walking,
    Running,
    /// Shared / multi-use paths
    Shared,
}

/// Surface of the infrastructure in a source dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Terrain {
    Paved,
    Unpaved,
    Trail,
    Boardwalk,
    Mixed,
}

/// Surroundings of the infrastructure in a source dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Urban,
    Park,
    Coastal,
    Riverside,
    Bushland,
}

/// Caller-supplied description of what a source contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub activity: ClassifiedActivity,
    pub terrain: Option<Terrain>,
    pub environment: Option<Environment>,
}

impl Classification {
    pub fn new(activity: ClassifiedActivity) -> Self {
        Self {
            activity,
            terrain: None,
            environment: None,
        }
    }

    pub fn with_terrain(mut self, terrain: Terrain) -> Self {
        self.terrain = Some(terrain);
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Segment mode implied by the classification.
    pub fn mode(&self) -> InfrastructureMode {
        match self.activity {
            ClassifiedActivity::Cycling => InfrastructureMode::Cycling,
            ClassifiedActivity::Walking | ClassifiedActivity::Running => {
                InfrastructureMode::Pedestrian
            }
            ClassifiedActivity::Shared => InfrastructureMode::Shared,
        }
    }
}

/// Ownership and naming stamped on every segment from one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceContext {
    pub authority_id: String,
    pub source_name: String,
}

impl SourceContext {
    pub fn new(authority_id: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self {
            authority_id: authority_id.into(),
            source_name: source_name.into(),
        }
    }
}

// ============================================================================
// Import result
// ============================================================================

/// Segments produced by one source plus what was dropped on the way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentImport {
    pub segments: Vec<InfrastructureSegment>,
    /// Features seen in the source
    pub features_read: usize,
    /// Features skipped as non-line or unreadable
    pub skipped_features: usize,
    /// Line parts dropped because fewer than two valid distinct points remained
    pub degenerate_geometries: usize,
}

impl SegmentImport {
    pub fn total_length_meters(&self) -> f64 {
        self.segments.iter().map(|s| s.length_meters).sum()
    }

    /// Nothing usable was found although input was present.
    pub(crate) fn only_rejects(&self) -> bool {
        self.segments.is_empty() && (self.skipped_features + self.degenerate_geometries) > 0
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation flag shared between a caller and a running fetch.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Normalization
// ============================================================================

/// Accumulates features from one source into segments.
pub(crate) struct SegmentNormalizer<'a> {
    classification: Classification,
    context: &'a SourceContext,
    next_index: usize,
    import: SegmentImport,
}

impl<'a> SegmentNormalizer<'a> {
    pub(crate) fn new(classification: Classification, context: &'a SourceContext) -> Self {
        Self {
            classification,
            context,
            next_index: 0,
            import: SegmentImport::default(),
        }
    }

    /// Read one feature value in either GeoJSON or Esri JSON form.
    pub(crate) fn push_feature(&mut self, value: &serde_json::Value) {
        let index = self.next_index;
        self.next_index += 1;
        self.import.features_read += 1;

        match features::extract_line_feature(value) {
            features::FeatureOutcome::Lines(feature) => self.push_lines(index, feature),
            features::FeatureOutcome::Skipped(reason) => {
                debug!(
                    "[Ingest] {}: skipping feature {}: {}",
                    self.context.source_name, index, reason
                );
                self.import.skipped_features += 1;
            }
        }
    }

    fn push_lines(&mut self, index: usize, feature: features::RawLineFeature) {
        let base_id = feature
            .id
            .unwrap_or_else(|| format!("{}-{}", self.context.source_name, index));
        let multi_part = feature.parts.len() > 1;

        for (part_idx, part) in feature.parts.into_iter().enumerate() {
            let id = if multi_part {
                format!("{}-{}", base_id, part_idx)
            } else {
                base_id.clone()
            };
            match self.build_segment(id, part, feature.name.clone()) {
                Some(segment) => self.import.segments.push(segment),
                None => self.import.degenerate_geometries += 1,
            }
        }
    }

    fn build_segment(
        &self,
        id: String,
        path: Vec<GeoPoint>,
        name: Option<String>,
    ) -> Option<InfrastructureSegment> {
        let mut segment = InfrastructureSegment::new(
            id,
            self.context.authority_id.clone(),
            path,
            self.classification.mode(),
        )?;
        segment.source_name = self.context.source_name.clone();
        segment.name = name;
        segment.terrain = self.classification.terrain;
        segment.environment = self.classification.environment;
        Some(segment)
    }

    pub(crate) fn features_read(&self) -> usize {
        self.import.features_read
    }

    pub(crate) fn segment_count(&self) -> usize {
        self.import.segments.len()
    }

    pub(crate) fn finish(self) -> SegmentImport {
        self.import
    }
}
