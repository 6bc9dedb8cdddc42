//! # Route Stitcher
//!
//! Curated loop generation from raw path infrastructure.
//!
//! This library provides:
//! - Ingestion of line features (GeoJSON, Esri JSON, zipped containers, paginated feature services)
//! - Endpoint snapping and connectivity clustering per activity mode
//! - Budgeted loop search at fixed distance tiers
//! - Facility augmentation for "hybrid" routes
//! - Batch tagging so every generated set can be listed, replaced or deleted as a unit
//!
//! ## Features
//!
//! - **`parallel`** - Run independent generation jobs with rayon
//! - **`http`** - Enable the paginated feature-service client
//! - **`persistence`** - Enable the SQLite batch store
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use route_stitcher::{
//!     generate_curated_routes, ActivityType, GenerationConfig, GeoPoint, InfrastructureMode,
//!     InfrastructureSegment, NoopProgress,
//! };
//!
//! let path = vec![
//!     GeoPoint::new(51.5000, -0.1300),
//!     GeoPoint::new(51.5050, -0.1300),
//!     GeoPoint::new(51.5050, -0.1220),
//!     GeoPoint::new(51.5000, -0.1220),
//!     GeoPoint::new(51.5000, -0.1300),
//! ];
//! let segment = InfrastructureSegment::new("seg-1", "authority-1", path, InfrastructureMode::Pedestrian)
//!     .expect("valid path");
//!
//! let result = generate_curated_routes(
//!     "authority-1",
//!     ActivityType::Walking,
//!     &[segment],
//!     &[],
//!     &GenerationConfig::default(),
//!     &NoopProgress,
//! );
//! println!("{} loops, {} tiers", result.routes.len(), result.stats.tiers_generated);
//! ```

use rstar::{RTreeObject, AABB};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{ConfigError, FetchError, OptionExt, ParseError, Result, StitchError, StoreError};

// Union-Find data structure for endpoint snapping and clustering
pub mod union_find;
pub use union_find::UnionFind;

// Geographic utilities (distance, bounds, snapping)
pub mod geo_utils;

// Generation configuration
pub mod config;
pub use config::{GenerationConfig, TierSpec};

// Progress reporting
pub mod progress;
pub use progress::{NoopProgress, ProgressPhase, ProgressSink, ProgressUpdate, RecordingProgress};

// GIS ingestion and normalization
pub mod ingest;
pub use ingest::{
    paginate, parse_local_feature_collection, CancellationToken, Classification,
    ClassifiedActivity, Environment, FeaturePage, FeaturePageSource, FetchConfig, SegmentImport,
    SourceContext, Terrain,
};
#[cfg(feature = "http")]
pub use ingest::remote::{
    fetch_remote_feature_service, fetch_remote_feature_service_blocking, fetch_sources,
    FeatureServiceClient, RemoteSource,
};

// Infrastructure graph and clustering
pub mod graph;
pub use graph::{
    build_clusters, compatible_modes, Cluster, ClusterSet, GraphEdge, GraphNode, InfrastructureGraph,
};

// Loop search
pub mod stitching;
pub use stitching::{search_tier, stitch_cluster, ClusterStitch, LoopDraft, TierOutcome};

// Facility augmentation
pub mod facilities;
pub use facilities::{augment_route, classify_hybrid, find_facility_stops, parse_facility_catalog};

// Import batches and the store contract
pub mod batch;
pub use batch::{new_batch_id, tag_batch, BatchId, BatchKind, BatchSummary, Batched};

pub mod store;
pub use store::{MemoryStore, RouteStore};

// SQLite-backed store
#[cfg(feature = "persistence")]
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::SqliteStore;

// Generation pipeline
pub mod engine;
pub use engine::{
    generate_curated_routes, generate_many, publish_routes, GenerationJob, GenerationResult,
};

// ============================================================================
// Core Types
// ============================================================================

/// A WGS84 coordinate.
///
/// # Example
/// ```
/// use route_stitcher::GeoPoint;
/// let point = GeoPoint::new(-33.8688, 151.2093); // Sydney
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a new point from latitude and longitude.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Create a point from GIS `(x, y)` order.
    pub fn from_lon_lat(longitude: f64, latitude: f64) -> Self {
        Self::new(latitude, longitude)
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Bounding box of a path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from points. Returns `None` for an empty slice.
    pub fn from_points(points: &[GeoPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        Some(geo_utils::bounding_box(points))
    }

    /// `(min_lon, min_lat, max_lon, max_lat)`, the order GIS tooling expects.
    pub fn as_tuple(&self) -> (f64, f64, f64, f64) {
        (self.min_lng, self.min_lat, self.max_lng, self.max_lat)
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

impl RTreeObject for Bounds {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners([self.min_lng, self.min_lat], [self.max_lng, self.max_lat])
    }
}

/// Activity a curated route is generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityType {
    Cycling,
    Running,
    Walking,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Cycling => "cycling",
            ActivityType::Running => "running",
            ActivityType::Walking => "walking",
        }
    }

    /// Title-case label used in generated route names.
    pub fn label(&self) -> &'static str {
        match self {
            ActivityType::Cycling => "Cycling",
            ActivityType::Running => "Running",
            ActivityType::Walking => "Walking",
        }
    }
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActivityType {
    type Err = StitchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cycling" | "cycle" | "ride" | "bike" => Ok(ActivityType::Cycling),
            "running" | "run" => Ok(ActivityType::Running),
            "walking" | "walk" | "hike" => Ok(ActivityType::Walking),
            other => Err(StitchError::UnknownActivity(other.to_string())),
        }
    }
}

/// Activity mode a segment of infrastructure supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InfrastructureMode {
    Cycling,
    Pedestrian,
    Shared,
}

impl InfrastructureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InfrastructureMode::Cycling => "cycling",
            InfrastructureMode::Pedestrian => "pedestrian",
            InfrastructureMode::Shared => "shared",
        }
    }
}

/// One raw polyline of real-world path.
///
/// The path never contains consecutive duplicates and `length_meters` is
/// always derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfrastructureSegment {
    pub id: String,
    pub authority_id: String,
    pub path: Vec<GeoPoint>,
    pub mode: InfrastructureMode,
    pub length_meters: f64,
    pub import_batch_id: Option<BatchId>,
    pub source_name: String,
    /// Street or trail name, when the source carries one
    pub name: Option<String>,
    pub terrain: Option<Terrain>,
    pub environment: Option<Environment>,
}

impl InfrastructureSegment {
    /// Build a segment from a raw path.
    ///
    /// Invalid points are dropped and consecutive duplicates removed.
    /// Returns `None` when fewer than two distinct points remain.
    pub fn new(
        id: impl Into<String>,
        authority_id: impl Into<String>,
        path: Vec<GeoPoint>,
        mode: InfrastructureMode,
    ) -> Option<Self> {
        let path = geo_utils::dedup_consecutive(path.into_iter().filter(GeoPoint::is_valid));
        if path.len() < 2 {
            return None;
        }
        let length_meters = geo_utils::path_length_meters(&path);
        if length_meters <= 0.0 {
            return None;
        }

        Some(Self {
            id: id.into(),
            authority_id: authority_id.into(),
            path,
            mode,
            length_meters,
            import_batch_id: None,
            source_name: String::new(),
            name: None,
            terrain: None,
            environment: None,
        })
    }

    pub fn start(&self) -> GeoPoint {
        self.path[0]
    }

    pub fn end(&self) -> GeoPoint {
        self.path[self.path.len() - 1]
    }

    pub fn bounds(&self) -> Bounds {
        geo_utils::bounding_box(&self.path)
    }
}

/// Type of a point amenity near the path network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacilityType {
    GymEquipment,
    Stairs,
    Bench,
    WaterSource,
    ScenicPoint,
}

impl FacilityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FacilityType::GymEquipment => "gym_equipment",
            FacilityType::Stairs => "stairs",
            FacilityType::Bench => "bench",
            FacilityType::WaterSource => "water_source",
            FacilityType::ScenicPoint => "scenic_point",
        }
    }

    /// Priority used when a catalog entry does not carry one.
    pub fn default_priority(&self) -> u32 {
        match self {
            FacilityType::GymEquipment => 3,
            FacilityType::Stairs => 2,
            FacilityType::Bench | FacilityType::WaterSource | FacilityType::ScenicPoint => 1,
        }
    }

    /// Hybrid class of a loop whose stops are all of this type, if any.
    ///
    /// Water sources and scenic points alone do not make a loop hybrid, but
    /// they still count as a distinct type toward `Mixed`.
    pub fn hybrid_class(&self) -> Option<HybridType> {
        match self {
            FacilityType::GymEquipment => Some(HybridType::Primary),
            FacilityType::Stairs => Some(HybridType::Secondary),
            FacilityType::Bench => Some(HybridType::Tertiary),
            FacilityType::WaterSource | FacilityType::ScenicPoint => None,
        }
    }
}

impl std::fmt::Display for FacilityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FacilityType {
    type Err = ParseError;

    fn from_str(s: &str) -> std::result::Result<Self, ParseError> {
        let normalized: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        match normalized.as_str() {
            "gym" | "gym_equipment" | "outdoor_gym" | "fitness_station" | "exercise_equipment"
            | "fitness_equipment" => Ok(FacilityType::GymEquipment),
            "stairs" | "staircase" | "steps" => Ok(FacilityType::Stairs),
            "bench" | "benches" | "seat" | "seating" => Ok(FacilityType::Bench),
            "water" | "water_source" | "drinking_water" | "water_fountain" | "bubbler" => {
                Ok(FacilityType::WaterSource)
            }
            "scenic" | "scenic_point" | "viewpoint" | "lookout" | "point_of_interest" | "poi" => {
                Ok(FacilityType::ScenicPoint)
            }
            _ => Err(ParseError::UnknownFacilityType {
                value: s.to_string(),
            }),
        }
    }
}

/// A point amenity owned by an authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facility {
    pub id: String,
    pub coordinate: GeoPoint,
    pub facility_type: FacilityType,
    /// Higher priority wins when stops have to be capped
    pub priority: u32,
    pub name: Option<String>,
}

impl Facility {
    pub fn new(
        id: impl Into<String>,
        coordinate: GeoPoint,
        facility_type: FacilityType,
        priority: u32,
    ) -> Self {
        Self {
            id: id.into(),
            coordinate,
            facility_type,
            priority,
            name: None,
        }
    }
}

/// Hybrid classification of a curated route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HybridType {
    #[default]
    None,
    Primary,
    Secondary,
    Tertiary,
    Mixed,
}

impl HybridType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HybridType::None => "none",
            HybridType::Primary => "primary",
            HybridType::Secondary => "secondary",
            HybridType::Tertiary => "tertiary",
            HybridType::Mixed => "mixed",
        }
    }
}

/// A facility attached to a route, positioned along its path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilityStop {
    pub facility_id: String,
    pub coordinate: GeoPoint,
    pub facility_type: FacilityType,
    pub priority: u32,
    /// Index of the nearest path vertex
    pub path_index: usize,
    pub distance_from_path_meters: f64,
}

/// A generated closed-loop route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuratedRoute {
    pub id: String,
    pub name: String,
    pub authority_id: String,
    pub activity_type: ActivityType,
    pub path: Vec<GeoPoint>,
    pub distance_meters: f64,
    /// Tier name, e.g. "short"
    pub tier: String,
    pub tier_target_meters: f64,
    pub is_hybrid: bool,
    pub hybrid_type: HybridType,
    pub facility_stops: Vec<FacilityStop>,
    /// Dominant mode (by length) among contributing segments
    pub infrastructure_mode: InfrastructureMode,
    /// Contributing segments in traversal order (repeats for out-and-back legs)
    pub segment_ids: Vec<String>,
    pub import_batch_id: Option<BatchId>,
    pub source_name: String,
}

impl CuratedRoute {
    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::from_points(&self.path)
    }

    /// Gap between the first and last point in meters.
    pub fn closure_gap_meters(&self) -> f64 {
        match (self.path.first(), self.path.last()) {
            (Some(first), Some(last)) => geo_utils::haversine_distance(first, last),
            _ => f64::INFINITY,
        }
    }
}

/// Which infrastructure the generated routes were built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Cycling,
    Pedestrian,
    Mixed,
    #[default]
    None,
}

/// Diagnostic summary of one generation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationStats {
    pub segments_processed: usize,
    pub compatible_segments: usize,
    pub clusters_found: usize,
    pub tiers_generated: usize,
    /// Tier searches that found nothing (including budget exhaustion)
    pub tiers_skipped: usize,
    /// Tier searches stopped by the expansion or time budget
    pub budget_exhausted: usize,
    pub total_infrastructure_km: f64,
    pub hybrid_routes: usize,
    pub data_source: DataSource,
}

// ============================================================================
// Tests
// ============================================================================
