//! # Geographic Utilities
//!
//! Distance, bounding-box and snapping primitives used by every other module.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two points |
//! | [`path_length_meters`] | Total length of a path in meters |
//! | [`bounding_box`] | Bounding box of a path |
//! | [`near`] | Distance threshold test used for snapping and closure |
//! | [`meters_to_degrees`] | Convert meters to approximate degrees at a latitude |
//! | [`nearest_vertex`] | Nearest path vertex to a point |
//!
//! All functions expect WGS84 coordinates. Authority datasets are regional, so
//! behaviour near the poles and across the antimeridian is not handled.

use geo::{Distance, Haversine, Point};

use crate::{Bounds, GeoPoint};

// =============================================================================
// Distance Functions
// =============================================================================

/// Great-circle distance in meters between two points.
///
/// # Example
///
/// ```rust
/// use route_stitcher::{GeoPoint, geo_utils};
///
/// let london = GeoPoint::new(51.5074, -0.1278);
/// let paris = GeoPoint::new(48.8566, 2.3522);
///
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_560.0).abs() < 1000.0);
/// ```
#[inline]
pub fn haversine_distance(p1: &GeoPoint, p2: &GeoPoint) -> f64 {
    let point1 = Point::new(p1.longitude, p1.latitude);
    let point2 = Point::new(p2.longitude, p2.latitude);
    Haversine::distance(point1, point2)
}

/// Sum of consecutive haversine distances. Empty or single-point paths are 0.
pub fn path_length_meters(points: &[GeoPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// True when `a` and `b` are at most `tolerance_meters` apart.
#[inline]
pub fn near(a: &GeoPoint, b: &GeoPoint, tolerance_meters: f64) -> bool {
    haversine_distance(a, b) <= tolerance_meters
}

/// True when the path ends within `tolerance_meters` of where it starts.
pub fn is_closed(points: &[GeoPoint], tolerance_meters: f64) -> bool {
    match (points.first(), points.last()) {
        (Some(first), Some(last)) if points.len() >= 2 => near(first, last, tolerance_meters),
        _ => false,
    }
}

/// Convert meters to approximate degrees at a given latitude.
///
/// Uses the longitude scale, which is the larger of the two, so the result
/// is safe as a square search radius.
#[inline]
pub fn meters_to_degrees(meters: f64, latitude: f64) -> f64 {
    let lat_rad = latitude.to_radians();
    let meters_per_degree = 111_320.0 * lat_rad.cos().max(0.1);
    meters / meters_per_degree
}

// =============================================================================
// Bounding Box Functions
// =============================================================================

/// Bounding box of a path.
///
/// For empty input the bounds are inverted (MAX/MIN) and fail any overlap test.
pub fn bounding_box(points: &[GeoPoint]) -> Bounds {
    let mut min_lat = f64::MAX;
    let mut max_lat = f64::MIN;
    let mut min_lng = f64::MAX;
    let mut max_lng = f64::MIN;

    for p in points {
        min_lat = min_lat.min(p.latitude);
        max_lat = max_lat.max(p.latitude);
        min_lng = min_lng.min(p.longitude);
        max_lng = max_lng.max(p.longitude);
    }

    Bounds {
        min_lat,
        max_lat,
        min_lng,
        max_lng,
    }
}

/// Bounding box as `(min_lon, min_lat, max_lon, max_lat)`.
pub fn bounding_box_tuple(points: &[GeoPoint]) -> (f64, f64, f64, f64) {
    bounding_box(points).as_tuple()
}

// =============================================================================
// Path Helpers
// =============================================================================

/// Drop consecutive duplicate points.
pub fn dedup_consecutive(points: impl IntoIterator<Item = GeoPoint>) -> Vec<GeoPoint> {
    let mut out: Vec<GeoPoint> = Vec::new();
    for p in points {
        if out.last() != Some(&p) {
            out.push(p);
        }
    }
    out
}

/// Index of the path vertex nearest to `point` and its distance in meters.
///
/// Ties resolve to the lowest index. Returns `None` for an empty path.
pub fn nearest_vertex(path: &[GeoPoint], point: &GeoPoint) -> Option<(usize, f64)> {
    path.iter()
        .enumerate()
        .map(|(i, p)| (i, haversine_distance(p, point)))
        .fold(None, |best, (i, d)| match best {
            Some((_, best_d)) if best_d <= d => best,
            _ => Some((i, d)),
        })
}

/// Arithmetic mean of a set of nearby points.
///
/// Only meaningful for points a few meters apart (snapped endpoints).
pub fn mean_point(points: &[GeoPoint]) -> Option<GeoPoint> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let lat = points.iter().map(|p| p.latitude).sum::<f64>() / n;
    let lng = points.iter().map(|p| p.longitude).sum::<f64>() / n;
    Some(GeoPoint::new(lat, lng))
}

/// Point `meters` north and `east` of `origin`, for building test fixtures
/// and offsets at regional scale.
pub fn offset_meters(origin: &GeoPoint, north: f64, east: f64) -> GeoPoint {
    let dlat = north / 111_320.0;
    let dlng = east / (111_320.0 * origin.latitude.to_radians().cos());
    GeoPoint::new(origin.latitude + dlat, origin.longitude + dlng)
}
