//! # Hybrid Facility Augmentation
//!
//! Attaches nearby facilities to a loop as ordered stops and classifies the
//! loop as hybrid from the facility types present.
//!
//! Geometry is never touched: only `facility_stops`, `is_hybrid` and
//! `hybrid_type` change.

use std::cmp::Ordering;

use log::debug;
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use serde_json::{Map, Value};

use crate::config::GenerationConfig;
use crate::error::ParseError;
use crate::geo_utils::{haversine_distance, meters_to_degrees};
use crate::{Bounds, CuratedRoute, Facility, FacilityStop, FacilityType, GeoPoint, HybridType};

/// Degree-space search radii are widened by this factor before the exact
/// haversine check.
const QUERY_PADDING: f64 = 1.1;

/// A path vertex with its index for R-tree queries
#[derive(Debug, Clone, Copy)]
struct IndexedVertex {
    idx: usize,
    lat: f64,
    lng: f64,
}

impl RTreeObject for IndexedVertex {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lat, self.lng])
    }
}

impl PointDistance for IndexedVertex {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dlat = self.lat - point[0];
        let dlng = self.lng - point[1];
        dlat * dlat + dlng * dlng
    }
}

/// Decorate `route` with facility stops and its hybrid classification.
///
/// The classification sees every facility inside the buffer; the
/// `max_facility_stops` cap only trims the attached stop list.
pub fn augment_route(route: &mut CuratedRoute, facilities: &[Facility], config: &GenerationConfig) {
    let found = find_facility_stops(&route.path, facilities, config.facility_buffer_m, 0);
    let hybrid_type = classify_hybrid(&found);
    let in_buffer = found.len();
    let stops = cap_stops(found, config.max_facility_stops);

    debug!(
        "[Facilities] Route {}: {} stops of {} in buffer, hybrid {}",
        route.id,
        stops.len(),
        in_buffer,
        hybrid_type.as_str()
    );

    route.facility_stops = stops;
    route.hybrid_type = hybrid_type;
    route.is_hybrid = hybrid_type != HybridType::None;
}

/// Facilities within `buffer_m` of a path vertex, in path order.
///
/// When more than `max_stops` qualify (and `max_stops` is non-zero) the
/// highest priority ones are kept.
pub fn find_facility_stops(
    path: &[GeoPoint],
    facilities: &[Facility],
    buffer_m: f64,
    max_stops: usize,
) -> Vec<FacilityStop> {
    let Some(bounds) = Bounds::from_points(path) else {
        return Vec::new();
    };
    if facilities.is_empty() {
        return Vec::new();
    }

    // Padded query radius; exact distances are checked per candidate
    let radius = meters_to_degrees(buffer_m, bounds.center().latitude) * QUERY_PADDING;
    let vertices: Vec<IndexedVertex> = path
        .iter()
        .enumerate()
        .map(|(idx, p)| IndexedVertex {
            idx,
            lat: p.latitude,
            lng: p.longitude,
        })
        .collect();
    let tree = RTree::bulk_load(vertices);

    let stops: Vec<FacilityStop> = facilities
        .iter()
        .filter(|f| within(&bounds, &f.coordinate, radius))
        .filter_map(|facility| {
            let point = [facility.coordinate.latitude, facility.coordinate.longitude];
            tree.locate_within_distance(point, radius * radius)
                .map(|v| {
                    let d = haversine_distance(&GeoPoint::new(v.lat, v.lng), &facility.coordinate);
                    (v.idx, d)
                })
                .filter(|&(_, d)| d <= buffer_m)
                .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
                .map(|(path_index, distance)| FacilityStop {
                    facility_id: facility.id.clone(),
                    coordinate: facility.coordinate,
                    facility_type: facility.facility_type,
                    priority: facility.priority,
                    path_index,
                    distance_from_path_meters: distance,
                })
        })
        .collect();

    cap_stops(stops, max_stops)
}

/// Keep the `max_stops` highest priority stops (all when zero), in path order.
fn cap_stops(mut stops: Vec<FacilityStop>, max_stops: usize) -> Vec<FacilityStop> {
    if max_stops > 0 && stops.len() > max_stops {
        stops.sort_by(by_priority);
        stops.truncate(max_stops);
    }
    stops.sort_by(by_path_position);
    stops
}

/// Bounding-box prefilter, `radius` in degrees.
fn within(bounds: &Bounds, point: &GeoPoint, radius: f64) -> bool {
    point.latitude >= bounds.min_lat - radius
        && point.latitude <= bounds.max_lat + radius
        && point.longitude >= bounds.min_lng - radius
        && point.longitude <= bounds.max_lng + radius
}

fn by_path_position(a: &FacilityStop, b: &FacilityStop) -> Ordering {
    a.path_index
        .cmp(&b.path_index)
        .then_with(|| a.distance_from_path_meters.total_cmp(&b.distance_from_path_meters))
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| a.facility_id.cmp(&b.facility_id))
}

fn by_priority(a: &FacilityStop, b: &FacilityStop) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.distance_from_path_meters.total_cmp(&b.distance_from_path_meters))
        .then_with(|| by_path_position(a, b))
}

/// Hybrid class from the distinct facility types among `stops`.
///
/// Two or more distinct types of any kind make a loop `Mixed`. A single
/// type maps through [`FacilityType::hybrid_class`], so a loop passing only
/// water sources or only scenic points is not hybrid.
pub fn classify_hybrid(stops: &[FacilityStop]) -> HybridType {
    let mut types: Vec<FacilityType> = stops.iter().map(|s| s.facility_type).collect();
    types.sort();
    types.dedup();

    match types.as_slice() {
        [] => HybridType::None,
        [only] => only.hybrid_class().unwrap_or(HybridType::None),
        _ => HybridType::Mixed,
    }
}

// ============================================================================
// Catalog parsing
// ============================================================================

const TYPE_KEYS: [&str; 4] = ["facility_type", "type", "category", "kind"];
const LAT_KEYS: [&str; 3] = ["latitude", "lat", "y"];
const LNG_KEYS: [&str; 4] = ["longitude", "lng", "lon", "x"];

/// Load a facility catalog.
///
/// Accepts a JSON array of records (`id`, `latitude`/`longitude`, `type`,
/// optional `priority` and `name`) or a GeoJSON collection of `Point`
/// features with the same keys in `properties`. Unknown facility types are
/// rejected rather than skipped.
///
/// ```
/// use route_stitcher::{parse_facility_catalog, FacilityType};
///
/// let catalog = br#"[{"id": "g1", "lat": -33.87, "lng": 151.21, "type": "outdoor gym"}]"#;
/// let facilities = parse_facility_catalog(catalog).unwrap();
/// assert_eq!(facilities[0].facility_type, FacilityType::GymEquipment);
/// assert_eq!(facilities[0].priority, 3);
/// ```
pub fn parse_facility_catalog(raw: &[u8]) -> Result<Vec<Facility>, ParseError> {
    let document: Value = serde_json::from_slice(raw).map_err(|e| ParseError::UnsupportedFormat {
        reason: format!("invalid facility catalog JSON: {}", e),
    })?;

    let records: &[Value] = match &document {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("features") {
            Some(Value::Array(features)) => features,
            _ => {
                return Err(ParseError::UnsupportedFormat {
                    reason: "facility catalog must be an array or a feature collection".to_string(),
                })
            }
        },
        _ => {
            return Err(ParseError::UnsupportedFormat {
                reason: "facility catalog must be an array or a feature collection".to_string(),
            })
        }
    };

    records
        .iter()
        .enumerate()
        .map(|(index, record)| parse_facility(index, record))
        .collect()
}

fn parse_facility(index: usize, record: &Value) -> Result<Facility, ParseError> {
    let malformed = |reason: &str| ParseError::MalformedGeometry {
        reason: format!("facility {}: {}", index, reason),
    };
    let object = record.as_object().ok_or_else(|| malformed("not an object"))?;

    // GeoJSON features carry attributes in `properties`
    let is_feature = object.contains_key("geometry");
    let attrs = if is_feature {
        object
            .get("properties")
            .and_then(Value::as_object)
            .ok_or_else(|| malformed("feature has no properties"))?
    } else {
        object
    };

    let coordinate = if is_feature {
        point_geometry(object.get("geometry")).ok_or_else(|| malformed("geometry is not a Point"))?
    } else {
        match (number(attrs, &LAT_KEYS), number(attrs, &LNG_KEYS)) {
            (Some(lat), Some(lng)) => GeoPoint::new(lat, lng),
            _ => return Err(malformed("missing latitude/longitude")),
        }
    };
    if !coordinate.is_valid() {
        return Err(malformed("coordinate out of range"));
    }

    let type_value = TYPE_KEYS
        .iter()
        .find_map(|key| attrs.get(*key).and_then(Value::as_str))
        .ok_or_else(|| malformed("missing facility type"))?;
    let facility_type: FacilityType = type_value.parse()?;

    let id = object
        .get("id")
        .or_else(|| attrs.get("id"))
        .and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| format!("facility-{}", index));

    let priority = attrs
        .get("priority")
        .and_then(Value::as_u64)
        .map(|p| p.min(u32::MAX as u64) as u32)
        .unwrap_or_else(|| facility_type.default_priority());

    let mut facility = Facility::new(id, coordinate, facility_type, priority);
    facility.name = attrs.get("name").and_then(Value::as_str).map(str::to_string);
    Ok(facility)
}

fn number(attrs: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| attrs.get(*key).and_then(Value::as_f64))
}

fn point_geometry(geometry: Option<&Value>) -> Option<GeoPoint> {
    let geometry = geometry?;
    if geometry.get("type").and_then(Value::as_str) != Some("Point") {
        return None;
    }
    let coords = geometry.get("coordinates")?.as_array()?;
    let x = coords.first()?.as_f64()?;
    let y = coords.get(1)?.as_f64()?;
    Some(GeoPoint::from_lon_lat(x, y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::offset_meters;
    use crate::{ActivityType, InfrastructureMode};

    fn square() -> Vec<GeoPoint> {
        let o = GeoPoint::new(-33.87, 151.21);
        vec![
            o,
            offset_meters(&o, 0.0, 400.0),
            offset_meters(&o, 400.0, 400.0),
            offset_meters(&o, 400.0, 0.0),
            o,
        ]
    }

    fn route(path: Vec<GeoPoint>) -> CuratedRoute {
        CuratedRoute {
            id: "r".to_string(),
            name: "Short Walking Loop 1".to_string(),
            authority_id: "auth".to_string(),
            activity_type: ActivityType::Walking,
            distance_meters: crate::geo_utils::path_length_meters(&path),
            path,
            tier: "short".to_string(),
            tier_target_meters: 1500.0,
            is_hybrid: false,
            hybrid_type: HybridType::None,
            facility_stops: Vec::new(),
            infrastructure_mode: InfrastructureMode::Pedestrian,
            segment_ids: vec!["s".to_string()],
            import_batch_id: None,
            source_name: String::new(),
        }
    }

    fn near_vertex(path: &[GeoPoint], i: usize, meters: f64) -> GeoPoint {
        offset_meters(&path[i], meters, 0.0)
    }

    #[test]
    fn test_single_gym_is_primary() {
        let path = square();
        let mut r = route(path.clone());
        let gym = Facility::new("gym", near_vertex(&path, 1, 30.0), FacilityType::GymEquipment, 3);
        let before = r.path.clone();
        augment_route(&mut r, &[gym], &GenerationConfig::default());

        assert!(r.is_hybrid);
        assert_eq!(r.hybrid_type, HybridType::Primary);
        assert_eq!(r.facility_stops.len(), 1);
        assert_eq!(r.facility_stops[0].path_index, 1);
        assert_eq!(r.path, before);
    }

    #[test]
    fn test_classification_table() {
        let path = square();
        let make = |id: &str, t: FacilityType, i: usize| Facility::new(id, near_vertex(&path, i, 10.0), t, 1);
        let config = GenerationConfig::default();

        let cases = vec![
            (vec![make("s", FacilityType::Stairs, 2)], HybridType::Secondary),
            (vec![make("b", FacilityType::Bench, 2)], HybridType::Tertiary),
            (
                vec![make("b", FacilityType::Bench, 1), make("g", FacilityType::GymEquipment, 2)],
                HybridType::Mixed,
            ),
            (vec![make("w", FacilityType::WaterSource, 3)], HybridType::None),
            (
                vec![make("w", FacilityType::WaterSource, 3), make("s", FacilityType::Stairs, 0)],
                HybridType::Mixed,
            ),
            (
                vec![make("g", FacilityType::GymEquipment, 1), make("w", FacilityType::WaterSource, 2)],
                HybridType::Mixed,
            ),
            (
                vec![make("w", FacilityType::WaterSource, 1), make("v", FacilityType::ScenicPoint, 3)],
                HybridType::Mixed,
            ),
            (vec![make("v", FacilityType::ScenicPoint, 1)], HybridType::None),
            (
                vec![make("g1", FacilityType::GymEquipment, 1), make("g2", FacilityType::GymEquipment, 3)],
                HybridType::Primary,
            ),
        ];
        for (facilities, expected) in cases {
            let mut r = route(path.clone());
            augment_route(&mut r, &facilities, &config);
            assert_eq!(r.hybrid_type, expected);
            assert_eq!(r.is_hybrid, expected != HybridType::None);
            assert_eq!(r.facility_stops.len(), facilities.len());
        }
    }

    #[test]
    fn test_far_facility_ignored() {
        let path = square();
        let mut r = route(path.clone());
        let far = Facility::new("far", near_vertex(&path, 2, 150.0), FacilityType::GymEquipment, 3);
        augment_route(&mut r, &[far], &GenerationConfig::default());
        assert!(!r.is_hybrid);
        assert!(r.facility_stops.is_empty());
    }

    #[test]
    fn test_stops_follow_path_not_input_order() {
        let path = square();
        let facilities = vec![
            Facility::new("c", near_vertex(&path, 3, 5.0), FacilityType::Bench, 1),
            Facility::new("a", near_vertex(&path, 1, 5.0), FacilityType::Stairs, 1),
            Facility::new("b", near_vertex(&path, 2, 5.0), FacilityType::WaterSource, 1),
        ];
        let stops = find_facility_stops(&path, &facilities, 60.0, 0);
        let ids: Vec<&str> = stops.iter().map(|s| s.facility_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(stops.windows(2).all(|w| w[0].path_index <= w[1].path_index));
    }

    #[test]
    fn test_cap_keeps_highest_priority() {
        let path = square();
        let facilities = vec![
            Facility::new("low", near_vertex(&path, 1, 5.0), FacilityType::Bench, 1),
            Facility::new("high", near_vertex(&path, 3, 5.0), FacilityType::GymEquipment, 9),
            Facility::new("mid", near_vertex(&path, 2, 5.0), FacilityType::Stairs, 5),
        ];
        let stops = find_facility_stops(&path, &facilities, 60.0, 2);
        let ids: Vec<&str> = stops.iter().map(|s| s.facility_id.as_str()).collect();
        assert_eq!(ids, vec!["mid", "high"]);
    }

    #[test]
    fn test_cap_trims_stops_but_not_classification() {
        let path = square();
        let mut facilities: Vec<Facility> = (0..12)
            .map(|i| {
                let at = offset_meters(&path[1], 5.0 + i as f64 * 3.0, 0.0);
                Facility::new(format!("gym-{:02}", i), at, FacilityType::GymEquipment, 3)
            })
            .collect();
        facilities.push(Facility::new("bench", near_vertex(&path, 3, 10.0), FacilityType::Bench, 1));

        let config = GenerationConfig {
            max_facility_stops: 12,
            ..GenerationConfig::default()
        };
        let mut r = route(path);
        augment_route(&mut r, &facilities, &config);

        assert_eq!(r.facility_stops.len(), 12);
        assert!(r.facility_stops.iter().all(|s| s.facility_type == FacilityType::GymEquipment));
        assert_eq!(r.hybrid_type, HybridType::Mixed);
        assert!(r.is_hybrid);
    }

    #[test]
    fn test_parse_geojson_catalog() {
        let raw = br#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "id": 7, "properties": {"category": "Stairs", "priority": 4, "name": "Cliff steps"},
             "geometry": {"type": "Point", "coordinates": [151.21, -33.87]}},
            {"type": "Feature", "properties": {"type": "bubbler"},
             "geometry": {"type": "Point", "coordinates": [151.22, -33.88]}}
        ]}"#;
        let facilities = parse_facility_catalog(raw).unwrap();
        assert_eq!(facilities.len(), 2);
        assert_eq!(facilities[0].id, "7");
        assert_eq!(facilities[0].facility_type, FacilityType::Stairs);
        assert_eq!(facilities[0].priority, 4);
        assert_eq!(facilities[0].name.as_deref(), Some("Cliff steps"));
        assert_eq!(facilities[0].coordinate, GeoPoint::new(-33.87, 151.21));
        assert_eq!(facilities[1].id, "facility-1");
        assert_eq!(facilities[1].facility_type, FacilityType::WaterSource);
    }

    #[test]
    fn test_parse_catalog_rejects_unknown_type() {
        let raw = br#"[{"id": "x", "lat": -33.87, "lng": 151.21, "type": "carpark"}]"#;
        assert!(matches!(
            parse_facility_catalog(raw),
            Err(ParseError::UnknownFacilityType { .. })
        ));
        let raw = br#"[{"id": "x", "type": "bench"}]"#;
        assert!(matches!(
            parse_facility_catalog(raw),
            Err(ParseError::MalformedGeometry { .. })
        ));
        assert!(parse_facility_catalog(b"42").is_err());
    }
}
