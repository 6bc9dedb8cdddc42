//! Feature-level readers for GeoJSON and Esri JSON line geometry.
//!
//! Both encodings reduce to a list of line parts in `(lon, lat)` order:
//! GeoJSON `LineString`/`MultiLineString` coordinates, or Esri `paths`.
//! Non-numeric coordinate values become NaN and are dropped later by
//! segment normalization, where they count as degenerate geometry.

use serde_json::{Map, Value};

use crate::GeoPoint;

/// Property keys checked, in order, for a feature identifier.
const ID_KEYS: [&str; 6] = ["id", "ID", "OBJECTID", "ObjectID", "FID", "GlobalID"];

/// Property keys checked, in order, for a human-readable name.
const NAME_KEYS: [&str; 7] = [
    "name",
    "NAME",
    "Name",
    "ROAD_NAME",
    "STREET",
    "TRAIL_NAME",
    "PATH_NAME",
];

/// Line geometry read from one feature.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawLineFeature {
    pub id: Option<String>,
    pub name: Option<String>,
    pub parts: Vec<Vec<GeoPoint>>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FeatureOutcome {
    Lines(RawLineFeature),
    Skipped(String),
}

/// Read one feature value.
pub(crate) fn extract_line_feature(value: &Value) -> FeatureOutcome {
    let Some(feature) = value.as_object() else {
        return FeatureOutcome::Skipped("feature is not an object".to_string());
    };

    // GeoJSON keeps attributes in `properties`, Esri in `attributes`
    let attributes = feature
        .get("properties")
        .or_else(|| feature.get("attributes"))
        .and_then(Value::as_object);

    let Some(geometry) = feature.get("geometry").filter(|g| !g.is_null()) else {
        return FeatureOutcome::Skipped("feature has no geometry".to_string());
    };

    let parts = match read_geometry(geometry) {
        Ok(parts) => parts,
        Err(reason) => return FeatureOutcome::Skipped(reason),
    };
    if parts.is_empty() {
        return FeatureOutcome::Skipped("geometry has no parts".to_string());
    }

    let id = feature
        .get("id")
        .and_then(scalar_to_string)
        .or_else(|| attributes.and_then(|attrs| first_string(attrs, &ID_KEYS)));
    let name = attributes.and_then(|attrs| first_string(attrs, &NAME_KEYS));

    FeatureOutcome::Lines(RawLineFeature { id, name, parts })
}

/// Read a bare geometry object into line parts.
pub(crate) fn read_geometry(geometry: &Value) -> Result<Vec<Vec<GeoPoint>>, String> {
    if let Some(paths) = geometry.get("paths") {
        return read_parts(paths);
    }

    let kind = geometry
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| "geometry has neither 'type' nor 'paths'".to_string())?;
    let coordinates = geometry.get("coordinates");

    match (kind, coordinates) {
        ("LineString", Some(coords)) => Ok(vec![read_positions(coords)?]),
        ("MultiLineString", Some(coords)) => read_parts(coords),
        ("LineString" | "MultiLineString", None) => {
            Err(format!("{} without coordinates", kind))
        }
        (other, _) => Err(format!("unsupported geometry type '{}'", other)),
    }
}

fn read_parts(value: &Value) -> Result<Vec<Vec<GeoPoint>>, String> {
    value
        .as_array()
        .ok_or_else(|| "line parts are not an array".to_string())?
        .iter()
        .map(read_positions)
        .collect()
}

fn read_positions(value: &Value) -> Result<Vec<GeoPoint>, String> {
    value
        .as_array()
        .ok_or_else(|| "positions are not an array".to_string())?
        .iter()
        .map(|position| {
            let pair = position
                .as_array()
                .filter(|p| p.len() >= 2)
                .ok_or_else(|| "position is not an [x, y] array".to_string())?;
            let x = pair[0].as_f64().unwrap_or(f64::NAN);
            let y = pair[1].as_f64().unwrap_or(f64::NAN);
            Ok(GeoPoint::from_lon_lat(x, y))
        })
        .collect()
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_string(attrs: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| attrs.get(*key).and_then(scalar_to_string))
}
