//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use route_stitcher::geo_utils::offset_meters;
use route_stitcher::{GeoPoint, InfrastructureMode, InfrastructureSegment};

pub const AUTHORITY: &str = "city-of-test";

pub fn origin() -> GeoPoint {
    GeoPoint::new(-41.29, 174.78)
}

pub fn at(north: f64, east: f64) -> GeoPoint {
    offset_meters(&origin(), north, east)
}

pub fn segment(id: &str, path: Vec<GeoPoint>, mode: InfrastructureMode) -> InfrastructureSegment {
    InfrastructureSegment::new(id, AUTHORITY, path, mode).expect("fixture segment")
}

/// Closed triangle of three ~600 m sides (about 1800 m around).
pub fn triangle(mode: InfrastructureMode) -> Vec<InfrastructureSegment> {
    let a = at(0.0, 0.0);
    let b = at(0.0, 600.0);
    let c = at(520.0, 300.0);
    vec![
        segment("tri-1", vec![a, b], mode),
        segment("tri-2", vec![b, c], mode),
        segment("tri-3", vec![c, a], mode),
    ]
}

/// `n`×`n` grid of square blocks. `mode_of(row, col, horizontal)` picks
/// each segment's mode.
pub fn grid_with(
    n: usize,
    block: f64,
    mode_of: impl Fn(usize, usize, bool) -> InfrastructureMode,
) -> Vec<InfrastructureSegment> {
    let point = |r: usize, c: usize| at(r as f64 * block, c as f64 * block);
    let mut segments = Vec::new();
    for r in 0..=n {
        for c in 0..=n {
            if c < n {
                segments.push(segment(
                    &format!("h{}-{}", r, c),
                    vec![point(r, c), point(r, c + 1)],
                    mode_of(r, c, true),
                ));
            }
            if r < n {
                segments.push(segment(
                    &format!("v{}-{}", r, c),
                    vec![point(r, c), point(r + 1, c)],
                    mode_of(r, c, false),
                ));
            }
        }
    }
    segments
}

pub fn grid(n: usize, block: f64) -> Vec<InfrastructureSegment> {
    grid_with(n, block, |_, _, _| InfrastructureMode::Shared)
}
