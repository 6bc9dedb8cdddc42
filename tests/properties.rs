//! Whole-pipeline properties: determinism, closure, tier bounds, facility
//! ordering and classification, mode isolation and replace semantics.

mod common;

use common::{at, grid, grid_with, triangle, AUTHORITY};
use route_stitcher::{
    build_clusters, generate_curated_routes, publish_routes, ActivityType, Facility, FacilityType,
    GenerationConfig, GenerationResult, HybridType, InfrastructureMode, InfrastructureSegment,
    MemoryStore, NoopProgress, RouteStore,
};

fn generate(
    activity: ActivityType,
    segments: &[InfrastructureSegment],
    facilities: &[Facility],
    config: &GenerationConfig,
) -> GenerationResult {
    generate_curated_routes(AUTHORITY, activity, segments, facilities, config, &NoopProgress)
}

/// Facilities on a handful of grid corners and mid-blocks.
fn facilities() -> Vec<Facility> {
    vec![
        Facility::new("gym-a", at(300.0, 300.0), FacilityType::GymEquipment, 3),
        Facility::new("stairs-a", at(0.0, 150.0), FacilityType::Stairs, 2),
        Facility::new("bench-a", at(310.0, 0.0), FacilityType::Bench, 1),
        Facility::new("bench-b", at(600.0, 450.0), FacilityType::Bench, 1),
        Facility::new("water-a", at(20.0, 20.0), FacilityType::WaterSource, 1),
        Facility::new("far", at(5000.0, 5000.0), FacilityType::GymEquipment, 3),
    ]
}

#[test]
fn test_generation_is_order_independent() {
    let config = GenerationConfig::default();
    let segments = grid(3, 300.0);
    let expected = generate(ActivityType::Walking, &segments, &facilities(), &config);
    assert!(!expected.routes.is_empty());

    let mut reversed = segments.clone();
    reversed.reverse();
    let mut rotated = segments.clone();
    rotated.rotate_left(7);
    let mut interleaved: Vec<InfrastructureSegment> = segments.iter().step_by(2).cloned().collect();
    interleaved.extend(segments.iter().skip(1).step_by(2).cloned());

    for shuffled in [reversed, rotated, interleaved] {
        let result = generate(ActivityType::Walking, &shuffled, &facilities(), &config);
        assert_eq!(result, expected);
    }
}

#[test]
fn test_clusters_are_order_independent() {
    let config = GenerationConfig::default();
    let segments = grid(2, 250.0);
    let mut reversed = segments.clone();
    reversed.reverse();

    let a = build_clusters(&segments, ActivityType::Running, &config);
    let b = build_clusters(&reversed, ActivityType::Running, &config);
    assert_eq!(a.clusters, b.clusters);
    assert_eq!(a.graph.nodes, b.graph.nodes);
}

#[test]
fn test_every_route_closes_and_fits_its_tier() {
    let config = GenerationConfig::default().with_tiers(&[1200.0, 2400.0, 3600.0]);
    let result = generate(ActivityType::Walking, &grid(4, 300.0), &[], &config);
    assert!(!result.routes.is_empty());

    for route in &result.routes {
        assert!(
            route.closure_gap_meters() <= config.closure_tolerance_m,
            "{} ends {:.1}m from its start",
            route.id,
            route.closure_gap_meters()
        );
        let (lower, upper) = config.tier_window(route.tier_target_meters);
        assert!(
            route.distance_meters >= lower && route.distance_meters <= upper,
            "{} is {:.0}m for a {:.0}m tier",
            route.id,
            route.distance_meters,
            route.tier_target_meters
        );
    }
    assert_eq!(result.stats.tiers_generated, result.routes.len());
}

#[test]
fn test_one_route_per_tier_per_cluster() {
    let config = GenerationConfig::default().with_tiers(&[1200.0, 2400.0]);
    let result = generate(ActivityType::Walking, &grid(4, 300.0), &[], &config);

    let mut keys: Vec<&str> = result.routes.iter().map(|r| r.id.as_str()).collect();
    let total = keys.len();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), total);
    assert!(total <= result.stats.clusters_found * config.tiers.len());
}

#[test]
fn test_facility_stops_follow_the_path() {
    let config = GenerationConfig::default();
    let result = generate(ActivityType::Walking, &grid(3, 300.0), &facilities(), &config);
    assert!(result.routes.iter().any(|r| !r.facility_stops.is_empty()));

    for route in &result.routes {
        let indices: Vec<usize> = route.facility_stops.iter().map(|s| s.path_index).collect();
        assert!(
            indices.windows(2).all(|w| w[0] <= w[1]),
            "{} stops out of order: {:?}",
            route.id,
            indices
        );
        assert!(route.facility_stops.len() <= config.max_facility_stops);
        assert!(route.facility_stops.iter().all(|s| s.facility_id != "far"));
        assert_eq!(route.is_hybrid, route.hybrid_type != HybridType::None);
    }
}

#[test]
fn test_augmentation_keeps_geometry() {
    let config = GenerationConfig::default();
    let plain = generate(ActivityType::Walking, &grid(3, 300.0), &[], &config);
    let decorated = generate(ActivityType::Walking, &grid(3, 300.0), &facilities(), &config);

    assert_eq!(plain.routes.len(), decorated.routes.len());
    for (a, b) in plain.routes.iter().zip(&decorated.routes) {
        assert_eq!(a.path, b.path);
        assert_eq!(a.distance_meters, b.distance_meters);
    }
}

#[test]
fn test_cycling_never_uses_pedestrian_segments() {
    // Alternate rows between cycling-only and footpaths, columns shared
    let segments = grid_with(4, 300.0, |r, _, horizontal| {
        if !horizontal {
            InfrastructureMode::Shared
        } else if r % 2 == 0 {
            InfrastructureMode::Cycling
        } else {
            InfrastructureMode::Pedestrian
        }
    });
    let config = GenerationConfig::default();

    let set = build_clusters(&segments, ActivityType::Cycling, &config);
    assert!(set
        .graph
        .segments
        .iter()
        .all(|s| s.mode != InfrastructureMode::Pedestrian));

    let pedestrian: Vec<&str> = segments
        .iter()
        .filter(|s| s.mode == InfrastructureMode::Pedestrian)
        .map(|s| s.id.as_str())
        .collect();
    let result = generate(ActivityType::Cycling, &segments, &[], &config);
    for route in &result.routes {
        assert!(route
            .segment_ids
            .iter()
            .all(|id| !pedestrian.contains(&id.as_str())));
    }

    let walking = build_clusters(&segments, ActivityType::Walking, &config);
    assert!(walking
        .graph
        .segments
        .iter()
        .all(|s| s.mode != InfrastructureMode::Cycling));
}

#[test]
fn test_regeneration_replaces_previous_set() {
    let config = GenerationConfig::default();
    let segments = grid(3, 300.0);
    let mut store = MemoryStore::new();

    let first = generate(ActivityType::Running, &segments, &facilities(), &config);
    assert!(!first.routes.is_empty());
    let first_batch = publish_routes(
        &mut store,
        AUTHORITY,
        ActivityType::Running,
        first.routes.clone(),
        "hero-loops",
    )
    .unwrap();

    let second = generate(ActivityType::Running, &segments, &facilities(), &config);
    let second_batch = publish_routes(
        &mut store,
        AUTHORITY,
        ActivityType::Running,
        second.routes.clone(),
        "hero-loops",
    )
    .unwrap();
    assert_ne!(first_batch, second_batch);

    let stored = store.routes_for(AUTHORITY, ActivityType::Running).unwrap();
    assert_eq!(stored.len(), first.routes.len());
    for (kept, original) in stored.iter().zip(&first.routes) {
        assert_eq!(kept.path, original.path);
        assert_eq!(kept.import_batch_id.as_ref(), Some(&second_batch));
    }

    let batches = store.list_batches().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].batch_id, second_batch);
}

#[test]
fn test_classification_sees_facilities_beyond_the_cap() {
    // Twelve gyms south of one corner and a bench beyond another
    let mut facilities: Vec<Facility> = (0..12)
        .map(|i| {
            Facility::new(
                format!("gym-{:02}", i),
                at(-5.0 - i as f64 * 3.0, 600.0),
                FacilityType::GymEquipment,
                3,
            )
        })
        .collect();
    facilities.push(Facility::new("bench", at(540.0, 300.0), FacilityType::Bench, 1));
    let config = GenerationConfig {
        max_facility_stops: 12,
        ..GenerationConfig::default().with_tiers(&[1500.0])
    };

    let result = generate(
        ActivityType::Walking,
        &triangle(InfrastructureMode::Pedestrian),
        &facilities,
        &config,
    );
    assert_eq!(result.routes.len(), 1);
    let route = &result.routes[0];
    assert_eq!(route.facility_stops.len(), 12);
    assert!(route
        .facility_stops
        .iter()
        .all(|s| s.facility_type == FacilityType::GymEquipment));
    assert_eq!(route.hybrid_type, HybridType::Mixed);
    assert!(route.is_hybrid);
    assert_eq!(result.stats.hybrid_routes, 1);
}

#[test]
fn test_rejected_replace_keeps_previous_set() {
    let config = GenerationConfig::default();
    let segments = grid(3, 300.0);
    let mut store = MemoryStore::new();

    let first = generate(ActivityType::Running, &segments, &facilities(), &config);
    assert!(!first.routes.is_empty());
    let first_batch = publish_routes(
        &mut store,
        AUTHORITY,
        ActivityType::Running,
        first.routes.clone(),
        "hero-loops",
    )
    .unwrap();
    let published = store.routes_for(AUTHORITY, ActivityType::Running).unwrap();

    // Untagged routes never reach the store
    let second = generate(ActivityType::Running, &segments, &[], &config);
    assert!(store
        .replace_routes(AUTHORITY, ActivityType::Running, &second.routes)
        .is_err());

    let stored = store.routes_for(AUTHORITY, ActivityType::Running).unwrap();
    assert_eq!(stored, published);
    assert!(stored
        .iter()
        .all(|r| r.import_batch_id.as_ref() == Some(&first_batch)));
    let batches = store.list_batches().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].batch_id, first_batch);
}
