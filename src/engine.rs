//! # Generation Engine
//!
//! Runs the curated-loop pipeline for one (authority, activity) pair:
//!
//! 1. Cluster compatible segments ([`build_clusters`])
//! 2. Search every tier of every cluster ([`stitch_cluster`])
//! 3. Turn each loop into a [`CuratedRoute`] and attach facility stops
//!    ([`augment_route`])
//!
//! A run owns no state beyond its inputs, so independent pairs can be
//! generated side by side with [`generate_many`]. Finding no routes is a
//! normal outcome reported through [`GenerationStats`].

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::batch::{new_batch_id, tag_batch, BatchId};
use crate::config::GenerationConfig;
use crate::error::StoreError;
use crate::facilities::augment_route;
use crate::geo_utils::path_length_meters;
use crate::graph::{build_clusters, InfrastructureGraph};
use crate::progress::{emit, percent_of, ProgressPhase, ProgressSink};
use crate::stitching::{stitch_cluster, LoopDraft};
use crate::store::RouteStore;
use crate::{
    ActivityType, CuratedRoute, DataSource, Facility, GenerationStats, HybridType,
    InfrastructureMode, InfrastructureSegment,
};

/// Routes and diagnostics from one generation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationResult {
    pub routes: Vec<CuratedRoute>,
    pub stats: GenerationStats,
}

/// Inputs for one (authority, activity) run in [`generate_many`].
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub authority_id: String,
    pub activity: ActivityType,
    pub segments: Vec<InfrastructureSegment>,
    pub facilities: Vec<Facility>,
}

/// Generate curated loops for one authority and activity.
///
/// Segments owned by other authorities are ignored. An invalid
/// configuration is logged and yields an empty result.
pub fn generate_curated_routes(
    authority_id: &str,
    activity: ActivityType,
    segments: &[InfrastructureSegment],
    facilities: &[Facility],
    config: &GenerationConfig,
    progress: &dyn ProgressSink,
) -> GenerationResult {
    if let Err(e) = config.validate() {
        warn!("[Engine] Invalid configuration for {}/{}: {}", authority_id, activity, e);
        emit(progress, ProgressPhase::Done, 100, format!("invalid configuration: {}", e), None);
        return GenerationResult::default();
    }

    let owned: Vec<InfrastructureSegment> = segments
        .iter()
        .filter(|s| s.authority_id == authority_id)
        .cloned()
        .collect();
    if owned.len() < segments.len() {
        warn!(
            "[Engine] Ignoring {} segments not owned by {}",
            segments.len() - owned.len(),
            authority_id
        );
    }

    let mut stats = GenerationStats {
        segments_processed: owned.len(),
        ..GenerationStats::default()
    };

    // Phase 1: clustering
    emit(
        progress,
        ProgressPhase::Cluster,
        0,
        format!("clustering {} segments", owned.len()),
        None,
    );
    let set = build_clusters(&owned, activity, config);
    stats.compatible_segments = set.compatible_segments;
    stats.clusters_found = set.clusters.len();
    stats.total_infrastructure_km = set
        .clusters
        .iter()
        .map(|c| c.total_length_meters)
        .sum::<f64>()
        / 1000.0;
    emit(
        progress,
        ProgressPhase::Cluster,
        100,
        format!("{} clusters", set.clusters.len()),
        None,
    );

    // Phase 2: stitching
    let total_clusters = set.clusters.len();
    let mut drafts: Vec<LoopDraft> = Vec::new();
    if total_clusters == 0 {
        emit(progress, ProgressPhase::Stitch, 100, "no clusters to stitch", None);
    }
    for (i, cluster) in set.clusters.iter().enumerate() {
        emit(
            progress,
            ProgressPhase::Stitch,
            percent_of(i, total_clusters),
            format!("cluster {}/{}", i + 1, total_clusters),
            None,
        );
        let stitched = stitch_cluster(&set.graph, cluster, config);
        debug!(
            "[Engine] Cluster {}: {} loops, {} tiers skipped ({} over budget)",
            cluster.id,
            stitched.drafts.len(),
            stitched.tiers_skipped,
            stitched.budget_exhausted
        );
        stats.tiers_skipped += stitched.tiers_skipped;
        stats.budget_exhausted += stitched.budget_exhausted;
        drafts.extend(stitched.drafts);
    }

    // Phase 3: conversion and facilities
    let mut ordinals: BTreeMap<String, usize> = BTreeMap::new();
    let mut routes = Vec::with_capacity(drafts.len());
    let mut modes_used: BTreeSet<InfrastructureMode> = BTreeSet::new();
    let total_drafts = drafts.len();
    for (i, draft) in drafts.iter().enumerate() {
        let ordinal = ordinals.entry(draft.tier.name.clone()).or_insert(0);
        *ordinal += 1;
        let mut route = draft_to_route(authority_id, activity, draft, *ordinal, &set.graph);

        if route.closure_gap_meters() > config.closure_tolerance_m {
            warn!(
                "[Engine] Discarding {}: ends {:.1}m from its start",
                route.id,
                route.closure_gap_meters()
            );
            continue;
        }

        emit(
            progress,
            ProgressPhase::Augment,
            percent_of(i, total_drafts),
            format!("route {}/{}", i + 1, total_drafts),
            None,
        );
        augment_route(&mut route, facilities, config);
        modes_used.extend(draft.edges.iter().map(|&e| set.graph.segment(e).mode));
        routes.push(route);
    }

    stats.tiers_generated = routes.len();
    stats.hybrid_routes = routes.iter().filter(|r| r.is_hybrid).count();
    stats.data_source = data_source(&modes_used);

    info!(
        "[Engine] {}/{}: {} routes from {} clusters ({} hybrid, {} tiers skipped, {:.2} km infrastructure)",
        authority_id,
        activity,
        routes.len(),
        stats.clusters_found,
        stats.hybrid_routes,
        stats.tiers_skipped,
        stats.total_infrastructure_km
    );
    emit(
        progress,
        ProgressPhase::Done,
        100,
        format!("{} routes", routes.len()),
        None,
    );

    GenerationResult { routes, stats }
}

/// Run several independent jobs, returning results in job order.
///
/// With the `parallel` feature the jobs run on the rayon pool.
pub fn generate_many(
    jobs: &[GenerationJob],
    config: &GenerationConfig,
    progress: &dyn ProgressSink,
) -> Vec<GenerationResult> {
    let run = |job: &GenerationJob| {
        generate_curated_routes(
            &job.authority_id,
            job.activity,
            &job.segments,
            &job.facilities,
            config,
            progress,
        )
    };

    #[cfg(feature = "parallel")]
    let results: Vec<GenerationResult> = jobs.par_iter().map(run).collect();
    #[cfg(not(feature = "parallel"))]
    let results: Vec<GenerationResult> = jobs.iter().map(run).collect();

    info!(
        "[Engine] Generated {} jobs, {} routes total",
        jobs.len(),
        results.iter().map(|r| r.routes.len()).sum::<usize>()
    );
    results
}

/// Tag `routes` with a fresh batch and swap them in for the pair.
///
/// Returns the new batch id.
pub fn publish_routes<S: RouteStore + ?Sized>(
    store: &mut S,
    authority_id: &str,
    activity: ActivityType,
    mut routes: Vec<CuratedRoute>,
    source_name: &str,
) -> Result<BatchId, StoreError> {
    let batch_id = new_batch_id(source_name);
    tag_batch(&mut routes, &batch_id, source_name);
    store.replace_routes(authority_id, activity, &routes)?;
    Ok(batch_id)
}

fn draft_to_route(
    authority_id: &str,
    activity: ActivityType,
    draft: &LoopDraft,
    ordinal: usize,
    graph: &InfrastructureGraph,
) -> CuratedRoute {
    CuratedRoute {
        id: format!(
            "{}-{}-c{}-{}",
            authority_id,
            activity.as_str(),
            draft.cluster_id,
            draft.tier.name
        ),
        name: format!(
            "{} {} Loop {}",
            title_case(&draft.tier.name),
            activity.label(),
            ordinal
        ),
        authority_id: authority_id.to_string(),
        activity_type: activity,
        path: draft.path.clone(),
        distance_meters: path_length_meters(&draft.path),
        tier: draft.tier.name.clone(),
        tier_target_meters: draft.tier.target_meters,
        is_hybrid: false,
        hybrid_type: HybridType::None,
        facility_stops: Vec::new(),
        infrastructure_mode: dominant_mode(draft, graph),
        segment_ids: draft.segment_ids.clone(),
        import_batch_id: None,
        source_name: source_names(draft, graph),
    }
}

fn title_case(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Mode covering the most traversed length. Ties go to the lower mode.
fn dominant_mode(draft: &LoopDraft, graph: &InfrastructureGraph) -> InfrastructureMode {
    let mut by_mode: BTreeMap<InfrastructureMode, f64> = BTreeMap::new();
    for &edge in &draft.edges {
        let segment = graph.segment(edge);
        *by_mode.entry(segment.mode).or_insert(0.0) += segment.length_meters;
    }
    by_mode
        .into_iter()
        .fold(None, |best: Option<(InfrastructureMode, f64)>, (mode, length)| match best {
            Some((_, best_length)) if best_length >= length => best,
            _ => Some((mode, length)),
        })
        .map(|(mode, _)| mode)
        .unwrap_or(InfrastructureMode::Shared)
}

fn source_names(draft: &LoopDraft, graph: &InfrastructureGraph) -> String {
    let names: BTreeSet<&str> = draft
        .edges
        .iter()
        .map(|&e| graph.segment(e).source_name.as_str())
        .filter(|name| !name.is_empty())
        .collect();
    names.into_iter().collect::<Vec<_>>().join("+")
}

/// Overall source from the modes of every edge the emitted routes walk.
fn data_source(modes: &BTreeSet<InfrastructureMode>) -> DataSource {
    match modes.iter().copied().collect::<Vec<_>>().as_slice() {
        [] => DataSource::None,
        [InfrastructureMode::Cycling] => DataSource::Cycling,
        [InfrastructureMode::Pedestrian] => DataSource::Pedestrian,
        _ => DataSource::Mixed,
    }
}

// ============================================================================
// Tests
// ============================================================================
