//! # Loop Stitching & Tiering
//!
//! Depth-first search for one closed loop per (cluster, tier).
//!
//! The walk starts at the cluster's best-connected node and accumulates edge
//! length, preferring edges not yet used. Each loop may re-traverse already
//! used edges at most `max_edge_revisits` times in total, which is what lets
//! tree-shaped clusters produce out-and-back loops. Branches whose length plus
//! the straight-line distance home already exceeds the tier's upper bound are
//! pruned.
//!
//! A walk succeeds when it is back within closure tolerance of the start and
//! its stitched geometry both closes and falls inside the tier window. The
//! search is bounded by an expansion count and an optional deadline; running
//! out of budget skips the tier.

use std::time::{Duration, Instant};

use log::debug;

use crate::config::{GenerationConfig, TierSpec};
use crate::geo_utils::{dedup_consecutive, haversine_distance, is_closed, near, path_length_meters};
use crate::graph::{Cluster, InfrastructureGraph};
use crate::GeoPoint;

/// Deadline is checked once per this many expansions.
const DEADLINE_CHECK_INTERVAL: u64 = 256;

/// A closed loop found in one cluster for one tier.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopDraft {
    pub cluster_id: usize,
    pub tier: TierSpec,
    pub path: Vec<GeoPoint>,
    /// Geometric length of `path`
    pub distance_meters: f64,
    /// Edge indices in traversal order
    pub edges: Vec<usize>,
    /// Segment ids in traversal order, repeated where an edge is revisited
    pub segment_ids: Vec<String>,
    /// Re-traversals used by this loop
    pub revisits: u32,
    pub expansions: u64,
}

/// Result of searching one tier.
#[derive(Debug, Clone, PartialEq)]
pub enum TierOutcome {
    Found(LoopDraft),
    /// Search space exhausted without a loop in the window
    NotFound { expansions: u64 },
    /// Expansion or time budget ran out first
    BudgetExhausted { expansions: u64 },
}

/// Loops found for one cluster across all tiers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterStitch {
    /// At most one per tier, in tier order
    pub drafts: Vec<LoopDraft>,
    /// Tiers without a loop, budget exhaustion included
    pub tiers_skipped: usize,
    pub budget_exhausted: usize,
}

/// Search every configured tier of `cluster`, ascending.
pub fn stitch_cluster(
    graph: &InfrastructureGraph,
    cluster: &Cluster,
    config: &GenerationConfig,
) -> ClusterStitch {
    let mut tiers: Vec<&TierSpec> = config.tiers.iter().collect();
    tiers.sort_by(|a, b| a.target_meters.total_cmp(&b.target_meters));

    let mut result = ClusterStitch::default();
    for tier in tiers {
        match search_tier(graph, cluster, tier, config) {
            TierOutcome::Found(draft) => result.drafts.push(draft),
            TierOutcome::NotFound { .. } => result.tiers_skipped += 1,
            TierOutcome::BudgetExhausted { .. } => {
                result.tiers_skipped += 1;
                result.budget_exhausted += 1;
            }
        }
    }
    result
}

/// Search one tier of one cluster.
pub fn search_tier(
    graph: &InfrastructureGraph,
    cluster: &Cluster,
    tier: &TierSpec,
    config: &GenerationConfig,
) -> TierOutcome {
    let Some(start) = cluster.start_node(graph) else {
        return TierOutcome::NotFound { expansions: 0 };
    };
    let (lower, upper) = config.tier_window(tier.target_meters);

    // Each revisit walks one more edge a second time, longest edges first
    let mut lengths: Vec<f64> = cluster
        .segments
        .iter()
        .map(|&e| graph.edges[e].length_meters)
        .collect();
    lengths.sort_by(|a, b| b.total_cmp(a));
    let reachable = cluster.total_length_meters
        + lengths
            .iter()
            .take(config.max_edge_revisits as usize)
            .sum::<f64>();
    if reachable < lower {
        debug!(
            "[Stitcher] Cluster {} tier {}: {:.0}m of infrastructure cannot reach {:.0}m",
            cluster.id, tier.name, cluster.total_length_meters, lower
        );
        return TierOutcome::NotFound { expansions: 0 };
    }

    let mut search = LoopSearch {
        graph,
        config,
        start_point: graph.nodes[start].coordinate,
        target: tier.target_meters,
        lower,
        upper,
        use_count: vec![0; graph.edges.len()],
        trail: Vec::new(),
        revisits: 0,
        expansions: 0,
        deadline: config
            .max_search_millis
            .map(|ms| Instant::now() + Duration::from_millis(ms)),
        exhausted: false,
    };

    match search.walk(start, 0.0) {
        Some((path, distance_meters)) => {
            let edges: Vec<usize> = search.trail.iter().map(|&(edge, _)| edge).collect();
            let segment_ids = edges
                .iter()
                .map(|&edge| graph.segments[edge].id.clone())
                .collect();
            debug!(
                "[Stitcher] Cluster {} tier {} ({:.0}m): {:.0}m loop over {} edges ({} revisits) in {} expansions",
                cluster.id,
                tier.name,
                tier.target_meters,
                distance_meters,
                edges.len(),
                search.revisits,
                search.expansions
            );
            TierOutcome::Found(LoopDraft {
                cluster_id: cluster.id,
                tier: tier.clone(),
                path,
                distance_meters,
                edges,
                segment_ids,
                revisits: search.revisits,
                expansions: search.expansions,
            })
        }
        None if search.exhausted => {
            debug!(
                "[Stitcher] Cluster {} tier {}: budget exhausted after {} expansions",
                cluster.id, tier.name, search.expansions
            );
            TierOutcome::BudgetExhausted {
                expansions: search.expansions,
            }
        }
        None => {
            debug!(
                "[Stitcher] Cluster {} tier {}: no loop in [{:.0}, {:.0}]m ({} expansions)",
                cluster.id, tier.name, lower, upper, search.expansions
            );
            TierOutcome::NotFound {
                expansions: search.expansions,
            }
        }
    }
}

/// Mutable state of one tier search.
struct LoopSearch<'a> {
    graph: &'a InfrastructureGraph,
    config: &'a GenerationConfig,
    start_point: GeoPoint,
    target: f64,
    lower: f64,
    upper: f64,
    /// Traversals per edge index
    use_count: Vec<u8>,
    /// `(edge, node left from)` in walk order
    trail: Vec<(usize, usize)>,
    revisits: u32,
    expansions: u64,
    deadline: Option<Instant>,
    exhausted: bool,
}

/// Candidate move out of a node.
struct Step {
    edge: usize,
    next: usize,
    revisit: bool,
    home_meters: f64,
}

impl LoopSearch<'_> {
    fn walk(&mut self, node: usize, length: f64) -> Option<(Vec<GeoPoint>, f64)> {
        if !self.trail.is_empty() {
            if let Some(found) = self.try_close(node, length) {
                return Some(found);
            }
        }
        if self.trail.len() >= self.config.max_path_edges {
            return None;
        }

        for step in self.steps(node, length) {
            if self.expansions >= self.config.max_expansions_per_tier || self.past_deadline() {
                self.exhausted = true;
                return None;
            }
            self.expansions += 1;

            let next_length = length + self.graph.edges[step.edge].length_meters;
            if next_length + step.home_meters > self.upper {
                continue;
            }

            self.use_count[step.edge] += 1;
            if step.revisit {
                self.revisits += 1;
            }
            self.trail.push((step.edge, node));

            if let Some(found) = self.walk(step.next, next_length) {
                return Some(found);
            }

            self.trail.pop();
            self.use_count[step.edge] -= 1;
            if step.revisit {
                self.revisits -= 1;
            }
            if self.exhausted {
                return None;
            }
        }
        None
    }

    /// Accept the current walk if it closes inside the tier window.
    fn try_close(&self, node: usize, length: f64) -> Option<(Vec<GeoPoint>, f64)> {
        let closure = self.config.closure_tolerance_m;
        if !near(&self.graph.nodes[node].coordinate, &self.start_point, closure) {
            return None;
        }
        // Snapped joints can add up to two snapping tolerances per edge
        let slack = 2.0 * self.config.snapping_tolerance_m * self.trail.len() as f64;
        if length + slack < self.lower || length - slack > self.upper {
            return None;
        }

        let path = self.stitched_path();
        let distance = path_length_meters(&path);
        if distance < self.lower || distance > self.upper || !is_closed(&path, closure) {
            return None;
        }
        Some((path, distance))
    }

    fn stitched_path(&self) -> Vec<GeoPoint> {
        dedup_consecutive(
            self.trail
                .iter()
                .flat_map(|&(edge, from)| self.graph.oriented_path(edge, from)),
        )
    }

    /// Moves out of `node`, best first.
    fn steps(&self, node: usize, length: f64) -> Vec<Step> {
        let revisits_left = self.revisits < self.config.max_edge_revisits;
        let mut steps: Vec<Step> = self
            .graph
            .adjacent(node)
            .iter()
            .filter_map(|&edge| {
                let revisit = match self.use_count[edge] {
                    0 => false,
                    1 if revisits_left => true,
                    _ => return None,
                };
                let next = self.graph.edges[edge].other_end(node);
                Some(Step {
                    edge,
                    next,
                    revisit,
                    home_meters: haversine_distance(
                        &self.graph.nodes[next].coordinate,
                        &self.start_point,
                    ),
                })
            })
            .collect();

        // Past half the target, head for home
        let homeward = length > self.target / 2.0;
        steps.sort_by(|a, b| {
            a.revisit.cmp(&b.revisit).then_with(|| {
                if homeward {
                    a.home_meters
                        .total_cmp(&b.home_meters)
                        .then_with(|| a.edge.cmp(&b.edge))
                } else {
                    a.edge.cmp(&b.edge)
                }
            })
        });
        steps
    }

    fn past_deadline(&self) -> bool {
        match self.deadline {
            Some(deadline) if self.expansions % DEADLINE_CHECK_INTERVAL == 0 => {
                Instant::now() >= deadline
            }
            _ => false,
        }
    }
}
