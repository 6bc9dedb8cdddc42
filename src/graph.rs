//! # Infrastructure Graph & Clustering
//!
//! Builds an undirected multigraph from the segments compatible with one
//! activity and splits it into connected clusters.
//!
//! ## Algorithm
//! 1. Keep segments whose mode serves the activity, sorted by a stable key
//! 2. Snap raw endpoints closer than the snapping tolerance (R-tree query +
//!    union-find, so snapping is transitive)
//! 3. Each endpoint group becomes a [`GraphNode`]; each segment an edge
//! 4. Union the two nodes of every edge; each root is a [`Cluster`]
//! 5. Drop clusters shorter than `min_cluster_length_m`
//!
//! Node and cluster numbering come from canonical union-find groups over the
//! sorted endpoint list, so shuffling the input changes nothing.

use std::cmp::Ordering;

use log::{debug, info};
use rstar::{PointDistance, RTree, RTreeObject, AABB};

use crate::config::GenerationConfig;
use crate::geo_utils::{self, haversine_distance, meters_to_degrees};
use crate::union_find::UnionFind;
use crate::{ActivityType, GeoPoint, InfrastructureMode, InfrastructureSegment};

/// Modes whose infrastructure can carry an activity.
pub fn compatible_modes(activity: ActivityType) -> &'static [InfrastructureMode] {
    match activity {
        ActivityType::Cycling => &[InfrastructureMode::Cycling, InfrastructureMode::Shared],
        ActivityType::Running | ActivityType::Walking => {
            &[InfrastructureMode::Pedestrian, InfrastructureMode::Shared]
        }
    }
}

/// A raw segment endpoint for R-tree queries
#[derive(Debug, Clone, Copy)]
struct IndexedEndpoint {
    idx: usize,
    lat: f64,
    lng: f64,
}

impl RTreeObject for IndexedEndpoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lat, self.lng])
    }
}

impl PointDistance for IndexedEndpoint {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dlat = self.lat - point[0];
        let dlng = self.lng - point[1];
        dlat * dlat + dlng * dlng
    }
}

/// A junction or dead end: one group of snapped endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub id: usize,
    /// Mean of the snapped endpoints
    pub coordinate: GeoPoint,
    /// Ids of segments ending here, sorted; a self-loop appears twice
    pub incident_segment_ids: Vec<String>,
}

impl GraphNode {
    /// Edge-end count, a self-loop counting twice.
    pub fn degree(&self) -> usize {
        self.incident_segment_ids.len()
    }
}

/// One segment as an undirected edge between two nodes.
///
/// `from` is the node at the segment's first point, `to` at its last.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphEdge {
    pub from: usize,
    pub to: usize,
    pub length_meters: f64,
}

impl GraphEdge {
    /// Node reached when leaving `node` over this edge.
    pub fn other_end(&self, node: usize) -> usize {
        if self.from == node {
            self.to
        } else {
            self.from
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.from == self.to
    }
}

/// Graph over the compatible segments of one activity.
///
/// `edges[i]` is the edge for `segments[i]`.
#[derive(Debug, Clone, Default)]
pub struct InfrastructureGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub segments: Vec<InfrastructureSegment>,
    adjacency: Vec<Vec<usize>>,
}

impl InfrastructureGraph {
    /// Edge indices touching `node`, ascending. A self-loop is listed once.
    pub fn adjacent(&self, node: usize) -> &[usize] {
        self.adjacency.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn node(&self, id: usize) -> &GraphNode {
        &self.nodes[id]
    }

    pub fn segment(&self, edge: usize) -> &InfrastructureSegment {
        &self.segments[edge]
    }

    /// Segment geometry oriented to leave `from_node`.
    pub fn oriented_path(&self, edge: usize, from_node: usize) -> impl Iterator<Item = GeoPoint> + '_ {
        let path = &self.segments[edge].path;
        let forward = self.edges[edge].from == from_node;
        let (fwd, rev) = if forward {
            (Some(path.iter()), None)
        } else {
            (None, Some(path.iter().rev()))
        };
        fwd.into_iter()
            .flatten()
            .chain(rev.into_iter().flatten())
            .copied()
    }
}

/// A connected group of nodes and the segments joining them.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub id: usize,
    /// Node ids, ascending
    pub nodes: Vec<usize>,
    /// Edge indices into the graph, ascending
    pub segments: Vec<usize>,
    pub total_length_meters: f64,
}

impl Cluster {
    /// Node to start loop search from: highest degree, lowest id on ties.
    pub fn start_node(&self, graph: &InfrastructureGraph) -> Option<usize> {
        self.nodes.iter().copied().max_by(|&a, &b| {
            graph.nodes[a]
                .degree()
                .cmp(&graph.nodes[b].degree())
                .then_with(|| b.cmp(&a))
        })
    }

    pub fn segment_ids<'a>(&'a self, graph: &'a InfrastructureGraph) -> impl Iterator<Item = &'a str> + 'a {
        self.segments
            .iter()
            .map(move |&edge| graph.segments[edge].id.as_str())
    }
}

/// Clusters for one activity, with the graph they index into.
#[derive(Debug, Clone, Default)]
pub struct ClusterSet {
    pub graph: InfrastructureGraph,
    /// Clusters meeting the minimum length, in canonical order
    pub clusters: Vec<Cluster>,
    /// Segments whose mode serves the activity
    pub compatible_segments: usize,
}

/// Stable ordering for segments, independent of input order.
fn segment_order(a: &InfrastructureSegment, b: &InfrastructureSegment) -> Ordering {
    a.id.cmp(&b.id)
        .then_with(|| a.source_name.cmp(&b.source_name))
        .then_with(|| a.path.len().cmp(&b.path.len()))
        .then_with(|| {
            a.path
                .iter()
                .zip(&b.path)
                .map(|(p, q)| {
                    p.latitude
                        .total_cmp(&q.latitude)
                        .then_with(|| p.longitude.total_cmp(&q.longitude))
                })
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        })
}

/// Build the graph and clusters for `activity`.
///
/// # Example
/// ```
/// use route_stitcher::{build_clusters, geo_utils, ActivityType, GenerationConfig, GeoPoint,
///     InfrastructureMode, InfrastructureSegment};
///
/// let origin = GeoPoint::new(-33.87, 151.21);
/// let far = geo_utils::offset_meters(&origin, 0.0, 400.0);
/// let seg = InfrastructureSegment::new("a", "auth", vec![origin, far], InfrastructureMode::Shared)
///     .unwrap();
/// let set = build_clusters(&[seg], ActivityType::Walking, &GenerationConfig::default());
/// assert_eq!(set.clusters.len(), 1);
/// assert_eq!(set.graph.nodes.len(), 2);
/// ```
pub fn build_clusters(
    segments: &[InfrastructureSegment],
    activity: ActivityType,
    config: &GenerationConfig,
) -> ClusterSet {
    let modes = compatible_modes(activity);
    let mut compatible: Vec<InfrastructureSegment> = segments
        .iter()
        .filter(|s| modes.contains(&s.mode))
        .cloned()
        .collect();
    compatible.sort_by(segment_order);

    let compatible_segments = compatible.len();
    if compatible.is_empty() {
        info!(
            "[Clustering] No {} compatible segments among {}",
            activity,
            segments.len()
        );
        return ClusterSet::default();
    }

    let endpoint_groups = snap_endpoints(&compatible, config.snapping_tolerance_m);

    // Endpoint 2i is segment i's start, 2i+1 its end
    let mut node_of_endpoint = vec![0usize; compatible.len() * 2];
    let mut nodes = Vec::with_capacity(endpoint_groups.len());
    for (node_id, group) in endpoint_groups.iter().enumerate() {
        let points: Vec<GeoPoint> = group
            .iter()
            .map(|&ep| endpoint_point(&compatible, ep))
            .collect();
        let mut incident: Vec<String> = group
            .iter()
            .map(|&ep| compatible[ep / 2].id.clone())
            .collect();
        incident.sort();
        for &ep in group {
            node_of_endpoint[ep] = node_id;
        }
        nodes.push(GraphNode {
            id: node_id,
            coordinate: geo_utils::mean_point(&points).unwrap_or(points[0]),
            incident_segment_ids: incident,
        });
    }

    let edges: Vec<GraphEdge> = compatible
        .iter()
        .enumerate()
        .map(|(i, seg)| GraphEdge {
            from: node_of_endpoint[2 * i],
            to: node_of_endpoint[2 * i + 1],
            length_meters: seg.length_meters,
        })
        .collect();

    let mut adjacency = vec![Vec::new(); nodes.len()];
    for (i, edge) in edges.iter().enumerate() {
        adjacency[edge.from].push(i);
        if !edge.is_self_loop() {
            adjacency[edge.to].push(i);
        }
    }

    // Connectivity over nodes
    let mut uf = UnionFind::new(nodes.len());
    for edge in &edges {
        uf.union(edge.from, edge.to);
    }
    let mut cluster_of_node = vec![0usize; nodes.len()];
    let node_groups = uf.groups();
    for (slot, group) in node_groups.iter().enumerate() {
        for &n in group {
            cluster_of_node[n] = slot;
        }
    }
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); node_groups.len()];
    for (i, edge) in edges.iter().enumerate() {
        members[cluster_of_node[edge.from]].push(i);
    }

    let mut clusters = Vec::new();
    let mut dropped = 0usize;
    for (group, edge_ids) in node_groups.into_iter().zip(members) {
        let total_length_meters: f64 = edge_ids.iter().map(|&e| edges[e].length_meters).sum();
        if total_length_meters < config.min_cluster_length_m {
            dropped += 1;
            continue;
        }
        clusters.push(Cluster {
            id: clusters.len(),
            nodes: group,
            segments: edge_ids,
            total_length_meters,
        });
    }

    for cluster in &clusters {
        debug!(
            "[Clustering] Cluster {}: {} nodes, {} segments, {:.0}m",
            cluster.id,
            cluster.nodes.len(),
            cluster.segments.len(),
            cluster.total_length_meters
        );
    }
    info!(
        "[Clustering] {}: {} compatible of {} segments -> {} nodes, {} clusters ({} below {:.0}m dropped)",
        activity,
        compatible_segments,
        segments.len(),
        nodes.len(),
        clusters.len(),
        dropped,
        config.min_cluster_length_m
    );

    ClusterSet {
        graph: InfrastructureGraph {
            nodes,
            edges,
            segments: compatible,
            adjacency,
        },
        clusters,
        compatible_segments,
    }
}

fn endpoint_point(segments: &[InfrastructureSegment], endpoint: usize) -> GeoPoint {
    let segment = &segments[endpoint / 2];
    if endpoint % 2 == 0 {
        segment.start()
    } else {
        segment.end()
    }
}

/// Group endpoints within `tolerance_m` of each other, transitively.
fn snap_endpoints(segments: &[InfrastructureSegment], tolerance_m: f64) -> Vec<Vec<usize>> {
    let endpoints: Vec<IndexedEndpoint> = (0..segments.len() * 2)
        .map(|idx| {
            let p = endpoint_point(segments, idx);
            IndexedEndpoint {
                idx,
                lat: p.latitude,
                lng: p.longitude,
            }
        })
        .collect();
    let tree = RTree::bulk_load(endpoints.clone());

    let mut uf = UnionFind::new(endpoints.len());
    for ep in &endpoints {
        let radius = meters_to_degrees(tolerance_m, ep.lat) * 1.1;
        let here = GeoPoint::new(ep.lat, ep.lng);
        for other in tree.locate_within_distance([ep.lat, ep.lng], radius * radius) {
            if other.idx > ep.idx
                && haversine_distance(&here, &GeoPoint::new(other.lat, other.lng)) <= tolerance_m
            {
                uf.union(ep.idx, other.idx);
            }
        }
    }
    uf.groups()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::offset_meters;

    fn origin() -> GeoPoint {
        GeoPoint::new(-33.87, 151.21)
    }

    fn seg(id: &str, a: GeoPoint, b: GeoPoint, mode: InfrastructureMode) -> InfrastructureSegment {
        InfrastructureSegment::new(id, "auth", vec![a, b], mode).unwrap()
    }

    /// Triangle with ~600m sides whose joints are a few meters off.
    fn triangle(mode: InfrastructureMode) -> Vec<InfrastructureSegment> {
        let o = origin();
        let a = offset_meters(&o, 0.0, 0.0);
        let b = offset_meters(&o, 0.0, 600.0);
        let c = offset_meters(&o, 520.0, 300.0);
        vec![
            seg("t1", a, b, mode),
            seg("t2", offset_meters(&b, 3.0, 0.0), c, mode),
            seg("t3", offset_meters(&c, 0.0, -4.0), offset_meters(&a, 2.0, 2.0), mode),
        ]
    }

    #[test]
    fn test_compatible_modes() {
        assert!(compatible_modes(ActivityType::Cycling).contains(&InfrastructureMode::Shared));
        assert!(!compatible_modes(ActivityType::Cycling).contains(&InfrastructureMode::Pedestrian));
        assert!(!compatible_modes(ActivityType::Running).contains(&InfrastructureMode::Cycling));
    }

    #[test]
    fn test_snapping_closes_triangle() {
        let set = build_clusters(
            &triangle(InfrastructureMode::Pedestrian),
            ActivityType::Walking,
            &GenerationConfig::default(),
        );
        assert_eq!(set.graph.nodes.len(), 3);
        assert_eq!(set.clusters.len(), 1);
        assert!(set.graph.nodes.iter().all(|n| n.degree() == 2));
        assert!((set.clusters[0].total_length_meters - 1800.0).abs() < 30.0);
    }

    #[test]
    fn test_snapping_is_transitive() {
        let o = origin();
        let far = offset_meters(&o, 300.0, 0.0);
        let segments = vec![
            seg("a", o, far, InfrastructureMode::Shared),
            seg("b", offset_meters(&o, 0.0, 10.0), offset_meters(&far, 0.0, 200.0), InfrastructureMode::Shared),
            seg("c", offset_meters(&o, 0.0, 20.0), offset_meters(&far, 0.0, -200.0), InfrastructureMode::Shared),
        ];
        let set = build_clusters(&segments, ActivityType::Walking, &GenerationConfig::default());
        // a-b and b-c are within 15m, a-c is not; all three still share a node
        assert_eq!(set.graph.nodes[set.graph.edges[0].from].degree(), 3);
    }

    #[test]
    fn test_order_independent() {
        let mut segments = triangle(InfrastructureMode::Shared);
        let o = origin();
        segments.push(seg(
            "spur",
            offset_meters(&o, -1.0, 1.0),
            offset_meters(&o, -400.0, 0.0),
            InfrastructureMode::Shared,
        ));
        let config = GenerationConfig::default();
        let forward = build_clusters(&segments, ActivityType::Cycling, &config);
        segments.reverse();
        segments.swap(0, 2);
        let shuffled = build_clusters(&segments, ActivityType::Cycling, &config);

        assert_eq!(forward.graph.nodes, shuffled.graph.nodes);
        assert_eq!(forward.graph.edges, shuffled.graph.edges);
        assert_eq!(forward.clusters, shuffled.clusters);
    }

    #[test]
    fn test_mode_filter_and_min_length() {
        let o = origin();
        let mut segments = triangle(InfrastructureMode::Cycling);
        segments.push(seg(
            "ped",
            o,
            offset_meters(&o, -500.0, 0.0),
            InfrastructureMode::Pedestrian,
        ));
        let far = offset_meters(&o, 5000.0, 5000.0);
        segments.push(seg(
            "stub",
            far,
            offset_meters(&far, 50.0, 0.0),
            InfrastructureMode::Cycling,
        ));

        let set = build_clusters(&segments, ActivityType::Cycling, &GenerationConfig::default());
        assert_eq!(set.compatible_segments, 4);
        assert_eq!(set.clusters.len(), 1);
        assert!(set.graph.segments.iter().all(|s| s.mode != InfrastructureMode::Pedestrian));
        let ids: Vec<&str> = set.clusters[0].segment_ids(&set.graph).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn test_start_node_prefers_degree_then_id() {
        let o = origin();
        let hub = offset_meters(&o, 0.0, 500.0);
        let segments = vec![
            seg("a", o, hub, InfrastructureMode::Shared),
            seg("b", hub, offset_meters(&hub, 400.0, 0.0), InfrastructureMode::Shared),
        ];
        let set = build_clusters(&segments, ActivityType::Walking, &GenerationConfig::default());
        let cluster = &set.clusters[0];
        let start = cluster.start_node(&set.graph).unwrap();
        assert_eq!(set.graph.nodes[start].degree(), 2);

        let single = build_clusters(&segments[..1], ActivityType::Walking, &GenerationConfig::default());
        assert_eq!(single.clusters[0].start_node(&single.graph), Some(0));
    }

    #[test]
    fn test_circular_segment_is_self_loop() {
        let o = origin();
        let path = vec![
            o,
            offset_meters(&o, 0.0, 200.0),
            offset_meters(&o, 200.0, 200.0),
            offset_meters(&o, 200.0, 0.0),
            offset_meters(&o, 5.0, 0.0),
        ];
        let ring = InfrastructureSegment::new("ring", "auth", path, InfrastructureMode::Pedestrian).unwrap();
        let set = build_clusters(&[ring], ActivityType::Running, &GenerationConfig::default());
        assert_eq!(set.graph.nodes.len(), 1);
        assert!(set.graph.edges[0].is_self_loop());
        assert_eq!(set.graph.adjacent(0), &[0]);
        assert_eq!(set.graph.nodes[0].degree(), 2);
    }

    #[test]
    fn test_oriented_path() {
        let o = origin();
        let b = offset_meters(&o, 0.0, 300.0);
        let set = build_clusters(
            &[seg("a", o, b, InfrastructureMode::Shared)],
            ActivityType::Walking,
            &GenerationConfig::default(),
        );
        let edge = set.graph.edges[0];
        let back: Vec<GeoPoint> = set.graph.oriented_path(0, edge.to).collect();
        assert_eq!(back, vec![b, o]);
        assert_eq!(edge.other_end(edge.from), edge.to);
    }

    #[test]
    fn test_no_compatible_segments() {
        let set = build_clusters(
            &triangle(InfrastructureMode::Pedestrian),
            ActivityType::Cycling,
            &GenerationConfig::default(),
        );
        assert_eq!(set.compatible_segments, 0);
        assert!(set.clusters.is_empty());
    }
}
