//! Generation configuration.
//!
//! Snapping tolerance, closure tolerance and the tier list were chosen
//! empirically; they are configuration rather than constants so they can be
//! tuned against real authority datasets.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A target-distance bucket for loop search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierSpec {
    /// Tier name stamped on emitted routes (e.g. "short")
    pub name: String,
    /// Target loop distance in meters
    pub target_meters: f64,
}

impl TierSpec {
    pub fn new(name: impl Into<String>, target_meters: f64) -> Self {
        Self {
            name: name.into(),
            target_meters,
        }
    }
}

/// Default tier names, assigned in ascending order of target distance.
const TIER_NAMES: [&str; 4] = ["short", "medium", "long", "extended"];

/// Configuration for clustering, loop search and facility augmentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Raw endpoints closer than this merge into one graph node.
    /// Default: 15.0 meters
    pub snapping_tolerance_m: f64,

    /// Maximum gap between the first and last point of an emitted loop.
    /// Default: 50.0 meters
    pub closure_tolerance_m: f64,

    /// Clusters with less total infrastructure than this are dropped.
    /// Default: 200.0 meters
    pub min_cluster_length_m: f64,

    /// Target distances, searched in ascending order.
    /// Default: short 1500m, medium 3000m, long 5000m
    pub tiers: Vec<TierSpec>,

    /// Accepted loop length is `[lower × target, upper × target]`.
    /// Default: 0.8
    pub tier_lower_ratio: f64,

    /// Default: 1.25
    pub tier_upper_ratio: f64,

    /// Re-traversals of already-used edges allowed within one loop.
    /// One revisit is enough for an out-and-back on a dead-end segment.
    /// Default: 1
    pub max_edge_revisits: u32,

    /// DFS edge expansions allowed per (cluster, tier) before the tier is skipped.
    /// Default: 200_000
    pub max_expansions_per_tier: u64,

    /// Optional wall-clock budget per (cluster, tier) search.
    /// Default: None
    pub max_search_millis: Option<u64>,

    /// Maximum number of edges in one loop.
    /// Default: 400
    pub max_path_edges: usize,

    /// Facilities within this distance of any path vertex become stops.
    /// Default: 60.0 meters
    pub facility_buffer_m: f64,

    /// Cap on stops per route; the highest priority facilities are kept.
    /// Zero disables the cap.
    /// Default: 12
    pub max_facility_stops: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            snapping_tolerance_m: 15.0,
            closure_tolerance_m: 50.0,
            min_cluster_length_m: 200.0,
            tiers: vec![
                TierSpec::new("short", 1500.0),
                TierSpec::new("medium", 3000.0),
                TierSpec::new("long", 5000.0),
            ],
            tier_lower_ratio: 0.8,
            tier_upper_ratio: 1.25,
            max_edge_revisits: 1,
            max_expansions_per_tier: 200_000,
            max_search_millis: None,
            max_path_edges: 400,
            facility_buffer_m: 60.0,
            max_facility_stops: 12,
        }
    }
}

impl GenerationConfig {
    /// Replace the tier list with ascending targets, naming them
    /// short, medium, long, extended, then `tier-N`.
    ///
    /// ```
    /// use route_stitcher::GenerationConfig;
    ///
    /// let config = GenerationConfig::default().with_tiers(&[800.0, 2000.0]);
    /// assert_eq!(config.tiers[1].name, "medium");
    /// ```
    pub fn with_tiers(mut self, targets: &[f64]) -> Self {
        self.tiers = targets
            .iter()
            .enumerate()
            .map(|(i, &target)| {
                let name = TIER_NAMES
                    .get(i)
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| format!("tier-{}", i + 1));
                TierSpec::new(name, target)
            })
            .collect();
        self
    }

    /// Load a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Document {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Accepted length window for a tier target.
    pub fn tier_window(&self, target_meters: f64) -> (f64, f64) {
        (
            target_meters * self.tier_lower_ratio,
            target_meters * self.tier_upper_ratio,
        )
    }

    /// Check the configuration is internally consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("snapping_tolerance_m", self.snapping_tolerance_m)?;
        positive("closure_tolerance_m", self.closure_tolerance_m)?;
        positive("facility_buffer_m", self.facility_buffer_m)?;
        if !(self.min_cluster_length_m >= 0.0) {
            return Err(ConfigError::NotPositive {
                field: "min_cluster_length_m",
                value: self.min_cluster_length_m,
            });
        }
        if self.closure_tolerance_m < self.snapping_tolerance_m {
            return Err(ConfigError::ClosureBelowSnapping {
                closure: self.closure_tolerance_m,
                snapping: self.snapping_tolerance_m,
            });
        }
        if !(self.tier_lower_ratio > 0.0
            && self.tier_lower_ratio <= 1.0
            && self.tier_upper_ratio >= 1.0
            && self.tier_upper_ratio.is_finite())
        {
            return Err(ConfigError::InvalidTierRatios {
                lower: self.tier_lower_ratio,
                upper: self.tier_upper_ratio,
            });
        }
        if self.tiers.is_empty() {
            return Err(ConfigError::NoTiers);
        }
        for (i, tier) in self.tiers.iter().enumerate() {
            positive("tiers.target_meters", tier.target_meters)?;
            // Tier names are part of route ids
            if self.tiers[..i].iter().any(|t| t.name == tier.name) {
                return Err(ConfigError::DuplicateTierName {
                    name: tier.name.clone(),
                });
            }
        }
        for pair in self.tiers.windows(2) {
            if pair[1].target_meters <= pair[0].target_meters {
                return Err(ConfigError::TiersNotAscending {
                    previous: pair[0].target_meters,
                    next: pair[1].target_meters,
                });
            }
        }
        positive("max_expansions_per_tier", self.max_expansions_per_tier as f64)?;
        positive("max_path_edges", self.max_path_edges as f64)?;
        Ok(())
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field, value })
    }
}
