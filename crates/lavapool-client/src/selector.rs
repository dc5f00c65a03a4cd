//! Node selection
//!
//! Greedy least-loaded selection with a regional preference. Sessions are
//! never moved once placed, so the choice only has to be good at join time.

use std::sync::Arc;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::region::{simplify_region, RegionAffinity};
use lavapool_core::LoadStats;

/// What the selector needs to know about a node
pub trait Candidate {
    fn is_connected(&self) -> bool;
    fn region(&self) -> &str;
    fn load(&self) -> LoadStats;
}

impl<T: Candidate + ?Sized> Candidate for Arc<T> {
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn region(&self) -> &str {
        (**self).region()
    }

    fn load(&self) -> LoadStats {
        (**self).load()
    }
}

/// Pick the best node for a guild in `target_region`.
///
/// 1. Only connected nodes are considered.
/// 2. With a target region, nodes whose affinity entry accepts the
///    simplified region are preferred; if none do, all connected nodes are.
/// 3. The pool is stably sorted by `100 * load / cores` and the first node
///    wins, so ties go to the earliest node in `candidates`.
///
/// # Errors
///
/// [`ClientError::NoAvailableNode`] if no candidate is connected.
pub fn select<'a, N: Candidate>(
    candidates: &'a [N],
    target_region: Option<&str>,
    affinity: &RegionAffinity,
) -> Result<&'a N> {
    let connected: Vec<&N> = candidates.iter().filter(|n| n.is_connected()).collect();
    if connected.is_empty() {
        return Err(ClientError::NoAvailableNode);
    }

    let pool = match target_region {
        Some(region) => {
            let token = simplify_region(region);
            let regional: Vec<&N> = connected
                .iter()
                .copied()
                .filter(|n| affinity.accepts(n.region(), token))
                .collect();
            if regional.is_empty() {
                debug!("No node serves region {}, using all connected nodes", token);
                connected
            } else {
                regional
            }
        }
        None => connected,
    };

    // Snapshot scores once so concurrent stats updates cannot reorder mid-sort
    let mut scored: Vec<(f64, &N)> = pool.into_iter().map(|n| (n.load().score(), n)).collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0));

    scored
        .into_iter()
        .next()
        .map(|(_, node)| node)
        .ok_or(ClientError::NoAvailableNode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FakeNode {
        name: &'static str,
        connected: bool,
        region: &'static str,
        stats: LoadStats,
    }

    fn node(name: &'static str, region: &'static str, cores: u32, load: f64) -> FakeNode {
        FakeNode {
            name,
            connected: true,
            region,
            stats: LoadStats::new(cores, load),
        }
    }

    impl Candidate for FakeNode {
        fn is_connected(&self) -> bool {
            self.connected
        }

        fn region(&self) -> &str {
            self.region
        }

        fn load(&self) -> LoadStats {
            self.stats
        }
    }

    #[test]
    fn test_no_connected_nodes() {
        let mut a = node("a", "us", 4, 0.0);
        a.connected = false;
        let nodes = vec![a];
        let result = select(&nodes, None, &RegionAffinity::default());
        assert!(matches!(result, Err(ClientError::NoAvailableNode)));

        let empty: Vec<FakeNode> = Vec::new();
        assert!(select(&empty, Some("us-east"), &RegionAffinity::default()).is_err());
    }

    #[test]
    fn test_least_loaded_per_core_wins() {
        let nodes = vec![
            node("a", "us", 2, 1.0),  // 50
            node("b", "us", 8, 2.0),  // 25
            node("c", "us", 1, 0.5),  // 50
        ];
        let chosen = select(&nodes, None, &RegionAffinity::default()).unwrap();
        assert_eq!(chosen.name, "b");
    }

    #[test]
    fn test_ties_go_to_first_enumerated() {
        let nodes = vec![
            node("a", "us", 4, 2.0),
            node("b", "us", 2, 1.0),
            node("c", "us", 8, 4.0),
        ];
        let chosen = select(&nodes, None, &RegionAffinity::default()).unwrap();
        assert_eq!(chosen.name, "a");
    }

    #[test]
    fn test_disconnected_nodes_are_skipped() {
        let mut idle = node("idle", "us", 16, 0.0);
        idle.connected = false;
        let nodes = vec![idle, node("busy", "us", 1, 3.0)];
        let chosen = select(&nodes, None, &RegionAffinity::default()).unwrap();
        assert_eq!(chosen.name, "busy");
    }

    #[test]
    fn test_regional_subset_preferred_over_lighter_node() {
        let nodes = vec![
            node("eu-light", "eu", 8, 0.0),
            node("us-heavy", "us", 1, 0.9),
            node("us-heavier", "us", 1, 0.95),
        ];
        let chosen = select(&nodes, Some("vip-us-east"), &RegionAffinity::default()).unwrap();
        assert_eq!(chosen.name, "us-heavy");
    }

    #[test]
    fn test_falls_back_when_region_unserved() {
        let nodes = vec![node("eu", "eu", 2, 1.0), node("us", "us", 2, 0.5)];
        let chosen = select(&nodes, Some("mars-north"), &RegionAffinity::default()).unwrap();
        assert_eq!(chosen.name, "us");
    }

    #[test]
    fn test_region_matching_uses_affinity_table() {
        let affinity = RegionAffinity::empty().with("frankfurt-1", ["eu"]);
        let nodes = vec![node("us", "us", 8, 0.0), node("fra", "frankfurt-1", 1, 0.9)];
        let chosen = select(&nodes, Some("eu-central"), &affinity).unwrap();
        assert_eq!(chosen.name, "fra");
    }

    #[test]
    fn test_regional_pool_only_counts_connected_nodes() {
        let mut eu_down = node("eu-down", "eu", 8, 0.0);
        eu_down.connected = false;
        let nodes = vec![eu_down, node("us", "us", 1, 0.9)];
        let chosen = select(&nodes, Some("eu-west"), &RegionAffinity::default()).unwrap();
        assert_eq!(chosen.name, "us");
    }
}
