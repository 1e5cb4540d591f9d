//! Derived per-node metrics: weighted PageRank and n-hop neighbour paths

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::model::{HopPath, KnowledgeGraph};

/// Parameters for metric recomputation
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    /// Longest neighbour path recorded per node, in edges
    pub n_hops: usize,
    pub damping: f64,
    pub max_iterations: usize,
    /// Per-node convergence tolerance
    pub tolerance: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            n_hops: 2,
            damping: 0.85,
            max_iterations: 100,
            tolerance: 1e-6,
        }
    }
}

/// Weighted PageRank over the undirected graph
///
/// Each undirected edge counts in both directions with its weight. Rank
/// held by nodes without positive outgoing weight is spread uniformly.
/// Iteration stops when the L1 change drops below `n * tolerance`; if that
/// never happens the last iterate is returned with a warning.
pub fn pagerank(graph: &KnowledgeGraph, config: &MetricsConfig) -> BTreeMap<String, f64> {
    let names: Vec<&str> = graph.node_names().collect();
    let n = names.len();
    if n == 0 {
        return BTreeMap::new();
    }
    let index: BTreeMap<&str, usize> = names.iter().enumerate().map(|(i, s)| (*s, i)).collect();

    // Weighted adjacency lists and total outgoing weight per node
    let mut links: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    for (key, data) in graph.edges() {
        let (a, b) = key.endpoints();
        let (ia, ib) = (index[a], index[b]);
        links[ia].push((ib, data.weight));
        if ia != ib {
            links[ib].push((ia, data.weight));
        }
    }
    let out_weight: Vec<f64> = links
        .iter()
        .map(|l| l.iter().map(|(_, w)| w).sum())
        .collect();

    let uniform = 1.0 / n as f64;
    let alpha = config.damping;
    let mut rank = vec![uniform; n];

    let mut converged = false;
    for iteration in 0..config.max_iterations {
        let previous = rank.clone();
        let dangling: f64 = (0..n)
            .filter(|&i| out_weight[i] <= 0.0)
            .map(|i| previous[i])
            .sum();
        let base = (alpha * dangling + (1.0 - alpha)) * uniform;
        rank.iter_mut().for_each(|r| *r = base);

        for (i, neighbours) in links.iter().enumerate() {
            if out_weight[i] <= 0.0 {
                continue;
            }
            let share = alpha * previous[i] / out_weight[i];
            for &(j, w) in neighbours {
                rank[j] += share * w;
            }
        }

        let err: f64 = rank
            .iter()
            .zip(&previous)
            .map(|(a, b)| (a - b).abs())
            .sum();
        if err < n as f64 * config.tolerance {
            debug!(iterations = iteration + 1, nodes = n, "PageRank converged");
            converged = true;
            break;
        }
    }
    if !converged {
        warn!(
            iterations = config.max_iterations,
            nodes = n,
            "PageRank did not converge, keeping last iterate"
        );
    }

    names
        .into_iter()
        .map(str::to_string)
        .zip(rank)
        .collect()
}

/// Simple paths of up to `n_hops` edges starting at `start`
///
/// A path stops early when every neighbour of its last node is already on
/// it. Weights list the weight of each hop in order.
pub fn n_hop_paths(graph: &KnowledgeGraph, start: &str, n_hops: usize) -> Vec<HopPath> {
    if n_hops == 0 || !graph.contains_node(start) {
        return Vec::new();
    }

    let mut finished = Vec::new();
    let mut frontier: Vec<Vec<&str>> = vec![vec![start]];

    for _ in 0..n_hops {
        let mut next = Vec::new();
        for path in frontier {
            let last = path[path.len() - 1];
            let mut extended = false;
            for neighbour in graph.neighbors(last) {
                if path.contains(&neighbour) {
                    continue;
                }
                let mut longer = path.clone();
                longer.push(neighbour);
                next.push(longer);
                extended = true;
            }
            if !extended && path.len() > 1 {
                finished.push(path);
            }
        }
        frontier = next;
    }
    finished.extend(frontier);

    finished
        .into_iter()
        .map(|path| {
            let weights = path
                .windows(2)
                .map(|w| graph.edge(w[0], w[1]).map_or(0.0, |e| e.weight))
                .collect();
            HopPath {
                path: path.into_iter().map(str::to_string).collect(),
                weights,
            }
        })
        .collect()
}

/// Recompute rank and neighbour paths for every node in place
pub fn recompute(graph: &mut KnowledgeGraph, config: &MetricsConfig) {
    let ranks = pagerank(graph, config);
    let paths: BTreeMap<String, Vec<HopPath>> = graph
        .node_names()
        .map(|name| (name.to_string(), n_hop_paths(graph, name, config.n_hops)))
        .collect();

    for (name, data) in graph.nodes_mut() {
        data.rank = ranks.get(name).copied();
        data.n_hop_with_weight = paths.get(name).cloned().unwrap_or_default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::model::{EdgeData, NodeData};

    fn line(weights: &[f64]) -> KnowledgeGraph {
        let mut g = KnowledgeGraph::new();
        for i in 0..=weights.len() {
            g.add_node(format!("n{i}"), NodeData::new("x"));
        }
        for (i, w) in weights.iter().enumerate() {
            g.add_edge(&format!("n{i}"), &format!("n{}", i + 1), EdgeData::new(*w))
                .unwrap();
        }
        g
    }

    #[test]
    fn test_pagerank_sums_to_one() {
        let g = line(&[1.0, 1.0, 1.0]);
        let ranks = pagerank(&g, &MetricsConfig::default());
        let total: f64 = ranks.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        // Inner nodes of a path outrank the ends
        assert!(ranks["n1"] > ranks["n0"]);
        assert!((ranks["n0"] - ranks["n3"]).abs() < 1e-9);
    }

    #[test]
    fn test_pagerank_follows_weight() {
        let mut g = KnowledgeGraph::new();
        for name in ["hub", "heavy", "light"] {
            g.add_node(name, NodeData::new("x"));
        }
        g.add_edge("hub", "heavy", EdgeData::new(9.0)).unwrap();
        g.add_edge("hub", "light", EdgeData::new(1.0)).unwrap();

        let ranks = pagerank(&g, &MetricsConfig::default());
        assert!(ranks["heavy"] > ranks["light"]);
    }

    #[test]
    fn test_isolated_nodes_share_rank() {
        let mut g = KnowledgeGraph::new();
        g.add_node("a", NodeData::default());
        g.add_node("b", NodeData::default());
        let ranks = pagerank(&g, &MetricsConfig::default());
        assert!((ranks["a"] - 0.5).abs() < 1e-9);
        assert!(pagerank(&KnowledgeGraph::new(), &MetricsConfig::default()).is_empty());
    }

    #[test]
    fn test_n_hop_paths() {
        let g = line(&[1.0, 2.0, 3.0]);

        let from_end = n_hop_paths(&g, "n0", 2);
        assert_eq!(from_end.len(), 1);
        assert_eq!(from_end[0].path, vec!["n0", "n1", "n2"]);
        assert_eq!(from_end[0].weights, vec![1.0, 2.0]);

        let from_inner = n_hop_paths(&g, "n1", 2);
        let paths: Vec<Vec<String>> = from_inner.into_iter().map(|p| p.path).collect();
        assert!(paths.contains(&vec!["n1".into(), "n0".into()]));
        assert!(paths.contains(&vec!["n1".into(), "n2".into(), "n3".into()]));
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn test_n_hop_paths_avoid_cycles() {
        let mut g = line(&[1.0, 1.0]);
        g.add_edge("n2", "n0", EdgeData::new(1.0)).unwrap();

        for hop in n_hop_paths(&g, "n0", 3) {
            let mut seen = hop.path.clone();
            seen.sort();
            seen.dedup();
            assert_eq!(seen.len(), hop.path.len());
        }
        assert!(n_hop_paths(&g, "missing", 2).is_empty());
        assert!(n_hop_paths(&g, "n0", 0).is_empty());
    }

    #[test]
    fn test_recompute_annotates_nodes() {
        let mut g = line(&[1.0]);
        recompute(&mut g, &MetricsConfig::default());
        let n0 = g.node("n0").unwrap();
        assert!(n0.rank.is_some());
        assert_eq!(n0.n_hop_with_weight.len(), 1);
        assert_eq!(n0.n_hop_with_weight[0].path, vec!["n0", "n1"]);
    }
}
