//! Merging a fresh extraction batch into a persisted graph
//!
//! Nodes and edges are unioned. On a node collision the incoming batch
//! wins for identity fields (`entity_type`, extra attributes with the same
//! key) while the result keeps every attribute key either side had. On an
//! edge collision weights are summed. Descriptions are concatenated without
//! repeating segments and source document sets are unioned.

use tracing::warn;

use super::model::{EdgeData, KnowledgeGraph, NodeData};

/// Join newline-separated description segments, dropping repeats
pub fn join_descriptions(existing: &str, incoming: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in existing.split('\n').chain(incoming.split('\n')) {
        let segment = segment.trim();
        if !segment.is_empty() && !segments.contains(&segment) {
            segments.push(segment);
        }
    }
    segments.join("\n")
}

pub(crate) fn merge_node(existing: &mut NodeData, incoming: NodeData) {
    if !incoming.entity_type.is_empty() {
        existing.entity_type = incoming.entity_type;
    }
    existing.description = join_descriptions(&existing.description, &incoming.description);
    existing.source_id.extend(incoming.source_id);
    if incoming.rank.is_some() {
        existing.rank = incoming.rank;
    }
    if !incoming.n_hop_with_weight.is_empty() {
        existing.n_hop_with_weight = incoming.n_hop_with_weight;
    }
    existing.extra.extend(incoming.extra);
}

pub(crate) fn merge_edge(existing: &mut EdgeData, incoming: EdgeData) {
    existing.weight += incoming.weight;
    existing.description = join_descriptions(&existing.description, &incoming.description);
    existing.keywords.extend(incoming.keywords);
    existing.source_id.extend(incoming.source_id);
    existing.extra.extend(incoming.extra);
}

/// Merge `incoming` (the newer batch) into `base`
pub fn merge(mut base: KnowledgeGraph, incoming: KnowledgeGraph) -> KnowledgeGraph {
    let (nodes, edges) = incoming.into_parts();

    for (name, data) in nodes {
        match base.node_mut(&name) {
            Some(existing) => merge_node(existing, data),
            None => {
                base.add_node(name, data);
            }
        }
    }

    for (key, data) in edges {
        let (a, b) = key.endpoints();
        match base.edge_mut(a, b) {
            Some(existing) => merge_edge(existing, data),
            None => {
                // Endpoints were unioned in above
                if let Err(e) = base.add_edge(a, b, data) {
                    warn!(edge = %key, error = %e, "Dropped edge during merge");
                }
            }
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn graph(nodes: &[(&str, &str)], edges: &[(&str, &str, f64)]) -> KnowledgeGraph {
        let mut g = KnowledgeGraph::new();
        for (name, kind) in nodes {
            g.add_node(*name, NodeData::new(*kind));
        }
        for (a, b, w) in edges {
            g.add_edge(a, b, EdgeData::new(*w)).unwrap();
        }
        g
    }

    fn names(g: &KnowledgeGraph) -> BTreeSet<String> {
        g.node_names().map(str::to_string).collect()
    }

    #[test]
    fn test_join_descriptions() {
        assert_eq!(join_descriptions("", "b"), "b");
        assert_eq!(join_descriptions("a\nb", "b\nc"), "a\nb\nc");
        assert_eq!(join_descriptions("a", ""), "a");
    }

    #[test]
    fn test_incoming_identity_wins_and_keys_are_kept() {
        let mut base = KnowledgeGraph::new();
        base.add_node(
            "A",
            NodeData::new("person")
                .with_description("a founder")
                .with_source("d1")
                .with_attr("alias", json!("al"))
                .with_attr("color", json!("red")),
        );
        let mut incoming = KnowledgeGraph::new();
        incoming.add_node(
            "A",
            NodeData::new("executive")
                .with_description("a ceo")
                .with_source("d2")
                .with_attr("color", json!("blue")),
        );

        let merged = merge(base, incoming);
        let a = merged.node("A").unwrap();
        assert_eq!(a.entity_type, "executive");
        assert_eq!(a.description, "a founder\na ceo");
        assert_eq!(a.source_id.len(), 2);
        assert_eq!(a.extra["alias"], json!("al"));
        assert_eq!(a.extra["color"], json!("blue"));
    }

    #[test]
    fn test_empty_type_does_not_erase_known_type() {
        let base = graph(&[("A", "person")], &[]);
        let incoming = graph(&[("A", "")], &[]);
        assert_eq!(merge(base, incoming).node("A").unwrap().entity_type, "person");
    }

    #[test]
    fn test_disjoint_edges_are_unioned() {
        let base = graph(&[("A", "x"), ("B", "x")], &[("A", "B", 1.0)]);
        let incoming = graph(&[("B", "x"), ("C", "x")], &[("B", "C", 4.0)]);
        let merged = merge(base, incoming);
        assert_eq!(merged.edge_count(), 2);
        assert_eq!(merged.edge("C", "B").unwrap().weight, 4.0);
        assert_eq!(names(&merged).len(), 3);
    }
}
