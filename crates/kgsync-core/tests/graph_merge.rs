//! Graph merge and persistence properties

use std::collections::BTreeSet;

use kgsync_core::graph::{
    EdgeData, GraphStore, KnowledgeGraph, KvGraphStore, MemoryGraphStore, NodeData, merge,
};
use kgsync_core::store::KvClient;

fn graph(nodes: &[&str], edges: &[(&str, &str, f64)]) -> KnowledgeGraph {
    let mut g = KnowledgeGraph::new();
    for name in nodes {
        g.add_node(*name, NodeData::new("concept"));
    }
    for (a, b, w) in edges {
        g.add_edge(a, b, EdgeData::new(*w)).unwrap();
    }
    g
}

fn names(g: &KnowledgeGraph) -> BTreeSet<String> {
    g.node_names().map(str::to_string).collect()
}

fn ids(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn node_union_is_order_independent() {
    let a = graph(&["x", "y"], &[]);
    let b = graph(&["y", "z"], &[]);

    let ab = merge(a.clone(), b.clone());
    let ba = merge(b, a);

    assert_eq!(names(&ab), ids(&["x", "y", "z"]));
    assert_eq!(names(&ab), names(&ba));
}

#[test]
fn overlapping_edge_weights_add_up() {
    let a = graph(&["a", "b"], &[("a", "b", 2.0)]);
    let b = graph(&["a", "b"], &[("b", "a", 3.0)]);

    let merged = merge(a, b);
    assert_eq!(merged.edge_count(), 1);
    assert_eq!(merged.edge("a", "b").unwrap().weight, 5.0);
}

#[test]
fn merge_keeps_descriptions_and_sources() {
    let mut a = KnowledgeGraph::new();
    a.add_node("a", NodeData::new("person").with_description("first").with_source("d1"));
    let mut b = KnowledgeGraph::new();
    b.add_node("a", NodeData::new("person").with_description("second").with_source("d2"));

    let merged = merge(a, b);
    let node = merged.node("a").unwrap();
    assert_eq!(node.description, "first\nsecond");
    assert_eq!(node.source_id, ids(&["d1", "d2"]));
}

#[tokio::test]
async fn document_ids_accumulate_as_a_set() {
    let stores: Vec<Box<dyn GraphStore>> = vec![
        Box::new(MemoryGraphStore::new()),
        Box::new(KvGraphStore::new(KvClient::memory())),
    ];
    for store in stores {
        let g = graph(&["a"], &[]);
        store.save("t", "kb", &g, &ids(&["d1", "d2"])).await.unwrap();
        store.save("t", "kb", &g, &ids(&["d2", "d3"])).await.unwrap();

        let snapshot = store.load("t", "kb").await.unwrap().unwrap();
        assert_eq!(snapshot.doc_ids, ids(&["d1", "d2", "d3"]));
    }
}

#[test]
fn node_link_json_round_trips_attributes() {
    let mut g = graph(&["a", "b"], &[("a", "b", 1.5)]);
    g.node_mut("a").unwrap().rank = Some(0.5);

    let json = serde_json::to_value(&g).unwrap();
    assert_eq!(json["nodes"].as_array().unwrap().len(), 2);
    assert_eq!(json["edges"][0]["weight"], 1.5);

    let back: KnowledgeGraph = serde_json::from_value(json).unwrap();
    assert_eq!(back, g);
}
