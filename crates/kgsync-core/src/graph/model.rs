//! Undirected attributed knowledge graph
//!
//! Nodes are keyed by entity name. Edges are keyed by an unordered pair of
//! node names, so `(a, b)` and `(b, a)` address the same edge, and at most
//! one edge exists per pair. Both endpoints of an edge must be nodes.
//!
//! The graph serializes to the JSON node-link form:
//!
//! ```json
//! {"directed": false, "multigraph": false,
//!  "nodes": [{"id": "A", "entity_type": "person"}],
//!  "edges": [{"source": "A", "target": "B", "weight": 1.0}]}
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Result type for graph operations
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// Graph errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Edge endpoint '{0}' is not a node")]
    MissingEndpoint(String),

    #[error("Negative weight {weight} on edge ({from}, {to})")]
    NegativeWeight { from: String, to: String, weight: f64 },

    #[error("Duplicate node '{0}'")]
    DuplicateNode(String),
}

/// One neighbour path from a node, with the weight of each hop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HopPath {
    pub path: Vec<String>,
    pub weights: Vec<f64>,
}

/// Node attributes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    #[serde(default)]
    pub entity_type: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Documents the entity was extracted from
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub source_id: BTreeSet<String>,

    /// Centrality score, set by metric recomputation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<f64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub n_hop_with_weight: Vec<HopPath>,

    /// Any other attributes, kept as-is
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl NodeData {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_source(mut self, doc_id: impl Into<String>) -> Self {
        self.source_id.insert(doc_id.into());
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Edge attributes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeData {
    #[serde(default)]
    pub weight: f64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub keywords: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub source_id: BTreeSet<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl EdgeData {
    pub fn new(weight: f64) -> Self {
        Self {
            weight,
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keywords.insert(keyword.into());
        self
    }

    pub fn with_source(mut self, doc_id: impl Into<String>) -> Self {
        self.source_id.insert(doc_id.into());
        self
    }
}

/// Unordered pair of node names
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeKey(String, String);

impl EdgeKey {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        let (a, b) = (a.into(), b.into());
        if a <= b { Self(a, b) } else { Self(b, a) }
    }

    pub fn endpoints(&self) -> (&str, &str) {
        (&self.0, &self.1)
    }

    pub fn contains(&self, node: &str) -> bool {
        self.0 == node || self.1 == node
    }

    /// The endpoint that is not `node`
    pub fn other(&self, node: &str) -> &str {
        if self.0 == node { &self.1 } else { &self.0 }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.0, self.1)
    }
}

/// Size summary of a graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub node_types: BTreeMap<String, usize>,
}

impl fmt::Display for GraphStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} nodes, {} edges", self.nodes, self.edges)
    }
}

/// Knowledge graph for one knowledge base
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(into = "NodeLink", try_from = "NodeLink")]
pub struct KnowledgeGraph {
    nodes: BTreeMap<String, NodeData>,
    edges: BTreeMap<EdgeKey, EdgeData>,
    adjacency: BTreeMap<String, BTreeSet<String>>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// No nodes at all
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn node(&self, name: &str) -> Option<&NodeData> {
        self.nodes.get(name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut NodeData> {
        self.nodes.get_mut(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&str, &NodeData)> {
        self.nodes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = (&str, &mut NodeData)> {
        self.nodes.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Insert or overwrite a node; returns the previous attributes
    pub fn add_node(&mut self, name: impl Into<String>, data: NodeData) -> Option<NodeData> {
        let name = name.into();
        self.adjacency.entry(name.clone()).or_default();
        self.nodes.insert(name, data)
    }

    /// Remove a node and every edge touching it
    pub fn remove_node(&mut self, name: &str) -> Option<NodeData> {
        let data = self.nodes.remove(name)?;
        for neighbor in self.adjacency.remove(name).unwrap_or_default() {
            self.edges.remove(&EdgeKey::new(name, neighbor.as_str()));
            if let Some(adj) = self.adjacency.get_mut(&neighbor) {
                adj.remove(name);
            }
        }
        Some(data)
    }

    pub fn edge(&self, a: &str, b: &str) -> Option<&EdgeData> {
        self.edges.get(&EdgeKey::new(a, b))
    }

    pub fn edge_mut(&mut self, a: &str, b: &str) -> Option<&mut EdgeData> {
        self.edges.get_mut(&EdgeKey::new(a, b))
    }

    pub fn edges(&self) -> impl Iterator<Item = (&EdgeKey, &EdgeData)> {
        self.edges.iter()
    }

    /// Insert or overwrite the edge between two existing nodes
    pub fn add_edge(
        &mut self,
        a: &str,
        b: &str,
        data: EdgeData,
    ) -> GraphResult<Option<EdgeData>> {
        for endpoint in [a, b] {
            if !self.nodes.contains_key(endpoint) {
                return Err(GraphError::MissingEndpoint(endpoint.to_string()));
            }
        }
        if data.weight < 0.0 {
            return Err(GraphError::NegativeWeight {
                from: a.to_string(),
                to: b.to_string(),
                weight: data.weight,
            });
        }
        self.adjacency
            .entry(a.to_string())
            .or_default()
            .insert(b.to_string());
        self.adjacency
            .entry(b.to_string())
            .or_default()
            .insert(a.to_string());
        Ok(self.edges.insert(EdgeKey::new(a, b), data))
    }

    pub fn remove_edge(&mut self, a: &str, b: &str) -> Option<EdgeData> {
        let data = self.edges.remove(&EdgeKey::new(a, b))?;
        if let Some(adj) = self.adjacency.get_mut(a) {
            adj.remove(b);
        }
        if let Some(adj) = self.adjacency.get_mut(b) {
            adj.remove(a);
        }
        Some(data)
    }

    /// Adjacent node names, sorted
    pub fn neighbors<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + use<'a> {
        self.adjacency
            .get(name)
            .into_iter()
            .flat_map(|adj| adj.iter().map(String::as_str))
    }

    pub fn degree(&self, name: &str) -> usize {
        self.adjacency.get(name).map_or(0, BTreeSet::len)
    }

    /// Node count per entity type
    pub fn type_distribution(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for data in self.nodes.values() {
            *counts.entry(data.entity_type.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Take the graph apart into its node and edge maps
    pub fn into_parts(self) -> (BTreeMap<String, NodeData>, BTreeMap<EdgeKey, EdgeData>) {
        (self.nodes, self.edges)
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            nodes: self.node_count(),
            edges: self.edge_count(),
            node_types: self.type_distribution(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NodeLinkNode {
    id: String,
    #[serde(flatten)]
    data: NodeData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NodeLinkEdge {
    source: String,
    target: String,
    #[serde(flatten)]
    data: EdgeData,
}

/// Serialized form of [`KnowledgeGraph`]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NodeLink {
    #[serde(default)]
    directed: bool,
    #[serde(default)]
    multigraph: bool,
    #[serde(default)]
    nodes: Vec<NodeLinkNode>,
    #[serde(default, alias = "links")]
    edges: Vec<NodeLinkEdge>,
}

impl From<KnowledgeGraph> for NodeLink {
    fn from(graph: KnowledgeGraph) -> Self {
        Self {
            directed: false,
            multigraph: false,
            nodes: graph
                .nodes
                .into_iter()
                .map(|(id, data)| NodeLinkNode { id, data })
                .collect(),
            edges: graph
                .edges
                .into_iter()
                .map(|(EdgeKey(source, target), data)| NodeLinkEdge {
                    source,
                    target,
                    data,
                })
                .collect(),
        }
    }
}

impl TryFrom<NodeLink> for KnowledgeGraph {
    type Error = GraphError;

    fn try_from(doc: NodeLink) -> GraphResult<Self> {
        let mut graph = KnowledgeGraph::new();
        for node in doc.nodes {
            if graph.contains_node(&node.id) {
                return Err(GraphError::DuplicateNode(node.id));
            }
            graph.add_node(node.id, node.data);
        }
        for edge in doc.edges {
            graph.add_edge(&edge.source, &edge.target, edge.data)?;
        }
        Ok(graph)
    }
}
