//! Entity resolution

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::CollabContext;
use crate::error::Result;
use crate::graph::KnowledgeGraph;
use crate::graph::merge::{merge_edge, merge_node};

/// A resolved graph and the names that no longer exist in it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub graph: KnowledgeGraph,
    pub removed_entities: Vec<String>,
}

/// Detects and merges duplicate entities
#[async_trait]
pub trait EntityResolver: Send + Sync {
    fn name(&self) -> &str;

    async fn resolve(&self, graph: KnowledgeGraph, ctx: &CollabContext) -> Result<Resolution>;
}

/// Merges entities whose names differ only in case or surrounding whitespace
///
/// Within a group of duplicates the lexicographically smallest name is kept.
/// Edges of merged entities are moved onto the survivor; parallel edges are
/// merged and self-loops dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameResolver;

impl NameResolver {
    fn normalize(name: &str) -> String {
        name.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    fn fold_into(graph: &mut KnowledgeGraph, keep: &str, drop: &str) {
        let moved: Vec<(String, _)> = graph
            .neighbors(drop)
            .map(str::to_string)
            .collect::<Vec<_>>()
            .into_iter()
            .filter_map(|n| graph.edge(drop, &n).cloned().map(|e| (n, e)))
            .collect();

        let Some(data) = graph.remove_node(drop) else {
            return;
        };
        if let Some(survivor) = graph.node_mut(keep) {
            merge_node(survivor, data);
        }

        for (neighbour, edge) in moved {
            if neighbour == keep || neighbour == drop {
                continue;
            }
            match graph.edge_mut(keep, &neighbour) {
                Some(existing) => merge_edge(existing, edge),
                None => {
                    if let Err(e) = graph.add_edge(keep, &neighbour, edge) {
                        warn!(from = %keep, to = %neighbour, error = %e, "Dropped edge while resolving");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl EntityResolver for NameResolver {
    fn name(&self) -> &str {
        "name"
    }

    async fn resolve(&self, mut graph: KnowledgeGraph, ctx: &CollabContext) -> Result<Resolution> {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for name in graph.node_names() {
            groups
                .entry(Self::normalize(name))
                .or_default()
                .push(name.to_string());
        }

        let mut removed_entities = Vec::new();
        for names in groups.into_values().filter(|names| names.len() > 1) {
            // node_names() is ordered, so the first is the smallest
            let keep = &names[0];
            for drop in &names[1..] {
                Self::fold_into(&mut graph, keep, drop);
                removed_entities.push(drop.clone());
            }
        }

        debug!(kb_id = %ctx.kb_id, removed = removed_entities.len(), "Name resolution finished");
        Ok(Resolution {
            graph,
            removed_entities,
        })
    }
}
