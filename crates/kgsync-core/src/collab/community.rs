//! Community detection and reporting

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::CollabContext;
use crate::error::Result;
use crate::graph::KnowledgeGraph;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(default)]
    pub summary: String,
    pub explanation: String,
}

/// A detected community and the facts supporting its report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityStructure {
    pub title: String,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub weight: f64,
    /// Member entity names
    #[serde(default)]
    pub entities: Vec<String>,
}

impl CommunityStructure {
    /// Findings' explanations, one per line
    pub fn evidences(&self) -> String {
        self.findings
            .iter()
            .map(|f| f.explanation.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Structures and report texts, pairwise aligned
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommunityReport {
    pub structures: Vec<CommunityStructure>,
    pub reports: Vec<String>,
}

impl CommunityReport {
    pub fn len(&self) -> usize {
        self.structures.len().min(self.reports.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CommunityStructure, &str)> {
        self.structures
            .iter()
            .zip(self.reports.iter().map(String::as_str))
    }
}

/// Groups a graph's entities into communities and reports on each
///
/// The reporter may annotate the graph; the pipeline persists whatever it
/// leaves behind.
#[async_trait]
pub trait CommunityReporter: Send + Sync {
    fn name(&self) -> &str;

    async fn report(
        &self,
        graph: &mut KnowledgeGraph,
        ctx: &CollabContext,
    ) -> Result<CommunityReport>;
}

/// One community per connected component of two or more entities
///
/// Members get a `communities` attribute listing the titles they belong to.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComponentReporter;

impl ComponentReporter {
    fn components(graph: &KnowledgeGraph) -> Vec<Vec<String>> {
        let mut seen = BTreeSet::new();
        let mut components = Vec::new();
        for start in graph.node_names() {
            if seen.contains(start) {
                continue;
            }
            let mut members = Vec::new();
            let mut stack = vec![start];
            seen.insert(start);
            while let Some(node) = stack.pop() {
                members.push(node.to_string());
                for next in graph.neighbors(node) {
                    if seen.insert(next) {
                        stack.push(next);
                    }
                }
            }
            if members.len() > 1 {
                members.sort();
                components.push(members);
            }
        }
        components
    }

    fn describe(graph: &KnowledgeGraph, members: &[String]) -> (CommunityStructure, String) {
        let hub = members
            .iter()
            .max_by(|a, b| graph.degree(a).cmp(&graph.degree(b)).then_with(|| b.cmp(a)))
            .cloned()
            .unwrap_or_default();
        let title = format!("Community of {}", hub);

        let findings: Vec<Finding> = members
            .iter()
            .filter_map(|name| graph.node(name).map(|data| (name, data)))
            .map(|(name, data)| Finding {
                summary: name.clone(),
                explanation: if data.description.is_empty() {
                    format!("{} is a {} entity.", name, data.entity_type)
                } else {
                    format!("{}: {}", name, data.description.replace('\n', " "))
                },
            })
            .collect();

        let mut report = format!("# {}\n\nMembers: {}\n", title, members.join(", "));
        for finding in &findings {
            report.push_str(&format!("\n- {}", finding.explanation));
        }

        let structure = CommunityStructure {
            title,
            findings,
            weight: members.len() as f64,
            entities: members.to_vec(),
        };
        (structure, report)
    }
}

#[async_trait]
impl CommunityReporter for ComponentReporter {
    fn name(&self) -> &str {
        "component"
    }

    async fn report(
        &self,
        graph: &mut KnowledgeGraph,
        _ctx: &CollabContext,
    ) -> Result<CommunityReport> {
        let mut out = CommunityReport::default();
        for members in Self::components(graph) {
            let (structure, report) = Self::describe(graph, &members);
            for name in &members {
                if let Some(data) = graph.node_mut(name) {
                    data.extra
                        .insert("communities".to_string(), json!([structure.title.clone()]));
                }
            }
            out.structures.push(structure);
            out.reports.push(report);
        }
        Ok(out)
    }
}

/// Community titles recorded on a node, if any
pub fn node_communities(data: &crate::graph::NodeData) -> Vec<String> {
    match data.extra.get("communities") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}
