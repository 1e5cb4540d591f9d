//! Entity and relation extraction

use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::CollabContext;
use crate::error::{Error, Result};

/// Entity types requested when the caller gives none
pub const DEFAULT_ENTITY_TYPES: &[&str] = &["organization", "person", "geo", "event", "category"];

/// A piece of a source document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub doc_id: String,
    pub content: String,
}

impl Chunk {
    pub fn new(doc_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    #[serde(default)]
    pub entity_type: String,
    #[serde(default)]
    pub description: String,
    /// Documents the entity was seen in
    #[serde(default)]
    pub source_id: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRelation {
    #[serde(alias = "source")]
    pub from: String,
    #[serde(alias = "target")]
    pub to: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub source_id: BTreeSet<String>,
}

fn default_weight() -> f64 {
    1.0
}

/// Output of one extraction call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub relations: Vec<ExtractedRelation>,
}

/// Turns chunks of text into entities and relations
#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(
        &self,
        chunks: &[Chunk],
        language: &str,
        entity_types: &[String],
        ctx: &CollabContext,
    ) -> Result<Extraction>;
}

/// Replays a fixed extraction regardless of the chunk text
///
/// The entity types are a prompt hint for model-backed extractors; a
/// recorded extraction is returned with every entity it holds. Entities and
/// relations without source documents are attributed to every chunk's
/// document.
#[derive(Debug, Clone, Default)]
pub struct PrecomputedExtractor {
    extraction: Extraction,
}

impl PrecomputedExtractor {
    pub fn new(extraction: Extraction) -> Self {
        Self { extraction }
    }

    /// Load an extraction from a JSON file `{ "entities": [...], "relations": [...] }`
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let extraction: Extraction = serde_json::from_str(&raw)?;
        Ok(Self::new(extraction))
    }
}

#[async_trait]
impl Extractor for PrecomputedExtractor {
    fn name(&self) -> &str {
        "precomputed"
    }

    async fn extract(
        &self,
        chunks: &[Chunk],
        _language: &str,
        _entity_types: &[String],
        ctx: &CollabContext,
    ) -> Result<Extraction> {
        if chunks.is_empty() {
            return Err(Error::collaborator(self.name(), "no chunks to extract from"));
        }
        let docs: BTreeSet<String> = chunks.iter().map(|c| c.doc_id.clone()).collect();
        let mut extraction = self.extraction.clone();

        for entity in &mut extraction.entities {
            if entity.source_id.is_empty() {
                entity.source_id = docs.clone();
            }
        }
        for relation in &mut extraction.relations {
            if relation.source_id.is_empty() {
                relation.source_id = docs.clone();
            }
        }
        debug!(
            kb_id = %ctx.kb_id,
            entities = extraction.entities.len(),
            relations = extraction.relations.len(),
            "Replayed precomputed extraction"
        );
        Ok(extraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "entities": [
            {"name": "ALICE", "entity_type": "person", "description": "a founder"},
            {"name": "ACME", "entity_type": "organization"}
        ],
        "relations": [
            {"source": "ALICE", "target": "ACME", "weight": 2.0, "keywords": ["founded"]}
        ]
    }"#;

    #[tokio::test]
    async fn test_precomputed_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let extractor = PrecomputedExtractor::from_json_file(file.path()).unwrap();
        let ctx = CollabContext::new("t", "kb");
        let chunks = vec![Chunk::new("d1", "text"), Chunk::new("d2", "more")];
        let out = extractor.extract(&chunks, "English", &[], &ctx).await.unwrap();

        assert_eq!(out.entities.len(), 2);
        assert_eq!(out.relations[0].from, "ALICE");
        assert_eq!(out.relations[0].weight, 2.0);
        assert_eq!(out.entities[1].source_id.len(), 2);
    }

    #[tokio::test]
    async fn test_type_hints_keep_recorded_entities_and_empty_input_fails() {
        let extraction: Extraction = serde_json::from_str(SAMPLE).unwrap();
        let extractor = PrecomputedExtractor::new(extraction);
        let ctx = CollabContext::new("t", "kb");

        let out = extractor
            .extract(&[Chunk::new("d1", "x")], "English", &["Person".to_string()], &ctx)
            .await
            .unwrap();
        assert_eq!(out.entities.len(), 2);
        assert_eq!(out.entities[1].entity_type, "organization");

        let err = extractor.extract(&[], "English", &[], &ctx).await.unwrap_err();
        assert_eq!(err.code(), "E700");
    }

    #[test]
    fn test_relation_defaults() {
        let relation: ExtractedRelation =
            serde_json::from_str(r#"{"from": "A", "to": "B"}"#).unwrap();
        assert_eq!(relation.weight, 1.0);
        assert!(relation.keywords.is_empty());
    }
}
