//! Queue message format for graph tasks

use serde::{Deserialize, Serialize};

use crate::collab::Chunk;
use crate::pipeline::UpdateRequest;

/// A unit of graph work, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphTask {
    Update {
        tenant_id: String,
        kb_id: String,
        chunks: Vec<Chunk>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        entity_types: Vec<String>,
    },
    Resolve {
        tenant_id: String,
        kb_id: String,
    },
    Community {
        tenant_id: String,
        kb_id: String,
    },
}

impl GraphTask {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Update { .. } => "update",
            Self::Resolve { .. } => "resolve",
            Self::Community { .. } => "community",
        }
    }

    pub fn kb_id(&self) -> &str {
        match self {
            Self::Update { kb_id, .. } | Self::Resolve { kb_id, .. } | Self::Community { kb_id, .. } => {
                kb_id
            }
        }
    }

    pub fn tenant_id(&self) -> &str {
        match self {
            Self::Update { tenant_id, .. }
            | Self::Resolve { tenant_id, .. }
            | Self::Community { tenant_id, .. } => tenant_id,
        }
    }

    /// The update request for an `Update` task
    pub fn update_request(&self) -> Option<UpdateRequest> {
        let Self::Update {
            tenant_id,
            kb_id,
            chunks,
            language,
            entity_types,
        } = self
        else {
            return None;
        };
        let mut request = UpdateRequest::new(tenant_id.clone(), kb_id.clone(), chunks.clone());
        if let Some(language) = language {
            request = request.with_language(language.clone());
        }
        if !entity_types.is_empty() {
            request = request.with_entity_types(entity_types.clone());
        }
        Some(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_json_shape() {
        let task: GraphTask = serde_json::from_value(json!({
            "kind": "update",
            "tenant_id": "t1",
            "kb_id": "kb1",
            "chunks": [{"doc_id": "d1", "content": "Alice founded Acme."}]
        }))
        .unwrap();
        assert_eq!(task.kind(), "update");
        assert_eq!(task.kb_id(), "kb1");

        let request = task.update_request().unwrap();
        assert_eq!(request.language, "English");
        assert_eq!(request.chunks.len(), 1);

        let resolve = GraphTask::Resolve {
            tenant_id: "t1".into(),
            kb_id: "kb1".into(),
        };
        assert_eq!(
            serde_json::to_value(&resolve).unwrap(),
            json!({"kind": "resolve", "tenant_id": "t1", "kb_id": "kb1"})
        );
        assert!(resolve.update_request().is_none());
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let result: Result<GraphTask, _> =
            serde_json::from_value(json!({"kind": "reindex", "tenant_id": "t", "kb_id": "k"}));
        assert!(result.is_err());
    }
}
