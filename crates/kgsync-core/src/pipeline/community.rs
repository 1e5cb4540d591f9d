//! Community detection and report indexing

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{error, info};

use super::progress::{ProgressCallback, ProgressEvent};
use super::{PipelineDeps, report_failure};
use crate::collab::{
    CollabContext, CommunityReport, CommunityReporter, CommunityStructure, IndexFilter,
    IndexRecord, RecordKind, Tokenizer, index_name,
};
use crate::error::Result;
use crate::graph::GraphStats;

#[derive(Debug, Clone, PartialEq)]
pub struct CommunityOutcome {
    pub reports: usize,
    pub stats: GraphStats,
}

/// Content-derived record id
fn record_id(content: &str, kb_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.update(kb_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Index record for one community report
pub fn report_record(
    kb_id: &str,
    structure: &CommunityStructure,
    report: &str,
    doc_ids: &BTreeSet<String>,
    tokenizer: &dyn Tokenizer,
) -> IndexRecord {
    let evidences = structure.evidences();
    let content = json!({ "report": report, "evidences": evidences }).to_string();
    let content_tokens = tokenizer.tokenize(&format!("{} {}", report, evidences));
    let content_fine_tokens = tokenizer.fine_grained_tokenize(&content_tokens);

    IndexRecord::new(record_id(&content, kb_id), kb_id, RecordKind::CommunityReport)
        .with_field("title", structure.title.clone())
        .with_field("title_tokens", tokenizer.tokenize(&structure.title))
        .with_field("content", content)
        .with_field("content_tokens", content_tokens)
        .with_field("content_fine_tokens", content_fine_tokens)
        .with_field("weight", structure.weight)
        .with_field("entities", structure.entities.clone())
        .with_field("important", structure.entities.clone())
        .with_field("source_ids", doc_ids.iter().cloned().collect::<Vec<_>>())
        .with_field("available", 0)
}

pub struct CommunityPipeline {
    deps: PipelineDeps,
    reporter: Arc<dyn CommunityReporter>,
}

impl CommunityPipeline {
    pub fn new(deps: PipelineDeps, reporter: Arc<dyn CommunityReporter>) -> Self {
        Self { deps, reporter }
    }

    /// Detect communities and replace the knowledge base's report records
    ///
    /// `Ok(None)` when there is no stored graph, reported on the progress
    /// callback.
    pub async fn run(
        &self,
        tenant_id: &str,
        kb_id: &str,
        progress: Option<ProgressCallback>,
    ) -> Result<Option<CommunityOutcome>> {
        let result = self.execute(tenant_id, kb_id, progress.clone()).await;
        if let Err(e) = &result {
            report_failure("community", kb_id, progress.as_ref(), e);
        }
        result
    }

    async fn execute(
        &self,
        tenant_id: &str,
        kb_id: &str,
        progress: Option<ProgressCallback>,
    ) -> Result<Option<CommunityOutcome>> {
        let ctx = self.deps.context(tenant_id, kb_id, progress);
        let lock = self.deps.locks.lock_for(kb_id);
        let ctx_ref = &ctx;
        let detected = lock
            .scoped(move || async move { self.detect_locked(ctx_ref).await })
            .await?;
        let Some((report, doc_ids, stats)) = detected else {
            return Ok(None);
        };

        let count = report.len();
        ctx.report(ProgressEvent::message(format!(
            "Graph community extraction is done. Indexing {} reports.",
            count
        )));

        let index = index_name(tenant_id);
        let stale = IndexFilter::new(kb_id).kind(RecordKind::CommunityReport);
        let deleted = self.deps.index.delete(&stale, &index).await?;

        let records: Vec<IndexRecord> = report
            .iter()
            .map(|(structure, text)| {
                report_record(kb_id, structure, text, &doc_ids, self.deps.tokenizer.as_ref())
            })
            .collect();
        self.deps.index.insert(records, &index).await?;
        info!(kb_id = %kb_id, index = %index, deleted, inserted = count, "Indexed community reports");

        Ok(Some(CommunityOutcome {
            reports: count,
            stats,
        }))
    }

    async fn detect_locked(
        &self,
        ctx: &CollabContext,
    ) -> Result<Option<(CommunityReport, BTreeSet<String>, GraphStats)>> {
        let (tenant_id, kb_id) = (ctx.tenant_id.as_str(), ctx.kb_id.as_str());
        let snapshot = self
            .deps
            .graphs
            .load(tenant_id, kb_id)
            .await?
            .filter(|s| !s.graph.is_empty());
        let Some(mut snapshot) = snapshot else {
            error!(kb_id = %kb_id, "Failed to fetch the graph");
            ctx.report(ProgressEvent::fetch_failed("Failed to fetch the graph."));
            return Ok(None);
        };
        ctx.report(ProgressEvent::message("Fetch the existing graph."));

        let report = self.reporter.report(&mut snapshot.graph, ctx).await?;
        info!(
            kb_id = %kb_id,
            reporter = self.reporter.name(),
            communities = report.len(),
            "Community detection finished"
        );

        self.deps
            .graphs
            .save(tenant_id, kb_id, &snapshot.graph, &snapshot.doc_ids)
            .await?;
        let stats = snapshot.graph.stats();
        Ok(Some((report, snapshot.doc_ids, stats)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{Finding, SimpleTokenizer};

    fn structure() -> CommunityStructure {
        CommunityStructure {
            title: "Community of Acme".into(),
            findings: vec![
                Finding {
                    summary: "a".into(),
                    explanation: "Alice founded Acme".into(),
                },
                Finding {
                    summary: "b".into(),
                    explanation: "Bob works at Acme".into(),
                },
            ],
            weight: 2.5,
            entities: vec!["ACME".into(), "ALICE".into()],
        }
    }

    #[test]
    fn test_report_record_layout() {
        let docs: BTreeSet<String> = ["d1".to_string(), "d2".to_string()].into();
        let record = report_record("kb", &structure(), "Report text", &docs, &SimpleTokenizer);

        assert_eq!(record.kind, RecordKind::CommunityReport);
        assert_eq!(record.kb_id, "kb");
        assert_eq!(record.id.len(), 64);
        assert_eq!(record.field("title").unwrap(), "Community of Acme");
        assert_eq!(record.field("title_tokens").unwrap(), "community of acme");
        assert_eq!(record.field("weight").unwrap(), 2.5);
        assert_eq!(record.field("available").unwrap(), 0);
        assert_eq!(record.field("source_ids").unwrap(), &json!(["d1", "d2"]));

        let content: serde_json::Value =
            serde_json::from_str(record.field("content").unwrap().as_str().unwrap()).unwrap();
        assert_eq!(content["report"], "Report text");
        assert_eq!(content["evidences"], "Alice founded Acme\nBob works at Acme");
        assert!(
            record
                .field("content_tokens")
                .unwrap()
                .as_str()
                .unwrap()
                .starts_with("report text alice")
        );
    }

    #[test]
    fn test_record_id_depends_on_content_and_kb() {
        let docs = BTreeSet::new();
        let a = report_record("kb", &structure(), "one", &docs, &SimpleTokenizer);
        let b = report_record("kb", &structure(), "one", &docs, &SimpleTokenizer);
        let c = report_record("kb", &structure(), "two", &docs, &SimpleTokenizer);
        let d = report_record("kb2", &structure(), "one", &docs, &SimpleTokenizer);
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_ne!(a.id, d.id);
    }
}
