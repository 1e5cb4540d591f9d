//! Task worker: pulls graph tasks off a stream and runs the pipelines
//!
//! A worker first resumes the oldest task it claimed earlier but never
//! acknowledged, then blocks for new ones. A task is acknowledged only
//! after its pipeline succeeds, so a crash mid-task leaves it pending for
//! the next start of the same consumer.

mod task;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use task::GraphTask;

use crate::collab::{CommunityReporter, EntityResolver, Extractor};
use crate::error::{Error, Result};
use crate::pipeline::{
    CommunityPipeline, GraphUpdatePipeline, PipelineDeps, ProgressCallback, ResolutionPipeline,
};
use crate::queue::{QueueMessage, ReliableQueue};

/// Default stream carrying graph tasks
pub const DEFAULT_STREAM: &str = "kgsync:tasks";
pub const DEFAULT_GROUP: &str = "kgsync_workers";

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub stream: String,
    pub group: String,
    pub consumer: String,
    /// How long one read waits for a new task
    pub block: Duration,
    /// Failures of one task before it is dropped
    pub max_attempts: u32,
    /// Pause after a failed task
    pub failure_backoff: Duration,
}

impl WorkerConfig {
    pub fn new(consumer: impl Into<String>) -> Self {
        Self {
            stream: DEFAULT_STREAM.to_string(),
            group: DEFAULT_GROUP.to_string(),
            consumer: consumer.into(),
            block: Duration::from_secs(10),
            max_attempts: 3,
            failure_backoff: Duration::from_secs(1),
        }
    }

    pub fn with_stream(mut self, stream: impl Into<String>, group: impl Into<String>) -> Self {
        self.stream = stream.into();
        self.group = group.into();
        self
    }

    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// What one `run_once` call did
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerStep {
    /// No runnable task arrived before the read timed out
    Idle,
    Completed { id: String, kind: &'static str },
    /// Left pending for another attempt
    Failed { id: String, code: &'static str },
    /// Acknowledged without running
    Discarded { id: String, reason: String },
}

pub struct TaskWorker {
    queue: ReliableQueue,
    config: WorkerConfig,
    update: GraphUpdatePipeline,
    resolution: ResolutionPipeline,
    community: CommunityPipeline,
    progress: Option<ProgressCallback>,
    attempts: Mutex<HashMap<String, u32>>,
}

impl TaskWorker {
    pub fn new(
        queue: ReliableQueue,
        config: WorkerConfig,
        deps: PipelineDeps,
        extractor: Arc<dyn Extractor>,
        resolver: Arc<dyn EntityResolver>,
        reporter: Arc<dyn CommunityReporter>,
    ) -> Self {
        Self {
            queue,
            config,
            update: GraphUpdatePipeline::new(deps.clone(), extractor),
            resolution: ResolutionPipeline::new(deps.clone(), resolver),
            community: CommunityPipeline::new(deps, reporter),
            progress: None,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Queue a task on this worker's stream
    pub async fn submit(&self, task: &GraphTask) -> bool {
        self.queue.produce(&self.config.stream, task).await
    }

    async fn next_message(&self) -> Option<QueueMessage> {
        let cfg = &self.config;
        if let Some(message) = self
            .queue
            .recover_unacked(&cfg.consumer, &cfg.stream, &cfg.group)
            .await
        {
            info!(id = %message.id(), consumer = %cfg.consumer, "Resuming unacknowledged task");
            return Some(message);
        }
        self.queue
            .consume(&cfg.stream, &cfg.group, &cfg.consumer, Some(cfg.block))
            .await
    }

    /// Handle at most one task
    pub async fn run_once(&self) -> WorkerStep {
        let Some(message) = self.next_message().await else {
            return WorkerStep::Idle;
        };
        let id = message.id().to_string();

        let task: GraphTask = match message.parse() {
            Ok(task) => task,
            Err(e) => {
                warn!(id = %id, error = %e, "Discarding malformed task");
                message.ack().await;
                return WorkerStep::Discarded {
                    id,
                    reason: e.to_string(),
                };
            }
        };

        debug!(id = %id, kind = task.kind(), kb_id = %task.kb_id(), "Running task");
        match self.dispatch(&task).await {
            Ok(()) => {
                if !message.ack().await {
                    warn!(id = %id, "Task finished but could not be acknowledged");
                }
                self.attempts.lock().await.remove(&id);
                info!(id = %id, kind = task.kind(), kb_id = %task.kb_id(), "Task completed");
                WorkerStep::Completed {
                    id,
                    kind: task.kind(),
                }
            }
            Err(e) => self.handle_failure(&message, &task, e).await,
        }
    }

    async fn handle_failure(&self, message: &QueueMessage, task: &GraphTask, err: Error) -> WorkerStep {
        let id = message.id().to_string();
        let attempts = {
            let mut attempts = self.attempts.lock().await;
            let count = attempts.entry(id.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if attempts >= self.config.max_attempts {
            error!(
                id = %id,
                kind = task.kind(),
                kb_id = %task.kb_id(),
                attempts,
                code = err.code(),
                error = %err,
                "Dropping task after repeated failures"
            );
            message.ack().await;
            self.attempts.lock().await.remove(&id);
            return WorkerStep::Discarded {
                id,
                reason: err.to_string(),
            };
        }

        warn!(
            id = %id,
            kind = task.kind(),
            kb_id = %task.kb_id(),
            attempt = attempts,
            code = err.code(),
            error = %err,
            "Task failed, left pending"
        );
        WorkerStep::Failed {
            id,
            code: err.code(),
        }
    }

    async fn dispatch(&self, task: &GraphTask) -> Result<()> {
        let progress = self.progress.clone();
        match task {
            GraphTask::Update { .. } => {
                let request = task
                    .update_request()
                    .ok_or_else(|| Error::Queue("update task without request".to_string()))?;
                self.update.run(request, progress).await?;
            }
            GraphTask::Resolve { tenant_id, kb_id } => {
                self.resolution.run(tenant_id, kb_id, progress).await?;
            }
            GraphTask::Community { tenant_id, kb_id } => {
                self.community.run(tenant_id, kb_id, progress).await?;
            }
        }
        Ok(())
    }

    /// Process tasks until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            stream = %self.config.stream,
            group = %self.config.group,
            consumer = %self.config.consumer,
            "Worker started"
        );
        loop {
            let step = tokio::select! {
                _ = cancel.cancelled() => break,
                step = self.run_once() => step,
            };
            if let WorkerStep::Failed { .. } = step {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.failure_backoff) => {}
                }
            }
        }
        info!(consumer = %self.config.consumer, "Worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{
        Chunk, CollabContext, ComponentReporter, Extraction, NameResolver, PrecomputedExtractor,
    };
    use crate::store::KvClient;
    use async_trait::async_trait;
    use serde_json::json;

    struct FailingExtractor;

    #[async_trait]
    impl Extractor for FailingExtractor {
        fn name(&self) -> &str {
            "failing"
        }

        async fn extract(
            &self,
            _chunks: &[Chunk],
            _language: &str,
            _entity_types: &[String],
            _ctx: &CollabContext,
        ) -> Result<Extraction> {
            Err(Error::collaborator("failing", "model unavailable"))
        }
    }

    fn extraction() -> Extraction {
        serde_json::from_value(json!({
            "entities": [
                {"name": "A", "entity_type": "person"},
                {"name": "B", "entity_type": "organization"}
            ],
            "relations": [{"from": "A", "to": "B", "weight": 1.0}]
        }))
        .unwrap()
    }

    fn worker(client: &KvClient, extractor: Arc<dyn Extractor>) -> TaskWorker {
        TaskWorker::new(
            ReliableQueue::with_defaults(client.clone()),
            WorkerConfig::new("w1").with_block(Duration::from_millis(10)),
            PipelineDeps::on_store(client.clone()),
            extractor,
            Arc::new(NameResolver),
            Arc::new(ComponentReporter),
        )
    }

    fn update_task() -> GraphTask {
        GraphTask::Update {
            tenant_id: "t".into(),
            kb_id: "kb".into(),
            chunks: vec![Chunk::new("d1", "A met B")],
            language: None,
            entity_types: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_runs_and_acks_task() {
        let client = KvClient::memory();
        let worker = worker(&client, Arc::new(PrecomputedExtractor::new(extraction())));
        assert_eq!(worker.run_once().await, WorkerStep::Idle);

        assert!(worker.submit(&update_task()).await);
        let step = worker.run_once().await;
        assert!(matches!(step, WorkerStep::Completed { kind: "update", .. }));

        let info = client.queue_info(DEFAULT_STREAM, DEFAULT_GROUP).await.unwrap().unwrap();
        assert_eq!(info.pending, 0);
    }

    #[tokio::test]
    async fn test_failed_task_is_retried_then_dropped() {
        let client = KvClient::memory();
        let worker = worker(&client, Arc::new(FailingExtractor));
        assert!(worker.submit(&update_task()).await);

        let first = worker.run_once().await;
        let WorkerStep::Failed { id, code } = first else {
            panic!("expected failure, got {first:?}");
        };
        assert_eq!(code, "E700");

        // Recovered from the pending list rather than read again
        let second = worker.run_once().await;
        assert_eq!(second, WorkerStep::Failed { id: id.clone(), code: "E700" });

        let third = worker.run_once().await;
        assert!(matches!(third, WorkerStep::Discarded { id: ref d, .. } if *d == id));
        assert_eq!(worker.run_once().await, WorkerStep::Idle);
    }

    #[tokio::test]
    async fn test_malformed_task_is_discarded() {
        let client = KvClient::memory();
        let worker = worker(&client, Arc::new(PrecomputedExtractor::new(extraction())));
        let queue = ReliableQueue::with_defaults(client.clone());
        assert!(queue.produce(DEFAULT_STREAM, &json!({"kind": "unknown"})).await);

        assert!(matches!(worker.run_once().await, WorkerStep::Discarded { .. }));
        let info = client.queue_info(DEFAULT_STREAM, DEFAULT_GROUP).await.unwrap().unwrap();
        assert_eq!(info.pending, 0);
    }

    #[tokio::test]
    async fn test_undecodable_entry_does_not_block_recovery() {
        let client = KvClient::memory();
        let worker = worker(&client, Arc::new(FailingExtractor));
        client
            .xadd(DEFAULT_STREAM, &[("other".to_string(), "x".to_string())])
            .await
            .unwrap();
        assert!(worker.submit(&update_task()).await);

        // The entry without a payload is acknowledged on read
        assert_eq!(worker.run_once().await, WorkerStep::Idle);

        let first = worker.run_once().await;
        let WorkerStep::Failed { id, .. } = first else {
            panic!("expected failure, got {first:?}");
        };
        let second = worker.run_once().await;
        assert_eq!(second, WorkerStep::Failed { id, code: "E700" });

        let info = client.queue_info(DEFAULT_STREAM, DEFAULT_GROUP).await.unwrap().unwrap();
        assert_eq!(info.pending, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let client = KvClient::memory();
        let worker = Arc::new(worker(&client, Arc::new(PrecomputedExtractor::new(extraction()))));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let worker = Arc::clone(&worker);
            let cancel = cancel.clone();
            async move { worker.run(cancel).await }
        });
        assert!(worker.submit(&update_task()).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        let snapshot = crate::graph::KvGraphStore::new(client.clone());
        let stored = crate::graph::GraphStore::load(&snapshot, "t", "kb").await.unwrap();
        assert_eq!(stored.unwrap().graph.edge_count(), 1);
    }
}
