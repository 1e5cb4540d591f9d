//! Kgsync CLI - knowledge-graph maintenance over a shared key-value store

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use kgsync_core::collab::{
    Chunk, ComponentReporter, MemoryIndex, NameResolver, PrecomputedExtractor,
};
use kgsync_core::config::{Config, StoreBackendKind};
use kgsync_core::graph::{GraphStore, KvGraphStore};
use kgsync_core::lock::LockManager;
use kgsync_core::pipeline::{
    CommunityPipeline, GraphUpdatePipeline, PipelineDeps, ProgressCallback, ProgressEvent,
    ResolutionPipeline, UpdateRequest,
};
use kgsync_core::queue::ReliableQueue;
use kgsync_core::store::KvClient;
use kgsync_core::worker::{DEFAULT_GROUP, DEFAULT_STREAM, GraphTask, TaskWorker, WorkerConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "kgsync")]
#[command(author, version, about = "Knowledge-graph maintenance over a shared key-value store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the store connection
    Health,

    /// Inspect or clear knowledge-base locks
    Lock {
        #[command(subcommand)]
        action: LockAction,
    },

    /// Produce to and inspect stream queues
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Merge documents into a knowledge base's graph
    Ingest {
        /// Tenant id
        #[arg(short, long)]
        tenant: String,
        /// Knowledge base id
        #[arg(short, long)]
        kb: String,
        /// Extraction JSON to replay ({"entities": [...], "relations": [...]})
        #[arg(short, long)]
        extraction: PathBuf,
        /// Document files; the file name is the document id
        #[arg(required = true)]
        docs: Vec<PathBuf>,
        /// Queue the task for a worker instead of running it here
        #[arg(long)]
        enqueue: bool,
        /// Stream the task is queued on with --enqueue
        #[arg(long, default_value = DEFAULT_STREAM)]
        stream: String,
    },

    /// Merge duplicate entities in a stored graph
    Resolve {
        #[arg(short, long)]
        tenant: String,
        #[arg(short, long)]
        kb: String,
    },

    /// Detect communities and index their reports
    Community {
        #[arg(short, long)]
        tenant: String,
        #[arg(short, long)]
        kb: String,
    },

    /// Show stored graphs
    Graph {
        #[command(subcommand)]
        action: GraphAction,
    },

    /// Run a task worker until interrupted
    Worker {
        /// Consumer name, stable across restarts to resume unacked tasks
        #[arg(short, long)]
        consumer: String,
        /// Extraction JSON replayed for update tasks
        #[arg(short, long)]
        extraction: PathBuf,
        #[arg(long, default_value = DEFAULT_STREAM)]
        stream: String,
        #[arg(long, default_value = DEFAULT_GROUP)]
        group: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum LockAction {
    /// Show who holds a knowledge base's lock
    Status { kb_id: String },
    /// Delete a lock left behind by a crashed holder
    Clean { kb_id: String },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Append a JSON message to a stream
    Push { stream: String, message: String },
    /// Show a consumer group's state
    Info {
        #[arg(default_value = DEFAULT_STREAM)]
        stream: String,
        #[arg(default_value = DEFAULT_GROUP)]
        group: String,
    },
    /// Show the oldest unacknowledged message of a consumer
    Recover {
        consumer: String,
        #[arg(long, default_value = DEFAULT_STREAM)]
        stream: String,
        #[arg(long, default_value = DEFAULT_GROUP)]
        group: String,
    },
}

#[derive(Subcommand)]
enum GraphAction {
    /// Print a stored graph's statistics (or node-link JSON with --format json)
    Show {
        #[arg(short, long)]
        tenant: String,
        #[arg(short, long)]
        kb: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration
    List,
    /// Show configuration file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kgsync=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { action } => cmd_config(action, cli.quiet),
        command => {
            let config = Config::load()?;
            let client = KvClient::connect(&config.store).await?;
            info!(backend = client.backend_name(), store = %config.store.redacted_url(), "Connected to store");
            run(command, &config, client, cli.format, cli.quiet).await
        }
    }
}

async fn run(
    command: Commands,
    config: &Config,
    client: KvClient,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    match command {
        Commands::Health => cmd_health(&client, quiet).await,
        Commands::Lock { action } => cmd_lock(config, client, action, quiet).await,
        Commands::Queue { action } => cmd_queue(config, client, action, format).await,
        Commands::Ingest {
            tenant,
            kb,
            extraction,
            docs,
            enqueue,
            stream,
        } => {
            let target = enqueue.then_some(stream.as_str());
            cmd_ingest(config, client, &tenant, &kb, &extraction, &docs, target, quiet).await
        }
        Commands::Resolve { tenant, kb } => {
            let pipeline = ResolutionPipeline::new(deps(config, &client), Arc::new(NameResolver));
            match pipeline.run(&tenant, &kb, progress(quiet)).await? {
                Some(outcome) if !quiet => println!(
                    "Removed {} entities; graph now {}; {} index records dropped.",
                    outcome.removed_entities.len(),
                    outcome.stats,
                    outcome.index_records_deleted
                ),
                Some(_) => {}
                None => anyhow::bail!("No graph stored for {}/{}", tenant, kb),
            }
            Ok(())
        }
        Commands::Community { tenant, kb } => {
            let pipeline = CommunityPipeline::new(deps(config, &client), Arc::new(ComponentReporter));
            match pipeline.run(&tenant, &kb, progress(quiet)).await? {
                Some(outcome) if !quiet => {
                    println!("Indexed {} community reports over {}.", outcome.reports, outcome.stats)
                }
                Some(_) => {}
                None => anyhow::bail!("No graph stored for {}/{}", tenant, kb),
            }
            Ok(())
        }
        Commands::Graph { action } => cmd_graph(client, action, format).await,
        Commands::Worker {
            consumer,
            extraction,
            stream,
            group,
        } => cmd_worker(config, client, consumer, &extraction, stream, group, quiet).await,
        Commands::Config { action } => cmd_config(action, quiet),
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn deps(config: &Config, client: &KvClient) -> PipelineDeps {
    PipelineDeps::new(
        LockManager::new(client.clone(), config.lock.lock_config()),
        Arc::new(KvGraphStore::new(client.clone())),
        Arc::new(MemoryIndex::new()),
    )
    .with_metrics(config.graph.metrics_config())
}

/// Refuse commands whose effect must outlive this process on the memory backend
fn require_shared_store(config: &Config, what: &str) -> anyhow::Result<()> {
    if config.store.backend == StoreBackendKind::Memory {
        anyhow::bail!(
            "{} needs a shared store, but store.backend = memory only lives as long as this process \
             (run `kgsync config set store.backend redis`)",
            what
        );
    }
    Ok(())
}

fn progress(quiet: bool) -> Option<ProgressCallback> {
    if quiet {
        return None;
    }
    Some(Arc::new(|event: ProgressEvent| println!("  {}", event)))
}

fn read_chunks(docs: &[PathBuf]) -> anyhow::Result<Vec<Chunk>> {
    docs.iter()
        .map(|path| {
            let content = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("Cannot read {}: {}", path.display(), e))?;
            let doc_id = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            Ok(Chunk::new(doc_id, content))
        })
        .collect()
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_health(client: &KvClient, quiet: bool) -> anyhow::Result<()> {
    let healthy = client.health().await;
    if !quiet {
        println!(
            "Store ({}): {}",
            client.backend_name(),
            if healthy { "healthy" } else { "UNHEALTHY" }
        );
    }
    if !healthy {
        anyhow::bail!("Store health check failed");
    }
    Ok(())
}

async fn cmd_lock(config: &Config, client: KvClient, action: LockAction, quiet: bool) -> anyhow::Result<()> {
    let manager = LockManager::new(client, config.lock.lock_config());
    match action {
        LockAction::Status { kb_id } => {
            let status = manager.status(&kb_id).await?;
            println!("{}", status);
        }
        LockAction::Clean { kb_id } => {
            let removed = manager.clean(&kb_id).await?;
            if !quiet {
                if removed {
                    println!("Lock '{}' removed.", kb_id);
                } else {
                    println!("Lock '{}' was not held.", kb_id);
                }
            }
        }
    }
    Ok(())
}

async fn cmd_queue(
    config: &Config,
    client: KvClient,
    action: QueueAction,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let queue = ReliableQueue::new(client, config.queue.queue_config());
    match action {
        QueueAction::Push { stream, message } => {
            require_shared_store(config, "Pushing to a queue")?;
            let payload: serde_json::Value = serde_json::from_str(&message)?;
            if !queue.produce(&stream, &payload).await {
                anyhow::bail!("Message could not be written to '{}'", stream);
            }
            println!("Queued on '{}'.", stream);
        }
        QueueAction::Info { stream, group } => match queue.info(&stream, &group).await? {
            Some(info) if format == OutputFormat::Json => println!(
                "{}",
                serde_json::json!({
                    "name": info.name,
                    "consumers": info.consumers,
                    "pending": info.pending,
                    "last_delivered_id": info.last_delivered_id.to_string(),
                })
            ),
            Some(info) => {
                println!("Group '{}' on '{}':", info.name, stream);
                println!("  Consumers: {}", info.consumers);
                println!("  Pending: {}", info.pending);
                println!("  Last delivered: {}", info.last_delivered_id);
            }
            None => println!("No group '{}' on '{}'.", group, stream),
        },
        QueueAction::Recover {
            consumer,
            stream,
            group,
        } => match queue.recover_unacked(&consumer, &stream, &group).await {
            Some(message) => {
                println!("{} {}", message.id(), message.payload());
            }
            None => println!("No unacknowledged messages for '{}'.", consumer),
        },
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_ingest(
    config: &Config,
    client: KvClient,
    tenant: &str,
    kb: &str,
    extraction: &Path,
    docs: &[PathBuf],
    enqueue_on: Option<&str>,
    quiet: bool,
) -> anyhow::Result<()> {
    let chunks = read_chunks(docs)?;

    if let Some(stream) = enqueue_on {
        require_shared_store(config, "Queueing a task")?;
        let queue = ReliableQueue::new(client, config.queue.queue_config());
        let task = GraphTask::Update {
            tenant_id: tenant.to_string(),
            kb_id: kb.to_string(),
            chunks,
            language: None,
            entity_types: Vec::new(),
        };
        if !queue.produce(stream, &task).await {
            anyhow::bail!("Task could not be queued on '{}'", stream);
        }
        if !quiet {
            println!("Queued update of {}/{} on '{}'.", tenant, kb, stream);
        }
        return Ok(());
    }

    let extractor = PrecomputedExtractor::from_json_file(extraction)?;
    let pipeline = GraphUpdatePipeline::new(deps(config, &client), Arc::new(extractor));
    let outcome = pipeline
        .run(UpdateRequest::new(tenant, kb, chunks), progress(quiet))
        .await?;
    if !quiet {
        println!(
            "Graph {}/{}: {} ({} documents, {} in {}ms)",
            tenant,
            kb,
            outcome.stats,
            outcome.documents,
            if outcome.merged { "merged" } else { "created" },
            outcome.elapsed.as_millis()
        );
    }
    Ok(())
}

async fn cmd_graph(client: KvClient, action: GraphAction, format: OutputFormat) -> anyhow::Result<()> {
    let store = KvGraphStore::new(client);
    match action {
        GraphAction::Show { tenant, kb } => {
            let Some(snapshot) = store.load(&tenant, &kb).await? else {
                anyhow::bail!("No graph stored for {}/{}", tenant, kb);
            };
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshot.graph)?),
                OutputFormat::Text => {
                    let stats = snapshot.graph.stats();
                    println!("Graph {}/{}: {}", tenant, kb, stats);
                    println!("  Documents: {}", snapshot.doc_ids.len());
                    for (kind, count) in &stats.node_types {
                        let kind = if kind.is_empty() { "(untyped)" } else { kind.as_str() };
                        println!("  {}: {}", kind, count);
                    }
                }
            }
        }
    }
    Ok(())
}

async fn cmd_worker(
    config: &Config,
    client: KvClient,
    consumer: String,
    extraction: &Path,
    stream: String,
    group: String,
    quiet: bool,
) -> anyhow::Result<()> {
    let extractor = PrecomputedExtractor::from_json_file(extraction)?;
    if config.store.backend == StoreBackendKind::Memory {
        warn!("Worker is using the memory backend; only tasks queued by this process are seen");
    }
    let queue_config = config.queue.queue_config();
    let worker_config = WorkerConfig::new(consumer)
        .with_stream(stream, group)
        .with_block(queue_config.block);

    let mut worker = TaskWorker::new(
        ReliableQueue::new(client.clone(), queue_config),
        worker_config,
        deps(config, &client),
        Arc::new(extractor),
        Arc::new(NameResolver),
        Arc::new(ComponentReporter),
    );
    if let Some(callback) = progress(quiet) {
        worker = worker.with_progress(callback);
    }

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
            return;
        }
        signal.cancel();
    });

    worker.run(cancel).await;
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            println!("{}", config.get(&key)?);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Path => {
            println!("{}", Config::config_path()?.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ingest() {
        let cli = Cli::try_parse_from([
            "kgsync", "ingest", "-t", "t1", "-k", "kb1", "-e", "ex.json", "a.txt", "b.txt",
        ])
        .unwrap();
        match cli.command {
            Commands::Ingest {
                tenant,
                kb,
                docs,
                enqueue,
                stream,
                ..
            } => {
                assert_eq!(tenant, "t1");
                assert_eq!(kb, "kb1");
                assert_eq!(docs.len(), 2);
                assert!(!enqueue);
                assert_eq!(stream, DEFAULT_STREAM);
            }
            _ => panic!("expected ingest"),
        }
    }

    #[test]
    fn test_parse_ingest_enqueue_stream() {
        let cli = Cli::try_parse_from([
            "kgsync", "ingest", "-t", "t1", "-k", "kb1", "-e", "ex.json", "--enqueue", "--stream",
            "custom:tasks", "a.txt",
        ])
        .unwrap();
        match cli.command {
            Commands::Ingest { enqueue, stream, .. } => {
                assert!(enqueue);
                assert_eq!(stream, "custom:tasks");
            }
            _ => panic!("expected ingest"),
        }
    }

    #[tokio::test]
    async fn test_enqueue_refused_on_memory_backend() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("a.txt");
        std::fs::write(&doc, "Alice founded Acme.").unwrap();
        let mut config = Config::default();
        let client = KvClient::memory();

        let err = cmd_ingest(
            &config,
            client.clone(),
            "t1",
            "kb1",
            Path::new("unused.json"),
            &[doc],
            Some(DEFAULT_STREAM),
            true,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("shared store"));
        assert!(client.queue_info(DEFAULT_STREAM, DEFAULT_GROUP).await.unwrap().is_none());

        config.store.backend = StoreBackendKind::Redis;
        assert!(require_shared_store(&config, "Queueing a task").is_ok());
    }

    #[test]
    fn test_ingest_requires_documents() {
        assert!(Cli::try_parse_from(["kgsync", "ingest", "-t", "t", "-k", "k", "-e", "x.json"]).is_err());
    }

    #[test]
    fn test_queue_info_defaults() {
        let cli = Cli::try_parse_from(["kgsync", "--format", "json", "queue", "info"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Queue {
                action: QueueAction::Info { stream, group },
            } => {
                assert_eq!(stream, DEFAULT_STREAM);
                assert_eq!(group, DEFAULT_GROUP);
            }
            _ => panic!("expected queue info"),
        }
    }

    #[test]
    fn test_lock_and_worker_commands() {
        assert!(Cli::try_parse_from(["kgsync", "lock", "status", "kb1"]).is_ok());
        assert!(Cli::try_parse_from(["kgsync", "lock", "clean", "kb1"]).is_ok());
        assert!(Cli::try_parse_from(["kgsync", "worker", "-c", "w1", "-e", "x.json"]).is_ok());
        assert!(Cli::try_parse_from(["kgsync", "worker", "-e", "x.json"]).is_err());
    }

    #[test]
    fn test_read_chunks_uses_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        std::fs::write(&path, "Alice founded Acme.").unwrap();

        let chunks = read_chunks(&[path]).unwrap();
        assert_eq!(chunks, vec![Chunk::new("report.txt", "Alice founded Acme.")]);
        assert!(read_chunks(&[dir.path().join("missing.txt")]).is_err());
    }
}
