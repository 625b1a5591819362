//! Lumen application binary - composition root.
//!
//! Ties the Lumen crates together into a single executable:
//! 1. Load configuration from TOML and apply CLI overrides
//! 2. Open the SQLite database holding the vector index and the job queue
//! 3. Build the embedding backend selected in the config
//! 4. Dispatch to the worker, enqueue, search or index subcommand

mod cli;
mod inspect;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;

use lumen_core::config::{expand_home, LumenConfig};
use lumen_core::error::LumenError;
use lumen_core::types::IngestionJob;
use lumen_storage::Database;
use lumen_vector::{
    DynEmbeddingService, MockEmbedding, OnnxClipEmbedding, SearchEngine, SearchParams,
    SqliteIndex, VectorIndex,
};
use lumen_worker::{FsBlobStore, IngestionWorker, JobQueue, SqliteJobQueue, WorkerSettings};

use cli::{CliArgs, Command, SearchArgs};
use inspect::Inspector;

/// Construct the embedding backend named in `[embedding]`.
fn build_embedder(config: &LumenConfig) -> Result<Arc<dyn DynEmbeddingService>, LumenError> {
    let dimensions = config.embedding.dimensions;
    match config.embedding.backend.as_str() {
        "onnx" => {
            let model_dir = expand_home(&config.embedding.model_dir);
            let service = OnnxClipEmbedding::from_directory(&model_dir, dimensions)?;
            Ok(Arc::new(service))
        }
        "mock" => {
            tracing::warn!(dimensions, "Using mock embeddings; search results are not semantic");
            Ok(Arc::new(MockEmbedding::with_dimensions(dimensions)))
        }
        other => Err(LumenError::Config(format!(
            "Unknown embedding backend '{}' (expected 'onnx' or 'mock')",
            other
        ))),
    }
}

/// Resolve once either Ctrl-C or (on Unix) SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn run_worker(
    config: &LumenConfig,
    queue: Arc<SqliteJobQueue>,
    index: Arc<dyn VectorIndex>,
) -> Result<(), Box<dyn std::error::Error>> {
    let embedder = build_embedder(config)?;
    let blobs = Arc::new(FsBlobStore::new(expand_home(&config.blob.root)));
    tracing::info!(
        queue = %config.queue.name,
        blob_root = %blobs.root().display(),
        backend = %config.embedding.backend,
        "Worker starting"
    );

    let worker = IngestionWorker::new(
        queue,
        blobs,
        embedder,
        index,
        WorkerSettings::from_config(config),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received, finishing current job");
        let _ = shutdown_tx.send(true);
    });

    let stats = worker.run(shutdown_rx).await;
    tracing::info!(
        received = stats.received,
        acknowledged = stats.acknowledged,
        rejected = stats.rejected,
        failed = stats.failed,
        receive_errors = stats.receive_errors,
        "Worker stopped"
    );
    Ok(())
}

async fn run_search(
    config: &LumenConfig,
    args: SearchArgs,
    index: Arc<dyn VectorIndex>,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = SearchEngine::new(index, build_embedder(config)?);
    let params = SearchParams {
        year: args.year,
        month: args.month,
        time_of_day: args.time_of_day,
        camera_make: args.camera_make,
        camera_model: args.camera_model,
        k: args.k.unwrap_or(config.search.default_k),
    };

    let results = match (args.text, args.image) {
        (Some(text), _) => engine.search_text(&text, &params).await?,
        (None, Some(path)) => {
            let bytes = tokio::fs::read(&path).await?;
            engine.search_image(&bytes, &params).await?
        }
        (None, None) => Vec::new(),
    };

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = LumenConfig::load_or_default(&config_file);
    if let Some(data_dir) = args.resolve_data_dir() {
        config.general.data_dir = data_dir;
    }

    // Tracing. Logs go to stderr; stdout carries command output.
    let level = args
        .resolve_log_level()
        .unwrap_or_else(|| config.general.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(path = %config_file.display(), "Configuration resolved");

    // Storage.
    let db_path = config.db_path();
    let db = Arc::new(Database::new(&db_path)?);
    let index: Arc<dyn VectorIndex> =
        Arc::new(SqliteIndex::new(Arc::clone(&db), &config.index.collection));
    let queue = Arc::new(SqliteJobQueue::new(
        Arc::clone(&db),
        &config.queue.name,
        Duration::from_millis(config.queue.poll_interval_ms),
    ));

    match args.command {
        Command::Worker => run_worker(&config, queue, index).await?,
        Command::Enqueue {
            bucket,
            image_key,
            metadata_key,
            photo_id,
        } => {
            let job = IngestionJob {
                bucket,
                image_key,
                metadata_key,
                photo_id,
            };
            let body = job.to_body()?;
            // Reject jobs the worker would discard.
            IngestionJob::parse(&body)?;
            let message_id = queue.send(&body).await?;
            tracing::info!(message_id = %message_id, photo_id = %job.photo_id, "Job enqueued");
            println!("{}", message_id);
        }
        Command::Search(search) => run_search(&config, search, index).await?,
        Command::Index(command) => {
            let inspector = Inspector {
                index: index.as_ref(),
                collection: &config.index.collection,
                queue: Some(queue.inner()),
            };
            let mut stdout = std::io::stdout().lock();
            inspector.run(command, &mut stdout)?;
        }
    }

    Ok(())
}
