//! Pensieve relay store.
//!
//! # Usage
//!
//! ```bash
//! # Run the ingest worker, hot-posts scheduler, and health/stats server
//! pensieve-store serve
//!
//! # Import a JSONL dump (file or directory, .gz accepted)
//! pensieve-store import ./dumps/
//!
//! # Run a NIP-01 filter and print matching events as JSON lines
//! pensieve-store query '{"kinds":[1],"#t":["nostr"],"limit":10}'
//!
//! # Count matching events
//! pensieve-store count '{"authors":["<hex pubkey>"]}'
//!
//! # Rebuild the hot-posts ranking once
//! pensieve-store refresh-hot
//! ```
//!
//! Configuration comes from the environment (see [`Config::from_env`]).
//!
//! # Graceful Shutdown
//!
//! `serve` handles SIGINT (Ctrl+C) and SIGTERM:
//! 1. Stops the HTTP server and the hot-posts scheduler
//! 2. Flushes events still buffered in the ingest worker
//! 3. Exits once the final flush has completed

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::Request;
use clap::{Parser, Subcommand};
use pensieve_core::metrics::{init_metrics, set_gauge, start_metrics_server};
use pensieve_core::{Event, Filter};
use pensieve_store::{
    ClickHouseStore, Config, JsonlConfig, JsonlSource, QueryContext, Storage, http,
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Batched ClickHouse storage for a Nostr relay.
#[derive(Parser, Debug)]
#[command(name = "pensieve-store")]
#[command(about = "Batched ClickHouse storage and filter routing for a Nostr relay")]
#[command(version)]
struct Args {
    /// Path to .env file (optional).
    #[arg(long, env = "DOTENV_PATH", default_value = ".env")]
    dotenv: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the ingest worker, hot-posts scheduler, and HTTP endpoints.
    Serve,

    /// Import events from JSONL files.
    Import {
        /// Input file or directory.
        input: PathBuf,

        /// Skip id/signature verification.
        #[arg(long)]
        skip_validation: bool,

        /// Abort on the first invalid event instead of skipping it.
        #[arg(long)]
        stop_on_error: bool,

        /// Limit number of files to process.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print events matching a NIP-01 filter as JSON lines.
    Query {
        /// Filter JSON.
        filter: String,
    },

    /// Count events matching a NIP-01 filter.
    Count {
        /// Filter JSON.
        filter: String,
    },

    /// Rebuild the hot-posts ranking once.
    RefreshHot,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load .env file if it exists
    if std::path::Path::new(&args.dotenv).exists() {
        dotenvy::from_path(&args.dotenv)?;
        eprintln!("Loaded environment from {}", args.dotenv);
    }

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pensieve_store=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Invalid configuration")?;
    let store = Arc::new(ClickHouseStore::new(config.clickhouse()));
    let storage = Arc::new(Storage::new(store, config.storage()));

    let result = match args.command {
        Command::Serve => serve(&config, Arc::clone(&storage)).await,
        Command::Import {
            input,
            skip_validation,
            stop_on_error,
            limit,
        } => {
            let jsonl = JsonlConfig {
                input,
                skip_validation,
                continue_on_error: !stop_on_error,
                limit,
                ..Default::default()
            };
            import(jsonl, &storage).await
        }
        Command::Query { filter } => query(&storage, &filter).await,
        Command::Count { filter } => count(&storage, &filter).await,
        Command::RefreshHot => {
            let ranked = storage
                .refresh_hot_posts(&QueryContext::new())
                .await
                .context("Hot posts refresh failed")?;
            tracing::info!(ranked, "hot posts refreshed");
            Ok(())
        }
    };

    storage.close().await;
    result
}

async fn serve(config: &Config, storage: Arc<Storage>) -> Result<()> {
    tracing::info!("Pensieve store starting...");

    if config.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(config.metrics_port, metrics_handle)
            .await
            .context("Failed to start metrics server")?;
        set_gauge("store_running", 1.0);
    }

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, stopping gracefully...");
            shutdown.cancel();
        });
    }

    let hot_task = storage.spawn_hot_refresh(shutdown.clone());
    let stats_task = config
        .stats_interval
        .map(|every| tokio::spawn(log_stats(Arc::clone(&storage), every, shutdown.clone())));

    let app = http::router(Arc::clone(&storage)).layer(TraceLayer::new_for_http().make_span_with(
        |request: &Request<_>| {
            tracing::span!(
                Level::INFO,
                "http_request",
                method = %request.method(),
                path = %request.uri().path(),
            )
        },
    ));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "starting server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    // The server also stops on its own errors; make sure the tasks follow.
    shutdown.cancel();
    if let Err(e) = hot_task.await {
        tracing::warn!("Hot score task panicked: {:?}", e);
    }
    if let Some(task) = stats_task
        && let Err(e) = task.await
    {
        tracing::warn!("Stats task panicked: {:?}", e);
    }

    tracing::info!("Flushing buffered events...");
    storage.close().await;
    set_gauge("store_running", 0.0);

    let stats = storage.stats();
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("SHUTDOWN COMPLETE");
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Events submitted:     {}", stats.submitted);
    tracing::info!("Events flushed:       {}", stats.flushed);
    tracing::info!("Events dropped:       {}", stats.dropped);
    tracing::info!("Sync writes:          {}", stats.sync_writes);

    Ok(())
}

async fn log_stats(storage: Arc<Storage>, every: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let stats = storage.stats();
                tracing::info!(
                    submitted = stats.submitted,
                    flushed = stats.flushed,
                    dropped = stats.dropped,
                    buffered = stats.buffered,
                    sync_writes = stats.sync_writes,
                    "ingest stats"
                );
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn import(jsonl: JsonlConfig, storage: &Storage) -> Result<()> {
    let source = JsonlSource::new(jsonl);
    let (tx, mut rx) = tokio::sync::mpsc::channel::<Event>(1024);

    // File reading and signature checks are blocking work.
    let reader = tokio::task::spawn_blocking(move || {
        source.process(|event| Ok(tx.blocking_send(event).is_ok()))
    });

    let mut saved = 0u64;
    let mut failed = 0u64;
    while let Some(event) = rx.recv().await {
        match storage.save_event(event).await {
            Ok(()) => saved += 1,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to save event");
                failed += 1;
            }
        }
    }

    let stats = reader.await.context("Import reader panicked")??;
    storage.close().await;

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("IMPORT COMPLETE");
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Files processed:      {}", stats.files_processed);
    tracing::info!("Events read:          {}", stats.total_events);
    tracing::info!("Events invalid:       {}", stats.invalid_events);
    tracing::info!("Events saved:         {}", saved);
    tracing::info!("Events failed:        {}", failed);
    tracing::info!("Events dropped:       {}", storage.stats().dropped);

    Ok(())
}

async fn query(storage: &Storage, filter: &str) -> Result<()> {
    let filter = Filter::from_json(filter).context("Invalid filter")?;
    let events = storage.query_events(&QueryContext::new(), &filter).await?;
    for event in &events {
        println!("{}", serde_json::to_string(event)?);
    }
    tracing::info!(count = events.len(), "query complete");
    Ok(())
}

async fn count(storage: &Storage, filter: &str) -> Result<()> {
    let filter = Filter::from_json(filter).context("Invalid filter")?;
    let count = storage.count_events(&QueryContext::new(), &filter).await?;
    println!("{}", serde_json::to_string(&count)?);
    Ok(())
}
