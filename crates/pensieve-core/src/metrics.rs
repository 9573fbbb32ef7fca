//! Prometheus metrics helpers for the Pensieve store.
//!
//! # Usage
//!
//! ```rust,ignore
//! use pensieve_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = init_metrics();
//!     start_metrics_server(9090, handle).await.unwrap();
//!
//!     metrics::counter!("store_events_submitted_total").increment(1);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: `store_`
//! - Suffix: unit or type (`_total`, `_seconds`)
//! - Labels: only `table` on query metrics, which has a small fixed set of values

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// This must be called once at startup before any metrics are recorded.
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_store_metrics();

    handle
}

/// Try to initialize the Prometheus metrics recorder.
///
/// Like [`init_metrics`] but returns `None` if a recorder is already installed.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().ok()?;
    register_store_metrics();
    Some(handle)
}

/// Start the Prometheus metrics HTTP server.
///
/// Binds `0.0.0.0:port`, then serves `/metrics` from a background task.
///
/// # Errors
///
/// Returns an error if the port cannot be bound.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "metrics server stopped");
        }
    });

    Ok(())
}

/// Register descriptions for the store metrics.
fn register_store_metrics() {
    // =========================================================================
    // Ingestion
    // =========================================================================

    describe_counter!(
        "store_events_submitted_total",
        "Events accepted by save_event"
    );
    describe_counter!(
        "store_events_flushed_total",
        "Events written to the store by batch flushes"
    );
    describe_counter!(
        "store_events_dropped_total",
        "Events lost because their batch flush failed"
    );
    describe_counter!("store_flushes_total", "Batch flushes attempted");
    describe_counter!("store_flush_errors_total", "Batch flushes that failed");
    describe_counter!(
        "store_sync_writes_total",
        "Single-row writes taken because the ingest queue was full"
    );
    describe_gauge!("store_buffer_events", "Events waiting in the flush buffer");
    describe_histogram!(
        "store_flush_duration_seconds",
        "Time spent writing one batch"
    );

    // =========================================================================
    // Queries
    // =========================================================================

    describe_counter!(
        "store_queries_total",
        "Queries executed (label: table)"
    );
    describe_counter!("store_query_errors_total", "Queries that failed");
    describe_histogram!(
        "store_query_duration_seconds",
        "Time spent executing one query"
    );
    describe_counter!(
        "store_tag_parse_errors_total",
        "Result rows whose tags could not be parsed and were returned empty"
    );

    // =========================================================================
    // Hot posts
    // =========================================================================

    describe_counter!("store_hot_refresh_total", "Hot score refresh runs");
    describe_gauge!("store_hot_posts", "Rows written by the last hot score refresh");

    describe_gauge!("store_running", "1 while the store service is running");
}

/// Set a gauge value.
///
/// Convenience wrapper around `metrics::gauge!`.
#[inline]
pub fn set_gauge(name: &'static str, value: f64) {
    metrics::gauge!(name).set(value);
}
