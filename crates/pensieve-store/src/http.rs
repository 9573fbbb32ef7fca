//! Health and stats endpoints.
//!
//! - `GET /health` - pings the store; 200 when reachable, 503 otherwise
//! - `GET /stats` - ingestion counters as JSON

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Serialize;

use crate::ingest::IngestStats;
use crate::storage::{QueryContext, Storage};

/// Deadline for the store ping behind `/health`.
const HEALTH_PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Build the router.
pub fn router(storage: Arc<Storage>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .with_state(storage)
}

async fn health(State(storage): State<Arc<Storage>>) -> Response {
    let ctx = QueryContext::new().with_timeout(HEALTH_PING_TIMEOUT);
    match storage.ping(&ctx).await {
        Ok(()) => Json(HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            error: None,
        })
        .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable",
                    version: env!("CARGO_PKG_VERSION"),
                    error: Some(e.to_string()),
                }),
            )
                .into_response()
        }
    }
}

async fn stats(State(storage): State<Arc<Storage>>) -> Json<IngestStats> {
    Json(storage.stats())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageConfig;
    use crate::store::mock::MockStore;
    use std::sync::atomic::Ordering;

    fn storage(store: Arc<MockStore>) -> Arc<Storage> {
        Arc::new(Storage::new(store, StorageConfig::default()))
    }

    #[tokio::test]
    async fn test_health_ok() {
        let response = health(State(storage(Arc::new(MockStore::new())))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_unavailable_when_store_fails() {
        let store = Arc::new(MockStore::new());
        store.fail.store(true, Ordering::SeqCst);
        let response = health(State(storage(store))).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_stats_reports_counters() {
        let Json(stats) = stats(State(storage(Arc::new(MockStore::new())))).await;
        assert_eq!(stats, IngestStats::default());
    }
}
