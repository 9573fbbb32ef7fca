//! The storage surface used by the relay.
//!
//! [`Storage`] ties the pieces together: writes go through the
//! [`BatchIngestor`], reads are planned, executed against the [`EventStore`],
//! then assembled and deduplicated.
//!
//! # Consistency
//!
//! A saved event is visible to queries only after the flush that carries it
//! has completed. A query issued right after `save_event` returns may or may
//! not see that event; nothing orders the two.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::try_join_all;
use metrics::{counter, histogram};
use pensieve_core::{Event, Filter};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::assemble::{assemble, dedupe_by_id};
use crate::hot::{HotScoreAggregator, HotScoreConfig, unix_now};
use crate::ingest::{BatchConfig, BatchIngestor, IngestStats};
use crate::planner::{self, QueryPlan};
use crate::store::EventStore;
use crate::{Error, Result};

/// Caller-supplied cancellation and deadline for one read.
///
/// Cancelling the token, or exceeding the timeout, drops the in-flight store
/// call.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub cancel: CancellationToken,
    /// Overrides the store-wide default when set.
    pub timeout: Option<Duration>,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    async fn run<T>(
        &self,
        operation: &'static str,
        default_timeout: Option<Duration>,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let guarded = async {
            match self.timeout.or(default_timeout) {
                Some(timeout) => match tokio::time::timeout(timeout, call).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout { operation, timeout }),
                },
                None => call.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled { operation }),
            result = guarded => result,
        }
    }
}

/// Result of a count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventCount {
    pub count: u64,
    /// The count came from a probabilistic estimate.
    pub approximate: bool,
}

/// Settings for [`Storage`].
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    pub batch: BatchConfig,
    pub hot: HotScoreConfig,
    /// Applied to reads whose context sets no timeout. `None` means no deadline.
    pub query_timeout: Option<Duration>,
}

/// Event storage for the relay.
pub struct Storage {
    store: Arc<dyn EventStore>,
    ingestor: BatchIngestor,
    hot: Arc<HotScoreAggregator>,
    query_timeout: Option<Duration>,
}

impl Storage {
    /// Start the ingest worker. Must be called within a tokio runtime.
    pub fn new(store: Arc<dyn EventStore>, config: StorageConfig) -> Self {
        let ingestor = BatchIngestor::start(Arc::clone(&store), config.batch);
        let hot = Arc::new(HotScoreAggregator::new(Arc::clone(&store), config.hot));
        Self {
            store,
            ingestor,
            hot,
            query_timeout: config.query_timeout,
        }
    }

    /// Queue an event for batched writing.
    ///
    /// Errors only when the queue is full and the direct write fails, or after
    /// [`close`](Self::close).
    pub async fn save_event(&self, event: Event) -> Result<()> {
        self.ingestor.submit(event).await
    }

    /// Events matching one filter, newest first, without duplicate ids.
    pub async fn query_events(&self, ctx: &QueryContext, filter: &Filter) -> Result<Vec<Event>> {
        let plan = planner::plan(filter);
        let table = plan.table;

        let started = Instant::now();
        let result = ctx
            .run(
                "query",
                self.query_timeout,
                self.store.query_events(&plan),
            )
            .await;
        self.record_query(&plan, started, result.is_ok());
        let rows = result.map_err(|e| Error::execution(table.name(), "query", e))?;

        tracing::debug!(%table, rows = rows.len(), "query executed");
        let assembled = assemble(rows);
        Ok(dedupe_by_id(assembled.events))
    }

    /// Events matching any of the filters, in filter order, first occurrence
    /// of each id kept.
    pub async fn query_filters(
        &self,
        ctx: &QueryContext,
        filters: &[Filter],
    ) -> Result<Vec<Event>> {
        let results = try_join_all(filters.iter().map(|f| self.query_events(ctx, f))).await?;
        Ok(dedupe_by_id(results.into_iter().flatten().collect()))
    }

    /// Number of distinct events matching a filter.
    ///
    /// A filter with no constraints is counted with an estimate; every other
    /// count is exact.
    pub async fn count_events(&self, ctx: &QueryContext, filter: &Filter) -> Result<EventCount> {
        let plan = planner::plan(filter);
        let approximate = plan.is_unconstrained();

        let started = Instant::now();
        let result = ctx
            .run(
                "count",
                self.query_timeout,
                self.store.count_events(&plan, approximate),
            )
            .await;
        self.record_query(&plan, started, result.is_ok());
        let count = result.map_err(|e| Error::execution(plan.table.name(), "count", e))?;

        Ok(EventCount { count, approximate })
    }

    /// Rebuild the hot-posts ranking now. Returns the number of entries written.
    pub async fn refresh_hot_posts(&self, ctx: &QueryContext) -> Result<usize> {
        let now = unix_now();
        ctx.run("refresh_hot_posts", None, self.hot.refresh(now))
            .await
    }

    /// Start the scheduled hot-posts refresh.
    pub fn spawn_hot_refresh(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        Arc::clone(&self.hot).spawn(shutdown)
    }

    /// Check that the store is reachable.
    pub async fn ping(&self, ctx: &QueryContext) -> Result<()> {
        ctx.run("ping", self.query_timeout, self.store.ping())
            .await
            .map_err(|e| Error::execution("events", "ping", e))
    }

    /// Ingestion counters.
    pub fn stats(&self) -> IngestStats {
        self.ingestor.stats()
    }

    /// Flush buffered events and stop the ingest worker.
    pub async fn close(&self) {
        self.ingestor.shutdown().await;
    }

    fn record_query(&self, plan: &QueryPlan, started: Instant, ok: bool) {
        counter!("store_queries_total", "table" => plan.table.name()).increment(1);
        histogram!("store_query_duration_seconds").record(started.elapsed().as_secs_f64());
        if !ok {
            counter!("store_query_errors_total").increment(1);
        }
    }
}
