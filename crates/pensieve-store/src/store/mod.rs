//! The storage engine contract.
//!
//! Everything the relay layer needs from the database goes through
//! [`EventStore`]: multi-row inserts, planned queries and counts, and the
//! engagement reads and ranked writes used by the hot-score job. The engine
//! resolves duplicate ids by keeping the row with the highest `version`, and
//! treats `deleted = 1` rows as absent.

mod clickhouse;
#[cfg(test)]
pub(crate) mod mock;
mod rows;

pub use self::clickhouse::{ClickHouseConfig, ClickHouseStore};
pub use self::rows::{EngagementRow, EventRow, HotPostRow, QueryRow};

use async_trait::async_trait;

use crate::Result;
use crate::planner::QueryPlan;

/// The storage engine operations used by the relay.
///
/// Implementations must be safe to call concurrently; the ingest worker and
/// any number of readers share one instance.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Write all rows as a single multi-row insert.
    async fn insert_events(&self, rows: &[EventRow]) -> Result<()>;

    /// Execute a planned event query.
    async fn query_events(&self, plan: &QueryPlan) -> Result<Vec<QueryRow>>;

    /// Count distinct event ids matching a plan.
    async fn count_events(&self, plan: &QueryPlan, approximate: bool) -> Result<u64>;

    /// Engagement counters for events created at or after `since`.
    async fn fetch_engagement(&self, since: u32) -> Result<Vec<EngagementRow>>;

    /// Write a fresh ranking and evict rows created before `horizon` or left
    /// over from runs older than `run_id`.
    async fn replace_hot_posts(&self, rows: &[HotPostRow], run_id: u64, horizon: u32)
    -> Result<()>;

    /// Check that the engine is reachable.
    async fn ping(&self) -> Result<()>;
}
