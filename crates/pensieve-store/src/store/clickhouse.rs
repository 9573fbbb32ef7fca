//! ClickHouse implementation of [`EventStore`].
//!
//! The expected layout is in `docs/schema.sql`: a `ReplacingMergeTree(version)`
//! base table, author/kind/tag projections fed by materialized views, the
//! `engagement_counters` summing table, and `hot_posts`.

use async_trait::async_trait;
use clickhouse::Client;
use clickhouse::query::Query;

use super::{EngagementRow, EventRow, EventStore, HotPostRow, QueryRow};
use crate::Result;
use crate::planner::{Param, QueryPlan, Statement, Table};

/// Name of the ranked table written by the hot-score job.
pub const HOT_POSTS_TABLE: &str = "hot_posts";

/// Connection settings for the ClickHouse store.
#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    /// ClickHouse server URL (e.g., "http://localhost:8123")
    pub url: String,

    /// Database name
    pub database: String,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            database: "nostr".to_string(),
        }
    }
}

/// [`EventStore`] backed by a ClickHouse HTTP client.
#[derive(Clone)]
pub struct ClickHouseStore {
    client: Client,
    config: ClickHouseConfig,
}

impl ClickHouseStore {
    /// Create a store. No connection is made until the first call.
    pub fn new(config: ClickHouseConfig) -> Self {
        let client = Client::default()
            .with_url(&config.url)
            .with_database(&config.database);

        tracing::info!(
            "ClickHouse store initialized: url={}, database={}",
            config.url,
            config.database
        );

        Self { client, config }
    }

    /// The configured database name.
    pub fn database(&self) -> &str {
        &self.config.database
    }

    fn prepare(&self, statement: Statement) -> Query {
        statement
            .params
            .into_iter()
            .fold(self.client.query(&statement.sql), |query, param| match param {
                Param::Str(value) => query.bind(value),
                Param::UInt(value) => query.bind(value),
                Param::StrArray(values) => query.bind(values),
            })
    }
}

#[async_trait]
impl EventStore for ClickHouseStore {
    async fn insert_events(&self, rows: &[EventRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut inserter = self.client.insert(Table::Events.name())?;
        for row in rows {
            inserter.write(row).await?;
        }
        inserter.end().await?;

        Ok(())
    }

    async fn query_events(&self, plan: &QueryPlan) -> Result<Vec<QueryRow>> {
        let statement = plan.select_statement(&self.config.database)?;
        let rows = self.prepare(statement).fetch_all::<QueryRow>().await?;
        Ok(rows)
    }

    async fn count_events(&self, plan: &QueryPlan, approximate: bool) -> Result<u64> {
        let statement = plan.count_statement(&self.config.database, approximate)?;
        let count: u64 = self.prepare(statement).fetch_one().await?;
        Ok(count)
    }

    async fn fetch_engagement(&self, since: u32) -> Result<Vec<EngagementRow>> {
        let db = &self.config.database;
        let sql = format!(
            "SELECT
                c.target_event_id AS event_id,
                e.pubkey AS pubkey,
                e.kind AS kind,
                e.created_at AS created_at,
                sum(c.replies) AS replies,
                sum(c.reactions) AS reactions,
                sum(c.reposts) AS reposts,
                sum(c.zaps) AS zaps,
                sum(c.zap_msats) AS zap_msats
            FROM {db}.engagement_counters AS c
            INNER JOIN (
                SELECT id, pubkey, kind, created_at
                FROM {db}.events FINAL
                WHERE deleted = 0 AND created_at >= ?
            ) AS e ON e.id = c.target_event_id
            GROUP BY event_id, pubkey, kind, created_at"
        );

        let rows = self
            .client
            .query(&sql)
            .bind(since)
            .fetch_all::<EngagementRow>()
            .await?;
        Ok(rows)
    }

    async fn replace_hot_posts(
        &self,
        rows: &[HotPostRow],
        run_id: u64,
        horizon: u32,
    ) -> Result<()> {
        if !rows.is_empty() {
            let mut inserter = self.client.insert(HOT_POSTS_TABLE)?;
            for row in rows {
                inserter.write(row).await?;
            }
            inserter.end().await?;
        }

        self.client
            .query(&format!(
                "ALTER TABLE {}.{} DELETE WHERE created_at < ? OR run_id < ?",
                self.config.database, HOT_POSTS_TABLE
            ))
            .bind(horizon)
            .bind(run_id)
            .execute()
            .await?;

        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let result: u8 = self.client.query("SELECT 1").fetch_one().await?;
        if result != 1 {
            return Err(crate::Error::Store(format!("unexpected ping result {result}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ClickHouseConfig::default();
        assert_eq!(config.url, "http://localhost:8123");
        assert_eq!(config.database, "nostr");
    }

    #[test]
    fn test_store_keeps_database() {
        let store = ClickHouseStore::new(ClickHouseConfig {
            url: "http://ch:8123".to_string(),
            database: "relay".to_string(),
        });
        assert_eq!(store.database(), "relay");
    }

    // Integration tests would require a running ClickHouse instance
}
