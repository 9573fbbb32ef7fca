//! In-memory [`EventStore`] for unit tests.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{EngagementRow, EventRow, EventStore, HotPostRow, QueryRow};
use crate::planner::QueryPlan;
use crate::{Error, Result};

/// Records every call and serves canned rows.
#[derive(Default)]
pub(crate) struct MockStore {
    /// One entry per `insert_events` call.
    pub inserts: Mutex<Vec<Vec<EventRow>>>,
    /// Plans passed to `query_events` and `count_events`.
    pub plans: Mutex<Vec<QueryPlan>>,
    /// Rows returned by every `query_events` call.
    pub query_rows: Mutex<Vec<QueryRow>>,
    /// Value returned by `count_events`.
    pub count: Mutex<u64>,
    /// Rows returned by `fetch_engagement`.
    pub engagement: Mutex<Vec<EngagementRow>>,
    /// `(rows, run_id, horizon)` per `replace_hot_posts` call.
    pub hot_posts: Mutex<Vec<(Vec<HotPostRow>, u64, u32)>>,
    /// Fail every call that reaches the store.
    pub fail: AtomicBool,
    /// Park the next insert (after recording it) until `release` is notified.
    pub hold_next_insert: AtomicBool,
    /// Signalled after each recorded insert.
    pub inserted: Notify,
    /// Signalled when an insert is parked.
    pub parked: Notify,
    /// Wakes a parked insert.
    pub release: Notify,
    /// Park every query until `release` is notified.
    pub hold_queries: AtomicBool,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inserted_rows(&self) -> usize {
        self.inserts.lock().iter().map(Vec::len).sum()
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Store("mock failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for MockStore {
    async fn insert_events(&self, rows: &[EventRow]) -> Result<()> {
        self.check()?;
        self.inserts.lock().push(rows.to_vec());
        self.inserted.notify_one();

        if self.hold_next_insert.swap(false, Ordering::SeqCst) {
            self.parked.notify_one();
            self.release.notified().await;
        }
        Ok(())
    }

    async fn query_events(&self, plan: &QueryPlan) -> Result<Vec<QueryRow>> {
        self.plans.lock().push(plan.clone());
        if self.hold_queries.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        self.check()?;
        Ok(self.query_rows.lock().clone())
    }

    async fn count_events(&self, plan: &QueryPlan, _approximate: bool) -> Result<u64> {
        self.plans.lock().push(plan.clone());
        self.check()?;
        Ok(*self.count.lock())
    }

    async fn fetch_engagement(&self, since: u32) -> Result<Vec<EngagementRow>> {
        self.check()?;
        Ok(self
            .engagement
            .lock()
            .iter()
            .filter(|row| row.created_at >= since)
            .cloned()
            .collect())
    }

    async fn replace_hot_posts(
        &self,
        rows: &[HotPostRow],
        run_id: u64,
        horizon: u32,
    ) -> Result<()> {
        self.check()?;
        self.hot_posts
            .lock()
            .push((rows.to_vec(), run_id, horizon));
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}
