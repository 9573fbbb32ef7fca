//! Time-decayed engagement ranking ("hot posts").
//!
//! Each refresh reads engagement counters for events created within the
//! window, scores them, and replaces the contents of the ranked table with the
//! top entries. Runs are full recomputations: a failed run leaves the previous
//! ranking in place until the next one. Each run is tagged with a run id from
//! a [`VersionClock`], so two runs within the same second still replace each
//! other.
//!
//! The score is a weighted sum of engagement divided by a power of age:
//!
//! ```text
//! raw   = 3·replies + 2·reposts + 1·reactions + 5·zaps + log10(1 + zap_sats)
//! score = raw / (age_hours + 2)^1.5
//! ```

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::ingest::VersionClock;
use crate::store::{EngagementRow, EventStore, HotPostRow};
use crate::{Error, Result};

/// Weight of a reply.
const REPLY_WEIGHT: f64 = 3.0;

/// Weight of a repost.
const REPOST_WEIGHT: f64 = 2.0;

/// Weight of a reaction.
const REACTION_WEIGHT: f64 = 1.0;

/// Weight of a zap, independent of its amount.
const ZAP_WEIGHT: f64 = 5.0;

/// Hours added to the age so fresh posts don't divide by ~0.
const AGE_OFFSET_HOURS: f64 = 2.0;

/// Decay exponent.
const GRAVITY: f64 = 1.5;

/// Events older than this are not ranked.
pub const HOT_WINDOW: Duration = Duration::from_secs(48 * 3600);

/// Configuration for the hot-score job.
#[derive(Debug, Clone)]
pub struct HotScoreConfig {
    /// Only events created within this window are ranked.
    pub window: Duration,

    /// Number of ranked entries kept per refresh.
    pub max_posts: usize,

    /// Time between scheduled refreshes.
    pub refresh_interval: Duration,
}

impl Default for HotScoreConfig {
    fn default() -> Self {
        Self {
            window: HOT_WINDOW,
            max_posts: 1000,
            refresh_interval: Duration::from_secs(300),
        }
    }
}

/// Weighted engagement before decay.
pub fn raw_score(row: &EngagementRow) -> f64 {
    let zap_sats = (row.zap_msats / 1000) as f64;
    REPLY_WEIGHT * row.replies as f64
        + REPOST_WEIGHT * row.reposts as f64
        + REACTION_WEIGHT * row.reactions as f64
        + ZAP_WEIGHT * row.zaps as f64
        + (1.0 + zap_sats).log10()
}

/// Decay divisor for an age in seconds. Non-decreasing in age.
fn decay(age_secs: u32) -> f64 {
    let age_hours = f64::from(age_secs) / 3600.0;
    (age_hours + AGE_OFFSET_HOURS).powf(GRAVITY)
}

/// Score an event at time `now`. Events dated in the future count as brand new.
pub fn hot_score(row: &EngagementRow, now: u32) -> f64 {
    let age = now.saturating_sub(row.created_at);
    raw_score(row) / decay(age)
}

/// Periodically rebuilds the hot-posts ranking.
pub struct HotScoreAggregator {
    store: Arc<dyn EventStore>,
    config: HotScoreConfig,
    runs: VersionClock,
}

impl HotScoreAggregator {
    pub fn new(store: Arc<dyn EventStore>, config: HotScoreConfig) -> Self {
        Self {
            store,
            config,
            runs: VersionClock::new(),
        }
    }

    pub fn config(&self) -> &HotScoreConfig {
        &self.config
    }

    /// Recompute the ranking as of `now` (Unix seconds). Returns the number of
    /// ranked entries written.
    pub async fn refresh(&self, now: u32) -> Result<usize> {
        let window = u32::try_from(self.config.window.as_secs()).unwrap_or(u32::MAX);
        let horizon = now.saturating_sub(window);

        let engagement = self
            .store
            .fetch_engagement(horizon)
            .await
            .map_err(|e| Error::execution("engagement_counters", "select", e))?;

        let run_id = self.runs.next();
        let ranked = rank(engagement, now, run_id, self.config.max_posts);
        self.store
            .replace_hot_posts(&ranked, run_id, horizon)
            .await
            .map_err(|e| Error::execution("hot_posts", "replace", e))?;

        counter!("store_hot_refresh_total").increment(1);
        gauge!("store_hot_posts").set(ranked.len() as f64);
        Ok(ranked.len())
    }

    /// Run [`refresh`](Self::refresh) now and then every `refresh_interval`
    /// until `shutdown` is cancelled. Failures are logged; the next tick retries.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!(
                interval_secs = self.config.refresh_interval.as_secs(),
                max_posts = self.config.max_posts,
                "hot score refresh task started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("hot score refresh task shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let now = unix_now();
                        match self.refresh(now).await {
                            Ok(ranked) => tracing::info!(ranked, "hot posts refreshed"),
                            Err(e) => tracing::warn!(error = %e, "hot posts refresh failed"),
                        }
                    }
                }
            }
        })
    }
}

/// Current Unix time in seconds.
pub(crate) fn unix_now() -> u32 {
    u32::try_from(chrono::Utc::now().timestamp()).unwrap_or(u32::MAX)
}

/// Score, sort by score (newest first on ties), and keep the top `max_posts`.
fn rank(
    engagement: Vec<EngagementRow>,
    now: u32,
    run_id: u64,
    max_posts: usize,
) -> Vec<HotPostRow> {
    let mut scored: Vec<(f64, EngagementRow)> = engagement
        .into_iter()
        .map(|row| (hot_score(&row, now), row))
        .filter(|(score, _)| *score > 0.0)
        .collect();

    scored.sort_by(|(a, ra), (b, rb)| {
        b.total_cmp(a)
            .then_with(|| rb.created_at.cmp(&ra.created_at))
    });
    scored.truncate(max_posts);

    scored
        .into_iter()
        .map(|(score, row)| HotPostRow {
            event_id: row.event_id,
            pubkey: row.pubkey,
            kind: row.kind,
            created_at: row.created_at,
            score,
            replies: row.replies,
            reactions: row.reactions,
            reposts: row.reposts,
            zaps: row.zaps,
            zap_msats: row.zap_msats,
            computed_at: now,
            run_id,
        })
        .collect()
}
