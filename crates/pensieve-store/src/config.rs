//! Store configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::hot::{HOT_WINDOW, HotScoreConfig};
use crate::ingest::BatchConfig;
use crate::storage::StorageConfig;
use crate::store::ClickHouseConfig;
use crate::{Error, Result};

/// Store configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// ClickHouse connection URL.
    pub clickhouse_url: String,

    /// ClickHouse database name.
    pub clickhouse_database: String,

    /// Events per batch flush.
    pub batch_size: usize,

    /// Maximum time between flushes while events are buffered.
    pub flush_interval: Duration,

    /// Ingest queue capacity.
    pub queue_capacity: usize,

    /// Default read deadline. `None` disables it.
    pub query_timeout: Option<Duration>,

    /// Time between hot-posts refreshes.
    pub hot_refresh_interval: Duration,

    /// Ranked entries kept per hot-posts refresh.
    pub hot_max_posts: usize,

    /// Interval for the periodic stats log line. `None` disables it.
    pub stats_interval: Option<Duration>,

    /// Bind address for the health/stats HTTP server.
    pub bind_addr: String,

    /// Prometheus metrics port (0 disables the metrics server).
    pub metrics_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            clickhouse_url: "http://localhost:8123".to_string(),
            clickhouse_database: "nostr".to_string(),
            batch_size: 1000,
            flush_interval: Duration::from_millis(1000),
            queue_capacity: 4096,
            query_timeout: Some(Duration::from_secs(30)),
            hot_refresh_interval: Duration::from_secs(300),
            hot_max_posts: 1000,
            stats_interval: Some(Duration::from_secs(30)),
            bind_addr: "0.0.0.0:8080".to_string(),
            metrics_port: 9090,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// All variables are optional:
    /// - `CLICKHOUSE_URL` (default: "http://localhost:8123")
    /// - `CLICKHOUSE_DATABASE` (default: "nostr")
    /// - `STORE_BATCH_SIZE` (default: 1000)
    /// - `STORE_FLUSH_INTERVAL_MS` (default: 1000)
    /// - `STORE_QUEUE_CAPACITY` (default: 4096)
    /// - `STORE_QUERY_TIMEOUT_SECS` (default: 30, 0 disables)
    /// - `STORE_HOT_REFRESH_SECS` (default: 300)
    /// - `STORE_HOT_MAX_POSTS` (default: 1000)
    /// - `STORE_STATS_INTERVAL_SECS` (default: 30, 0 disables)
    /// - `STORE_BIND_ADDR` (default: "0.0.0.0:8080")
    /// - `STORE_METRICS_PORT` (default: 9090, 0 disables)
    ///
    /// A variable that is set but does not parse is an error.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            clickhouse_url: env_string("CLICKHOUSE_URL", defaults.clickhouse_url),
            clickhouse_database: env_string("CLICKHOUSE_DATABASE", defaults.clickhouse_database),
            batch_size: env_parse("STORE_BATCH_SIZE", defaults.batch_size)?,
            flush_interval: Duration::from_millis(env_parse("STORE_FLUSH_INTERVAL_MS", 1000)?),
            queue_capacity: env_parse("STORE_QUEUE_CAPACITY", defaults.queue_capacity)?,
            query_timeout: optional_secs(env_parse("STORE_QUERY_TIMEOUT_SECS", 30)?),
            hot_refresh_interval: Duration::from_secs(env_parse("STORE_HOT_REFRESH_SECS", 300)?),
            hot_max_posts: env_parse("STORE_HOT_MAX_POSTS", defaults.hot_max_posts)?,
            stats_interval: optional_secs(env_parse("STORE_STATS_INTERVAL_SECS", 30)?),
            bind_addr: env_string("STORE_BIND_ADDR", defaults.bind_addr),
            metrics_port: env_parse("STORE_METRICS_PORT", defaults.metrics_port)?,
        };

        config.validate()?;

        tracing::info!(
            clickhouse_url = %config.clickhouse_url,
            clickhouse_database = %config.clickhouse_database,
            batch_size = config.batch_size,
            flush_interval_ms = config.flush_interval.as_millis() as u64,
            queue_capacity = config.queue_capacity,
            "store configuration loaded"
        );

        Ok(config)
    }

    /// Reject settings the store cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.clickhouse_url.is_empty() {
            return Err(Error::Config("CLICKHOUSE_URL must not be empty".into()));
        }
        if self.clickhouse_database.is_empty() {
            return Err(Error::Config("CLICKHOUSE_DATABASE must not be empty".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch size must be positive".into()));
        }
        if self.flush_interval.is_zero() {
            return Err(Error::Config("flush interval must be positive".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue capacity must be positive".into()));
        }
        if self.hot_refresh_interval.is_zero() {
            return Err(Error::Config("hot refresh interval must be positive".into()));
        }
        Ok(())
    }

    pub fn clickhouse(&self) -> ClickHouseConfig {
        ClickHouseConfig {
            url: self.clickhouse_url.clone(),
            database: self.clickhouse_database.clone(),
        }
    }

    pub fn storage(&self) -> StorageConfig {
        StorageConfig {
            batch: BatchConfig {
                batch_size: self.batch_size,
                flush_interval: self.flush_interval,
                queue_capacity: self.queue_capacity,
                sync_write_timeout: self
                    .query_timeout
                    .unwrap_or(BatchConfig::default().sync_write_timeout),
            },
            hot: HotScoreConfig {
                window: HOT_WINDOW,
                max_posts: self.hot_max_posts,
                refresh_interval: self.hot_refresh_interval,
            },
            query_timeout: self.query_timeout,
        }
    }
}

fn env_string(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{key}: invalid value {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn optional_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize config tests that manipulate env vars.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "CLICKHOUSE_URL",
        "CLICKHOUSE_DATABASE",
        "STORE_BATCH_SIZE",
        "STORE_FLUSH_INTERVAL_MS",
        "STORE_QUEUE_CAPACITY",
        "STORE_QUERY_TIMEOUT_SECS",
        "STORE_HOT_REFRESH_SECS",
        "STORE_HOT_MAX_POSTS",
        "STORE_STATS_INTERVAL_SECS",
        "STORE_BIND_ADDR",
        "STORE_METRICS_PORT",
    ];

    fn with_env_vars<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());

        let saved: Vec<_> = ENV_KEYS
            .iter()
            .map(|k| (*k, std::env::var(k).ok()))
            .collect();

        // SAFETY: Serialized by mutex; only test code touches these vars.
        unsafe {
            for k in ENV_KEYS {
                std::env::remove_var(k);
            }
            for (k, v) in vars {
                std::env::set_var(k, v);
            }
        }

        f();

        // SAFETY: Restoring original env state.
        unsafe {
            for (k, v) in &saved {
                match v {
                    Some(val) => std::env::set_var(k, val),
                    None => std::env::remove_var(k),
                }
            }
        }
    }

    #[test]
    fn config_defaults() {
        with_env_vars(&[], || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.clickhouse_url, "http://localhost:8123");
            assert_eq!(config.clickhouse_database, "nostr");
            assert_eq!(config.batch_size, 1000);
            assert_eq!(config.flush_interval, Duration::from_secs(1));
            assert_eq!(config.queue_capacity, 4096);
            assert_eq!(config.query_timeout, Some(Duration::from_secs(30)));
            assert_eq!(config.hot_max_posts, 1000);
            assert_eq!(config.bind_addr, "0.0.0.0:8080");
            assert_eq!(config.metrics_port, 9090);
        });
    }

    #[test]
    fn config_overrides() {
        with_env_vars(
            &[
                ("CLICKHOUSE_URL", "http://ch:8123"),
                ("STORE_BATCH_SIZE", "3"),
                ("STORE_FLUSH_INTERVAL_MS", "250"),
                ("STORE_QUERY_TIMEOUT_SECS", "0"),
                ("STORE_STATS_INTERVAL_SECS", "0"),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.clickhouse_url, "http://ch:8123");
                assert_eq!(config.batch_size, 3);
                assert_eq!(config.flush_interval, Duration::from_millis(250));
                assert_eq!(config.query_timeout, None);
                assert_eq!(config.stats_interval, None);

                let storage = config.storage();
                assert_eq!(storage.batch.batch_size, 3);
                assert_eq!(storage.hot.window, HOT_WINDOW);
                // Direct writes stay bounded even with query deadlines off.
                assert_eq!(storage.batch.sync_write_timeout, Duration::from_secs(30));
            },
        );
    }

    #[test]
    fn config_sync_write_timeout_follows_query_timeout() {
        with_env_vars(&[("STORE_QUERY_TIMEOUT_SECS", "5")], || {
            let storage = Config::from_env().unwrap().storage();
            assert_eq!(storage.batch.sync_write_timeout, Duration::from_secs(5));
        });
    }

    #[test]
    fn config_rejects_garbage_numbers() {
        with_env_vars(&[("STORE_BATCH_SIZE", "lots")], || {
            let err = Config::from_env().unwrap_err();
            assert!(matches!(err, Error::Config(_)));
            assert!(err.to_string().contains("STORE_BATCH_SIZE"));
        });
    }

    #[test]
    fn config_rejects_zero_batch_size() {
        with_env_vars(&[("STORE_BATCH_SIZE", "0")], || {
            assert!(matches!(Config::from_env(), Err(Error::Config(_))));
        });
    }

    #[test]
    fn config_rejects_zero_flush_interval() {
        with_env_vars(&[("STORE_FLUSH_INTERVAL_MS", "0")], || {
            assert!(matches!(Config::from_env(), Err(Error::Config(_))));
        });
    }

    #[test]
    fn validate_rejects_empty_database() {
        let config = Config {
            clickhouse_database: String::new(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
