//! Pensieve relay storage.
//!
//! This crate sits between a Nostr relay and ClickHouse. It batches incoming
//! events into multi-row inserts, routes read filters to the most selective
//! table or view, turns result rows back into events, and maintains a
//! time-decayed "hot posts" ranking.
//!
//! # Modules
//!
//! - [`store`] - The [`EventStore`] engine contract and its ClickHouse implementation
//! - [`ingest`] - [`BatchIngestor`]: bounded queue, size/timer flushes, final flush on shutdown
//! - [`planner`] - Filter-to-table routing and parameterized predicates
//! - [`assemble`] - Row-to-event conversion with per-row tag recovery, id dedupe
//! - [`hot`] - Hot-score computation and the periodic refresh task
//! - [`storage`] - [`Storage`], the surface the relay calls
//! - [`source`] - JSONL import
//!
//! # Architecture
//!
//! ```text
//!   event ──► extract_tags ──► BatchIngestor ──(flush)──► EventStore
//!
//!   filter ──► planner ──► EventStore ──► assemble ──► dedupe ──► caller
//!
//!   HotScoreAggregator (timer) ──► engagement_counters ──► hot_posts
//! ```

pub mod assemble;
pub mod config;
pub mod error;
pub mod hot;
pub mod http;
pub mod ingest;
pub mod planner;
pub mod source;
pub mod storage;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
pub use hot::{HotScoreAggregator, HotScoreConfig};
pub use ingest::{BatchConfig, BatchIngestor, IngestStats};
pub use planner::{MAX_LIMIT, QueryPlan, Table};
pub use source::{ImportStats, JsonlConfig, JsonlSource};
pub use storage::{EventCount, QueryContext, Storage, StorageConfig};
pub use store::{ClickHouseConfig, ClickHouseStore, EventStore};
