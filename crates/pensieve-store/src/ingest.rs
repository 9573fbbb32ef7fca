//! Batched event ingestion.
//!
//! Producers call [`BatchIngestor::submit`], which converts the event to an
//! [`EventRow`] and hands it to a bounded queue. A single background worker
//! owns the buffer behind that queue and flushes it to the store when either
//! the buffer reaches `batch_size` or `flush_interval` elapses since the last
//! flush. Shutdown drains the queue and performs one final flush.
//!
//! # Delivery
//!
//! Delivery is at-most-once. A failed flush is logged and its events are
//! dropped; nothing is retried. When the queue is full, `submit` writes the
//! event directly as a single row, bounded by `sync_write_timeout`, and
//! returns that write's error, if any.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use pensieve_core::Event;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use crate::store::{EventRow, EventStore};
use crate::{Error, Result};

/// Shortest flush interval the worker will tick at.
const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for the batch ingestor.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Flush once this many events are buffered.
    pub batch_size: usize,

    /// Flush at least this often while events are buffered.
    pub flush_interval: Duration,

    /// Capacity of the queue in front of the buffer.
    pub queue_capacity: usize,

    /// Deadline for the single-row write taken when the queue is full.
    pub sync_write_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            flush_interval: Duration::from_secs(1),
            queue_capacity: 4096,
            sync_write_timeout: Duration::from_secs(30),
        }
    }
}

/// Snapshot of ingestion counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    /// Events accepted by `submit`.
    pub submitted: u64,
    /// Events written by batch flushes.
    pub flushed: u64,
    /// Events lost to failed flushes.
    pub dropped: u64,
    /// Flushes attempted.
    pub flushes: u64,
    /// Flushes that failed.
    pub failed_flushes: u64,
    /// Single-row writes taken because the queue was full.
    pub sync_writes: u64,
    /// Events currently held in the worker's buffer.
    pub buffered: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    flushed: AtomicU64,
    dropped: AtomicU64,
    flushes: AtomicU64,
    failed_flushes: AtomicU64,
    sync_writes: AtomicU64,
    buffered: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> IngestStats {
        IngestStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            flushed: self.flushed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            failed_flushes: self.failed_flushes.load(Ordering::Relaxed),
            sync_writes: self.sync_writes.load(Ordering::Relaxed),
            buffered: self.buffered.load(Ordering::Relaxed),
        }
    }

    fn set_buffered(&self, len: usize) {
        self.buffered.store(len as u64, Ordering::Relaxed);
        gauge!("store_buffer_events").set(len as f64);
    }
}

/// Issues row versions: microsecond timestamps, strictly increasing within the process.
#[derive(Debug, Default)]
pub struct VersionClock {
    last: AtomicU64,
}

impl VersionClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next version, never equal to or below a previously issued one.
    pub fn next(&self) -> u64 {
        let now = u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or(0);
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match self.last.compare_exchange_weak(
                last,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(current) => last = current,
            }
        }
    }
}

/// Accepts events and writes them to the store in batches.
pub struct BatchIngestor {
    tx: mpsc::Sender<EventRow>,
    store: Arc<dyn EventStore>,
    sync_write_timeout: Duration,
    clock: VersionClock,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl BatchIngestor {
    /// Start the background worker. Must be called within a tokio runtime.
    pub fn start(store: Arc<dyn EventStore>, config: BatchConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let counters = Arc::new(Counters::default());
        let shutdown = CancellationToken::new();

        tracing::info!(
            batch_size = config.batch_size,
            flush_interval_ms = config.flush_interval.as_millis() as u64,
            queue_capacity = config.queue_capacity,
            sync_write_timeout_ms = config.sync_write_timeout.as_millis() as u64,
            "batch ingestor started"
        );

        let worker = Worker {
            rx,
            store: Arc::clone(&store),
            batch_size: config.batch_size.max(1),
            flush_interval: config.flush_interval.max(MIN_FLUSH_INTERVAL),
            counters: Arc::clone(&counters),
            shutdown: shutdown.clone(),
        };
        let handle = tokio::spawn(worker.run());

        Self {
            tx,
            store,
            sync_write_timeout: config.sync_write_timeout,
            clock: VersionClock::new(),
            counters,
            shutdown,
            worker: parking_lot::Mutex::new(Some(handle)),
        }
    }

    /// Queue one event for the next flush.
    ///
    /// Returns without waiting for the flush. If the queue is full the event
    /// is written immediately as a single row, and a failure of that write is
    /// returned. That write gives up with [`Error::Timeout`] after
    /// `sync_write_timeout`. After [`shutdown`](Self::shutdown) this returns
    /// [`Error::IngestorClosed`].
    pub async fn submit(&self, event: Event) -> Result<()> {
        let received_at = u32::try_from(chrono::Utc::now().timestamp()).unwrap_or(u32::MAX);
        let row = EventRow::from_event(event, received_at, self.clock.next());

        match self.tx.try_send(row) {
            Ok(()) => {}
            Err(TrySendError::Full(row)) => {
                tracing::debug!(id = %row.id, "ingest queue full, writing synchronously");
                self.counters.sync_writes.fetch_add(1, Ordering::Relaxed);
                counter!("store_sync_writes_total").increment(1);
                let write = self.store.insert_events(std::slice::from_ref(&row));
                match tokio::time::timeout(self.sync_write_timeout, write).await {
                    Ok(result) => result.map_err(|e| Error::execution("events", "insert", e))?,
                    Err(_) => {
                        tracing::warn!(id = %row.id, "synchronous insert timed out");
                        return Err(Error::Timeout {
                            operation: "insert",
                            timeout: self.sync_write_timeout,
                        });
                    }
                }
            }
            Err(TrySendError::Closed(_)) => return Err(Error::IngestorClosed),
        }

        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        counter!("store_events_submitted_total").increment(1);
        Ok(())
    }

    /// Current counters.
    pub fn stats(&self) -> IngestStats {
        self.counters.snapshot()
    }

    /// Stop accepting events, flush what is buffered, and wait for the worker.
    ///
    /// Returns once the final flush has completed. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::error!(error = %e, "ingest worker panicked");
        }
    }
}

impl Drop for BatchIngestor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Single owner of the flush buffer.
struct Worker {
    rx: mpsc::Receiver<EventRow>,
    store: Arc<dyn EventStore>,
    batch_size: usize,
    flush_interval: Duration,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        let mut buffer: Vec<EventRow> = Vec::with_capacity(self.batch_size);
        let start = tokio::time::Instant::now() + self.flush_interval;
        let mut ticker = interval_at(start, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    self.rx.close();
                    while let Some(row) = self.rx.recv().await {
                        buffer.push(row);
                        self.counters.set_buffered(buffer.len());
                        if buffer.len() >= self.batch_size {
                            self.flush(&mut buffer).await;
                        }
                    }
                    break;
                }

                received = self.rx.recv() => match received {
                    Some(row) => {
                        buffer.push(row);
                        self.counters.set_buffered(buffer.len());
                        if buffer.len() >= self.batch_size {
                            self.flush(&mut buffer).await;
                            ticker.reset();
                        }
                    }
                    None => break,
                },

                _ = ticker.tick() => {
                    if !buffer.is_empty() {
                        self.flush(&mut buffer).await;
                    }
                }
            }
        }

        self.flush(&mut buffer).await;
        tracing::info!("batch ingestor stopped");
    }

    /// Write the whole buffer as one insert. The buffer is empty afterwards
    /// whether or not the write succeeded.
    async fn flush(&self, buffer: &mut Vec<EventRow>) {
        if buffer.is_empty() {
            return;
        }

        let count = buffer.len();
        let started = Instant::now();
        let result = self.store.insert_events(buffer.as_slice()).await;
        let elapsed = started.elapsed();
        buffer.clear();

        self.counters.flushes.fetch_add(1, Ordering::Relaxed);
        self.counters.set_buffered(0);
        counter!("store_flushes_total").increment(1);
        histogram!("store_flush_duration_seconds").record(elapsed.as_secs_f64());

        match result {
            Ok(()) => {
                self.counters
                    .flushed
                    .fetch_add(count as u64, Ordering::Relaxed);
                counter!("store_events_flushed_total").increment(count as u64);
                let rate = count as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
                tracing::debug!(
                    events = count,
                    duration_ms = elapsed.as_millis() as u64,
                    events_per_sec = rate as u64,
                    "flushed batch"
                );
            }
            Err(e) => {
                self.counters
                    .dropped
                    .fetch_add(count as u64, Ordering::Relaxed);
                self.counters
                    .failed_flushes
                    .fetch_add(1, Ordering::Relaxed);
                counter!("store_flush_errors_total").increment(1);
                counter!("store_events_dropped_total").increment(count as u64);
                tracing::error!(error = %e, dropped = count, "batch flush failed, events dropped");
            }
        }
    }
}
