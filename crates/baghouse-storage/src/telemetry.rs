//! Throughput Telemetry
//!
//! Every `get_messages` call produces a [`ThroughputRecord`]. Playback asks
//! for back-to-back ranges, so records are coalesced before they are
//! reported: two records are adjacent when they cover the same topics and
//! the second starts exactly one tick after the first ends.
//!
//! ## Aggregator
//!
//! ```text
//! get_messages ──record──▶ ┌──────────────────────────────┐
//!                          │ aggregator task               │
//!                          │  pending: Option<Record>      │──▶ MetadataSink
//! close ───shutdown──────▶ │  deadline: now + debounce     │    AverageThroughput
//!                          └──────────────────────────────┘
//! ```
//!
//! The task owns the single pending slot. A new record that is adjacent is
//! merged in place; anything else flushes the pending record first. Every
//! record re-arms the debounce deadline, and the pending record is flushed
//! once the deadline passes without new input, on `flush()`, or on shutdown.

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use baghouse_core::Time;

/// Bytes and messages delivered for one requested time range
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThroughputRecord {
    pub start_time: Time,
    pub end_time: Time,
    pub topics: BTreeSet<String>,
    pub total_bytes: u64,
    pub message_count: u64,
    pub requested_range_duration: Duration,
    pub received_range_duration: Duration,
    /// Wall-clock time spent serving the request
    pub transfer_duration: Duration,
}

impl ThroughputRecord {
    /// True if `next` continues this record with no gap.
    pub fn is_adjacent(&self, next: &ThroughputRecord) -> bool {
        self.topics == next.topics && self.end_time.next_tick() == next.start_time
    }

    /// Extend this record with an adjacent one.
    pub fn merge(&mut self, next: ThroughputRecord) {
        self.end_time = next.end_time;
        self.total_bytes += next.total_bytes;
        self.message_count += next.message_count;
        self.requested_range_duration += next.requested_range_duration;
        self.received_range_duration += next.received_range_duration;
        self.transfer_duration += next.transfer_duration;
    }

    pub fn bytes_per_second(&self) -> f64 {
        let secs = self.transfer_duration.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.total_bytes as f64 / secs
    }
}

/// Out-of-band reports from a provider
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Metadata {
    UpdateReconnecting { reconnecting: bool },
    AverageThroughput(ThroughputRecord),
    DataReceived { bytes: u64 },
}

/// Receives [`Metadata`] reports. Must not block.
pub trait MetadataSink: Send + Sync {
    fn notify(&self, metadata: Metadata);
}

impl<F> MetadataSink for F
where
    F: Fn(Metadata) + Send + Sync,
{
    fn notify(&self, metadata: Metadata) {
        self(metadata)
    }
}

/// Logs every report through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MetadataSink for TracingSink {
    fn notify(&self, metadata: Metadata) {
        match metadata {
            Metadata::UpdateReconnecting { reconnecting } => {
                tracing::info!(reconnecting, "Source connection state changed");
            }
            Metadata::AverageThroughput(record) => {
                tracing::info!(
                    start = %record.start_time,
                    end = %record.end_time,
                    topics = record.topics.len(),
                    messages = record.message_count,
                    bytes = record.total_bytes,
                    bytes_per_sec = record.bytes_per_second() as u64,
                    "Average throughput"
                );
            }
            Metadata::DataReceived { bytes } => {
                tracing::trace!(bytes, "Data received");
            }
        }
    }
}

enum Command {
    Record(ThroughputRecord),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the aggregator task
pub struct ThroughputAggregator {
    tx: mpsc::UnboundedSender<Command>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ThroughputAggregator {
    /// Spawn the aggregator task. Must be called from within a tokio runtime.
    pub fn spawn(sink: Arc<dyn MetadataSink>, debounce: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(rx, sink, debounce));
        Self {
            tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Queue a record. Records sent after shutdown are dropped.
    pub fn record(&self, record: ThroughputRecord) {
        if self.tx.send(Command::Record(record)).is_err() {
            tracing::debug!("Throughput aggregator stopped, dropping record");
        }
    }

    /// Emit the pending record now, if any.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Flush and stop the task. Idempotent.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Throughput aggregator task failed");
            }
        }
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<Command>,
    sink: Arc<dyn MetadataSink>,
    debounce: Duration,
) {
    let mut pending: Option<ThroughputRecord> = None;
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Record(record)) => {
                    let adjacent = pending.as_ref().map_or(false, |p| p.is_adjacent(&record));
                    if adjacent {
                        if let Some(p) = pending.as_mut() {
                            p.merge(record);
                        }
                    } else if let Some(previous) = pending.replace(record) {
                        sink.notify(Metadata::AverageThroughput(previous));
                    }
                    deadline = Some(Instant::now() + debounce);
                }
                Some(Command::Flush(ack)) => {
                    emit(&mut pending, sink.as_ref());
                    deadline = None;
                    let _ = ack.send(());
                }
                Some(Command::Shutdown(ack)) => {
                    emit(&mut pending, sink.as_ref());
                    let _ = ack.send(());
                    break;
                }
                None => {
                    emit(&mut pending, sink.as_ref());
                    break;
                }
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                emit(&mut pending, sink.as_ref());
                deadline = None;
            }
        }
    }

    tracing::debug!("Throughput aggregator stopped");
}

fn emit(pending: &mut Option<ThroughputRecord>, sink: &dyn MetadataSink) {
    if let Some(record) = pending.take() {
        sink.notify(Metadata::AverageThroughput(record));
    }
}

/// Collects every report; handy for tests and tools that inspect metadata
/// after the fact.
#[derive(Debug, Default)]
pub struct CollectingSink {
    reports: std::sync::Mutex<Vec<Metadata>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Everything received so far, in order.
    pub fn reports(&self) -> Vec<Metadata> {
        match self.reports.lock() {
            Ok(reports) => reports.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn throughput(&self) -> Vec<ThroughputRecord> {
        self.reports()
            .into_iter()
            .filter_map(|m| match m {
                Metadata::AverageThroughput(record) => Some(record),
                _ => None,
            })
            .collect()
    }

    pub fn reconnect_transitions(&self) -> Vec<bool> {
        self.reports()
            .into_iter()
            .filter_map(|m| match m {
                Metadata::UpdateReconnecting { reconnecting } => Some(reconnecting),
                _ => None,
            })
            .collect()
    }
}

impl MetadataSink for CollectingSink {
    fn notify(&self, metadata: Metadata) {
        match self.reports.lock() {
            Ok(mut reports) => reports.push(metadata),
            Err(poisoned) => poisoned.into_inner().push(metadata),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(start: u32, end: u32, topics: &[&str], bytes: u64) -> ThroughputRecord {
        let start_time = Time::new(start, 0);
        let end_time = Time::new(end, 0);
        let span = Time::inclusive_span(start_time, end_time);
        ThroughputRecord {
            start_time,
            end_time,
            topics: topics.iter().map(|t| t.to_string()).collect(),
            total_bytes: bytes,
            message_count: bytes / 10,
            requested_range_duration: span,
            received_range_duration: span,
            transfer_duration: Duration::from_millis(5),
        }
    }

    /// `record` spanning [start, end) so that the next one starts one tick later.
    fn contiguous(start: u32, end: u32, topics: &[&str], bytes: u64) -> ThroughputRecord {
        let mut r = record(start, end, topics, bytes);
        r.end_time = Time::from_nanos(Time::new(end, 0).as_nanos() - 1);
        r
    }

    // ---------------------------------------------------------------
    // Adjacency and merging
    // ---------------------------------------------------------------

    #[test]
    fn test_adjacency_requires_next_tick() {
        let a = contiguous(0, 10, &["/a"], 100);
        let b = contiguous(10, 20, &["/a"], 100);
        assert!(a.is_adjacent(&b));
        assert!(!b.is_adjacent(&a));

        let gap = contiguous(11, 20, &["/a"], 100);
        assert!(!a.is_adjacent(&gap));
    }

    #[test]
    fn test_adjacency_requires_same_topics() {
        let a = contiguous(0, 10, &["/a"], 100);
        let b = contiguous(10, 20, &["/a", "/b"], 100);
        assert!(!a.is_adjacent(&b));
    }

    #[test]
    fn test_merge_sums_and_spans() {
        let mut a = contiguous(0, 10, &["/a"], 100);
        let b = contiguous(10, 20, &["/a"], 250);
        a.merge(b.clone());
        assert_eq!(a.start_time, Time::new(0, 0));
        assert_eq!(a.end_time, b.end_time);
        assert_eq!(a.total_bytes, 350);
        assert_eq!(a.message_count, 35);
        assert_eq!(a.transfer_duration, Duration::from_millis(10));
    }

    #[test]
    fn test_merge_is_associative() {
        let a = contiguous(0, 10, &["/a"], 100);
        let b = contiguous(10, 20, &["/a"], 200);
        let c = contiguous(20, 30, &["/a"], 300);

        let mut left = a.clone();
        left.merge(b.clone());
        left.merge(c.clone());

        let mut bc = b;
        bc.merge(c);
        let mut right = a;
        right.merge(bc);

        assert_eq!(left, right);
    }

    #[test]
    fn test_bytes_per_second() {
        let mut r = record(0, 1, &["/a"], 1000);
        r.transfer_duration = Duration::from_millis(500);
        assert_eq!(r.bytes_per_second(), 2000.0);
        r.transfer_duration = Duration::ZERO;
        assert_eq!(r.bytes_per_second(), 0.0);
    }

    // ---------------------------------------------------------------
    // Aggregator task
    // ---------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_adjacent_records_merge_until_debounce() {
        let sink = CollectingSink::new();
        let aggregator = ThroughputAggregator::spawn(sink.clone(), Duration::from_secs(1));

        aggregator.record(contiguous(0, 10, &["/a"], 100));
        aggregator.record(contiguous(10, 20, &["/a"], 100));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(sink.throughput().is_empty());

        aggregator.record(contiguous(20, 30, &["/a"], 100));
        // The third record re-armed the deadline.
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(sink.throughput().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let emitted = sink.throughput();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].total_bytes, 300);
        assert_eq!(emitted[0].start_time, Time::new(0, 0));

        aggregator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_adjacent_record_flushes_pending() {
        let sink = CollectingSink::new();
        let aggregator = ThroughputAggregator::spawn(sink.clone(), Duration::from_secs(1));

        aggregator.record(contiguous(0, 10, &["/a"], 100));
        aggregator.record(contiguous(50, 60, &["/a"], 200));
        aggregator.flush().await;

        let emitted = sink.throughput();
        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[0].total_bytes, 100);
        assert_eq!(emitted[1].total_bytes, 200);

        aggregator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_with_nothing_pending() {
        let sink = CollectingSink::new();
        let aggregator = ThroughputAggregator::spawn(sink.clone(), Duration::from_secs(1));
        aggregator.flush().await;
        aggregator.shutdown().await;
        assert!(sink.reports().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_and_is_idempotent() {
        let sink = CollectingSink::new();
        let aggregator = ThroughputAggregator::spawn(sink.clone(), Duration::from_secs(1));

        aggregator.record(contiguous(0, 10, &["/a"], 100));
        aggregator.shutdown().await;
        aggregator.shutdown().await;
        assert_eq!(sink.throughput().len(), 1);

        // Dropped quietly after shutdown.
        aggregator.record(contiguous(10, 20, &["/a"], 100));
        aggregator.flush().await;
        assert_eq!(sink.throughput().len(), 1);
    }

    #[test]
    fn test_metadata_serialization() {
        let json =
            serde_json::to_value(Metadata::UpdateReconnecting { reconnecting: true }).unwrap();
        assert_eq!(json["type"], "update_reconnecting");
        assert_eq!(json["reconnecting"], true);
    }

    #[test]
    fn test_closure_sink() {
        let seen = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let counter = seen.clone();
        let sink = move |m: Metadata| {
            if let Metadata::DataReceived { bytes } = m {
                counter.fetch_add(bytes, std::sync::atomic::Ordering::SeqCst);
            }
        };
        sink.notify(Metadata::DataReceived { bytes: 42 });
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 42);
    }
}
