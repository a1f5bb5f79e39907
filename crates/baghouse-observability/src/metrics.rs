//! Prometheus Metrics
//!
//! Every metric lives in the global [`REGISTRY`]. The statics are created
//! lazily and can be updated before [`init`] runs; `init` only makes them
//! visible to the exporter.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Once;

static INIT: Once = Once::new();

lazy_static! {
    /// Global Prometheus metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Cache Metrics
    // ============================================================================

    /// Reads served (fully or partly) from cached ranges
    pub static ref CACHE_HITS_TOTAL: IntCounter = IntCounter::new(
        "baghouse_cache_hits_total",
        "Total byte-range reads served from cache"
    ).expect("metric can be created");

    /// Ranges that had to be fetched from the source
    pub static ref CACHE_MISSES_TOTAL: IntCounter = IntCounter::new(
        "baghouse_cache_misses_total",
        "Total byte ranges fetched from the source"
    ).expect("metric can be created");

    /// Bytes currently held by the cache
    pub static ref CACHE_SIZE_BYTES: IntGauge = IntGauge::new(
        "baghouse_cache_size_bytes",
        "Current cache size in bytes"
    ).expect("metric can be created");

    /// Ranges evicted to stay under the byte budget
    pub static ref CACHE_EVICTIONS_TOTAL: IntCounter = IntCounter::new(
        "baghouse_cache_evictions_total",
        "Total cache entries evicted"
    ).expect("metric can be created");

    // ============================================================================
    // Source Metrics
    // ============================================================================

    /// Bytes received from byte sources
    pub static ref BYTES_FETCHED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("baghouse_bytes_fetched_total", "Total bytes received from sources"),
        &["source"] // file, http, memory, reader
    ).expect("metric can be created");

    /// Reconnect attempts after a transient transfer failure
    pub static ref RECONNECTS_TOTAL: IntCounter = IntCounter::new(
        "baghouse_reconnects_total",
        "Total reconnect attempts"
    ).expect("metric can be created");

    // ============================================================================
    // Provider Metrics
    // ============================================================================

    /// Messages returned to consumers
    pub static ref MESSAGES_READ_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("baghouse_messages_read_total", "Total messages returned"),
        &["topic"]
    ).expect("metric can be created");

    /// Chunks that could not be decoded
    pub static ref CHUNK_DECODE_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("baghouse_chunk_decode_failures_total", "Total chunk decode failures"),
        &["reason"] // codec, format
    ).expect("metric can be created");

    /// Latency of get_messages calls
    pub static ref GET_MESSAGES_LATENCY: HistogramVec = HistogramVec::new(
        HistogramOpts::new("baghouse_get_messages_latency_seconds", "get_messages latency in seconds")
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["outcome"] // ok, error
    ).expect("metric can be created");
}

/// Register every metric with [`REGISTRY`]. Safe to call more than once.
pub fn init() {
    INIT.call_once(|| {
        // Cache metrics
        REGISTRY
            .register(Box::new(CACHE_HITS_TOTAL.clone()))
            .expect("cache_hits_total can be registered");
        REGISTRY
            .register(Box::new(CACHE_MISSES_TOTAL.clone()))
            .expect("cache_misses_total can be registered");
        REGISTRY
            .register(Box::new(CACHE_SIZE_BYTES.clone()))
            .expect("cache_size_bytes can be registered");
        REGISTRY
            .register(Box::new(CACHE_EVICTIONS_TOTAL.clone()))
            .expect("cache_evictions_total can be registered");

        // Source metrics
        REGISTRY
            .register(Box::new(BYTES_FETCHED_TOTAL.clone()))
            .expect("bytes_fetched_total can be registered");
        REGISTRY
            .register(Box::new(RECONNECTS_TOTAL.clone()))
            .expect("reconnects_total can be registered");

        // Provider metrics
        REGISTRY
            .register(Box::new(MESSAGES_READ_TOTAL.clone()))
            .expect("messages_read_total can be registered");
        REGISTRY
            .register(Box::new(CHUNK_DECODE_FAILURES_TOTAL.clone()))
            .expect("chunk_decode_failures_total can be registered");
        REGISTRY
            .register(Box::new(GET_MESSAGES_LATENCY.clone()))
            .expect("get_messages_latency can be registered");

        tracing::debug!("Registered baghouse metrics");
    });
}
