//! Caching Byte-Range Reader
//!
//! `CachedFilelike` sits between the bag parser and a [`FileReader`]. The
//! parser asks for arbitrary `(offset, length)` ranges; the cache answers
//! from memory where it can and fetches only the missing pieces.
//!
//! ## How It Works
//!
//! ```text
//! fetch(offset=100, length=400)
//!         ↓
//! Plan against cached ranges:   [  0..150 )        [ 300..350 )
//!                                     │                  │
//!   segments:   Cached(100..150)  Missing(150..300)  Cached(300..350)  Missing(350..500)
//!         ↓
//! Pin the cached entries (never evicted while this read is in flight)
//!         ↓
//! Yield segments in order; Missing ranges are fetched from the source,
//! inserted into the cache, then yielded
//!         ↓
//! Unpin when the stream finishes or is dropped
//! ```
//!
//! Entries are keyed by their start offset in an ordered map and never
//! overlap: an insert is trimmed to the sub-ranges no other entry covers.
//!
//! ## Byte Budget and LRU Eviction
//!
//! `cache_size_bytes` is a hard ceiling. Before an insert, least recently
//! used entries are evicted until the new bytes fit. Pinned entries are
//! skipped. If room can't be made (everything left is pinned, or the range
//! is larger than the whole budget) the bytes are handed back uncached.
//!
//! ## Reconnects
//!
//! A missing range is fetched with resume: if the source stream fails part
//! way, the next attempt starts at the first byte not yet received. Waits
//! follow the [`RetryPolicy`](crate::retry::RetryPolicy). The observer sees
//! `UpdateReconnecting { reconnecting: true }` when the first fetch starts
//! retrying and `false` once no fetch is retrying any more, whether it
//! recovered or gave up.
//!
//! ## Usage
//!
//! ```ignore
//! use baghouse_storage::{CacheConfig, CachedFilelike, LocalFileReader};
//!
//! let cache = CachedFilelike::new(Arc::new(LocalFileReader::new("run.bag")), CacheConfig::default());
//! let size = cache.open().await?;
//! let header = cache.read(0, 4096).await?;
//! ```

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use lru::LruCache;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use baghouse_observability::metrics;

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::source::FileReader;
use crate::telemetry::{Metadata, MetadataSink};

/// Byte-range cache over a [`FileReader`]
#[derive(Clone)]
pub struct CachedFilelike {
    inner: Arc<Inner>,
}

struct Inner {
    source: Arc<dyn FileReader>,
    config: CacheConfig,
    state: Mutex<CacheState>,
    observer: Option<Arc<dyn MetadataSink>>,
    /// Number of fetches currently between a failure and a successful resume
    reconnecting: AtomicUsize,
    closed: watch::Sender<bool>,
}

struct CacheEntry {
    data: Bytes,
    /// In-flight reads that will yield bytes from this entry
    pins: usize,
}

#[derive(Debug)]
enum Segment {
    Cached(Bytes),
    Missing(Range<u64>),
}

struct CacheState {
    size: Option<u64>,
    closed: bool,
    /// start offset → entry
    entries: BTreeMap<u64, CacheEntry>,
    /// Access order of entry start offsets
    lru: LruCache<u64, ()>,
    current_size: u64,
}

impl CachedFilelike {
    pub fn new(source: Arc<dyn FileReader>, config: CacheConfig) -> Self {
        Self::build(source, config, None)
    }

    /// Like [`new`](Self::new), reporting reconnect transitions to `observer`.
    pub fn with_observer(
        source: Arc<dyn FileReader>,
        config: CacheConfig,
        observer: Arc<dyn MetadataSink>,
    ) -> Self {
        Self::build(source, config, Some(observer))
    }

    fn build(
        source: Arc<dyn FileReader>,
        config: CacheConfig,
        observer: Option<Arc<dyn MetadataSink>>,
    ) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                source,
                config,
                state: Mutex::new(CacheState {
                    size: None,
                    closed: false,
                    entries: BTreeMap::new(),
                    lru: LruCache::unbounded(),
                    current_size: 0,
                }),
                observer,
                reconnecting: AtomicUsize::new(0),
                closed,
            }),
        }
    }

    /// Open the source and return its size. Later calls return the same size.
    pub async fn open(&self) -> Result<u64> {
        {
            let state = self.inner.state.lock().await;
            if state.closed {
                return Err(Error::Closed);
            }
            if let Some(size) = state.size {
                return Ok(size);
            }
        }

        let size = self
            .inner
            .source
            .open()
            .await
            .map_err(|e| Error::Open(e.to_string()))?;

        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Err(Error::Closed);
        }
        state.size = Some(size);

        tracing::info!(
            source = self.inner.source.kind(),
            size,
            cache_size_bytes = self.inner.config.cache_size_bytes,
            "Opened cached reader"
        );
        Ok(size)
    }

    /// Total size, once opened
    pub async fn size(&self) -> Option<u64> {
        self.inner.state.lock().await.size
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Stream the bytes of `[offset, offset + length)` as consecutive segments.
    ///
    /// The stream is lazy: nothing is planned or fetched until it is polled.
    pub fn fetch(&self, offset: u64, length: u64) -> BoxStream<'static, Result<Bytes>> {
        let read = PendingRead {
            inner: self.inner.clone(),
            offset,
            length,
            plan: None,
        };

        stream::try_unfold(read, |mut read| async move {
            if *read.inner.closed.borrow() {
                return Err(Error::Closed);
            }
            if read.plan.is_none() {
                let plan = read.inner.plan(read.offset, read.length).await?;
                read.plan = Some(plan);
            }

            let next = read.plan.as_mut().and_then(|plan| plan.segments.pop_front());
            match next {
                None => Ok(None),
                Some(Segment::Cached(data)) => Ok(Some((data, read))),
                Some(Segment::Missing(range)) => {
                    let data = read.inner.load(range).await?;
                    Ok(Some((data, read)))
                }
            }
        })
        .boxed()
    }

    /// Read `[offset, offset + length)` into one contiguous buffer.
    pub async fn read(&self, offset: u64, length: u64) -> Result<Bytes> {
        let segments: Vec<Bytes> = self.fetch(offset, length).try_collect().await?;
        if segments.len() == 1 {
            return Ok(segments.into_iter().next().unwrap_or_default());
        }
        let mut buf = BytesMut::with_capacity(length as usize);
        for segment in &segments {
            buf.extend_from_slice(segment);
        }
        Ok(buf.freeze())
    }

    /// Drop all cached bytes and cancel in-flight fetches. Idempotent.
    pub async fn close(&self) {
        self.inner.closed.send_replace(true);

        let mut state = self.inner.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        state.entries.clear();
        state.lru.clear();
        state.current_size = 0;
        metrics::CACHE_SIZE_BYTES.set(0);

        tracing::debug!(source = self.inner.source.kind(), "Closed cached reader");
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock().await;
        let max_size = self.inner.config.cache_size_bytes;
        let utilization_pct = if max_size == 0 {
            0.0
        } else {
            state.current_size as f64 / max_size as f64 * 100.0
        };

        CacheStats {
            current_size: state.current_size,
            max_size,
            entry_count: state.entries.len(),
            utilization_pct,
        }
    }
}

impl Inner {
    async fn plan(self: &Arc<Self>, offset: u64, length: u64) -> Result<ReadPlan> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(Error::Closed);
        }
        let size = state.size.ok_or(Error::NotOpen)?;
        let end = offset
            .checked_add(length)
            .filter(|end| *end <= size)
            .ok_or(Error::OutOfRange {
                offset,
                length,
                size,
            })?;

        let (segments, pinned) = state.plan(offset..end);
        drop(state);

        let missing = segments
            .iter()
            .filter(|s| matches!(s, Segment::Missing(_)))
            .count();
        if !pinned.is_empty() {
            metrics::CACHE_HITS_TOTAL.inc();
        }
        metrics::CACHE_MISSES_TOTAL.inc_by(missing as u64);

        tracing::debug!(
            offset,
            length,
            cached = pinned.len(),
            missing,
            "Planned read"
        );

        Ok(ReadPlan {
            segments,
            _pins: PinGuard {
                inner: self.clone(),
                keys: pinned,
            },
        })
    }

    /// Fetch a missing range from the source and cache it.
    async fn load(&self, range: Range<u64>) -> Result<Bytes> {
        let data = self.fetch_with_resume(range.clone()).await?;

        let mut state = self.state.lock().await;
        if !state.closed && !state.insert(range.start, &data, self.config.cache_size_bytes) {
            tracing::debug!(
                offset = range.start,
                size = data.len(),
                "Range returned without caching"
            );
        }
        Ok(data)
    }

    async fn fetch_with_resume(&self, range: Range<u64>) -> Result<Bytes> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(Error::Closed);
        }

        let policy = &self.config.retry;
        let total = (range.end - range.start) as usize;
        let mut buf = BytesMut::with_capacity(total);
        let mut attempt = 0;
        let mut reconnecting: Option<ReconnectGuard<'_>> = None;

        let result = loop {
            let received_before = buf.len();
            let position = range.start + received_before as u64;

            let error = match self.read_into(&mut buf, position, total, &mut closed).await {
                Ok(()) => break Ok(()),
                Err(Interrupted::Closed) => break Err(Error::Closed),
                Err(Interrupted::Io(e)) => e,
            };

            if !policy.is_retryable(&error) {
                tracing::warn!(
                    offset = position,
                    error = %error,
                    "Non-retryable source error, giving up"
                );
                break Err(Error::Transfer(error.to_string()));
            }

            // Progress resets the attempt budget.
            if buf.len() > received_before {
                attempt = 0;
            }
            if attempt >= policy.max_retries {
                tracing::warn!(
                    offset = position,
                    max_retries = policy.max_retries,
                    error = %error,
                    "Max retries exhausted, giving up"
                );
                break Err(Error::Transfer(error.to_string()));
            }

            if reconnecting.is_none() {
                reconnecting = Some(ReconnectGuard::begin(self));
            }

            let backoff = policy.delay(attempt);
            tracing::warn!(
                offset = range.start + buf.len() as u64,
                attempt = attempt + 1,
                max_retries = policy.max_retries,
                backoff_ms = backoff.as_millis() as u64,
                error = %error,
                "Source fetch failed, reconnecting"
            );
            metrics::RECONNECTS_TOTAL.inc();

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = closed.changed() => break Err(Error::Closed),
            }
            attempt += 1;
        };

        drop(reconnecting);
        result?;
        Ok(buf.freeze())
    }

    /// Append bytes from the source to `buf` until it holds `total` bytes.
    async fn read_into(
        &self,
        buf: &mut BytesMut,
        position: u64,
        total: usize,
        closed: &mut watch::Receiver<bool>,
    ) -> std::result::Result<(), Interrupted> {
        let mut stream = self
            .source
            .fetch(position, (total - buf.len()) as u64);

        loop {
            tokio::select! {
                next = stream.next() => match next {
                    Some(Ok(segment)) => {
                        let take = segment.len().min(total - buf.len());
                        buf.extend_from_slice(&segment[..take]);
                        if buf.len() == total {
                            return Ok(());
                        }
                    }
                    Some(Err(e)) => return Err(Interrupted::Io(e)),
                    None if buf.len() == total => return Ok(()),
                    None => {
                        return Err(Interrupted::Io(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "source stream ended early",
                        )))
                    }
                },
                _ = closed.changed() => return Err(Interrupted::Closed),
            }
        }
    }

    fn begin_reconnect(&self) {
        if self.reconnecting.fetch_add(1, Ordering::SeqCst) == 0 {
            self.report_reconnecting(true);
        }
    }

    fn end_reconnect(&self) {
        if self.reconnecting.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.report_reconnecting(false);
        }
    }

    fn report_reconnecting(&self, reconnecting: bool) {
        tracing::info!(source = self.source.kind(), reconnecting, "Reconnect state changed");
        if let Some(observer) = &self.observer {
            observer.notify(Metadata::UpdateReconnecting { reconnecting });
        }
    }
}

enum Interrupted {
    Closed,
    Io(io::Error),
}

impl CacheState {
    /// Split `range` into cached slices and missing gaps, pinning and
    /// touching every entry used.
    fn plan(&mut self, range: Range<u64>) -> (VecDeque<Segment>, Vec<u64>) {
        let mut segments = VecDeque::new();
        let mut pinned = Vec::new();
        let mut position = range.start;

        for key in self.candidate_keys(&range) {
            let Some(entry) = self.entries.get_mut(&key) else {
                continue;
            };
            let entry_end = key + entry.data.len() as u64;
            if entry_end <= position {
                continue;
            }
            if key > position {
                segments.push_back(Segment::Missing(position..key));
            }
            let from = key.max(position);
            let to = entry_end.min(range.end);
            segments.push_back(Segment::Cached(
                entry.data.slice((from - key) as usize..(to - key) as usize),
            ));
            entry.pins += 1;
            pinned.push(key);
            self.lru.get(&key);
            position = to;
        }

        if position < range.end {
            segments.push_back(Segment::Missing(position..range.end));
        }
        (segments, pinned)
    }

    /// Start offsets of entries that may intersect `range`, in order.
    fn candidate_keys(&self, range: &Range<u64>) -> Vec<u64> {
        let before = self
            .entries
            .range(..range.start)
            .next_back()
            .map(|(key, _)| *key);
        before
            .into_iter()
            .chain(self.entries.range(range.clone()).map(|(key, _)| *key))
            .collect()
    }

    /// Sub-ranges of `range` that no entry covers.
    fn uncovered(&self, range: Range<u64>) -> Vec<Range<u64>> {
        let mut gaps = Vec::new();
        let mut position = range.start;
        for key in self.candidate_keys(&range) {
            let Some(entry) = self.entries.get(&key) else {
                continue;
            };
            let entry_end = key + entry.data.len() as u64;
            if entry_end <= position {
                continue;
            }
            if key > position {
                gaps.push(position..key);
            }
            position = entry_end.min(range.end);
        }
        if position < range.end {
            gaps.push(position..range.end);
        }
        gaps
    }

    /// Cache `data` (which starts at `start`), skipping bytes already cached.
    ///
    /// Returns false if any part could not be cached.
    fn insert(&mut self, start: u64, data: &Bytes, max_size: u64) -> bool {
        let end = start + data.len() as u64;
        let mut cached_all = true;

        for gap in self.uncovered(start..end) {
            let len = gap.end - gap.start;
            if !self.make_room(len, max_size) {
                cached_all = false;
                continue;
            }
            let slice = data.slice((gap.start - start) as usize..(gap.end - start) as usize);
            self.entries.insert(gap.start, CacheEntry { data: slice, pins: 0 });
            self.lru.put(gap.start, ());
            self.current_size += len;

            tracing::debug!(offset = gap.start, size = len, "Cached range");
        }

        metrics::CACHE_SIZE_BYTES.set(self.current_size as i64);
        cached_all
    }

    /// Evict LRU unpinned entries until `needed` more bytes fit.
    fn make_room(&mut self, needed: u64, max_size: u64) -> bool {
        if needed > max_size {
            tracing::debug!(needed, max_size, "Range larger than cache budget");
            return false;
        }

        while self.current_size + needed > max_size {
            let victim = self
                .lru
                .iter()
                .rev()
                .map(|(key, _)| *key)
                .find(|key| self.entries.get(key).map_or(true, |e| e.pins == 0));

            let Some(key) = victim else {
                tracing::debug!(
                    needed,
                    current_size = self.current_size,
                    "No unpinned entries left to evict"
                );
                return false;
            };

            self.lru.pop(&key);
            if let Some(entry) = self.entries.remove(&key) {
                let size = entry.data.len() as u64;
                self.current_size = self.current_size.saturating_sub(size);
                metrics::CACHE_EVICTIONS_TOTAL.inc();
                tracing::debug!(offset = key, size, "Evicted from cache");
            }
        }
        true
    }

    fn unpin(&mut self, keys: &[u64]) {
        for key in keys {
            if let Some(entry) = self.entries.get_mut(key) {
                entry.pins = entry.pins.saturating_sub(1);
            }
        }
    }
}

struct PendingRead {
    inner: Arc<Inner>,
    offset: u64,
    length: u64,
    plan: Option<ReadPlan>,
}

struct ReadPlan {
    segments: VecDeque<Segment>,
    _pins: PinGuard,
}

/// Releases pins when a read finishes or its stream is dropped
struct PinGuard {
    inner: Arc<Inner>,
    keys: Vec<u64>,
}

/// Holds the shared reconnecting state for one fetch.
///
/// Dropping the guard ends the reconnect, including when the fetch future
/// itself is dropped mid-backoff.
struct ReconnectGuard<'a> {
    inner: &'a Inner,
}

impl<'a> ReconnectGuard<'a> {
    fn begin(inner: &'a Inner) -> Self {
        inner.begin_reconnect();
        Self { inner }
    }
}

impl Drop for ReconnectGuard<'_> {
    fn drop(&mut self) {
        self.inner.end_reconnect();
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        if self.keys.is_empty() {
            return;
        }
        let keys = std::mem::take(&mut self.keys);
        match self.inner.state.try_lock() {
            Ok(mut state) => state.unpin(&keys),
            Err(_) => {
                let inner = self.inner.clone();
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(async move {
                            inner.state.lock().await.unpin(&keys);
                        });
                    }
                    Err(_) => tracing::warn!(
                        pinned = keys.len(),
                        "Dropped read outside a runtime; entries stay pinned"
                    ),
                }
            }
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Current total size of cached ranges
    pub current_size: u64,

    /// Maximum allowed cache size
    pub max_size: u64,

    /// Number of cached ranges
    pub entry_count: usize,

    /// Cache utilization percentage (0-100)
    pub utilization_pct: f64,
}
