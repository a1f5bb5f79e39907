//! Bag Data Provider
//!
//! `BagDataProvider` answers "all messages on these topics between `start`
//! and `end`" for one bag, reading as little of it as possible.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized ──initialize()──▶ Opening ──▶ Ready ──close()──▶ Closed
//!                                    │
//!                                    └──▶ Failed (source unreachable, empty, corrupt)
//! ```
//!
//! ## Read Path
//!
//! ```text
//! get_messages(start, end, topics)
//!         ↓
//! topics → connection ids (valid connections only)
//!         ↓
//! chunk infos with start <= end && end >= start and a wanted connection
//!         ↓
//! fetch + decompress selected chunks (bounded concurrency, via the cache)
//!         ↓
//! extract messages within [start, end], stable sort by receive time
//!         ↓
//! queue a ThroughputRecord with the aggregator
//! ```
//!
//! A chunk that fails to decompress or decode becomes an error [`Problem`];
//! the other chunks still contribute. A transfer failure fails the call but
//! leaves the provider usable.
//!
//! ## Example
//!
//! ```ignore
//! let provider = BagDataProvider::new(BagSource::parse("run.bag"), ProviderConfig::default());
//! let init = provider.initialize(Arc::new(TracingSink)).await?;
//! let result = provider
//!     .get_messages(init.start, init.end, &["/odom".to_string()])
//!     .await?;
//! provider.close().await;
//! ```

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use baghouse_core::{
    ChunkInfo, CodecRegistry, Connection, ConnectionRecord, MessageEvent, Time,
};
use baghouse_observability::metrics;

use crate::bag::{count_overlapping_chunks, BagReader};
use crate::cache::{CacheStats, CachedFilelike};
use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::problem::Problem;
use crate::source::{BagSource, MeteredReader};
use crate::telemetry::{MetadataSink, ThroughputAggregator, ThroughputRecord};

/// A channel as presented to consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Topic {
    pub name: String,
    pub datatype: String,
    /// Messages on this topic according to the chunk index
    pub num_messages: u64,
}

/// Raw (unparsed) message definitions keyed by topic
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessageDefinitions {
    pub definitions_by_topic: BTreeMap<String, String>,
    pub md5sum_by_topic: BTreeMap<String, String>,
}

/// Result of a successful [`BagDataProvider::initialize`]
#[derive(Debug, Clone, Serialize)]
pub struct InitializationResult {
    pub start: Time,
    pub end: Time,
    pub topics: Vec<Topic>,
    pub connections: Vec<Connection>,
    pub message_definitions: MessageDefinitions,
    pub problems: Vec<Problem>,
}

#[derive(Debug, Default)]
pub struct GetMessagesResult {
    /// Sorted by receive time; ties keep chunk order
    pub messages: Vec<MessageEvent>,
    pub problems: Vec<Problem>,
}

/// Coarse provider state, for callers and tools
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    Uninitialized,
    Opening,
    Ready,
    Closed,
    Failed,
}

enum ProviderState {
    Uninitialized,
    Opening,
    Ready(Arc<ReadyBag>),
    Closed,
    Failed(String),
}

/// Everything that exists once the index has been read
struct ReadyBag {
    bag: BagReader,
    cache: CachedFilelike,
    aggregator: ThroughputAggregator,
    /// Valid connections only
    topic_by_connection: HashMap<u32, String>,
    init: InitializationResult,
}

/// Time-ranged message access to a single bag
pub struct BagDataProvider {
    source: BagSource,
    config: ProviderConfig,
    codecs: Arc<CodecRegistry>,
    state: Mutex<ProviderState>,
}

impl BagDataProvider {
    pub fn new(source: BagSource, config: ProviderConfig) -> Self {
        Self::with_codecs(source, config, CodecRegistry::shared())
    }

    /// Use a custom codec table (e.g. with extra compression tags).
    pub fn with_codecs(
        source: BagSource,
        config: ProviderConfig,
        codecs: Arc<CodecRegistry>,
    ) -> Self {
        Self {
            source,
            config,
            codecs,
            state: Mutex::new(ProviderState::Uninitialized),
        }
    }

    pub async fn status(&self) -> ProviderStatus {
        match &*self.state.lock().await {
            ProviderState::Uninitialized => ProviderStatus::Uninitialized,
            ProviderState::Opening => ProviderStatus::Opening,
            ProviderState::Ready(_) => ProviderStatus::Ready,
            ProviderState::Closed => ProviderStatus::Closed,
            ProviderState::Failed(_) => ProviderStatus::Failed,
        }
    }

    /// Open the bag and read its index.
    ///
    /// `sink` receives reconnect transitions, received-byte reports, and
    /// debounced throughput records for the lifetime of the provider.
    /// Calling this again once ready returns the same result.
    pub async fn initialize(&self, sink: Arc<dyn MetadataSink>) -> Result<InitializationResult> {
        {
            let mut state = self.state.lock().await;
            match &*state {
                ProviderState::Uninitialized => {}
                ProviderState::Opening => {
                    return Err(Error::Open("initialization already in progress".to_string()))
                }
                ProviderState::Ready(ready) => return Ok(ready.init.clone()),
                ProviderState::Closed => return Err(Error::Closed),
                ProviderState::Failed(reason) => {
                    return Err(Error::Open(format!("provider failed: {}", reason)))
                }
            }
            *state = ProviderState::Opening;
        }

        let opened = self.open_bag(sink).await;

        let mut state = self.state.lock().await;
        if matches!(*state, ProviderState::Closed) {
            // Closed while opening.
            if let Ok(ready) = opened {
                ready.aggregator.shutdown().await;
                ready.cache.close().await;
            }
            return Err(Error::Closed);
        }

        match opened {
            Ok(ready) => {
                let ready = Arc::new(ready);
                let init = ready.init.clone();
                *state = ProviderState::Ready(ready);
                Ok(init)
            }
            Err(e) => {
                tracing::warn!(
                    source = %self.source,
                    error = %e,
                    user_error = e.is_user_error(),
                    "Failed to open bag"
                );
                *state = ProviderState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    async fn open_bag(&self, sink: Arc<dyn MetadataSink>) -> Result<ReadyBag> {
        let reader = self.source.clone().into_reader(self.config.http_timeout)?;
        let metered = Arc::new(MeteredReader::new(reader, Some(sink.clone())));
        let cache = CachedFilelike::with_observer(metered, self.config.cache.clone(), sink.clone());

        let bag = match BagReader::open(cache.clone(), self.codecs.clone()).await {
            Ok(bag) => bag,
            Err(e) => {
                cache.close().await;
                return Err(e);
            }
        };

        let (init, topic_by_connection) = match self.summarize(&bag) {
            Ok(summary) => summary,
            Err(e) => {
                cache.close().await;
                return Err(e);
            }
        };

        for problem in &init.problems {
            tracing::warn!(source = %self.source, problem = %problem, "Bag problem");
        }
        tracing::info!(
            source = %self.source,
            start = %init.start,
            end = %init.end,
            topics = init.topics.len(),
            chunks = bag.chunk_infos().len(),
            "Bag ready"
        );

        Ok(ReadyBag {
            bag,
            cache,
            aggregator: ThroughputAggregator::spawn(sink, self.config.telemetry_debounce),
            topic_by_connection,
            init,
        })
    }

    /// Validate connections and build the initialization result.
    fn summarize(&self, bag: &BagReader) -> Result<(InitializationResult, HashMap<u32, String>)> {
        let mut problems = Vec::new();
        let mut connections = Vec::new();
        let mut invalid = Vec::new();
        for record in bag.connection_records() {
            match record.validate() {
                Some(connection) => connections.push(connection),
                None => invalid.push(record),
            }
        }

        if !invalid.is_empty() {
            problems.push(Problem::warning("Empty connections found").with_detail(format!(
                "This bag has {} connection(s) missing a topic, type, or md5sum; \
                 the remaining topics are still readable: {}",
                invalid.len(),
                describe_connections(&invalid)
            )));
        }

        let (start, end) = match (bag.start_time(), bag.end_time()) {
            (Some(start), Some(end)) if !connections.is_empty() => (start, end),
            _ => return Err(Error::CorruptIndex("Bag is empty or corrupt".to_string())),
        };

        let chunks = bag.chunk_infos();
        let overlapping = count_overlapping_chunks(chunks);
        if overlapping as f64 > chunks.len() as f64 * self.config.overlap_warning_fraction {
            problems.push(
                Problem::warning("Bag is unsorted, which is slow").with_detail(format!(
                    "This bag has many overlapping chunks ({} out of {}), so loading a time \
                     range decompresses many chunks. Sort messages by receive time when \
                     generating the bag.",
                    overlapping,
                    chunks.len()
                )),
            );
        }

        let mut message_definitions = MessageDefinitions::default();
        let mut topic_by_connection = HashMap::new();
        for connection in &connections {
            message_definitions
                .definitions_by_topic
                .insert(connection.topic.clone(), connection.message_definition.clone());
            message_definitions
                .md5sum_by_topic
                .insert(connection.topic.clone(), connection.md5sum.clone());
            topic_by_connection.insert(connection.id, connection.topic.clone());
        }

        let init = InitializationResult {
            start,
            end,
            topics: topics_from(&connections, chunks),
            connections,
            message_definitions,
            problems,
        };
        Ok((init, topic_by_connection))
    }

    async fn ready(&self) -> Result<Arc<ReadyBag>> {
        match &*self.state.lock().await {
            ProviderState::Ready(ready) => Ok(ready.clone()),
            ProviderState::Closed => Err(Error::Closed),
            _ => Err(Error::NotOpen),
        }
    }

    /// Messages on `topics` with `start <= receive_time <= end`.
    pub async fn get_messages(
        &self,
        start: Time,
        end: Time,
        topics: &[String],
    ) -> Result<GetMessagesResult> {
        let ready = self.ready().await?;
        if start > end || topics.is_empty() {
            return Ok(GetMessagesResult::default());
        }

        let timer = Instant::now();
        let result = self.read_range(&ready, start, end, topics).await;
        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::GET_MESSAGES_LATENCY
            .with_label_values(&[outcome])
            .observe(timer.elapsed().as_secs_f64());

        let result = result?;
        let total_bytes = result.messages.iter().map(|m| m.payload.len() as u64).sum();
        let span = Time::inclusive_span(start, end);
        ready.aggregator.record(ThroughputRecord {
            start_time: start,
            end_time: end,
            topics: topics.iter().cloned().collect(),
            total_bytes,
            message_count: result.messages.len() as u64,
            requested_range_duration: span,
            received_range_duration: span,
            transfer_duration: timer.elapsed(),
        });
        Ok(result)
    }

    async fn read_range(
        &self,
        ready: &ReadyBag,
        start: Time,
        end: Time,
        topics: &[String],
    ) -> Result<GetMessagesResult> {
        let wanted: BTreeSet<&str> = topics.iter().map(String::as_str).collect();
        let connection_ids: BTreeSet<u32> = ready
            .topic_by_connection
            .iter()
            .filter(|(_, topic)| wanted.contains(topic.as_str()))
            .map(|(id, _)| *id)
            .collect();
        if connection_ids.is_empty() {
            return Ok(GetMessagesResult::default());
        }

        let selected: Vec<&ChunkInfo> = ready
            .bag
            .chunk_infos()
            .iter()
            .filter(|c| c.overlaps_time(start, end) && c.contains_any(&connection_ids))
            .collect();

        tracing::debug!(
            start = %start,
            end = %end,
            topics = topics.len(),
            chunks = selected.len(),
            "Reading messages"
        );

        let reads: Vec<_> = selected
            .iter()
            .copied()
            .map(|info| async move { (info, ready.bag.read_chunk(info).await) })
            .collect();
        let chunks: Vec<_> = stream::iter(reads)
            .buffered(self.config.fetch_concurrency.max(1))
            .collect()
            .await;

        let mut result = GetMessagesResult::default();
        for (info, chunk) in chunks {
            let messages = chunk
                .and_then(|data| BagReader::read_messages(data, &connection_ids, start, end));
            match messages {
                Ok(messages) => {
                    for message in messages {
                        let Some(topic) = ready.topic_by_connection.get(&message.conn) else {
                            continue;
                        };
                        metrics::MESSAGES_READ_TOTAL
                            .with_label_values(&[topic.as_str()])
                            .inc();
                        result.messages.push(MessageEvent {
                            topic: topic.clone(),
                            receive_time: message.time,
                            payload: message.data,
                        });
                    }
                }
                Err(e @ (Error::Codec(_) | Error::Core(_))) => {
                    let reason = if matches!(e, Error::Codec(_)) { "codec" } else { "format" };
                    metrics::CHUNK_DECODE_FAILURES_TOTAL
                        .with_label_values(&[reason])
                        .inc();
                    tracing::warn!(chunk_pos = info.chunk_pos, error = %e, "Skipping unreadable chunk");
                    result.problems.push(Problem::error(
                        format!("Failed to read chunk at byte {}", info.chunk_pos),
                        &e,
                    ));
                }
                Err(e) => return Err(e),
            }
        }

        if ready.cache.is_closed() {
            return Err(Error::Closed);
        }

        result.messages.sort_by_key(|m| m.receive_time);
        Ok(result)
    }

    /// Cache statistics, once initialized
    pub async fn cache_stats(&self) -> Option<CacheStats> {
        match self.ready().await {
            Ok(ready) => Some(ready.cache.stats().await),
            Err(_) => None,
        }
    }

    /// Flush telemetry and release the cache. Idempotent.
    pub async fn close(&self) {
        let previous = {
            let mut state = self.state.lock().await;
            std::mem::replace(&mut *state, ProviderState::Closed)
        };

        if let ProviderState::Ready(ready) = previous {
            ready.aggregator.shutdown().await;
            ready.cache.close().await;
            tracing::info!(source = %self.source, "Closed bag");
        }
    }
}

/// One entry per distinct topic of the valid connections, sorted by name.
fn topics_from(connections: &[Connection], chunks: &[ChunkInfo]) -> Vec<Topic> {
    let mut counts: HashMap<u32, u64> = HashMap::new();
    for chunk in chunks {
        for (conn, count) in &chunk.connection_counts {
            *counts.entry(*conn).or_default() += *count as u64;
        }
    }

    let mut topics: BTreeMap<&str, Topic> = BTreeMap::new();
    for connection in connections {
        let topic = topics.entry(&connection.topic).or_insert_with(|| Topic {
            name: connection.topic.clone(),
            datatype: connection.datatype.clone(),
            num_messages: 0,
        });
        topic.num_messages += counts.get(&connection.id).copied().unwrap_or(0);
    }
    topics.into_values().collect()
}

fn describe_connections(records: &[&ConnectionRecord]) -> String {
    let field = |value: &Option<String>| match value.as_deref() {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => "<missing>".to_string(),
    };
    records
        .iter()
        .map(|r| {
            format!(
                "conn {} (topic={}, type={}, md5sum={})",
                r.id,
                field(&r.topic),
                field(&r.datatype),
                field(&r.md5sum)
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(id: u32, topic: &str) -> Connection {
        Connection {
            id,
            topic: topic.to_string(),
            datatype: "std_msgs/String".to_string(),
            md5sum: "992ce8a1687cec8c8bd883ec73ca41d1".to_string(),
            message_definition: "string data".to_string(),
            callerid: id.to_string(),
        }
    }

    fn chunk(counts: &[(u32, u32)]) -> ChunkInfo {
        ChunkInfo {
            chunk_pos: 0,
            start_time: Time::MIN,
            end_time: Time::MIN,
            connection_counts: counts.iter().copied().collect(),
            byte_range: 0..0,
        }
    }

    #[test]
    fn test_topics_merge_connections() {
        let connections = vec![connection(0, "/b"), connection(1, "/a"), connection(2, "/b")];
        let chunks = vec![chunk(&[(0, 3), (1, 1)]), chunk(&[(2, 4), (1, 2)])];

        let topics = topics_from(&connections, &chunks);
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0].name, "/a");
        assert_eq!(topics[0].num_messages, 3);
        assert_eq!(topics[1].name, "/b");
        assert_eq!(topics[1].num_messages, 7);
    }

    #[test]
    fn test_describe_connections() {
        let record = ConnectionRecord {
            id: 4,
            topic: Some("/x".to_string()),
            datatype: None,
            md5sum: Some(String::new()),
            message_definition: None,
            callerid: None,
            latching: false,
        };
        assert_eq!(
            describe_connections(&[&record]),
            "conn 4 (topic=/x, type=<missing>, md5sum=<missing>)"
        );
    }

    #[tokio::test]
    async fn test_get_messages_before_initialize() {
        let provider = BagDataProvider::new(
            BagSource::parse("/nonexistent/run.bag"),
            ProviderConfig::default(),
        );
        assert_eq!(provider.status().await, ProviderStatus::Uninitialized);
        let err = provider
            .get_messages(Time::MIN, Time::MAX, &["/a".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotOpen));
        assert!(provider.cache_stats().await.is_none());
    }

    #[tokio::test]
    async fn test_close_before_initialize() {
        let provider = BagDataProvider::new(
            BagSource::parse("/nonexistent/run.bag"),
            ProviderConfig::default(),
        );
        provider.close().await;
        provider.close().await;
        assert_eq!(provider.status().await, ProviderStatus::Closed);

        let sink = crate::telemetry::CollectingSink::new();
        let err = provider.initialize(sink).await.unwrap_err();
        assert!(matches!(err, Error::Closed));
    }
}
