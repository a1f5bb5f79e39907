//! Shared fixtures for storage integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use baghouse_core::{Compression, Time};
use baghouse_storage::{BagWriter, ByteStream, FileReader};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::io;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

/// Payload written for a message: `"<topic>@<sec>"`
pub fn payload(topic: &str, time: Time) -> Vec<u8> {
    format!("{}@{}", topic, time.sec).into_bytes()
}

/// Build a bag with one chunk per entry of `chunks`, each holding the given
/// `(topic, seconds)` messages in order.
pub fn bag_with_chunks(compression: Compression, chunks: &[Vec<(&str, u32)>]) -> Bytes {
    let mut writer = BagWriter::new().with_compression(compression);
    let mut connections: HashMap<String, u32> = HashMap::new();

    for chunk in chunks {
        for (topic, sec) in chunk {
            let conn = *connections.entry(topic.to_string()).or_insert_with(|| {
                writer.add_connection(
                    topic,
                    "std_msgs/String",
                    "992ce8a1687cec8c8bd883ec73ca41d1",
                    "string data",
                )
            });
            let time = Time::new(*sec, 0);
            writer.write_message(conn, time, &payload(topic, time)).unwrap();
        }
        writer.flush_chunk().unwrap();
    }
    writer.finish().unwrap()
}

/// One chunk per `(start, end)` time range, two messages each on "/a".
pub fn bag_with_ranges(ranges: &[(u32, u32)]) -> Bytes {
    let chunks: Vec<Vec<(&str, u32)>> = ranges
        .iter()
        .map(|(start, end)| vec![("/a", *start), ("/a", *end)])
        .collect();
    bag_with_chunks(Compression::Lz4, &chunks)
}

/// Replace the first occurrence of `from` with `to` (same length).
pub fn patch_first(bag: &Bytes, from: &[u8], to: &[u8]) -> Bytes {
    assert_eq!(from.len(), to.len());
    let mut bytes = bag.to_vec();
    let pos = bytes
        .windows(from.len())
        .position(|w| w == from)
        .expect("pattern present");
    bytes[pos..pos + to.len()].copy_from_slice(to);
    Bytes::from(bytes)
}

/// Overwrite the first chunk info's `chunk_pos` field with `pos`.
pub fn patch_chunk_pos(bag: &Bytes, pos: u64) -> Bytes {
    let field = b"chunk_pos=";
    let mut bytes = bag.to_vec();
    let at = bytes
        .windows(field.len())
        .position(|w| w == field)
        .expect("chunk info present")
        + field.len();
    bytes[at..at + 8].copy_from_slice(&pos.to_le_bytes());
    Bytes::from(bytes)
}

/// In-memory source that records fetches and can misbehave inside a byte region.
pub struct ScriptedReader {
    data: Bytes,
    /// Fetches starting inside this region are affected
    region: Range<u64>,
    /// Remaining fetches in the region that deliver half the range, then fail
    failures: AtomicUsize,
    /// Fetches in the region never complete
    stall: bool,
    pub stalled: Notify,
    fetches: Mutex<Vec<(u64, u64)>>,
}

impl ScriptedReader {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            region: 0..0,
            failures: AtomicUsize::new(0),
            stall: false,
            stalled: Notify::new(),
            fetches: Mutex::new(Vec::new()),
        }
    }

    /// Drop the connection half way through the next `failures` fetches in `region`.
    pub fn failing(mut self, region: Range<u64>, failures: usize) -> Self {
        self.region = region;
        self.failures = AtomicUsize::new(failures);
        self
    }

    /// Never finish fetches in `region`.
    pub fn stalling(mut self, region: Range<u64>) -> Self {
        self.region = region;
        self.stall = true;
        self
    }

    pub fn fetches(&self) -> Vec<(u64, u64)> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }
}

#[async_trait]
impl FileReader for ScriptedReader {
    async fn open(&self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn fetch(&self, offset: u64, length: u64) -> ByteStream {
        self.fetches.lock().unwrap().push((offset, length));
        let range = self.data.slice(offset as usize..(offset + length) as usize);

        if !self.region.contains(&offset) {
            return stream::iter(vec![Ok(range)]).boxed();
        }
        if self.stall {
            self.stalled.notify_one();
            return stream::pending().boxed();
        }

        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            let half = range.slice(..range.len() / 2);
            stream::iter(vec![
                Ok(half),
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection dropped")),
            ])
            .boxed()
        } else {
            stream::iter(vec![Ok(range)]).boxed()
        }
    }

    fn kind(&self) -> &'static str {
        "scripted"
    }
}

/// Byte region holding the chunks: end of the bag header up to `index_pos`.
pub fn chunk_region(bag: &Bytes) -> Range<u64> {
    let offset = baghouse_core::BAG_MAGIC.len();
    let (record, consumed) = baghouse_core::RawRecord::decode(&bag.slice(offset..)).unwrap();
    let header = baghouse_core::BagHeader::from_record(&record).unwrap();
    (offset + consumed) as u64..header.index_pos
}
