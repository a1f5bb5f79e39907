//! Bag Record Types
//!
//! This module defines the typed views of the records a bag index is made of,
//! plus the [`MessageEvent`] handed to consumers.
//!
//! ## Records
//! - **BagHeader** (`op=0x03`): where the index section starts and how many
//!   connection / chunk-info records it holds
//! - **ConnectionRecord** (`op=0x07`): a declared channel (topic, type, md5sum,
//!   message definition, publisher)
//! - **ChunkInfo** (`op=0x06`): byte position, time range and per-connection
//!   message counts of one chunk
//! - **ChunkHeader** (`op=0x05`): compression tag and uncompressed size of a chunk
//! - **MessageData** (`op=0x02`): one serialized message inside a chunk
//!
//! ## Connections vs ConnectionRecords
//! A `ConnectionRecord` is exactly what the recorder wrote; any of its
//! descriptive fields may be missing. A [`Connection`] is the validated form
//! with all required fields present. Validation happens in the data provider
//! so that invalid connections can be reported rather than rejected outright.

use bytes::{Buf, Bytes};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use crate::error::{Error, Result};
use crate::header::{op, RawRecord, RecordHeader};
use crate::time::Time;

/// Bag header record (`op=0x03`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BagHeader {
    /// Byte offset of the first connection record in the index section
    pub index_pos: u64,
    pub conn_count: u32,
    pub chunk_count: u32,
}

impl BagHeader {
    pub fn from_record(record: &RawRecord) -> Result<Self> {
        expect_op(&record.header, op::BAG_HEADER)?;
        Ok(Self {
            index_pos: record.header.u64("index_pos")?,
            conn_count: record.header.u32("conn_count")?,
            chunk_count: record.header.u32("chunk_count")?,
        })
    }
}

/// A connection record exactly as written by the recorder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub id: u32,
    pub topic: Option<String>,
    #[serde(rename = "type")]
    pub datatype: Option<String>,
    pub md5sum: Option<String>,
    pub message_definition: Option<String>,
    pub callerid: Option<String>,
    pub latching: bool,
}

impl ConnectionRecord {
    pub fn from_record(record: &RawRecord) -> Result<Self> {
        expect_op(&record.header, op::CONNECTION)?;
        let id = record.header.u32("conn")?;
        let details = RecordHeader::parse(record.data.clone())?;

        // The data section repeats the topic; fall back to the record header.
        let topic = details
            .opt_string("topic")
            .or_else(|| record.header.opt_string("topic"));

        Ok(Self {
            id,
            topic,
            datatype: details.opt_string("type"),
            md5sum: details.opt_string("md5sum"),
            message_definition: details.opt_string("message_definition"),
            callerid: details.opt_string("callerid"),
            latching: details.opt_string("latching").as_deref() == Some("1"),
        })
    }

    /// Validate required fields.
    ///
    /// Returns `None` if topic, type, or md5sum is missing or empty.
    pub fn validate(&self) -> Option<Connection> {
        let topic = non_empty(&self.topic)?;
        let datatype = non_empty(&self.datatype)?;
        let md5sum = non_empty(&self.md5sum)?;

        Some(Connection {
            id: self.id,
            topic: topic.to_string(),
            datatype: datatype.to_string(),
            md5sum: md5sum.to_string(),
            message_definition: self.message_definition.clone().unwrap_or_default(),
            callerid: self
                .callerid
                .clone()
                .unwrap_or_else(|| self.id.to_string()),
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// A validated channel declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: u32,
    pub topic: String,
    #[serde(rename = "type")]
    pub datatype: String,
    /// Content hash of the message definition
    pub md5sum: String,
    pub message_definition: String,
    pub callerid: String,
}

/// Location and contents summary of one chunk (`op=0x06`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Byte offset of the chunk record in the bag
    pub chunk_pos: u64,
    pub start_time: Time,
    pub end_time: Time,
    /// Message count per connection id
    pub connection_counts: BTreeMap<u32, u32>,
    /// Bytes occupied by the chunk record and its index data records.
    ///
    /// Set once all chunk infos are known (see [`ChunkInfo::assign_byte_ranges`]).
    pub byte_range: Range<u64>,
}

impl ChunkInfo {
    pub const VERSION: u32 = 1;

    pub fn from_record(record: &RawRecord) -> Result<Self> {
        expect_op(&record.header, op::CHUNK_INFO)?;
        let version = record.header.u32("ver")?;
        if version != Self::VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        let chunk_pos = record.header.u64("chunk_pos")?;
        let start_time = record.header.time("start_time")?;
        let end_time = record.header.time("end_time")?;
        let count = record.header.u32("count")? as usize;

        let mut data = record.data.clone();
        if data.remaining() < count * 8 {
            return Err(Error::InvalidRecord(format!(
                "Chunk info declares {} connections but has {} data bytes",
                count,
                data.remaining()
            )));
        }
        let mut connection_counts = BTreeMap::new();
        for _ in 0..count {
            let conn = data.get_u32_le();
            let messages = data.get_u32_le();
            connection_counts.insert(conn, messages);
        }

        Ok(Self {
            chunk_pos,
            start_time,
            end_time,
            connection_counts,
            byte_range: chunk_pos..chunk_pos,
        })
    }

    pub fn connection_ids(&self) -> BTreeSet<u32> {
        self.connection_counts.keys().copied().collect()
    }

    pub fn message_count(&self) -> u64 {
        self.connection_counts.values().map(|c| *c as u64).sum()
    }

    /// True if the chunk's time range intersects the inclusive range `[start, end]`.
    pub fn overlaps_time(&self, start: Time, end: Time) -> bool {
        self.start_time <= end && self.end_time >= start
    }

    pub fn contains_any(&self, connection_ids: &BTreeSet<u32>) -> bool {
        self.connection_counts
            .keys()
            .any(|id| connection_ids.contains(id))
    }

    /// Compute each chunk's byte range.
    ///
    /// A chunk extends to the position of the next chunk on disk, or to the
    /// start of the index section for the last one.
    pub fn assign_byte_ranges(chunks: &mut [ChunkInfo], index_pos: u64) {
        let mut positions: Vec<u64> = chunks.iter().map(|c| c.chunk_pos).collect();
        positions.sort_unstable();

        for chunk in chunks.iter_mut() {
            let next = positions
                .iter()
                .copied()
                .find(|pos| *pos > chunk.chunk_pos)
                .unwrap_or(index_pos);
            chunk.byte_range = chunk.chunk_pos..next.max(chunk.chunk_pos);
        }
    }
}

/// Chunk record header (`op=0x05`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    pub compression: String,
    /// Uncompressed size of the chunk data
    pub size: u32,
}

impl ChunkHeader {
    pub fn from_record(record: &RawRecord) -> Result<Self> {
        expect_op(&record.header, op::CHUNK)?;
        Ok(Self {
            compression: record.header.string("compression")?,
            size: record.header.u32("size")?,
        })
    }
}

/// A serialized message inside a chunk (`op=0x02`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageData {
    pub conn: u32,
    pub time: Time,
    pub data: Bytes,
}

impl MessageData {
    pub fn from_record(record: &RawRecord) -> Result<Self> {
        expect_op(&record.header, op::MESSAGE_DATA)?;
        Ok(Self {
            conn: record.header.u32("conn")?,
            time: record.header.time("time")?,
            data: record.data.clone(),
        })
    }
}

/// A message delivered to a consumer
///
/// The payload is still serialized; ownership passes to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    pub topic: String,
    pub receive_time: Time,
    pub payload: Bytes,
}

fn expect_op(header: &RecordHeader, expected: u8) -> Result<()> {
    let actual = header.op()?;
    if actual != expected {
        return Err(Error::InvalidRecord(format!(
            "Expected op 0x{:02x}, found 0x{:02x}",
            expected, actual
        )));
    }
    Ok(())
}
