use bytes::{BufMut, Bytes};
use std::collections::{BTreeMap, BTreeSet};

use baghouse_core::header::{encode_fields, op, write_record};
use baghouse_core::{
    ChunkInfo, Compression, ConnectionRecord, Time, BAG_HEADER_RECORD_SIZE, BAG_MAGIC,
};

use crate::error::{Error, Result};

/// Uncompressed chunk size at which a chunk is closed (same as `rosbag record`)
const DEFAULT_CHUNK_THRESHOLD: usize = 768 * 1024;

/// Builds an indexed bag in memory.
///
/// ```ignore
/// let mut writer = BagWriter::new().with_compression(Compression::Lz4);
/// let conn = writer.add_connection("/odom", "nav_msgs/Odometry", md5, definition);
/// writer.write_message(conn, Time::new(1, 0), &payload)?;
/// let bag = writer.finish()?;
/// ```
pub struct BagWriter {
    buf: Vec<u8>,
    compression: Compression,
    chunk_threshold: usize,
    connections: Vec<ConnectionRecord>,
    chunk_infos: Vec<ChunkInfo>,
    chunk: OpenChunk,
}

#[derive(Default)]
struct OpenChunk {
    data: Vec<u8>,
    start: Option<Time>,
    end: Option<Time>,
    /// conn → (time, offset into uncompressed chunk data)
    index: BTreeMap<u32, Vec<(Time, u32)>>,
    connections_written: BTreeSet<u32>,
}

impl Default for BagWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BagWriter {
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(BAG_MAGIC.len() + BAG_HEADER_RECORD_SIZE);
        buf.extend_from_slice(BAG_MAGIC);
        // Placeholder; the real header is written by `finish`.
        buf.resize(BAG_MAGIC.len() + BAG_HEADER_RECORD_SIZE, 0);

        Self {
            buf,
            compression: Compression::None,
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            connections: Vec::new(),
            chunk_infos: Vec::new(),
            chunk: OpenChunk::default(),
        }
    }

    /// Compression for chunks closed from now on.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_chunk_threshold(mut self, bytes: usize) -> Self {
        self.chunk_threshold = bytes.max(1);
        self
    }

    pub fn set_compression(&mut self, compression: Compression) {
        self.compression = compression;
    }

    /// Declare a connection and return its id.
    pub fn add_connection(
        &mut self,
        topic: &str,
        datatype: &str,
        md5sum: &str,
        message_definition: &str,
    ) -> u32 {
        self.add_connection_record(ConnectionRecord {
            id: 0,
            topic: Some(topic.to_string()),
            datatype: Some(datatype.to_string()),
            md5sum: Some(md5sum.to_string()),
            message_definition: Some(message_definition.to_string()),
            callerid: None,
            latching: false,
        })
    }

    /// Declare a connection exactly as given (any field may be missing).
    ///
    /// The record's `id` is replaced by the next free id, which is returned.
    pub fn add_connection_record(&mut self, mut record: ConnectionRecord) -> u32 {
        let id = self.connections.len() as u32;
        record.id = id;
        self.connections.push(record);
        id
    }

    pub fn write_message(&mut self, conn: u32, time: Time, payload: &[u8]) -> Result<()> {
        let record = self
            .connections
            .get(conn as usize)
            .ok_or_else(|| {
                Error::Core(baghouse_core::Error::InvalidRecord(format!(
                    "Unknown connection {}",
                    conn
                )))
            })?
            .clone();

        if self.chunk.connections_written.insert(conn) {
            write_connection(&mut self.chunk.data, &record);
        }

        let offset = self.chunk.data.len() as u32;
        write_record(
            &mut self.chunk.data,
            &[
                ("op", &[op::MESSAGE_DATA]),
                ("conn", &conn.to_le_bytes()),
                ("time", &time.to_le_bytes()),
            ],
            payload,
        );
        self.chunk.index.entry(conn).or_default().push((time, offset));
        self.chunk.start = Some(self.chunk.start.map_or(time, |t| t.min(time)));
        self.chunk.end = Some(self.chunk.end.map_or(time, |t| t.max(time)));

        if self.chunk.data.len() >= self.chunk_threshold {
            self.flush_chunk()?;
        }
        Ok(())
    }

    /// Close the open chunk (if it holds any messages).
    pub fn flush_chunk(&mut self) -> Result<()> {
        let chunk = std::mem::take(&mut self.chunk);
        let (Some(start_time), Some(end_time)) = (chunk.start, chunk.end) else {
            return Ok(());
        };

        let compressed = self.compression.compress(&chunk.data)?;
        let chunk_pos = self.buf.len() as u64;
        write_record(
            &mut self.buf,
            &[
                ("op", &[op::CHUNK]),
                ("compression", self.compression.as_str().as_bytes()),
                ("size", &(chunk.data.len() as u32).to_le_bytes()),
            ],
            &compressed,
        );

        let mut connection_counts = BTreeMap::new();
        for (conn, entries) in &chunk.index {
            let mut data = Vec::with_capacity(entries.len() * 12);
            for (time, offset) in entries {
                data.put_slice(&time.to_le_bytes());
                data.put_u32_le(*offset);
            }
            write_record(
                &mut self.buf,
                &[
                    ("op", &[op::INDEX_DATA]),
                    ("ver", &1u32.to_le_bytes()),
                    ("conn", &conn.to_le_bytes()),
                    ("count", &(entries.len() as u32).to_le_bytes()),
                ],
                &data,
            );
            connection_counts.insert(*conn, entries.len() as u32);
        }

        tracing::trace!(
            chunk_pos,
            compression = %self.compression,
            size = chunk.data.len(),
            compressed = compressed.len(),
            "Wrote chunk"
        );

        self.chunk_infos.push(ChunkInfo {
            chunk_pos,
            start_time,
            end_time,
            connection_counts,
            byte_range: chunk_pos..chunk_pos,
        });
        Ok(())
    }

    /// Write the index section and bag header and return the bag bytes.
    pub fn finish(mut self) -> Result<Bytes> {
        self.flush_chunk()?;
        let index_pos = self.buf.len() as u64;

        for record in &self.connections {
            write_connection(&mut self.buf, record);
        }
        for info in &self.chunk_infos {
            let mut data = Vec::with_capacity(info.connection_counts.len() * 8);
            for (conn, count) in &info.connection_counts {
                data.put_u32_le(*conn);
                data.put_u32_le(*count);
            }
            write_record(
                &mut self.buf,
                &[
                    ("op", &[op::CHUNK_INFO]),
                    ("ver", &ChunkInfo::VERSION.to_le_bytes()),
                    ("chunk_pos", &info.chunk_pos.to_le_bytes()),
                    ("start_time", &info.start_time.to_le_bytes()),
                    ("end_time", &info.end_time.to_le_bytes()),
                    ("count", &(info.connection_counts.len() as u32).to_le_bytes()),
                ],
                &data,
            );
        }

        let header = bag_header_record(
            index_pos,
            self.connections.len() as u32,
            self.chunk_infos.len() as u32,
        );
        let start = BAG_MAGIC.len();
        self.buf[start..start + header.len()].copy_from_slice(&header);

        Ok(Bytes::from(self.buf))
    }
}

fn write_connection(out: &mut Vec<u8>, record: &ConnectionRecord) {
    let mut details: Vec<(&str, &[u8])> = Vec::new();
    let fields = [
        ("topic", &record.topic),
        ("type", &record.datatype),
        ("md5sum", &record.md5sum),
        ("message_definition", &record.message_definition),
        ("callerid", &record.callerid),
    ];
    for (name, value) in &fields {
        if let Some(value) = value {
            details.push((*name, value.as_bytes()));
        }
    }
    if record.latching {
        details.push(("latching", b"1"));
    }

    let topic = record.topic.as_deref().unwrap_or_default();
    write_record(
        out,
        &[
            ("op", &[op::CONNECTION]),
            ("conn", &record.id.to_le_bytes()),
            ("topic", topic.as_bytes()),
        ],
        &encode_fields(&details),
    );
}

/// Bag header record padded with spaces to exactly `BAG_HEADER_RECORD_SIZE` bytes.
fn bag_header_record(index_pos: u64, conn_count: u32, chunk_count: u32) -> Vec<u8> {
    let fields = [
        ("op", &[op::BAG_HEADER][..]),
        ("index_pos", &index_pos.to_le_bytes()[..]),
        ("conn_count", &conn_count.to_le_bytes()[..]),
        ("chunk_count", &chunk_count.to_le_bytes()[..]),
    ];
    let header_len = encode_fields(&fields).len();
    let padding = vec![b' '; BAG_HEADER_RECORD_SIZE - 8 - header_len];

    let mut out = Vec::with_capacity(BAG_HEADER_RECORD_SIZE);
    write_record(&mut out, &fields, &padding);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use baghouse_core::{BagHeader, RawRecord, RecordIter};

    #[test]
    fn test_header_is_padded() {
        let record = bag_header_record(12345, 2, 3);
        assert_eq!(record.len(), BAG_HEADER_RECORD_SIZE);

        let (raw, consumed) = RawRecord::decode(&Bytes::from(record)).unwrap();
        assert_eq!(consumed, BAG_HEADER_RECORD_SIZE);
        let header = BagHeader::from_record(&raw).unwrap();
        assert_eq!(header.index_pos, 12345);
        assert_eq!(header.chunk_count, 3);
    }

    #[test]
    fn test_chunks_split_at_threshold() {
        let mut writer = BagWriter::new().with_chunk_threshold(200);
        let conn = writer.add_connection("/a", "std_msgs/String", "abc", "string data");
        for i in 0..10 {
            writer.write_message(conn, Time::new(i, 0), &[0u8; 64]).unwrap();
        }
        assert!(writer.chunk_infos.len() >= 3);
        let bag = writer.finish().unwrap();
        assert!(bag.starts_with(BAG_MAGIC));
    }

    #[test]
    fn test_unknown_connection_rejected() {
        let mut writer = BagWriter::new();
        assert!(writer.write_message(7, Time::new(1, 0), b"x").is_err());
    }

    #[test]
    fn test_empty_bag_has_index() {
        let bag = BagWriter::new().finish().unwrap();
        let (raw, _) = RawRecord::decode(&bag.slice(BAG_MAGIC.len()..)).unwrap();
        let header = BagHeader::from_record(&raw).unwrap();
        assert_eq!(header.index_pos, (BAG_MAGIC.len() + BAG_HEADER_RECORD_SIZE) as u64);
        assert_eq!(header.chunk_count, 0);
        assert_eq!(bag.len() as u64, header.index_pos);
    }

    #[test]
    fn test_connection_written_once_per_chunk() {
        let mut writer = BagWriter::new();
        let conn = writer.add_connection("/a", "std_msgs/String", "abc", "string data");
        writer.write_message(conn, Time::new(1, 0), b"one").unwrap();
        writer.write_message(conn, Time::new(2, 0), b"two").unwrap();

        let ops: Vec<u8> = RecordIter::new(Bytes::from(writer.chunk.data.clone()))
            .map(|r| r.unwrap().header.op().unwrap())
            .collect();
        assert_eq!(ops, vec![op::CONNECTION, op::MESSAGE_DATA, op::MESSAGE_DATA]);
    }
}
