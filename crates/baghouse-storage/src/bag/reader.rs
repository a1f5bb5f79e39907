use bytes::Bytes;
use std::collections::BTreeSet;
use std::sync::Arc;

use baghouse_core::header::op;
use baghouse_core::{
    BagHeader, ChunkHeader, ChunkInfo, CodecRegistry, ConnectionRecord, MessageData, RawRecord,
    RecordHeader, RecordIter, Time, BAG_MAGIC,
};

use crate::cache::CachedFilelike;
use crate::error::{Error, Result};

/// Offset of the bag header record (right after the magic)
const HEADER_OFFSET: u64 = BAG_MAGIC.len() as u64;

/// Random-access reader over an indexed bag
///
/// Opening reads only the bag header and the index section at the end of
/// the file. Chunks are fetched one at a time through the cache.
pub struct BagReader {
    reader: CachedFilelike,
    codecs: Arc<CodecRegistry>,
    header: BagHeader,
    connections: Vec<ConnectionRecord>,
    chunk_infos: Vec<ChunkInfo>,
    start_time: Option<Time>,
    end_time: Option<Time>,
}

impl BagReader {
    /// Open the underlying reader and parse the bag index.
    pub async fn open(reader: CachedFilelike, codecs: Arc<CodecRegistry>) -> Result<Self> {
        let size = reader.open().await?;
        if size == 0 {
            return Err(Error::EmptySource);
        }

        let header = read_bag_header(&reader, size).await?;
        if header.index_pos == 0 {
            return Err(Error::CorruptIndex(
                "Bag is not indexed (index_pos is 0); run `rosbag reindex`".to_string(),
            ));
        }
        if header.index_pos > size {
            return Err(Error::CorruptIndex(format!(
                "Index position {} is past end of bag ({} bytes)",
                header.index_pos, size
            )));
        }

        let index = if header.index_pos == size {
            Bytes::new()
        } else {
            reader.read(header.index_pos, size - header.index_pos).await?
        };
        let (connections, mut chunk_infos) = parse_index(index, &header)?;
        if let Some(chunk) = chunk_infos
            .iter()
            .find(|c| c.chunk_pos < HEADER_OFFSET || c.chunk_pos >= header.index_pos)
        {
            return Err(Error::CorruptIndex(format!(
                "Chunk position {} is outside the chunk section [{}, {})",
                chunk.chunk_pos, HEADER_OFFSET, header.index_pos
            )));
        }
        ChunkInfo::assign_byte_ranges(&mut chunk_infos, header.index_pos);

        let start_time = chunk_infos.iter().map(|c| c.start_time).min();
        let end_time = chunk_infos.iter().map(|c| c.end_time).max();

        tracing::info!(
            size,
            index_pos = header.index_pos,
            connections = connections.len(),
            chunks = chunk_infos.len(),
            "Opened bag index"
        );

        Ok(Self {
            reader,
            codecs,
            header,
            connections,
            chunk_infos,
            start_time,
            end_time,
        })
    }

    pub fn header(&self) -> &BagHeader {
        &self.header
    }

    /// Connection records in index order, as written (not validated)
    pub fn connection_records(&self) -> &[ConnectionRecord] {
        &self.connections
    }

    /// Chunk infos in on-disk order
    pub fn chunk_infos(&self) -> &[ChunkInfo] {
        &self.chunk_infos
    }

    /// Earliest chunk start time, `None` for a bag without chunks
    pub fn start_time(&self) -> Option<Time> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<Time> {
        self.end_time
    }

    /// Fetch one chunk and return its decompressed records.
    ///
    /// Framing problems surface as [`Error::Core`], decompression problems
    /// (including unknown compression tags) as [`Error::Codec`].
    pub async fn read_chunk(&self, info: &ChunkInfo) -> Result<Bytes> {
        let range = info.byte_range.clone();
        let raw = self.reader.read(range.start, range.end - range.start).await?;

        let (record, _) = RawRecord::decode(&raw)?;
        let chunk = ChunkHeader::from_record(&record)?;

        let data = self
            .codecs
            .decompress(&chunk.compression, &record.data, chunk.size as usize)
            .map_err(Error::Codec)?;

        tracing::debug!(
            chunk_pos = info.chunk_pos,
            compression = %chunk.compression,
            compressed = record.data.len(),
            size = data.len(),
            "Decompressed chunk"
        );
        Ok(data)
    }

    /// Extract message records from decompressed chunk data.
    ///
    /// Keeps messages on `connection_ids` with `start <= time <= end`, in
    /// chunk order. Connection records repeated inside the chunk are skipped.
    pub fn read_messages(
        chunk: Bytes,
        connection_ids: &BTreeSet<u32>,
        start: Time,
        end: Time,
    ) -> Result<Vec<MessageData>> {
        let mut messages = Vec::new();
        for record in RecordIter::new(chunk) {
            let record = record?;
            if record.header.op()? != op::MESSAGE_DATA {
                continue;
            }
            let message = MessageData::from_record(&record)?;
            if connection_ids.contains(&message.conn)
                && message.time >= start
                && message.time <= end
            {
                messages.push(message);
            }
        }
        Ok(messages)
    }
}

async fn read_bag_header(reader: &CachedFilelike, size: u64) -> Result<BagHeader> {
    let prefix_len = HEADER_OFFSET + 4;
    if size < prefix_len {
        return Err(Error::CorruptIndex(format!(
            "Bag is {} bytes, too short for a header",
            size
        )));
    }

    let prefix = reader.read(0, prefix_len).await?;
    if &prefix[..BAG_MAGIC.len()] != BAG_MAGIC {
        return Err(Error::CorruptIndex(
            baghouse_core::Error::InvalidMagic.to_string(),
        ));
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&prefix[BAG_MAGIC.len()..]);
    let header_len = u32::from_le_bytes(len_bytes) as u64;
    if prefix_len + header_len > size {
        return Err(Error::CorruptIndex(format!(
            "Bag header length {} exceeds bag size {}",
            header_len, size
        )));
    }

    // Only the header fields matter; the data section is padding.
    let fields = reader.read(prefix_len, header_len).await?;
    let record = RawRecord {
        header: RecordHeader::parse(fields).map_err(corrupt)?,
        data: Bytes::new(),
    };
    BagHeader::from_record(&record).map_err(corrupt)
}

fn parse_index(
    index: Bytes,
    header: &BagHeader,
) -> Result<(Vec<ConnectionRecord>, Vec<ChunkInfo>)> {
    let mut connections = Vec::with_capacity(header.conn_count as usize);
    let mut chunk_infos = Vec::with_capacity(header.chunk_count as usize);

    for record in RecordIter::new(index) {
        let record = record.map_err(corrupt)?;
        match record.header.op().map_err(corrupt)? {
            op::CONNECTION => {
                connections.push(ConnectionRecord::from_record(&record).map_err(corrupt)?)
            }
            op::CHUNK_INFO => chunk_infos.push(ChunkInfo::from_record(&record).map_err(corrupt)?),
            other => tracing::debug!(op = other, "Skipping unexpected record in index section"),
        }
    }

    if connections.len() != header.conn_count as usize {
        return Err(Error::CorruptIndex(format!(
            "Expected {} connection records, found {}",
            header.conn_count,
            connections.len()
        )));
    }
    if chunk_infos.len() != header.chunk_count as usize {
        return Err(Error::CorruptIndex(format!(
            "Expected {} chunk info records, found {}",
            header.chunk_count,
            chunk_infos.len()
        )));
    }
    Ok((connections, chunk_infos))
}

fn corrupt(err: baghouse_core::Error) -> Error {
    Error::CorruptIndex(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bag::BagWriter;
    use crate::config::CacheConfig;
    use crate::source::MemoryReader;
    use baghouse_core::Compression;

    fn cached(bytes: Bytes) -> CachedFilelike {
        CachedFilelike::new(Arc::new(MemoryReader::new(bytes)), CacheConfig::default())
    }

    fn sample_bag(compression: Compression) -> Bytes {
        let mut writer = BagWriter::new()
            .with_compression(compression)
            .with_chunk_threshold(256);
        let a = writer.add_connection("/a", "std_msgs/String", "992ce8a1687cec8c", "string data");
        let b = writer.add_connection("/b", "std_msgs/Int32", "da5909fbe378aeaf", "int32 data");
        for i in 0..20u32 {
            writer
                .write_message(a, Time::new(i, 0), format!("a{}", i).as_bytes())
                .unwrap();
            writer
                .write_message(b, Time::new(i, 500), &i.to_le_bytes())
                .unwrap();
        }
        writer.finish().unwrap()
    }

    #[tokio::test]
    async fn test_open_parses_index() {
        let bag = BagReader::open(cached(sample_bag(Compression::None)), CodecRegistry::shared())
            .await
            .unwrap();

        assert_eq!(bag.connection_records().len(), 2);
        assert_eq!(bag.header().chunk_count as usize, bag.chunk_infos().len());
        assert!(bag.chunk_infos().len() > 1);
        assert_eq!(bag.start_time(), Some(Time::new(0, 0)));
        assert_eq!(bag.end_time(), Some(Time::new(19, 500)));

        let total: u64 = bag.chunk_infos().iter().map(|c| c.message_count()).sum();
        assert_eq!(total, 40);
    }

    #[tokio::test]
    async fn test_read_every_chunk() {
        for compression in [Compression::None, Compression::Bz2, Compression::Lz4] {
            let bag = BagReader::open(cached(sample_bag(compression)), CodecRegistry::shared())
                .await
                .unwrap();
            let ids = BTreeSet::from([0]);

            let mut times = Vec::new();
            for info in bag.chunk_infos() {
                let data = bag.read_chunk(info).await.unwrap();
                let messages =
                    BagReader::read_messages(data, &ids, Time::MIN, Time::MAX).unwrap();
                times.extend(messages.iter().map(|m| m.time.sec));
            }
            assert_eq!(times, (0..20).collect::<Vec<_>>(), "codec {}", compression);
        }
    }

    #[tokio::test]
    async fn test_read_messages_inclusive_bounds() {
        let bag = BagReader::open(cached(sample_bag(Compression::Lz4)), CodecRegistry::shared())
            .await
            .unwrap();
        let ids = BTreeSet::from([0, 1]);
        let (start, end) = (Time::new(3, 0), Time::new(5, 0));

        let mut found = Vec::new();
        for info in bag.chunk_infos().iter().filter(|c| c.overlaps_time(start, end)) {
            let data = bag.read_chunk(info).await.unwrap();
            found.extend(BagReader::read_messages(data, &ids, start, end).unwrap());
        }
        let times: Vec<Time> = found.iter().map(|m| m.time).collect();
        assert_eq!(
            times,
            vec![
                Time::new(3, 0),
                Time::new(3, 500),
                Time::new(4, 0),
                Time::new(4, 500),
                Time::new(5, 0)
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_source() {
        let err = BagReader::open(cached(Bytes::new()), CodecRegistry::shared())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::EmptySource));
    }

    #[tokio::test]
    async fn test_bad_magic() {
        let mut bytes = sample_bag(Compression::None).to_vec();
        bytes[1] = b'X';
        let err = BagReader::open(cached(Bytes::from(bytes)), CodecRegistry::shared())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::CorruptIndex(_)));
    }

    #[tokio::test]
    async fn test_truncated_index() {
        let bytes = sample_bag(Compression::None);
        let truncated = bytes.slice(..bytes.len() - 10);
        let err = BagReader::open(cached(truncated), CodecRegistry::shared())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::CorruptIndex(_)));
    }

    #[tokio::test]
    async fn test_chunk_position_past_index() {
        let mut bytes = sample_bag(Compression::None).to_vec();
        let field = b"chunk_pos=";
        let at = bytes
            .windows(field.len())
            .position(|w| w == field)
            .unwrap()
            + field.len();
        let past_end = bytes.len() as u64 + 1000;
        bytes[at..at + 8].copy_from_slice(&past_end.to_le_bytes());

        let err = BagReader::open(cached(Bytes::from(bytes)), CodecRegistry::shared())
            .await
            .err()
            .unwrap();
        assert!(
            matches!(err, Error::CorruptIndex(ref msg) if msg.contains("outside the chunk section"))
        );
    }

    #[tokio::test]
    async fn test_too_short() {
        let err = BagReader::open(cached(Bytes::from_static(b"#ROSBAG")), CodecRegistry::shared())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::CorruptIndex(_)));
    }

    #[tokio::test]
    async fn test_unregistered_codec_is_codec_error() {
        let bag = BagReader::open(
            cached(sample_bag(Compression::Lz4)),
            Arc::new(CodecRegistry::empty()),
        )
        .await
        .unwrap();
        let err = bag.read_chunk(&bag.chunk_infos()[0]).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Codec(baghouse_core::Error::UnsupportedCompression(_))
        ));
    }
}
