//! Edge-case tests for record framing, typed records, and codecs.

use bytes::Bytes;
use baghouse_core::header::{encode_fields, op, write_record};
use baghouse_core::{
    BagHeader, ChunkHeader, CodecRegistry, Compression, ConnectionRecord, MessageData, RawRecord,
    RecordIter, Time,
};

fn record(fields: &[(&str, &[u8])], data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    write_record(&mut buf, fields, data);
    buf
}

// ---------------------------------------------------------------
// Bag header
// ---------------------------------------------------------------

#[test]
fn bag_header_fields() {
    let buf = record(
        &[
            ("op", &[op::BAG_HEADER]),
            ("index_pos", &123_456u64.to_le_bytes()),
            ("conn_count", &2u32.to_le_bytes()),
            ("chunk_count", &9u32.to_le_bytes()),
        ],
        &[b' '; 16],
    );
    let (raw, consumed) = RawRecord::decode(&Bytes::from(buf.clone())).unwrap();
    assert_eq!(consumed, buf.len());

    let header = BagHeader::from_record(&raw).unwrap();
    assert_eq!(header.index_pos, 123_456);
    assert_eq!(header.conn_count, 2);
    assert_eq!(header.chunk_count, 9);
}

#[test]
fn bag_header_missing_index_pos() {
    let buf = record(
        &[
            ("op", &[op::BAG_HEADER]),
            ("conn_count", &2u32.to_le_bytes()),
            ("chunk_count", &9u32.to_le_bytes()),
        ],
        b"",
    );
    let (raw, _) = RawRecord::decode(&Bytes::from(buf)).unwrap();
    assert!(BagHeader::from_record(&raw).is_err());
}

// ---------------------------------------------------------------
// Chunk contents
// ---------------------------------------------------------------

#[test]
fn chunk_with_connection_and_messages() {
    let mut chunk = record(
        &[
            ("op", &[op::CONNECTION]),
            ("conn", &0u32.to_le_bytes()),
            ("topic", b"/a"),
        ],
        &encode_fields(&[("type", b"std_msgs/Empty"), ("md5sum", b"d41d8cd9")]),
    );
    for i in 0..3u32 {
        chunk.extend(record(
            &[
                ("op", &[op::MESSAGE_DATA]),
                ("conn", &0u32.to_le_bytes()),
                ("time", &Time::new(i, 0).to_le_bytes()),
            ],
            &i.to_le_bytes(),
        ));
    }

    let records: Vec<RawRecord> = RecordIter::new(Bytes::from(chunk))
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(records.len(), 4);

    let conn = ConnectionRecord::from_record(&records[0]).unwrap();
    assert_eq!(conn.topic.as_deref(), Some("/a"));

    let messages: Vec<MessageData> = records[1..]
        .iter()
        .map(|r| MessageData::from_record(r).unwrap())
        .collect();
    assert_eq!(messages[2].time, Time::new(2, 0));
    assert_eq!(messages[2].data.as_ref(), &2u32.to_le_bytes());
}

#[test]
fn chunk_header_requires_compression() {
    let buf = record(&[("op", &[op::CHUNK]), ("size", &10u32.to_le_bytes())], b"");
    let (raw, _) = RawRecord::decode(&Bytes::from(buf)).unwrap();
    assert!(ChunkHeader::from_record(&raw).is_err());
}

#[test]
fn empty_header_field_value() {
    let buf = record(&[("op", &[op::CHUNK]), ("compression", b""), ("size", &0u32.to_le_bytes())], b"");
    let (raw, _) = RawRecord::decode(&Bytes::from(buf)).unwrap();
    let chunk = ChunkHeader::from_record(&raw).unwrap();
    assert_eq!(chunk.compression, "");
    assert_eq!(chunk.size, 0);
}

// ---------------------------------------------------------------
// Codecs
// ---------------------------------------------------------------

#[test]
fn codecs_handle_empty_payload() {
    let registry = CodecRegistry::shared();
    for c in [Compression::None, Compression::Bz2, Compression::Lz4] {
        let compressed = c.compress(b"").unwrap();
        let out = registry.decompress(c.as_str(), &compressed, 0).unwrap();
        assert!(out.is_empty(), "codec {c}");
    }
}

#[test]
fn codecs_reject_truncated_stream() {
    let registry = CodecRegistry::shared();
    let data = vec![7u8; 10_000];
    for c in [Compression::Bz2, Compression::Lz4] {
        let compressed = c.compress(&data).unwrap();
        let truncated = &compressed[..compressed.len() / 2];
        let err = registry
            .decompress(c.as_str(), truncated, data.len())
            .unwrap_err();
        assert!(err.is_codec_error(), "codec {c}: {err}");
    }
}

#[test]
fn shared_registry_initializes_once_across_threads() {
    let handles: Vec<_> = (0..8)
        .map(|_| std::thread::spawn(CodecRegistry::shared))
        .collect();
    let registries: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for r in &registries[1..] {
        assert!(std::sync::Arc::ptr_eq(&registries[0], r));
    }
}
