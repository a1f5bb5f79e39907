//! baghouse Core
//!
//! Shared vocabulary for reading ROS bag (format 2.0) recordings:
//!
//! - [`time`]: `Time` (seconds + nanoseconds) and tick arithmetic
//! - [`header`]: record framing (`header_len | fields | data_len | data`)
//! - [`record`]: typed records (bag header, connections, chunk infos, chunks, messages)
//! - [`compression`]: compression tags and the codec dispatch table
//! - [`error`]: error types
//!
//! ## Bag Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ "#ROSBAG V2.0\n"                             │
//! ├──────────────────────────────────────────────┤
//! │ Bag header record (padded to 4096 bytes)     │
//! │ - index_pos, conn_count, chunk_count         │
//! ├──────────────────────────────────────────────┤
//! │ Chunk record (compressed connections+msgs)   │
//! │ Index data records (one per connection)      │
//! ├──────────────────────────────────────────────┤
//! │ ...more chunks...                            │
//! ├──────────────────────────────────────────────┤  ← index_pos
//! │ Connection records                           │
//! │ Chunk info records                           │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! This crate does no I/O. `baghouse-storage` fetches byte ranges and feeds
//! them through these decoders.

pub mod compression;
pub mod error;
pub mod header;
pub mod record;
pub mod time;

pub use compression::{CodecRegistry, Compression, Decompressor};
pub use error::{Error, Result};
pub use header::{RawRecord, RecordHeader, RecordIter};
pub use record::{BagHeader, ChunkHeader, ChunkInfo, Connection, ConnectionRecord, MessageData, MessageEvent};
pub use time::Time;

/// Magic bytes at the start of every bag
pub const BAG_MAGIC: &[u8; 13] = b"#ROSBAG V2.0\n";

/// Total size of the bag header record, including padding
pub const BAG_HEADER_RECORD_SIZE: usize = 4096;
