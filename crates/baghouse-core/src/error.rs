//! Error Types for baghouse-core
//!
//! This module defines the errors that can occur while decoding bag records
//! and decompressing chunk payloads.
//!
//! ## Error Categories
//!
//! ### I/O Errors
//! - `Io`: Underlying read failure while decoding
//!
//! ### Format Errors
//! - `InvalidMagic`: Data doesn't start with `#ROSBAG V2.0\n`
//! - `UnsupportedVersion`: A versioned record (chunk info, index data) uses a version we can't read
//! - `InvalidRecord`: Truncated or malformed record header/data
//! - `MissingField`: A required header field is absent
//!
//! ### Codec Errors
//! - `UnsupportedCompression`: Chunk compression tag has no registered decompressor
//! - `Decompression`: Compressed stream is corrupt
//! - `SizeMismatch`: Decompressed size differs from the size recorded in the chunk header
//!
//! ## Usage
//! All functions in this crate return `Result<T>`, aliased to `Result<T, Error>`.
//!
//! ```ignore
//! use baghouse_core::{Error, Result};
//!
//! fn check_magic(data: &[u8]) -> Result<()> {
//!     if !data.starts_with(b"#ROSBAG V2.0\n") {
//!         return Err(Error::InvalidMagic);
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid magic bytes")]
    InvalidMagic,

    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u32),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Missing header field: {0}")]
    MissingField(&'static str),

    #[error("Unsupported compression: {0}")]
    UnsupportedCompression(String),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Decompressed size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}

impl Error {
    /// Returns true if this error came from decompressing a chunk payload.
    pub fn is_codec_error(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedCompression(_) | Error::Decompression(_) | Error::SizeMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
