//! Storage Error Types
//!
//! This module defines all error types that can occur while opening, caching,
//! and reading bags.
//!
//! ## Error Categories
//!
//! ### Source Errors
//! - `Open`: The byte source could not be opened (missing file, unreachable URL)
//! - `EmptySource`: The source opened but holds zero bytes
//! - `Transfer`: A fetch failed and could not be resumed
//! - `Http`: The HTTP client could not be built or a request was malformed
//!
//! ### Format Errors
//! - `CorruptIndex`: The bag header or index section can't be used
//! - `Codec`: A chunk failed to decompress
//! - `Core`: Any other record decoding error
//!
//! ### Usage Errors
//! - `NotOpen`: Read before `open()`
//! - `Closed`: Read after (or during) `close()`
//! - `OutOfRange`: Requested bytes past the end of the source
//!
//! ## Usage
//!
//! All storage operations return `Result<T>` which is aliased to
//! `Result<T, Error>`. This allows clean error propagation with `?`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to open source: {0}")]
    Open(String),

    #[error("Source is empty")]
    EmptySource,

    #[error("Corrupt bag index: {0}")]
    CorruptIndex(String),

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Chunk decode failed: {0}")]
    Codec(baghouse_core::Error),

    #[error("Source not opened")]
    NotOpen,

    #[error("Reader closed")]
    Closed,

    #[error("Range {offset}+{length} is past end of source ({size} bytes)")]
    OutOfRange { offset: u64, length: u64, size: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record error: {0}")]
    Core(#[from] baghouse_core::Error),
}

impl Error {
    /// Returns true if the error comes from the bag or its location rather
    /// than from a defect in the caller.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::Open(_)
                | Error::EmptySource
                | Error::CorruptIndex(_)
                | Error::Transfer(_)
                | Error::Codec(_)
                | Error::Http(_)
                | Error::Core(_)
        )
    }
}
