//! Byte Sources
//!
//! A [`FileReader`] is anything that can report its size and stream back an
//! arbitrary byte range. The caching reader sits on top of one and never
//! cares where the bytes come from:
//!
//! ```text
//!                    ┌──────────────────┐
//!  BagSource::File ──▶ LocalFileReader  │
//!                    ├──────────────────┤      ┌──────────────┐     ┌────────────────┐
//!  BagSource::RemoteUrl ▶ HttpFileReader├─────▶│ MeteredReader│────▶│ CachedFilelike │
//!                    ├──────────────────┤      └──────────────┘     └────────────────┘
//!  BagSource::Reader ─▶ any FileReader  │
//!                    └──────────────────┘
//! ```
//!
//! Sources report failures as `std::io::Error` so the retry layer can decide
//! which are transient by `ErrorKind` alone.

mod file;
mod http;
mod memory;
mod metered;

pub use file::LocalFileReader;
pub use http::HttpFileReader;
pub use memory::MemoryReader;
pub use metered::MeteredReader;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// Stream of byte segments for one requested range
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Random-access byte source
#[async_trait]
pub trait FileReader: Send + Sync {
    /// Prepare the source and return its total size in bytes.
    async fn open(&self) -> io::Result<u64>;

    /// Stream `length` bytes starting at `offset`.
    ///
    /// The stream may end early or fail part way; callers resume by issuing
    /// a new fetch for the remainder.
    fn fetch(&self, offset: u64, length: u64) -> ByteStream;

    /// Short label used in metrics
    fn kind(&self) -> &'static str {
        "reader"
    }
}

/// Where a bag lives
#[derive(Clone)]
pub enum BagSource {
    File(PathBuf),
    RemoteUrl(String),
    Reader(Arc<dyn FileReader>),
}

impl BagSource {
    /// Parse a command-line location: `http://` and `https://` become
    /// remote URLs, anything else a local path.
    pub fn parse(location: &str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            BagSource::RemoteUrl(location.to_string())
        } else {
            BagSource::File(PathBuf::from(location))
        }
    }

    /// Build the byte source for this location.
    pub fn into_reader(self, http_timeout: Duration) -> Result<Arc<dyn FileReader>> {
        Ok(match self {
            BagSource::File(path) => Arc::new(LocalFileReader::new(path)),
            BagSource::RemoteUrl(url) => Arc::new(HttpFileReader::new(url, http_timeout)?),
            BagSource::Reader(reader) => reader,
        })
    }
}

impl fmt::Debug for BagSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BagSource::File(path) => f.debug_tuple("File").field(path).finish(),
            BagSource::RemoteUrl(url) => f.debug_tuple("RemoteUrl").field(url).finish(),
            BagSource::Reader(reader) => f.debug_tuple("Reader").field(&reader.kind()).finish(),
        }
    }
}

impl fmt::Display for BagSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BagSource::File(path) => write!(f, "{}", path.display()),
            BagSource::RemoteUrl(url) => f.write_str(url),
            BagSource::Reader(reader) => write!(f, "<{}>", reader.kind()),
        }
    }
}
