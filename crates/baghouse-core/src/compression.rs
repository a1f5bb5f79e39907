//! Chunk Compression and Codec Dispatch
//!
//! Chunk records carry a `compression` tag naming how their data section is
//! encoded. Recorders write one of three tags:
//!
//! | Tag    | Codec                                   |
//! |--------|-----------------------------------------|
//! | `none` | stored as-is                            |
//! | `bz2`  | bzip2 (block codec)                     |
//! | `lz4`  | LZ4 frame format (streaming codec)      |
//!
//! ## Dispatch
//! [`CodecRegistry`] maps a tag to a [`Decompressor`]. Every decompressor is
//! given the compressed bytes and the uncompressed size recorded in the chunk
//! header, and must return exactly that many bytes.
//!
//! The default registry is built once, on first use, behind `lazy_static`, so
//! concurrent first reads share a single initialization. Additional tags can
//! be registered on a custom registry:
//!
//! ```ignore
//! let mut codecs = CodecRegistry::with_defaults();
//! codecs.register("zstd", |data: &[u8], size: usize| my_zstd(data, size));
//! ```

use bytes::Bytes;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Compression tags known to recorders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    None,
    Bz2,
    Lz4,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Bz2 => "bz2",
            Compression::Lz4 => "lz4",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "none" => Some(Compression::None),
            "bz2" => Some(Compression::Bz2),
            "lz4" => Some(Compression::Lz4),
            _ => None,
        }
    }

    /// Compress a chunk's data section.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Bz2 => {
                let mut encoder =
                    bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            Compression::Lz4 => {
                let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
                encoder.write_all(data)?;
                encoder
                    .finish()
                    .map_err(|e| Error::Decompression(format!("lz4 encode: {}", e)))
            }
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decompresses one chunk payload to its recorded size
pub trait Decompressor: Send + Sync {
    fn decompress(&self, compressed: &[u8], expected_size: usize) -> Result<Bytes>;
}

impl<F> Decompressor for F
where
    F: Fn(&[u8], usize) -> Result<Bytes> + Send + Sync,
{
    fn decompress(&self, compressed: &[u8], expected_size: usize) -> Result<Bytes> {
        self(compressed, expected_size)
    }
}

/// Tag → decompressor table
#[derive(Clone, Default)]
pub struct CodecRegistry {
    decoders: HashMap<String, Arc<dyn Decompressor>>,
}

lazy_static! {
    static ref DEFAULT_REGISTRY: Arc<CodecRegistry> = {
        tracing::debug!("Initializing chunk codecs (none, bz2, lz4)");
        Arc::new(CodecRegistry::with_defaults())
    };
}

impl CodecRegistry {
    /// A registry with no codecs at all
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry with `none`, `bz2`, and `lz4`
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Compression::None.as_str(), decompress_none);
        registry.register(Compression::Bz2.as_str(), decompress_bz2);
        registry.register(Compression::Lz4.as_str(), decompress_lz4);
        registry
    }

    /// The process-wide default registry, initialized on first call.
    pub fn shared() -> Arc<CodecRegistry> {
        DEFAULT_REGISTRY.clone()
    }

    pub fn register(&mut self, tag: impl Into<String>, decoder: impl Decompressor + 'static) {
        self.decoders.insert(tag.into(), Arc::new(decoder));
    }

    pub fn supports(&self, tag: &str) -> bool {
        self.decoders.contains_key(tag)
    }

    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.decoders.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Decompress `compressed` using the codec registered for `tag`.
    pub fn decompress(&self, tag: &str, compressed: &[u8], expected_size: usize) -> Result<Bytes> {
        let decoder = self
            .decoders
            .get(tag)
            .ok_or_else(|| Error::UnsupportedCompression(tag.to_string()))?;
        let out = decoder.decompress(compressed, expected_size)?;
        check_size(expected_size, out.len())?;
        Ok(out)
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

fn check_size(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(Error::SizeMismatch { expected, actual });
    }
    Ok(())
}

fn decompress_none(data: &[u8], expected_size: usize) -> Result<Bytes> {
    check_size(expected_size, data.len())?;
    Ok(Bytes::copy_from_slice(data))
}

fn decompress_bz2(data: &[u8], expected_size: usize) -> Result<Bytes> {
    read_bounded(bzip2::read::BzDecoder::new(data), expected_size, "bz2")
}

fn decompress_lz4(data: &[u8], expected_size: usize) -> Result<Bytes> {
    read_bounded(lz4_flex::frame::FrameDecoder::new(data), expected_size, "lz4")
}

/// Read at most one byte more than expected, so oversized output is detected
/// without decoding the whole stream.
fn read_bounded(decoder: impl Read, expected_size: usize, codec: &str) -> Result<Bytes> {
    let mut out = Vec::with_capacity(expected_size);
    decoder
        .take(expected_size as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| Error::Decompression(format!("{}: {}", codec, e)))?;
    check_size(expected_size, out.len())?;
    Ok(Bytes::from(out))
}
