use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::io;

use super::{ByteStream, FileReader};

/// Serves byte ranges from a buffer already in memory
#[derive(Debug, Clone)]
pub struct MemoryReader {
    data: Bytes,
    segment_size: usize,
}

impl MemoryReader {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            segment_size: 64 * 1024,
        }
    }

    /// Split fetched ranges into segments of at most `segment_size` bytes.
    pub fn with_segment_size(mut self, segment_size: usize) -> Self {
        self.segment_size = segment_size.max(1);
        self
    }
}

#[async_trait]
impl FileReader for MemoryReader {
    async fn open(&self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn fetch(&self, offset: u64, length: u64) -> ByteStream {
        let end = offset.saturating_add(length);
        if end > self.data.len() as u64 {
            let err = io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("range {}..{} past end of {} bytes", offset, end, self.data.len()),
            );
            return stream::once(async move { Err(err) }).boxed();
        }

        let range = self.data.slice(offset as usize..end as usize);
        let segments: Vec<io::Result<Bytes>> = (0..range.len())
            .step_by(self.segment_size)
            .map(|start| {
                let stop = (start + self.segment_size).min(range.len());
                Ok(range.slice(start..stop))
            })
            .collect();
        stream::iter(segments).boxed()
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
