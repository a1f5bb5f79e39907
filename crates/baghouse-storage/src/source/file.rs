use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::io::{self, SeekFrom};
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::{ByteStream, FileReader};

/// Size of each read issued against the file
const READ_SIZE: usize = 64 * 1024;

/// Reads byte ranges from a file on local disk
#[derive(Debug, Clone)]
pub struct LocalFileReader {
    path: PathBuf,
}

impl LocalFileReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FileReader for LocalFileReader {
    async fn open(&self) -> io::Result<u64> {
        let metadata = tokio::fs::metadata(&self.path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a file", self.path.display()),
            ));
        }
        Ok(metadata.len())
    }

    fn fetch(&self, offset: u64, length: u64) -> ByteStream {
        let path = self.path.clone();
        let state = (None::<File>, offset, length);

        stream::try_unfold(state, move |(file, position, remaining)| {
            let path = path.clone();
            async move {
                if remaining == 0 {
                    return Ok(None);
                }
                let mut file = match file {
                    Some(file) => file,
                    None => {
                        let mut file = File::open(&path).await?;
                        file.seek(SeekFrom::Start(position)).await?;
                        file
                    }
                };

                let mut buf = vec![0u8; remaining.min(READ_SIZE as u64) as usize];
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("{} ended at byte {}", path.display(), position),
                    ));
                }
                buf.truncate(n);

                let next = (Some(file), position + n as u64, remaining - n as u64);
                Ok::<_, io::Error>(Some((Bytes::from(buf), next)))
            }
        })
        .boxed()
    }

    fn kind(&self) -> &'static str {
        "file"
    }
}
