//! HTTP Range Source
//!
//! Reads bags from any server that honours `Range` requests (S3, GCS, nginx,
//! most static file hosts).
//!
//! - `open()` sends a `HEAD` and requires `Content-Length` plus
//!   `Accept-Ranges: bytes`.
//! - `fetch()` sends `GET` with `Range: bytes=<first>-<last>` and requires
//!   `206 Partial Content`. A `200` means the server ignored the range and
//!   would send the whole file, so it is rejected.
//!
//! Connection drops surface as retryable I/O errors; 4xx statuses map to
//! non-retryable kinds.

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_LENGTH, RANGE};
use reqwest::{Client, StatusCode};
use std::io;
use std::time::Duration;

use super::{ByteStream, FileReader};
use crate::error::Result;

/// Reads byte ranges over HTTP
#[derive(Debug, Clone)]
pub struct HttpFileReader {
    url: String,
    client: Client,
}

impl HttpFileReader {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl FileReader for HttpFileReader {
    async fn open(&self) -> io::Result<u64> {
        let response = self
            .client
            .head(&self.url)
            .send()
            .await
            .map_err(to_io_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, &self.url));
        }

        let headers = response.headers();
        if !accepts_byte_ranges(headers) {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{} does not support range requests", self.url),
            ));
        }
        let size = content_length(headers).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} did not report a content length", self.url),
            )
        })?;

        tracing::debug!(url = %self.url, size, "Opened remote bag");
        Ok(size)
    }

    fn fetch(&self, offset: u64, length: u64) -> ByteStream {
        if length == 0 {
            return stream::empty().boxed();
        }
        let url = self.url.clone();
        let request = self
            .client
            .get(&self.url)
            .header(RANGE, range_header(offset, length));

        stream::once(async move {
            let response = request.send().await.map_err(to_io_error)?;
            let status = response.status();
            if status != StatusCode::PARTIAL_CONTENT {
                return Err(status_error(status, &url));
            }
            tracing::trace!(url = %url, offset, length, "Range request accepted");
            Ok::<_, io::Error>(response.bytes_stream().map_err(to_io_error))
        })
        .try_flatten()
        .boxed()
    }

    fn kind(&self) -> &'static str {
        "http"
    }
}

/// `Range` header value for `length` bytes at `offset` (the end is inclusive).
fn range_header(offset: u64, length: u64) -> String {
    format!("bytes={}-{}", offset, offset + length - 1)
}

fn accepts_byte_ranges(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').any(|unit| unit.trim().eq_ignore_ascii_case("bytes")))
        .unwrap_or(false)
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn status_error(status: StatusCode, url: &str) -> io::Error {
    let kind = match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => io::ErrorKind::NotFound,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => io::ErrorKind::PermissionDenied,
        StatusCode::RANGE_NOT_SATISFIABLE => io::ErrorKind::InvalidInput,
        StatusCode::OK => io::ErrorKind::Unsupported,
        s if s.is_server_error() => io::ErrorKind::Other,
        s if s.is_client_error() => io::ErrorKind::InvalidInput,
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, format!("HTTP {} from {}", status, url))
}

fn to_io_error(error: reqwest::Error) -> io::Error {
    let kind = if error.is_timeout() {
        io::ErrorKind::TimedOut
    } else if error.is_connect() {
        io::ErrorKind::ConnectionRefused
    } else {
        io::ErrorKind::Other
    };
    io::Error::new(kind, error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_range_header_is_inclusive() {
        assert_eq!(range_header(0, 1), "bytes=0-0");
        assert_eq!(range_header(4096, 1024), "bytes=4096-5119");
    }

    #[test]
    fn test_accepts_byte_ranges() {
        let mut headers = HeaderMap::new();
        assert!(!accepts_byte_ranges(&headers));

        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("none"));
        assert!(!accepts_byte_ranges(&headers));

        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("Bytes"));
        assert!(accepts_byte_ranges(&headers));
    }

    #[test]
    fn test_content_length() {
        let mut headers = HeaderMap::new();
        assert_eq!(content_length(&headers), None);
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("123456"));
        assert_eq!(content_length(&headers), Some(123_456));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("abc"));
        assert_eq!(content_length(&headers), None);
    }

    #[test]
    fn test_status_error_kinds() {
        let kind = |s| status_error(s, "http://x").kind();
        assert_eq!(kind(StatusCode::NOT_FOUND), io::ErrorKind::NotFound);
        assert_eq!(kind(StatusCode::FORBIDDEN), io::ErrorKind::PermissionDenied);
        assert_eq!(kind(StatusCode::OK), io::ErrorKind::Unsupported);
        assert_eq!(kind(StatusCode::BAD_GATEWAY), io::ErrorKind::Other);
    }

    #[tokio::test]
    async fn test_open_unreachable_host() {
        let reader =
            HttpFileReader::new("http://127.0.0.1:9/missing.bag", Duration::from_secs(2)).unwrap();
        assert!(reader.open().await.is_err());
    }
}
