use async_trait::async_trait;
use futures::stream::{StreamExt, TryStreamExt};
use std::io;
use std::sync::Arc;

use baghouse_observability::metrics;

use super::{ByteStream, FileReader};
use crate::telemetry::{Metadata, MetadataSink};

/// Wraps a source and reports every received segment.
///
/// Each segment increments `baghouse_bytes_fetched_total` and, when a sink is
/// attached, is reported as [`Metadata::DataReceived`].
pub struct MeteredReader {
    inner: Arc<dyn FileReader>,
    sink: Option<Arc<dyn MetadataSink>>,
}

impl MeteredReader {
    pub fn new(inner: Arc<dyn FileReader>, sink: Option<Arc<dyn MetadataSink>>) -> Self {
        Self { inner, sink }
    }
}

#[async_trait]
impl FileReader for MeteredReader {
    async fn open(&self) -> io::Result<u64> {
        self.inner.open().await
    }

    fn fetch(&self, offset: u64, length: u64) -> ByteStream {
        let counter = metrics::BYTES_FETCHED_TOTAL.with_label_values(&[self.inner.kind()]);
        let sink = self.sink.clone();

        self.inner
            .fetch(offset, length)
            .inspect_ok(move |segment| {
                let bytes = segment.len() as u64;
                counter.inc_by(bytes);
                if let Some(sink) = &sink {
                    sink.notify(Metadata::DataReceived { bytes });
                }
            })
            .boxed()
    }

    fn kind(&self) -> &'static str {
        self.inner.kind()
    }
}
