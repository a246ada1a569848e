//! Live source fed by an in-process datagram stream

use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, trace, warn};

use crate::provider::Source;
use crate::types::Datagram;
use crate::Result;

/// Live source that yields datagrams as an upstream producer emits them.
///
/// The stream ends when the producer side is dropped. Datagrams are
/// re-tagged with this source's index.
pub struct LiveSource {
    name: String,
    index: usize,
    stream: BoxStream<'static, Datagram>,
    received: u64,
    last_timestamp: Option<u64>,
}

impl LiveSource {
    /// Wrap any datagram stream as source `index`.
    pub fn from_stream<S>(index: usize, stream: S) -> Self
    where
        S: Stream<Item = Datagram> + Send + 'static,
    {
        Self { name: format!("live-{index}"), index, stream: stream.boxed(), received: 0, last_timestamp: None }
    }

    /// Create a bounded channel whose receiver end becomes source `index`.
    pub fn channel(index: usize, capacity: usize) -> (mpsc::Sender<Datagram>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        info!(index, capacity, "Live source channel opened");
        (tx, Self::from_stream(index, ReceiverStream::new(rx)))
    }

    /// Datagrams received so far.
    pub fn received(&self) -> u64 {
        self.received
    }
}

#[async_trait::async_trait]
impl Source for LiveSource {
    async fn next_datagram(&mut self) -> Result<Option<Datagram>> {
        let Some(mut dgram) = self.stream.next().await else {
            debug!(source = self.index, received = self.received, "Live source ended");
            return Ok(None);
        };

        dgram.source = self.index;
        if self.last_timestamp.is_some_and(|last| dgram.timestamp < last) {
            warn!(
                source = self.index,
                timestamp = dgram.timestamp,
                "Live datagram arrived out of timestamp order"
            );
        }
        self.last_timestamp = Some(dgram.timestamp);
        self.received += 1;
        trace!(source = self.index, timestamp = dgram.timestamp, "Live datagram");
        Ok(Some(dgram))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
