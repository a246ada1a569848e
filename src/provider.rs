//! Source trait for small-data streams

use crate::Result;
use crate::types::Datagram;

/// A producer of small-data datagrams for one stream.
///
/// Sources abstract over where a stream comes from (a recorded file, an
/// in-memory replay, a live feed) and handle their own pacing internally.
#[async_trait::async_trait]
pub trait Source: Send + 'static {
    /// Get the next datagram
    ///
    /// Returns:
    /// - `Ok(Some(dgram))` - Datagram available
    /// - `Ok(None)` - Stream ended (normal termination)
    /// - `Err(e)` - Framing or transport error; the stream is not read again
    async fn next_datagram(&mut self) -> Result<Option<Datagram>>;

    /// Human-readable name used in logs
    fn name(&self) -> &str {
        "source"
    }
}

#[async_trait::async_trait]
impl Source for Box<dyn Source> {
    async fn next_datagram(&mut self) -> Result<Option<Datagram>> {
        (**self).next_datagram().await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
