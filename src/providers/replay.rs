//! Replay source over a recorded small-data stream

use bytes::Bytes;
use std::path::Path;
use tracing::{debug, info, trace};

use crate::provider::Source;
use crate::types::Datagram;
use crate::{BuilderError, Result};

/// Static source that replays a recorded stream buffer.
pub struct ReplaySource {
    name: String,
    index: usize,
    data: Bytes,
    offset: usize,
    failed: bool,
}

impl ReplaySource {
    /// Replay an in-memory stream as source `index`.
    pub fn from_bytes(index: usize, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        debug!(index, bytes = data.len(), "Replay source created");
        Self { name: format!("replay-{index}"), index, data, offset: 0, failed: false }
    }

    /// Replay a recorded `.smd` file as source `index`.
    pub fn open<P: AsRef<Path>>(index: usize, path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .map_err(|e| BuilderError::file_error(path.to_path_buf(), e))?;
        info!("Opened small-data file {} ({} bytes)", path.display(), data.len());

        let mut source = Self::from_bytes(index, data);
        source.name = path.display().to_string();
        Ok(source)
    }

    /// Bytes not yet replayed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }
}

#[async_trait::async_trait]
impl Source for ReplaySource {
    async fn next_datagram(&mut self) -> Result<Option<Datagram>> {
        if self.failed || self.offset >= self.data.len() {
            return Ok(None);
        }

        match Datagram::decode_at(&self.data, self.offset, self.index) {
            Ok(dgram) => {
                self.offset += dgram.extent();
                trace!(source = self.index, timestamp = dgram.timestamp, "Replayed datagram");
                Ok(Some(dgram))
            }
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::StreamBuilder;
    use crate::types::TransitionId;
    use std::io::Write;

    #[tokio::test]
    async fn replays_in_order_then_ends() {
        let stream = StreamBuilder::new(0).configure().events(&[1, 2]).build();
        let mut source = ReplaySource::from_bytes(0, stream);

        let first = source.next_datagram().await.unwrap().unwrap();
        assert_eq!(first.service, TransitionId::Configure);
        assert_eq!(source.next_datagram().await.unwrap().unwrap().timestamp, 1);
        assert_eq!(source.next_datagram().await.unwrap().unwrap().timestamp, 2);
        assert!(source.next_datagram().await.unwrap().is_none());
        assert_eq!(source.remaining(), 0);
    }

    #[tokio::test]
    async fn truncated_tail_fails_once() {
        let stream = StreamBuilder::new(3).events(&[1, 2]).build();
        let mut source = ReplaySource::from_bytes(3, stream.slice(..stream.len() - 2));

        assert!(source.next_datagram().await.unwrap().is_some());
        let err = source.next_datagram().await.unwrap_err();
        assert!(matches!(err, BuilderError::TruncatedStream { source_index: 3 }));
        assert!(source.next_datagram().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn opens_recorded_file() {
        let stream = StreamBuilder::new(0).configure().events(&[7]).build();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&stream).unwrap();

        let mut source = ReplaySource::open(0, file.path()).unwrap();
        assert!(source.name().ends_with(&*file.path().file_name().unwrap().to_string_lossy()));
        assert_eq!(source.next_datagram().await.unwrap().unwrap().service, TransitionId::Configure);
    }

    #[test]
    fn missing_file_is_file_error() {
        let err = ReplaySource::open(0, "/nonexistent/run.smd").err().unwrap();
        assert!(matches!(err, BuilderError::File { .. }));
    }
}
