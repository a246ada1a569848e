//! Batches emitted by the event builder

use bytes::Bytes;
use std::collections::BTreeMap;

use super::{DatagramIter, TransitionId};

/// Concatenated datagrams from one source within a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBatch {
    /// Whole datagrams (header included), in arrival order.
    pub bytes: Bytes,

    /// Service of the last datagram appended.
    pub marker: TransitionId,

    /// Number of datagrams in `bytes`.
    pub count: usize,
}

impl SourceBatch {
    /// Decode the datagrams back out of this batch.
    pub fn datagrams(&self, source: usize) -> DatagramIter {
        DatagramIter::new(self.bytes.clone(), source)
    }
}

/// Immutable mapping from source index to that source's batch contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    sources: BTreeMap<usize, SourceBatch>,
}

impl Batch {
    pub(crate) fn from_map(sources: BTreeMap<usize, SourceBatch>) -> Self {
        Self { sources }
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Number of sources present.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn get(&self, source: usize) -> Option<&SourceBatch> {
        self.sources.get(&source)
    }

    /// Source indices present, ascending.
    pub fn sources(&self) -> impl Iterator<Item = usize> + '_ {
        self.sources.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &SourceBatch)> {
        self.sources.iter().map(|(k, v)| (*k, v))
    }

    /// Total datagrams across sources.
    pub fn datagram_count(&self) -> usize {
        self.sources.values().map(|b| b.count).sum()
    }

    /// Total bytes across sources.
    pub fn byte_len(&self) -> usize {
        self.sources.values().map(|b| b.bytes.len()).sum()
    }
}
