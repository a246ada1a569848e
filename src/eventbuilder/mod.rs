//! Event builder: pairs datagrams across sources and emits batches.
//!
//! The builder walks one view per source. Each call to
//! [`EventBuilder::next_event`] takes the earliest head datagram across
//! sources, keyed by `(timestamp, transitions first)`, and pairs it with every
//! other source whose head carries the same key. The result is a
//! [`ProxyEvent`] holding only locations.
//!
//! Proxy events are folded into an accumulation and materialized on demand by
//! [`EventBuilder::gen_bytearray_batch`], which copies whole datagrams into a
//! data batch (L1Accept) and a step batch (transitions). Batch boundaries are
//! chosen by the caller, see [`EventBuilderManager`].
//!
//! ```rust
//! use bytes::Bytes;
//! use smd_builder::eventbuilder::EventBuilder;
//! use smd_builder::types::{Datagram, encode_stream};
//!
//! let views = vec![
//!     encode_stream(&[Datagram::event(0, 1, vec![1u8]), Datagram::event(0, 2, vec![2u8])]),
//!     encode_stream(&[Datagram::event(1, 1, vec![3u8])]),
//! ];
//! let mut eb = EventBuilder::new(views);
//!
//! let mut proxies = Vec::new();
//! while let Some(evt) = eb.next_event().unwrap() {
//!     proxies.push(evt);
//! }
//! assert_eq!(proxies.len(), 2);
//! assert_eq!(proxies[0].dgrams.len(), 2); // both sources at timestamp 1
//!
//! let (data, step) = eb.gen_bytearray_batch(&proxies).unwrap();
//! assert_eq!(data.get(0).unwrap().count, 2);
//! assert!(step.is_empty());
//! ```

mod callback;
mod manager;

pub use callback::{FilterCallback, Passthrough, SmdCallback, SmdEvents};
pub use manager::{Batches, EventBuilderManager};

use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

use crate::types::{
    Batch, DatagramHeader, DgramLocation, ProxyEvent, SourceBatch, TransitionId,
};
use crate::{BuilderError, Result};

/// Lifecycle of one batching session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderState {
    /// Nothing accumulated; input remains.
    AwaitingInput,
    /// Proxy events accepted and input remains.
    Accumulating,
    /// Proxy events accepted and every view is consumed; the next batch is the last.
    BatchReady,
    /// Every view consumed and nothing accumulated.
    Exhausted,
}

/// Per-source cursor state.
#[derive(Debug)]
struct SourceCursor {
    view: Bytes,
    offset: usize,
    head: Option<DatagramHeader>,
}

impl SourceCursor {
    fn remaining(&self) -> usize {
        self.view.len().saturating_sub(self.offset)
    }
}

/// Batching engine over one set of per-source views.
#[derive(Debug)]
pub struct EventBuilder {
    cursors: Vec<SourceCursor>,
    accumulated: Vec<ProxyEvent>,
    state: BuilderState,
    events_built: u64,
    dgrams_materialized: u64,
}

impl EventBuilder {
    /// Create a builder over one view per source (index = source).
    pub fn new(views: Vec<Bytes>) -> Self {
        let cursors: Vec<_> =
            views.into_iter().map(|view| SourceCursor { view, offset: 0, head: None }).collect();
        let mut builder = Self {
            cursors,
            accumulated: Vec::new(),
            state: BuilderState::AwaitingInput,
            events_built: 0,
            dgrams_materialized: 0,
        };
        builder.refresh_state();
        builder
    }

    pub fn n_sources(&self) -> usize {
        self.cursors.len()
    }

    pub fn state(&self) -> BuilderState {
        self.state
    }

    /// True while any view has unconsumed bytes.
    pub fn has_more(&self) -> bool {
        self.cursors.iter().any(|c| c.remaining() > 0)
    }

    /// Total bytes consumed across views; used to detect stalled pulls.
    pub fn consumed(&self) -> usize {
        self.cursors.iter().map(|c| c.offset.min(c.view.len())).sum()
    }

    /// Number of proxy events built so far.
    pub fn events_built(&self) -> u64 {
        self.events_built
    }

    /// Number of datagrams copied into batches so far.
    pub fn dgrams_materialized(&self) -> u64 {
        self.dgrams_materialized
    }

    fn refresh_state(&mut self) {
        self.state = match (self.accumulated.is_empty(), self.has_more()) {
            (true, true) => BuilderState::AwaitingInput,
            (true, false) => BuilderState::Exhausted,
            (false, true) => BuilderState::Accumulating,
            (false, false) => BuilderState::BatchReady,
        };
    }

    /// Decode the head datagram of every source that has input and no head yet.
    fn load_heads(&mut self) -> Result<()> {
        for (source, cursor) in self.cursors.iter_mut().enumerate() {
            if cursor.head.is_some() || cursor.remaining() == 0 {
                continue;
            }
            let header = DatagramHeader::parse(&cursor.view, cursor.offset, source)?;
            cursor.head = Some(header);
        }
        Ok(())
    }

    /// Build the next paired proxy event, or `None` once every view is consumed.
    ///
    /// A source whose remaining bytes cannot hold a header fails with
    /// `TruncatedStream`. A declared payload running past the view is not
    /// detected here; its location fails when materialized.
    pub fn next_event(&mut self) -> Result<Option<ProxyEvent>> {
        self.load_heads()?;

        let key = self
            .cursors
            .iter()
            .filter_map(|c| c.head)
            .map(|h| (h.timestamp, h.service.order_rank(), h.service.as_u8()))
            .min();
        let Some((timestamp, _, service_id)) = key else {
            self.refresh_state();
            return Ok(None);
        };

        let mut service = TransitionId::L1Accept;
        let mut dgrams = Vec::new();
        for (source, cursor) in self.cursors.iter_mut().enumerate() {
            let Some(head) = cursor.head else { continue };
            if head.timestamp != timestamp || head.service.as_u8() != service_id {
                continue;
            }

            if head.source as usize != source {
                warn!(
                    view = source,
                    tagged = head.source,
                    timestamp,
                    "Datagram source tag disagrees with its view"
                );
            }

            service = head.service;
            dgrams.push(DgramLocation { source, offset: cursor.offset, size: head.extent() });
            cursor.offset = (cursor.offset + head.extent()).min(cursor.view.len());
            cursor.head = None;
        }

        self.events_built += 1;
        trace!(timestamp, %service, sources = dgrams.len(), "Built proxy event");
        self.refresh_state();
        Ok(Some(ProxyEvent { timestamp, service, dgrams }))
    }

    /// Fold proxy events into the current accumulation, keeping arrival order.
    pub fn accept(&mut self, proxy_events: &[ProxyEvent]) {
        self.accumulated.extend_from_slice(proxy_events);
        self.refresh_state();
    }

    /// Materialize `proxy_events` plus anything accepted earlier into
    /// `(data_batch, step_batch)` and reset the accumulation.
    ///
    /// Fails with `TruncatedStream` when any location runs past its view; the
    /// whole accumulation is dropped in that case.
    pub fn gen_bytearray_batch(&mut self, proxy_events: &[ProxyEvent]) -> Result<(Batch, Batch)> {
        self.accept(proxy_events);
        let accumulated = std::mem::take(&mut self.accumulated);
        let result = self.materialize(&accumulated);
        self.refresh_state();
        result
    }

    fn materialize(&mut self, events: &[ProxyEvent]) -> Result<(Batch, Batch)> {
        for loc in events.iter().flat_map(|e| &e.dgrams) {
            let cursor = self.cursors.get(loc.source).ok_or_else(|| {
                BuilderError::malformed_datagram(loc.source, loc.offset, "no such source")
            })?;
            if loc.offset + loc.size > cursor.view.len() {
                return Err(BuilderError::truncated(loc.source));
            }
        }

        let mut data: BTreeMap<usize, (BytesMut, TransitionId, usize)> = BTreeMap::new();
        let mut step: BTreeMap<usize, (BytesMut, TransitionId, usize)> = BTreeMap::new();

        for event in events {
            let target = if event.is_transition() { &mut step } else { &mut data };
            for loc in &event.dgrams {
                let view = &self.cursors[loc.source].view;
                let entry = target
                    .entry(loc.source)
                    .or_insert_with(|| (BytesMut::new(), event.service, 0));
                entry.0.extend_from_slice(&view[loc.offset..loc.offset + loc.size]);
                entry.1 = event.service;
                entry.2 += 1;
            }
        }

        let freeze = |map: BTreeMap<usize, (BytesMut, TransitionId, usize)>| {
            Batch::from_map(
                map.into_iter()
                    .map(|(source, (bytes, marker, count))| {
                        (source, SourceBatch { bytes: bytes.freeze(), marker, count })
                    })
                    .collect(),
            )
        };
        let (data, step) = (freeze(data), freeze(step));

        self.dgrams_materialized += (data.datagram_count() + step.datagram_count()) as u64;
        debug!(
            events = events.len(),
            data_bytes = data.byte_len(),
            step_bytes = step.byte_len(),
            "Generated batch"
        );
        Ok((data, step))
    }
}
