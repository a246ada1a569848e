//! Coordinator-side chunker over N small-data sources
//!
//! The reader merges the heads of every source in timestamp order (transitions
//! ahead of events at equal timestamps) and cuts the merged stream into
//! [`SmdChunk`]s. Each chunk is footer-packed so any rank can rebuild the
//! per-source views with [`PacketFooter::split`](crate::footer::PacketFooter::split).
//!
//! ## Architecture
//!
//! ```text
//! Source 0 ──┐
//! Source 1 ──┼─> SmdReader (merge + BeginRun bookkeeping) ─> SmdChunk ─> strategy
//! Source N ──┘
//! ```
//!
//! A BeginRun always opens a new chunk, so a chunk never spans a run boundary
//! except at its start. The reader creates the canonical [`Run`] for every
//! BeginRun and keeps it alive until the next one.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, trace};

use crate::footer::PacketFooter;
use crate::handles::{DataSource, DataSourceRef, Run, RunRef};
use crate::identity::Session;
use crate::provider::Source;
use crate::types::{Datagram, Event, TransitionId};

/// A source that failed while being read; it was treated as exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source: usize,
    pub error: String,
}

/// One unit of work handed to a batching loop.
#[derive(Debug, Clone)]
pub struct SmdChunk {
    pub seq: u64,
    pub datasource: DataSourceRef,
    /// Run active when the chunk starts.
    pub run: Option<RunRef>,
    /// Runs begun inside this chunk, in order.
    pub begins: Vec<RunRef>,
    /// Footer-packed per-source views.
    pub smd: Bytes,
    pub n_sources: usize,
    /// L1Accept events in the chunk.
    pub events: usize,
    /// Canonical handles for `run` and `begins`, held while the chunk is in flight.
    pub(crate) handles: Vec<Arc<Run>>,
}

impl SmdChunk {
    pub fn begins_run(&self) -> bool {
        !self.begins.is_empty()
    }
}

/// Reader limits.
#[derive(Debug, Clone, Copy)]
pub struct ReaderLimits {
    pub chunk_events: usize,
    pub max_events: Option<u64>,
}

pub struct SmdReader {
    sources: Vec<Box<dyn Source>>,
    heads: Vec<Option<Datagram>>,
    primed: bool,
    session: Arc<Session>,
    datasource: Arc<DataSource>,
    current_run: Option<Arc<Run>>,
    limits: ReaderLimits,
    events_read: u64,
    next_seq: u64,
    done: bool,
    failures: Vec<SourceFailure>,
}

impl SmdReader {
    /// Build a reader over sources already positioned past their Configure.
    pub fn new(
        sources: Vec<Box<dyn Source>>,
        session: Arc<Session>,
        datasource: Arc<DataSource>,
        limits: ReaderLimits,
    ) -> Self {
        let n = sources.len();
        Self {
            sources,
            heads: vec![None; n],
            primed: false,
            session,
            datasource,
            current_run: None,
            limits: ReaderLimits { chunk_events: limits.chunk_events.max(1), ..limits },
            events_read: 0,
            next_seq: 0,
            done: false,
            failures: Vec::new(),
        }
    }

    pub fn n_sources(&self) -> usize {
        self.sources.len()
    }

    /// Run most recently begun by the reader.
    pub fn current_run(&self) -> Option<&Arc<Run>> {
        self.current_run.as_ref()
    }

    pub fn events_read(&self) -> u64 {
        self.events_read
    }

    /// Sources that failed so far.
    pub fn failures(&self) -> &[SourceFailure] {
        &self.failures
    }

    /// Drain the recorded source failures.
    pub fn take_failures(&mut self) -> Vec<SourceFailure> {
        std::mem::take(&mut self.failures)
    }

    /// Read the next chunk, or `None` once every source is exhausted.
    pub async fn next_chunk(&mut self) -> Option<SmdChunk> {
        if !self.primed {
            for index in 0..self.sources.len() {
                self.advance(index).await;
            }
            self.primed = true;
        }
        if self.done {
            return None;
        }

        let n_sources = self.sources.len();
        let mut views: Vec<BytesMut> = vec![BytesMut::new(); n_sources];
        let start_run = self.current_run.as_ref().map(|run| run.to_ref());
        let mut handles: Vec<Arc<Run>> = self.current_run.iter().cloned().collect();
        let mut begins = Vec::new();
        let mut events = 0usize;
        let mut dgrams = 0usize;

        while let Some(key) = self.min_key() {
            let (_, _, service) = key;
            if service == TransitionId::BeginRun.as_u8() && dgrams > 0 {
                break;
            }

            let mut group = Vec::new();
            for index in 0..n_sources {
                if self.heads[index].as_ref().map(order_key) == Some(key) {
                    if let Some(dgram) = self.heads[index].take() {
                        dgram.encode_into(&mut views[index]);
                        group.push(dgram);
                    }
                    self.advance(index).await;
                }
            }
            dgrams += group.len();

            let Some(first) = group.first() else { break };
            let (timestamp, service) = (first.timestamp, first.service);
            trace!(timestamp, %service, sources = group.len(), "Merged event");

            match service {
                TransitionId::BeginRun => {
                    let event = Event { timestamp, service, dgrams: group };
                    let run = Run::begin(&self.session.runs, self.datasource.to_ref(), &event);
                    begins.push(run.to_ref());
                    handles.push(Arc::clone(&run));
                    self.current_run = Some(run);
                }
                TransitionId::L1Accept => {
                    events += 1;
                    self.events_read += 1;
                    if self.limits.max_events.is_some_and(|max| self.events_read >= max) {
                        info!(events = self.events_read, "Event limit reached");
                        self.done = true;
                        break;
                    }
                    if events >= self.limits.chunk_events {
                        break;
                    }
                }
                _ => {}
            }
        }

        if dgrams == 0 {
            self.done = true;
            return None;
        }

        let smd = match PacketFooter::build(&views) {
            Ok(smd) => smd,
            Err(e) => {
                error!(events, dgrams, "Chunk cannot be framed, reading stops: {e}");
                self.done = true;
                return None;
            }
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        debug!(seq, events, dgrams, bytes = smd.len(), begins = begins.len(), "Chunk read");

        Some(SmdChunk {
            seq,
            datasource: self.datasource.to_ref(),
            run: start_run,
            begins,
            smd,
            n_sources,
            events,
            handles,
        })
    }

    fn min_key(&self) -> Option<(u64, u8, u8)> {
        self.heads.iter().flatten().map(order_key).min()
    }

    async fn advance(&mut self, index: usize) {
        self.heads[index] = match self.sources[index].next_datagram().await {
            Ok(Some(mut dgram)) => {
                dgram.source = index;
                Some(dgram)
            }
            Ok(None) => None,
            Err(e) => {
                error!(source = index, source_name = self.sources[index].name(), "Source failed: {e}");
                self.failures.push(SourceFailure { source: index, error: e.to_string() });
                None
            }
        };
    }
}

fn order_key(dgram: &Datagram) -> (u64, u8, u8) {
    (dgram.timestamp, dgram.service.order_rank(), dgram.service.as_u8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ReplaySource;
    use crate::test_utils::StreamBuilder;
    use crate::types::DatagramIter;

    fn reader(views: Vec<Bytes>, chunk_events: usize, max_events: Option<u64>) -> SmdReader {
        let session = Arc::new(Session::new());
        let configs = (0..views.len())
            .map(|s| Datagram::transition(s, 0, TransitionId::Configure))
            .collect();
        let datasource = DataSource::register(&session.datasources, configs).unwrap();
        let sources: Vec<Box<dyn Source>> = views
            .into_iter()
            .enumerate()
            .map(|(i, v)| Box::new(ReplaySource::from_bytes(i, v)) as Box<dyn Source>)
            .collect();
        SmdReader::new(sources, session, datasource, ReaderLimits { chunk_events, max_events })
    }

    async fn collect(reader: &mut SmdReader) -> Vec<SmdChunk> {
        let mut chunks = Vec::new();
        while let Some(chunk) = reader.next_chunk().await {
            chunks.push(chunk);
        }
        chunks
    }

    fn view_timestamps(chunk: &SmdChunk, source: usize) -> Vec<u64> {
        let views = PacketFooter::split(&chunk.smd, chunk.n_sources).unwrap();
        DatagramIter::new(views[source].clone(), source).map(|d| d.unwrap().timestamp).collect()
    }

    #[tokio::test]
    async fn chunks_close_after_chunk_events() {
        let views = vec![
            StreamBuilder::new(0).events(&[1, 2, 3, 4, 5]).build(),
            StreamBuilder::new(1).events(&[2, 4]).build(),
        ];
        let mut reader = reader(views, 2, None);
        let chunks = collect(&mut reader).await;

        let sizes: Vec<_> = chunks.iter().map(|c| c.events).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(view_timestamps(&chunks[0], 0), vec![1, 2]);
        assert_eq!(view_timestamps(&chunks[0], 1), vec![2]);
        assert_eq!(view_timestamps(&chunks[1], 1), vec![4]);
        assert!(view_timestamps(&chunks[2], 1).is_empty());
        assert_eq!(chunks.iter().map(|c| c.seq).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn begin_run_opens_a_new_chunk() {
        let views = vec![
            StreamBuilder::new(0)
                .begin_run(1, 7)
                .events(&[2, 3])
                .begin_run(4, 8)
                .events(&[5])
                .build(),
        ];
        let mut reader = reader(views, 100, None);
        let chunks = collect(&mut reader).await;

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].run.is_none());
        assert_eq!(chunks[0].begins.len(), 1);
        assert_eq!(chunks[0].begins[0].run_number, Some(7));
        assert_eq!(chunks[1].run, Some(chunks[0].begins[0]));
        assert_eq!(chunks[1].begins[0].run_number, Some(8));
        assert_eq!(view_timestamps(&chunks[1], 0), vec![4, 5]);
        assert_eq!(reader.current_run().unwrap().run_number(), Some(8));
    }

    #[tokio::test]
    async fn canonical_run_resolves_while_current() {
        let views = vec![StreamBuilder::new(0).begin_run(1, 3).events(&[2]).build()];
        let mut reader = reader(views, 100, None);
        let chunk = reader.next_chunk().await.unwrap();

        let run = reader.session.runs.resolve(chunk.begins[0].id).unwrap();
        assert!(run.matches(&chunk.begins[0]));
    }

    #[tokio::test]
    async fn max_events_stops_reading() {
        let views = vec![StreamBuilder::new(0).events(&[1, 2, 3, 4, 5, 6]).build()];
        let mut reader = reader(views, 4, Some(5));
        let chunks = collect(&mut reader).await;

        assert_eq!(chunks.iter().map(|c| c.events).sum::<usize>(), 5);
        assert_eq!(reader.events_read(), 5);
    }

    #[tokio::test]
    async fn failing_source_is_recorded_and_skipped() {
        let good = StreamBuilder::new(0).events(&[1, 2, 3]).build();
        let full = StreamBuilder::new(1).events(&[1, 2]).build();
        let cut = full.slice(..full.len() - 3);
        let mut reader = reader(vec![good, cut], 100, None);
        let chunks = collect(&mut reader).await;

        assert_eq!(chunks.len(), 1);
        assert_eq!(view_timestamps(&chunks[0], 0), vec![1, 2, 3]);
        assert_eq!(view_timestamps(&chunks[0], 1), vec![1]);
        assert_eq!(reader.failures().len(), 1);
        assert_eq!(reader.failures()[0].source, 1);
    }

    #[tokio::test]
    async fn empty_sources_give_no_chunks() {
        let mut reader = reader(vec![Bytes::new(), Bytes::new()], 10, None);
        assert!(reader.next_chunk().await.is_none());
        assert!(reader.next_chunk().await.is_none());
    }
}
