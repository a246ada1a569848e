//! Test utilities for building synthetic small-data streams
//!
//! Shared by unit tests and the benchmark harness so fixtures stay consistent
//! across the crate.

#![cfg(any(test, feature = "benchmark"))]

use bytes::Bytes;

use crate::footer::PacketFooter;
use crate::types::{Datagram, TransitionId, encode_stream};

/// Fluent builder for one source's datagram stream.
///
/// ```ignore
/// let view = StreamBuilder::new(0)
///     .configure()
///     .begin_run(1, 42)
///     .events(&[2, 3, 4])
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct StreamBuilder {
    source: usize,
    dgrams: Vec<Datagram>,
}

impl StreamBuilder {
    pub fn new(source: usize) -> Self {
        Self { source, dgrams: Vec::new() }
    }

    /// Configure transition at timestamp 0.
    pub fn configure(self) -> Self {
        self.transition(0, TransitionId::Configure)
    }

    /// BeginRun carrying `run_number` as its payload.
    pub fn begin_run(mut self, timestamp: u64, run_number: u32) -> Self {
        self.dgrams.push(Datagram::new(
            self.source,
            timestamp,
            TransitionId::BeginRun,
            run_number.to_le_bytes().to_vec(),
        ));
        self
    }

    pub fn transition(mut self, timestamp: u64, service: TransitionId) -> Self {
        self.dgrams.push(Datagram::transition(self.source, timestamp, service));
        self
    }

    /// L1Accept events whose 8-byte payload is the timestamp.
    pub fn events(mut self, timestamps: &[u64]) -> Self {
        for &ts in timestamps {
            self.dgrams.push(Datagram::event(self.source, ts, ts.to_le_bytes().to_vec()));
        }
        self
    }

    pub fn event_with(mut self, timestamp: u64, payload: impl Into<Bytes>) -> Self {
        self.dgrams.push(Datagram::event(self.source, timestamp, payload));
        self
    }

    pub fn datagrams(self) -> Vec<Datagram> {
        self.dgrams
    }

    /// Wire encoding of the whole stream.
    pub fn build(self) -> Bytes {
        encode_stream(&self.dgrams)
    }
}

/// Pack per-source views into one footer-framed chunk.
pub fn pack(views: Vec<Bytes>) -> Bytes {
    PacketFooter::build(&views).expect("test chunks fit u32 offsets")
}

/// Streams for `n_sources` detectors covering `runs` runs of `events_per_run`
/// events each, every source seeing every event.
///
/// Timestamps advance by 10 so callers can interleave their own datagrams.
pub fn run_streams(n_sources: usize, runs: u32, events_per_run: u64) -> Vec<Bytes> {
    (0..n_sources)
        .map(|source| {
            let mut builder = StreamBuilder::new(source).configure();
            let mut ts = 10;
            for run in 0..runs {
                builder = builder.begin_run(ts, run + 1);
                ts += 10;
                let timestamps: Vec<u64> = (0..events_per_run).map(|i| ts + i * 10).collect();
                ts += events_per_run * 10;
                builder = builder.events(&timestamps).transition(ts, TransitionId::EndRun);
                ts += 10;
            }
            builder.build()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DatagramIter;

    #[test]
    fn run_streams_shape() {
        let views = run_streams(2, 2, 3);
        assert_eq!(views.len(), 2);

        let dgrams: Vec<_> = DatagramIter::new(views[1].clone(), 1).collect::<Result<_, _>>().unwrap();
        // configure + 2 * (begin + 3 events + end)
        assert_eq!(dgrams.len(), 11);
        assert_eq!(dgrams[0].service, TransitionId::Configure);
        assert_eq!(dgrams[1].service, TransitionId::BeginRun);
        assert_eq!(&dgrams[1].payload[..], &1u32.to_le_bytes());
        assert!(dgrams.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }
}
