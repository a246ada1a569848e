//! Core types for small-data event assembly.
//!
//! ## Architecture
//!
//! - [`Datagram`] is one source-tagged unit of small data with a fixed 16-byte header
//! - [`TransitionId`] is the service carried by a datagram (control transition or L1Accept)
//! - [`ProxyEvent`] references datagram locations without copying bytes
//! - [`Batch`] maps source index to concatenated datagrams, produced per batching cycle
//! - [`Event`] regroups a batch pair by timestamp for delivery to callbacks
//!
//! ## Usage Example
//!
//! ```rust
//! use smd_builder::types::{Datagram, DatagramIter, TransitionId, encode_stream};
//!
//! let stream = encode_stream(&[
//!     Datagram::transition(0, 1, TransitionId::Configure),
//!     Datagram::event(0, 2, vec![0xABu8]),
//! ]);
//!
//! let services: Vec<_> = DatagramIter::new(stream, 0)
//!     .map(|d| d.map(|d| d.service))
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! assert_eq!(services, vec![TransitionId::Configure, TransitionId::L1Accept]);
//! ```

mod batch;
mod datagram;
mod event;
mod proxy;
mod transition;

// Re-export all public types
pub use batch::{Batch, SourceBatch};
pub use datagram::{DGRAM_HEADER_SIZE, Datagram, DatagramHeader, DatagramIter, encode_stream};
pub use event::Event;
pub use proxy::{DgramLocation, ProxyEvent};
pub use transition::TransitionId;

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    prop_compose! {
        fn arb_datagram(source: usize)(
            timestamp in 0u64..1_000,
            service in prop::sample::select(TransitionId::ALL.to_vec()),
            payload in prop::collection::vec(any::<u8>(), 0..32),
        ) -> Datagram {
            Datagram::new(source, timestamp, service, payload)
        }
    }

    fn batch_of(source: usize, dgrams: &[Datagram]) -> Batch {
        let mut bytes = BytesMut::new();
        for d in dgrams {
            d.encode_into(&mut bytes);
        }
        let marker = dgrams.last().map(|d| d.service).unwrap_or(TransitionId::L1Accept);
        let mut map = BTreeMap::new();
        map.insert(source, SourceBatch { bytes: bytes.freeze(), marker, count: dgrams.len() });
        Batch::from_map(map)
    }

    proptest! {
        #[test]
        fn prop_stream_decoding_preserves_order(
            dgrams in prop::collection::vec(arb_datagram(0), 0..20)
        ) {
            let stream = encode_stream(&dgrams);
            let decoded: Vec<_> = DatagramIter::new(stream, 0).collect::<crate::Result<_>>().unwrap();
            prop_assert_eq!(decoded, dgrams);
        }

        #[test]
        fn prop_assembled_events_are_time_ordered(
            a in prop::collection::vec(arb_datagram(0), 0..12),
            b in prop::collection::vec(arb_datagram(1), 0..12),
        ) {
            let mut data = BTreeMap::new();
            for (source, dgrams) in [(0usize, &a), (1usize, &b)] {
                let single = batch_of(source, dgrams);
                if let Some(contents) = single.get(source) {
                    data.insert(source, contents.clone());
                }
            }
            let events = Event::assemble(&Batch::from_map(data), &Batch::default()).unwrap();

            let total: usize = events.iter().map(|e| e.dgrams.len()).sum();
            prop_assert_eq!(total, a.len() + b.len());

            for pair in events.windows(2) {
                let lhs = (pair[0].timestamp, pair[0].service.order_rank());
                let rhs = (pair[1].timestamp, pair[1].service.order_rank());
                prop_assert!(lhs <= rhs);
            }
            for event in &events {
                prop_assert!(event.dgrams.iter().all(|d| d.timestamp == event.timestamp));
                prop_assert!(event.dgrams.iter().all(|d| d.service == event.service));
            }
        }
    }

    #[test]
    fn assemble_puts_transitions_first() {
        let data = batch_of(0, &[Datagram::event(0, 5, vec![1u8])]);
        let step = batch_of(0, &[Datagram::transition(0, 5, TransitionId::BeginRun)]);

        let events = Event::assemble(&data, &step).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].service, TransitionId::BeginRun);
        assert_eq!(events[1].service, TransitionId::L1Accept);
        assert_eq!(events[1].dgram(0).unwrap().payload.as_ref(), &[1]);
    }

    #[test]
    fn repeated_timestamps_stay_separate_events() {
        let s0 = [
            Datagram::event(0, 5, vec![1u8]),
            Datagram::event(0, 5, vec![2u8]),
            Datagram::event(0, 6, vec![3u8]),
        ];
        let s1 = [Datagram::event(1, 5, vec![4u8])];
        let mut map = BTreeMap::new();
        for (source, dgrams) in [(0usize, &s0[..]), (1usize, &s1[..])] {
            if let Some(contents) = batch_of(source, dgrams).get(source) {
                map.insert(source, contents.clone());
            }
        }

        let events = Event::assemble(&Batch::from_map(map), &Batch::default()).unwrap();
        let shape: Vec<_> = events
            .iter()
            .map(|e| (e.timestamp, e.dgrams.iter().map(|d| d.payload[0]).collect::<Vec<_>>()))
            .collect();
        assert_eq!(shape, vec![(5, vec![1, 4]), (5, vec![2]), (6, vec![3])]);
    }
}
