//! Events handed to analysis callbacks

use std::collections::{BTreeMap, HashMap};

use super::{Batch, Datagram, TransitionId};
use crate::Result;

/// Datagrams from all sources that share one timestamp and service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub timestamp: u64,
    pub service: TransitionId,
    /// One datagram per contributing source, ascending by source.
    pub dgrams: Vec<Datagram>,
}

impl Event {
    /// Datagram contributed by `source`, if any.
    pub fn dgram(&self, source: usize) -> Option<&Datagram> {
        self.dgrams.iter().find(|d| d.source == source)
    }

    pub fn is_transition(&self) -> bool {
        self.service.is_transition()
    }

    /// Re-key the contents of a batch pair by sequence id.
    ///
    /// Datagrams from both batches are grouped by `(timestamp, service)` and
    /// returned in timestamp order with transitions ahead of events that share
    /// a timestamp. A source that repeats a key contributes its n-th datagram
    /// to the n-th event with that key, so repeated sequence ids stay separate
    /// events, as the builder paired them.
    pub fn assemble(data: &Batch, step: &Batch) -> Result<Vec<Event>> {
        let mut grouped: BTreeMap<(u64, u8, u8, usize), Event> = BTreeMap::new();
        let mut occurrences: HashMap<(usize, u64, u8), usize> = HashMap::new();

        for batch in [step, data] {
            for (source, contents) in batch.iter() {
                for dgram in contents.datagrams(source) {
                    let dgram = dgram?;
                    let seen = occurrences
                        .entry((source, dgram.timestamp, dgram.service.as_u8()))
                        .or_default();
                    let key = (
                        dgram.timestamp,
                        dgram.service.order_rank(),
                        dgram.service.as_u8(),
                        *seen,
                    );
                    *seen += 1;
                    grouped
                        .entry(key)
                        .or_insert_with(|| Event {
                            timestamp: dgram.timestamp,
                            service: dgram.service,
                            dgrams: Vec::new(),
                        })
                        .dgrams
                        .push(dgram);
                }
            }
        }

        let mut events: Vec<Event> = grouped.into_values().collect();
        for event in &mut events {
            event.dgrams.sort_by_key(|d| d.source);
        }
        Ok(events)
    }
}
