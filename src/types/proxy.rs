//! Deferred references to datagrams inside source views

use super::TransitionId;

/// Location of one datagram inside a source view.
///
/// `size` is the declared extent (header plus payload) and is only checked
/// against the view when the proxy event is materialized into a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DgramLocation {
    pub source: usize,
    pub offset: usize,
    pub size: usize,
}

/// Lightweight handle to one paired event across sources.
///
/// Holds locations only; bytes are copied when the builder generates a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEvent {
    pub timestamp: u64,
    pub service: TransitionId,
    pub dgrams: Vec<DgramLocation>,
}

impl ProxyEvent {
    pub fn is_transition(&self) -> bool {
        self.service.is_transition()
    }

    /// Sources contributing to this event, in ascending order.
    pub fn sources(&self) -> impl Iterator<Item = usize> + '_ {
        self.dgrams.iter().map(|loc| loc.source)
    }

    /// Location contributed by `source`, if any.
    pub fn location(&self, source: usize) -> Option<&DgramLocation> {
        self.dgrams.iter().find(|loc| loc.source == source)
    }

    /// A copy of this event restricted to the given sources.
    ///
    /// Returns `None` when no location remains.
    pub fn retain_sources(&self, keep: impl Fn(usize) -> bool) -> Option<Self> {
        let dgrams: Vec<_> = self.dgrams.iter().copied().filter(|loc| keep(loc.source)).collect();
        if dgrams.is_empty() {
            return None;
        }
        Some(Self { timestamp: self.timestamp, service: self.service, dgrams })
    }
}
