//! Upstream event-supply callbacks

use super::EventBuilder;
use crate::Result;
use crate::types::ProxyEvent;

/// Lazy view over the next proxy events of an [`EventBuilder`].
///
/// Yields at most `limit` events per call site. Dropping it early leaves the
/// remaining input in the builder for the next pull.
pub struct SmdEvents<'a> {
    builder: &'a mut EventBuilder,
    remaining: usize,
    failed: bool,
}

impl<'a> SmdEvents<'a> {
    pub(crate) fn new(builder: &'a mut EventBuilder, limit: usize) -> Self {
        Self { builder, remaining: limit, failed: false }
    }
}

impl Iterator for SmdEvents<'_> {
    type Item = Result<ProxyEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        match self.builder.next_event() {
            Ok(Some(evt)) => Some(Ok(evt)),
            Ok(None) => {
                self.remaining = 0;
                None
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Supplies proxy events to the batching loop.
///
/// Called repeatedly with a fresh [`SmdEvents`] view while the manager's queue
/// is empty and input remains. Implementations may drop, inspect or partially
/// drain the view; whatever they yield is batched.
pub trait SmdCallback: Send + Sync {
    fn events<'a>(
        &'a self,
        events: SmdEvents<'a>,
    ) -> Box<dyn Iterator<Item = Result<ProxyEvent>> + 'a>;
}

/// Forwards every proxy event unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl SmdCallback for Passthrough {
    fn events<'a>(
        &'a self,
        events: SmdEvents<'a>,
    ) -> Box<dyn Iterator<Item = Result<ProxyEvent>> + 'a> {
        Box::new(events)
    }
}

/// Keeps only the proxy events accepted by a predicate.
///
/// Errors always pass through.
pub struct FilterCallback<F> {
    predicate: F,
}

impl<F> FilterCallback<F>
where
    F: Fn(&ProxyEvent) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> SmdCallback for FilterCallback<F>
where
    F: Fn(&ProxyEvent) -> bool + Send + Sync,
{
    fn events<'a>(
        &'a self,
        events: SmdEvents<'a>,
    ) -> Box<dyn Iterator<Item = Result<ProxyEvent>> + 'a> {
        Box::new(events.filter(move |evt| match evt {
            Ok(evt) => (self.predicate)(evt),
            Err(_) => true,
        }))
    }
}
