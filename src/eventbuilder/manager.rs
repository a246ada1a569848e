//! Pull loop between the upstream callback and the event builder

use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{EventBuilder, SmdCallback, SmdEvents};
use crate::footer::PacketFooter;
use crate::types::{Batch, ProxyEvent};
use crate::{BuilderError, Result};

/// Drives one chunk of small data through an [`EventBuilder`].
pub struct EventBuilderManager {
    builder: EventBuilder,
    smd_callback: Arc<dyn SmdCallback>,
    proxy_events: Vec<ProxyEvent>,
    pull_size: usize,
}

impl EventBuilderManager {
    /// Split a footer-packed chunk into `n_sources` views and build over them.
    ///
    /// `pull_size` bounds how many proxy events one callback call may see.
    pub fn new(
        chunk: &Bytes,
        n_sources: usize,
        pull_size: usize,
        smd_callback: Arc<dyn SmdCallback>,
    ) -> Result<Self> {
        if pull_size == 0 {
            return Err(BuilderError::config("pull size must be positive"));
        }
        let views = PacketFooter::split(chunk, n_sources)?;
        Ok(Self::from_builder(EventBuilder::new(views), pull_size, smd_callback))
    }

    pub fn from_builder(
        builder: EventBuilder,
        pull_size: usize,
        smd_callback: Arc<dyn SmdCallback>,
    ) -> Self {
        Self { builder, smd_callback, proxy_events: Vec::new(), pull_size: pull_size.max(1) }
    }

    pub fn builder(&self) -> &EventBuilder {
        &self.builder
    }

    /// Lazy sequence of `(data_batch, step_batch)` pairs.
    pub fn batches(&mut self) -> Batches<'_> {
        Batches { manager: self, done: false }
    }

    /// Pull from the callback until the queue holds something or input runs out.
    fn fill(&mut self) -> Result<()> {
        while self.proxy_events.is_empty() && self.builder.has_more() {
            let before = self.builder.consumed();
            let events = SmdEvents::new(&mut self.builder, self.pull_size);
            for evt in self.smd_callback.events(events) {
                self.proxy_events.push(evt?);
            }

            if self.proxy_events.is_empty() && self.builder.consumed() == before {
                warn!("Upstream callback consumed no input; ending batch sequence");
                break;
            }
        }
        Ok(())
    }

    fn next_pair(&mut self) -> Option<Result<(Batch, Batch)>> {
        if let Err(e) = self.fill() {
            self.proxy_events.clear();
            return Some(Err(e));
        }

        if self.proxy_events.is_empty() {
            debug!(events_built = self.builder.events_built(), "Upstream exhausted");
            return None;
        }

        let queue = std::mem::take(&mut self.proxy_events);
        Some(self.builder.gen_bytearray_batch(&queue))
    }
}

/// Iterator returned by [`EventBuilderManager::batches`].
///
/// Finite whenever the underlying views are; fused after the first error.
pub struct Batches<'m> {
    manager: &'m mut EventBuilderManager,
    done: bool,
}

impl Batches<'_> {
    /// Change the pull size; takes effect from the next batch.
    pub fn set_pull_size(&mut self, pull_size: usize) {
        self.manager.pull_size = pull_size.max(1);
    }

    pub fn pull_size(&self) -> usize {
        self.manager.pull_size
    }
}

impl Iterator for Batches<'_> {
    type Item = Result<(Batch, Batch)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.manager.next_pair();
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }
}
