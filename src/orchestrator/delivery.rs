//! Event delivery shared by every strategy

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, trace, warn};

use super::{Callbacks, ControlUpdate};
use crate::eventbuilder::{EventBuilderManager, SmdCallback};
use crate::handles::{Run, RunRef};
use crate::identity::RunRegistry;
use crate::smd_reader::SmdChunk;
use crate::types::{Batch, Event, TransitionId};
use crate::Result;

/// Totals shared by all delivery contexts of one analysis.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub batches: AtomicU64,
    pub events: AtomicU64,
    pub transitions: AtomicU64,
    pub runs_started: AtomicU64,
}

impl Counters {
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Non-blocking view of the control channel for one batching loop.
pub(crate) struct ControlPoll {
    rx: broadcast::Receiver<ControlUpdate>,
    pull_size: usize,
}

impl ControlPoll {
    pub fn new(rx: broadcast::Receiver<ControlUpdate>, pull_size: usize) -> Self {
        Self { rx, pull_size: pull_size.max(1) }
    }

    pub fn pull_size(&self) -> usize {
        self.pull_size
    }

    /// Apply pending updates; returns the new pull size if it changed.
    pub fn poll(&mut self) -> Option<usize> {
        let mut changed = None;
        loop {
            match self.rx.try_recv() {
                Ok(ControlUpdate::Reconfigure { pull_size }) => {
                    self.pull_size = pull_size.max(1);
                    changed = Some(self.pull_size);
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Control updates lagged; applying the newest");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
        if let Some(pull_size) = changed {
            debug!(pull_size, "Reconfigured batching loop");
        }
        changed
    }

    /// A receiver for another loop, starting from the current pull size.
    pub fn fork(&mut self) -> Self {
        self.poll();
        Self { rx: self.rx.resubscribe(), pull_size: self.pull_size }
    }
}

/// Turns batch pairs into callback invocations for one delivery context.
pub(crate) struct Delivery {
    registry: Arc<RunRegistry>,
    callbacks: Callbacks,
    current: Option<Arc<Run>>,
    /// Rebuilt run whose callback waits for its first event in this context.
    pending: Option<Arc<Run>>,
    counters: Arc<Counters>,
}

impl Delivery {
    pub fn new(registry: Arc<RunRegistry>, callbacks: Callbacks, counters: Arc<Counters>) -> Self {
        Self { registry, callbacks, current: None, pending: None, counters }
    }

    pub fn smd_callback(&self) -> Arc<dyn SmdCallback> {
        Arc::clone(&self.callbacks.smd)
    }

    /// Enter a chunk that starts inside `start`.
    ///
    /// A run this context has to rebuild gets its run callback right before
    /// the first event delivered for it here.
    pub fn adopt(&mut self, start: Option<&RunRef>) {
        let Some(reference) = start else { return };
        if self.current.as_ref().is_some_and(|run| run.matches(reference)) {
            return;
        }

        let (run, rebuilt) = Run::resolve_or_reconstruct(&self.registry, reference);
        if rebuilt {
            debug!(origin_id = reference.id, "Entering run not seen by this context");
            self.pending = Some(Arc::clone(&run));
        } else {
            self.pending = None;
        }
        self.current = Some(run);
    }

    /// Deliver one `(data, step)` pair; `begins` are the runs begun in its chunk.
    pub fn deliver(&mut self, data: &Batch, step: &Batch, begins: &[RunRef]) -> Result<()> {
        Counters::bump(&self.counters.batches);

        for event in Event::assemble(data, step)? {
            match event.service {
                TransitionId::BeginRun => {
                    Counters::bump(&self.counters.transitions);
                    let Some(reference) =
                        begins.iter().find(|r| r.begin_timestamp == event.timestamp)
                    else {
                        warn!(timestamp = event.timestamp, "BeginRun without a run reference");
                        continue;
                    };
                    let (run, _) = Run::resolve_or_reconstruct(&self.registry, reference);
                    self.pending = None;
                    self.start_run(&run);
                    self.current = Some(run);
                }
                TransitionId::L1Accept => {
                    if let Some(run) = self.pending.take() {
                        self.start_run(&run);
                    }
                    trace!(timestamp = event.timestamp, dgrams = event.dgrams.len(), "Event");
                    (self.callbacks.event)(&event, self.current.as_ref());
                    Counters::bump(&self.counters.events);
                }
                other => {
                    trace!(timestamp = event.timestamp, service = %other, "Transition not forwarded");
                    Counters::bump(&self.counters.transitions);
                }
            }
        }
        Ok(())
    }

    fn start_run(&self, run: &Arc<Run>) {
        (self.callbacks.run)(run);
        Counters::bump(&self.counters.runs_started);
    }
}

/// Synchronous chunk processing for the serial and fixed-rank strategies.
pub(crate) struct ChunkLoop {
    delivery: Delivery,
    control: ControlPoll,
}

impl ChunkLoop {
    pub fn new(delivery: Delivery, control: ControlPoll) -> Self {
        Self { delivery, control }
    }

    pub fn run_chunk(&mut self, chunk: &SmdChunk) -> Result<()> {
        if !chunk.begins_run() {
            self.delivery.adopt(chunk.run.as_ref());
        }

        let mut manager = EventBuilderManager::new(
            &chunk.smd,
            chunk.n_sources,
            self.control.pull_size(),
            self.delivery.smd_callback(),
        )?;
        let mut batches = manager.batches();
        loop {
            if let Some(pull_size) = self.control.poll() {
                batches.set_pull_size(pull_size);
            }
            let Some(pair) = batches.next() else { break };
            let (data, step) = pair?;
            self.delivery.deliver(&data, &step, &chunk.begins)?;
        }
        debug!(seq = chunk.seq, "Chunk delivered");
        Ok(())
    }

    /// Run a chunk on a blocking thread, handing the loop back with the outcome.
    pub async fn run_blocking(mut self, chunk: SmdChunk) -> Result<(Self, Result<()>)> {
        let joined = tokio::task::spawn_blocking(move || {
            let result = self.run_chunk(&chunk);
            (self, result)
        })
        .await?;
        Ok(joined)
    }
}
