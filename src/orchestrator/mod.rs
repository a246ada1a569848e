//! Pipeline orchestration across serial, fixed-rank and dynamic-task strategies
//!
//! A [`Pipeline`] owns the sources of one datasource and drives them to the
//! user's callbacks. The strategy is chosen once from [`PipelineConfig::mode`]
//! and every strategy delivers the same callbacks in the same per-context
//! order: a run's callback fires before any event of that run.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   SmdChunk   ┌─────────────────────────────┐   Event   ┌───────────┐
//! │SmdReader │ ───────────> │ strategy (serial/rank/task) │ ────────> │ callbacks │
//! └──────────┘              │  EventBuilderManager loops  │           └───────────┘
//!                           └─────────────────────────────┘
//!                                       ^  ControlUpdate (broadcast)
//!                                  ControlHandle
//! ```
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use smd_builder::{Callbacks, Pipeline, PipelineConfig, ReplaySource, Source};
//!
//! # async fn analyze_run() -> smd_builder::Result<()> {
//! let sources: Vec<Box<dyn Source>> = vec![
//!     Box::new(ReplaySource::open(0, "run-0001-s00.smd")?),
//!     Box::new(ReplaySource::open(1, "run-0001-s01.smd")?),
//! ];
//! let mut pipeline = Pipeline::open(PipelineConfig::from_env()?, sources).await?;
//!
//! let callbacks = Callbacks::new()
//!     .on_run(|run| println!("run {:?}", run.run_number()))
//!     .on_event(|event, _run| println!("event at {}", event.timestamp));
//! let summary = pipeline.analyze(callbacks).await?;
//! println!("{} events", summary.events);
//! # Ok(())
//! # }
//! ```

mod delivery;
mod dynamic;
mod fixed_rank;
mod serial;


use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{ParallelMode, PipelineConfig};
use crate::eventbuilder::{Passthrough, SmdCallback};
use crate::handles::{DataSource, Run};
use crate::identity::Session;
use crate::provider::Source;
use crate::smd_reader::{ReaderLimits, SmdChunk, SmdReader, SourceFailure};
use crate::types::{Event, TransitionId};
use crate::{BuilderError, Result};

use delivery::{ControlPoll, Counters};

const CONTROL_CAPACITY: usize = 16;

pub type RunCallback = Arc<dyn Fn(&Arc<Run>) + Send + Sync>;
pub type EventCallback = Arc<dyn Fn(&Event, Option<&Arc<Run>>) + Send + Sync>;

/// User hooks invoked during analysis.
///
/// Run and event callbacks execute on blocking threads and may do heavy work.
#[derive(Clone)]
pub struct Callbacks {
    pub run: RunCallback,
    pub event: EventCallback,
    pub smd: Arc<dyn SmdCallback>,
}

impl Callbacks {
    /// No-op callbacks with a passthrough upstream.
    pub fn new() -> Self {
        Self {
            run: Arc::new(|_: &Arc<Run>| {}),
            event: Arc::new(|_: &Event, _: Option<&Arc<Run>>| {}),
            smd: Arc::new(Passthrough),
        }
    }

    pub fn on_run(mut self, callback: impl Fn(&Arc<Run>) + Send + Sync + 'static) -> Self {
        self.run = Arc::new(callback);
        self
    }

    pub fn on_event(
        mut self,
        callback: impl Fn(&Event, Option<&Arc<Run>>) + Send + Sync + 'static,
    ) -> Self {
        self.event = Arc::new(callback);
        self
    }

    /// Replace the upstream callback that supplies proxy events to batching.
    pub fn with_smd_callback(mut self, callback: impl SmdCallback + 'static) -> Self {
        self.smd = Arc::new(callback);
        self
    }
}

impl Default for Callbacks {
    fn default() -> Self {
        Self::new()
    }
}

/// Runtime update for running batching loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ControlUpdate {
    Reconfigure { pull_size: usize },
}

/// Sends [`ControlUpdate`]s to a pipeline's batching loops.
#[derive(Clone)]
pub struct ControlHandle {
    tx: broadcast::Sender<ControlUpdate>,
}

impl ControlHandle {
    /// Change the pull size of every batching loop from its next batch on.
    pub fn reconfigure(&self, pull_size: usize) -> Result<()> {
        if pull_size == 0 {
            return Err(BuilderError::config("pull size must be positive"));
        }
        self.tx
            .send(ControlUpdate::Reconfigure { pull_size })
            .map_err(|_| BuilderError::channel_closed("pipeline control"))?;
        debug!(pull_size, "Reconfigure requested");
        Ok(())
    }
}

/// A chunk (or rank) that failed during analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkFailure {
    pub seq: u64,
    /// Worker rank, in fixed-rank mode.
    pub rank: Option<usize>,
    pub error: String,
}

/// What one call to [`Pipeline::analyze`] did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub mode: ParallelMode,
    pub chunks: u64,
    pub batches: u64,
    pub events: u64,
    pub transitions: u64,
    /// Run callback invocations; in fixed-rank mode each rank counts its own.
    pub runs_started: u64,
    pub failures: Vec<ChunkFailure>,
    pub source_failures: Vec<SourceFailure>,
    pub cancelled: bool,
}

impl AnalysisSummary {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.source_failures.is_empty() && !self.cancelled
    }
}

/// Everything a strategy needs to run.
pub(crate) struct StrategyContext {
    pub reader: SmdReader,
    pub session: Arc<Session>,
    pub callbacks: Callbacks,
    pub control: ControlPoll,
    pub counters: Arc<Counters>,
    pub cancel: CancellationToken,
    pub config: PipelineConfig,
}

pub(crate) struct StrategyOutcome {
    pub reader: SmdReader,
    pub chunks: u64,
    pub failures: Vec<ChunkFailure>,
}

/// Move the reader onto its own task, buffering up to `depth` chunks.
pub(crate) fn spawn_reader(
    mut reader: SmdReader,
    depth: usize,
    cancel: CancellationToken,
) -> (mpsc::Receiver<SmdChunk>, JoinHandle<SmdReader>) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    let handle = tokio::spawn(async move {
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => break,
                chunk = reader.next_chunk() => chunk,
            };
            let Some(chunk) = chunk else { break };
            if tx.send(chunk).await.is_err() {
                debug!("Chunk consumer gone; reader stopping");
                break;
            }
        }
        reader
    });
    (rx, handle)
}

/// One datasource being analyzed.
///
/// Dropping the pipeline cancels any in-flight work.
pub struct Pipeline {
    config: PipelineConfig,
    session: Arc<Session>,
    datasource: Arc<DataSource>,
    reader: Option<SmdReader>,
    control_tx: broadcast::Sender<ControlUpdate>,
    control: ControlPoll,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Open a pipeline in a fresh identity session.
    pub async fn open(config: PipelineConfig, sources: Vec<Box<dyn Source>>) -> Result<Self> {
        Self::open_in(Arc::new(Session::new()), config, sources).await
    }

    /// Open a pipeline whose handles live in `session`.
    ///
    /// Reads each source's first datagram, which must be a Configure.
    pub async fn open_in(
        session: Arc<Session>,
        config: PipelineConfig,
        mut sources: Vec<Box<dyn Source>>,
    ) -> Result<Self> {
        config.validate()?;
        if sources.is_empty() {
            return Err(BuilderError::config("a pipeline needs at least one source"));
        }

        let mut configs = Vec::with_capacity(sources.len());
        for (index, source) in sources.iter_mut().enumerate() {
            match source.next_datagram().await? {
                Some(mut dgram) if dgram.service == TransitionId::Configure => {
                    dgram.source = index;
                    configs.push(dgram);
                }
                _ => return Err(BuilderError::MissingConfigure { source_index: index }),
            }
        }

        let datasource = DataSource::register(&session.datasources, configs)?;
        info!(
            datasource = datasource.id(),
            sources = datasource.n_sources(),
            mode = %config.mode,
            "Pipeline opened"
        );

        let limits =
            ReaderLimits { chunk_events: config.chunk_events, max_events: config.max_events };
        let reader =
            SmdReader::new(sources, Arc::clone(&session), Arc::clone(&datasource), limits);
        let (control_tx, control_rx) = broadcast::channel(CONTROL_CAPACITY);
        let control = ControlPoll::new(control_rx, config.batch_size);

        Ok(Self {
            config,
            session,
            datasource,
            reader: Some(reader),
            control_tx,
            control,
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn datasource(&self) -> &Arc<DataSource> {
        &self.datasource
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn control(&self) -> ControlHandle {
        ControlHandle { tx: self.control_tx.clone() }
    }

    /// Token cancelled when the pipeline is dropped.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive every source to exhaustion through `callbacks`.
    ///
    /// Chunk and source failures are recorded in the summary; only
    /// orchestration failures (panicked tasks) are returned as errors.
    pub async fn analyze(&mut self, callbacks: Callbacks) -> Result<AnalysisSummary> {
        let reader = self
            .reader
            .take()
            .ok_or_else(|| BuilderError::config("pipeline input already analyzed"))?;

        let counters = Arc::new(Counters::default());
        let ctx = StrategyContext {
            reader,
            session: Arc::clone(&self.session),
            callbacks,
            control: self.control.fork(),
            counters: Arc::clone(&counters),
            cancel: self.cancel.child_token(),
            config: self.config.clone(),
        };

        let mode = self.config.mode;
        info!(%mode, "Analysis started");
        let outcome = match mode {
            ParallelMode::Serial => serial::run(ctx).await?,
            ParallelMode::FixedRank => fixed_rank::run(ctx).await?,
            ParallelMode::DynamicTask => dynamic::run(ctx).await?,
        };

        let StrategyOutcome { mut reader, chunks, failures } = outcome;
        let summary = AnalysisSummary {
            mode,
            chunks,
            batches: Counters::get(&counters.batches),
            events: Counters::get(&counters.events),
            transitions: Counters::get(&counters.transitions),
            runs_started: Counters::get(&counters.runs_started),
            failures,
            source_failures: reader.take_failures(),
            cancelled: self.cancel.is_cancelled(),
        };
        info!(
            %mode,
            chunks = summary.chunks,
            events = summary.events,
            failures = summary.failures.len(),
            source_failures = summary.source_failures.len(),
            "Analysis finished"
        );
        Ok(summary)
    }

    /// Stop in-flight analysis; the current `analyze` returns early.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
