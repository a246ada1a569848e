//! Event building over multi-source small-data streams.
//!
//! Detector sources each record a time-ordered stream of small datagrams.
//! This crate pairs those streams into events, packs them into batches for
//! downstream (big-data) processing, and orchestrates that work serially, on
//! fixed worker ranks, or as dynamically spawned tasks.
//!
//! # Features
//!
//! - **Zero-copy framing**: packet footers and datagrams are views into shared buffers
//! - **Lazy batching**: batches are produced on demand from an upstream callback
//! - **Three strategies**: serial, fixed-rank and dynamic-task delivery with identical callbacks
//! - **Shareable identity**: datasources and runs travel between ranks as small references
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use smd_builder::{Callbacks, ParallelMode, Pipeline, PipelineConfig, ReplaySource, Source};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sources: Vec<Box<dyn Source>> = (0..3)
//!         .map(|i| ReplaySource::open(i, format!("/data/run-0042-s{i:02}.smd")))
//!         .map(|r| r.map(|s| Box::new(s) as Box<dyn Source>))
//!         .collect::<Result<_, _>>()?;
//!
//!     let config = PipelineConfig { mode: ParallelMode::DynamicTask, ..Default::default() };
//!     let mut pipeline = Pipeline::open(config, sources).await?;
//!     let summary = pipeline
//!         .analyze(Callbacks::new().on_event(|event, run| {
//!             println!("{} in run {:?}", event.timestamp, run.and_then(|r| r.run_number()));
//!         }))
//!         .await?;
//!     println!("{} events in {} chunks", summary.events, summary.chunks);
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Framing and event building
pub mod eventbuilder;
pub mod footer;

// Identity
pub mod handles;
pub mod identity;

// Sources and orchestration
pub mod config;
pub mod orchestrator;
pub mod provider;
pub mod providers;
pub mod smd_reader;

// Core exports
pub use error::*;
pub use types::*;

pub use config::{ParallelMode, PipelineConfig};
pub use eventbuilder::{
    Batches, BuilderState, EventBuilder, EventBuilderManager, FilterCallback, Passthrough,
    SmdCallback, SmdEvents,
};
pub use footer::PacketFooter;
pub use handles::{DataSource, DataSourceRef, Run, RunRef};
pub use identity::{DataSourceRegistry, IdentityRegistry, RunRegistry, Session};
pub use orchestrator::{
    AnalysisSummary, Callbacks, ChunkFailure, ControlHandle, ControlUpdate, EventCallback,
    Pipeline, RunCallback,
};
pub use provider::Source;
pub use providers::{LiveSource, ReplaySource};
pub use smd_reader::{ReaderLimits, SmdChunk, SmdReader, SourceFailure};
