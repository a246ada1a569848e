//! Error types for event assembly.
//!
//! All errors implement `std::error::Error` and carry enough structured context
//! for the orchestration layer to decide what to abort: a framing error costs
//! the current chunk (dynamic tasks) or the current rank's loop (fixed ranks),
//! never the other sources' batches.
//!
//! ## Error Categories
//!
//! - **Framing**: corrupt packet footers, truncated source streams, malformed datagram headers
//! - **Identity**: resolving an id that has no live registrant
//! - **Session**: missing Configure transitions, bad configuration, file access
//! - **Orchestration**: task panics/cancellation and closed rank channels
//!
//! End of input is not an error: the batch sequence simply ends.
//!
//! ```rust
//! use smd_builder::BuilderError;
//!
//! let error = BuilderError::unknown_id("run", 7);
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for event-assembly operations.
pub type Result<T, E = BuilderError> = std::result::Result<T, E>;

/// Main error type for event-assembly operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BuilderError {
    #[error("Malformed packet footer: {details}")]
    MalformedFooter { details: String },

    #[error("Source {source_index} ended in the middle of a datagram")]
    TruncatedStream { source_index: usize },

    #[error("Malformed datagram from source {source_index} at offset {offset}: {details}")]
    MalformedDatagram { source_index: usize, offset: usize, details: String },

    #[error("No live {kind} handle registered under id {id}")]
    UnknownId { kind: &'static str, id: u64 },

    #[error("Source {source_index} did not start with a Configure transition")]
    MissingConfigure { source_index: usize },

    #[error("Invalid configuration: {details}")]
    Config { details: String },

    #[error("File error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Task failed: {context}")]
    Task {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Channel to {peer} closed")]
    ChannelClosed { peer: String },
}

impl BuilderError {
    /// Returns whether the caller can reasonably retry after this error.
    ///
    /// Nothing is retried automatically at this layer.
    pub fn is_retryable(&self) -> bool {
        match self {
            BuilderError::UnknownId { .. } => true,
            BuilderError::ChannelClosed { .. } => true,
            BuilderError::MalformedFooter { .. } => false,
            BuilderError::TruncatedStream { .. } => false,
            BuilderError::MalformedDatagram { .. } => false,
            BuilderError::MissingConfigure { .. } => false,
            BuilderError::Config { .. } => false,
            BuilderError::File { .. } => false,
            BuilderError::Task { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            BuilderError::MalformedFooter { .. } => vec![
                "Drop the buffer and request the chunk again",
                "Check that the producer appends count+1 little-endian offsets",
            ],
            BuilderError::TruncatedStream { .. } => vec![
                "Re-request the stream chunk from the producer",
                "Check the source for an interrupted write",
            ],
            BuilderError::MalformedDatagram { .. } => vec![
                "Verify the source emits 16-byte datagram headers",
                "Check for an unknown transition id from a newer producer",
            ],
            BuilderError::UnknownId { .. } => vec![
                "Register the handle again on this rank",
                "Reconstruct the handle from its reference metadata",
            ],
            BuilderError::MissingConfigure { .. } => vec![
                "Start every source stream with a Configure transition",
                "Check that the stream was not opened mid-run",
            ],
            BuilderError::Config { .. } => vec![
                "Check the configuration file and PS_* environment variables",
                "Use non-zero sizes for workers, chunk and batch settings",
            ],
            BuilderError::File { .. } => vec![
                "Check the file exists and is readable",
                "Check file permissions",
            ],
            BuilderError::Task { .. } => vec![
                "Inspect the callback that panicked",
                "Check whether the pipeline was torn down early",
            ],
            BuilderError::ChannelClosed { .. } => vec![
                "Check whether the peer rank aborted",
                "Restart the analysis with fewer workers",
            ],
        }
    }

    /// Helper constructor for footer errors.
    pub fn malformed_footer(details: impl Into<String>) -> Self {
        BuilderError::MalformedFooter { details: details.into() }
    }

    /// Helper constructor for truncated source streams.
    pub fn truncated(source_index: usize) -> Self {
        BuilderError::TruncatedStream { source_index }
    }

    /// Helper constructor for datagram header errors.
    pub fn malformed_datagram(source_index: usize, offset: usize, details: impl Into<String>) -> Self {
        BuilderError::MalformedDatagram { source_index, offset, details: details.into() }
    }

    /// Helper constructor for failed identity resolution.
    pub fn unknown_id(kind: &'static str, id: u64) -> Self {
        BuilderError::UnknownId { kind, id }
    }

    /// Helper constructor for configuration errors.
    pub fn config(details: impl Into<String>) -> Self {
        BuilderError::Config { details: details.into() }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        BuilderError::File { path, source }
    }

    /// Helper constructor for task failures without an underlying error.
    pub fn task(context: impl Into<String>) -> Self {
        BuilderError::Task { context: context.into(), source: None }
    }

    /// Helper constructor for closed channels.
    pub fn channel_closed(peer: impl Into<String>) -> Self {
        BuilderError::ChannelClosed { peer: peer.into() }
    }

    /// Source index carried by framing errors, if any.
    pub fn source_index(&self) -> Option<usize> {
        match self {
            BuilderError::TruncatedStream { source_index }
            | BuilderError::MalformedDatagram { source_index, .. }
            | BuilderError::MissingConfigure { source_index } => Some(*source_index),
            _ => None,
        }
    }
}

impl From<tokio::task::JoinError> for BuilderError {
    fn from(err: tokio::task::JoinError) -> Self {
        let context = if err.is_cancelled() { "task cancelled" } else { "task panicked" };
        BuilderError::Task { context: context.to_string(), source: Some(Box::new(err)) }
    }
}

impl From<serde_yaml_ng::Error> for BuilderError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        BuilderError::Config { details: err.to_string() }
    }
}
