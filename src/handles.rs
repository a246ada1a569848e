//! Long-lived session handles and their wire references

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::identity::{DataSourceRegistry, RunRegistry};
use crate::types::{Datagram, Event, TransitionId};
use crate::{BuilderError, Result};

/// A configured set of small-data sources.
///
/// Holds the Configure transition read from the head of every source.
#[derive(Debug)]
pub struct DataSource {
    id: u64,
    configs: Arc<[Datagram]>,
}

impl DataSource {
    /// Create and register a data source from per-source Configure datagrams.
    pub fn register(registry: &DataSourceRegistry, configs: Vec<Datagram>) -> Result<Arc<Self>> {
        if let Some(bad) = configs.iter().find(|d| d.service != TransitionId::Configure) {
            return Err(BuilderError::MissingConfigure { source_index: bad.source });
        }
        if configs.is_empty() {
            return Err(BuilderError::config("a data source needs at least one stream"));
        }

        let configs: Arc<[Datagram]> = configs.into();
        let ds = registry.register_with(|id| Self { id, configs });
        info!(id = ds.id, sources = ds.n_sources(), "Data source registered");
        Ok(ds)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn n_sources(&self) -> usize {
        self.configs.len()
    }

    /// Configure datagram of each source, indexed by source.
    pub fn configs(&self) -> &Arc<[Datagram]> {
        &self.configs
    }

    pub fn to_ref(&self) -> DataSourceRef {
        DataSourceRef { id: self.id, n_sources: self.n_sources() }
    }
}

/// Wire reference to a [`DataSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceRef {
    pub id: u64,
    pub n_sources: usize,
}

impl DataSourceRef {
    /// Resolve against the local registry, checking the source count agrees.
    pub fn resolve(&self, registry: &DataSourceRegistry) -> Result<Arc<DataSource>> {
        let ds = registry.resolve(self.id)?;
        if ds.n_sources() != self.n_sources {
            return Err(BuilderError::unknown_id(registry.kind(), self.id));
        }
        Ok(ds)
    }
}

/// One acquisition run, opened by a BeginRun transition.
#[derive(Debug)]
pub struct Run {
    id: u64,
    origin_id: u64,
    begin_timestamp: u64,
    run_number: Option<u32>,
    datasource: DataSourceRef,
}

impl Run {
    /// Create the canonical run for a BeginRun event.
    pub fn begin(registry: &RunRegistry, datasource: DataSourceRef, begin: &Event) -> Arc<Self> {
        let run_number = begin
            .dgrams
            .first()
            .and_then(|d| d.payload.get(..4))
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]));
        let begin_timestamp = begin.timestamp;

        let run = registry.register_with(|id| Self {
            id,
            origin_id: id,
            begin_timestamp,
            run_number,
            datasource,
        });
        info!(id = run.id, ?run_number, begin_timestamp, "Run begun");
        run
    }

    /// Rebuild a run on a rank that never saw its canonical handle.
    ///
    /// The local id may differ from the origin id; `matches` compares origins.
    pub fn reconstruct(registry: &RunRegistry, reference: &RunRef) -> Arc<Self> {
        let run = registry.register_with(|id| Self {
            id,
            origin_id: reference.id,
            begin_timestamp: reference.begin_timestamp,
            run_number: reference.run_number,
            datasource: reference.datasource,
        });
        debug!(local_id = run.id, origin_id = reference.id, "Run reconstructed");
        run
    }

    /// Resolve `reference` locally, or rebuild it when this registry holds no
    /// matching run. The flag is true when the run was rebuilt.
    pub fn resolve_or_reconstruct(
        registry: &RunRegistry,
        reference: &RunRef,
    ) -> (Arc<Self>, bool) {
        if let Ok(run) = registry.resolve(reference.id) {
            if run.matches(reference) {
                return (run, false);
            }
        }
        match registry.find(|run| run.matches(reference)) {
            Some(run) => (run, false),
            None => (Self::reconstruct(registry, reference), true),
        }
    }

    /// Id in the registry that created this handle.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Id the run received on the rank that first created it.
    pub fn origin_id(&self) -> u64 {
        self.origin_id
    }

    pub fn begin_timestamp(&self) -> u64 {
        self.begin_timestamp
    }

    /// Run number from the first four payload bytes of the BeginRun, when present.
    pub fn run_number(&self) -> Option<u32> {
        self.run_number
    }

    pub fn datasource(&self) -> DataSourceRef {
        self.datasource
    }

    pub fn to_ref(&self) -> RunRef {
        RunRef {
            id: self.origin_id,
            begin_timestamp: self.begin_timestamp,
            run_number: self.run_number,
            datasource: self.datasource,
        }
    }

    /// True when this handle stands for the run `reference` names.
    pub fn matches(&self, reference: &RunRef) -> bool {
        self.origin_id == reference.id && self.begin_timestamp == reference.begin_timestamp
    }
}

/// Wire reference to a [`Run`]: the origin id plus enough metadata to rebuild it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRef {
    pub id: u64,
    pub begin_timestamp: u64,
    pub run_number: Option<u32>,
    pub datasource: DataSourceRef,
}
