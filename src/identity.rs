//! Process-deterministic identities for long-lived session handles
//!
//! Data-source and run handles are assigned integer ids at construction so a
//! reference to them can cross a rank or task boundary as a bare id. As long as
//! every rank constructs handles in the same order, the same id names the same
//! handle everywhere; a rank that never built the handle can rebuild it from
//! the reference metadata instead.
//!
//! Registries hold handles weakly: dropping the last `Arc` makes the id
//! unresolvable, and it is never handed out again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::trace;

use crate::handles::{DataSource, Run};
use crate::{BuilderError, Result};

/// Table size that triggers the first sweep of dead entries.
const MIN_SWEEP: usize = 32;

struct RegistryState<T> {
    next_id: u64,
    entries: HashMap<u64, Weak<T>>,
    sweep_at: usize,
}

impl<T> RegistryState<T> {
    fn insert(&mut self, handle: &Arc<T>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, Arc::downgrade(handle));

        // Sweeps are amortized: the threshold doubles with the live count.
        if self.entries.len() >= self.sweep_at {
            self.entries.retain(|_, weak| weak.strong_count() > 0);
            self.sweep_at = (self.entries.len() * 2).max(MIN_SWEEP);
        }
        id
    }
}

/// Table from monotonically increasing id to a non-owning handle reference.
pub struct IdentityRegistry<T> {
    kind: &'static str,
    state: Mutex<RegistryState<T>>,
}

impl<T> IdentityRegistry<T> {
    /// Create an empty registry. `kind` names the handle type in errors and logs.
    pub fn new(kind: &'static str) -> Self {
        let state = RegistryState { next_id: 0, entries: HashMap::new(), sweep_at: MIN_SWEEP };
        Self { kind, state: Mutex::new(state) }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState<T>> {
        // Every mutation leaves the table consistent; a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `handle` under the next unused id.
    pub fn register(&self, handle: &Arc<T>) -> u64 {
        let id = self.lock().insert(handle);
        trace!(kind = self.kind, id, "Registered handle");
        id
    }

    /// Register a handle whose constructor needs its own id.
    ///
    /// The id is reserved and the handle stored under one lock acquisition.
    pub fn register_with(&self, build: impl FnOnce(u64) -> T) -> Arc<T> {
        let mut state = self.lock();
        let handle = Arc::new(build(state.next_id));
        let id = state.insert(&handle);
        trace!(kind = self.kind, id, "Registered handle");
        handle
    }

    /// Look up the live handle registered under `id`.
    pub fn resolve(&self, id: u64) -> Result<Arc<T>> {
        let mut state = self.lock();
        match state.entries.get(&id).and_then(Weak::upgrade) {
            Some(handle) => Ok(handle),
            None => {
                state.entries.remove(&id);
                Err(BuilderError::unknown_id(self.kind, id))
            }
        }
    }

    /// First live handle satisfying `predicate`, lowest id first.
    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Option<Arc<T>> {
        let state = self.lock();
        let mut ids: Vec<_> = state.entries.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| state.entries.get(&id).and_then(Weak::upgrade))
            .find(|handle| predicate(handle))
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.lock().entries.values().filter(|w| w.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Id the next registration will receive.
    pub fn next_id(&self) -> u64 {
        self.lock().next_id
    }
}

/// Registry for data-source handles.
pub type DataSourceRegistry = IdentityRegistry<DataSource>;

/// Registry for run handles.
pub type RunRegistry = IdentityRegistry<Run>;

/// Identity context for one analysis session.
///
/// Owns the two independent id spaces and is passed to every component that
/// creates or resolves handles.
pub struct Session {
    pub datasources: DataSourceRegistry,
    pub runs: Arc<RunRegistry>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            datasources: IdentityRegistry::new("datasource"),
            runs: Arc::new(IdentityRegistry::new("run")),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
