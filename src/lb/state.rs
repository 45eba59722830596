//! Shared runtime state
//!
//! The active backend table and firewall-mark settings live in one
//! immutable [`RuntimeSnapshot`]. Workers load the snapshot once per packet;
//! reconfiguration builds a new snapshot and swaps it in atomically.
//!
//! ```text
//! Worker -> SharedRuntimeState::load() -> ArcSwap::load() -> RuntimeSnapshot
//!                                              |
//!                                       (lock-free read)
//!
//! Rebuild -> BackendTable::build() -> SharedRuntimeState::reload() -> ArcSwap::store()
//!                                                                     |
//!                                             old snapshot dropped when readers finish
//! ```

use std::sync::Arc;

use arc_swap::{ArcSwap, Guard};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::maglev::{Backend, BackendTable};
use crate::error::TableError;

/// Default name of the shared runtime record
pub const DEFAULT_SHARED_NAME: &str = "nfqlb";

/// Default value added to a backend id when building its mark
pub const DEFAULT_FWMARK_OFFSET: u32 = 100;

/// Firewall mark encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FwmarkConfig {
    /// Bits OR-ed into every mark
    #[serde(default)]
    pub base: u32,
    /// Added to the backend id
    #[serde(default = "default_offset")]
    pub offset: u32,
    /// Mark identifying packets this instance already handled (0 = disabled)
    #[serde(default)]
    pub own: u32,
}

fn default_offset() -> u32 {
    DEFAULT_FWMARK_OFFSET
}

impl Default for FwmarkConfig {
    fn default() -> Self {
        Self {
            base: 0,
            offset: DEFAULT_FWMARK_OFFSET,
            own: 0,
        }
    }
}

impl FwmarkConfig {
    /// Mark for a backend: `base | (id + offset)`
    #[must_use]
    pub const fn encode(&self, backend_id: u32) -> u32 {
        self.base | backend_id.wrapping_add(self.offset)
    }

    /// Whether `mark` is this instance's own mark
    #[must_use]
    pub const fn is_own(&self, mark: u32) -> bool {
        self.own != 0 && mark == self.own
    }
}

/// Immutable view of the balancer configuration used by the packet path
#[derive(Debug, Clone)]
pub struct RuntimeSnapshot {
    /// Active table; `None` when no backend is configured
    pub table: Option<Arc<BackendTable>>,
    /// Mark encoding
    pub fwmark: FwmarkConfig,
    /// Incremented on every swap
    pub version: u64,
}

impl RuntimeSnapshot {
    /// Create a snapshot
    #[must_use]
    pub fn new(table: Option<BackendTable>, fwmark: FwmarkConfig) -> Self {
        Self {
            table: table.map(Arc::new),
            fwmark,
            version: 0,
        }
    }

    /// Set the version
    #[must_use]
    pub const fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Mark for a flow hash, `None` without a table
    #[must_use]
    pub fn mark_for(&self, hash: u32) -> Option<u32> {
        self.table
            .as_ref()
            .map(|t| self.fwmark.encode(t.backend_for(hash)))
    }
}

/// Process-wide holder of the current [`RuntimeSnapshot`]
///
/// # Example
///
/// ```
/// use nfqlb::lb::maglev::Backend;
/// use nfqlb::lb::state::{FwmarkConfig, RuntimeSnapshot, SharedRuntimeState};
///
/// let state = SharedRuntimeState::new(
///     "nfqlb",
///     RuntimeSnapshot::new(None, FwmarkConfig::default()),
/// );
/// assert!(state.load().table.is_none());
///
/// state.set_backends(&[Backend::new(1), Backend::new(2)], 997).unwrap();
/// assert_eq!(state.version(), 1);
/// assert!(state.load().mark_for(42).is_some());
/// ```
pub struct SharedRuntimeState {
    name: String,
    current: ArcSwap<RuntimeSnapshot>,
}

impl SharedRuntimeState {
    /// Create the state with an initial snapshot
    #[must_use]
    pub fn new(name: impl Into<String>, snapshot: RuntimeSnapshot) -> Self {
        Self {
            name: name.into(),
            current: ArcSwap::from_pointee(snapshot),
        }
    }

    /// Name identifying this state
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current snapshot (lock-free read).
    ///
    /// The guard keeps the snapshot alive even if it is swapped out meanwhile.
    pub fn load(&self) -> Guard<Arc<RuntimeSnapshot>> {
        self.current.load()
    }

    /// Current snapshot as an owned `Arc`, for holders that outlive a call
    #[must_use]
    pub fn load_full(&self) -> Arc<RuntimeSnapshot> {
        self.current.load_full()
    }

    /// Replace the snapshot atomically
    pub fn reload(&self, snapshot: RuntimeSnapshot) {
        self.current.store(Arc::new(snapshot));
    }

    /// Current snapshot version
    #[must_use]
    pub fn version(&self) -> u64 {
        self.current.load().version
    }

    /// Rebuild the table for a new membership and swap it in.
    ///
    /// An empty list clears the table. The mark settings are kept.
    ///
    /// # Errors
    ///
    /// Returns `TableError` if the table cannot be built; the active
    /// snapshot is left untouched.
    pub fn set_backends(&self, backends: &[Backend], size: usize) -> Result<(), TableError> {
        let table = if backends.is_empty() {
            None
        } else {
            Some(Arc::new(BackendTable::build(backends, size)?))
        };
        self.swap_table(table);
        Ok(())
    }

    /// Swap in a prebuilt table, keeping the mark settings
    pub fn swap_table(&self, table: Option<Arc<BackendTable>>) {
        let backends = table.as_ref().map_or(0, |t| t.backends().len());
        self.current.rcu(|current| RuntimeSnapshot {
            table: table.clone(),
            fwmark: current.fwmark,
            version: current.version + 1,
        });
        info!(name = %self.name, backends, "backend table swapped");
    }
}

impl std::fmt::Debug for SharedRuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRuntimeState")
            .field("name", &self.name)
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}
