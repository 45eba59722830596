//! Backend selection
//!
//! Everything between a classified packet and the mark that routes it:
//!
//! | Module | Role |
//! |--------|------|
//! | [`hash`] | Stable flow hashes (SCTP hashed on ports only) |
//! | [`fragment`] | First-fragment keys for later fragments |
//! | [`maglev`] | Consistent-hash table from hash to backend id |
//! | [`state`] | Atomically swapped table and mark settings |

pub mod fragment;
pub mod hash;
pub mod maglev;
pub mod state;

pub use fragment::{FragmentConfig, FragmentCorrelator, FragmentStats};
pub use hash::{hash_addresses, hash_flow, hash_full};
pub use maglev::{Backend, BackendTable, DEFAULT_TABLE_SIZE, MAX_TABLE_SIZE};
pub use state::{FwmarkConfig, RuntimeSnapshot, SharedRuntimeState, DEFAULT_SHARED_NAME};
