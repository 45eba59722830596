//! Maglev consistent-hash backend table
//!
//! Each backend owns a permutation of the `M` table slots derived from its
//! identifier alone. The table is filled round by round: every backend
//! claims the next free slot of its permutation, `weight` times per round,
//! until all `M` slots are taken.
//!
//! Because a backend's permutation never depends on the other members,
//! removing or adding one backend moves roughly `1/N` of the slots instead
//! of reshuffling the whole table.
//!
//! # Example
//!
//! ```
//! use nfqlb::lb::maglev::{Backend, BackendTable};
//!
//! let backends = [Backend::new(1), Backend::new(2), Backend::new(3).with_weight(2)];
//! let table = BackendTable::build(&backends, 997).unwrap();
//!
//! let id = table.backend_for(0xdead_beef);
//! assert!([1, 2, 3].contains(&id));
//! // Same hash, same backend
//! assert_eq!(table.backend_for(0xdead_beef), id);
//! ```

use std::collections::HashSet;
use std::fmt;
use std::hash::Hasher;

use fnv::FnvHasher;
use serde::{Deserialize, Serialize};

use crate::error::TableError;

/// Default table size (prime)
pub const DEFAULT_TABLE_SIZE: usize = 997;
/// Largest accepted table size
pub const MAX_TABLE_SIZE: usize = 1 << 24;

const EMPTY: usize = usize::MAX;

/// A backend taking part in the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Backend {
    /// Backend identifier, also encoded into the firewall mark
    pub id: u32,
    /// Relative share of table slots (default: 1)
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl Backend {
    /// Create a backend with weight 1
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self { id, weight: 1 }
    }

    /// Set the weight
    #[must_use]
    pub const fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
}

/// Whether `n` is prime
#[must_use]
pub fn is_prime(n: usize) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut d = 3;
    while d <= n / d {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

fn seeded(seed: u8, id: u32) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write_u8(seed);
    hasher.write(&id.to_be_bytes());
    hasher.finish()
}

/// Offset and skip of a backend's permutation over `size` slots
fn permutation(id: u32, size: usize) -> (u64, u64) {
    let m = size as u64;
    let offset = seeded(0, id) % m;
    let skip = seeded(1, id) % (m - 1) + 1;
    (offset, skip)
}

/// Immutable Maglev lookup table
#[derive(Clone)]
pub struct BackendTable {
    /// Index into `backends` for every slot
    slots: Box<[usize]>,
    /// Members sorted by id
    backends: Vec<Backend>,
}

impl BackendTable {
    /// Build a table of `size` slots.
    ///
    /// Backends are ordered by id first, so the result does not depend on
    /// the order of the input slice.
    ///
    /// # Errors
    ///
    /// Returns `TableError` if there are no backends, a weight is zero, an id
    /// repeats, `size` is above [`MAX_TABLE_SIZE`] or not prime, or `size`
    /// does not exceed the backend count.
    pub fn build(backends: &[Backend], size: usize) -> Result<Self, TableError> {
        if backends.is_empty() {
            return Err(TableError::NoBackends);
        }
        if size > MAX_TABLE_SIZE {
            return Err(TableError::TableTooLarge {
                size,
                max: MAX_TABLE_SIZE,
            });
        }
        if !is_prime(size) {
            return Err(TableError::TableSizeNotPrime(size));
        }
        if size <= backends.len() {
            return Err(TableError::TableTooSmall {
                size,
                backends: backends.len(),
            });
        }

        let mut seen = HashSet::with_capacity(backends.len());
        for b in backends {
            if b.weight == 0 {
                return Err(TableError::InvalidWeight { id: b.id });
            }
            if !seen.insert(b.id) {
                return Err(TableError::DuplicateBackend { id: b.id });
            }
        }

        let mut backends = backends.to_vec();
        backends.sort_by_key(|b| b.id);

        let perms: Vec<(u64, u64)> = backends.iter().map(|b| permutation(b.id, size)).collect();
        let m = size as u64;
        let mut next = vec![0u64; backends.len()];
        let mut slots = vec![EMPTY; size];
        let mut filled = 0;

        'fill: loop {
            for (i, backend) in backends.iter().enumerate() {
                let (offset, skip) = perms[i];
                for _ in 0..backend.weight {
                    // a free slot always exists within the remaining permutation
                    let slot = loop {
                        #[allow(clippy::cast_possible_truncation)]
                        let c = ((offset + next[i] * skip) % m) as usize;
                        next[i] += 1;
                        if slots[c] == EMPTY {
                            break c;
                        }
                    };
                    slots[slot] = i;
                    filled += 1;
                    if filled == size {
                        break 'fill;
                    }
                }
            }
        }

        Ok(Self {
            slots: slots.into_boxed_slice(),
            backends,
        })
    }

    /// Table size `M`
    #[must_use]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Members, sorted by id
    #[must_use]
    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    /// Whether `id` is a member
    #[must_use]
    pub fn contains(&self, id: u32) -> bool {
        self.backends.binary_search_by_key(&id, |b| b.id).is_ok()
    }

    /// Slot a hash falls into
    #[inline]
    #[must_use]
    pub fn slot_for(&self, hash: u32) -> usize {
        hash as usize % self.slots.len()
    }

    /// Backend id owning `slot`, `None` when out of range
    #[must_use]
    pub fn slot_owner(&self, slot: usize) -> Option<u32> {
        self.slots.get(slot).map(|&i| self.backends[i].id)
    }

    /// Backend id for a flow hash
    #[inline]
    #[must_use]
    pub fn backend_for(&self, hash: u32) -> u32 {
        self.backends[self.slots[self.slot_for(hash)]].id
    }

    /// Slots owned by each backend, in id order
    #[must_use]
    pub fn distribution(&self) -> Vec<(u32, usize)> {
        let mut counts = vec![0usize; self.backends.len()];
        for &i in self.slots.iter() {
            counts[i] += 1;
        }
        self.backends
            .iter()
            .zip(counts)
            .map(|(b, c)| (b.id, c))
            .collect()
    }

    /// Number of slots whose owner differs between two tables of equal size
    #[must_use]
    pub fn changed_slots(&self, other: &Self) -> usize {
        (0..self.size().min(other.size()))
            .filter(|&s| self.slot_owner(s) != other.slot_owner(s))
            .count()
    }
}

impl fmt::Debug for BackendTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendTable")
            .field("size", &self.slots.len())
            .field("backends", &self.backends)
            .finish_non_exhaustive()
    }
}
