//! Fragment correlation cache
//!
//! Later IP fragments carry no transport header. The first fragment of a
//! datagram records its flow key under the datagram's fragment id, and later
//! fragments look it up so every piece of the datagram hashes the same way.
//!
//! # Design
//!
//! The cache is split into shards, each a `parking_lot::Mutex` around a map
//! plus an insertion-ordered queue:
//!
//! - **TTL**: an entry older than the configured TTL is never returned
//! - **Capacity**: when a shard is full, its oldest entry is evicted
//! - **Maintenance**: [`FragmentCorrelator::purge_expired`] drops expired
//!   entries from the front of each queue
//!
//! A missing entry is a normal outcome (first fragment lost, reordered past
//! the TTL, or evicted); callers fall back to address hashing.
//!
//! # Example
//!
//! ```
//! use nfqlb::lb::fragment::{FragmentConfig, FragmentCorrelator};
//! use nfqlb::packet::FlowKey;
//! use std::net::{IpAddr, Ipv4Addr};
//!
//! let cache = FragmentCorrelator::new(FragmentConfig::default());
//! let key = FlowKey::new(
//!     IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
//!     IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
//!     17,
//! )
//! .with_ports(5000, 53);
//!
//! cache.record(0x1234, key);
//! assert_eq!(cache.resolve(0x1234).unwrap(), key);
//! assert!(cache.resolve(0x9999).is_err());
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::PacketError;
use crate::packet::FlowKey;

/// Default number of cached datagrams
pub const DEFAULT_CAPACITY: usize = 8192;
/// Default entry lifetime
pub const DEFAULT_TTL: Duration = Duration::from_millis(1000);
/// Default shard count
pub const DEFAULT_SHARDS: usize = 16;

/// Configuration for the fragment correlator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentConfig {
    /// Maximum number of entries across all shards
    pub capacity: usize,
    /// Entry lifetime
    pub ttl: Duration,
    /// Number of independently locked shards
    pub shards: usize,
}

impl Default for FragmentConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            ttl: DEFAULT_TTL,
            shards: DEFAULT_SHARDS,
        }
    }
}

impl FragmentConfig {
    /// Create a configuration with custom values
    #[must_use]
    pub const fn new(capacity: usize, ttl: Duration, shards: usize) -> Self {
        Self {
            capacity,
            ttl,
            shards,
        }
    }
}

/// A cached first-fragment flow key
#[derive(Debug, Clone, Copy)]
struct FragmentCacheEntry {
    key: FlowKey,
    inserted_at: Instant,
    seq: u64,
}

struct Shard {
    /// Entry limit of this shard; the limits of all shards sum to the total capacity
    capacity: usize,
    entries: HashMap<u64, FragmentCacheEntry>,
    /// `(frag_id, seq)` in insertion order; stale pairs are skipped
    order: VecDeque<(u64, u64)>,
    next_seq: u64,
}

impl Shard {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            next_seq: 0,
        }
    }

    fn pop_oldest(&mut self) -> Option<FragmentCacheEntry> {
        while let Some((frag_id, seq)) = self.order.pop_front() {
            if self.entries.get(&frag_id).is_some_and(|e| e.seq == seq) {
                return self.entries.remove(&frag_id);
            }
        }
        None
    }

    fn oldest_inserted_at(&mut self) -> Option<Instant> {
        while let Some(&(frag_id, seq)) = self.order.front() {
            match self.entries.get(&frag_id) {
                Some(e) if e.seq == seq => return Some(e.inserted_at),
                _ => {
                    self.order.pop_front();
                }
            }
        }
        None
    }

    fn compact(&mut self) {
        let entries = &self.entries;
        self.order
            .retain(|(id, seq)| entries.get(id).is_some_and(|e| e.seq == *seq));
    }
}

/// Statistics for the fragment correlator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentStats {
    /// Entries currently cached
    pub entries: usize,
    /// First fragments recorded
    pub inserts: u64,
    /// Successful lookups
    pub hits: u64,
    /// Lookups without a live entry
    pub misses: u64,
    /// Entries dropped because their TTL passed
    pub expired: u64,
    /// Entries dropped to make room
    pub evicted: u64,
}

/// Bounded, sharded map from fragment id to flow key
pub struct FragmentCorrelator {
    shards: Box<[Mutex<Shard>]>,
    config: FragmentConfig,
    inserts: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    evicted: AtomicU64,
}

impl FragmentCorrelator {
    /// Create a correlator.
    ///
    /// Zero shards or zero capacity are raised to one. The shard count is
    /// capped at the capacity so every shard holds at least one entry.
    #[must_use]
    pub fn new(config: FragmentConfig) -> Self {
        let capacity = config.capacity.max(1);
        let shard_count = config.shards.clamp(1, capacity);
        let base = capacity / shard_count;
        let extra = capacity % shard_count;
        let shards = (0..shard_count)
            .map(|i| Mutex::new(Shard::new(base + usize::from(i < extra))))
            .collect();

        Self {
            shards,
            config,
            inserts: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// The configuration this correlator was built with
    #[must_use]
    pub const fn config(&self) -> &FragmentConfig {
        &self.config
    }

    fn shard(&self, frag_id: u64) -> &Mutex<Shard> {
        let mut hasher = ahash::AHasher::default();
        frag_id.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        let idx = hasher.finish() as usize % self.shards.len();
        &self.shards[idx]
    }

    fn is_expired(&self, entry: &FragmentCacheEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.inserted_at) >= self.config.ttl
    }

    /// Store the key of a first fragment
    pub fn record(&self, frag_id: u64, key: FlowKey) {
        self.record_at(frag_id, key, Instant::now());
    }

    pub(crate) fn record_at(&self, frag_id: u64, key: FlowKey, now: Instant) {
        let mut shard = self.shard(frag_id).lock();

        if !shard.entries.contains_key(&frag_id) {
            while shard.entries.len() >= shard.capacity {
                let Some(old) = shard.pop_oldest() else { break };
                if self.is_expired(&old, now) {
                    self.expired.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.evicted.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        let seq = shard.next_seq;
        shard.next_seq += 1;
        shard.entries.insert(
            frag_id,
            FragmentCacheEntry {
                key,
                inserted_at: now,
                seq,
            },
        );
        shard.order.push_back((frag_id, seq));
        if shard.order.len() > shard.capacity * 2 {
            shard.compact();
        }
        drop(shard);

        self.inserts.fetch_add(1, Ordering::Relaxed);
        trace!(frag_id, %key, "fragment flow recorded");
    }

    /// Look up the key recorded for `frag_id`
    ///
    /// # Errors
    ///
    /// Returns `PacketError::FragmentUnresolved` if no live entry exists.
    pub fn resolve(&self, frag_id: u64) -> Result<FlowKey, PacketError> {
        self.resolve_at(frag_id, Instant::now())
    }

    pub(crate) fn resolve_at(&self, frag_id: u64, now: Instant) -> Result<FlowKey, PacketError> {
        let mut shard = self.shard(frag_id).lock();

        match shard.entries.get(&frag_id).copied() {
            Some(entry) if !self.is_expired(&entry, now) => {
                drop(shard);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(entry.key)
            }
            Some(_) => {
                shard.entries.remove(&frag_id);
                drop(shard);
                self.expired.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(PacketError::FragmentUnresolved { frag_id })
            }
            None => {
                drop(shard);
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(PacketError::FragmentUnresolved { frag_id })
            }
        }
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub(crate) fn purge_expired_at(&self, now: Instant) -> usize {
        let mut removed = 0;
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            while let Some(inserted_at) = shard.oldest_inserted_at() {
                if now.saturating_duration_since(inserted_at) < self.config.ttl {
                    break;
                }
                shard.pop_oldest();
                removed += 1;
            }
        }
        self.expired.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Total entry limit across all shards
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shards.iter().map(|s| s.lock().capacity).sum()
    }

    /// Number of cached entries, expired ones included until purged
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().entries.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            shard.entries.clear();
            shard.order.clear();
        }
    }

    /// Get correlator statistics
    #[must_use]
    pub fn stats(&self) -> FragmentStats {
        FragmentStats {
            entries: self.len(),
            inserts: self.inserts.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}

impl Default for FragmentCorrelator {
    fn default() -> Self {
        Self::new(FragmentConfig::default())
    }
}

impl fmt::Debug for FragmentCorrelator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FragmentCorrelator")
            .field("shards", &self.shards.len())
            .field("capacity", &self.capacity())
            .field("ttl", &self.config.ttl)
            .finish_non_exhaustive()
    }
}
