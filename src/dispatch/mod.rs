//! Queue dispatcher boundary
//!
//! The kernel-queue layer hands each packet to a [`PacketHandler`] and
//! applies the returned [`Verdict`]. [`LoadBalancer`] is the handler that
//! runs the pipeline:
//!
//! ```text
//! payload -> FlowKeyExtractor::classify -> [FragmentCorrelator] -> hash_flow
//!         -> BackendTable::backend_for -> FwmarkConfig::encode -> Verdict
//! ```
//!
//! Errors never escape the handler. Malformed packets, and packets arriving
//! while no backend is configured, get the configured [`FailurePolicy`].
//!
//! The Linux runner that owns the queue sockets lives in [`nfqueue`].

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::Config;
use crate::error::{PacketError, TableError};
use crate::lb::fragment::{FragmentConfig, FragmentCorrelator};
use crate::lb::hash::hash_flow;
use crate::lb::maglev::BackendTable;
use crate::lb::state::{RuntimeSnapshot, SharedRuntimeState};
use crate::packet::proto::{ETH_P_IP, ETH_P_IPV6};
use crate::packet::{Classification, FlowKey, FlowKeyExtractor};

#[cfg(target_os = "linux")]
pub mod nfqueue;

/// What to do with a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Let the packet through, optionally setting its mark
    Accept { mark: Option<u32> },
    /// Drop the packet
    Drop,
}

impl Verdict {
    /// Accept without touching the mark
    #[must_use]
    pub const fn accept() -> Self {
        Self::Accept { mark: None }
    }

    /// Accept and set `mark`
    #[must_use]
    pub const fn accept_with_mark(mark: u32) -> Self {
        Self::Accept { mark: Some(mark) }
    }

    /// Mark to apply, if any
    #[must_use]
    pub const fn mark(&self) -> Option<u32> {
        match self {
            Self::Accept { mark } => *mark,
            Self::Drop => None,
        }
    }

    #[must_use]
    pub const fn is_drop(&self) -> bool {
        matches!(self, Self::Drop)
    }
}

/// Behaviour when a packet cannot be assigned a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Accept the packet unmarked
    #[default]
    FailOpen,
    /// Drop the packet
    FailClosed,
}

impl FailurePolicy {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FailOpen => "fail_open",
            Self::FailClosed => "fail_closed",
        }
    }

    /// Verdict this policy gives a packet that could not be balanced
    #[must_use]
    pub const fn verdict(&self) -> Verdict {
        match self {
            Self::FailOpen => Verdict::accept(),
            Self::FailClosed => Verdict::Drop,
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "fail_open" | "open" | "accept" => Ok(Self::FailOpen),
            "fail_closed" | "closed" | "drop" => Ok(Self::FailClosed),
            other => Err(format!("unknown failure policy: {other}")),
        }
    }
}

/// Callback invoked by the queue layer for every packet.
///
/// The payload is only valid for the duration of the call.
pub trait PacketHandler: Send + Sync {
    /// Decide the verdict for an IP packet. `proto` is the EtherType.
    fn handle_packet(&self, proto: u16, payload: &[u8]) -> Verdict;

    /// Same as [`handle_packet`](Self::handle_packet), with the mark the
    /// packet already carries.
    fn handle_queued(&self, proto: u16, payload: &[u8], mark: u32) -> Verdict {
        let _ = mark;
        self.handle_packet(proto, payload)
    }
}

/// EtherType for a queued packet.
///
/// Uses the hardware protocol when it names IPv4 or IPv6 and falls back to
/// the IP version nibble otherwise (locally generated packets may report 0).
#[must_use]
pub fn ether_type_for(hw_protocol: u16, payload: &[u8]) -> u16 {
    match hw_protocol {
        ETH_P_IP | ETH_P_IPV6 => hw_protocol,
        _ => match payload.first().map(|b| b >> 4) {
            Some(4) => ETH_P_IP,
            Some(6) => ETH_P_IPV6,
            _ => hw_protocol,
        },
    }
}

/// Result of running the pipeline on one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub classification: Classification,
    /// Key that was hashed; for a later fragment, the resolved key if any
    pub key: FlowKey,
    pub hash: u32,
    /// Chosen backend, `None` without a table
    pub backend: Option<u32>,
    /// Mark to set, `None` without a table
    pub mark: Option<u32>,
}

const CLASS_COUNT: usize = 7;

const fn class_index(c: &Classification) -> usize {
    match c {
        Classification::Normal(_) => 0,
        Classification::FirstFragment { .. } => 1,
        Classification::SubsequentFragment { .. } => 2,
        Classification::UdpEncapSctp(_) => 3,
        Classification::IcmpWithInner(_) => 4,
        Classification::IcmpNoInner(_) => 5,
        Classification::AddressesOnly(_) => 6,
    }
}

#[derive(Default)]
struct Counters {
    packets: AtomicU64,
    marked: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
    fragment_fallbacks: AtomicU64,
    own_mark_bypass: AtomicU64,
    no_table: AtomicU64,
    classes: [AtomicU64; CLASS_COUNT],
}

/// Dispatcher statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    /// Packets handed to the handler
    pub packets: u64,
    /// Packets accepted with a backend mark
    pub marked: u64,
    /// Packets dropped by the failure policy
    pub dropped: u64,
    /// Classification errors
    pub errors: u64,
    /// Later fragments hashed on addresses because the first was not seen
    pub fragment_fallbacks: u64,
    /// Packets already carrying the own mark
    pub own_mark_bypass: u64,
    /// Packets seen while no table was configured
    pub no_table: u64,
    pub normal: u64,
    pub first_fragment: u64,
    pub subsequent_fragment: u64,
    pub udp_encap_sctp: u64,
    pub icmp_with_inner: u64,
    pub icmp_no_inner: u64,
    pub addresses_only: u64,
}

/// The load-balancing packet handler
pub struct LoadBalancer {
    state: Arc<SharedRuntimeState>,
    extractor: FlowKeyExtractor,
    fragments: FragmentCorrelator,
    policy: FailurePolicy,
    counters: Counters,
}

impl LoadBalancer {
    /// Create a handler over shared state
    #[must_use]
    pub fn new(state: Arc<SharedRuntimeState>, fragments: FragmentConfig) -> Self {
        Self {
            state,
            extractor: FlowKeyExtractor::new(),
            fragments: FragmentCorrelator::new(fragments),
            policy: FailurePolicy::default(),
            counters: Counters::default(),
        }
    }

    /// Build state and handler from configuration
    ///
    /// # Errors
    ///
    /// Returns `TableError` if the configured backends do not form a valid table.
    pub fn from_config(config: &Config) -> Result<Self, TableError> {
        let balancer = &config.balancer;
        let table = if balancer.backends.is_empty() {
            None
        } else {
            Some(BackendTable::build(&balancer.backends, balancer.table_size)?)
        };
        let state = Arc::new(SharedRuntimeState::new(
            balancer.shared_name.clone(),
            RuntimeSnapshot::new(table, balancer.fwmark),
        ));

        Ok(Self::new(state, config.fragments.to_fragment_config())
            .with_udp_encap_port(balancer.udp_encap_port)
            .with_failure_policy(config.queue.failure_policy))
    }

    /// Treat UDP to `port` as encapsulated SCTP (0 disables)
    #[must_use]
    pub fn with_udp_encap_port(mut self, port: u16) -> Self {
        self.extractor = self.extractor.with_udp_encap_port(port);
        self
    }

    /// Set the failure policy
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn state(&self) -> &Arc<SharedRuntimeState> {
        &self.state
    }

    #[must_use]
    pub const fn fragments(&self) -> &FragmentCorrelator {
        &self.fragments
    }

    #[must_use]
    pub const fn extractor(&self) -> &FlowKeyExtractor {
        &self.extractor
    }

    #[must_use]
    pub const fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Run classification, fragment correlation, hashing and lookup.
    ///
    /// First fragments are recorded in the correlator as a side effect.
    ///
    /// # Errors
    ///
    /// Returns the classification error for malformed packets.
    pub fn select(&self, proto: u16, payload: &[u8]) -> Result<Selection, PacketError> {
        let snapshot = self.state.load();
        self.select_with(&snapshot, proto, payload)
    }

    fn select_with(
        &self,
        snapshot: &RuntimeSnapshot,
        proto: u16,
        payload: &[u8],
    ) -> Result<Selection, PacketError> {
        let classification = self.extractor.classify(proto, payload)?;
        self.counters.classes[class_index(&classification)].fetch_add(1, Ordering::Relaxed);

        let key = match classification {
            Classification::FirstFragment { key, frag_id, .. } => {
                self.fragments.record(frag_id, key);
                key
            }
            Classification::SubsequentFragment { frag_id, .. } => {
                match self.fragments.resolve(frag_id) {
                    Ok(key) => key,
                    Err(e) => {
                        self.counters
                            .fragment_fallbacks
                            .fetch_add(1, Ordering::Relaxed);
                        debug!(error = %e, "hashing fragment on addresses");
                        classification.key()
                    }
                }
            }
            other => other.key(),
        };

        let hash = hash_flow(&key);
        let backend = snapshot.table.as_ref().map(|t| t.backend_for(hash));
        let mark = backend.map(|id| snapshot.fwmark.encode(id));

        Ok(Selection {
            classification,
            key,
            hash,
            backend,
            mark,
        })
    }

    fn fail(&self) -> Verdict {
        let verdict = self.policy.verdict();
        if verdict.is_drop() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
        verdict
    }

    /// Get dispatcher statistics
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        let c = &self.counters;
        let class = |i: usize| c.classes[i].load(Ordering::Relaxed);
        DispatchStats {
            packets: c.packets.load(Ordering::Relaxed),
            marked: c.marked.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            errors: c.errors.load(Ordering::Relaxed),
            fragment_fallbacks: c.fragment_fallbacks.load(Ordering::Relaxed),
            own_mark_bypass: c.own_mark_bypass.load(Ordering::Relaxed),
            no_table: c.no_table.load(Ordering::Relaxed),
            normal: class(0),
            first_fragment: class(1),
            subsequent_fragment: class(2),
            udp_encap_sctp: class(3),
            icmp_with_inner: class(4),
            icmp_no_inner: class(5),
            addresses_only: class(6),
        }
    }
}

impl PacketHandler for LoadBalancer {
    fn handle_packet(&self, proto: u16, payload: &[u8]) -> Verdict {
        self.handle_queued(proto, payload, 0)
    }

    fn handle_queued(&self, proto: u16, payload: &[u8], mark: u32) -> Verdict {
        self.counters.packets.fetch_add(1, Ordering::Relaxed);
        let snapshot = self.state.load();

        if snapshot.fwmark.is_own(mark) {
            self.counters.own_mark_bypass.fetch_add(1, Ordering::Relaxed);
            return Verdict::accept();
        }

        match self.select_with(&snapshot, proto, payload) {
            Ok(Selection {
                mark: Some(mark),
                key,
                backend,
                ..
            }) => {
                self.counters.marked.fetch_add(1, Ordering::Relaxed);
                trace!(%key, ?backend, mark, "packet balanced");
                Verdict::accept_with_mark(mark)
            }
            Ok(_) => {
                self.counters.no_table.fetch_add(1, Ordering::Relaxed);
                trace!(policy = %self.policy, "no backend table");
                self.fail()
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                debug!(
                    error = %e,
                    kind = e.kind(),
                    len = payload.len(),
                    policy = %self.policy,
                    "packet not classified"
                );
                self.fail()
            }
        }
    }
}

impl fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("state", &self.state)
            .field("extractor", &self.extractor)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
