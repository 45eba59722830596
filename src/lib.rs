//! nfqlb: netfilter-queue load balancer core
//!
//! This crate classifies packets handed over by the kernel through NFQUEUE,
//! derives a stable flow hash and maps it through a Maglev table to a
//! backend. The verdict carries a firewall mark that policy routing then uses
//! to forward the packet to the chosen backend.
//!
//! # Features
//!
//! - **Flow keys**: IPv4 and IPv6 (with extension headers), TCP, UDP, SCTP
//! - **ICMP errors**: routed with the flow of the packet they quote
//! - **Fragments**: later fragments follow the first one
//! - **SCTP multi-homing**: SCTP hashed on ports only, also over UDP
//! - **Consistent hashing**: minimal disruption on membership changes
//!
//! # Architecture
//!
//! ```text
//! iptables NFQUEUE → QueueWorker → LoadBalancer → verdict + fwmark
//!                                      ↓
//!                               FlowKeyExtractor
//!                                      ↓
//!                      FragmentCorrelator → hash_flow
//!                                      ↓
//!                    SharedRuntimeState → BackendTable
//! ```
//!
//! # Quick Start
//!
//! ```
//! use nfqlb::config::load_config_str;
//! use nfqlb::dispatch::{LoadBalancer, PacketHandler};
//!
//! let config = load_config_str(r#"{ "balancer": { "backends": [{ "id": 1 }, { "id": 2 }] } }"#)?;
//! let lb = LoadBalancer::from_config(&config)?;
//!
//! // Minimal IPv4 header, protocol 253 (experimental), no transport ports
//! let mut pkt = [0u8; 20];
//! pkt[0] = 0x45;
//! pkt[3] = 20;
//! pkt[9] = 253;
//! pkt[12..16].copy_from_slice(&[10, 0, 0, 1]);
//! pkt[16..20].copy_from_slice(&[10, 0, 0, 2]);
//!
//! let verdict = lb.handle_packet(nfqlb::packet::proto::ETH_P_IP, &pkt);
//! assert!(matches!(verdict.mark(), Some(101 | 102)));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration types and loading
//! - [`dispatch`]: Verdicts, failure policy and the packet handler
//! - [`error`]: Error types
//! - [`lb`]: Hashing, fragment correlation, Maglev table, shared state
//! - [`packet`]: Header parsing and flow classification

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod lb;
pub mod packet;

// Re-export commonly used types at the crate root
pub use config::{load_config, Config};
pub use dispatch::{FailurePolicy, LoadBalancer, PacketHandler, Verdict};
pub use error::{ConfigError, NfqlbError, PacketError, QueueError, TableError};
pub use lb::{Backend, BackendTable, FragmentCorrelator, SharedRuntimeState};
pub use packet::{Classification, FlowKey, FlowKeyExtractor};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
