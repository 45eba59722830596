//! Packet parsing and flow classification
//!
//! Turns the raw IP packet handed over by the kernel queue into a
//! [`Classification`]: a flow key plus the outcome code that tells the
//! dispatcher how to hash it.
//!
//! # Module Structure
//!
//! - [`cursor`]: Bounds-checked reads over the packet buffer
//! - [`classify`]: IPv4/IPv6 and transport parsing
//! - `icmp`: ICMP/ICMPv6 handling, embedded packet reversal
//! - [`proto`]: Protocol numbers and header sizes
//! - [`types`]: Flow keys, classification outcomes and codes

pub mod classify;
pub mod cursor;
mod icmp;
pub mod proto;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use classify::FlowKeyExtractor;
pub use cursor::ProtocolCursor;
pub use types::{ClassCode, Classification, FlowKey, Ports};
