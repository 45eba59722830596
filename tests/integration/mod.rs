//! Integration tests for nfqlb
//!
//! This module exercises the balancer through its public API with packets
//! built byte by byte, the way they arrive from the kernel queue.
//!
//! # Test Organization
//!
//! - `packets`: Packet builders shared by all modules
//! - `classify`: Flow keys and classification codes for both IP versions
//! - `icmp`: ICMP errors and echo sessions mapped to their flows
//! - `fragments`: Fragment affinity through the handler
//! - `maglev`: Flow movement on membership changes
//! - `dispatcher`: Configuration, verdicts and live table swaps
//! - `robustness`: Truncated, corrupted and random input
//!
//! # Running Tests
//!
//! ```bash
//! # Run all integration tests
//! cargo test --test integration_tests
//!
//! # Run specific test module
//! cargo test --test integration_tests fragments
//! ```

#[allow(dead_code)]
pub mod packets;

pub mod classify;
pub mod icmp;
