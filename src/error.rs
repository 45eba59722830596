//! Error types for nfqlb
//!
//! This module defines the error hierarchy for the load balancer core.
//! Errors are grouped by subsystem; every group can tell whether the
//! condition is local to a single packet (recoverable) or needs operator
//! intervention.

use std::io;

use thiserror::Error;

/// Top-level error type for nfqlb
#[derive(Debug, Error)]
pub enum NfqlbError {
    /// Packet parsing or fragment correlation errors
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    /// Backend table construction errors
    #[error("Backend table error: {0}")]
    Table(#[from] TableError),

    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Queue binding and I/O errors
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl NfqlbError {
    /// Check if this error is recoverable (the next packet may succeed)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Packet(e) => e.is_recoverable(),
            Self::Table(e) => e.is_recoverable(),
            Self::Config(e) => e.is_recoverable(),
            Self::Queue(e) => e.is_recoverable(),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
        }
    }
}

/// Errors raised while turning packet bytes into a flow key.
///
/// All of these are local to one packet. The dispatcher decides whether the
/// packet is accepted unmarked or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PacketError {
    /// A read would cross the logical end of the buffer
    #[error("Truncated packet: {width} byte(s) at offset {offset} exceed end {end}")]
    Truncated {
        offset: usize,
        width: usize,
        end: usize,
    },

    /// IPv6 extension header walk exceeded its bound or hit an unwalkable header
    #[error("Unsupported IPv6 extension header chain")]
    UnsupportedHeaderChain,

    /// Transport header present but internally inconsistent
    #[error("Malformed transport header: {0}")]
    MalformedTransport(&'static str),

    /// IP header present but internally inconsistent
    #[error("Malformed IP header: {0}")]
    MalformedHeader(&'static str),

    /// Protocol hint is neither IPv4 nor IPv6
    #[error("Unsupported ether type: 0x{0:04x}")]
    UnsupportedEtherType(u16),

    /// No correlation entry for a subsequent fragment
    #[error("No flow recorded for fragment id 0x{frag_id:016x}")]
    FragmentUnresolved { frag_id: u64 },
}

impl PacketError {
    /// Packet errors never affect other packets
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        true
    }

    /// Create a truncation error
    #[must_use]
    pub const fn truncated(offset: usize, width: usize, end: usize) -> Self {
        Self::Truncated { offset, width, end }
    }

    /// Short label used in statistics and log fields
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Truncated { .. } => "truncated",
            Self::UnsupportedHeaderChain => "unsupported_header_chain",
            Self::MalformedTransport(_) => "malformed_transport",
            Self::MalformedHeader(_) => "malformed_header",
            Self::UnsupportedEtherType(_) => "unsupported_ether_type",
            Self::FragmentUnresolved { .. } => "fragment_unresolved",
        }
    }
}

/// Backend table construction errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    /// No backends to build a table from
    #[error("No backends configured")]
    NoBackends,

    /// Backend weight must be positive
    #[error("Backend {id} has weight 0")]
    InvalidWeight { id: u32 },

    /// Backend identifiers must be unique
    #[error("Duplicate backend id: {id}")]
    DuplicateBackend { id: u32 },

    /// Table size must be prime for permutations to cover every slot
    #[error("Table size {0} is not prime")]
    TableSizeNotPrime(usize),

    /// Table must have more slots than backends
    #[error("Table size {size} is too small for {backends} backends")]
    TableTooSmall { size: usize, backends: usize },

    /// Table size above the supported maximum
    #[error("Table size {size} exceeds the maximum of {max}")]
    TableTooLarge { size: usize, max: usize },
}

impl TableError {
    /// Table errors come from configuration and need operator intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are not recoverable without user intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }
}

/// Kernel queue errors
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to open the netlink queue socket
    #[error("Failed to open packet queue: {0}")]
    Open(String),

    /// Failed to bind a queue number
    #[error("Failed to bind queue {queue}: {reason}")]
    Bind { queue: u16, reason: String },

    /// Failed to receive a packet
    #[error("Failed to receive from queue {queue}: {reason}")]
    Recv { queue: u16, reason: String },

    /// Failed to deliver a verdict
    #[error("Failed to set verdict on queue {queue}: {reason}")]
    Verdict { queue: u16, reason: String },

    /// Packet queueing is not available on this platform
    #[error("Packet queueing is not supported on this platform")]
    Unsupported,
}

impl QueueError {
    /// Check if this error is recoverable
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::Open(_) | Self::Bind { .. } | Self::Unsupported => false,
            Self::Recv { .. } | Self::Verdict { .. } => true,
        }
    }

    /// Create a bind error
    pub fn bind(queue: u16, reason: impl Into<String>) -> Self {
        Self::Bind {
            queue,
            reason: reason.into(),
        }
    }

    /// Create a receive error
    pub fn recv(queue: u16, reason: impl Into<String>) -> Self {
        Self::Recv {
            queue,
            reason: reason.into(),
        }
    }

    /// Create a verdict error
    pub fn verdict(queue: u16, reason: impl Into<String>) -> Self {
        Self::Verdict {
            queue,
            reason: reason.into(),
        }
    }
}

/// Type alias for Result with NfqlbError
pub type Result<T> = std::result::Result<T, NfqlbError>;
