//! Flow keys and classification outcomes

use std::fmt;
use std::net::IpAddr;
use std::ops::BitOr;

/// Transport port pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ports {
    pub src: u16,
    pub dst: u16,
}

impl Ports {
    #[must_use]
    pub const fn new(src: u16, dst: u16) -> Self {
        Self { src, dst }
    }

    /// Swap source and destination
    #[must_use]
    pub const fn reversed(self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
        }
    }
}

/// Identity of a flow as seen by the balancer.
///
/// Keys are compared field by field and are not direction-normalized;
/// reversing an ICMP-embedded packet is an explicit [`FlowKey::reversed`]
/// call by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub proto: u8,
    /// `None` when the protocol carries no usable ports
    pub ports: Option<Ports>,
}

impl FlowKey {
    /// Create a key without ports
    #[must_use]
    pub const fn new(src: IpAddr, dst: IpAddr, proto: u8) -> Self {
        Self {
            src,
            dst,
            proto,
            ports: None,
        }
    }

    /// Set the port pair
    #[must_use]
    pub const fn with_ports(mut self, src_port: u16, dst_port: u16) -> Self {
        self.ports = Some(Ports::new(src_port, dst_port));
        self
    }

    /// Same flow seen from the other direction
    #[must_use]
    pub fn reversed(self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
            proto: self.proto,
            ports: self.ports.map(Ports::reversed),
        }
    }

    /// Copy of the key with the ports cleared
    #[must_use]
    pub const fn addresses_only(mut self) -> Self {
        self.ports = None;
        self
    }

    #[must_use]
    pub fn src_port(&self) -> Option<u16> {
        self.ports.map(|p| p.src)
    }

    #[must_use]
    pub fn dst_port(&self) -> Option<u16> {
        self.ports.map(|p| p.dst)
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ports {
            Some(p) => write!(
                f,
                "proto {} {} -> {}",
                self.proto,
                SocketFmt(self.src, p.src),
                SocketFmt(self.dst, p.dst)
            ),
            None => write!(f, "proto {} {} -> {}", self.proto, self.src, self.dst),
        }
    }
}

struct SocketFmt(IpAddr, u16);

impl fmt::Display for SocketFmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            IpAddr::V4(a) => write!(f, "{a}:{}", self.1),
            IpAddr::V6(a) => write!(f, "[{a}]:{}", self.1),
        }
    }
}

/// Classification code bitmask.
///
/// The numeric values are a stable external contract: callers test
/// membership, for example `code.intersects(ClassCode::FRAGMENT)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ClassCode(u32);

impl ClassCode {
    /// Normal packet, ports valid
    pub const OK: Self = Self(0);
    /// First fragment, ports and fragment id valid
    pub const FIRST_FRAGMENT: Self = Self(1);
    /// Later fragment, only the fragment id is valid
    pub const SUBSEQUENT_FRAGMENT: Self = Self(2);
    /// UDP to the encapsulation port, rewritten to SCTP
    pub const UDP_ENCAP_SCTP: Self = Self(4);
    /// ICMP error, key taken from the embedded packet and reversed
    pub const ICMP_WITH_INNER: Self = Self(8);
    /// ICMP without an embedded packet, identifier may be valid
    pub const ICMP_NO_INNER: Self = Self(16);
    /// Only addresses are valid
    pub const ADDRESSES_ONLY: Self = Self(32);
    /// Any fragment-related outcome
    pub const FRAGMENT: Self = Self(1 | 2);

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// All bits of `other` are set
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Any bit of `other` is set
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for ClassCode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for ClassCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of classifying one packet.
///
/// Each variant carries exactly the fields that are meaningful for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Normal packet with addresses and ports
    Normal(FlowKey),

    /// First fragment of a datagram. `udp_encap` is set when the key was
    /// rewritten from SCTP-over-UDP.
    FirstFragment {
        key: FlowKey,
        frag_id: u64,
        udp_encap: bool,
    },

    /// Later fragment; ports must come from the fragment correlator
    SubsequentFragment {
        src: IpAddr,
        dst: IpAddr,
        proto: u8,
        frag_id: u64,
    },

    /// UDP to the encapsulation port; proto is SCTP, ports from the inner header
    UdpEncapSctp(FlowKey),

    /// ICMP error; key is the embedded packet, reversed
    IcmpWithInner(FlowKey),

    /// ICMP without embedded packet; ports hold the identifier when present
    IcmpNoInner(FlowKey),

    /// Protocol without usable ports
    AddressesOnly(FlowKey),
}

impl Classification {
    /// Bitmask code for this outcome
    #[must_use]
    pub fn code(&self) -> ClassCode {
        match self {
            Self::Normal(_) => ClassCode::OK,
            Self::FirstFragment {
                udp_encap: false, ..
            } => ClassCode::FIRST_FRAGMENT,
            Self::FirstFragment { udp_encap: true, .. } => {
                ClassCode::FIRST_FRAGMENT | ClassCode::UDP_ENCAP_SCTP
            }
            Self::SubsequentFragment { .. } => ClassCode::SUBSEQUENT_FRAGMENT,
            Self::UdpEncapSctp(_) => ClassCode::UDP_ENCAP_SCTP,
            Self::IcmpWithInner(_) => ClassCode::ICMP_WITH_INNER,
            Self::IcmpNoInner(_) => ClassCode::ICMP_NO_INNER,
            Self::AddressesOnly(_) => ClassCode::ADDRESSES_ONLY,
        }
    }

    /// Flow key carried by the outcome.
    ///
    /// For a subsequent fragment this is the address-only key of the
    /// fragment itself; the real key has to be resolved by fragment id.
    #[must_use]
    pub fn key(&self) -> FlowKey {
        match *self {
            Self::Normal(key)
            | Self::FirstFragment { key, .. }
            | Self::UdpEncapSctp(key)
            | Self::IcmpWithInner(key)
            | Self::IcmpNoInner(key)
            | Self::AddressesOnly(key) => key,
            Self::SubsequentFragment {
                src, dst, proto, ..
            } => FlowKey::new(src, dst, proto),
        }
    }

    /// Fragment identifier for fragment outcomes
    #[must_use]
    pub const fn frag_id(&self) -> Option<u64> {
        match self {
            Self::FirstFragment { frag_id, .. } | Self::SubsequentFragment { frag_id, .. } => {
                Some(*frag_id)
            }
            _ => None,
        }
    }

    /// Short label used in statistics and log fields
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Normal(_) => "normal",
            Self::FirstFragment { .. } => "first_fragment",
            Self::SubsequentFragment { .. } => "subsequent_fragment",
            Self::UdpEncapSctp(_) => "udp_encap_sctp",
            Self::IcmpWithInner(_) => "icmp_with_inner",
            Self::IcmpNoInner(_) => "icmp_no_inner",
            Self::AddressesOnly(_) => "addresses_only",
        }
    }
}
