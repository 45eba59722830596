//! Protocol numbers and header constants

/// EtherType of IPv4, as reported by the queue's hardware protocol field
pub const ETH_P_IP: u16 = 0x0800;
/// EtherType of IPv6
pub const ETH_P_IPV6: u16 = 0x86DD;

pub const IPPROTO_HOPOPTS: u8 = 0;
pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;
pub const IPPROTO_ROUTING: u8 = 43;
pub const IPPROTO_FRAGMENT: u8 = 44;
pub const IPPROTO_ESP: u8 = 50;
pub const IPPROTO_AH: u8 = 51;
pub const IPPROTO_ICMPV6: u8 = 58;
pub const IPPROTO_NONE: u8 = 59;
pub const IPPROTO_DSTOPTS: u8 = 60;
pub const IPPROTO_SCTP: u8 = 132;
pub const IPPROTO_UDPLITE: u8 = 136;
pub const IPPROTO_MOBILITY: u8 = 135;
pub const IPPROTO_HIP: u8 = 139;
pub const IPPROTO_SHIM6: u8 = 140;
/// Experimentation and testing (RFC 3692)
pub const IPPROTO_EXP1: u8 = 253;
pub const IPPROTO_EXP2: u8 = 254;

pub const IPV4_MIN_HEADER: usize = 20;
pub const IPV6_HEADER: usize = 40;
pub const IPV6_FRAGMENT_HEADER: usize = 8;

pub const TCP_MIN_HEADER: usize = 20;
pub const UDP_HEADER: usize = 8;
pub const SCTP_COMMON_HEADER: usize = 12;
pub const ICMP_HEADER: usize = 8;

/// IPv4 "more fragments" flag in the flags/offset word
pub const IPV4_MF: u16 = 0x2000;
/// IPv4 fragment offset mask (8-byte units)
pub const IPV4_OFFSET_MASK: u16 = 0x1FFF;

/// Upper bound on IPv6 extension headers walked before giving up
pub const MAX_EXTENSION_HEADERS: usize = 8;

/// Whether an IPv6 next-header value is an extension header that can be
/// skipped to reach the upper-layer protocol.
///
/// ESP is deliberately absent: its payload is encrypted, so the walk stops
/// there and the packet is treated as carrying no ports.
#[must_use]
pub const fn is_ipv6_extension(next_header: u8) -> bool {
    matches!(
        next_header,
        IPPROTO_HOPOPTS
            | IPPROTO_ROUTING
            | IPPROTO_FRAGMENT
            | IPPROTO_AH
            | IPPROTO_DSTOPTS
            | IPPROTO_MOBILITY
            | IPPROTO_HIP
            | IPPROTO_SHIM6
            | IPPROTO_EXP1
            | IPPROTO_EXP2
    )
}

/// Whether the transport protocol starts with 16-bit source and destination ports
#[must_use]
pub const fn has_ports(proto: u8) -> bool {
    matches!(
        proto,
        IPPROTO_TCP | IPPROTO_UDP | IPPROTO_SCTP | IPPROTO_UDPLITE
    )
}
