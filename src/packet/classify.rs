//! Flow key extraction
//!
//! [`FlowKeyExtractor::classify`] walks the IP header (and the IPv6
//! extension header chain), detects fragmentation, and reads the transport
//! ports through a [`ProtocolCursor`]. ICMP messages are handed to
//! [`super::icmp`], which reuses the IP parsing here for the embedded
//! packet.
//!
//! # Outcomes
//!
//! ```text
//! fragment, offset != 0 ──────────────► SubsequentFragment
//! fragment, offset == 0 ──► transport ─► FirstFragment
//! TCP / UDP / SCTP / UDP-Lite ────────► Normal
//! UDP to encapsulation port ──────────► UdpEncapSctp
//! ICMP error with embedded packet ────► IcmpWithInner (reversed)
//! other ICMP ─────────────────────────► IcmpNoInner
//! anything else ──────────────────────► AddressesOnly
//! ```
//!
//! The extractor holds configuration only; classifying the same bytes
//! twice always gives the same result.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tracing::trace;

use super::cursor::ProtocolCursor;
use super::icmp;
use super::proto::{
    has_ports, is_ipv6_extension, ETH_P_IP, ETH_P_IPV6, IPPROTO_AH, IPPROTO_FRAGMENT,
    IPPROTO_ICMP, IPPROTO_ICMPV6, IPPROTO_SCTP, IPPROTO_TCP, IPPROTO_UDP, IPPROTO_UDPLITE,
    IPV4_MF, IPV4_MIN_HEADER, IPV4_OFFSET_MASK, IPV6_FRAGMENT_HEADER, IPV6_HEADER,
    MAX_EXTENSION_HEADERS, SCTP_COMMON_HEADER, TCP_MIN_HEADER, UDP_HEADER,
};
use super::types::{Classification, FlowKey, Ports};
use crate::error::PacketError;
use crate::lb::hash::hash_address_pair;

/// Fragmentation state of an IP packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FragInfo {
    /// IPv4 identification (zero-extended) or IPv6 fragment identification
    pub ident: u32,
    /// Offset in 8-byte units
    pub offset: u16,
}

impl FragInfo {
    pub const fn is_first(&self) -> bool {
        self.offset == 0
    }
}

/// Parsed IP layer
#[derive(Debug, Clone, Copy)]
pub(crate) struct IpLayer<'a> {
    pub src: IpAddr,
    pub dst: IpAddr,
    /// Upper-layer protocol after any extension headers
    pub proto: u8,
    pub frag: Option<FragInfo>,
    /// Upper-layer bytes, bounded by the IP length fields
    pub payload: ProtocolCursor<'a>,
}

impl IpLayer<'_> {
    pub const fn is_v6(&self) -> bool {
        matches!(self.src, IpAddr::V6(_))
    }

    pub const fn key(&self) -> FlowKey {
        FlowKey::new(self.src, self.dst, self.proto)
    }

    /// 64-bit fragment id: address hash in the upper half, IP identification below
    pub fn frag_id(&self, ident: u32) -> u64 {
        (u64::from(hash_address_pair(&self.src, &self.dst)) << 32) | u64::from(ident)
    }
}

/// Parse an IPv4 header
pub(crate) fn parse_ipv4(cur: ProtocolCursor<'_>) -> Result<IpLayer<'_>, PacketError> {
    let vihl = cur.read_u8(0)?;
    if vihl >> 4 != 4 {
        return Err(PacketError::MalformedHeader("ipv4 version"));
    }
    let ihl = usize::from(vihl & 0x0f) * 4;
    if ihl < IPV4_MIN_HEADER {
        return Err(PacketError::MalformedHeader("ipv4 header length"));
    }
    let total_len = usize::from(cur.read_u16(2)?);
    if total_len < ihl {
        return Err(PacketError::MalformedHeader("ipv4 total length"));
    }
    cur.bytes(0, ihl)?;
    let cur = cur.truncate(total_len);

    let ident = cur.read_u16(4)?;
    let flags_offset = cur.read_u16(6)?;
    let proto = cur.read_u8(9)?;
    let src = Ipv4Addr::from(cur.read_array::<4>(12)?);
    let dst = Ipv4Addr::from(cur.read_array::<4>(16)?);

    let offset = flags_offset & IPV4_OFFSET_MASK;
    let frag = (flags_offset & IPV4_MF != 0 || offset != 0).then_some(FragInfo {
        ident: u32::from(ident),
        offset,
    });

    Ok(IpLayer {
        src: IpAddr::V4(src),
        dst: IpAddr::V4(dst),
        proto,
        frag,
        payload: cur.sub(ihl)?,
    })
}

/// Parse an IPv6 header and walk its extension header chain
pub(crate) fn parse_ipv6(cur: ProtocolCursor<'_>) -> Result<IpLayer<'_>, PacketError> {
    if cur.read_u8(0)? >> 4 != 6 {
        return Err(PacketError::MalformedHeader("ipv6 version"));
    }
    cur.bytes(0, IPV6_HEADER)?;
    let payload_len = usize::from(cur.read_u16(4)?);
    let mut next = cur.read_u8(6)?;
    let src = Ipv6Addr::from(cur.read_array::<16>(8)?);
    let dst = Ipv6Addr::from(cur.read_array::<16>(24)?);

    // zero payload length means a jumbogram; the captured length bounds it
    let cur = if payload_len == 0 {
        cur
    } else {
        cur.truncate(IPV6_HEADER + payload_len)
    };

    let mut offset = IPV6_HEADER;
    let mut frag = None;
    let mut walked = 0;

    while is_ipv6_extension(next) {
        if walked == MAX_EXTENSION_HEADERS {
            return Err(PacketError::UnsupportedHeaderChain);
        }
        walked += 1;

        let following = cur.read_u8(offset)?;
        let len = match next {
            IPPROTO_FRAGMENT => {
                let offset_flags = cur.read_u16(offset + 2)?;
                let ident = cur.read_u32(offset + 4)?;
                let frag_offset = offset_flags >> 3;
                let more = offset_flags & 1 != 0;
                // an atomic fragment (offset 0, M clear) is a whole datagram
                if frag_offset != 0 || more {
                    frag = Some(FragInfo {
                        ident,
                        offset: frag_offset,
                    });
                }
                IPV6_FRAGMENT_HEADER
            }
            IPPROTO_AH => (usize::from(cur.read_u8(offset + 1)?) + 2) * 4,
            _ => (usize::from(cur.read_u8(offset + 1)?) + 1) * 8,
        };
        cur.bytes(offset, len)?;
        offset += len;
        next = following;

        // headers after the fragment header live in the first fragment only
        if frag.is_some_and(|f| !f.is_first()) {
            break;
        }
    }

    trace!(ext_headers = walked, proto = next, "ipv6 header chain walked");

    Ok(IpLayer {
        src: IpAddr::V6(src),
        dst: IpAddr::V6(dst),
        proto: next,
        frag,
        payload: cur.sub(offset)?,
    })
}

/// Parse either IP version according to the protocol hint
pub(crate) fn parse_ip(
    proto_hint: u16,
    cur: ProtocolCursor<'_>,
) -> Result<IpLayer<'_>, PacketError> {
    match proto_hint {
        ETH_P_IP => parse_ipv4(cur),
        ETH_P_IPV6 => parse_ipv6(cur),
        other => Err(PacketError::UnsupportedEtherType(other)),
    }
}

/// Validate a transport header and return its ports
pub(crate) fn transport_ports(proto: u8, cur: &ProtocolCursor<'_>) -> Result<Ports, PacketError> {
    match proto {
        IPPROTO_TCP => {
            cur.bytes(0, TCP_MIN_HEADER)?;
            let data_offset = usize::from(cur.read_u8(12)? >> 4) * 4;
            if data_offset < TCP_MIN_HEADER {
                return Err(PacketError::MalformedTransport("tcp data offset"));
            }
            cur.bytes(0, data_offset)?;
        }
        IPPROTO_UDP => {
            cur.bytes(0, UDP_HEADER)?;
            if usize::from(cur.read_u16(4)?) < UDP_HEADER {
                return Err(PacketError::MalformedTransport("udp length"));
            }
        }
        IPPROTO_UDPLITE => {
            cur.bytes(0, UDP_HEADER)?;
        }
        IPPROTO_SCTP => {
            cur.bytes(0, SCTP_COMMON_HEADER)?;
        }
        _ => return Err(PacketError::MalformedTransport("protocol has no ports")),
    }
    port_pair(cur)
}

/// Read the leading source/destination port pair
pub(crate) fn port_pair(cur: &ProtocolCursor<'_>) -> Result<Ports, PacketError> {
    Ok(Ports::new(cur.read_u16(0)?, cur.read_u16(2)?))
}

/// Packet classifier
///
/// # Example
///
/// ```
/// use nfqlb::packet::FlowKeyExtractor;
///
/// let extractor = FlowKeyExtractor::new().with_udp_encap_port(9899);
/// assert_eq!(extractor.udp_encap_port(), Some(9899));
///
/// // Too short to be IPv4
/// assert!(extractor.classify(0x0800, &[0x45, 0x00]).is_err());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowKeyExtractor {
    udp_encap_port: Option<u16>,
}

impl FlowKeyExtractor {
    /// Create an extractor with SCTP-over-UDP detection disabled
    #[must_use]
    pub const fn new() -> Self {
        Self {
            udp_encap_port: None,
        }
    }

    /// Treat UDP to `port` as encapsulated SCTP; 0 disables detection
    #[must_use]
    pub const fn with_udp_encap_port(mut self, port: u16) -> Self {
        self.udp_encap_port = if port == 0 { None } else { Some(port) };
        self
    }

    #[must_use]
    pub const fn udp_encap_port(&self) -> Option<u16> {
        self.udp_encap_port
    }

    pub(crate) fn is_encap_port(&self, port: u16) -> bool {
        self.udp_encap_port == Some(port)
    }

    /// Classify one packet.
    ///
    /// `proto_hint` is the EtherType reported by the queue (0x0800 or
    /// 0x86DD); `data` starts at the IP header.
    ///
    /// # Errors
    ///
    /// Returns a [`PacketError`] for truncated or malformed headers, an
    /// unsupported IPv6 extension header chain, or an unknown protocol hint.
    pub fn classify(&self, proto_hint: u16, data: &[u8]) -> Result<Classification, PacketError> {
        let ip = parse_ip(proto_hint, ProtocolCursor::new(data))?;

        if let Some(frag) = ip.frag {
            let frag_id = ip.frag_id(frag.ident);
            if !frag.is_first() {
                return Ok(Classification::SubsequentFragment {
                    src: ip.src,
                    dst: ip.dst,
                    proto: ip.proto,
                    frag_id,
                });
            }
            let inner = self.classify_transport(&ip)?;
            return Ok(Classification::FirstFragment {
                key: inner.key(),
                frag_id,
                udp_encap: matches!(inner, Classification::UdpEncapSctp(_)),
            });
        }

        self.classify_transport(&ip)
    }

    fn classify_transport(&self, ip: &IpLayer<'_>) -> Result<Classification, PacketError> {
        match ip.proto {
            IPPROTO_ICMP if !ip.is_v6() => icmp::classify_icmp(self, ip),
            IPPROTO_ICMPV6 if ip.is_v6() => icmp::classify_icmp(self, ip),
            proto if has_ports(proto) => {
                let ports = transport_ports(proto, &ip.payload)?;
                if proto == IPPROTO_UDP && self.is_encap_port(ports.dst) {
                    let sctp = ip.payload.sub(UDP_HEADER)?;
                    sctp.bytes(0, SCTP_COMMON_HEADER)?;
                    let inner = port_pair(&sctp)?;
                    let key = FlowKey::new(ip.src, ip.dst, IPPROTO_SCTP)
                        .with_ports(inner.src, inner.dst);
                    return Ok(Classification::UdpEncapSctp(key));
                }
                Ok(Classification::Normal(
                    ip.key().with_ports(ports.src, ports.dst),
                ))
            }
            _ => Ok(Classification::AddressesOnly(ip.key())),
        }
    }
}
