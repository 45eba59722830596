//! ICMP and ICMPv6 classification
//!
//! Error messages embed the start of the packet that triggered them. That
//! packet travelled backend to client, so its key is reversed to match the
//! client to backend flow the balancer hashed in the first place.
//!
//! A damaged or truncated embedded packet is not an error: the message
//! degrades to [`Classification::IcmpNoInner`] and is hashed on the outer
//! addresses.

use tracing::trace;

use super::classify::{parse_ipv4, parse_ipv6, port_pair, FlowKeyExtractor, IpLayer};
use super::cursor::ProtocolCursor;
use super::proto::{
    has_ports, ICMP_HEADER, IPPROTO_ICMP, IPPROTO_ICMPV6, IPPROTO_SCTP, IPPROTO_UDP, UDP_HEADER,
};
use super::types::{Classification, FlowKey};
use crate::error::PacketError;

/// ICMPv4 types that embed the offending datagram
const fn icmp4_is_error(icmp_type: u8) -> bool {
    // unreachable, source quench, redirect, time exceeded, parameter problem
    matches!(icmp_type, 3 | 4 | 5 | 11 | 12)
}

/// ICMPv4 types whose rest-of-header starts with an identifier
const fn icmp4_has_identifier(icmp_type: u8) -> bool {
    // echo, timestamp and information request/reply
    matches!(icmp_type, 0 | 8 | 13 | 14 | 15 | 16)
}

const fn icmp6_is_error(icmp_type: u8) -> bool {
    // unreachable, packet too big, time exceeded, parameter problem
    matches!(icmp_type, 1..=4)
}

const fn icmp6_has_identifier(icmp_type: u8) -> bool {
    matches!(icmp_type, 128 | 129)
}

fn is_error(v6: bool, icmp_type: u8) -> bool {
    if v6 {
        icmp6_is_error(icmp_type)
    } else {
        icmp4_is_error(icmp_type)
    }
}

fn has_identifier(v6: bool, proto: u8, icmp_type: u8) -> bool {
    match proto {
        IPPROTO_ICMP if !v6 => icmp4_has_identifier(icmp_type),
        IPPROTO_ICMPV6 if v6 => icmp6_has_identifier(icmp_type),
        _ => false,
    }
}

/// Classify the ICMP message carried by `ip`
pub(super) fn classify_icmp(
    extractor: &FlowKeyExtractor,
    ip: &IpLayer<'_>,
) -> Result<Classification, PacketError> {
    let msg = ip.payload;
    msg.bytes(0, ICMP_HEADER)?;
    let icmp_type = msg.read_u8(0)?;
    let v6 = ip.is_v6();
    let outer = ip.key();

    if is_error(v6, icmp_type) {
        let embedded = msg.sub(ICMP_HEADER)?;
        return Ok(match embedded_key(extractor, v6, embedded) {
            Some(key) => Classification::IcmpWithInner(key),
            None => {
                trace!(icmp_type, "embedded packet unusable, using outer addresses");
                Classification::IcmpNoInner(outer)
            }
        });
    }

    if has_identifier(v6, ip.proto, icmp_type) {
        let id = msg.read_u16(4)?;
        return Ok(Classification::IcmpNoInner(outer.with_ports(id, id)));
    }

    Ok(Classification::IcmpNoInner(outer))
}

/// Reversed key of the embedded packet, or `None` if it cannot be used
fn embedded_key(
    extractor: &FlowKeyExtractor,
    v6: bool,
    cur: ProtocolCursor<'_>,
) -> Option<FlowKey> {
    let inner = if v6 { parse_ipv6(cur) } else { parse_ipv4(cur) }.ok()?;

    // a non-first fragment has no transport header to look at
    if inner.frag.is_some_and(|f| !f.is_first()) {
        return None;
    }

    let key = inner.key();

    if matches!(inner.proto, IPPROTO_ICMP | IPPROTO_ICMPV6) {
        let identified = inner
            .payload
            .read_u8(0)
            .is_ok_and(|t| has_identifier(v6, inner.proto, t));
        if identified {
            if let Ok(id) = inner.payload.read_u16(4) {
                return Some(key.with_ports(id, id).reversed());
            }
        }
        return Some(key.reversed());
    }

    if !has_ports(inner.proto) {
        return Some(key.reversed());
    }

    // embedded copies are often cut short, so only the port pair is required
    let ports = port_pair(&inner.payload).ok()?;
    let key = key.with_ports(ports.src, ports.dst).reversed();

    if inner.proto == IPPROTO_UDP && key.dst_port().is_some_and(|p| extractor.is_encap_port(p)) {
        let sctp = inner
            .payload
            .sub(UDP_HEADER)
            .and_then(|c| port_pair(&c))
            .ok();
        if let Some(sctp) = sctp {
            let sctp = sctp.reversed();
            return Some(
                FlowKey::new(key.src, key.dst, IPPROTO_SCTP).with_ports(sctp.src, sctp.dst),
            );
        }
    }

    Some(key)
}
