//! Packet builders for the integration tests
//!
//! Checksums are left zero; the balancer never validates them.

use std::net::{Ipv4Addr, Ipv6Addr};

use nfqlb::packet::proto::{IPPROTO_FRAGMENT, IPPROTO_ICMP, IPPROTO_ICMPV6, IPV4_MF};

pub const CLIENT4: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 7);
pub const CLIENT4_ALT: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 8);
pub const VIP4: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
pub const VIP4_ALT: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
pub const ROUTER4: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 1);

pub const CLIENT6: Ipv6Addr = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 7);
pub const VIP6: Ipv6Addr = Ipv6Addr::new(0x2001, 0xdb8, 1, 0, 0, 0, 0, 1);
pub const ROUTER6: Ipv6Addr = Ipv6Addr::new(0x2001, 0xdb8, 2, 0, 0, 0, 0, 1);

/// IPv4 packet with a 20 byte header
pub fn ipv4(src: Ipv4Addr, dst: Ipv4Addr, proto: u8, payload: &[u8]) -> Vec<u8> {
    ipv4_fragment(src, dst, proto, 0, 0, payload)
}

/// IPv4 packet with explicit identification and flags/offset word
pub fn ipv4_fragment(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    proto: u8,
    ident: u16,
    flags_offset: u16,
    payload: &[u8],
) -> Vec<u8> {
    let total = u16::try_from(20 + payload.len()).unwrap();
    let mut p = vec![0x45, 0];
    p.extend_from_slice(&total.to_be_bytes());
    p.extend_from_slice(&ident.to_be_bytes());
    p.extend_from_slice(&flags_offset.to_be_bytes());
    p.extend_from_slice(&[64, proto, 0, 0]);
    p.extend_from_slice(&src.octets());
    p.extend_from_slice(&dst.octets());
    p.extend_from_slice(payload);
    p
}

/// Split an IPv4 datagram payload in two fragments at `split` (multiple of 8)
pub fn ipv4_fragments(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    proto: u8,
    ident: u16,
    payload: &[u8],
    split: usize,
) -> (Vec<u8>, Vec<u8>) {
    assert_eq!(split % 8, 0);
    let offset = u16::try_from(split / 8).unwrap();
    (
        ipv4_fragment(src, dst, proto, ident, IPV4_MF, &payload[..split]),
        ipv4_fragment(src, dst, proto, ident, offset, &payload[split..]),
    )
}

/// IPv6 packet; `payload` starts with the header named by `next`
pub fn ipv6(src: Ipv6Addr, dst: Ipv6Addr, next: u8, payload: &[u8]) -> Vec<u8> {
    let len = u16::try_from(payload.len()).unwrap();
    let mut p = vec![0x60, 0, 0, 0];
    p.extend_from_slice(&len.to_be_bytes());
    p.extend_from_slice(&[next, 64]);
    p.extend_from_slice(&src.octets());
    p.extend_from_slice(&dst.octets());
    p.extend_from_slice(payload);
    p
}

/// Generic 8 byte extension header (hop-by-hop, routing, destination options)
pub fn ext_header(next: u8) -> Vec<u8> {
    vec![next, 0, 1, 4, 0, 0, 0, 0]
}

/// IPv6 fragment extension header
pub fn frag_header(next: u8, offset: u16, more: bool, ident: u32) -> Vec<u8> {
    let word = (offset << 3) | u16::from(more);
    let mut h = vec![next, 0];
    h.extend_from_slice(&word.to_be_bytes());
    h.extend_from_slice(&ident.to_be_bytes());
    h
}

/// Split an IPv6 payload in two fragments at `split` (multiple of 8)
pub fn ipv6_fragments(
    src: Ipv6Addr,
    dst: Ipv6Addr,
    next: u8,
    ident: u32,
    payload: &[u8],
    split: usize,
) -> (Vec<u8>, Vec<u8>) {
    assert_eq!(split % 8, 0);
    let offset = u16::try_from(split / 8).unwrap();
    let mut first = frag_header(next, 0, true, ident);
    first.extend_from_slice(&payload[..split]);
    let mut second = frag_header(next, offset, false, ident);
    second.extend_from_slice(&payload[split..]);
    (
        ipv6(src, dst, IPPROTO_FRAGMENT, &first),
        ipv6(src, dst, IPPROTO_FRAGMENT, &second),
    )
}

/// TCP header (no options) followed by `body`
pub fn tcp(sport: u16, dport: u16, body: &[u8]) -> Vec<u8> {
    let mut t = Vec::new();
    t.extend_from_slice(&sport.to_be_bytes());
    t.extend_from_slice(&dport.to_be_bytes());
    t.extend_from_slice(&[0, 0, 0, 1, 0, 0, 0, 0]);
    t.extend_from_slice(&[0x50, 0x18, 0xff, 0xff, 0, 0, 0, 0]);
    t.extend_from_slice(body);
    t
}

pub fn udp(sport: u16, dport: u16, body: &[u8]) -> Vec<u8> {
    let len = u16::try_from(8 + body.len()).unwrap();
    let mut u = Vec::new();
    u.extend_from_slice(&sport.to_be_bytes());
    u.extend_from_slice(&dport.to_be_bytes());
    u.extend_from_slice(&len.to_be_bytes());
    u.extend_from_slice(&[0, 0]);
    u.extend_from_slice(body);
    u
}

/// SCTP common header with one empty DATA-like chunk header
pub fn sctp(sport: u16, dport: u16) -> Vec<u8> {
    let mut s = Vec::new();
    s.extend_from_slice(&sport.to_be_bytes());
    s.extend_from_slice(&dport.to_be_bytes());
    s.extend_from_slice(&[0x11, 0x22, 0x33, 0x44, 0, 0, 0, 0]);
    s.extend_from_slice(&[0, 3, 0, 4]);
    s
}

/// ICMP message; `rest` is the word after the checksum
pub fn icmp(icmp_type: u8, code: u8, rest: [u8; 4], body: &[u8]) -> Vec<u8> {
    let mut m = vec![icmp_type, code, 0, 0];
    m.extend_from_slice(&rest);
    m.extend_from_slice(body);
    m
}

/// ICMPv4 error from a router, quoting `quoted` (RFC 792: header + 8 bytes)
pub fn icmp4_error(to: Ipv4Addr, icmp_type: u8, code: u8, quoted: &[u8]) -> Vec<u8> {
    let body = &quoted[..quoted.len().min(28)];
    ipv4(ROUTER4, to, IPPROTO_ICMP, &icmp(icmp_type, code, [0, 0, 5, 0xdc], body))
}

/// ICMPv6 error from a router, quoting as much of `quoted` as given
pub fn icmp6_error(to: Ipv6Addr, icmp_type: u8, quoted: &[u8]) -> Vec<u8> {
    ipv6(ROUTER6, to, IPPROTO_ICMPV6, &icmp(icmp_type, 0, [0, 0, 5, 0x00], quoted))
}
