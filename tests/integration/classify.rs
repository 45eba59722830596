//! Classification through the public API
//!
//! Covers the outcomes a queue worker can see and the keys they carry,
//! for both IP versions.

use std::net::IpAddr;

use nfqlb::lb::hash::{hash_addresses, hash_flow};
use nfqlb::packet::proto::{
    ETH_P_IP, ETH_P_IPV6, IPPROTO_DSTOPTS, IPPROTO_ESP, IPPROTO_HOPOPTS, IPPROTO_ROUTING,
    IPPROTO_SCTP, IPPROTO_TCP, IPPROTO_UDP,
};
use nfqlb::packet::{ClassCode, Classification, FlowKey, FlowKeyExtractor};
use nfqlb::PacketError;

use super::packets::*;

const ENCAP_PORT: u16 = 9899;

fn extractor() -> FlowKeyExtractor {
    FlowKeyExtractor::new().with_udp_encap_port(ENCAP_PORT)
}

// ============================================================================
// Plain transports
// ============================================================================

#[test]
fn test_tcp_v4_normal() {
    let pkt = ipv4(CLIENT4, VIP4, IPPROTO_TCP, &tcp(40000, 80, b"GET / HTTP/1.1\r\n"));
    let c = extractor().classify(ETH_P_IP, &pkt).unwrap();

    assert_eq!(c.code(), ClassCode::OK);
    assert_eq!(
        c,
        Classification::Normal(
            FlowKey::new(IpAddr::V4(CLIENT4), IpAddr::V4(VIP4), IPPROTO_TCP).with_ports(40000, 80)
        )
    );
}

#[test]
fn test_udp_v6_normal() {
    let pkt = ipv6(CLIENT6, VIP6, IPPROTO_UDP, &udp(5353, 53, b"query"));
    let c = extractor().classify(ETH_P_IPV6, &pkt).unwrap();

    assert_eq!(c.code(), ClassCode::OK);
    let key = c.key();
    assert_eq!(key.src, IpAddr::V6(CLIENT6));
    assert_eq!(key.dst, IpAddr::V6(VIP6));
    assert_eq!((key.src_port(), key.dst_port()), (Some(5353), Some(53)));
}

#[test]
fn test_link_padding_is_ignored() {
    // 60 byte minimum Ethernet frame around a 40 byte TCP/IPv4 packet
    let mut pkt = ipv4(CLIENT4, VIP4, IPPROTO_TCP, &tcp(40000, 80, &[]));
    pkt.resize(60, 0xaa);
    let c = extractor().classify(ETH_P_IP, &pkt).unwrap();
    assert_eq!(c.key().dst_port(), Some(80));
}

#[test]
fn test_esp_is_addresses_only() {
    let pkt = ipv4(CLIENT4, VIP4, IPPROTO_ESP, &[0x00, 0x00, 0x10, 0x01, 0, 0, 0, 1]);
    let c = extractor().classify(ETH_P_IP, &pkt).unwrap();

    assert_eq!(c.code(), ClassCode::ADDRESSES_ONLY);
    assert_eq!(c.key().ports, None);
    assert_eq!(hash_flow(&c.key()), hash_addresses(&c.key()));
}

#[test]
fn test_unknown_ether_type() {
    let pkt = ipv4(CLIENT4, VIP4, IPPROTO_TCP, &tcp(1, 2, &[]));
    assert_eq!(
        extractor().classify(0x0806, &pkt),
        Err(PacketError::UnsupportedEtherType(0x0806))
    );
}

#[test]
fn test_version_mismatch_is_malformed() {
    let pkt = ipv6(CLIENT6, VIP6, IPPROTO_TCP, &tcp(1, 2, &[]));
    assert!(matches!(
        extractor().classify(ETH_P_IP, &pkt),
        Err(PacketError::MalformedHeader(_))
    ));
}

// ============================================================================
// IPv6 extension headers
// ============================================================================

#[test]
fn test_v6_extension_chain_reaches_transport() {
    let mut payload = ext_header(IPPROTO_ROUTING);
    payload.extend(ext_header(IPPROTO_DSTOPTS));
    payload.extend(ext_header(IPPROTO_TCP));
    payload.extend(tcp(40000, 443, &[]));
    let pkt = ipv6(CLIENT6, VIP6, IPPROTO_HOPOPTS, &payload);

    let c = extractor().classify(ETH_P_IPV6, &pkt).unwrap();
    assert_eq!(c.key().proto, IPPROTO_TCP);
    assert_eq!(c.key().dst_port(), Some(443));
}

#[test]
fn test_v6_overlong_chain_is_rejected() {
    let mut payload = Vec::new();
    for _ in 0..9 {
        payload.extend(ext_header(IPPROTO_DSTOPTS));
    }
    payload.extend(tcp(1, 2, &[]));
    let pkt = ipv6(CLIENT6, VIP6, IPPROTO_DSTOPTS, &payload);

    assert_eq!(
        extractor().classify(ETH_P_IPV6, &pkt),
        Err(PacketError::UnsupportedHeaderChain)
    );
}

// ============================================================================
// SCTP
// ============================================================================

#[test]
fn test_sctp_multihoming_hashes_alike() {
    let a = ipv4(CLIENT4, VIP4, IPPROTO_SCTP, &sctp(3868, 3868));
    let b = ipv4(CLIENT4_ALT, VIP4_ALT, IPPROTO_SCTP, &sctp(3868, 3868));

    let ka = extractor().classify(ETH_P_IP, &a).unwrap().key();
    let kb = extractor().classify(ETH_P_IP, &b).unwrap().key();
    assert_ne!(ka, kb);
    assert_eq!(hash_flow(&ka), hash_flow(&kb));
}

#[test]
fn test_sctp_over_udp_matches_native_sctp() {
    let mut encap = udp(50000, ENCAP_PORT, &sctp(2905, 2905));
    encap.truncate(8 + 12);
    let encap = ipv4(CLIENT4, VIP4, IPPROTO_UDP, &encap);
    let native = ipv4(CLIENT4_ALT, VIP4, IPPROTO_SCTP, &sctp(2905, 2905));

    let ce = extractor().classify(ETH_P_IP, &encap).unwrap();
    let cn = extractor().classify(ETH_P_IP, &native).unwrap();

    assert_eq!(ce.code(), ClassCode::UDP_ENCAP_SCTP);
    assert_eq!(ce.key().proto, IPPROTO_SCTP);
    assert_eq!(hash_flow(&ce.key()), hash_flow(&cn.key()));
}

#[test]
fn test_encap_port_disabled_keeps_udp() {
    let pkt = ipv4(CLIENT4, VIP4, IPPROTO_UDP, &udp(50000, ENCAP_PORT, &sctp(2905, 2905)));
    let c = FlowKeyExtractor::new().classify(ETH_P_IP, &pkt).unwrap();

    assert_eq!(c.code(), ClassCode::OK);
    assert_eq!(c.key().proto, IPPROTO_UDP);
    assert_eq!(c.key().dst_port(), Some(ENCAP_PORT));
}

#[test]
fn test_encap_without_inner_header_is_truncated() {
    let pkt = ipv4(CLIENT4, VIP4, IPPROTO_UDP, &udp(50000, ENCAP_PORT, &[0, 1, 2]));
    assert!(matches!(
        extractor().classify(ETH_P_IP, &pkt),
        Err(PacketError::Truncated { .. })
    ));
}

// ============================================================================
// Fragments
// ============================================================================

#[test]
fn test_v4_fragment_pair_classification() {
    let payload = tcp(40000, 80, &[0x5a; 48]);
    let (first, second) = ipv4_fragments(CLIENT4, VIP4, IPPROTO_TCP, 0x1234, &payload, 32);

    let c1 = extractor().classify(ETH_P_IP, &first).unwrap();
    let c2 = extractor().classify(ETH_P_IP, &second).unwrap();

    assert_eq!(c1.code(), ClassCode::FIRST_FRAGMENT);
    assert_eq!(c2.code(), ClassCode::SUBSEQUENT_FRAGMENT);
    assert!(ClassCode::FRAGMENT.contains(c1.code()));
    assert_eq!(c1.frag_id(), c2.frag_id());
    assert_eq!(c1.key().dst_port(), Some(80));
    assert_eq!(c2.key().ports, None);
}

#[test]
fn test_fragment_ids_differ_across_sources() {
    let payload = udp(1, 2, &[0; 24]);
    let (a, _) = ipv4_fragments(CLIENT4, VIP4, IPPROTO_UDP, 7, &payload, 16);
    let (b, _) = ipv4_fragments(CLIENT4_ALT, VIP4, IPPROTO_UDP, 7, &payload, 16);

    let ia = extractor().classify(ETH_P_IP, &a).unwrap().frag_id();
    let ib = extractor().classify(ETH_P_IP, &b).unwrap().frag_id();
    assert!(ia.is_some());
    assert_ne!(ia, ib);
    assert_eq!(ia.map(|id| id & 0xffff_ffff), Some(7));
}

#[test]
fn test_v6_fragment_pair_classification() {
    let payload = udp(5000, 6000, &[0x11; 40]);
    let (first, second) = ipv6_fragments(CLIENT6, VIP6, IPPROTO_UDP, 0xdead_beef, &payload, 16);

    let c1 = extractor().classify(ETH_P_IPV6, &first).unwrap();
    let c2 = extractor().classify(ETH_P_IPV6, &second).unwrap();

    assert_eq!(c1.code(), ClassCode::FIRST_FRAGMENT);
    assert_eq!(c2.code(), ClassCode::SUBSEQUENT_FRAGMENT);
    assert_eq!(c1.frag_id(), c2.frag_id());
    assert_eq!(c1.frag_id().map(|id| id & 0xffff_ffff), Some(0xdead_beef));
    assert_eq!(c2.key().proto, IPPROTO_UDP);
}

#[test]
fn test_encapsulated_first_fragment_code() {
    let payload = udp(50000, ENCAP_PORT, &sctp(2905, 2905));
    let (first, _) = ipv4_fragments(CLIENT4, VIP4, IPPROTO_UDP, 9, &payload, 24);

    let c = extractor().classify(ETH_P_IP, &first).unwrap();
    assert_eq!(c.code(), ClassCode::FIRST_FRAGMENT | ClassCode::UDP_ENCAP_SCTP);
    assert_eq!(c.key().proto, IPPROTO_SCTP);
    assert_eq!(c.key().dst_port(), Some(2905));
}
