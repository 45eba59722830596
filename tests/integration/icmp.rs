//! ICMP errors follow the flow they report on
//!
//! A router on the path sends the error to the virtual address, quoting a
//! packet the backend sent to the client. The balancer must pick the same
//! backend as for the client's own packets so the error reaches the host
//! holding the connection (e.g. for path MTU discovery).

use std::sync::Arc;

use nfqlb::dispatch::{LoadBalancer, PacketHandler};
use nfqlb::lb::{Backend, FragmentConfig, FwmarkConfig, RuntimeSnapshot, SharedRuntimeState};
use nfqlb::packet::proto::{
    ETH_P_IP, ETH_P_IPV6, IPPROTO_ICMP, IPPROTO_ICMPV6, IPPROTO_SCTP, IPPROTO_TCP, IPPROTO_UDP,
};
use nfqlb::packet::{ClassCode, FlowKeyExtractor};
use nfqlb::BackendTable;

use super::packets::*;

const ENCAP_PORT: u16 = 9899;

fn balancer() -> LoadBalancer {
    let backends: Vec<Backend> = (1..=16).map(Backend::new).collect();
    let state = Arc::new(SharedRuntimeState::new(
        "icmp-test",
        RuntimeSnapshot::new(
            Some(BackendTable::build(&backends, 1009).unwrap()),
            FwmarkConfig::default(),
        ),
    ));
    LoadBalancer::new(state, FragmentConfig::default()).with_udp_encap_port(ENCAP_PORT)
}

#[test]
fn test_frag_needed_follows_tcp_flow() {
    let lb = balancer();
    for sport in 40000..40064u16 {
        let forward = ipv4(CLIENT4, VIP4, IPPROTO_TCP, &tcp(sport, 443, &[]));
        let reply = ipv4(VIP4, CLIENT4, IPPROTO_TCP, &tcp(443, sport, &[0; 1400]));
        let error = icmp4_error(VIP4, 3, 4, &reply);

        let sel = lb.select(ETH_P_IP, &error).unwrap();
        assert_eq!(sel.classification.code(), ClassCode::ICMP_WITH_INNER);
        assert_eq!(
            lb.handle_packet(ETH_P_IP, &error),
            lb.handle_packet(ETH_P_IP, &forward),
            "sport {sport}"
        );
    }
}

#[test]
fn test_packet_too_big_follows_v6_udp_flow() {
    let lb = balancer();
    let forward = ipv6(CLIENT6, VIP6, IPPROTO_UDP, &udp(5000, 4500, b"ike"));
    let reply = ipv6(VIP6, CLIENT6, IPPROTO_UDP, &udp(4500, 5000, &[0; 64]));
    let error = icmp6_error(VIP6, 2, &reply);

    let sel = lb.select(ETH_P_IPV6, &error).unwrap();
    assert_eq!(sel.classification.code(), ClassCode::ICMP_WITH_INNER);
    assert_eq!(sel.key, lb.select(ETH_P_IPV6, &forward).unwrap().key);
}

#[test]
fn test_error_about_encapsulated_sctp_follows_association() {
    let lb = balancer();
    let forward = ipv4(CLIENT4, VIP4, IPPROTO_UDP, &udp(50000, ENCAP_PORT, &sctp(2905, 3905)));
    let reply = ipv4(VIP4, CLIENT4, IPPROTO_UDP, &udp(ENCAP_PORT, 50000, &sctp(3905, 2905)));
    // quote more than the RFC 792 minimum so the SCTP ports are included
    let error = ipv4(ROUTER4, VIP4, IPPROTO_ICMP, &icmp(11, 0, [0; 4], &reply));

    let sel = lb.select(ETH_P_IP, &error).unwrap();
    assert_eq!(sel.key.proto, IPPROTO_SCTP);
    assert_eq!((sel.key.src_port(), sel.key.dst_port()), (Some(2905), Some(3905)));
    assert_eq!(sel.mark, lb.select(ETH_P_IP, &forward).unwrap().mark);
}

#[test]
fn test_minimal_quote_of_encapsulated_sctp_keeps_udp_key() {
    let lb = balancer();
    let reply = ipv4(VIP4, CLIENT4, IPPROTO_UDP, &udp(ENCAP_PORT, 50000, &sctp(3905, 2905)));
    let error = icmp4_error(VIP4, 3, 4, &reply);

    let sel = lb.select(ETH_P_IP, &error).unwrap();
    assert_eq!(sel.classification.code(), ClassCode::ICMP_WITH_INNER);
    assert_eq!(sel.key.proto, IPPROTO_UDP);
    assert_eq!((sel.key.src_port(), sel.key.dst_port()), (Some(50000), Some(ENCAP_PORT)));
}

#[test]
fn test_truncated_quote_degrades_to_outer_addresses() {
    let reply = ipv4(VIP4, CLIENT4, IPPROTO_TCP, &tcp(443, 40000, &[]));
    let error = ipv4(
        ROUTER4,
        VIP4,
        IPPROTO_ICMP,
        &icmp(3, 4, [0; 4], &reply[..22]),
    );

    let c = FlowKeyExtractor::new().classify(ETH_P_IP, &error).unwrap();
    assert_eq!(c.code(), ClassCode::ICMP_NO_INNER);
    assert_eq!(c.key().src, std::net::IpAddr::V4(ROUTER4));
    assert_eq!(c.key().ports, None);
}

#[test]
fn test_echo_identifier_keeps_ping_sessions_together() {
    let lb = balancer();
    let request = ipv4(CLIENT4, VIP4, IPPROTO_ICMP, &icmp(8, 0, [0x12, 0x34, 0, 1], b"ping"));
    let next = ipv4(CLIENT4, VIP4, IPPROTO_ICMP, &icmp(8, 0, [0x12, 0x34, 0, 2], b"ping"));

    let sel = lb.select(ETH_P_IP, &request).unwrap();
    assert_eq!(sel.classification.code(), ClassCode::ICMP_NO_INNER);
    assert_eq!(sel.key.src_port(), Some(0x1234));
    assert_eq!(sel.key.dst_port(), Some(0x1234));
    assert_eq!(sel.mark, lb.select(ETH_P_IP, &next).unwrap().mark);
}

#[test]
fn test_v6_echo_carries_identifier() {
    let request = ipv6(CLIENT6, VIP6, IPPROTO_ICMPV6, &icmp(128, 0, [0, 42, 0, 1], b"ping"));
    let c = FlowKeyExtractor::new().classify(ETH_P_IPV6, &request).unwrap();

    assert_eq!(c.code(), ClassCode::ICMP_NO_INNER);
    assert_eq!(c.key().src_port(), Some(42));
}
