use super::ma;
use crate::connectivity::manager::mapping_candidates;
use crate::connectivity::types::{IpProtocol, MappingKey, NatError};
use crate::connectivity::{is_private_ip, MappingProtocol};
use std::net::IpAddr;

fn v4() -> IpAddr {
    "82.3.1.5".parse().unwrap()
}

// ========================================================================
// Candidate selection
// ========================================================================

#[test]
fn test_candidates_skip_loopback_and_keep_wildcard() {
    let addrs = vec![ma("/ip4/127.0.0.1/tcp/40001"), ma("/ip4/0.0.0.0/tcp/40002")];
    let candidates = mapping_candidates(&addrs, v4());

    assert_eq!(candidates.len(), 1);
    assert_eq!(
        candidates[0].key,
        MappingKey {
            private_port: 40002,
            protocol: IpProtocol::TCP
        }
    );
    assert_eq!(candidates[0].addr, ma("/ip4/0.0.0.0/tcp/40002"));
}

#[test]
fn test_candidates_collapse_shared_port() {
    let addrs = vec![
        ma("/ip4/0.0.0.0/tcp/4001"),
        ma("/ip4/192.168.1.20/tcp/4001"),
        ma("/ip4/192.168.1.20/udp/4001"),
    ];
    let candidates = mapping_candidates(&addrs, v4());

    assert_eq!(candidates.len(), 2, "TCP and UDP on one port are distinct mappings");
    assert_eq!(candidates[0].addr, ma("/ip4/0.0.0.0/tcp/4001"));
    assert_eq!(candidates[1].key.protocol, IpProtocol::UDP);
}

#[test]
fn test_candidates_match_gateway_address_family() {
    let addrs = vec![ma("/ip6/::/tcp/4001"), ma("/ip4/0.0.0.0/tcp/4002")];

    let for_v4 = mapping_candidates(&addrs, v4());
    assert_eq!(for_v4.len(), 1);
    assert_eq!(for_v4[0].key.private_port, 4002);

    let for_v6 = mapping_candidates(&addrs, "2a01:4f8::1".parse().unwrap());
    assert_eq!(for_v6.len(), 1);
    assert_eq!(for_v6[0].key.private_port, 4001);
}

#[test]
fn test_candidates_skip_nested_and_unbound() {
    let addrs = vec![
        ma("/ip4/0.0.0.0/udp/4001/quic"),
        ma("/ip4/0.0.0.0/tcp/4002/ws"),
        ma("/dns4/example.com/tcp/4003"),
        ma("/ip4/0.0.0.0/tcp/0"),
        ma("/ip4/169.254.3.3/tcp/4004"),
    ];
    assert!(mapping_candidates(&addrs, v4()).is_empty());
}

// ========================================================================
// Double NAT classification
// ========================================================================

#[test]
fn test_gateway_addresses_classified_for_double_nat() {
    assert!(!is_private_ip(v4()));
    assert!(is_private_ip("192.168.1.1".parse().unwrap()));
    assert!(is_private_ip("10.20.0.1".parse().unwrap()));
    assert!(is_private_ip("100.72.0.9".parse().unwrap()));
}

#[test]
fn test_double_nat_error_message() {
    let err = NatError::DoubleNat {
        ip: "192.168.1.1".parse().unwrap(),
    };
    let msg = err.to_string();
    assert!(msg.contains("192.168.1.1"));
    assert!(msg.contains("double NAT"));
    assert!(!msg.contains("carrier-grade"));
}

#[test]
fn test_double_nat_error_names_cgnat_once() {
    let err = NatError::DoubleNat {
        ip: "100.72.8.1".parse().unwrap(),
    };
    let msg = err.to_string();
    assert!(msg.contains("double NAT"));
    assert_eq!(msg.matches("carrier-grade NAT").count(), 1);
}

#[test]
fn test_mapping_protocols_serialize_uniquely() {
    let natpmp = serde_json::to_string(&MappingProtocol::NATPMP).unwrap();
    let upnp = serde_json::to_string(&MappingProtocol::UPnP).unwrap();
    assert_ne!(natpmp, upnp);
}
