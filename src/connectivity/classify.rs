//! IP address classification
//!
//! Decides whether an address is globally routable. A gateway that reports a
//! non-routable external address sits behind another NAT (double NAT, or
//! carrier-grade NAT), so any mapping it creates is unreachable from the
//! internet.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::debug;

/// CGNAT (RFC 6598) IP range: 100.64.0.0/10
const CGNAT_RANGE_START: u32 = 0x64400000; // 100.64.0.0
const CGNAT_RANGE_END: u32 = 0x647FFFFF; // 100.127.255.255

/// Detect if an external IP address is within CGNAT range
///
/// # Example
///
/// ```
/// use std::net::IpAddr;
/// use natward::connectivity::detect_cgnat;
///
/// let cgnat_ip: IpAddr = "100.64.0.1".parse().unwrap();
/// assert!(detect_cgnat(cgnat_ip));
///
/// let public_ip: IpAddr = "82.3.1.5".parse().unwrap();
/// assert!(!detect_cgnat(public_ip));
/// ```
pub fn detect_cgnat(external_ip: IpAddr) -> bool {
    match external_ip {
        IpAddr::V4(ipv4) => (CGNAT_RANGE_START..=CGNAT_RANGE_END).contains(&u32::from(ipv4)),
        IpAddr::V6(_) => false,
    }
}

/// Check if an IP is private, reserved or otherwise not globally routable
///
/// Covers RFC 1918, loopback, link-local, unspecified, CGNAT shared space,
/// benchmarking, documentation, multicast and reserved ranges for IPv4, and
/// loopback, unspecified, ULA, link-local, documentation and multicast for
/// IPv6.
pub fn is_private_ip(ip: IpAddr) -> bool {
    let private = match ip {
        IpAddr::V4(ipv4) => is_ipv4_private(ipv4),
        IpAddr::V6(ipv6) => match ipv6.to_ipv4_mapped() {
            Some(mapped) => is_ipv4_private(mapped),
            None => is_ipv6_private(ipv6),
        },
    };
    debug!("Address {} classified as {}", ip, if private { "private" } else { "public" });
    private
}

fn is_ipv4_private(ipv4: Ipv4Addr) -> bool {
    let [a, b, c, _] = ipv4.octets();
    ipv4.is_private()
        || ipv4.is_loopback()
        || ipv4.is_link_local()
        || ipv4.is_unspecified()
        || ipv4.is_broadcast()
        || ipv4.is_documentation()
        || ipv4.is_multicast()
        || a == 0
        || a >= 240
        || detect_cgnat(IpAddr::V4(ipv4))
        // IETF protocol assignments 192.0.0.0/24
        || (a == 192 && b == 0 && c == 0)
        // 6to4 relay anycast 192.88.99.0/24
        || (a == 192 && b == 88 && c == 99)
        // Benchmarking 198.18.0.0/15
        || (a == 198 && (b & 0xfe) == 18)
}

fn is_ipv6_private(ipv6: Ipv6Addr) -> bool {
    let segments = ipv6.segments();
    ipv6.is_loopback()
        || ipv6.is_unspecified()
        || ipv6.is_multicast()
        // ULA: fc00::/7
        || (segments[0] & 0xfe00) == 0xfc00
        // Link-local: fe80::/10
        || (segments[0] & 0xffc0) == 0xfe80
        // Documentation: 2001:db8::/32
        || (segments[0] == 0x2001 && segments[1] == 0x0db8)
}

/// Check if an address is loopback or link-local
///
/// Listen addresses on such hosts are never port-mapped.
pub fn is_local_only(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => ipv4.is_loopback() || ipv4.is_link_local(),
        IpAddr::V6(ipv6) => match ipv6.to_ipv4_mapped() {
            Some(mapped) => mapped.is_loopback() || mapped.is_link_local(),
            None => ipv6.is_loopback() || (ipv6.segments()[0] & 0xffc0) == 0xfe80,
        },
    }
}
