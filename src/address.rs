//! Listen and announce addresses
//!
//! Transports report the addresses they are bound to as multiaddrs, e.g.
//! `/ip4/0.0.0.0/tcp/4001` or `/ip6/::/udp/4001/quic`. Only "thin-waist"
//! addresses (a bare IP followed by a TCP or UDP port) can be port-mapped.

use crate::connectivity::types::IpProtocol;
use std::net::IpAddr;

pub use multiaddr::{Error as AddressError, Multiaddr, Protocol};

/// Host/port/protocol decomposition of a thin-waist address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThinWaist {
    /// Bound host address
    pub host: IpAddr,
    /// Bound port
    pub port: u16,
    /// Transport protocol
    pub protocol: IpProtocol,
}

impl ThinWaist {
    /// Two-component multiaddr for this triple
    pub fn to_multiaddr(&self) -> Multiaddr {
        let port = match self.protocol {
            IpProtocol::TCP => Protocol::Tcp(self.port),
            IpProtocol::UDP => Protocol::Udp(self.port),
        };
        Multiaddr::empty().with(Protocol::from(self.host)).with(port)
    }
}

/// Port-mapping helpers on [`Multiaddr`]
pub trait MultiaddrExt {
    /// Decompose a thin-waist address into host, port and protocol
    fn to_options(&self) -> Option<ThinWaist>;

    /// Whether this address is exactly `(ip4|ip6, tcp|udp)`
    fn is_thin_waist(&self) -> bool {
        self.to_options().is_some()
    }

    /// Replace the host and the transport port
    ///
    /// Used to derive the external address of a mapping from the internal
    /// address it was created for. Any trailing components are kept.
    fn with_endpoint(&self, ip: IpAddr, port: u16) -> Multiaddr;
}

impl MultiaddrExt for Multiaddr {
    fn to_options(&self) -> Option<ThinWaist> {
        let mut components = self.iter();

        let host = match components.next()? {
            Protocol::Ip4(v4) => IpAddr::V4(v4),
            Protocol::Ip6(v6) => IpAddr::V6(v6),
            _ => return None,
        };
        let (port, protocol) = match components.next()? {
            Protocol::Tcp(port) => (port, IpProtocol::TCP),
            Protocol::Udp(port) => (port, IpProtocol::UDP),
            _ => return None,
        };
        if components.next().is_some() {
            return None;
        }

        Some(ThinWaist {
            host,
            port,
            protocol,
        })
    }

    fn with_endpoint(&self, ip: IpAddr, port: u16) -> Multiaddr {
        self.iter()
            .map(|component| match component {
                Protocol::Ip4(_) | Protocol::Ip6(_) => Protocol::from(ip),
                Protocol::Tcp(_) => Protocol::Tcp(port),
                Protocol::Udp(_) => Protocol::Udp(port),
                other => other,
            })
            .collect()
    }
}
