//! NAT client capability
//!
//! The manager only needs three operations from a gateway: look up the
//! external address, create a mapping and remove it. NAT-PMP and UPnP-IGD
//! both provide them, and tests substitute a stub.

use super::natpmp::NatPmpClient;
use super::types::{MapRequest, MappingError, MappingProtocol};
use super::upnp::UpnpClient;
use crate::config::NatConfig;
use async_trait::async_trait;
use rand::Rng;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::info;

/// Lowest port suggested to the gateway for a new mapping
pub const MIN_HIGH_PORT: u16 = 1024;

/// Gateway port-mapping operations
#[async_trait]
pub trait NatClient: Send + Sync {
    /// Which gateway protocol this client speaks
    fn protocol(&self) -> MappingProtocol;

    /// External IP address reported by the gateway
    async fn external_ip(&self) -> Result<IpAddr, MappingError>;

    /// Create or refresh a mapping, returning the external port granted
    async fn map(&self, request: &MapRequest) -> Result<u16, MappingError>;

    /// Remove a mapping previously created with [`NatClient::map`]
    async fn unmap(&self, request: &MapRequest) -> Result<(), MappingError>;
}

/// Build the NAT client selected by the configuration
///
/// NAT-PMP when `pmp_enabled` is set, otherwise UPnP-IGD.
pub fn client_for(config: &NatConfig) -> Arc<dyn NatClient> {
    let timeout = config.request_timeout();
    if config.pmp_enabled {
        info!("Using NAT-PMP client (gateway: {:?})", config.gateway);
        Arc::new(NatPmpClient::new(config.gateway, timeout))
    } else {
        info!("Using UPnP-IGD client");
        Arc::new(UpnpClient::new(timeout))
    }
}

/// Pick a random port in the unprivileged range to suggest to the gateway
pub fn random_high_port() -> u16 {
    rand::thread_rng().gen_range(MIN_HIGH_PORT..=u16::MAX)
}
