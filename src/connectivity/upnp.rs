//! UPnP IGD (Internet Gateway Device) client
//!
//! Discovers the gateway with SSDP and drives it over SOAP through
//! `igd-next`. The library calls block, so each operation runs on the
//! blocking thread pool.

use super::client::NatClient;
use super::types::{IpProtocol, MapRequest, MappingError, MappingProtocol};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;
use tracing::{debug, info, warn};

/// NAT client speaking UPnP-IGD
#[derive(Debug, Clone)]
pub struct UpnpClient {
    timeout: Duration,
}

impl UpnpClient {
    /// Create a client that waits up to `timeout` for gateway discovery
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn with_gateway<T, F>(&self, op: F) -> Result<T, MappingError>
    where
        T: Send + 'static,
        F: FnOnce(&igd_next::Gateway) -> Result<T, MappingError> + Send + 'static,
    {
        let timeout = self.timeout;
        tokio::task::spawn_blocking(move || {
            debug!("Searching for UPnP IGD gateway...");
            let gateway = igd_next::search_gateway(igd_next::SearchOptions {
                timeout: Some(timeout),
                ..Default::default()
            })
            .map_err(|e| {
                debug!("UPnP gateway search failed: {}", e);
                MappingError::NoGateway
            })?;
            debug!("Found UPnP gateway at {}", gateway.addr);
            op(&gateway)
        })
        .await
        .map_err(|e| MappingError::Internal(format!("Task join error: {}", e)))?
    }
}

fn upnp_protocol(protocol: IpProtocol) -> igd_next::PortMappingProtocol {
    match protocol {
        IpProtocol::TCP => igd_next::PortMappingProtocol::TCP,
        IpProtocol::UDP => igd_next::PortMappingProtocol::UDP,
    }
}

/// Local address of the interface that routes toward `gateway`
fn local_ip_toward(gateway: SocketAddr) -> Result<Ipv4Addr, MappingError> {
    // connect() on UDP only selects a route, nothing is sent
    let socket = UdpSocket::bind("0.0.0.0:0")
        .map_err(|e| MappingError::Internal(format!("Failed to create socket: {}", e)))?;
    socket
        .connect(gateway)
        .map_err(|e| MappingError::Internal(format!("Failed to connect: {}", e)))?;
    let local_addr = socket
        .local_addr()
        .map_err(|e| MappingError::Internal(format!("Failed to get local address: {}", e)))?;

    match local_addr.ip() {
        IpAddr::V4(ipv4) => Ok(ipv4),
        IpAddr::V6(_) => Err(MappingError::Internal(
            "UPnP requires IPv4 address".to_string(),
        )),
    }
}

#[async_trait]
impl NatClient for UpnpClient {
    fn protocol(&self) -> MappingProtocol {
        MappingProtocol::UPnP
    }

    async fn external_ip(&self) -> Result<IpAddr, MappingError> {
        let ip = self
            .with_gateway(|gateway| {
                gateway
                    .get_external_ip()
                    .map_err(|e| MappingError::GatewayError(format!("GetExternalIPAddress failed: {}", e)))
            })
            .await?;
        info!("UPnP gateway reports external IP {}", ip);
        Ok(ip)
    }

    async fn map(&self, request: &MapRequest) -> Result<u16, MappingError> {
        info!(
            "Requesting UPnP mapping for {} port {} -> external {} (lease: {}s)",
            request.protocol,
            request.private_port,
            request.public_port,
            request.lease.as_secs()
        );

        let request = request.clone();
        self.with_gateway(move |gateway| {
            let local_ip = local_ip_toward(gateway.addr)?;
            let local_addr = SocketAddr::new(IpAddr::V4(local_ip), request.private_port);
            let lease_secs = u32::try_from(request.lease.as_secs()).unwrap_or(u32::MAX);

            gateway
                .add_port(
                    upnp_protocol(request.protocol),
                    request.public_port,
                    local_addr,
                    lease_secs,
                    &request.description,
                )
                .map_err(|e| {
                    warn!("UPnP AddPortMapping failed: {}", e);
                    MappingError::GatewayError(format!("AddPortMapping failed: {}", e))
                })?;

            info!(
                "UPnP mapping established: {} -> external {}",
                local_addr, request.public_port
            );
            Ok(request.public_port)
        })
        .await
    }

    async fn unmap(&self, request: &MapRequest) -> Result<(), MappingError> {
        debug!(
            "Deleting UPnP mapping for {} external port {}",
            request.protocol, request.public_port
        );

        let protocol = upnp_protocol(request.protocol);
        let public_port = request.public_port;
        self.with_gateway(move |gateway| {
            gateway
                .remove_port(protocol, public_port)
                .map_err(|e| MappingError::GatewayError(format!("DeletePortMapping failed: {}", e)))
        })
        .await
    }
}
