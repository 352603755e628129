//! NAT-PMP (NAT Port Mapping Protocol) client - RFC 6886
//!
//! NAT-PMP uses UDP on port 5351 to communicate with the default gateway. It
//! supports external address requests and UDP/TCP port mappings. A mapping
//! is removed by requesting it again with a lifetime of zero.

use super::client::NatClient;
use super::gateway::find_default_gateway;
use super::types::{IpProtocol, MapRequest, MappingError, MappingProtocol};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info};

/// NAT-PMP server port (IANA assigned)
const NATPMP_SERVER_PORT: u16 = 5351;

/// NAT-PMP protocol version
pub(crate) const NATPMP_VERSION: u8 = 0;

/// NAT-PMP opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum NatPmpOpcode {
    /// External address request
    ExternalAddress = 0,
    /// UDP port mapping
    MapUdp = 1,
    /// TCP port mapping
    MapTcp = 2,
}

impl NatPmpOpcode {
    fn for_protocol(protocol: IpProtocol) -> Self {
        match protocol {
            IpProtocol::UDP => Self::MapUdp,
            IpProtocol::TCP => Self::MapTcp,
        }
    }
}

/// NAT-PMP result codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub(crate) enum NatPmpResultCode {
    Success = 0,
    UnsupportedVersion = 1,
    NotAuthorized = 2,
    NetworkFailure = 3,
    OutOfResources = 4,
    UnsupportedOpcode = 5,
}

impl NatPmpResultCode {
    pub(crate) fn from_u16(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            1 => Some(Self::UnsupportedVersion),
            2 => Some(Self::NotAuthorized),
            3 => Some(Self::NetworkFailure),
            4 => Some(Self::OutOfResources),
            5 => Some(Self::UnsupportedOpcode),
            _ => None,
        }
    }

    pub(crate) fn to_error_message(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::UnsupportedVersion => "Unsupported NAT-PMP version",
            Self::NotAuthorized => "Not authorized/refused",
            Self::NetworkFailure => "Network failure",
            Self::OutOfResources => "Out of resources",
            Self::UnsupportedOpcode => "Unsupported opcode",
        }
    }
}

/// Decoded MAP response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NatPmpMapResponse {
    pub(crate) internal_port: u16,
    pub(crate) external_port: u16,
    pub(crate) lifetime_secs: u32,
}

/// NAT client speaking NAT-PMP to the default (or configured) gateway
#[derive(Debug, Clone)]
pub struct NatPmpClient {
    gateway: Option<IpAddr>,
    server_port: u16,
    timeout: Duration,
}

impl NatPmpClient {
    /// Create a client; `gateway` of `None` uses the default route
    pub fn new(gateway: Option<IpAddr>, timeout: Duration) -> Self {
        Self {
            gateway,
            server_port: NATPMP_SERVER_PORT,
            timeout,
        }
    }

    /// Talk to a NAT-PMP server on a non-standard port
    #[cfg(test)]
    pub(crate) fn with_server_port(mut self, port: u16) -> Self {
        self.server_port = port;
        self
    }

    fn gateway(&self) -> Result<IpAddr, MappingError> {
        match self.gateway {
            Some(gateway) => Ok(gateway),
            None => find_default_gateway(),
        }
    }

    /// Send one request and wait for its response
    async fn exchange(&self, request: &[u8], response: &mut [u8]) -> Result<usize, MappingError> {
        let gateway = self.gateway()?;
        let server_addr = SocketAddr::new(gateway, self.server_port);

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(server_addr).await?;
        socket.send(request).await?;
        debug!("Sent {}-byte NAT-PMP request to {}", request.len(), server_addr);

        let received = tokio::time::timeout(self.timeout, socket.recv(response))
            .await
            .map_err(|_| MappingError::Timeout)??;

        debug!("Received {} bytes from NAT-PMP server", received);
        Ok(received)
    }

    async fn request_mapping(
        &self,
        private_port: u16,
        public_port: u16,
        lifetime_secs: u32,
        protocol: IpProtocol,
    ) -> Result<NatPmpMapResponse, MappingError> {
        let request = build_natpmp_map_request(private_port, public_port, lifetime_secs, protocol);
        let mut buf = [0u8; 16];
        let received = self.exchange(&request, &mut buf).await?;
        parse_natpmp_map_response(&buf[..received], protocol)
    }
}

#[async_trait]
impl NatClient for NatPmpClient {
    fn protocol(&self) -> MappingProtocol {
        MappingProtocol::NATPMP
    }

    async fn external_ip(&self) -> Result<IpAddr, MappingError> {
        let request = [NATPMP_VERSION, NatPmpOpcode::ExternalAddress as u8];
        let mut buf = [0u8; 12];
        let received = self.exchange(&request, &mut buf).await?;
        let ip = parse_natpmp_external_address_response(&buf[..received])?;
        info!("NAT-PMP gateway reports external IP {}", ip);
        Ok(ip)
    }

    async fn map(&self, request: &MapRequest) -> Result<u16, MappingError> {
        info!(
            "Requesting NAT-PMP mapping for {} port {} (suggested external {}, lifetime: {}s)",
            request.protocol,
            request.private_port,
            request.public_port,
            request.lease.as_secs()
        );

        let lifetime_secs = u32::try_from(request.lease.as_secs()).unwrap_or(u32::MAX);
        let response = self
            .request_mapping(request.private_port, request.public_port, lifetime_secs, request.protocol)
            .await?;

        if response.internal_port != request.private_port {
            return Err(MappingError::InvalidResponse(format!(
                "Response is for internal port {} (requested {})",
                response.internal_port, request.private_port
            )));
        }

        info!(
            "NAT-PMP mapping granted: {} -> external {} (lifetime: {}s)",
            request.private_port, response.external_port, response.lifetime_secs
        );
        Ok(response.external_port)
    }

    async fn unmap(&self, request: &MapRequest) -> Result<(), MappingError> {
        debug!(
            "Deleting NAT-PMP mapping for {} port {}",
            request.protocol, request.private_port
        );
        self.request_mapping(request.private_port, 0, 0, request.protocol)
            .await?;
        Ok(())
    }
}

/// Build a NAT-PMP MAP request packet
pub(crate) fn build_natpmp_map_request(
    internal_port: u16,
    suggested_external_port: u16,
    lifetime_secs: u32,
    protocol: IpProtocol,
) -> Vec<u8> {
    let mut request = Vec::with_capacity(12);

    request.push(NATPMP_VERSION);
    request.push(NatPmpOpcode::for_protocol(protocol) as u8);
    // Reserved (2 bytes, must be zero)
    request.extend_from_slice(&[0u8; 2]);
    request.extend_from_slice(&internal_port.to_be_bytes());
    request.extend_from_slice(&suggested_external_port.to_be_bytes());
    request.extend_from_slice(&lifetime_secs.to_be_bytes());

    request
}

/// Check version, opcode and result code shared by every response
fn check_response_header(response: &[u8], expected_opcode: NatPmpOpcode) -> Result<(), MappingError> {
    let version = response[0];
    if version != NATPMP_VERSION {
        return Err(MappingError::InvalidResponse(format!(
            "Invalid version: {} (expected {})",
            version, NATPMP_VERSION
        )));
    }

    let opcode = response[1];
    if opcode != 128 + expected_opcode as u8 {
        return Err(MappingError::InvalidResponse(format!(
            "Invalid opcode: {} (expected {})",
            opcode,
            128 + expected_opcode as u8
        )));
    }

    let result_code = u16::from_be_bytes([response[2], response[3]]);
    let result = NatPmpResultCode::from_u16(result_code).ok_or_else(|| {
        MappingError::InvalidResponse(format!("Unknown result code: {}", result_code))
    })?;

    if result != NatPmpResultCode::Success {
        return Err(MappingError::GatewayError(result.to_error_message().to_string()));
    }

    Ok(())
}

/// Parse a NAT-PMP MAP response packet
pub(crate) fn parse_natpmp_map_response(
    response: &[u8],
    protocol: IpProtocol,
) -> Result<NatPmpMapResponse, MappingError> {
    if response.len() < 16 {
        return Err(MappingError::InvalidResponse(format!(
            "Response too short: {} bytes (expected 16)",
            response.len()
        )));
    }

    check_response_header(response, NatPmpOpcode::for_protocol(protocol))?;

    // Bytes 4-7 carry seconds since the gateway's epoch and are not used
    Ok(NatPmpMapResponse {
        internal_port: u16::from_be_bytes([response[8], response[9]]),
        external_port: u16::from_be_bytes([response[10], response[11]]),
        lifetime_secs: u32::from_be_bytes([response[12], response[13], response[14], response[15]]),
    })
}

/// Parse a NAT-PMP external address response packet
pub(crate) fn parse_natpmp_external_address_response(response: &[u8]) -> Result<IpAddr, MappingError> {
    if response.len() < 12 {
        return Err(MappingError::InvalidResponse(format!(
            "External IP response too short: {} bytes",
            response.len()
        )));
    }

    check_response_header(response, NatPmpOpcode::ExternalAddress)?;

    Ok(IpAddr::V4(Ipv4Addr::new(
        response[8],
        response[9],
        response[10],
        response[11],
    )))
}
