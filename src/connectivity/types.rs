//! Common types for the connectivity module

use super::classify::detect_cgnat;
use crate::address::Multiaddr;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

/// IP protocol numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum IpProtocol {
    /// TCP protocol
    TCP = 6,
    /// UDP protocol
    UDP = 17,
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TCP => write!(f, "TCP"),
            Self::UDP => write!(f, "UDP"),
        }
    }
}

/// Gateway protocols a NAT client can speak
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MappingProtocol {
    /// NAT Port Mapping Protocol (RFC 6886)
    NATPMP,
    /// Universal Plug and Play Internet Gateway Device
    UPnP,
}

/// Errors a NAT client can return for a single request
#[derive(Debug, Error)]
pub enum MappingError {
    /// Network timeout waiting for response
    #[error("Mapping request timed out")]
    Timeout,

    /// Invalid response from gateway
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Gateway returned an error
    #[error("Gateway error: {0}")]
    GatewayError(String),

    /// No gateway found on network
    #[error("No gateway found")]
    NoGateway,

    /// IO error during communication
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol not supported by gateway or platform
    #[error("Protocol not supported")]
    NotSupported,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures that abort a whole mapping pass
///
/// Per-address mapping, renewal and unmap failures never surface here; they
/// are logged and handled inside the manager.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NatError {
    /// External IP lookup failed; triggering again retries
    #[error("External IP discovery failed: {0}")]
    Discovery(String),

    /// The gateway's external IP is itself private
    #[error(
        "External IP {} is private - double NAT detected{}, no port mappings will be created. \
         Configure an externally routable external IP or remove the upstream NAT",
        .ip,
        cgnat_note(.ip)
    )]
    DoubleNat {
        /// The non-routable address the gateway reported
        ip: IpAddr,
    },

    /// The manager was stopped before the pass completed
    #[error("NAT manager stopped before the mapping pass completed")]
    Cancelled,

    /// Configuration rejected at construction
    #[error("Invalid NAT configuration: {0}")]
    InvalidConfig(String),
}

fn cgnat_note(ip: &IpAddr) -> &'static str {
    if detect_cgnat(*ip) {
        " (carrier-grade NAT, 100.64.0.0/10)"
    } else {
        ""
    }
}

/// A single map/unmap request sent to a NAT client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapRequest {
    /// Port the transport is bound to locally
    pub private_port: u16,
    /// External port to ask the gateway for (it may grant another one)
    pub public_port: u16,
    /// Transport protocol
    pub protocol: IpProtocol,
    /// Requested lease
    pub lease: Duration,
    /// Human readable mapping description shown by the gateway
    pub description: String,
}

/// Identity of a mapping on the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MappingKey {
    /// Internal port
    pub private_port: u16,
    /// Transport protocol
    pub protocol: IpProtocol,
}

impl fmt::Display for MappingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.protocol, self.private_port)
    }
}

/// Lifecycle phase of the NAT manager
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Not started, or stopped
    #[default]
    Idle,
    /// Looking up the gateway's external IP
    Discovering,
    /// The external IP was private; no mappings until stopped
    DoubleNatRejected,
    /// Creating mappings for candidate addresses
    Mapping,
    /// Mappings established and being renewed
    Running,
    /// Tearing mappings down
    Stopping,
}

/// Point-in-time view of an active mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingSnapshot {
    /// Internal port and protocol
    pub key: MappingKey,
    /// Port granted by the gateway
    pub external_port: u16,
    /// Internal address the mapping was created for
    pub internal_addr: Multiaddr,
    /// Address published for peers
    pub external_addr: Multiaddr,
    /// Whether `external_addr` is currently in the announce set
    pub announced: bool,
    /// Timestamp when the mapping was created (Unix milliseconds)
    pub created_at_ms: i64,
    /// Timestamp of the last successful grant (Unix milliseconds)
    pub renewed_at_ms: i64,
}
