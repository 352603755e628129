//! Connectivity module for NAT traversal and port mapping
//!
//! This module makes a node behind a NAT dialable by creating port mappings
//! on the local gateway and announcing the resulting external addresses:
//! - NAT-PMP (NAT Port Mapping Protocol) - RFC 6886
//! - UPnP IGD (Universal Plug and Play Internet Gateway Device)
//!
//! [`NatManager`] drives a [`NatClient`] through discovery, mapping, renewal
//! and teardown.

// Submodules
pub mod classify;
pub mod client;
pub mod gateway;
pub mod manager;
pub mod natpmp;
pub mod types;
pub mod upnp;

// Re-export commonly used types
pub use types::{
    IpProtocol, MapRequest, MappingError, MappingKey, MappingProtocol, MappingSnapshot, NatError,
    Phase,
};

// Re-export main functions
pub use classify::{detect_cgnat, is_local_only, is_private_ip};
pub use client::{NatClient, client_for};
pub use gateway::find_default_gateway;

// Re-export clients and the manager
pub use manager::NatManager;
pub use natpmp::NatPmpClient;
pub use upnp::UpnpClient;
