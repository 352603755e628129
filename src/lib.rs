//! natward - NAT traversal for peer-to-peer nodes
//!
//! Creates port mappings on the local gateway (NAT-PMP or UPnP-IGD) for the
//! addresses a node listens on, and announces the externally reachable
//! addresses so peers can dial in.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod config;
pub mod connectivity;
pub mod directory;

pub use address::{AddressError, Multiaddr, MultiaddrExt};
pub use config::NatConfig;
pub use connectivity::{NatClient, NatError, NatManager};

/// Result type alias for natward operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for natward operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// NAT traversal error
    #[error("NAT error: {0}")]
    Nat(#[from] NatError),

    /// Address parsing error
    #[error("Address error: {0}")]
    Address(#[from] AddressError),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

/// Initialize logging for natward
pub fn init() {
    tracing_subscriber::fmt::init();
}

#[cfg(test)]
mod tests;
