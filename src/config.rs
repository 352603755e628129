//! NAT manager configuration
//!
//! Stored as JSON. Every field has a default, so a partial (or empty) file is
//! valid.

use crate::connectivity::types::NatError;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

/// Default mapping lease (20 minutes)
pub const DEFAULT_LEASE_SECS: u64 = 20 * 60;

/// Shortest lease accepted; gateways commonly refuse anything shorter
pub const MIN_LEASE_SECS: u64 = 120;

/// Default per-request timeout for NAT clients
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;

/// NAT traversal settings
///
/// # Example
/// ```rust
/// use natward::config::NatConfig;
///
/// let config: NatConfig = serde_json::from_str(r#"{ "enabled": true, "peer_id": "QmPeer" }"#).unwrap();
/// assert!(config.enabled);
/// assert_eq!(config.lease_secs, 1200);
/// assert_eq!(config.renewal_interval().as_secs(), 600);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NatConfig {
    /// Master switch; a disabled manager never talks to the gateway
    pub enabled: bool,
    /// Peer identifier embedded in mapping descriptions
    pub peer_id: String,
    /// Overrides the generated mapping description
    pub description: Option<String>,
    /// Lease requested for each mapping, in seconds
    pub lease_secs: u64,
    /// Renewal period in seconds (half the lease when unset)
    pub renewal_interval_secs: Option<u64>,
    /// Known external IP; skips gateway discovery when set
    pub external_ip: Option<IpAddr>,
    /// Gateway to send NAT-PMP requests to (default route when unset)
    pub gateway: Option<IpAddr>,
    /// Use NAT-PMP instead of UPnP-IGD
    pub pmp_enabled: bool,
    /// Timeout for a single NAT client request, in seconds
    pub request_timeout_secs: u64,
}

impl Default for NatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            peer_id: String::new(),
            description: None,
            lease_secs: DEFAULT_LEASE_SECS,
            renewal_interval_secs: None,
            external_ip: None,
            gateway: None,
            pmp_enabled: false,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl NatConfig {
    /// Enabled configuration for the given peer
    pub fn enabled_for(peer_id: impl Into<String>) -> Self {
        Self {
            enabled: true,
            peer_id: peer_id.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file
    ///
    /// Returns the defaults when the file doesn't exist or is empty.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        if data.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check lease, renewal and timeout bounds
    pub fn validate(&self) -> std::result::Result<(), NatError> {
        if self.lease_secs < MIN_LEASE_SECS {
            return Err(NatError::InvalidConfig(format!(
                "lease of {}s is below the minimum of {}s",
                self.lease_secs, MIN_LEASE_SECS
            )));
        }

        let renewal = self.renewal_interval().as_secs();
        if renewal == 0 || renewal >= self.lease_secs {
            return Err(NatError::InvalidConfig(format!(
                "renewal interval of {}s must be between 1s and the {}s lease",
                renewal, self.lease_secs
            )));
        }

        if self.request_timeout_secs == 0 {
            return Err(NatError::InvalidConfig(
                "request timeout must be at least 1s".to_string(),
            ));
        }

        Ok(())
    }

    /// Lease requested for each mapping
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    /// Interval between renewals
    pub fn renewal_interval(&self) -> Duration {
        Duration::from_secs(self.renewal_interval_secs.unwrap_or(self.lease_secs / 2))
    }

    /// Timeout for a single NAT client request
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Description attached to every mapping
    pub fn mapping_description(&self) -> String {
        match &self.description {
            Some(description) => description.clone(),
            None => format!(
                "{}@{} {}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
                self.peer_id
            ),
        }
    }
}
