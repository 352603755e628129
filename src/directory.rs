//! Address and transport directories shared with the host node
//!
//! The NAT manager reads bound addresses from a [`TransportDirectory`] and
//! publishes external addresses into an [`AddressDirectory`]. Both are owned
//! by the host node; the in-memory implementations here back the node when it
//! has no directory of its own, and back the tests.

use crate::address::Multiaddr;
use std::sync::RwLock;
use tracing::debug;

/// Listen and announce addresses of the local node
pub trait AddressDirectory: Send + Sync {
    /// Addresses the node was configured to listen on
    fn listen_addrs(&self) -> Vec<Multiaddr>;

    /// Addresses the node announces to peers
    fn announce_addrs(&self) -> Vec<Multiaddr>;

    /// Add an address to the announce set (duplicates are ignored)
    fn add_announce_addr(&self, addr: Multiaddr);

    /// Remove an address from the announce set; absent addresses are a no-op
    fn remove_announce_addr(&self, addr: &Multiaddr);
}

/// Addresses actively bound by running transports
pub trait TransportDirectory: Send + Sync {
    /// Bound addresses in listen order
    fn addrs(&self) -> Vec<Multiaddr>;
}

/// In-memory [`AddressDirectory`]
#[derive(Debug, Default)]
pub struct AddressBook {
    listen: RwLock<Vec<Multiaddr>>,
    announce: RwLock<Vec<Multiaddr>>,
}

impl AddressBook {
    /// Create a directory with the given listen addresses and no announce addresses
    pub fn new(listen: Vec<Multiaddr>) -> Self {
        Self {
            listen: RwLock::new(listen),
            announce: RwLock::new(Vec::new()),
        }
    }

    /// Create a directory with pre-existing announce addresses
    pub fn with_announce(listen: Vec<Multiaddr>, announce: Vec<Multiaddr>) -> Self {
        Self {
            listen: RwLock::new(listen),
            announce: RwLock::new(announce),
        }
    }
}

impl AddressDirectory for AddressBook {
    fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.listen.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn announce_addrs(&self) -> Vec<Multiaddr> {
        self.announce.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn add_announce_addr(&self, addr: Multiaddr) {
        let mut announce = self.announce.write().unwrap_or_else(|e| e.into_inner());
        if !announce.contains(&addr) {
            debug!("Announcing {}", addr);
            announce.push(addr);
        }
    }

    fn remove_announce_addr(&self, addr: &Multiaddr) {
        let mut announce = self.announce.write().unwrap_or_else(|e| e.into_inner());
        announce.retain(|a| a != addr);
    }
}

/// In-memory [`TransportDirectory`]
///
/// Transports register the concrete address they bound to (with ephemeral
/// ports resolved) and drop it again when they close.
#[derive(Debug, Default)]
pub struct TransportTable {
    bound: RwLock<Vec<Multiaddr>>,
}

impl TransportTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a bound address
    pub fn bind(&self, addr: Multiaddr) {
        let mut bound = self.bound.write().unwrap_or_else(|e| e.into_inner());
        if !bound.contains(&addr) {
            bound.push(addr);
        }
    }

    /// Forget a bound address
    pub fn unbind(&self, addr: &Multiaddr) {
        self.bound
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|a| a != addr);
    }

    /// Forget every bound address
    pub fn clear(&self) {
        self.bound.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl TransportDirectory for TransportTable {
    fn addrs(&self) -> Vec<Multiaddr> {
        self.bound.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
