// Test modules for natward
// Shared helpers live here; each module covers one area of the crate

mod config_tests;
mod connectivity_tests;

use crate::address::Multiaddr;
use crate::connectivity::client::NatClient;
use crate::connectivity::types::{MapRequest, MappingError, MappingProtocol};
use async_trait::async_trait;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Notify;

pub(crate) fn ma(s: &str) -> Multiaddr {
    s.parse().unwrap()
}

/// Scriptable NAT client that records every call
pub(crate) struct StubClient {
    external_ip: Mutex<Result<IpAddr, String>>,
    external_ip_calls: AtomicUsize,
    map_calls: Mutex<Vec<MapRequest>>,
    unmap_calls: Mutex<Vec<MapRequest>>,
    failing_ports: Mutex<HashSet<u16>>,
    fail_all_maps: AtomicBool,
    fail_unmaps: AtomicBool,
    granted_port: Mutex<Option<u16>>,
    hold_maps: AtomicBool,
    release: Notify,
    hold_external_ip: AtomicBool,
    external_ip_release: Notify,
    hold_unmaps: AtomicBool,
    unmap_release: Notify,
}

impl StubClient {
    pub(crate) fn resolving(ip: &str) -> Self {
        Self {
            external_ip: Mutex::new(Ok(ip.parse().unwrap())),
            external_ip_calls: AtomicUsize::new(0),
            map_calls: Mutex::new(Vec::new()),
            unmap_calls: Mutex::new(Vec::new()),
            failing_ports: Mutex::new(HashSet::new()),
            fail_all_maps: AtomicBool::new(false),
            fail_unmaps: AtomicBool::new(false),
            granted_port: Mutex::new(None),
            hold_maps: AtomicBool::new(false),
            release: Notify::new(),
            hold_external_ip: AtomicBool::new(false),
            external_ip_release: Notify::new(),
            hold_unmaps: AtomicBool::new(false),
            unmap_release: Notify::new(),
        }
    }

    pub(crate) fn unreachable() -> Self {
        let stub = Self::resolving("0.0.0.0");
        stub.set_external_ip_error("no gateway");
        stub
    }

    pub(crate) fn set_external_ip(&self, ip: &str) {
        *self.external_ip.lock().unwrap() = Ok(ip.parse().unwrap());
    }

    pub(crate) fn set_external_ip_error(&self, message: &str) {
        *self.external_ip.lock().unwrap() = Err(message.to_string());
    }

    /// Refuse mappings for this private port
    pub(crate) fn fail_port(&self, port: u16) {
        self.failing_ports.lock().unwrap().insert(port);
    }

    pub(crate) fn set_fail_all_maps(&self, fail: bool) {
        self.fail_all_maps.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_unmaps(&self, fail: bool) {
        self.fail_unmaps.store(fail, Ordering::SeqCst);
    }

    /// Grant this external port instead of the suggested one
    pub(crate) fn grant_port(&self, port: u16) {
        *self.granted_port.lock().unwrap() = Some(port);
    }

    /// Park map calls until `release_map` is called
    pub(crate) fn hold_maps(&self) {
        self.hold_maps.store(true, Ordering::SeqCst);
    }

    pub(crate) fn release_map(&self) {
        self.hold_maps.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }

    /// Park external IP lookups until `release_external_ip` is called
    pub(crate) fn hold_external_ip(&self) {
        self.hold_external_ip.store(true, Ordering::SeqCst);
    }

    pub(crate) fn release_external_ip(&self) {
        self.hold_external_ip.store(false, Ordering::SeqCst);
        self.external_ip_release.notify_one();
    }

    /// Park unmap calls until `release_unmap` is called
    pub(crate) fn hold_unmaps(&self) {
        self.hold_unmaps.store(true, Ordering::SeqCst);
    }

    pub(crate) fn release_unmap(&self) {
        self.hold_unmaps.store(false, Ordering::SeqCst);
        self.unmap_release.notify_one();
    }

    pub(crate) fn external_ip_calls(&self) -> usize {
        self.external_ip_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn map_calls(&self) -> Vec<MapRequest> {
        self.map_calls.lock().unwrap().clone()
    }

    pub(crate) fn unmap_calls(&self) -> Vec<MapRequest> {
        self.unmap_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl NatClient for StubClient {
    fn protocol(&self) -> MappingProtocol {
        MappingProtocol::UPnP
    }

    async fn external_ip(&self) -> Result<IpAddr, MappingError> {
        self.external_ip_calls.fetch_add(1, Ordering::SeqCst);

        if self.hold_external_ip.load(Ordering::SeqCst) {
            self.external_ip_release.notified().await;
        }

        self.external_ip
            .lock()
            .unwrap()
            .clone()
            .map_err(MappingError::GatewayError)
    }

    async fn map(&self, request: &MapRequest) -> Result<u16, MappingError> {
        self.map_calls.lock().unwrap().push(request.clone());

        if self.hold_maps.load(Ordering::SeqCst) {
            self.release.notified().await;
        }

        if self.fail_all_maps.load(Ordering::SeqCst)
            || self.failing_ports.lock().unwrap().contains(&request.private_port)
        {
            return Err(MappingError::GatewayError("ConflictInMappingEntry".to_string()));
        }

        let granted = *self.granted_port.lock().unwrap();
        Ok(granted.unwrap_or(request.public_port))
    }

    async fn unmap(&self, request: &MapRequest) -> Result<(), MappingError> {
        self.unmap_calls.lock().unwrap().push(request.clone());

        if self.hold_unmaps.load(Ordering::SeqCst) {
            self.unmap_release.notified().await;
        }

        if self.fail_unmaps.load(Ordering::SeqCst) {
            return Err(MappingError::Timeout);
        }
        Ok(())
    }
}
