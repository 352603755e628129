//! NAT traversal manager
//!
//! Maps the node's bound listen addresses through the local gateway and
//! publishes the resulting external addresses:
//!
//! `Idle -> Discovering -> (DoubleNatRejected | Mapping -> Running) -> Stopping -> Idle`
//!
//! Discovery of the external IP gates every mapping request. A private
//! external IP means another NAT sits upstream, and the pass is rejected
//! before any mapping is attempted. Each mapping is then renewed on a fixed
//! interval until [`NatManager::stop`] tears everything down.
//!
//! Every state change made after an await point is guarded by an epoch
//! counter that `stop()` bumps, so results arriving after teardown started
//! never re-add mappings or addresses.

use super::classify::{is_local_only, is_private_ip};
use super::client::{NatClient, client_for, random_high_port};
use super::types::{MapRequest, MappingKey, MappingSnapshot, NatError, Phase};
use crate::address::{Multiaddr, MultiaddrExt};
use crate::config::NatConfig;
use crate::directory::{AddressDirectory, TransportDirectory};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::mem;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Outcome slot of a mapping pass; `None` while the pass is in flight
type RunOutcome = Option<Result<(), NatError>>;

/// A listen address eligible for port mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub(crate) key: MappingKey,
    pub(crate) addr: Multiaddr,
}

/// Select the listen addresses that can be mapped through a gateway whose
/// external address is `external_ip`
///
/// Keeps thin-waist addresses with a bound port on a non-loopback,
/// non-link-local host of the same address family as the gateway. Addresses
/// sharing a port and protocol collapse onto the first one listed.
pub(crate) fn mapping_candidates(addrs: &[Multiaddr], external_ip: IpAddr) -> Vec<Candidate> {
    let mut seen = HashSet::new();

    addrs
        .iter()
        .filter_map(|addr| {
            let Some(opts) = addr.to_options() else {
                debug!("Skipping {}: not a thin-waist address", addr);
                return None;
            };
            if is_local_only(opts.host) {
                debug!("Skipping {}: loopback or link-local host", addr);
                return None;
            }
            if opts.host.is_ipv4() != external_ip.is_ipv4() {
                debug!("Skipping {}: address family differs from {}", addr, external_ip);
                return None;
            }
            if opts.port == 0 {
                debug!("Skipping {}: port not bound yet", addr);
                return None;
            }

            let key = MappingKey {
                private_port: opts.port,
                protocol: opts.protocol,
            };
            if !seen.insert(key) {
                return None;
            }

            Some(Candidate {
                key,
                addr: addr.clone(),
            })
        })
        .collect()
}

struct ActiveMapping {
    internal_addr: Multiaddr,
    external_port: u16,
    external_addr: Multiaddr,
    announced: bool,
    created_at_ms: i64,
    renewed_at_ms: i64,
    renewed_at: Instant,
}

#[derive(Default)]
struct State {
    phase: Phase,
    run: Option<watch::Receiver<RunOutcome>>,
    external_ip: Option<IpAddr>,
    mappings: HashMap<MappingKey, ActiveMapping>,
    renewals: HashMap<MappingKey, JoinHandle<()>>,
}

struct Inner {
    config: NatConfig,
    description: String,
    client: Arc<dyn NatClient>,
    addresses: Arc<dyn AddressDirectory>,
    transports: Arc<dyn TransportDirectory>,
    epoch: AtomicU64,
    state: Mutex<State>,
}

/// NAT traversal manager
///
/// # Example
///
/// ```no_run
/// use natward::config::NatConfig;
/// use natward::connectivity::NatManager;
/// use natward::directory::{AddressBook, TransportTable};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let addresses = Arc::new(AddressBook::new(vec!["/ip4/0.0.0.0/tcp/4001".parse()?]));
/// let transports = Arc::new(TransportTable::new());
/// transports.bind("/ip4/0.0.0.0/tcp/4001".parse()?);
///
/// let manager = NatManager::new(NatConfig::enabled_for("QmPeer"), addresses, transports)?;
/// manager.run_and_wait().await?;
/// // ... node runs, mappings are renewed in the background ...
/// manager.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct NatManager {
    inner: Arc<Inner>,
}

impl NatManager {
    /// Create a manager using the NAT client selected by `config`
    pub fn new(
        config: NatConfig,
        addresses: Arc<dyn AddressDirectory>,
        transports: Arc<dyn TransportDirectory>,
    ) -> Result<Self, NatError> {
        let client = client_for(&config);
        Self::with_client(config, addresses, transports, client)
    }

    /// Create a manager with an explicit NAT client
    pub fn with_client(
        config: NatConfig,
        addresses: Arc<dyn AddressDirectory>,
        transports: Arc<dyn TransportDirectory>,
        client: Arc<dyn NatClient>,
    ) -> Result<Self, NatError> {
        config.validate()?;
        let description = config.mapping_description();

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                description,
                client,
                addresses,
                transports,
                epoch: AtomicU64::new(0),
                state: Mutex::new(State::default()),
            }),
        })
    }

    /// Whether the manager was configured to do anything at all
    pub fn is_enabled(&self) -> bool {
        self.inner.config.enabled
    }

    /// Start discovery and mapping in the background
    ///
    /// Returns immediately; must be called from within a Tokio runtime. A
    /// no-op when disabled, while `stop()` is tearing down, and when a pass
    /// is already in flight or has completed. Failures are only logged; use
    /// [`NatManager::run_and_wait`] to observe them.
    pub fn trigger(&self) {
        if !self.inner.config.enabled {
            debug!("NAT traversal disabled, not starting");
            return;
        }

        let inner = Arc::clone(&self.inner);
        let epoch = inner.epoch.load(Ordering::SeqCst);
        tokio::spawn(async move {
            inner.launch(epoch).await;
        });
    }

    /// Run discovery and mapping, waiting for the pass to finish
    ///
    /// Joins the pass already in flight (or already completed) rather than
    /// starting another. Fails with [`NatError::DoubleNat`] or
    /// [`NatError::Discovery`]; individual addresses that fail to map do not
    /// fail the pass. Returns [`NatError::Cancelled`] when `stop()` overtakes
    /// the pass or is still tearing down.
    pub async fn run_and_wait(&self) -> Result<(), NatError> {
        if !self.inner.config.enabled {
            debug!("NAT traversal disabled, nothing to run");
            return Ok(());
        }

        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        match self.inner.launch(epoch).await {
            Some(rx) => wait_for_outcome(rx).await,
            None => Err(NatError::Cancelled),
        }
    }

    /// Remove every mapping and announced address, returning to `Idle`
    ///
    /// Safe to call before any run and more than once. Unmap failures are
    /// logged and ignored.
    pub async fn stop(&self) {
        let inner = &self.inner;

        let (mappings, renewals) = {
            let mut state = inner.state.lock().await;
            inner.epoch.fetch_add(1, Ordering::SeqCst);

            if state.phase == Phase::Idle && state.mappings.is_empty() {
                debug!("NAT manager already idle");
                return;
            }

            info!(
                "Stopping NAT manager ({} mapping(s), phase {:?})",
                state.mappings.len(),
                state.phase
            );
            state.phase = Phase::Stopping;
            state.run = None;
            state.external_ip = None;

            let mappings = mem::take(&mut state.mappings);
            for mapping in mappings.values().filter(|m| m.announced) {
                inner.addresses.remove_announce_addr(&mapping.external_addr);
            }
            (mappings, mem::take(&mut state.renewals))
        };

        for handle in renewals.into_values() {
            handle.abort();
        }

        let mut pending = JoinSet::new();
        for (key, mapping) in mappings {
            let client = Arc::clone(&inner.client);
            let request = inner.request_for(key, mapping.external_port);
            pending.spawn(async move { (key, client.unmap(&request).await) });
        }

        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok((key, Ok(()))) => debug!("Unmapped {}", key),
                Ok((key, Err(e))) => warn!("Failed to unmap {}: {}", key, e),
                Err(e) => warn!("Unmap task failed: {}", e),
            }
        }

        let mut state = inner.state.lock().await;
        if state.phase == Phase::Stopping {
            state.phase = Phase::Idle;
        }
        info!("NAT manager stopped");
    }

    /// Current lifecycle phase
    pub async fn phase(&self) -> Phase {
        self.inner.state.lock().await.phase
    }

    /// External IP discovered by the current run
    pub async fn external_ip(&self) -> Option<IpAddr> {
        self.inner.state.lock().await.external_ip
    }

    /// Snapshot of active mappings, ordered by protocol and port
    pub async fn mappings(&self) -> Vec<MappingSnapshot> {
        let state = self.inner.state.lock().await;
        let mut snapshots: Vec<MappingSnapshot> = state
            .mappings
            .iter()
            .map(|(key, mapping)| MappingSnapshot {
                key: *key,
                external_port: mapping.external_port,
                internal_addr: mapping.internal_addr.clone(),
                external_addr: mapping.external_addr.clone(),
                announced: mapping.announced,
                created_at_ms: mapping.created_at_ms,
                renewed_at_ms: mapping.renewed_at_ms,
            })
            .collect();
        snapshots.sort_by_key(|s| s.key);
        snapshots
    }
}

impl Drop for NatManager {
    fn drop(&mut self) {
        // In-flight passes and renewal ticks see a stale epoch and bail out
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);

        // Renewal tasks hold the shared state alive; cancel them with the handle
        if let Ok(mut state) = self.inner.state.try_lock() {
            for handle in state.renewals.drain().map(|(_, h)| h) {
                handle.abort();
            }
        }
    }
}

async fn wait_for_outcome(mut rx: watch::Receiver<RunOutcome>) -> Result<(), NatError> {
    let outcome = match rx.wait_for(Option::is_some).await {
        Ok(outcome) => outcome.clone(),
        Err(_) => None,
    };
    outcome.unwrap_or(Err(NatError::Cancelled))
}

impl Inner {
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn request_for(&self, key: MappingKey, public_port: u16) -> MapRequest {
        MapRequest {
            private_port: key.private_port,
            public_port,
            protocol: key.protocol,
            lease: self.config.lease(),
            description: self.description.clone(),
        }
    }

    /// Join the current pass or start one
    ///
    /// Returns `None` when `stop()` ran after the caller read `epoch`, or while
    /// a teardown is still removing mappings.
    async fn launch(self: &Arc<Self>, epoch: u64) -> Option<watch::Receiver<RunOutcome>> {
        let mut state = self.state.lock().await;
        if !self.is_current(epoch) {
            debug!("Ignoring NAT trigger issued before stop");
            return None;
        }
        if state.phase == Phase::Stopping {
            // Unmaps still in flight would remove the new pass's mappings
            debug!("NAT manager is stopping, ignoring trigger");
            return None;
        }
        if let Some(rx) = &state.run {
            debug!("NAT pass already started ({:?}), joining it", state.phase);
            return Some(rx.clone());
        }

        let (tx, rx) = watch::channel(None);
        state.run = Some(rx.clone());
        state.phase = Phase::Discovering;

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = inner.run_pass(epoch).await;
            match &outcome {
                Ok(()) => {}
                Err(NatError::Cancelled) => debug!("NAT pass overtaken by stop"),
                Err(e @ NatError::DoubleNat { .. }) => error!("{}", e),
                Err(e) => warn!("NAT traversal attempt failed: {}", e),
            }
            let _ = tx.send(Some(outcome));
        });

        Some(rx)
    }

    async fn run_pass(self: Arc<Self>, epoch: u64) -> Result<(), NatError> {
        let external_ip = match self.config.external_ip {
            Some(ip) => {
                info!("Using configured external IP {}", ip);
                ip
            }
            None => match self.client.external_ip().await {
                Ok(ip) => ip,
                Err(e) => {
                    let mut state = self.state.lock().await;
                    if !self.is_current(epoch) {
                        return Err(NatError::Cancelled);
                    }
                    // Clear the slot so the next trigger retries
                    state.phase = Phase::Idle;
                    state.run = None;
                    return Err(NatError::Discovery(e.to_string()));
                }
            },
        };

        if is_private_ip(external_ip) {
            let mut state = self.state.lock().await;
            if !self.is_current(epoch) {
                return Err(NatError::Cancelled);
            }
            state.phase = Phase::DoubleNatRejected;
            return Err(NatError::DoubleNat { ip: external_ip });
        }

        let candidates = {
            let mut state = self.state.lock().await;
            if !self.is_current(epoch) {
                return Err(NatError::Cancelled);
            }
            state.phase = Phase::Mapping;
            state.external_ip = Some(external_ip);
            mapping_candidates(&self.transports.addrs(), external_ip)
        };

        info!(
            "External IP is {}, mapping {} candidate address(es)",
            external_ip,
            candidates.len()
        );

        let total = candidates.len();
        let mut pending = JoinSet::new();
        for candidate in candidates {
            let client = Arc::clone(&self.client);
            let request = self.request_for(candidate.key, random_high_port());
            pending.spawn(async move {
                let result = client.map(&request).await;
                (candidate, request, result)
            });
        }

        let mut mapped = 0;
        while let Some(joined) = pending.join_next().await {
            let (candidate, mut request, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!("Mapping task failed: {}", e);
                    continue;
                }
            };

            match result {
                Ok(external_port) => {
                    request.public_port = external_port;
                    if self.record_mapping(epoch, &candidate, &request, external_ip).await {
                        mapped += 1;
                    } else {
                        debug!("Mapping for {} arrived after stop, removing it", candidate.addr);
                        if let Err(e) = self.client.unmap(&request).await {
                            warn!("Failed to unmap orphaned {}: {}", candidate.key, e);
                        }
                    }
                }
                Err(e) => warn!("Failed to map {}: {}", candidate.addr, e),
            }
        }

        let mut state = self.state.lock().await;
        if !self.is_current(epoch) {
            return Err(NatError::Cancelled);
        }
        state.phase = Phase::Running;
        info!("NAT traversal running: {} of {} address(es) mapped", mapped, total);
        Ok(())
    }

    /// Store a granted mapping, announce it and start renewing it
    ///
    /// Returns `false` without touching anything when `stop()` has begun.
    async fn record_mapping(
        self: &Arc<Self>,
        epoch: u64,
        candidate: &Candidate,
        request: &MapRequest,
        external_ip: IpAddr,
    ) -> bool {
        let mut state = self.state.lock().await;
        if !self.is_current(epoch) {
            return false;
        }

        let external_addr = candidate.addr.with_endpoint(external_ip, request.public_port);
        info!("Mapped {} -> {}", candidate.addr, external_addr);
        self.addresses.add_announce_addr(external_addr.clone());

        let now_ms = Utc::now().timestamp_millis();
        state.mappings.insert(
            candidate.key,
            ActiveMapping {
                internal_addr: candidate.addr.clone(),
                external_port: request.public_port,
                external_addr,
                announced: true,
                created_at_ms: now_ms,
                renewed_at_ms: now_ms,
                renewed_at: Instant::now(),
            },
        );

        let inner = Arc::clone(self);
        let key = candidate.key;
        let request = request.clone();
        let handle = tokio::spawn(async move { inner.renew(epoch, key, request).await });
        if let Some(previous) = state.renewals.insert(key, handle) {
            previous.abort();
        }
        true
    }

    /// Renewal loop for one mapping
    ///
    /// A failed renewal keeps the address announced until a full lease has
    /// passed since the last grant, then withdraws it and keeps retrying.
    async fn renew(self: Arc<Self>, epoch: u64, key: MappingKey, mut request: MapRequest) {
        let interval = self.config.renewal_interval();
        let lease = self.config.lease();

        loop {
            tokio::time::sleep(interval).await;
            if !self.is_current(epoch) {
                return;
            }
            debug!("Renewing mapping {}", key);
            let result = self.client.map(&request).await;

            let mut state = self.state.lock().await;
            if !self.is_current(epoch) {
                return;
            }
            let Some(external_ip) = state.external_ip else {
                return;
            };
            let Some(mapping) = state.mappings.get_mut(&key) else {
                return;
            };

            match result {
                Ok(external_port) => {
                    if external_port != mapping.external_port || !mapping.announced {
                        let external_addr = mapping.internal_addr.with_endpoint(external_ip, external_port);
                        if mapping.announced {
                            self.addresses.remove_announce_addr(&mapping.external_addr);
                        }
                        info!("Mapping {} now announced as {}", key, external_addr);
                        self.addresses.add_announce_addr(external_addr.clone());
                        mapping.external_addr = external_addr;
                        mapping.external_port = external_port;
                        mapping.announced = true;
                    }
                    mapping.renewed_at = Instant::now();
                    mapping.renewed_at_ms = Utc::now().timestamp_millis();
                    request.public_port = external_port;
                    debug!("Renewed mapping {} (external port {})", key, external_port);
                }
                Err(e) => {
                    warn!(
                        "Failed to renew mapping {}: {} (retrying in {}s)",
                        key,
                        e,
                        interval.as_secs()
                    );
                    if mapping.announced && mapping.renewed_at.elapsed() >= lease {
                        warn!("Lease for {} lapsed, withdrawing {}", key, mapping.external_addr);
                        self.addresses.remove_announce_addr(&mapping.external_addr);
                        mapping.announced = false;
                    }
                }
            }
        }
    }
}
