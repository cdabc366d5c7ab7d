//! Local-network service discovery.
//!
//! # How discovery works (for beginners)
//!
//! Before a client can open a TCP connection it needs an address.  The
//! server *advertises* a named service (`_ttc._tcp.local.` by default) and
//! the client *browses* for that service type.  Every time a matching
//! service is resolved the browser reports a [`DiscoveredService`] with the
//! addresses and port to try.
//!
//! Two seams keep the roles independent of the mechanism:
//!
//! - [`ServiceBrowser`] opens a [`BrowseSession`] that reports services on a
//!   channel until it is stopped.
//! - [`ServiceAdvertiser`] publishes a [`ServiceDescriptor`] and returns an
//!   [`Advertisement`] that withdraws it again.
//!
//! Implementations:
//!
//! | Type                | Mechanism                                         |
//! |---------------------|---------------------------------------------------|
//! | [`MdnsBrowser`]     | multicast DNS via the `mdns-sd` daemon            |
//! | [`MdnsAdvertiser`]  | multicast DNS via the `mdns-sd` daemon            |
//! | [`StaticBrowser`]   | re-announces a fixed peer list (no multicast)     |
//! | [`CombinedBrowser`] | merges several browsers (mDNS plus static peers)  |
//! | [`NullAdvertiser`]  | advertises nothing                                |
//!
//! The mDNS daemon delivers events on a blocking channel, so the browse loop
//! runs on a dedicated thread that polls it with a short timeout and checks
//! a shared running flag between polls.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use ttc_core::ServiceDescriptor;

/// How long the mDNS browse thread blocks before re-checking its flag.
const BROWSE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Fallback when the OS hostname cannot be read or is not UTF-8.
const FALLBACK_HOSTNAME: &str = "ttc-node";

/// Errors raised while starting discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The mDNS daemon could not be created or refused a request.
    #[error("mDNS error: {0}")]
    Mdns(#[from] mdns_sd::Error),

    /// The browse thread could not be spawned.
    #[error("failed to spawn browse thread: {0}")]
    Thread(#[source] std::io::Error),
}

/// A service instance found by a browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    /// Fully qualified service name, e.g. `TTC-<uuid>._ttc._tcp.local.`.
    pub name: String,
    pub addresses: Vec<IpAddr>,
    pub port: u16,
}

impl DiscoveredService {
    /// Builds a service entry for one known socket address.
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self {
            name: addr.to_string(),
            addresses: vec![addr.ip()],
            port: addr.port(),
        }
    }

    /// Candidate socket addresses, IPv4 first, preserving order otherwise.
    pub fn socket_addrs(&self) -> Vec<SocketAddr> {
        let v4 = self.addresses.iter().filter(|ip| ip.is_ipv4());
        let v6 = self.addresses.iter().filter(|ip| ip.is_ipv6());
        v4.chain(v6)
            .map(|ip| SocketAddr::new(*ip, self.port))
            .collect()
    }
}

/// An active browse; stopping it ends the stream of discovered services.
pub trait BrowseSession: Send {
    fn stop(self: Box<Self>);
}

/// Opens browse sessions for a service type.
pub trait ServiceBrowser: Send + Sync {
    /// Starts browsing for `service_type`; every resolved service is sent
    /// on `found` until the returned session is stopped.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] if the browse cannot be started.
    fn browse(
        &self,
        service_type: &str,
        found: mpsc::UnboundedSender<DiscoveredService>,
    ) -> Result<Box<dyn BrowseSession>, DiscoveryError>;
}

/// A published service; withdrawing it removes it from the network.
pub trait Advertisement: Send {
    fn withdraw(self: Box<Self>);
}

/// Publishes service descriptors.
pub trait ServiceAdvertiser: Send + Sync {
    /// Publishes `descriptor` until the returned advertisement is withdrawn.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] if the service cannot be registered.
    fn advertise(&self, descriptor: &ServiceDescriptor)
        -> Result<Box<dyn Advertisement>, DiscoveryError>;
}

/// Returns the OS hostname, or `"ttc-node"` when it is unavailable.
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| FALLBACK_HOSTNAME.to_string())
}

// ── mDNS ──────────────────────────────────────────────────────────────────────

/// Browses with the `mdns-sd` daemon.
#[derive(Clone)]
pub struct MdnsBrowser {
    daemon: ServiceDaemon,
}

impl MdnsBrowser {
    pub fn new(daemon: ServiceDaemon) -> Self {
        Self { daemon }
    }
}

impl ServiceBrowser for MdnsBrowser {
    fn browse(
        &self,
        service_type: &str,
        found: mpsc::UnboundedSender<DiscoveredService>,
    ) -> Result<Box<dyn BrowseSession>, DiscoveryError> {
        let receiver = self.daemon.browse(service_type)?;
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        thread::Builder::new()
            .name("ttc-mdns-browse".to_string())
            .spawn(move || {
                while flag.load(Ordering::SeqCst) {
                    let event = match receiver.recv_timeout(BROWSE_POLL_INTERVAL) {
                        Ok(event) => event,
                        Err(_) if receiver.is_disconnected() => break,
                        Err(_) => continue,
                    };
                    match event {
                        ServiceEvent::ServiceResolved(info) => {
                            let service = DiscoveredService {
                                name: info.get_fullname().to_string(),
                                addresses: info.get_addresses().iter().copied().collect(),
                                port: info.get_port(),
                            };
                            debug!("mDNS: resolved {} on port {}", service.name, service.port);
                            if found.send(service).is_err() {
                                break;
                            }
                        }
                        ServiceEvent::ServiceRemoved(_, fullname) => {
                            debug!("mDNS: service removed: {fullname}");
                        }
                        ServiceEvent::SearchStopped(_) => break,
                        _ => {}
                    }
                }
                debug!("mDNS browse thread exiting");
            })
            .map_err(DiscoveryError::Thread)?;

        info!("mDNS: browsing for {service_type}");
        Ok(Box::new(MdnsBrowseSession {
            daemon: self.daemon.clone(),
            service_type: service_type.to_string(),
            running,
        }))
    }
}

struct MdnsBrowseSession {
    daemon: ServiceDaemon,
    service_type: String,
    running: Arc<AtomicBool>,
}

impl BrowseSession for MdnsBrowseSession {
    fn stop(self: Box<Self>) {
        self.running.store(false, Ordering::SeqCst);
        if let Err(e) = self.daemon.stop_browse(&self.service_type) {
            warn!("mDNS: failed to stop browsing: {e}");
        }
    }
}

/// Advertises with the `mdns-sd` daemon.
#[derive(Clone)]
pub struct MdnsAdvertiser {
    daemon: ServiceDaemon,
    host: String,
}

impl MdnsAdvertiser {
    /// `host` is the bare hostname; `.local.` is appended when registering.
    pub fn new(daemon: ServiceDaemon, host: impl Into<String>) -> Self {
        Self {
            daemon,
            host: host.into(),
        }
    }
}

impl ServiceAdvertiser for MdnsAdvertiser {
    fn advertise(
        &self,
        descriptor: &ServiceDescriptor,
    ) -> Result<Box<dyn Advertisement>, DiscoveryError> {
        let properties = [("version".to_string(), env!("CARGO_PKG_VERSION").to_string())];
        let info = ServiceInfo::new(
            &descriptor.service_type,
            &descriptor.instance_name,
            &format!("{}.local.", self.host),
            "",
            descriptor.port,
            &properties[..],
        )?
        .enable_addr_auto();

        let fullname = info.get_fullname().to_string();
        self.daemon.register(info)?;
        info!("mDNS: advertising {fullname} on port {}", descriptor.port);

        Ok(Box::new(MdnsAdvertisement {
            daemon: self.daemon.clone(),
            fullname,
        }))
    }
}

struct MdnsAdvertisement {
    daemon: ServiceDaemon,
    fullname: String,
}

impl Advertisement for MdnsAdvertisement {
    fn withdraw(self: Box<Self>) {
        match self.daemon.unregister(&self.fullname) {
            Ok(_) => info!("mDNS: withdrew {}", self.fullname),
            Err(e) => warn!("mDNS: failed to unregister {}: {e}", self.fullname),
        }
    }
}

// ── Static peers ──────────────────────────────────────────────────────────────

/// Announces a fixed list of peer addresses, repeating every `interval`.
///
/// Used on networks without multicast and by the loopback tests.
#[derive(Clone)]
pub struct StaticBrowser {
    runtime: Handle,
    peers: Vec<SocketAddr>,
    interval: Duration,
}

impl StaticBrowser {
    pub fn new(runtime: Handle, peers: Vec<SocketAddr>, interval: Duration) -> Self {
        Self {
            runtime,
            peers,
            interval,
        }
    }
}

impl ServiceBrowser for StaticBrowser {
    fn browse(
        &self,
        service_type: &str,
        found: mpsc::UnboundedSender<DiscoveredService>,
    ) -> Result<Box<dyn BrowseSession>, DiscoveryError> {
        let peers = self.peers.clone();
        let interval = self.interval;
        debug!("static browse for {service_type} over {} peer(s)", peers.len());

        let task = self.runtime.spawn(async move {
            loop {
                for addr in &peers {
                    if found.send(DiscoveredService::from_addr(*addr)).is_err() {
                        return;
                    }
                }
                tokio::time::sleep(interval).await;
            }
        });

        Ok(Box::new(StaticBrowseSession {
            task: task.abort_handle(),
        }))
    }
}

struct StaticBrowseSession {
    task: AbortHandle,
}

impl BrowseSession for StaticBrowseSession {
    fn stop(self: Box<Self>) {
        self.task.abort();
    }
}

// ── Combined ──────────────────────────────────────────────────────────────────

/// Runs several browsers at once and merges what they find.
#[derive(Clone, Default)]
pub struct CombinedBrowser {
    browsers: Vec<Arc<dyn ServiceBrowser>>,
}

impl CombinedBrowser {
    pub fn new(browsers: Vec<Arc<dyn ServiceBrowser>>) -> Self {
        Self { browsers }
    }
}

impl ServiceBrowser for CombinedBrowser {
    fn browse(
        &self,
        service_type: &str,
        found: mpsc::UnboundedSender<DiscoveredService>,
    ) -> Result<Box<dyn BrowseSession>, DiscoveryError> {
        let mut sessions = Vec::with_capacity(self.browsers.len());
        for browser in &self.browsers {
            match browser.browse(service_type, found.clone()) {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    for session in sessions {
                        session.stop();
                    }
                    return Err(e);
                }
            }
        }
        Ok(Box::new(CombinedBrowseSession { sessions }))
    }
}

struct CombinedBrowseSession {
    sessions: Vec<Box<dyn BrowseSession>>,
}

impl BrowseSession for CombinedBrowseSession {
    fn stop(self: Box<Self>) {
        for session in self.sessions {
            session.stop();
        }
    }
}

/// Advertiser that publishes nothing; for static-peer setups and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAdvertiser;

impl ServiceAdvertiser for NullAdvertiser {
    fn advertise(
        &self,
        descriptor: &ServiceDescriptor,
    ) -> Result<Box<dyn Advertisement>, DiscoveryError> {
        debug!("not advertising {}", descriptor.full_name());
        Ok(Box::new(NullAdvertisement))
    }
}

struct NullAdvertisement;

impl Advertisement for NullAdvertisement {
    fn withdraw(self: Box<Self>) {}
}

// ── Tests ─────────────────────────────────────────────────────────────────────
