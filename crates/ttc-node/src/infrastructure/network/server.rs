//! Discovery server role: advertise, accept peers, relay and broadcast.
//!
//! # Task layout (for beginners)
//!
//! ```text
//!                 ┌────────────┐   accept   ┌──────────────┐
//!   TcpListener ─►│ accept loop│──────────► │ peer reader  │─┐ data ──► listener
//!                 └────────────┘  (one per  └──────────────┘ │
//!                                   peer)                    │ relay
//!   send() ─────────────────────────────────────────────┐    ▼
//!                                                       ▼ ┌───────────┐   ┌─────────────┐
//!                                          outbound queue ─►│ broadcast │──►│ peer writer │─► socket
//!                                                         └───────────┘   └─────────────┘
//!                                                                 (per-peer queue, one per peer)
//! ```
//!
//! - Every peer gets its own reader task.  Inbound payloads go to the role
//!   listener and are also put back on the shared outbound queue, tagged with
//!   the peer they came from.
//! - The broadcast task drains the shared queue and copies each payload into
//!   every peer's own queue.  With `relay_echo` disabled a relayed payload
//!   skips the peer it came from.
//! - Every peer also gets its own writer task.  A peer that stops reading
//!   only fills its own queue; once that is full its payloads are dropped
//!   and the other peers keep receiving.
//! - The listener hears `connected` when the first peer joins and
//!   `disconnected` when the last one leaves.
//!
//! # Shutdown order
//!
//! `stop` withdraws the advertisement, pushes the shutdown sentinel (the
//! broadcast task forwards it to every peer writer, which closes its write
//! half), and waits for the listening socket to close.  The socket closes
//! when the last peer hangs up, or right away if nobody is connected.  Peers
//! that do not hang up within `shutdown_grace` have their reader and writer
//! tasks aborted.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use ttc_core::domain::descriptor::{DEFAULT_PORT, DEFAULT_SERVICE_TYPE};
use ttc_core::protocol::queue::DEFAULT_QUEUE_CAPACITY;
use ttc_core::{outbound_queue, Outbound, OutboundQueue, OutboundReceiver, PeerId, QueueError, ServiceDescriptor};

use crate::application::role::{Role, RoleError, RoleListener};
use crate::infrastructure::network::discovery::{local_hostname, Advertisement, ServiceAdvertiser};
use crate::infrastructure::network::transport::{read_frames, write_frames};

/// Default time peers get to hang up after `stop`.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Pause after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Service type to advertise.
    pub service_type: String,
    /// Host name the instance name is derived from.
    pub host: String,
    pub bind_address: IpAddr,
    /// Listening port; `0` picks a free port (see [`DiscoveryServer::local_addr`]).
    pub port: u16,
    /// Capacity of the shared outbound queue.
    pub queue_capacity: usize,
    /// Write relayed payloads back to the peer that sent them.
    pub relay_echo: bool,
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            service_type: DEFAULT_SERVICE_TYPE.to_string(),
            host: local_hostname(),
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            relay_echo: true,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// The server role.
pub struct DiscoveryServer {
    config: ServerConfig,
    advertiser: Arc<dyn ServiceAdvertiser>,
    runtime: Handle,
    running: Mutex<Option<RunningServer>>,
}

/// Everything that exists only while the server is running.
struct RunningServer {
    session: Arc<Session>,
    local_addr: SocketAddr,
    advertisement: Box<dyn Advertisement>,
    accept_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

/// State shared by the accept loop, the peer tasks and the broadcast task.
struct Session {
    runtime: Handle,
    listener: RoleListener,
    queue: OutboundQueue,
    /// Capacity of each peer's own queue.
    peer_queue_capacity: usize,
    relay_echo: bool,
    peers: tokio::sync::Mutex<HashMap<PeerId, PeerRecord>>,
    peer_count: AtomicUsize,
    stopping: AtomicBool,
    /// Signalled when the listening socket should close.
    closed: Notify,
}

/// The peer map is never locked across socket I/O.
struct PeerRecord {
    addr: SocketAddr,
    queue: OutboundQueue,
    writer: AbortHandle,
    reader: AbortHandle,
}

impl DiscoveryServer {
    pub fn new(config: ServerConfig, advertiser: Arc<dyn ServiceAdvertiser>, runtime: Handle) -> Self {
        Self {
            config,
            advertiser,
            runtime,
            running: Mutex::new(None),
        }
    }

    /// Address of the listening socket while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running().as_ref().map(|r| r.local_addr)
    }

    /// Number of connected peers.
    pub fn peer_count(&self) -> usize {
        self.running()
            .as_ref()
            .map_or(0, |r| r.session.peer_count.load(Ordering::SeqCst))
    }

    fn running(&self) -> MutexGuard<'_, Option<RunningServer>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Role for DiscoveryServer {
    async fn start(&self, listener: RoleListener) -> Result<(), RoleError> {
        if self.running().is_some() {
            return Ok(());
        }

        let addr = SocketAddr::new(self.config.bind_address, self.config.port);
        let socket = TcpListener::bind(addr)
            .await
            .map_err(|source| RoleError::Bind { addr, source })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| RoleError::Bind { addr, source })?;

        let descriptor =
            ServiceDescriptor::for_host(&self.config.service_type, &self.config.host, local_addr.port());
        let advertisement = self
            .advertiser
            .advertise(&descriptor)
            .map_err(|e| RoleError::Discovery(e.to_string()))?;

        let (queue, rx) = outbound_queue(self.config.queue_capacity);
        let session = Arc::new(Session {
            runtime: self.runtime.clone(),
            listener,
            queue,
            peer_queue_capacity: self.config.queue_capacity,
            relay_echo: self.config.relay_echo,
            peers: tokio::sync::Mutex::new(HashMap::new()),
            peer_count: AtomicUsize::new(0),
            stopping: AtomicBool::new(false),
            closed: Notify::new(),
        });

        let writer_task = self.runtime.spawn(broadcast(Arc::clone(&session), rx));
        let accept_task = self.runtime.spawn(accept_loop(Arc::clone(&session), socket));

        *self.running() = Some(RunningServer {
            session,
            local_addr,
            advertisement,
            accept_task,
            writer_task,
        });
        info!("server listening on {local_addr} as {}", descriptor.full_name());
        Ok(())
    }

    async fn stop(&self) {
        let Some(running) = self.running().take() else {
            return;
        };
        let RunningServer {
            session,
            local_addr,
            advertisement,
            mut accept_task,
            writer_task,
        } = running;

        session.stopping.store(true, Ordering::SeqCst);
        advertisement.withdraw();
        session.queue.shutdown().await;

        let grace = self.config.shutdown_grace;
        if tokio::time::timeout(grace, &mut accept_task).await.is_err() {
            warn!("peers still connected after {grace:?}, aborting their tasks");
            let had_peers = {
                let mut peers = session.peers.lock().await;
                let had_peers = !peers.is_empty();
                for (_, record) in peers.drain() {
                    record.reader.abort();
                    record.writer.abort();
                }
                session.peer_count.store(0, Ordering::SeqCst);
                had_peers
            };
            if had_peers {
                session.listener.disconnected();
            }
            writer_task.abort();
            session.closed.notify_one();
            if let Err(e) = accept_task.await {
                error!("server accept task failed: {e}");
            }
        }
        match writer_task.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => debug!("server broadcast task aborted"),
            Err(e) => error!("server broadcast task failed: {e}"),
        }
        info!("server on {local_addr} stopped");
    }

    fn is_running(&self) -> bool {
        self.running().is_some()
    }

    fn send(&self, payload: Vec<u8>) {
        let running = self.running();
        let Some(running) = running.as_ref() else {
            debug!("server not running, dropping {} byte payload", payload.len());
            return;
        };
        match running.session.queue.push(payload) {
            Ok(()) => {}
            Err(e @ QueueError::Full { .. }) => warn!("server send: {e}"),
            Err(e) => debug!("server send: {e}"),
        }
    }
}

// ── Tasks ─────────────────────────────────────────────────────────────────────

impl Session {
    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}

async fn accept_loop(session: Arc<Session>, socket: TcpListener) {
    loop {
        tokio::select! {
            _ = session.closed.notified() => break,
            accepted = socket.accept() => match accepted {
                Ok((stream, addr)) => admit(&session, stream, addr).await,
                Err(e) => {
                    warn!("accept failed: {e}");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            },
        }
    }
    debug!("server accept loop exiting");
    // `socket` drops here, closing the listening port.
}

async fn admit(session: &Arc<Session>, stream: TcpStream, addr: SocketAddr) {
    if session.is_stopping() {
        debug!("refusing {addr} during shutdown");
        return;
    }
    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay on {addr} failed: {e}");
    }
    let (read_half, write_half) = stream.into_split();
    let id = Uuid::new_v4();
    let (queue, rx) = outbound_queue(session.peer_queue_capacity);

    let count = {
        // Held while spawning so the reader cannot remove the record first.
        let mut peers = session.peers.lock().await;
        let writer = session.runtime.spawn(write_peer(addr, write_half, rx));
        let reader = session
            .runtime
            .spawn(read_peer(Arc::clone(session), id, addr, read_half));
        peers.insert(
            id,
            PeerRecord {
                addr,
                queue,
                writer: writer.abort_handle(),
                reader: reader.abort_handle(),
            },
        );
        session.peer_count.store(peers.len(), Ordering::SeqCst);
        peers.len()
    };

    info!("peer {addr} connected ({count} total)");
    if count == 1 {
        session.listener.connected();
    }
}

async fn read_peer(session: Arc<Session>, id: PeerId, addr: SocketAddr, mut read_half: OwnedReadHalf) {
    let result = read_frames(&mut read_half, |payload| {
        session.listener.data(payload.clone());
        if let Err(e) = session.queue.relay(payload, id) {
            warn!("not relaying payload from {addr}: {e}");
        }
    })
    .await;
    match result {
        Ok(()) => info!("peer {addr} closed the connection"),
        Err(e) => warn!("read from {addr} failed: {e}"),
    }

    let (record, remaining) = {
        let mut peers = session.peers.lock().await;
        let record = peers.remove(&id);
        session.peer_count.store(peers.len(), Ordering::SeqCst);
        (record, peers.len())
    };
    if let Some(record) = record {
        close_writer(&session, record.queue);
    }
    debug!("peer {addr} removed ({remaining} left)");

    if remaining == 0 {
        session.listener.disconnected();
        if session.is_stopping() {
            session.closed.notify_one();
        }
    }
}

async fn write_peer(addr: SocketAddr, write_half: OwnedWriteHalf, rx: OutboundReceiver) {
    match write_frames(write_half, rx).await {
        Ok(()) => debug!("writer for {addr} closed"),
        Err(e) => warn!("write to {addr} failed: {e}"),
    }
}

/// Queues the sentinel for one peer writer without waiting on it.
///
/// A writer stuck behind a peer that stopped reading holds a full queue;
/// the sentinel lands once it drains, or is dropped when the writer is
/// aborted.
fn close_writer(session: &Session, queue: OutboundQueue) {
    session.runtime.spawn(async move {
        queue.shutdown().await;
    });
}

/// Takes a copy of the peer queues so no lock is held while fanning out.
async fn peer_queues(session: &Session) -> Vec<(PeerId, SocketAddr, OutboundQueue)> {
    let peers = session.peers.lock().await;
    peers
        .iter()
        .map(|(id, record)| (*id, record.addr, record.queue.clone()))
        .collect()
}

async fn broadcast(session: Arc<Session>, mut rx: OutboundReceiver) {
    loop {
        match rx.recv().await {
            Outbound::Frame { payload, origin } => {
                for (id, addr, queue) in peer_queues(&session).await {
                    if !session.relay_echo && origin == Some(id) {
                        continue;
                    }
                    match queue.push(payload.clone()) {
                        Ok(()) => {}
                        Err(e @ QueueError::Full { .. }) => warn!("peer {addr} not keeping up: {e}"),
                        Err(e) => debug!("peer {addr}: {e}"),
                    }
                }
            }
            Outbound::Shutdown => {
                let queues = peer_queues(&session).await;
                if queues.is_empty() {
                    session.closed.notify_one();
                }
                debug!("server closing {} peer writer(s)", queues.len());
                for (_, _, queue) in queues {
                    close_writer(&session, queue);
                }
                return;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::role::{RoleEvent, RoleKind};
    use crate::infrastructure::network::discovery::NullAdvertiser;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::Instant;
    use ttc_core::encode_frame;

    fn loopback_server(relay_echo: bool) -> DiscoveryServer {
        let config = ServerConfig {
            host: "test-host".to_string(),
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            relay_echo,
            shutdown_grace: Duration::from_secs(1),
            ..ServerConfig::default()
        };
        DiscoveryServer::new(config, Arc::new(NullAdvertiser), Handle::current())
    }

    async fn read_one(stream: &mut TcpStream) -> Vec<u8> {
        let mut prefix = [0u8; 4];
        stream.read_exact(&mut prefix).await.unwrap();
        let mut payload = vec![0u8; u32::from_le_bytes(prefix) as usize];
        stream.read_exact(&mut payload).await.unwrap();
        payload
    }

    #[tokio::test]
    async fn test_start_twice_is_noop_and_stop_twice_is_noop() {
        // Arrange
        let server = loopback_server(true);
        let (listener, _rx) = RoleListener::channel(RoleKind::Server);

        // Act
        server.start(listener.clone()).await.unwrap();
        let addr = server.local_addr();
        server.start(listener).await.unwrap();

        // Assert
        assert!(server.is_running());
        assert_eq!(server.local_addr(), addr);
        server.stop().await;
        server.stop().await;
        assert!(!server.is_running());
        assert_eq!(server.local_addr(), None);
    }

    #[tokio::test]
    async fn test_first_peer_fires_connected_and_data_is_echoed() {
        // Arrange
        let server = loopback_server(true);
        let (listener, mut rx) = RoleListener::channel(RoleKind::Server);
        server.start(listener).await.unwrap();
        let addr = server.local_addr().unwrap();

        // Act
        let mut peer = TcpStream::connect(addr).await.unwrap();
        assert_eq!(rx.recv().await, Some(RoleEvent::Connected(RoleKind::Server)));
        peer.write_all(&encode_frame(b"ping").unwrap()).await.unwrap();

        // Assert: delivered locally and relayed back to the sender
        assert_eq!(rx.recv().await, Some(RoleEvent::Data(b"ping".to_vec())));
        assert_eq!(read_one(&mut peer).await, b"ping".to_vec());
        assert_eq!(server.peer_count(), 1);

        drop(peer);
        assert_eq!(
            rx.recv().await,
            Some(RoleEvent::Disconnected(RoleKind::Server))
        );
        server.stop().await;
    }

    #[tokio::test]
    async fn test_stop_closes_peer_connections() {
        // Arrange
        let server = loopback_server(true);
        let (listener, _rx) = RoleListener::channel(RoleKind::Server);
        server.start(listener).await.unwrap();
        let mut peer = TcpStream::connect(server.local_addr().unwrap()).await.unwrap();

        // Act: the peer hangs up as soon as it sees end-of-stream
        let hangup = tokio::spawn(async move {
            let mut rest = Vec::new();
            peer.read_to_end(&mut rest).await.unwrap();
            rest
        });
        while server.peer_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        server.stop().await;

        // Assert
        assert!(hangup.await.unwrap().is_empty());
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_stop_aborts_peer_that_neither_reads_nor_hangs_up() {
        // Arrange: a peer that connects and then ignores the socket
        let server = loopback_server(true);
        let (listener, mut rx) = RoleListener::channel(RoleKind::Server);
        server.start(listener).await.unwrap();
        let stalled = TcpStream::connect(server.local_addr().unwrap()).await.unwrap();
        assert_eq!(rx.recv().await, Some(RoleEvent::Connected(RoleKind::Server)));

        // Fill the socket buffers so the peer writer is stuck mid-write.
        for _ in 0..32 {
            server.send(vec![0x5a; 1024 * 1024]);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Act
        let started = Instant::now();
        let stopped = tokio::time::timeout(Duration::from_secs(5), server.stop()).await;

        // Assert: bounded by the 1s grace, not by the stalled peer
        assert!(stopped.is_ok(), "stop() hung on a stalled peer");
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!server.is_running());
        assert_eq!(server.peer_count(), 0);
        assert_eq!(
            rx.recv().await,
            Some(RoleEvent::Disconnected(RoleKind::Server))
        );
        drop(stalled);
    }

    #[tokio::test]
    async fn test_stalled_peer_does_not_block_other_peers() {
        // Arrange
        let server = loopback_server(true);
        let (listener, _rx) = RoleListener::channel(RoleKind::Server);
        server.start(listener).await.unwrap();
        let addr = server.local_addr().unwrap();
        let _stalled = TcpStream::connect(addr).await.unwrap();
        let mut healthy = TcpStream::connect(addr).await.unwrap();
        while server.peer_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        for _ in 0..32 {
            server.send(vec![0x5a; 1024 * 1024]);
        }

        // Act: the healthy peer drains everything, then a marker follows
        for _ in 0..32 {
            let payload = tokio::time::timeout(Duration::from_secs(5), read_one(&mut healthy))
                .await
                .expect("healthy peer starved by stalled peer");
            assert_eq!(payload.len(), 1024 * 1024);
        }
        server.send(b"marker".to_vec());

        // Assert
        let marker = tokio::time::timeout(Duration::from_secs(5), read_one(&mut healthy))
            .await
            .expect("marker not delivered");
        assert_eq!(marker, b"marker".to_vec());
        tokio::time::timeout(Duration::from_secs(5), server.stop())
            .await
            .expect("stop() hung");
    }
}
