//! Discovery client role: browse for a server, connect, exchange frames.
//!
//! # Lifecycle (for beginners)
//!
//! ```text
//!  start ──► browsing ──service found──► connect ──ok──► connected
//!               ▲                           │               │
//!               │                        refused            │ peer closed
//!               │◄──────────────────────────┘               │ (or stop)
//!               └───────────────────────────────────────────┘
//! ```
//!
//! 1. `start` opens a browse session and spawns the *session task*.
//! 2. The session task waits for a [`DiscoveredService`] and tries its
//!    addresses (IPv4 first).  Failures are logged and browsing continues.
//! 3. On the first successful connect the browse session is stopped, the
//!    listener is told `connected`, and a reader task and a writer task are
//!    spawned for the socket.
//! 4. When both tasks finish the connection is dropped, the listener is told
//!    `disconnected`, and browsing restarts, unless `stop` caused the
//!    disconnect.  If the browser refuses to restart, the session task
//!    retries every [`BROWSE_RETRY_DELAY`] until it succeeds or `stop` is
//!    called.
//!
//! `stop` cancels browsing first, then pushes the shutdown sentinel into the
//! outbound queue so the writer closes the socket, and finally waits for the
//! session task to exit.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use ttc_core::domain::descriptor::DEFAULT_SERVICE_TYPE;
use ttc_core::protocol::queue::DEFAULT_QUEUE_CAPACITY;
use ttc_core::{outbound_queue, OutboundQueue, OutboundReceiver, QueueError};

use crate::application::role::{Role, RoleError, RoleListener};
use crate::infrastructure::network::discovery::{BrowseSession, DiscoveredService, ServiceBrowser};
use crate::infrastructure::network::transport::{read_frames, write_frames};

/// Upper bound for one TCP connect attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// How long the reader may outlive the writer before it is aborted.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Pause between attempts to reopen a browse session that failed to start.
pub const BROWSE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Service type to browse for.
    pub service_type: String,
    /// Outbound queue capacity per connection.
    pub queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_type: DEFAULT_SERVICE_TYPE.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// The client role.  Cheap to share behind an `Arc<dyn Role>`.
pub struct DiscoveryClient {
    shared: Arc<ClientShared>,
}

struct ClientShared {
    config: ClientConfig,
    browser: Arc<dyn ServiceBrowser>,
    runtime: Handle,
    state: Mutex<ClientState>,
    stopping: AtomicBool,
}

#[derive(Default)]
struct ClientState {
    browse: Option<Box<dyn BrowseSession>>,
    found_tx: Option<mpsc::UnboundedSender<DiscoveredService>>,
    connection: Option<ActiveConnection>,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

struct ActiveConnection {
    queue: OutboundQueue,
    peer: SocketAddr,
}

impl DiscoveryClient {
    pub fn new(config: ClientConfig, browser: Arc<dyn ServiceBrowser>, runtime: Handle) -> Self {
        Self {
            shared: Arc::new(ClientShared {
                config,
                browser,
                runtime,
                state: Mutex::new(ClientState::default()),
                stopping: AtomicBool::new(false),
            }),
        }
    }

    /// Returns `true` while a browse session is open.
    pub fn is_browsing(&self) -> bool {
        self.shared.state().browse.is_some()
    }

    /// Returns `true` while a server connection is established.
    pub fn is_connected(&self) -> bool {
        self.shared.state().connection.is_some()
    }

    /// Address of the connected server, if any.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.state().connection.as_ref().map(|c| c.peer)
    }
}

impl ClientShared {
    fn state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Opens a fresh browse session; the caller holds the state lock.
    fn begin_browse(&self, state: &mut ClientState) -> Result<(), RoleError> {
        let Some(found_tx) = state.found_tx.clone() else {
            return Ok(());
        };
        let session = self
            .browser
            .browse(&self.config.service_type, found_tx)
            .map_err(|e| RoleError::Discovery(e.to_string()))?;
        state.browse = Some(session);
        debug!("client browsing for {}", self.config.service_type);
        Ok(())
    }
}

#[async_trait]
impl Role for DiscoveryClient {
    async fn start(&self, listener: RoleListener) -> Result<(), RoleError> {
        let mut state = self.shared.state();
        if state.task.is_some() {
            return Ok(());
        }

        let (found_tx, found_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        state.found_tx = Some(found_tx);
        if let Err(e) = self.shared.begin_browse(&mut state) {
            state.found_tx = None;
            return Err(e);
        }

        let shared = Arc::clone(&self.shared);
        state.stop_tx = Some(stop_tx);
        state.task = Some(
            self.shared
                .runtime
                .spawn(run_session(shared, listener, found_rx, stop_rx)),
        );
        info!("client started");
        Ok(())
    }

    async fn stop(&self) {
        let (task, browse, queue) = {
            let mut state = self.shared.state();
            let Some(task) = state.task.take() else {
                return;
            };
            self.shared.stopping.store(true, Ordering::SeqCst);
            if let Some(stop_tx) = state.stop_tx.take() {
                let _ = stop_tx.send(true);
            }
            state.found_tx = None;
            (
                task,
                state.browse.take(),
                state.connection.as_ref().map(|c| c.queue.clone()),
            )
        };

        if let Some(browse) = browse {
            browse.stop();
        }
        if let Some(queue) = queue {
            queue.shutdown().await;
        }
        if let Err(e) = task.await {
            error!("client session task failed: {e}");
        }

        self.shared.stopping.store(false, Ordering::SeqCst);
        info!("client stopped");
    }

    fn is_running(&self) -> bool {
        self.shared.state().task.is_some()
    }

    fn send(&self, payload: Vec<u8>) {
        let state = self.shared.state();
        let Some(connection) = state.connection.as_ref() else {
            debug!("client not connected, dropping {} byte payload", payload.len());
            return;
        };
        match connection.queue.push(payload) {
            Ok(()) => {}
            Err(e @ QueueError::Full { .. }) => warn!("client send: {e}"),
            Err(e) => debug!("client send: {e}"),
        }
    }
}

// ── Session task ──────────────────────────────────────────────────────────────

async fn run_session(
    shared: Arc<ClientShared>,
    listener: RoleListener,
    mut found: mpsc::UnboundedReceiver<DiscoveredService>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let service = tokio::select! {
            _ = stop.changed() => break,
            next = found.recv() => match next {
                Some(service) => service,
                None => break,
            },
        };
        if shared.is_stopping() {
            break;
        }

        let Some((stream, peer)) = connect_any(&service).await else {
            continue;
        };

        let (queue, rx) = outbound_queue(shared.config.queue_capacity);
        {
            let mut state = shared.state();
            if shared.is_stopping() {
                break;
            }
            if let Some(browse) = state.browse.take() {
                browse.stop();
            }
            state.connection = Some(ActiveConnection {
                queue: queue.clone(),
                peer,
            });
        }
        // Anything announced before the browse stopped is stale now.
        while found.try_recv().is_ok() {}

        info!("client connected to {peer}");
        listener.connected();

        run_connection(&shared, stream, peer, queue, rx, listener.clone()).await;

        let rebrowse = {
            let mut state = shared.state();
            state.connection = None;
            if shared.is_stopping() {
                Ok(())
            } else {
                shared.begin_browse(&mut state)
            }
        };
        info!("client disconnected from {peer}");
        listener.disconnected();

        if let Err(e) = rebrowse {
            error!("client could not restart discovery: {e}");
            if !retry_browse(&shared, &mut stop).await {
                break;
            }
        }
    }
    debug!("client session task exiting");
}

/// Reopens the browse session until it succeeds.
///
/// Returns `false` if `stop` was called first.
async fn retry_browse(shared: &ClientShared, stop: &mut watch::Receiver<bool>) -> bool {
    loop {
        tokio::select! {
            _ = stop.changed() => return false,
            _ = tokio::time::sleep(BROWSE_RETRY_DELAY) => {}
        }
        let mut state = shared.state();
        if shared.is_stopping() {
            return false;
        }
        match shared.begin_browse(&mut state) {
            Ok(()) => {
                info!("client discovery restarted");
                return true;
            }
            Err(e) => warn!("client discovery still unavailable: {e}"),
        }
    }
}

/// Tries every address of `service`, returning the first live connection.
async fn connect_any(service: &DiscoveredService) -> Option<(TcpStream, SocketAddr)> {
    for addr in service.socket_addrs() {
        match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("set_nodelay on {addr} failed: {e}");
                }
                return Some((stream, addr));
            }
            Ok(Err(e)) => debug!("connect to {} at {addr} failed: {e}", service.name),
            Err(_) => debug!("connect to {} at {addr} timed out", service.name),
        }
    }
    None
}

/// Runs the reader and writer for one connection until both are done.
async fn run_connection(
    shared: &Arc<ClientShared>,
    stream: TcpStream,
    peer: SocketAddr,
    queue: OutboundQueue,
    rx: OutboundReceiver,
    listener: RoleListener,
) {
    let (mut read_half, write_half) = stream.into_split();

    let writer = shared.runtime.spawn(write_frames(write_half, rx));

    let reader_shared = Arc::clone(shared);
    let mut reader = shared.runtime.spawn(async move {
        match read_frames(&mut read_half, |payload| listener.data(payload)).await {
            Ok(()) => info!("server {peer} closed the connection"),
            Err(e) => warn!("read from {peer} failed: {e}"),
        }
        // Remote close: wake the writer so the socket is torn down too.
        if !reader_shared.is_stopping() {
            queue.shutdown().await;
        }
    });

    match writer.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("write to {peer} failed: {e}"),
        Err(e) => error!("client writer task failed: {e}"),
    }
    if tokio::time::timeout(READER_GRACE, &mut reader).await.is_err() {
        debug!("reader for {peer} still running after writer exit, aborting");
        reader.abort();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
