//! The role capability consumed by the network manager.
//!
//! A *role* is either the discovery client or the discovery server.  The
//! manager never looks inside a role: it starts it, stops it, asks whether it
//! is running, and hands it payloads to send.  Roles report back through a
//! [`RoleListener`], which turns the connected/disconnected/data hooks into
//! typed [`RoleEvent`]s on a channel drained by the manager task.
//!
//! Posting to the listener never blocks and never calls back into the
//! manager, so a role may report events from inside its own `stop()` without
//! deadlocking the caller.

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Which of the two roles produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleKind {
    Client,
    Server,
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleKind::Client => f.write_str("client"),
            RoleKind::Server => f.write_str("server"),
        }
    }
}

/// Event reported by a role to whoever started it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleEvent {
    /// The role has a live peer.
    Connected(RoleKind),
    /// The role lost its (last) peer.
    Disconnected(RoleKind),
    /// A payload arrived from a peer.
    Data(Vec<u8>),
}

/// Errors a role can report from `start`.
#[derive(Debug, Error)]
pub enum RoleError {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// Service discovery could not be started.
    #[error("service discovery unavailable: {0}")]
    Discovery(String),
}

/// Sink for the connected/disconnected/data notifications of one role.
#[derive(Debug, Clone)]
pub struct RoleListener {
    kind: RoleKind,
    tx: mpsc::UnboundedSender<RoleEvent>,
}

impl RoleListener {
    /// Wraps an existing event channel.
    pub fn new(kind: RoleKind, tx: mpsc::UnboundedSender<RoleEvent>) -> Self {
        Self { kind, tx }
    }

    /// Creates a listener together with the receiver its events arrive on.
    pub fn channel(kind: RoleKind) -> (Self, mpsc::UnboundedReceiver<RoleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(kind, tx), rx)
    }

    /// The role this listener reports for.
    pub fn kind(&self) -> RoleKind {
        self.kind
    }

    pub fn connected(&self) {
        self.post(RoleEvent::Connected(self.kind));
    }

    pub fn disconnected(&self) {
        self.post(RoleEvent::Disconnected(self.kind));
    }

    pub fn data(&self, payload: Vec<u8>) {
        self.post(RoleEvent::Data(payload));
    }

    fn post(&self, event: RoleEvent) {
        // A closed channel means the receiver is gone (manager shut down);
        // there is nobody left to tell.
        let _ = self.tx.send(event);
    }
}

/// Start/stop/query/send capability implemented by the client and server.
#[async_trait]
pub trait Role: Send + Sync {
    /// Starts the role.  Calling `start` on a running role is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RoleError`] if sockets or service discovery cannot be set up.
    async fn start(&self, listener: RoleListener) -> Result<(), RoleError>;

    /// Stops the role and waits until its connections are torn down.
    /// Calling `stop` on a stopped role is a no-op.
    async fn stop(&self);

    /// Returns `true` while the role is discovering or connected.
    fn is_running(&self) -> bool;

    /// Enqueues a payload for the peer(s) without blocking.
    fn send(&self, payload: Vec<u8>);
}
