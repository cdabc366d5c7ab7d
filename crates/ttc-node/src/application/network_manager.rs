//! The network manager: decides which role runs and routes inbound data.
//!
//! # How it works (for beginners)
//!
//! The manager is a small state machine (`ttc_core::domain::state`) driven
//! by a single background task, the *executor*.  Everything that can change
//! the state arrives at that task through one `select!` loop:
//!
//! ```text
//!   NetworkManager::search()/shutdown()/send() ──► command channel ─┐
//!   RoleListener (client/server callbacks)     ──► event channel   ─┼─► executor
//!   discovery deadline (armed on StartClient)  ──► sleep_until      ─┘
//! ```
//!
//! Because only the executor touches the roles and the state, transitions
//! never interleave.  The current state is published on a `watch` channel so
//! callers can read it cheaply or wait for a change.
//!
//! Role switch discipline: before a role is started every running role is
//! stopped, so at most one role is ever active.
//!
//! Dropping the [`NetworkManager`] closes the command channel; the executor
//! then stops every role and exits.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use ttc_core::domain::timeout::DEFAULT_DISCOVERY_TIMEOUT;
use ttc_core::{discovery_timeout, transition, Action, ManagerState, StateError, Trigger};

use crate::application::endpoint::{Endpoint, EndpointSet};
use crate::application::role::{Role, RoleEvent, RoleKind, RoleListener};

/// Capacity of the command channel between handles and the executor.
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Errors returned by [`NetworkManager`] operations.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// The builder was not given a client role.
    #[error("a client role is required")]
    MissingClientRole,

    /// The builder was not given any endpoint.
    #[error("at least one endpoint is required")]
    NoEndpoints,

    /// Discovery timed out but there is no server role to fall back to.
    #[error("discovery timed out and no server role is configured")]
    NoServerRole,

    /// `send` was called outside the `Connected` state.
    #[error("cannot send while {state}")]
    NotConnected { state: ManagerState },

    /// `send` was called with an empty payload.
    #[error("cannot send an empty payload")]
    EmptyPayload,

    /// The trigger is not valid in the current state.
    #[error(transparent)]
    InvalidTransition(#[from] StateError),

    /// The executor task is gone.
    #[error("network manager has stopped")]
    ManagerStopped,
}

/// Builder for [`NetworkManager`].
pub struct NetworkManagerBuilder {
    client: Option<Arc<dyn Role>>,
    server: Option<Arc<dyn Role>>,
    endpoints: Vec<Arc<dyn Endpoint>>,
    discovery_timeout: Duration,
    randomize_timeout: bool,
}

impl Default for NetworkManagerBuilder {
    fn default() -> Self {
        Self {
            client: None,
            server: None,
            endpoints: Vec::new(),
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            randomize_timeout: true,
        }
    }
}

impl NetworkManagerBuilder {
    /// Sets the client role (required).
    pub fn client(mut self, role: Arc<dyn Role>) -> Self {
        self.client = Some(role);
        self
    }

    /// Sets the server role.  Without one the node stays a client forever.
    pub fn server(mut self, role: Arc<dyn Role>) -> Self {
        self.server = Some(role);
        self
    }

    /// Adds an endpoint; endpoints receive data in the order they are added.
    pub fn endpoint(mut self, endpoint: Arc<dyn Endpoint>) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Base discovery timeout (default 10 s).
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Whether to apply ±25% jitter to the timeout (default `true`).
    pub fn randomize_timeout(mut self, randomize: bool) -> Self {
        self.randomize_timeout = randomize;
        self
    }

    /// Validates the configuration and spawns the executor on `runtime`.
    ///
    /// The manager starts in [`ManagerState::Initializing`] with every role
    /// stopped.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::MissingClientRole`] or
    /// [`NetworkError::NoEndpoints`].
    pub fn spawn(self, runtime: &Handle) -> Result<NetworkManager, NetworkError> {
        let client = self.client.ok_or(NetworkError::MissingClientRole)?;
        if self.endpoints.is_empty() {
            return Err(NetworkError::NoEndpoints);
        }

        let timeout = discovery_timeout(self.discovery_timeout, self.randomize_timeout);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ManagerState::Initializing);

        let executor = Executor {
            state: ManagerState::Initializing,
            client,
            server: self.server,
            active: None,
            endpoints: EndpointSet::new(self.endpoints),
            discovery_timeout: timeout,
            deadline: None,
            event_tx,
            state_tx,
        };
        runtime.spawn(executor.run(command_rx, event_rx));

        info!("network manager ready, discovery timeout {timeout:?}");
        Ok(NetworkManager {
            commands: command_tx,
            state: state_rx,
            discovery_timeout: timeout,
        })
    }
}

/// Handle to the network manager executor.
pub struct NetworkManager {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ManagerState>,
    discovery_timeout: Duration,
}

impl NetworkManager {
    pub fn builder() -> NetworkManagerBuilder {
        NetworkManagerBuilder::default()
    }

    /// The state after the last completed transition.
    pub fn state(&self) -> ManagerState {
        *self.state.borrow()
    }

    /// A receiver that observes every published state.
    pub fn subscribe(&self) -> watch::Receiver<ManagerState> {
        self.state.clone()
    }

    /// The effective discovery timeout (jitter already applied).
    pub fn discovery_timeout(&self) -> Duration {
        self.discovery_timeout
    }

    /// Starts client-first discovery.  Returns once the client is started.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::InvalidTransition`] outside `Initializing`.
    pub async fn search(&self) -> Result<(), NetworkError> {
        self.fire(Trigger::Search).await
    }

    /// Stops every role and returns to `Initializing`.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::ManagerStopped`] if the executor is gone.
    pub async fn shutdown(&self) -> Result<(), NetworkError> {
        self.fire(Trigger::Shutdown).await
    }

    /// Hands `payload` to the active role.  Only valid while `Connected`.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::EmptyPayload`] or
    /// [`NetworkError::NotConnected`].
    pub async fn send(&self, payload: Vec<u8>) -> Result<(), NetworkError> {
        if payload.is_empty() {
            return Err(NetworkError::EmptyPayload);
        }
        let (reply, rx) = oneshot::channel();
        self.request(Command::Send { payload, reply }, rx).await
    }

    async fn fire(&self, trigger: Trigger) -> Result<(), NetworkError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Fire { trigger, reply }, rx).await
    }

    async fn request(
        &self,
        command: Command,
        rx: oneshot::Receiver<Result<(), NetworkError>>,
    ) -> Result<(), NetworkError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| NetworkError::ManagerStopped)?;
        rx.await.map_err(|_| NetworkError::ManagerStopped)?
    }
}

// ── Executor ──────────────────────────────────────────────────────────────────

enum Command {
    Fire {
        trigger: Trigger,
        reply: oneshot::Sender<Result<(), NetworkError>>,
    },
    Send {
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<(), NetworkError>>,
    },
}

struct Executor {
    state: ManagerState,
    client: Arc<dyn Role>,
    server: Option<Arc<dyn Role>>,
    active: Option<RoleKind>,
    endpoints: EndpointSet,
    discovery_timeout: Duration,
    deadline: Option<Instant>,
    event_tx: mpsc::UnboundedSender<RoleEvent>,
    state_tx: watch::Sender<ManagerState>,
}

impl Executor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<RoleEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Fire { trigger, reply }) => {
                        let result = self.fire(trigger, &mut events).await;
                        let _ = reply.send(result.map_err(NetworkError::from));
                    }
                    Some(Command::Send { payload, reply }) => {
                        let _ = reply.send(self.send(payload));
                    }
                    None => break,
                },
                Some(event) = events.recv() => self.handle_event(event, &mut events).await,
                _ = wait_deadline(self.deadline) => {
                    self.deadline = None;
                    if let Err(e) = self.fire(Trigger::DiscoveryTimeout, &mut events).await {
                        debug!("ignoring discovery timeout: {e}");
                    }
                }
            }
        }

        debug!("network manager handle dropped, stopping roles");
        self.stop_all().await;
        self.state = ManagerState::Initializing;
        self.state_tx.send_replace(self.state);
    }

    async fn handle_event(
        &mut self,
        event: RoleEvent,
        events: &mut mpsc::UnboundedReceiver<RoleEvent>,
    ) {
        let (trigger, kind) = match event {
            RoleEvent::Data(payload) => {
                self.endpoints.dispatch(&payload);
                return;
            }
            RoleEvent::Connected(kind) => (Trigger::Connected, kind),
            RoleEvent::Disconnected(kind) => (Trigger::Disconnected, kind),
        };
        if let Err(e) = self.fire(trigger, events).await {
            debug!("ignoring {kind} event: {e}");
        }
    }

    /// Applies one transition and performs its action.
    async fn fire(
        &mut self,
        trigger: Trigger,
        events: &mut mpsc::UnboundedReceiver<RoleEvent>,
    ) -> Result<(), StateError> {
        let t = transition(self.state, trigger)?;
        info!("network manager: {} --{trigger}--> {}", t.from, t.to);

        match t.action {
            Action::None => {}
            Action::StopAllRoles => {
                self.deadline = None;
                self.stop_all().await;
            }
            Action::StartClient => {
                self.switch_to(RoleKind::Client, events).await;
                self.deadline = Some(Instant::now() + self.discovery_timeout);
            }
            Action::StartServer => {
                self.deadline = None;
                if self.server.is_some() {
                    self.switch_to(RoleKind::Server, events).await;
                } else {
                    error!("{}", NetworkError::NoServerRole);
                }
            }
        }
        if t.to == ManagerState::Connected {
            self.deadline = None;
        }

        self.state = t.to;
        self.state_tx.send_replace(self.state);
        Ok(())
    }

    /// Stops every role, discards their pending events, and starts `kind`.
    async fn switch_to(&mut self, kind: RoleKind, events: &mut mpsc::UnboundedReceiver<RoleEvent>) {
        self.stop_all().await;
        // Events still queued from the stopped roles describe connections
        // that no longer exist.
        while events.try_recv().is_ok() {}

        let role = match kind {
            RoleKind::Client => Arc::clone(&self.client),
            RoleKind::Server => match &self.server {
                Some(server) => Arc::clone(server),
                None => return,
            },
        };
        let listener = RoleListener::new(kind, self.event_tx.clone());
        match role.start(listener).await {
            Ok(()) => self.active = Some(kind),
            Err(e) => error!("failed to start {kind} role: {e}"),
        }
    }

    async fn stop_all(&mut self) {
        if self.client.is_running() {
            self.client.stop().await;
        }
        if let Some(server) = &self.server {
            if server.is_running() {
                server.stop().await;
            }
        }
        self.active = None;
    }

    fn send(&self, payload: Vec<u8>) -> Result<(), NetworkError> {
        if self.state != ManagerState::Connected {
            return Err(NetworkError::NotConnected { state: self.state });
        }
        let role = match self.active {
            Some(RoleKind::Client) => Some(&self.client),
            Some(RoleKind::Server) => self.server.as_ref(),
            None => None,
        };
        match role {
            Some(role) => {
                role.send(payload);
                Ok(())
            }
            None => {
                warn!("connected without an active role");
                Err(NetworkError::NotConnected { state: self.state })
            }
        }
    }
}

/// Resolves at `deadline`, or never when no deadline is armed.
async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
