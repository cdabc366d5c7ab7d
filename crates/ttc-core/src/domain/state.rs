//! States, triggers, and the transition table of the network manager.
//!
//! # Lifecycle (for beginners)
//!
//! ```text
//!                 search                connected
//! Initializing ──────────► Searching ─────────────► Connected
//!      ▲                    │    ▲                      │
//!      │  shutdown (any)    │    └──────────────────────┘
//!      └────────────────────┘           disconnected
//!
//!                 Searching ──discovery timeout──► Searching (server role)
//! ```
//!
//! - `Initializing`: no role is running.
//! - `Searching`: the client role browses for a peer.  If the discovery
//!   timeout expires first, the manager switches to the server role and
//!   waits for a peer to find it.
//! - `Connected`: the active role has a live peer; `send` is allowed.
//!
//! The table is pure data.  The executor in `ttc-node` looks up each trigger
//! here and then performs the returned [`Action`].

use std::fmt;

use thiserror::Error;

/// Current state of the network manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerState {
    /// Initial state; every role is stopped.
    Initializing,
    /// Looking for a peer (client role) or waiting to be found (server role).
    Searching,
    /// A peer is connected through the active role.
    Connected,
}

/// Events that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Begin client-first discovery.
    Search,
    /// The active role reports a live peer.
    Connected,
    /// The active role lost its peer.
    Disconnected,
    /// Stop every role and return to `Initializing`.
    Shutdown,
    /// No peer was found within the discovery timeout.
    DiscoveryTimeout,
}

/// Side effect performed when a transition fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing beyond the state change.
    None,
    /// Stop every running role.
    StopAllRoles,
    /// Stop every role, start the client role, and arm the discovery timer.
    StartClient,
    /// Stop every role and start the server role.
    StartServer,
}

/// A resolved row of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ManagerState,
    pub to: ManagerState,
    pub action: Action,
}

/// Error returned for a trigger that is not valid in the current state.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("trigger {trigger} is not valid in state {state}")]
pub struct StateError {
    pub state: ManagerState,
    pub trigger: Trigger,
}

/// `(source, trigger, destination, action)`; a `None` source matches any state.
const TABLE: &[(Option<ManagerState>, Trigger, ManagerState, Action)] = &[
    (
        Some(ManagerState::Initializing),
        Trigger::Search,
        ManagerState::Searching,
        Action::StartClient,
    ),
    (
        Some(ManagerState::Searching),
        Trigger::DiscoveryTimeout,
        ManagerState::Searching,
        Action::StartServer,
    ),
    (
        Some(ManagerState::Searching),
        Trigger::Connected,
        ManagerState::Connected,
        Action::None,
    ),
    (
        Some(ManagerState::Connected),
        Trigger::Disconnected,
        ManagerState::Searching,
        Action::StartClient,
    ),
    (
        None,
        Trigger::Shutdown,
        ManagerState::Initializing,
        Action::StopAllRoles,
    ),
];

/// Looks up the transition for `trigger` in `state`.
///
/// # Errors
///
/// Returns [`StateError`] when the table has no row for the pair.
///
/// # Examples
///
/// ```rust
/// use ttc_core::{transition, Action, ManagerState, Trigger};
///
/// let t = transition(ManagerState::Initializing, Trigger::Search).unwrap();
/// assert_eq!(t.to, ManagerState::Searching);
/// assert_eq!(t.action, Action::StartClient);
/// ```
pub fn transition(state: ManagerState, trigger: Trigger) -> Result<Transition, StateError> {
    TABLE
        .iter()
        .find(|(source, t, _, _)| *t == trigger && source.map_or(true, |s| s == state))
        .map(|&(_, _, to, action)| Transition {
            from: state,
            to,
            action,
        })
        .ok_or(StateError { state, trigger })
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ManagerState::Initializing => "initializing",
            ManagerState::Searching => "searching",
            ManagerState::Connected => "connected",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Trigger::Search => "search",
            Trigger::Connected => "connected",
            Trigger::Disconnected => "disconnected",
            Trigger::Shutdown => "shutdown",
            Trigger::DiscoveryTimeout => "discovery-timeout",
        };
        f.write_str(name)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
