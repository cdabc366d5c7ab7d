//! Application layer of the node.
//!
//! # What lives here (for beginners)
//!
//! This layer decides *what* the node does and depends only on traits:
//!
//! - **`role`** – The [`role::Role`] capability (start, stop, query, send)
//!   that both the discovery client and the discovery server implement, and
//!   the [`role::RoleListener`] they report events through.
//!
//! - **`endpoint`** – Consumers of inbound payloads.  In a layout these are
//!   the servo and turnout drivers; here they are anything implementing
//!   [`endpoint::Endpoint`].
//!
//! - **`network_manager`** – The state machine that runs the client first,
//!   falls back to the server after the discovery timeout, and routes data
//!   to the endpoints.
//!
//! Sockets, mDNS, and files are in `infrastructure`; nothing here touches
//! them directly.

pub mod endpoint;
pub mod network_manager;
pub mod role;

pub use endpoint::{Endpoint, EndpointSet, FnEndpoint};
pub use network_manager::{NetworkError, NetworkManager, NetworkManagerBuilder};
pub use role::{Role, RoleError, RoleEvent, RoleKind, RoleListener};
