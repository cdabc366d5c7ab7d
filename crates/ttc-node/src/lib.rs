//! # ttc-node
//!
//! Networking for a turnout-controller node on a model-railway layout.
//!
//! # How nodes find each other (for beginners)
//!
//! Every node runs the same program.  On start it acts as a *client* and
//! browses the LAN for a node that is already serving.  If none answers
//! within the discovery timeout (10 s ± 25% jitter) it becomes the *server*
//! itself and advertises, so the next node to power up finds it.  Payloads
//! received by whichever role is active are handed to the registered
//! endpoints; the server also relays every payload to all connected peers.
//!
//! ```text
//!   node A (server) ◄──── TCP, length-prefixed frames ────► node B (client)
//!         ▲                                                 node C (client)
//!         └── advertises _ttc._tcp.local. via mDNS
//! ```
//!
//! # Layout
//!
//! - **`application`** – the role contract, endpoints, and the
//!   [`NetworkManager`](application::NetworkManager) state machine.
//! - **`infrastructure`** – the TCP client/server roles, mDNS and static
//!   discovery, and the TOML configuration.
//!
//! The wire codec, transition table, and timeout jitter are socket-free and
//! live in `ttc-core`.

pub mod application;
pub mod infrastructure;
