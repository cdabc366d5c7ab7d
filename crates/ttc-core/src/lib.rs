//! # ttc-core
//!
//! Shared library for TTC nodes containing the wire frame codec, the bounded
//! outbound queue, and the pure role state table driven by the network
//! manager.
//!
//! This crate is used by every node binary.  It has no dependencies on
//! network sockets, service discovery, or hardware drivers.
//!
//! # Architecture overview (for beginners)
//!
//! A TTC node controls local actuators (servos, turnouts, GPIO) and talks to
//! exactly one peer on a small private network.  On boot it searches for a
//! peer advertising the TTC service; if nobody answers within a randomized
//! timeout it becomes the server itself so the next node to boot can find it.
//!
//! This crate (`ttc-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – How bytes travel over the network.  Every message is a
//!   4-byte little-endian length followed by the payload.  A zero length is
//!   reserved as the "close this connection" sentinel.
//!
//! - **`domain`** – Pure logic with no I/O: the state/trigger transition
//!   table of the network manager, the advertised service descriptor, and the
//!   jittered discovery timeout.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `ttc_core::ManagerState` instead of `ttc_core::domain::state::ManagerState`.
pub use domain::descriptor::{instance_name_for_host, PeerId, ServiceDescriptor};
pub use domain::state::{transition, Action, ManagerState, StateError, Transition, Trigger};
pub use domain::timeout::{discovery_timeout, jittered_timeout};
pub use protocol::frame::{decode_frame, encode_frame, parse_header, Frame, FrameError, FrameHeader};
pub use protocol::queue::{outbound_queue, Outbound, OutboundQueue, OutboundReceiver, QueueError};
