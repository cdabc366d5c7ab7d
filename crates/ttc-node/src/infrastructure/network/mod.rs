//! Network infrastructure: framed TCP transport, service discovery, and the
//! two role implementations built on them.
//!
//! - [`transport`] – reader/writer loops for length-prefixed frames.
//! - [`discovery`] – browse/advertise seams with mDNS and static backends.
//! - [`client`] – [`DiscoveryClient`], which finds a server and connects.
//! - [`server`] – [`DiscoveryServer`], which advertises, accepts, and relays.
//! - [`mock`] – [`MockRole`] for exercising the manager without sockets.

pub mod client;
pub mod discovery;
pub mod mock;
pub mod server;
pub mod transport;

pub use client::{ClientConfig, DiscoveryClient};
pub use discovery::{
    CombinedBrowser, DiscoveredService, DiscoveryError, MdnsAdvertiser, MdnsBrowser, NullAdvertiser,
    ServiceAdvertiser, ServiceBrowser, StaticBrowser,
};
pub use mock::MockRole;
pub use server::{DiscoveryServer, ServerConfig};
pub use transport::TransportError;
