//! Service descriptor advertised by a node acting as server.
//!
//! The instance name is derived deterministically from the host name
//! (a UUID v3 in the DNS namespace), so a node advertises under the same name
//! every time it becomes a server and two hosts never collide.

use uuid::Uuid;

/// Opaque identifier for one accepted peer connection.
pub type PeerId = Uuid;

/// Service type browsed and advertised when none is configured.
pub const DEFAULT_SERVICE_TYPE: &str = "_ttc._tcp.local.";

/// TCP port the server listens on when none is configured.
pub const DEFAULT_PORT: u16 = 11111;

const INSTANCE_PREFIX: &str = "TTC-";

/// `{service type, instance name, port}` as seen by the discovery layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// DNS-SD service type, e.g. `_ttc._tcp.local.`.
    pub service_type: String,
    /// Instance label, unique per host.
    pub instance_name: String,
    /// Port of the listening TCP socket.
    pub port: u16,
}

impl ServiceDescriptor {
    /// Builds the descriptor for `host`, deriving the instance name from it.
    pub fn for_host(service_type: &str, host: &str, port: u16) -> Self {
        Self {
            service_type: service_type.to_string(),
            instance_name: instance_name_for_host(host),
            port,
        }
    }

    /// Fully qualified instance name (`<instance>.<service type>`).
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.instance_name, self.service_type)
    }
}

/// Returns the advertised instance name for `host`: `TTC-<uuid v3>`.
pub fn instance_name_for_host(host: &str) -> String {
    let id = Uuid::new_v3(&Uuid::NAMESPACE_DNS, host.as_bytes());
    format!("{INSTANCE_PREFIX}{id}")
}
