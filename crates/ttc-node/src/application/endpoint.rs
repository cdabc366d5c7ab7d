//! Endpoints: consumers of inbound payloads.
//!
//! An endpoint stands in for the hardware-control layer (servo, turnout,
//! GPIO drivers) that lives outside this crate.  The network manager hands
//! every payload received by the active role to each endpoint, in the order
//! the endpoints were registered.

use std::fmt;
use std::sync::Arc;

/// Consumer of inbound payloads.
#[cfg_attr(test, mockall::automock)]
pub trait Endpoint: Send + Sync {
    /// Called once per inbound payload.
    fn on_data(&self, payload: &[u8]);
}

/// Adapts a closure into an [`Endpoint`].
pub struct FnEndpoint<F>(pub F);

impl<F> Endpoint for FnEndpoint<F>
where
    F: Fn(&[u8]) + Send + Sync,
{
    fn on_data(&self, payload: &[u8]) {
        (self.0)(payload)
    }
}

/// Ordered, immutable collection of endpoints.
#[derive(Clone, Default)]
pub struct EndpointSet {
    endpoints: Vec<Arc<dyn Endpoint>>,
}

impl EndpointSet {
    pub fn new(endpoints: Vec<Arc<dyn Endpoint>>) -> Self {
        Self { endpoints }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Delivers `payload` to every endpoint in registration order.
    pub fn dispatch(&self, payload: &[u8]) {
        for endpoint in &self.endpoints {
            endpoint.on_data(payload);
        }
    }
}

impl fmt::Debug for EndpointSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointSet")
            .field("len", &self.endpoints.len())
            .finish()
    }
}
