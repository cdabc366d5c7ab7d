//! Mock role for testing the network manager without sockets.
//!
//! Tests drive the manager by firing the events a real role would report
//! (`fire_connected`, `fire_disconnected`, `fire_data`) and inspect how the
//! manager drove the role (`is_running`, `start_count`, `sent`).

use std::sync::Mutex;

use async_trait::async_trait;

use crate::application::role::{Role, RoleError, RoleListener};

/// A hand-written [`Role`] double.
pub struct MockRole {
    state: Mutex<MockState>,
    loopback: bool,
}

#[derive(Default)]
struct MockState {
    listener: Option<RoleListener>,
    running: bool,
    starts: u32,
    stops: u32,
    sent: Vec<Vec<u8>>,
}

impl MockRole {
    /// Creates a stopped mock that records sent payloads.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            loopback: false,
        }
    }

    /// Creates a mock whose `send` reports the payload straight back as
    /// received data, like a peer that echoes everything.
    pub fn with_loopback() -> Self {
        Self {
            loopback: true,
            ..Self::new()
        }
    }

    /// Reports `connected` through the listener given to the last `start`.
    ///
    /// Panics if the role was never started.
    pub fn fire_connected(&self) {
        self.listener().connected();
    }

    /// Reports `disconnected` through the listener given to the last `start`.
    pub fn fire_disconnected(&self) {
        self.listener().disconnected();
    }

    /// Reports an inbound payload.
    pub fn fire_data(&self, payload: &[u8]) {
        self.listener().data(payload.to_vec());
    }

    /// Number of effective starts (stopped → running).
    pub fn start_count(&self) -> u32 {
        self.state.lock().expect("lock poisoned").starts
    }

    /// Number of effective stops (running → stopped).
    pub fn stop_count(&self) -> u32 {
        self.state.lock().expect("lock poisoned").stops
    }

    /// Payloads passed to `send`, in order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.lock().expect("lock poisoned").sent.clone()
    }

    fn listener(&self) -> RoleListener {
        self.state
            .lock()
            .expect("lock poisoned")
            .listener
            .clone()
            .expect("MockRole event fired before start()")
    }
}

impl Default for MockRole {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Role for MockRole {
    async fn start(&self, listener: RoleListener) -> Result<(), RoleError> {
        let mut state = self.state.lock().expect("lock poisoned");
        if !state.running {
            state.running = true;
            state.starts += 1;
        }
        state.listener = Some(listener);
        Ok(())
    }

    async fn stop(&self) {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.running {
            state.running = false;
            state.stops += 1;
        }
    }

    fn is_running(&self) -> bool {
        self.state.lock().expect("lock poisoned").running
    }

    fn send(&self, payload: Vec<u8>) {
        let mut state = self.state.lock().expect("lock poisoned");
        if self.loopback {
            if let Some(listener) = &state.listener {
                listener.data(payload.clone());
            }
        }
        state.sent.push(payload);
    }
}
