//! Authoritative vehicle state shared with every status poller.
//!
//! The link manager is the only writer; request handlers only ever take
//! snapshots.

use rcdrive_protocol::{Command, Direction, Speed};
use serde::Serialize;
use std::sync::RwLock;

/// Last successfully transmitted direction/speed plus link liveness
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VehicleState {
    pub direction: Direction,
    pub speed: Speed,
    pub connected: bool,
    /// Identifier of the port the link was opened on (empty if never connected)
    pub port: String,
}

impl VehicleState {
    pub fn new(initial_speed: Speed) -> Self {
        Self {
            direction: Direction::Stop,
            speed: initial_speed,
            connected: false,
            port: String::new(),
        }
    }
}

impl Default for VehicleState {
    fn default() -> Self {
        Self::new(Speed::default())
    }
}

/// Single-writer, many-reader store for [`VehicleState`]
#[derive(Debug, Default)]
pub struct VehicleStateStore {
    inner: RwLock<VehicleState>,
}

impl VehicleStateStore {
    pub fn new(initial: VehicleState) -> Self {
        Self {
            inner: RwLock::new(initial),
        }
    }

    pub fn snapshot(&self) -> VehicleState {
        self.inner.read().unwrap().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.read().unwrap().connected
    }

    /// Record a command that has been written to the link.
    ///
    /// Speed commands only touch `speed`, drive commands only touch `direction`.
    pub(crate) fn apply(&self, command: Command) {
        let mut state = self.inner.write().unwrap();
        match command {
            Command::Drive(direction) => state.direction = direction,
            Command::Speed(speed) => state.speed = speed,
        }
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.inner.write().unwrap().connected = connected;
    }

    /// Mark a freshly opened link on `port`
    pub(crate) fn set_link(&self, port: &str) {
        let mut state = self.inner.write().unwrap();
        state.connected = true;
        port.clone_into(&mut state.port);
    }
}
