//! In-memory transport for exercising the link manager without hardware.

use std::io;
use std::sync::{Arc, Mutex};

use crate::link::LinkError;
use crate::transport::{EventSender, LinkPort, PortInfo, Transport};

#[derive(Default)]
struct Inner {
    ports: Vec<PortInfo>,
    list_error: Option<String>,
    open_error: Option<String>,
    fail_writes: bool,
    written: Vec<u8>,
    opened: Vec<String>,
    closed: usize,
    events: Option<EventSender>,
}

/// Scriptable transport; clones share the same recorded state
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<Inner>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ports(&self, ports: Vec<PortInfo>) {
        self.inner.lock().unwrap().ports = ports;
    }

    pub fn set_list_error(&self, reason: &str) {
        self.inner.lock().unwrap().list_error = Some(reason.to_string());
    }

    pub fn set_open_error(&self, reason: &str) {
        self.inner.lock().unwrap().open_error = Some(reason.to_string());
    }

    pub fn clear_open_error(&self) {
        self.inner.lock().unwrap().open_error = None;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().unwrap().fail_writes = fail;
    }

    /// Every byte written across all links, in order
    pub fn written(&self) -> Vec<u8> {
        self.inner.lock().unwrap().written.clone()
    }

    /// Paths of every successful open, in order
    pub fn opened(&self) -> Vec<String> {
        self.inner.lock().unwrap().opened.clone()
    }

    pub fn closed_count(&self) -> usize {
        self.inner.lock().unwrap().closed
    }

    /// Event sender handed to the most recent open
    pub fn last_events(&self) -> Option<EventSender> {
        self.inner.lock().unwrap().events.clone()
    }
}

impl Transport for MockTransport {
    fn list(&self) -> Result<Vec<PortInfo>, LinkError> {
        let inner = self.inner.lock().unwrap();
        match &inner.list_error {
            Some(reason) => Err(LinkError::DiscoveryUnavailable {
                reason: reason.clone(),
            }),
            None => Ok(inner.ports.clone()),
        }
    }

    fn open(
        &mut self,
        path: &str,
        _baud_rate: u32,
        events: EventSender,
    ) -> Result<Box<dyn LinkPort>, LinkError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(reason) = &inner.open_error {
            return Err(LinkError::ConnectFailed {
                port: path.to_string(),
                reason: reason.clone(),
            });
        }
        inner.opened.push(path.to_string());
        inner.events = Some(events);
        Ok(Box::new(MockPort {
            inner: self.inner.clone(),
            open: true,
        }))
    }
}

struct MockPort {
    inner: Arc<Mutex<Inner>>,
    open: bool,
}

impl LinkPort for MockPort {
    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        inner.written.push(byte);
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.inner.lock().unwrap().closed += 1;
        }
    }
}
