//! Link manager with a dedicated link task.
//!
//! Architecture:
//! - [`LinkManager`]: owns the single serial connection and is the only writer
//!   of [`VehicleState`]. Every operation is synchronous and runs to completion
//!   before the next one starts.
//! - Link task: a thread that owns the manager, serves [`LinkRequest`]s from
//!   the HTTP handlers in arrival order and drains lifecycle events between
//!   requests, so an event is never applied in the middle of a write.
//! - [`LinkClient`]: cloneable handle used by request handlers; sends a request
//!   and waits for the reply on a oneshot channel.

use derive_more::{Display, Error};
use log::{debug, error, info, warn};
use rcdrive_protocol::Command;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::discovery::{self, PortCandidate};
use crate::state::{VehicleState, VehicleStateStore};
use crate::transport::{EventSender, LinkEvent, LinkEventKind, LinkId, LinkPort, Transport};

/// How often the link task wakes up to apply lifecycle events when idle
pub const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(20);
/// Default time a [`LinkClient`] waits for the link task to answer
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Errors reported by the link manager
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum LinkError {
    /// Port enumeration failed; discovery degrades to an empty list
    #[display("port enumeration unavailable: {reason}")]
    DiscoveryUnavailable { reason: String },
    /// Opening the port failed (bad path, permissions, baud mismatch)
    #[display("failed to open {port}: {reason}")]
    ConnectFailed { port: String, reason: String },
    /// Dispatch attempted without an open link
    #[display("serial link is not open")]
    LinkNotOpen,
    /// The port rejected a write
    #[display("write to {port} failed: {reason}")]
    WriteFailed { port: String, reason: String },
    /// Connect requested without a port identifier
    #[display("No port specified")]
    NoPortSpecified,
    /// The link task did not answer in time
    #[display("link task did not respond")]
    Timeout,
}

/// The open physical connection
pub struct LinkHandle {
    id: LinkId,
    path: String,
    baud_rate: u32,
    port: Box<dyn LinkPort>,
    open: bool,
}

impl LinkHandle {
    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    fn write_byte(&mut self, byte: u8) -> std::io::Result<()> {
        self.port.write_byte(byte)
    }

    fn close(&mut self) {
        if self.open {
            debug!("Link: closing {} {}", self.path, self.id);
            self.port.close();
            self.open = false;
        }
    }
}

impl Drop for LinkHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Owns the serial connection and the authoritative vehicle state
pub struct LinkManager<T> {
    transport: T,
    baud_rate: u32,
    state: Arc<VehicleStateStore>,
    link: Option<LinkHandle>,
    /// Port to retry when the link drops (cleared by an explicit disconnect)
    reconnect_port: Option<String>,
    next_link_id: u64,
    events_tx: Sender<LinkEvent>,
    events_rx: Receiver<LinkEvent>,
}

impl<T: Transport> LinkManager<T> {
    pub fn new(transport: T, baud_rate: u32, state: Arc<VehicleStateStore>) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            transport,
            baud_rate,
            state,
            link: None,
            reconnect_port: None,
            next_link_id: 1,
            events_tx,
            events_rx,
        }
    }

    pub fn state(&self) -> &Arc<VehicleStateStore> {
        &self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn link(&self) -> Option<&LinkHandle> {
        self.link.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.link.as_ref().is_some_and(LinkHandle::is_open)
    }

    pub fn reconnect_port(&self) -> Option<&str> {
        self.reconnect_port.as_deref()
    }

    /// List and rank the available ports
    pub fn discover(&self) -> Vec<PortCandidate> {
        discovery::discover(&self.transport)
    }

    /// Open `path`, replacing any existing link.
    ///
    /// An empty identifier is rejected without touching the current link.
    pub fn connect(&mut self, path: &str) -> Result<(), LinkError> {
        let path = path.trim();
        if path.is_empty() {
            return Err(LinkError::NoPortSpecified);
        }

        let result = self.open_link(path);
        // A failed connect must not bring the previous port back on a retry
        self.reconnect_port = result.is_ok().then(|| path.to_string());
        result
    }

    /// Close the current link and open `path` in its place
    fn open_link(&mut self, path: &str) -> Result<(), LinkError> {
        self.close_link();

        let id = LinkId(self.next_link_id);
        self.next_link_id += 1;

        info!("Link: opening {path} at {} baud ({id})", self.baud_rate);
        let events = EventSender::new(id, self.events_tx.clone());
        match self.transport.open(path, self.baud_rate, events) {
            Ok(port) => {
                self.link = Some(LinkHandle {
                    id,
                    path: path.to_string(),
                    baud_rate: self.baud_rate,
                    port,
                    open: true,
                });
                self.state.set_link(path);
                info!("Link: connected to {path}");
                Ok(())
            }
            Err(e) => {
                warn!("Link: {e}");
                self.state.set_connected(false);
                Err(e)
            }
        }
    }

    /// Connect on startup: `pinned` if given, otherwise the best discovered
    /// candidate. Returns the port connected to, or `None` if nothing was found.
    pub fn auto_connect(&mut self, pinned: Option<&str>) -> Result<Option<String>, LinkError> {
        let candidates = if pinned.is_some_and(|p| !p.trim().is_empty()) {
            Vec::new()
        } else {
            self.discover()
        };
        self.auto_connect_from(&candidates, pinned)
    }

    /// Like [`Self::auto_connect`], but picks from an already ranked list
    pub fn auto_connect_from(
        &mut self,
        candidates: &[PortCandidate],
        pinned: Option<&str>,
    ) -> Result<Option<String>, LinkError> {
        if let Some(path) = pinned.map(str::trim).filter(|p| !p.is_empty()) {
            info!("Link: using configured port {path}");
            return self.connect(path).map(|()| Some(path.to_string()));
        }

        let Some(target) = discovery::select(candidates).map(|c| c.info.path.clone()) else {
            warn!("Link: no serial ports found, waiting for an explicit connect");
            return Ok(None);
        };
        self.connect(&target).map(|()| Some(target))
    }

    /// Transmit `command`, then record it in the vehicle state.
    ///
    /// The state is only updated after the byte has been written, so it never
    /// shows a command that did not reach the vehicle.
    pub fn dispatch(&mut self, command: Command) -> Result<VehicleState, LinkError> {
        self.process_events();

        let Some(link) = self.link.as_mut() else {
            warn!("Link: dropping {command}, link is not open");
            self.state.set_connected(false);
            return Err(LinkError::LinkNotOpen);
        };

        let byte = command.wire_byte();
        debug!("Link: sending {command} as {:?}", char::from(byte));
        match link.write_byte(byte) {
            Ok(()) => {
                self.state.apply(command);
                Ok(self.state.snapshot())
            }
            Err(e) => {
                let err = LinkError::WriteFailed {
                    port: link.path().to_string(),
                    reason: e.to_string(),
                };
                error!("Link: {err}");
                self.close_link();
                self.state.set_connected(false);
                Err(err)
            }
        }
    }

    /// Close the link on operator request; no automatic reconnect follows
    pub fn disconnect(&mut self) {
        self.reconnect_port = None;
        if self.link.is_some() {
            info!("Link: disconnecting");
        }
        self.close_link();
        self.state.set_connected(false);
    }

    /// Apply one lifecycle event. Events for any link but the current one are ignored.
    pub fn handle_event(&mut self, event: LinkEvent) {
        let current = self.link.as_ref().map(LinkHandle::id);
        if current != Some(event.link) {
            debug!("Link: ignoring {:?} from stale link {}", event.kind, event.link);
            return;
        }

        match event.kind {
            LinkEventKind::Opened => {
                debug!("Link: {} reported open", event.link);
                self.state.set_connected(true);
            }
            LinkEventKind::Closed => {
                warn!("Link: port closed");
                self.close_link();
                self.state.set_connected(false);
            }
            LinkEventKind::Errored(reason) => {
                warn!("Link: port error: {reason}");
                self.close_link();
                self.state.set_connected(false);
            }
        }
    }

    /// Apply every pending lifecycle event; returns how many were handled
    pub fn process_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Retry the last port if the link dropped on its own
    pub fn try_reconnect(&mut self) -> Option<Result<(), LinkError>> {
        if self.is_open() {
            return None;
        }
        let path = self.reconnect_port.clone()?;
        debug!("Link: reconnecting to {path}");
        Some(self.open_link(&path))
    }

    fn close_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
        }
    }
}

/// Request to the link task
pub enum LinkRequest {
    Connect {
        port: String,
        reply: oneshot::Sender<Result<(), LinkError>>,
    },
    Dispatch {
        command: Command,
        reply: oneshot::Sender<Result<VehicleState, LinkError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Discover {
        reply: oneshot::Sender<Vec<PortCandidate>>,
    },
}

/// Cloneable handle for talking to the link task
#[derive(Clone)]
pub struct LinkClient {
    tx: Sender<LinkRequest>,
    timeout: Duration,
}

impl LinkClient {
    pub fn new(tx: Sender<LinkRequest>, timeout: Duration) -> Self {
        Self { tx, timeout }
    }

    pub fn connect(&self, port: &str) -> Result<(), LinkError> {
        let (reply, rx) = oneshot::channel();
        self.send(LinkRequest::Connect {
            port: port.to_string(),
            reply,
        })?;
        rx.recv_timeout(self.timeout).map_err(|_| LinkError::Timeout)?
    }

    pub fn dispatch(&self, command: Command) -> Result<VehicleState, LinkError> {
        let (reply, rx) = oneshot::channel();
        self.send(LinkRequest::Dispatch { command, reply })?;
        rx.recv_timeout(self.timeout).map_err(|_| LinkError::Timeout)?
    }

    pub fn disconnect(&self) -> Result<(), LinkError> {
        let (reply, rx) = oneshot::channel();
        self.send(LinkRequest::Disconnect { reply })?;
        rx.recv_timeout(self.timeout).map_err(|_| LinkError::Timeout)
    }

    /// Ranked port list; empty if the task is unavailable
    pub fn discover(&self) -> Vec<PortCandidate> {
        let (reply, rx) = oneshot::channel();
        if self.send(LinkRequest::Discover { reply }).is_err() {
            return Vec::new();
        }
        rx.recv_timeout(self.timeout).unwrap_or_default()
    }

    fn send(&self, request: LinkRequest) -> Result<(), LinkError> {
        self.tx.send(request).map_err(|_| {
            error!("Link task is not running");
            LinkError::LinkNotOpen
        })
    }
}

/// Run the link task until every [`LinkClient`] has been dropped
pub fn link_task<T: Transport>(
    mut manager: LinkManager<T>,
    rx: &Receiver<LinkRequest>,
    reconnect_interval: Option<Duration>,
) {
    info!("Link task started");
    let mut last_reconnect_attempt: Option<Instant> = None;

    loop {
        manager.process_events();

        if let Some(interval) = reconnect_interval {
            let due = last_reconnect_attempt.map_or(true, |t| t.elapsed() >= interval);
            if due && !manager.is_open() && manager.reconnect_port().is_some() {
                last_reconnect_attempt = Some(Instant::now());
                if let Some(Err(e)) = manager.try_reconnect() {
                    debug!("Link: reconnect failed: {e}");
                }
            }
        }

        match rx.recv_timeout(EVENT_POLL_INTERVAL) {
            Ok(request) => handle_request(&mut manager, request),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                info!("Link task channel closed, shutting down");
                break;
            }
        }
    }

    manager.disconnect();
}

fn handle_request<T: Transport>(manager: &mut LinkManager<T>, request: LinkRequest) {
    // A reply that can't be delivered means the caller timed out; the
    // state change still stands.
    match request {
        LinkRequest::Connect { port, reply } => {
            let _ = reply.send(manager.connect(&port));
        }
        LinkRequest::Dispatch { command, reply } => {
            let _ = reply.send(manager.dispatch(command));
        }
        LinkRequest::Disconnect { reply } => {
            manager.disconnect();
            let _ = reply.send(());
        }
        LinkRequest::Discover { reply } => {
            let _ = reply.send(manager.discover());
        }
    }
}

/// Spawn the link task on its own thread and return a client for it
pub fn start_link_task<T: Transport + 'static>(
    manager: LinkManager<T>,
    reconnect_interval: Option<Duration>,
    request_timeout: Duration,
) -> std::io::Result<(LinkClient, JoinHandle<()>)> {
    let (tx, rx) = mpsc::channel();
    let handle = std::thread::Builder::new()
        .name("link".into())
        .spawn(move || link_task(manager, &rx, reconnect_interval))?;
    Ok((LinkClient::new(tx, request_timeout), handle))
}
