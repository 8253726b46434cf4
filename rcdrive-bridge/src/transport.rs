//! Seams between the link manager and the physical serial layer.
//!
//! A [`Transport`] enumerates ports and opens them; each opened [`LinkPort`]
//! accepts single bytes. Lifecycle changes observed by the transport (the
//! port came up, went away, or failed) are reported asynchronously through an
//! [`EventSender`] bound to the link they belong to.

use serde::Serialize;
use std::sync::mpsc::Sender;

use crate::link::LinkError;

/// Physical bus a port sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Usb,
    Pci,
    Bluetooth,
    Unknown,
}

impl PortKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Usb => "USB",
            Self::Pci => "PCI",
            Self::Bluetooth => "Bluetooth",
            Self::Unknown => "Unknown",
        }
    }
}

/// One enumerated port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// Identifier used to open the port (device path or COM name)
    pub path: String,
    /// Human-readable text matched against the adapter fingerprints
    pub descriptor: String,
    pub kind: PortKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vid: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u16>,
}

impl PortInfo {
    /// Port with only an identifier and descriptor text
    pub fn new(path: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            descriptor: descriptor.into(),
            kind: PortKind::Unknown,
            manufacturer: None,
            product: None,
            serial_number: None,
            vid: None,
            pid: None,
        }
    }

    /// Descriptor for display, or the bus name when the port has none
    pub fn label(&self) -> &str {
        if self.descriptor.is_empty() {
            self.kind.label()
        } else {
            &self.descriptor
        }
    }
}

/// Identifies one opened link; events from older links are stale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u64);

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEventKind {
    Opened,
    Closed,
    Errored(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    pub link: LinkId,
    pub kind: LinkEventKind,
}

/// Reports lifecycle events for one link back to the link manager
#[derive(Debug, Clone)]
pub struct EventSender {
    link: LinkId,
    tx: Sender<LinkEvent>,
}

impl EventSender {
    pub(crate) fn new(link: LinkId, tx: Sender<LinkEvent>) -> Self {
        Self { link, tx }
    }

    pub fn link(&self) -> LinkId {
        self.link
    }

    pub fn opened(&self) {
        self.emit(LinkEventKind::Opened);
    }

    pub fn closed(&self) {
        self.emit(LinkEventKind::Closed);
    }

    pub fn errored(&self, reason: impl Into<String>) {
        self.emit(LinkEventKind::Errored(reason.into()));
    }

    fn emit(&self, kind: LinkEventKind) {
        // Manager gone means nobody cares about this link anymore
        let _ = self.tx.send(LinkEvent {
            link: self.link,
            kind,
        });
    }
}

/// Enumerates and opens physical ports
pub trait Transport: Send {
    /// List available ports in discovery order
    fn list(&self) -> Result<Vec<PortInfo>, LinkError>;

    /// Open `path` at `baud_rate`; lifecycle events go to `events`
    fn open(
        &mut self,
        path: &str,
        baud_rate: u32,
        events: EventSender,
    ) -> Result<Box<dyn LinkPort>, LinkError>;
}

/// Write side of an opened port
pub trait LinkPort: Send {
    fn write_byte(&mut self, byte: u8) -> std::io::Result<()>;

    /// Release the port. Must be idempotent.
    fn close(&mut self);
}
