//! Serial transport backed by the `serialport` crate.
//!
//! Each opened port gets a reader thread on a cloned handle. It logs whatever
//! the vehicle prints, and turns read failures and hang-ups into lifecycle
//! events for the link manager.

use log::{debug, info, warn};
use serialport::{SerialPort, SerialPortType};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::discovery::describe;
use crate::link::LinkError;
use crate::transport::{EventSender, LinkPort, PortInfo, PortKind, Transport};

/// Read timeout on the reader thread, bounds how long a close takes to notice
const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Longest line of vehicle output kept before it is logged anyway
const MAX_LINE_LEN: usize = 256;

pub struct SerialTransport {
    write_timeout: Duration,
}

impl SerialTransport {
    pub fn new(write_timeout: Duration) -> Self {
        Self { write_timeout }
    }
}

fn port_info(port: serialport::SerialPortInfo) -> PortInfo {
    match port.port_type {
        SerialPortType::UsbPort(usb) => PortInfo {
            descriptor: describe(usb.manufacturer.as_deref(), usb.product.as_deref()),
            path: port.port_name,
            kind: PortKind::Usb,
            manufacturer: usb.manufacturer,
            product: usb.product,
            serial_number: usb.serial_number,
            vid: Some(usb.vid),
            pid: Some(usb.pid),
        },
        SerialPortType::PciPort => PortInfo {
            kind: PortKind::Pci,
            ..PortInfo::new(port.port_name, "")
        },
        SerialPortType::BluetoothPort => PortInfo {
            kind: PortKind::Bluetooth,
            ..PortInfo::new(port.port_name, "")
        },
        SerialPortType::Unknown => PortInfo::new(port.port_name, ""),
    }
}

impl Transport for SerialTransport {
    fn list(&self) -> Result<Vec<PortInfo>, LinkError> {
        let ports = serialport::available_ports().map_err(|e| LinkError::DiscoveryUnavailable {
            reason: e.to_string(),
        })?;
        Ok(ports.into_iter().map(port_info).collect())
    }

    fn open(
        &mut self,
        path: &str,
        baud_rate: u32,
        events: EventSender,
    ) -> Result<Box<dyn LinkPort>, LinkError> {
        let connect_failed = |e: serialport::Error| LinkError::ConnectFailed {
            port: path.to_string(),
            reason: e.to_string(),
        };

        let port = serialport::new(path, baud_rate)
            .timeout(self.write_timeout)
            .open()
            .map_err(connect_failed)?;

        let mut reader = port.try_clone().map_err(connect_failed)?;
        reader.set_timeout(READ_POLL_INTERVAL).map_err(connect_failed)?;

        let closed = Arc::new(AtomicBool::new(false));
        let reader_closed = closed.clone();
        let reader_path = path.to_string();
        std::thread::Builder::new()
            .name(format!("serial-rx {}", events.link()))
            .spawn(move || reader_loop(reader, &reader_closed, &events, &reader_path))
            .map_err(|e| LinkError::ConnectFailed {
                port: path.to_string(),
                reason: format!("failed to start reader: {e}"),
            })?;

        Ok(Box::new(SerialLink {
            port: Some(port),
            closed,
        }))
    }
}

/// Write side of an open serial port
struct SerialLink {
    port: Option<Box<dyn SerialPort>>,
    closed: Arc<AtomicBool>,
}

impl LinkPort for SerialLink {
    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed"))?;
        port.write_all(&[byte])?;
        port.flush()
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::Relaxed);
        self.port = None;
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read vehicle output until the port is closed or fails
#[allow(clippy::needless_pass_by_value)] // the reader owns its port handle
fn reader_loop(
    mut port: Box<dyn SerialPort>,
    closed: &AtomicBool,
    events: &EventSender,
    path: &str,
) {
    debug!("Serial: reader for {path} started ({})", events.link());
    events.opened();

    let mut buf = [0u8; 64];
    let mut lines = LineBuffer::default();

    loop {
        if closed.load(Ordering::Relaxed) {
            debug!("Serial: reader for {path} stopping");
            events.closed();
            return;
        }

        match port.read(&mut buf) {
            Ok(0) => {
                warn!("Serial: {path} hung up");
                events.errored("serial port hung up");
                return;
            }
            Ok(n) => {
                for line in lines.push(&buf[..n]) {
                    info!("Vehicle: {line}");
                }
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                if closed.load(Ordering::Relaxed) {
                    events.closed();
                } else {
                    warn!("Serial: read from {path} failed: {e}");
                    events.errored(e.to_string());
                }
                return;
            }
        }
    }
}

/// Splits incoming bytes into trimmed, non-empty text lines
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in data {
            if byte == b'\r' || byte == b'\n' {
                self.flush_into(&mut lines);
            } else {
                self.pending.push(byte);
                if self.pending.len() >= MAX_LINE_LEN {
                    self.flush_into(&mut lines);
                }
            }
        }
        lines
    }

    fn flush_into(&mut self, lines: &mut Vec<String>) {
        let line = String::from_utf8_lossy(&self.pending).trim().to_string();
        if !line.is_empty() {
            lines.push(line);
        }
        self.pending.clear();
    }
}
