//! Serial port discovery and ranking.
//!
//! Ports whose descriptor looks like a known USB-serial adapter or ST board
//! are tried before anything else; within each group discovery order is kept.

use log::{debug, info, warn};
use serde::Serialize;

use crate::transport::{PortInfo, Transport};

/// Case-insensitive substrings that identify likely vehicle adapters
pub const ADAPTER_FINGERPRINTS: [&str; 8] = [
    "serial", "uart", "stm", "st-link", "ch340", "cp210", "ftdi", "usb",
];

/// A discovered port and whether it matched an adapter fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortCandidate {
    #[serde(flatten)]
    pub info: PortInfo,
    pub preferred: bool,
}

/// Whether `descriptor` contains any adapter fingerprint
pub fn matches_fingerprint(descriptor: &str) -> bool {
    let descriptor = descriptor.to_lowercase();
    ADAPTER_FINGERPRINTS
        .iter()
        .any(|fingerprint| descriptor.contains(fingerprint))
}

/// Build descriptor text from the manufacturer and product strings.
///
/// Fields are joined with a space so a fingerprint can never match across
/// the boundary between two fields. A port without either string gets an
/// empty descriptor, so its bus type alone never makes it preferred.
pub fn describe(manufacturer: Option<&str>, product: Option<&str>) -> String {
    [manufacturer, product]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Order ports: fingerprint matches first, then the rest, each in discovery order
pub fn rank(ports: Vec<PortInfo>) -> Vec<PortCandidate> {
    let (preferred, others): (Vec<_>, Vec<_>) = ports
        .into_iter()
        .map(|info| {
            let preferred = matches_fingerprint(&info.descriptor);
            PortCandidate { info, preferred }
        })
        .partition(|candidate| candidate.preferred);

    preferred.into_iter().chain(others).collect()
}

/// List and rank ports. Enumeration failures degrade to an empty list.
pub fn discover(transport: &dyn Transport) -> Vec<PortCandidate> {
    let ports = match transport.list() {
        Ok(ports) => ports,
        Err(e) => {
            warn!("Discovery: {e}, treating as no ports");
            return Vec::new();
        }
    };

    let candidates = rank(ports);
    if candidates.is_empty() {
        info!("Discovery: no serial ports available");
    } else {
        for candidate in &candidates {
            debug!(
                "Discovery: {} ({}){}",
                candidate.info.path,
                candidate.info.label(),
                if candidate.preferred { " [adapter]" } else { "" }
            );
        }
    }
    candidates
}

/// Port to connect to automatically: the first ranked candidate
pub fn select(candidates: &[PortCandidate]) -> Option<&PortCandidate> {
    candidates.first()
}
