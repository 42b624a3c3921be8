//! Device discovery and board matching.
//!
//! Matching is a pure function over the board registry: a discovered USB
//! (vendor, product) pair either belongs to a registered board or it does
//! not. The confidence score is a fixed three-tier table based on who made
//! the USB interface; it is a UI hint for pre-selecting a board and never
//! gates upload eligibility.

use crate::board::{self, BoardProfile};

#[cfg(feature = "native")]
use log::{debug, trace};

/// Confidence when the vendor id is Arduino's own.
const CONFIDENCE_OFFICIAL: f32 = 0.95;
/// Confidence when the board sits behind a known USB-serial bridge chip.
const CONFIDENCE_BRIDGE: f32 = 0.85;
/// Confidence for any other pair listed in the registry.
const CONFIDENCE_LISTED: f32 = 0.70;

/// Vendor id of official Arduino boards.
const ARDUINO_VID: u16 = 0x2341;
/// Vendors of the common USB-serial bridge chips (WCH CH340, FTDI,
/// Silicon Labs CP210x). Clone boards enumerate as the bridge, not as the
/// board itself, so the match is one tier less certain.
const BRIDGE_VIDS: &[u16] = &[0x1A86, 0x0403, 0x10C4];

/// A board resolved from a USB identity, with a match confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BoardMatch {
    /// The matched profile.
    pub profile: &'static BoardProfile,
    /// Match confidence in `0.0..=1.0`.
    pub confidence: f32,
}

/// A serial device found during a discovery scan.
///
/// Descriptors are snapshots: each scan produces a fresh list and the
/// previous one is discarded.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceDescriptor {
    /// Port path (e.g. `/dev/ttyUSB0` or `COM3`).
    pub path: String,
    /// USB vendor id.
    pub vendor_id: u16,
    /// USB product id.
    pub product_id: u16,
    /// Board resolution, when the USB identity is in the registry.
    pub board: Option<BoardMatch>,
}

impl DeviceDescriptor {
    /// Describe a device and resolve it against the board registry.
    #[must_use]
    pub fn new(path: impl Into<String>, vendor_id: u16, product_id: u16) -> Self {
        let board = resolve(vendor_id, product_id)
            .map(|(profile, confidence)| BoardMatch { profile, confidence });
        Self {
            path: path.into(),
            vendor_id,
            product_id,
            board,
        }
    }

    /// Whether the device resolved to a registered board.
    #[must_use]
    pub fn is_board(&self) -> bool {
        self.board.is_some()
    }
}

/// Whether a USB (vendor, product) pair belongs to any registered board.
#[must_use]
pub fn is_known_board(vendor_id: u16, product_id: u16) -> bool {
    resolve(vendor_id, product_id).is_some()
}

/// Resolve a USB identity to a board profile and confidence score.
///
/// Deterministic and side-effect free. Ambiguous pairs (the CH340 bridge
/// appears on several clone boards) resolve to the first matching profile
/// in registry order; the bridge-tier confidence already marks these as
/// non-exact.
#[must_use]
pub fn resolve(vendor_id: u16, product_id: u16) -> Option<(&'static BoardProfile, f32)> {
    board::all()
        .iter()
        .find(|profile| profile.usb_ids.contains(&(vendor_id, product_id)))
        .map(|profile| (profile, confidence_for(vendor_id)))
}

fn confidence_for(vendor_id: u16) -> f32 {
    if vendor_id == ARDUINO_VID {
        CONFIDENCE_OFFICIAL
    } else if BRIDGE_VIDS.contains(&vendor_id) {
        CONFIDENCE_BRIDGE
    } else {
        CONFIDENCE_LISTED
    }
}

/// Scan system serial ports for programmable boards.
///
/// Only USB ports are reported; built-in UARTs carry no USB identity to
/// match against. Enumeration failure yields an empty list, since a system
/// without enumerable ports and a system without ports look the same to
/// the caller.
#[cfg(feature = "native")]
pub fn scan() -> Vec<DeviceDescriptor> {
    let mut found = Vec::new();

    match serialport::available_ports() {
        Ok(ports) => {
            for info in ports {
                if let serialport::SerialPortType::UsbPort(usb) = info.port_type {
                    let descriptor = DeviceDescriptor::new(info.port_name, usb.vid, usb.pid);
                    trace!(
                        "found {} (vid {:04x}, pid {:04x}, board {:?})",
                        descriptor.path,
                        usb.vid,
                        usb.pid,
                        descriptor.board.map(|b| b.profile.id)
                    );
                    found.push(descriptor);
                }
            }
        }
        Err(e) => debug!("serial port enumeration failed: {e}"),
    }

    found
}
