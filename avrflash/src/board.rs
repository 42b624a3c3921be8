//! Static catalog of supported boards.
//!
//! Each entry maps a board identifier to the electrical and protocol
//! parameters the uploader needs: USB identity, reset method, bootloader
//! protocol, baud rate, and memory limits. The catalog is defined at
//! compile time and never mutated.

use std::fmt;

/// How a board is reset into its bootloader from software.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ResetMethod {
    /// Pulse DTR only (Uno/Nano class, auto-reset circuit on DTR).
    DtrOnly,
    /// Pulse DTR and RTS together (CDC boards and ESP dev modules).
    DtrRts,
    /// No control-line toggling; the user resets the board manually.
    None,
}

/// Bootloader protocol a board expects during upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum UploadProtocol {
    /// STK500v1 as spoken by optiboot and the classic Arduino bootloader.
    Stk500,
    /// STK500v2 ("wiring"), used by the Mega 2560 bootloader.
    Stk500v2,
    /// AVR109 butterfly protocol, used by atmega32u4 boards.
    Avr109,
    /// Espressif ROM loader protocol (SLIP framed).
    EspTool,
}

impl UploadProtocol {
    /// Get a human-readable name for the protocol.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stk500 => "stk500",
            Self::Stk500v2 => "stk500v2",
            Self::Avr109 => "avr109",
            Self::EspTool => "esptool",
        }
    }
}

impl fmt::Display for UploadProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable descriptor of a supported board.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BoardProfile {
    /// Stable identifier (e.g. "arduino_uno").
    pub id: &'static str,
    /// Display name (e.g. "Arduino Uno").
    pub name: &'static str,
    /// Microcontroller name (e.g. "atmega328p").
    pub mcu: &'static str,
    /// CPU clock frequency in Hz.
    pub clock_hz: u32,
    /// USB (vendor id, product id) pairs this board enumerates as.
    pub usb_ids: &'static [(u16, u16)],
    /// Reset sequence used to enter the bootloader.
    pub reset_method: ResetMethod,
    /// Bootloader protocol spoken during upload.
    pub protocol: UploadProtocol,
    /// Baud rate the bootloader listens at.
    pub upload_baud: u32,
    /// Usable flash in bytes (total minus bootloader section).
    pub max_flash_size: usize,
    /// SRAM available to the sketch in bytes.
    pub max_data_size: usize,
    /// Flash page size in bytes for paged programming.
    pub page_size: usize,
}

/// Flash occupancy of an image against a board's capacity.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FlashUsage {
    /// Image size in bytes.
    pub used: usize,
    /// Usable flash capacity in bytes.
    pub capacity: usize,
    /// Occupancy as a percentage of capacity.
    pub percent: f32,
}

impl FlashUsage {
    /// Whether the image fits in the board's flash.
    #[must_use]
    pub fn fits(&self) -> bool {
        self.used <= self.capacity
    }
}

impl BoardProfile {
    /// Compute flash occupancy for an image of `size` bytes.
    #[must_use]
    pub fn flash_usage(&self, size: usize) -> FlashUsage {
        #[allow(clippy::cast_precision_loss)]
        let percent = (size as f32 / self.max_flash_size as f32) * 100.0;
        FlashUsage {
            used: size,
            capacity: self.max_flash_size,
            percent,
        }
    }
}

/// All boards known to this crate, in resolution priority order.
const BOARDS: &[BoardProfile] = &[
    BoardProfile {
        id: "arduino_uno",
        name: "Arduino Uno",
        mcu: "atmega328p",
        clock_hz: 16_000_000,
        usb_ids: &[(0x2341, 0x0043), (0x2341, 0x0001), (0x1A86, 0x7523)],
        reset_method: ResetMethod::DtrOnly,
        protocol: UploadProtocol::Stk500,
        upload_baud: 115_200,
        max_flash_size: 32_256,
        max_data_size: 2_048,
        page_size: 128,
    },
    BoardProfile {
        id: "arduino_nano",
        name: "Arduino Nano",
        mcu: "atmega328p",
        clock_hz: 16_000_000,
        usb_ids: &[(0x0403, 0x6001), (0x1A86, 0x7523)],
        reset_method: ResetMethod::DtrOnly,
        protocol: UploadProtocol::Stk500,
        upload_baud: 57_600,
        max_flash_size: 30_720,
        max_data_size: 2_048,
        page_size: 128,
    },
    BoardProfile {
        id: "arduino_mega",
        name: "Arduino Mega 2560",
        mcu: "atmega2560",
        clock_hz: 16_000_000,
        usb_ids: &[(0x2341, 0x0042), (0x2341, 0x0010), (0x1A86, 0x7523)],
        reset_method: ResetMethod::DtrOnly,
        protocol: UploadProtocol::Stk500v2,
        upload_baud: 115_200,
        max_flash_size: 253_952,
        max_data_size: 8_192,
        page_size: 256,
    },
    BoardProfile {
        id: "arduino_leonardo",
        name: "Arduino Leonardo",
        mcu: "atmega32u4",
        clock_hz: 16_000_000,
        usb_ids: &[(0x2341, 0x8036), (0x1B4F, 0x9206)],
        reset_method: ResetMethod::DtrRts,
        protocol: UploadProtocol::Avr109,
        upload_baud: 57_600,
        max_flash_size: 28_672,
        max_data_size: 2_560,
        page_size: 128,
    },
    BoardProfile {
        id: "arduino_micro",
        name: "Arduino Micro",
        mcu: "atmega32u4",
        clock_hz: 16_000_000,
        usb_ids: &[(0x2341, 0x8037), (0x1B4F, 0x9207)],
        reset_method: ResetMethod::DtrRts,
        protocol: UploadProtocol::Avr109,
        upload_baud: 57_600,
        max_flash_size: 28_672,
        max_data_size: 2_560,
        page_size: 128,
    },
    BoardProfile {
        id: "esp32_dev",
        name: "ESP32 Dev Module",
        mcu: "esp32",
        clock_hz: 240_000_000,
        usb_ids: &[(0x10C4, 0xEA60), (0x1A86, 0x7523), (0x0403, 0x6001)],
        reset_method: ResetMethod::DtrRts,
        protocol: UploadProtocol::EspTool,
        upload_baud: 921_600,
        max_flash_size: 1_310_720,
        max_data_size: 327_680,
        page_size: 1_024,
    },
    BoardProfile {
        id: "esp8266_nodemcu",
        name: "NodeMCU 1.0 (ESP-12E)",
        mcu: "esp8266",
        clock_hz: 80_000_000,
        usb_ids: &[(0x10C4, 0xEA60), (0x1A86, 0x7523), (0x0403, 0x6001)],
        reset_method: ResetMethod::DtrRts,
        protocol: UploadProtocol::EspTool,
        upload_baud: 921_600,
        max_flash_size: 1_044_464,
        max_data_size: 81_920,
        page_size: 1_024,
    },
];

/// Get all supported board profiles.
#[must_use]
pub fn all() -> &'static [BoardProfile] {
    BOARDS
}

/// Look up a board profile by identifier.
#[must_use]
pub fn lookup(id: &str) -> Option<&'static BoardProfile> {
    BOARDS.iter().find(|b| b.id == id)
}
