//! Error types for avrflash.

use std::io;

use thiserror::Error;

use crate::board::UploadProtocol;

/// Result type for avrflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for avrflash operations.
///
/// Every failure carries a machine-readable kind plus a human-readable
/// message. The nested enums group failures by the layer that produced
/// them, which callers use to decide between retrying from reset and
/// giving up.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Device-level failure (enumeration, open).
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Transport-level failure (read, write, disconnect).
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Bootloader protocol failure.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Firmware image decoding failure.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Operation not valid in the current connection state.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// File or other OS-level I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Image does not fit the target's flash.
    #[error("Image of {size} bytes exceeds flash capacity of {capacity} bytes")]
    ImageTooLarge {
        /// Size of the image in bytes.
        size: usize,
        /// Usable flash capacity of the target in bytes.
        capacity: usize,
    },

    /// The selected board requires an upload protocol this crate does not
    /// implement.
    #[error("Upload protocol {0} is not supported")]
    UnsupportedProtocol(UploadProtocol),
}

/// Failures locating or opening a physical device.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DeviceError {
    /// No device at the given path.
    #[error("not found: {0}")]
    NotFound(String),

    /// The OS denied access to the device.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The device is held by another process.
    #[error("busy: {0}")]
    Busy(String),
}

/// Failures on an open serial link.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// Fewer bytes than requested arrived within the read window.
    #[error("timed out waiting for {expected} bytes (received {received})")]
    Timeout {
        /// Number of bytes requested.
        expected: usize,
        /// Number of bytes that arrived before the deadline.
        received: usize,
    },

    /// I/O error on the underlying port.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The device disappeared while the connection was open.
    #[error("device disconnected")]
    Disconnected,
}

/// Failures in the STK500 request/response exchange.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The bootloader never answered the sync handshake.
    #[error("no sync after {attempts} attempts")]
    SyncTimeout {
        /// Number of handshake attempts made.
        attempts: u32,
    },

    /// The device answered with bytes other than the expected reply.
    #[error("unexpected response to {command}: {response:02x?}")]
    UnexpectedResponse {
        /// Name of the command that was sent.
        command: &'static str,
        /// Raw bytes received instead of the expected reply.
        response: Vec<u8>,
    },

    /// The device rejected an address load.
    #[error("address load failed at byte address {address:#x}: {response:02x?}")]
    AddressError {
        /// Byte address whose word-address load was rejected.
        address: usize,
        /// Raw bytes received instead of the expected reply.
        response: Vec<u8>,
    },

    /// The device rejected or failed a page write.
    #[error("page program failed at byte offset {page_offset:#x}: {response:02x?}")]
    ProgramPage {
        /// Byte offset of the page that failed.
        page_offset: usize,
        /// Raw bytes received instead of the expected reply.
        response: Vec<u8>,
    },
}

/// Failures decoding Intel HEX input.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// A record could not be parsed or failed its checksum.
    #[error("malformed record at line {line}: {reason}")]
    MalformedRecord {
        /// 1-based line number of the offending record.
        line: usize,
        /// What was wrong with the record.
        reason: String,
    },

    /// A computed address exceeded the sane flash address bound.
    #[error("address {address:#x} exceeds the 16 MiB image bound")]
    AddressOverflow {
        /// The out-of-range byte address.
        address: u32,
    },

    /// The input contained no data records.
    #[error("no valid records in input")]
    EmptyInput,
}

/// Operations attempted in the wrong connection state.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StateError {
    /// A second upload was started while one is in flight.
    #[error("an upload is already in progress on this connection")]
    UploadInProgress,

    /// The connection has been closed.
    #[error("connection is not open")]
    ConnectionNotOpen,
}

#[cfg(feature = "native")]
impl From<serialport::Error> for Error {
    fn from(err: serialport::Error) -> Self {
        use serialport::ErrorKind;

        match err.kind() {
            ErrorKind::NoDevice | ErrorKind::Io(io::ErrorKind::NotFound) => {
                Error::Device(DeviceError::NotFound(err.description))
            }
            ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
                Error::Device(DeviceError::PermissionDenied(err.description))
            }
            ErrorKind::Io(io::ErrorKind::ResourceBusy) => {
                Error::Device(DeviceError::Busy(err.description))
            }
            _ => Error::Transport(TransportError::Io(io::Error::other(err.description))),
        }
    }
}
