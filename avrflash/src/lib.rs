//! # avrflash
//!
//! Firmware uploading for AVR-class boards over their serial bootloaders.
//!
//! The crate covers the device programming path of an embedded IDE:
//!
//! - Intel HEX decoding into flat binary images
//! - USB device discovery and board identification
//! - Serial connection lifecycle with DTR/RTS reset sequencing
//! - The STK500v1 bootloader protocol (sync handshake, paged programming)
//! - Upload orchestration with typed progress events and cancellation
//!
//! It is a library with no CLI or UI surface of its own; the embedding
//! application supplies the compiled artifact and a board profile, and
//! consumes progress events and the upload result.
//!
//! ## Supported boards
//!
//! The built-in registry covers the common ATmega328p-class boards (Uno,
//! Nano) plus entries for the Mega 2560, Leonardo/Micro, and ESP dev
//! modules. Only the STK500v1 upload path is implemented; selecting a
//! board whose profile names another protocol fails with a typed error
//! before any bytes are sent.
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate
//! - `serde`: serialization for the UI-facing data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use avrflash::{board, BinaryImage, Connection, UploadOptions, UploadProgress};
//!
//! fn main() -> avrflash::Result<()> {
//!     // Decode the compiled artifact.
//!     let image = BinaryImage::from_hex_file("firmware.hex")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let profile = board::lookup("arduino_uno").expect("registered board");
//!
//!         // Watch progress from a channel while the upload runs.
//!         let (progress, events) = UploadProgress::channel();
//!         std::thread::spawn(move || {
//!             for event in events {
//!                 println!("{event}");
//!             }
//!         });
//!
//!         let connection = Connection::open("/dev/ttyUSB0", profile)?;
//!         let result =
//!             connection.upload(&image, UploadOptions::new().with_progress(progress))?;
//!         println!("wrote {} bytes", result.bytes_written);
//!         connection.close()?;
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod board;
pub mod connection;
pub mod device;
pub mod error;
pub mod image;
pub mod monitor;
pub mod progress;
pub mod protocol;
pub mod transport;

mod uploader;

pub use board::{BoardProfile, FlashUsage, ResetMethod, UploadProtocol};
pub use connection::{Connection, ConnectionState, UploadOptions, UploadOutcome, UploadResult};
pub use device::{is_known_board, resolve, BoardMatch, DeviceDescriptor};
pub use error::{
    DecodeError, DeviceError, Error, ProtocolError, Result, StateError, TransportError,
};
pub use image::BinaryImage;
pub use monitor::MonitorBuffer;
pub use progress::{CancelToken, UploadEvent, UploadPhase, UploadProgress};
pub use protocol::ProtocolTimings;
pub use transport::{Transport, TransportConfig};

#[cfg(feature = "native")]
pub use device::scan;
#[cfg(feature = "native")]
pub use transport::NativeTransport;
