//! Serial transport abstraction.
//!
//! The bootloader engine is I/O-agnostic: it talks to a [`Transport`],
//! which owns exactly one physical serial connection. Native platforms get
//! a `serialport`-backed implementation; tests substitute a scripted mock.
//!
//! ```text
//! +--------------------+
//! |  Protocol / Upload |
//! +---------+----------+
//!           |
//!           v
//! +---------+----------+
//! |   Transport trait  |
//! +---------+----------+
//!           |
//!     +-----+------+
//!     v            v
//! serialport    scripted
//!  (native)    mock (test)
//! ```
//!
//! The protocol is strictly request/response: callers keep exactly one
//! write and one read in flight, never pipelined.

#[cfg(feature = "native")]
pub mod native;

use std::time::Duration;

use crate::error::Result;

/// Serial link configuration for [`Transport`] implementations.
///
/// STK500 bootloaders all speak 8N1 with no flow control, so only the
/// baud rate and the default read window vary per board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Baud rate the bootloader listens at.
    pub baud_rate: u32,
    /// Default read/write timeout for the opened port.
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            timeout: Duration::from_millis(1000),
        }
    }
}

impl TransportConfig {
    /// Create a configuration for the given baud rate.
    #[must_use]
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the default timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// One physical serial connection.
///
/// All reads and writes are bounded: `read_exact_timeout` never blocks
/// past its window, and `write_all` either writes every byte or fails.
pub trait Transport: Send {
    /// Write all bytes and flush, or fail without a partial-write state.
    fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Read exactly `n` bytes within `timeout`.
    ///
    /// Fails with [`TransportError::Timeout`](crate::TransportError::Timeout)
    /// if fewer bytes arrive in the window, and
    /// [`TransportError::Disconnected`](crate::TransportError::Disconnected)
    /// if the device disappears mid-read.
    fn read_exact_timeout(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Set the DTR and RTS control lines.
    ///
    /// Best-effort: control-line toggling is advisory on many platforms,
    /// so failures are logged rather than propagated.
    fn set_control_lines(&mut self, dtr: bool, rts: bool);

    /// Discard any unread input.
    fn clear_input(&mut self) -> Result<()>;

    /// Port name/path for log messages.
    fn name(&self) -> &str;

    /// Close the port and release it. Idempotent.
    fn close(&mut self) -> Result<()>;
}

#[cfg(feature = "native")]
pub use native::NativeTransport;
