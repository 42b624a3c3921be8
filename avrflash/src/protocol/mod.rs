//! Bootloader protocol implementations.
//!
//! Currently only STK500v1 is implemented; it covers the optiboot and
//! classic Arduino bootloaders on atmega328p-class parts. Boards whose
//! profile names another protocol are rejected before any bytes are sent.

pub mod stk500;

use std::time::Duration;

/// Timing parameters for reset sequencing and protocol exchanges.
///
/// The defaults are the values the bootloaders were tuned against; tests
/// shrink them to keep simulated runs fast.
#[derive(Debug, Clone)]
pub struct ProtocolTimings {
    /// Number of sync handshake attempts before giving up.
    pub sync_attempts: u32,
    /// Delay between sync attempts.
    pub sync_retry_delay: Duration,
    /// Read window for ordinary command responses.
    pub command_timeout: Duration,
    /// Read window for page writes. Flash programming is slow, so this is
    /// much longer than the command window.
    pub page_timeout: Duration,
    /// Width of a control-line reset pulse.
    pub reset_pulse: Duration,
    /// Wait after reset before the bootloader is ready to listen.
    ///
    /// Two seconds is empirically required headroom. Shrinking it is the
    /// classic cause of intermittent sync failures.
    pub settle_delay: Duration,
}

impl Default for ProtocolTimings {
    fn default() -> Self {
        Self {
            sync_attempts: 10,
            sync_retry_delay: Duration::from_millis(100),
            command_timeout: Duration::from_millis(1000),
            page_timeout: Duration::from_secs(5),
            reset_pulse: Duration::from_millis(100),
            settle_delay: Duration::from_millis(2000),
        }
    }
}

#[cfg(test)]
impl ProtocolTimings {
    /// Timings with all delays collapsed, for scripted-transport tests.
    pub(crate) fn instant() -> Self {
        Self {
            sync_retry_delay: Duration::ZERO,
            reset_pulse: Duration::ZERO,
            settle_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}
