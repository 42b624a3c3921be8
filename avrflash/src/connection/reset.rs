//! Board reset sequencing.
//!
//! Arduino-class boards wire DTR (and on some boards RTS) through a
//! capacitor to the MCU reset pin, so pulsing the line from software
//! drops the part into its bootloader. Control-line toggling is advisory
//! on many platforms; the sequences here are best-effort and the sync
//! handshake afterwards is what actually confirms the bootloader is up.

use std::thread;

use log::debug;

use crate::board::ResetMethod;
use crate::protocol::ProtocolTimings;
use crate::transport::Transport;

/// Run the reset sequence for `method`, then wait out the settle window
/// so the bootloader is listening before the first sync attempt.
pub(crate) fn reset_into_bootloader<T: Transport + ?Sized>(
    transport: &mut T,
    method: ResetMethod,
    timings: &ProtocolTimings,
) {
    match method {
        ResetMethod::DtrOnly => {
            debug!("resetting {} via DTR pulse", transport.name());
            transport.set_control_lines(false, false);
            thread::sleep(timings.reset_pulse);
            transport.set_control_lines(true, false);
            thread::sleep(timings.reset_pulse);
            transport.set_control_lines(false, false);
        }
        ResetMethod::DtrRts => {
            debug!("resetting {} via DTR+RTS pulse", transport.name());
            transport.set_control_lines(true, true);
            thread::sleep(timings.reset_pulse);
            transport.set_control_lines(false, false);
        }
        ResetMethod::None => {
            debug!("no reset lines for {}; expecting a manual reset", transport.name());
        }
    }

    thread::sleep(timings.settle_delay);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    #[test]
    fn test_dtr_only_pulse_sequence() {
        let mut mock = MockTransport::new();
        reset_into_bootloader(&mut mock, ResetMethod::DtrOnly, &ProtocolTimings::instant());
        assert_eq!(
            mock.control_lines,
            vec![(false, false), (true, false), (false, false)]
        );
    }

    #[test]
    fn test_dtr_rts_pulse_sequence() {
        let mut mock = MockTransport::new();
        reset_into_bootloader(&mut mock, ResetMethod::DtrRts, &ProtocolTimings::instant());
        assert_eq!(mock.control_lines, vec![(true, true), (false, false)]);
    }

    #[test]
    fn test_manual_reset_touches_no_lines() {
        let mut mock = MockTransport::new();
        reset_into_bootloader(&mut mock, ResetMethod::None, &ProtocolTimings::instant());
        assert!(mock.control_lines.is_empty());
    }
}
