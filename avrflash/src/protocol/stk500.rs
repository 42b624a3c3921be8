//! STK500v1 bootloader protocol.
//!
//! The synchronous request/response protocol spoken by optiboot and the
//! classic Arduino bootloader. Every request ends in `CRC_EOP` and every
//! successful reply is `[INSYNC, OK]`:
//!
//! ```text
//! Sync:          ->  30 20
//!                <-  14 10
//! Enter progmode:->  50 20
//!                <-  14 10
//! Load address:  ->  55 ll hh 20        (address in 16-bit words, LE)
//!                <-  14 10
//! Program page:  ->  64 HH LL 46 <data> 20   (size in bytes, BE)
//!                <-  14 10
//! Read signature:->  75 20
//!                <-  14 s0 s1 s2 10
//! Leave progmode:->  51 20
//!                <-  14 10
//! ```
//!
//! ## Word addressing
//!
//! `LOAD_ADDRESS` takes the address in 16-bit **word** units, an AVR
//! legacy convention. Byte addresses are halved before hitting the wire;
//! forgetting that halving writes every page at twice its intended offset.

use std::thread;
use std::time::Duration;

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use log::{debug, trace, warn};

use crate::error::{Error, ProtocolError, Result, TransportError};
use crate::protocol::ProtocolTimings;
use crate::transport::Transport;

/// STK500v1 wire bytes.
pub mod wire {
    /// Sync handshake request.
    pub const GET_SYNC: u8 = 0x30;
    /// Enter programming mode.
    pub const ENTER_PROGMODE: u8 = 0x50;
    /// Leave programming mode.
    pub const LEAVE_PROGMODE: u8 = 0x51;
    /// Load the programming address (word units).
    pub const LOAD_ADDRESS: u8 = 0x55;
    /// Program one flash page at the loaded address.
    pub const PROG_PAGE: u8 = 0x64;
    /// Read the 3-byte device signature.
    pub const READ_SIGN: u8 = 0x75;
    /// End-of-packet marker terminating every request.
    pub const CRC_EOP: u8 = 0x20;

    /// First byte of every in-sync reply.
    pub const INSYNC: u8 = 0x14;
    /// Final byte of a successful reply.
    pub const OK: u8 = 0x10;
    /// Reply byte sent when the bootloader lost framing.
    pub const NOSYNC: u8 = 0x15;

    /// Memory type selector for flash in `PROG_PAGE`.
    pub const MEMTYPE_FLASH: u8 = 0x46;
}

use wire::{CRC_EOP, INSYNC, OK};

/// STK500v1 engine over a borrowed transport.
///
/// The engine is strictly sequential: one request, one reply. Callers
/// sequence `sync` -> `enter_progmode` -> (`load_address` ->
/// `program_page`)* -> `leave_progmode`.
pub struct Stk500<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    timings: ProtocolTimings,
}

impl<'a, T: Transport + ?Sized> Stk500<'a, T> {
    /// Create an engine with default timings.
    pub fn new(transport: &'a mut T) -> Self {
        Self {
            transport,
            timings: ProtocolTimings::default(),
        }
    }

    /// Create an engine with custom timings.
    pub fn with_timings(transport: &'a mut T, timings: ProtocolTimings) -> Self {
        Self { transport, timings }
    }

    /// Run the sync handshake.
    ///
    /// The bootloader only listens for a short window after reset, so the
    /// handshake is retried with a small delay until it answers or the
    /// attempt budget is spent.
    pub fn sync(&mut self) -> Result<()> {
        let attempts = self.timings.sync_attempts;
        for attempt in 1..=attempts {
            // Drop any noise from the reset so the reply parses cleanly.
            self.transport.clear_input()?;
            self.transport.write_all(&[wire::GET_SYNC, CRC_EOP])?;

            match self
                .transport
                .read_exact_timeout(2, self.timings.command_timeout)
            {
                Ok(response) if response == [INSYNC, OK] => {
                    debug!("in sync after {attempt} attempt(s)");
                    return Ok(());
                }
                Ok(response) => {
                    trace!("sync attempt {attempt}/{attempts}: got {response:02x?}");
                }
                Err(Error::Transport(TransportError::Timeout { .. })) => {
                    trace!("sync attempt {attempt}/{attempts}: no answer");
                }
                Err(e) => return Err(e),
            }

            if attempt < attempts {
                thread::sleep(self.timings.sync_retry_delay);
            }
        }

        Err(Error::Protocol(ProtocolError::SyncTimeout { attempts }))
    }

    /// Enter programming mode.
    pub fn enter_progmode(&mut self) -> Result<()> {
        self.request("ENTER_PROGMODE", &[wire::ENTER_PROGMODE, CRC_EOP])
    }

    /// Leave programming mode.
    ///
    /// Callers treat failure here as non-fatal once all pages are written:
    /// the firmware is already in flash.
    pub fn leave_progmode(&mut self) -> Result<()> {
        self.request("LEAVE_PROGMODE", &[wire::LEAVE_PROGMODE, CRC_EOP])
    }

    /// Load the programming address for the next page write.
    ///
    /// Takes a **byte** address and converts to the word address the wire
    /// wants. The address must be even and below the 16-bit word range.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    #[allow(clippy::cast_possible_truncation)] // word address is range-checked above the cast
    pub fn load_address(&mut self, byte_address: usize) -> Result<()> {
        let word_address = byte_address / 2;
        if word_address > usize::from(u16::MAX) {
            return Err(Error::Protocol(ProtocolError::AddressError {
                address: byte_address,
                response: Vec::new(),
            }));
        }

        let mut frame = Vec::with_capacity(4);
        frame.push(wire::LOAD_ADDRESS);
        frame
            .write_u16::<LittleEndian>(word_address as u16)
            .unwrap();
        frame.push(CRC_EOP);

        match self.request("LOAD_ADDRESS", &frame) {
            Err(Error::Protocol(ProtocolError::UnexpectedResponse { response, .. })) => {
                Err(Error::Protocol(ProtocolError::AddressError {
                    address: byte_address,
                    response,
                }))
            }
            other => other,
        }
    }

    /// Program one flash page at the previously loaded address.
    ///
    /// `page_offset` is the byte offset of the page in the image, carried
    /// into the error for diagnostics; `page` may be shorter than the
    /// board's page size on the final chunk.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    #[allow(clippy::cast_possible_truncation)] // page sizes are board-profile bounded (<= 1 KiB)
    pub fn program_page(&mut self, page_offset: usize, page: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(5 + page.len());
        frame.push(wire::PROG_PAGE);
        frame.write_u16::<BigEndian>(page.len() as u16).unwrap();
        frame.push(wire::MEMTYPE_FLASH);
        frame.extend_from_slice(page);
        frame.push(CRC_EOP);

        self.transport.write_all(&frame)?;
        match self.expect_ok("PROG_PAGE", self.timings.page_timeout) {
            Err(Error::Protocol(ProtocolError::UnexpectedResponse { response, .. })) => {
                Err(Error::Protocol(ProtocolError::ProgramPage {
                    page_offset,
                    response,
                }))
            }
            other => other,
        }
    }

    /// Read the 3-byte device signature.
    pub fn read_signature(&mut self) -> Result<[u8; 3]> {
        self.transport
            .write_all(&[wire::READ_SIGN, CRC_EOP])?;

        let response = match self
            .transport
            .read_exact_timeout(5, self.timings.command_timeout)
        {
            Ok(r) => r,
            Err(Error::Transport(TransportError::Timeout { .. })) => Vec::new(),
            Err(e) => return Err(e),
        };

        if response.len() == 5 && response[0] == INSYNC && response[4] == OK {
            Ok([response[1], response[2], response[3]])
        } else {
            warn!("READ_SIGN answered {response:02x?}");
            Err(Error::Protocol(ProtocolError::UnexpectedResponse {
                command: "READ_SIGN",
                response,
            }))
        }
    }

    /// Send a frame and expect the `[INSYNC, OK]` reply within the
    /// ordinary command window.
    fn request(&mut self, command: &'static str, frame: &[u8]) -> Result<()> {
        self.transport.write_all(frame)?;
        self.expect_ok(command, self.timings.command_timeout)
    }

    /// Read the 2-byte reply; anything but `[INSYNC, OK]` (including an
    /// empty window) is an unexpected response. Disconnects propagate.
    fn expect_ok(&mut self, command: &'static str, timeout: Duration) -> Result<()> {
        let response = match self.transport.read_exact_timeout(2, timeout) {
            Ok(r) => r,
            Err(Error::Transport(TransportError::Timeout { .. })) => Vec::new(),
            Err(e) => return Err(e),
        };

        if response == [INSYNC, OK] {
            trace!("{command} acknowledged");
            Ok(())
        } else {
            Err(Error::Protocol(ProtocolError::UnexpectedResponse {
                command,
                response,
            }))
        }
    }
}
