//! Native serial transport backed by the `serialport` crate.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use log::{trace, warn};
use serialport::ClearBuffer;

use crate::error::{Error, Result, TransportError};
use crate::transport::{Transport, TransportConfig};

/// Serial transport for desktop platforms (Linux, macOS, Windows).
pub struct NativeTransport {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
}

impl std::fmt::Debug for NativeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeTransport")
            .field("name", &self.name)
            .field("open", &self.port.is_some())
            .finish()
    }
}

impl NativeTransport {
    /// Open the port at `path` with the given configuration.
    ///
    /// STK500 bootloaders speak 8N1 without flow control, which is also
    /// the `serialport` builder default; only baud rate and timeout are
    /// applied on top.
    pub fn open(path: &str, config: &TransportConfig) -> Result<Self> {
        let port = serialport::new(path, config.baud_rate)
            .timeout(config.timeout)
            .open()?;

        trace!("opened {} at {} baud", path, config.baud_rate);
        Ok(Self {
            port: Some(port),
            name: path.to_string(),
        })
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.port.as_mut().ok_or_else(|| {
            Error::Transport(TransportError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "port closed",
            )))
        })
    }
}

/// Classify a link-level I/O failure.
fn map_link_error(err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof => {
            Error::Transport(TransportError::Disconnected)
        }
        _ => Error::Transport(TransportError::Io(err)),
    }
}

impl Transport for NativeTransport {
    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let port = self.port_mut()?;
        port.write_all(buf).map_err(map_link_error)?;
        port.flush().map_err(map_link_error)?;
        trace!("wrote {} bytes", buf.len());
        Ok(())
    }

    fn read_exact_timeout(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; n];
        let mut filled = 0;

        let port = self.port_mut()?;
        while filled < n {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Transport(TransportError::Timeout {
                    expected: n,
                    received: filled,
                }));
            }
            port.set_timeout(deadline - now)?;

            match port.read(&mut buf[filled..]) {
                // EOF on a serial device means it is gone.
                Ok(0) => return Err(Error::Transport(TransportError::Disconnected)),
                Ok(count) => filled += count,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    return Err(Error::Transport(TransportError::Timeout {
                        expected: n,
                        received: filled,
                    }));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(map_link_error(e)),
            }
        }

        trace!("read {filled} bytes");
        Ok(buf)
    }

    fn set_control_lines(&mut self, dtr: bool, rts: bool) {
        trace!("control lines on {}: dtr={dtr} rts={rts}", self.name);
        if let Some(ref mut port) = self.port {
            if let Err(e) = port.write_data_terminal_ready(dtr) {
                warn!("failed to set DTR on {}: {e}", self.name);
            }
            if let Err(e) = port.write_request_to_send(rts) {
                warn!("failed to set RTS on {}: {e}", self.name);
            }
        }
    }

    fn clear_input(&mut self) -> Result<()> {
        if let Some(ref mut port) = self.port {
            port.clear(ClearBuffer::Input)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the handle closes the OS port; repeated calls are no-ops.
        if self.port.take().is_some() {
            trace!("closed {}", self.name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_device_is_device_error() {
        let config = TransportConfig::new(115_200);
        let err = NativeTransport::open("/dev/nonexistent-avrflash-test", &config).unwrap_err();
        assert!(
            matches!(err, Error::Device(_)),
            "expected device error, got {err:?}"
        );
    }

    #[test]
    fn test_closed_port_rejects_io() {
        let mut transport = NativeTransport {
            port: None,
            name: "test".to_string(),
        };
        assert!(transport.write_all(&[0x30]).is_err());
        assert!(transport
            .read_exact_timeout(1, Duration::from_millis(1))
            .is_err());
        // Close stays idempotent and control lines stay best-effort.
        transport.set_control_lines(false, false);
        assert!(transport.close().is_ok());
        assert!(transport.close().is_ok());
    }
}
