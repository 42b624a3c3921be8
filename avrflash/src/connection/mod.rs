//! Connection lifecycle and upload entry points.
//!
//! A [`Connection`] owns exactly one open serial transport and tracks an
//! explicit state: `Closed`, `Open`, or `Uploading`. The transport sits
//! behind a mutex and the state in an atomic, so a shared handle can serve
//! `upload`, `send`, `close`, and cancellation from different threads: a
//! second upload attempt fails immediately on the state compare-exchange
//! instead of queueing behind the first.
//!
//! After any operation returns, the connection is definitively `Open` or
//! `Closed` — a device lost mid-upload forces it to `Closed`, and `close`
//! runs on drop as a backstop.

pub(crate) mod reset;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{info, warn};

use crate::board::BoardProfile;
use crate::error::{Error, Result, StateError, TransportError};
use crate::image::BinaryImage;
use crate::progress::{CancelToken, UploadProgress};
use crate::protocol::ProtocolTimings;
use crate::transport::Transport;
use crate::uploader;

#[cfg(feature = "native")]
use crate::transport::{NativeTransport, TransportConfig};

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_UPLOADING: u8 = 2;

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ConnectionState {
    /// The transport has been closed or lost.
    Closed,
    /// Open and idle; uploads and raw sends are accepted.
    Open,
    /// An upload session is active.
    Uploading,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            STATE_OPEN => Self::Open,
            STATE_UPLOADING => Self::Uploading,
            _ => Self::Closed,
        }
    }
}

/// How an upload session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum UploadOutcome {
    /// Every page was written and acknowledged.
    Completed,
    /// The session was cancelled between pages; programming mode was
    /// still exited cleanly.
    Cancelled,
}

/// Result of a finished upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct UploadResult {
    /// How the session ended.
    pub outcome: UploadOutcome,
    /// Bytes written and acknowledged.
    pub bytes_written: usize,
    /// Wall-clock session duration.
    pub elapsed: Duration,
}

impl UploadResult {
    /// Whether the whole image was written.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.outcome == UploadOutcome::Completed
    }
}

/// Per-session options: progress sink and cancellation token.
#[derive(Debug, Default)]
pub struct UploadOptions {
    /// Event sink for this session.
    pub progress: UploadProgress,
    /// Cooperative cancellation flag, checked between page writes.
    pub cancel: CancelToken,
}

impl UploadOptions {
    /// Options with no progress reporting and a fresh cancel token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the progress sink.
    #[must_use]
    pub fn with_progress(mut self, progress: UploadProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Set the cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// One open serial connection to a board.
pub struct Connection {
    transport: Mutex<Box<dyn Transport>>,
    state: AtomicU8,
    profile: BoardProfile,
    timings: ProtocolTimings,
}

impl Connection {
    /// Open the port at `path` for `profile` and wrap it in a connection.
    ///
    /// The port is configured from the profile (upload baud rate, 8N1).
    #[cfg(feature = "native")]
    pub fn open(path: &str, profile: &BoardProfile) -> Result<Self> {
        let config = TransportConfig::new(profile.upload_baud);
        let transport = NativeTransport::open(path, &config)?;
        info!("connected to {} as {}", path, profile.name);
        Ok(Self::new(Box::new(transport), profile))
    }

    /// Wrap an already-open transport.
    pub fn new(transport: Box<dyn Transport>, profile: &BoardProfile) -> Self {
        Self {
            transport: Mutex::new(transport),
            state: AtomicU8::new(STATE_OPEN),
            profile: profile.clone(),
            timings: ProtocolTimings::default(),
        }
    }

    /// Override the protocol timings used by uploads on this connection.
    #[must_use]
    pub fn with_timings(mut self, timings: ProtocolTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Whether the connection is usable (open or uploading).
    pub fn is_open(&self) -> bool {
        self.state() != ConnectionState::Closed
    }

    /// The board profile this connection was opened for.
    pub fn profile(&self) -> &BoardProfile {
        &self.profile
    }

    /// Upload `image` to the board.
    ///
    /// Sequences reset, sync, paged programming, and the programming-mode
    /// exit, emitting events to `options.progress` along the way. At most
    /// one session runs per connection: a concurrent call fails
    /// immediately with [`StateError::UploadInProgress`] and leaves the
    /// running session untouched.
    pub fn upload(&self, image: &BinaryImage, options: UploadOptions) -> Result<UploadResult> {
        match self.state.compare_exchange(
            STATE_OPEN,
            STATE_UPLOADING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {}
            Err(STATE_UPLOADING) => return Err(Error::State(StateError::UploadInProgress)),
            Err(_) => return Err(Error::State(StateError::ConnectionNotOpen)),
        }

        let result = {
            let mut transport = self.lock_transport();
            uploader::run(
                transport.as_mut(),
                &self.profile,
                image,
                &self.timings,
                options,
            )
        };

        // A lost device invalidates the whole connection, not just the
        // session. Anything else leaves it open for a caller-driven retry,
        // unless close() flipped the state while the session was running;
        // that close holds the state at Closed and gets the transport lock
        // right after us.
        if matches!(result, Err(Error::Transport(TransportError::Disconnected))) {
            warn!("device lost during upload; closing connection");
            let _ = self.lock_transport().close();
            self.state.store(STATE_CLOSED, Ordering::SeqCst);
        } else if self
            .state
            .compare_exchange(
                STATE_UPLOADING,
                STATE_OPEN,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            info!("connection was closed while the upload was finishing");
        }

        result
    }

    /// Write raw bytes to the board outside an upload (serial-monitor
    /// direction).
    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        match self.state() {
            ConnectionState::Uploading => Err(Error::State(StateError::UploadInProgress)),
            ConnectionState::Closed => Err(Error::State(StateError::ConnectionNotOpen)),
            ConnectionState::Open => self.lock_transport().write_all(bytes),
        }
    }

    /// Close the connection and release the port. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.state.swap(STATE_CLOSED, Ordering::SeqCst) != STATE_CLOSED {
            let mut transport = self.lock_transport();
            info!("closing {}", transport.name());
            transport.close()?;
        }
        Ok(())
    }

    fn lock_transport(&self) -> MutexGuard<'_, Box<dyn Transport>> {
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("closing connection on drop failed: {e}");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("profile", &self.profile.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::thread;

    use super::*;
    use crate::board;
    use crate::progress::UploadEvent;
    use crate::protocol::stk500::wire;
    use crate::transport::mock::MockTransport;

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Shares a [`MockTransport`] between a `Connection` and the test body
    /// so writes and control lines stay inspectable after the move.
    #[derive(Clone)]
    struct SharedMock(Arc<Mutex<MockTransport>>);

    impl SharedMock {
        fn new(mock: MockTransport) -> Self {
            Self(Arc::new(Mutex::new(mock)))
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, MockTransport> {
            self.0.lock().unwrap()
        }
    }

    impl Transport for SharedMock {
        fn write_all(&mut self, buf: &[u8]) -> Result<()> {
            self.lock().write_all(buf)
        }

        fn read_exact_timeout(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>> {
            self.lock().read_exact_timeout(n, timeout)
        }

        fn set_control_lines(&mut self, dtr: bool, rts: bool) {
            self.lock().set_control_lines(dtr, rts);
        }

        fn clear_input(&mut self) -> Result<()> {
            self.lock().clear_input()
        }

        fn name(&self) -> &str {
            "shared-mock"
        }

        fn close(&mut self) -> Result<()> {
            self.lock().close()
        }
    }

    fn uno() -> &'static BoardProfile {
        board::lookup("arduino_uno").unwrap()
    }

    fn connection(mock: MockTransport) -> (Connection, SharedMock) {
        let shared = SharedMock::new(mock);
        let conn = Connection::new(Box::new(shared.clone()), uno())
            .with_timings(ProtocolTimings::instant());
        (conn, shared)
    }

    /// Script the device side of a clean upload of `pages` pages.
    fn script_happy_path(mock: &mut MockTransport, pages: usize) {
        mock.push_bytes(&[wire::INSYNC, wire::OK]); // sync
        mock.push_bytes(&[wire::INSYNC, wire::OK]); // enter progmode
        mock.push_bytes(&[wire::INSYNC, 0x1E, 0x95, 0x0F, wire::OK]); // signature
        for _ in 0..pages {
            mock.push_bytes(&[wire::INSYNC, wire::OK]); // load address
            mock.push_bytes(&[wire::INSYNC, wire::OK]); // program page
        }
        mock.push_bytes(&[wire::INSYNC, wire::OK]); // leave progmode
    }

    fn prog_page_frames(mock: &SharedMock) -> Vec<Vec<u8>> {
        mock.lock()
            .writes
            .iter()
            .filter(|frame| frame.first() == Some(&wire::PROG_PAGE))
            .cloned()
            .collect()
    }

    #[test]
    fn test_upload_end_to_end() {
        init_logs();
        let mut mock = MockTransport::new();
        script_happy_path(&mut mock, 3);
        let (conn, shared) = connection(mock);

        let image = BinaryImage::from_bytes(vec![0x42; 300]);
        let (progress, rx) = UploadProgress::channel();
        let result = conn
            .upload(&image, UploadOptions::new().with_progress(progress))
            .unwrap();

        assert_eq!(result.outcome, UploadOutcome::Completed);
        assert_eq!(result.bytes_written, 300);
        assert_eq!(conn.state(), ConnectionState::Open);

        // 300 bytes over 128-byte pages: 128 + 128 + 44.
        let frames = prog_page_frames(&shared);
        assert_eq!(frames.len(), 3);
        let sizes: Vec<u16> = frames
            .iter()
            .map(|f| u16::from_be_bytes([f[1], f[2]]))
            .collect();
        assert_eq!(sizes, vec![128, 128, 44]);

        // Exactly one page event per page, strictly increasing.
        let page_events: Vec<(usize, usize)> = rx
            .try_iter()
            .filter_map(|event| match event {
                UploadEvent::PageProgrammed {
                    page_offset,
                    bytes_uploaded,
                    ..
                } => Some((page_offset, bytes_uploaded)),
                _ => None,
            })
            .collect();
        assert_eq!(page_events, vec![(0, 128), (128, 256), (256, 300)]);
    }

    #[test]
    fn test_second_upload_fails_immediately() {
        init_logs();
        let mut mock = MockTransport::new();
        let release = mock.push_wait(); // first sync read parks here
        script_happy_path(&mut mock, 1);
        let (conn, _shared) = connection(mock);
        let conn = Arc::new(conn);

        let background = {
            let conn = Arc::clone(&conn);
            thread::spawn(move || {
                let image = BinaryImage::from_bytes(vec![0x42; 100]);
                conn.upload(&image, UploadOptions::new())
            })
        };

        while conn.state() != ConnectionState::Uploading {
            thread::yield_now();
        }

        let image = BinaryImage::from_bytes(vec![0x42; 100]);
        let err = conn.upload(&image, UploadOptions::new()).unwrap_err();
        assert!(matches!(
            err,
            Error::State(StateError::UploadInProgress)
        ));

        // The first session is untouched and runs to completion.
        release.send(()).unwrap();
        let result = background.join().unwrap().unwrap();
        assert_eq!(result.outcome, UploadOutcome::Completed);
        assert_eq!(result.bytes_written, 100);
        assert_eq!(conn.state(), ConnectionState::Open);
    }

    #[test]
    fn test_close_during_upload_leaves_connection_closed() {
        init_logs();
        let mut mock = MockTransport::new();
        let release = mock.push_wait(); // first sync read parks here
        script_happy_path(&mut mock, 1);
        let (conn, _shared) = connection(mock);
        let conn = Arc::new(conn);

        let uploader = {
            let conn = Arc::clone(&conn);
            thread::spawn(move || {
                let image = BinaryImage::from_bytes(vec![0x42; 100]);
                conn.upload(&image, UploadOptions::new())
            })
        };
        while conn.state() != ConnectionState::Uploading {
            thread::yield_now();
        }

        // close() flips the state first, then waits for the transport.
        let closer = {
            let conn = Arc::clone(&conn);
            thread::spawn(move || conn.close())
        };
        while conn.state() != ConnectionState::Closed {
            thread::yield_now();
        }

        release.send(()).unwrap();
        let result = uploader.join().unwrap().unwrap();
        assert_eq!(result.outcome, UploadOutcome::Completed);
        closer.join().unwrap().unwrap();

        // The finished upload must not resurrect the connection.
        assert_eq!(conn.state(), ConnectionState::Closed);
        let err = conn.send(b"x").unwrap_err();
        assert!(matches!(
            err,
            Error::State(StateError::ConnectionNotOpen)
        ));
    }

    #[test]
    fn test_cancel_between_pages_still_exits_progmode() {
        init_logs();
        let mut mock = MockTransport::new();
        // Only page 0 is programmed before the cancel lands.
        mock.push_bytes(&[wire::INSYNC, wire::OK]); // sync
        mock.push_bytes(&[wire::INSYNC, wire::OK]); // enter progmode
        mock.push_bytes(&[wire::INSYNC, 0x1E, 0x95, 0x0F, wire::OK]); // signature
        mock.push_bytes(&[wire::INSYNC, wire::OK]); // load address page 0
        mock.push_bytes(&[wire::INSYNC, wire::OK]); // program page 0
        mock.push_bytes(&[wire::INSYNC, wire::OK]); // leave progmode
        let (conn, shared) = connection(mock);

        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let progress = UploadProgress::new(move |event| {
            if matches!(event, UploadEvent::PageProgrammed { .. }) {
                trigger.cancel();
            }
        });

        let image = BinaryImage::from_bytes(vec![0x42; 300]);
        let result = conn
            .upload(
                &image,
                UploadOptions::new().with_progress(progress).with_cancel(cancel),
            )
            .unwrap();

        assert_eq!(result.outcome, UploadOutcome::Cancelled);
        assert_eq!(result.bytes_written, 128);
        assert_eq!(prog_page_frames(&shared).len(), 1);

        // LEAVE_PROGMODE went out before the cancelled result returned.
        let last = shared.lock().writes.last().cloned().unwrap();
        assert_eq!(last, vec![wire::LEAVE_PROGMODE, wire::CRC_EOP]);
        assert_eq!(conn.state(), ConnectionState::Open);
    }

    #[test]
    fn test_disconnect_mid_upload_closes_connection() {
        init_logs();
        let mut mock = MockTransport::new();
        mock.push_bytes(&[wire::INSYNC, wire::OK]); // sync
        mock.push_disconnect(); // device vanishes at enter progmode
        let (conn, _shared) = connection(mock);

        let image = BinaryImage::from_bytes(vec![0x42; 100]);
        let err = conn.upload(&image, UploadOptions::new()).unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(TransportError::Disconnected)
        ));
        assert_eq!(conn.state(), ConnectionState::Closed);

        // Subsequent operations see a definitively closed connection.
        let err = conn.upload(&image, UploadOptions::new()).unwrap_err();
        assert!(matches!(
            err,
            Error::State(StateError::ConnectionNotOpen)
        ));
    }

    #[test]
    fn test_protocol_error_leaves_connection_open() {
        init_logs();
        let mut mock = MockTransport::new();
        mock.push_bytes(&[wire::INSYNC, wire::OK]); // sync
        mock.push_bytes(&[wire::NOSYNC, 0x00]); // enter progmode rejected
        let (conn, _shared) = connection(mock);

        let image = BinaryImage::from_bytes(vec![0x42; 100]);
        assert!(conn.upload(&image, UploadOptions::new()).is_err());
        // Worth a full retry from reset; the port is still ours.
        assert_eq!(conn.state(), ConnectionState::Open);
    }

    #[test]
    fn test_send_outside_upload() {
        let (conn, shared) = connection(MockTransport::new());

        conn.send(b"hello\n").unwrap();
        assert_eq!(shared.lock().written(), b"hello\n");

        conn.close().unwrap();
        let err = conn.send(b"more").unwrap_err();
        assert!(matches!(
            err,
            Error::State(StateError::ConnectionNotOpen)
        ));
    }

    #[test]
    fn test_close_is_idempotent_and_runs_on_drop() {
        let (conn, shared) = connection(MockTransport::new());
        assert_eq!(conn.state(), ConnectionState::Open);

        conn.close().unwrap();
        conn.close().unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);

        drop(conn);
        // Close reached the transport exactly through the guarded path.
        assert!(shared.lock().write_all(b"x").is_err());
    }
}
