//! Upload progress reporting and cancellation.
//!
//! Consumers observe an upload through a single typed event stream: either
//! a callback handed to [`UploadProgress::new`] or the channel pair from
//! [`UploadProgress::channel`]. At minimum one event is emitted per
//! completed page.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

/// Protocol state of an upload attempt. Transitions only run forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum UploadPhase {
    /// Reset issued; waiting out the bootloader settle window.
    Resetting,
    /// Sync handshake attempts.
    Syncing,
    /// Programming mode entered; pre-write checks.
    InProgMode,
    /// Paged writes in progress.
    Programming,
    /// Leaving programming mode.
    ExitingProgMode,
    /// Finished, successfully or not.
    Done,
}

/// One event in the life of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum UploadEvent {
    /// Pre-flight passed; the upload is starting.
    Started {
        /// Total bytes that will be written.
        total_bytes: usize,
    },
    /// The board reset sequence was issued.
    Resetting,
    /// The sync handshake is running.
    Syncing,
    /// Programming mode was entered; page writes are about to start.
    ProgrammingStarted,
    /// One page was written and acknowledged.
    PageProgrammed {
        /// Byte offset of the page in the image.
        page_offset: usize,
        /// Bytes acknowledged so far, including this page.
        bytes_uploaded: usize,
        /// Total bytes being written.
        total_bytes: usize,
    },
    /// All pages written; leaving programming mode.
    Exiting,
    /// The upload finished successfully.
    Completed {
        /// Bytes written in total.
        bytes_written: usize,
    },
    /// The upload was cancelled between pages.
    Cancelled {
        /// Bytes written before the cancel was observed.
        bytes_written: usize,
    },
    /// The upload failed.
    Failed {
        /// Human-readable failure description.
        message: String,
    },
}

impl UploadEvent {
    /// The protocol phase this event belongs to.
    #[must_use]
    pub fn phase(&self) -> UploadPhase {
        match self {
            Self::Started { .. } | Self::Resetting => UploadPhase::Resetting,
            Self::Syncing => UploadPhase::Syncing,
            Self::ProgrammingStarted => UploadPhase::InProgMode,
            Self::PageProgrammed { .. } => UploadPhase::Programming,
            Self::Exiting => UploadPhase::ExitingProgMode,
            Self::Completed { .. } | Self::Cancelled { .. } | Self::Failed { .. } => {
                UploadPhase::Done
            }
        }
    }
}

impl fmt::Display for UploadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started { total_bytes } => write!(f, "starting upload of {total_bytes} bytes"),
            Self::Resetting => write!(f, "resetting board"),
            Self::Syncing => write!(f, "synchronizing with bootloader"),
            Self::ProgrammingStarted => write!(f, "programming mode entered"),
            Self::PageProgrammed {
                bytes_uploaded,
                total_bytes,
                ..
            } => write!(f, "wrote {bytes_uploaded}/{total_bytes} bytes"),
            Self::Exiting => write!(f, "leaving programming mode"),
            Self::Completed { bytes_written } => {
                write!(f, "upload complete ({bytes_written} bytes)")
            }
            Self::Cancelled { bytes_written } => {
                write!(f, "upload cancelled after {bytes_written} bytes")
            }
            Self::Failed { message } => write!(f, "upload failed: {message}"),
        }
    }
}

/// Event sink for one upload.
///
/// Wraps a handler closure that is invoked for every [`UploadEvent`] on
/// the uploading thread.
pub struct UploadProgress {
    handler: Box<dyn Fn(UploadEvent) + Send>,
}

impl UploadProgress {
    /// Create a sink that calls `handler` for every event.
    pub fn new(handler: impl Fn(UploadEvent) + Send + 'static) -> Self {
        Self {
            handler: Box::new(handler),
        }
    }

    /// Create a sink that forwards events into an mpsc channel.
    ///
    /// The receiver side outlives the upload; events sent after the
    /// receiver is dropped are discarded.
    #[must_use]
    pub fn channel() -> (Self, mpsc::Receiver<UploadEvent>) {
        let (tx, rx) = mpsc::channel();
        let sink = Self::new(move |event| {
            let _ = tx.send(event);
        });
        (sink, rx)
    }

    /// Create a sink that drops every event.
    #[must_use]
    pub fn silent() -> Self {
        Self::new(|_| {})
    }

    fn emit(&self, event: UploadEvent) {
        (self.handler)(event);
    }

    pub(crate) fn started(&self, total_bytes: usize) {
        self.emit(UploadEvent::Started { total_bytes });
    }

    pub(crate) fn resetting(&self) {
        self.emit(UploadEvent::Resetting);
    }

    pub(crate) fn syncing(&self) {
        self.emit(UploadEvent::Syncing);
    }

    pub(crate) fn programming_started(&self) {
        self.emit(UploadEvent::ProgrammingStarted);
    }

    pub(crate) fn page_programmed(
        &self,
        page_offset: usize,
        bytes_uploaded: usize,
        total_bytes: usize,
    ) {
        self.emit(UploadEvent::PageProgrammed {
            page_offset,
            bytes_uploaded,
            total_bytes,
        });
    }

    pub(crate) fn exiting(&self) {
        self.emit(UploadEvent::Exiting);
    }

    pub(crate) fn completed(&self, bytes_written: usize) {
        self.emit(UploadEvent::Completed { bytes_written });
    }

    pub(crate) fn cancelled(&self, bytes_written: usize) {
        self.emit(UploadEvent::Cancelled { bytes_written });
    }

    pub(crate) fn failed(&self, message: String) {
        self.emit(UploadEvent::Failed { message });
    }
}

impl Default for UploadProgress {
    /// The default sink discards every event.
    fn default() -> Self {
        Self::silent()
    }
}

impl fmt::Debug for UploadProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadProgress").finish_non_exhaustive()
    }
}

/// Cooperative cancellation flag for an upload.
///
/// Clones share the flag. The uploader checks it between page writes
/// only, never mid-page, and always leaves programming mode before
/// returning a cancelled result.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create an uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
