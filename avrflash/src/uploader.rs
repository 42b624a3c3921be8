//! Page-by-page upload sequencing.
//!
//! Drives one upload session over a borrowed transport: pre-flight checks,
//! board reset, sync handshake, the paged programming loop, and the
//! programming-mode exit. [`Connection`](crate::Connection) owns the state
//! guard around this; everything here assumes it already holds the
//! transport exclusively.
//!
//! Failure policy: any engine error aborts the session outright. There is
//! no automatic retry once programming has started, because blindly
//! rewriting pages over a noisy link risks an inconsistent image; the
//! error carries the page offset so the caller can decide whether to
//! restart the whole upload from reset.

use std::time::Instant;

use log::{debug, info, warn};

use crate::board::{BoardProfile, UploadProtocol};
use crate::connection::reset::reset_into_bootloader;
use crate::connection::{UploadOptions, UploadOutcome, UploadResult};
use crate::error::{Error, Result};
use crate::image::BinaryImage;
use crate::protocol::stk500::Stk500;
use crate::protocol::ProtocolTimings;
use crate::transport::Transport;

/// Run one upload session. Emits a `Failed` event if the session errors.
pub(crate) fn run<T: Transport + ?Sized>(
    transport: &mut T,
    profile: &BoardProfile,
    image: &BinaryImage,
    timings: &ProtocolTimings,
    options: UploadOptions,
) -> Result<UploadResult> {
    let result = drive(transport, profile, image, timings, &options);
    if let Err(e) = &result {
        options.progress.failed(e.to_string());
    }
    result
}

fn drive<T: Transport + ?Sized>(
    transport: &mut T,
    profile: &BoardProfile,
    image: &BinaryImage,
    timings: &ProtocolTimings,
    options: &UploadOptions,
) -> Result<UploadResult> {
    if profile.protocol != UploadProtocol::Stk500 {
        return Err(Error::UnsupportedProtocol(profile.protocol));
    }

    let usage = profile.flash_usage(image.len());
    if !usage.fits() {
        return Err(Error::ImageTooLarge {
            size: usage.used,
            capacity: usage.capacity,
        });
    }

    let total_bytes = image.len();
    let started = Instant::now();
    info!(
        "uploading {} bytes to {} on {} ({:.1}% of flash)",
        total_bytes,
        profile.name,
        transport.name(),
        usage.percent
    );
    options.progress.started(total_bytes);

    options.progress.resetting();
    reset_into_bootloader(transport, profile.reset_method, timings);

    options.progress.syncing();
    let mut stk = Stk500::with_timings(transport, timings.clone());
    stk.sync()?;
    stk.enter_progmode()?;

    // Verification only: a mismatched or unreadable signature is worth a
    // warning, but optiboot variants that answer it badly still flash fine.
    match stk.read_signature() {
        Ok(signature) => debug!("device signature: {signature:02x?}"),
        Err(Error::Protocol(e)) => warn!("signature read failed: {e}"),
        Err(e) => return Err(e),
    }

    options.progress.programming_started();
    let mut bytes_uploaded = 0usize;
    let mut cancelled = false;
    for (offset, page) in image.pages(profile.page_size) {
        // Cancellation is observed between pages only; a half-written
        // bootloader command must never be left in flight.
        if options.cancel.is_cancelled() {
            info!("cancel requested after {bytes_uploaded}/{total_bytes} bytes");
            cancelled = true;
            break;
        }

        stk.load_address(offset)?;
        stk.program_page(offset, page)?;
        bytes_uploaded += page.len();
        options
            .progress
            .page_programmed(offset, bytes_uploaded, total_bytes);
    }

    // Always leave programming mode, cancelled or not, so the device ends
    // in a clean state. The pages already written are in flash; a missed
    // exit ack does not undo them.
    options.progress.exiting();
    if let Err(e) = stk.leave_progmode() {
        warn!("leave programming mode failed: {e}");
    }

    let elapsed = started.elapsed();
    let outcome = if cancelled {
        options.progress.cancelled(bytes_uploaded);
        UploadOutcome::Cancelled
    } else {
        info!("upload finished: {bytes_uploaded} bytes in {elapsed:?}");
        options.progress.completed(bytes_uploaded);
        UploadOutcome::Completed
    };

    Ok(UploadResult {
        outcome,
        bytes_written: bytes_uploaded,
        elapsed,
    })
}
