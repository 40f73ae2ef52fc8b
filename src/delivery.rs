//! Frame delivery pipeline: one raw frame in, at most one delivered image out.
//!
//! Runs on the driver's capture thread. The session handle is treated as a
//! value that can vanish between the driver scheduling a notification and
//! the callback observing it, so liveness is rechecked under the session
//! lock immediately before any handle access.

use crate::convert;
use crate::events::{CameraEvent, EventSender};
use crate::session::{lock_inner, AcquireMode, Inner, SessionState};
use crate::traits::{CameraError, GrabCallback, RawFrame};
use log::{debug, error, warn};
use std::sync::{Mutex, Weak};

/// Build the frame-grabbed callback registered on a capture handle.
pub(crate) fn grab_callback(inner: Weak<Mutex<Inner>>, events: EventSender) -> GrabCallback {
    Box::new(move || on_frame_grabbed(&inner, &events))
}

fn report(events: &EventSender, err: &CameraError) {
    error!("{err}");
    events.send(CameraEvent::Error(err.to_string()));
}

fn on_frame_grabbed(inner: &Weak<Mutex<Inner>>, events: &EventSender) {
    let Some(inner) = inner.upgrade() else {
        debug!("grab notification after session teardown ignored");
        return;
    };

    let Some(frame) = retrieve_frame(&inner, events) else {
        return;
    };
    // The session lock is released; `frame` is dropped on every path below.

    if frame.is_empty() {
        report(events, &CameraError::EmptyFrame);
        return;
    }

    match convert::to_rgb(frame) {
        Ok(image) => {
            debug!("frame delivered ({}x{})", image.width(), image.height());
            events.send(CameraEvent::ImageReady(image));
        }
        Err(err) => report(events, &err),
    }
}

/// Halt-if-single-shot, then retrieve exactly once, all under the session
/// lock. Returns `None` when the notification must be ignored or retrieval
/// failed (already reported).
fn retrieve_frame(inner: &Mutex<Inner>, events: &EventSender) -> Option<RawFrame> {
    let mut guard = lock_inner(inner);

    // A frame arriving after a single-shot delivery, or after teardown won
    // the race for the lock, must not produce a second signal.
    if guard.state != SessionState::Triggered {
        debug!("grab notification while not armed ignored");
        return None;
    }
    let live = guard.mode == AcquireMode::Live;
    let Some(handle) = guard.handle.as_mut() else {
        debug!("grab notification without a handle ignored");
        return None;
    };

    if !live {
        // Halt before retrieval so a new frame cannot overwrite the buffer
        // mid-conversion.
        if let Err(err) = handle.stop() {
            warn!("halting acquisition failed: {err}");
            events.send(CameraEvent::Error(err.to_string()));
        }
    }

    let retrieved = handle.retrieve();
    if !live {
        guard.state = SessionState::Connected;
    }

    match retrieved {
        Ok(frame) => Some(frame),
        Err(err) => {
            report(events, &err);
            None
        }
    }
}
