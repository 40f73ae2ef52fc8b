//! Signals emitted to the host event consumer.

use image::RgbImage;
use std::sync::mpsc;

/// Events emitted by a capture session.
///
/// The host receives these on the channel returned from
/// [`CaptureSession::new`](crate::CaptureSession::new). Every caught failure
/// in every operation produces an [`CameraEvent::Error`] alongside its log
/// line.
#[derive(Debug, Clone)]
pub enum CameraEvent {
    /// Session transitioned to connected.
    Connected,
    /// Session transitioned to disconnected.
    Disconnected,
    /// One frame successfully converted and ready for consumption.
    ///
    /// Ownership of the image transfers to the consumer; the session retains
    /// no reference.
    ImageReady(RgbImage),
    /// Informational notice after a successful property read.
    PropertyRead(String),
    /// A caught failure, carrying its display message.
    Error(String),
}

/// Sending half of the event channel.
///
/// A dropped receiver downgrades sends to debug-logged no-ops so a headless
/// session keeps working.
#[derive(Clone)]
pub(crate) struct EventSender {
    tx: mpsc::Sender<CameraEvent>,
}

impl EventSender {
    pub(crate) fn channel() -> (Self, mpsc::Receiver<CameraEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }

    pub(crate) fn send(&self, event: CameraEvent) {
        if self.tx.send(event).is_err() {
            log::debug!("event receiver dropped; discarding event");
        }
    }
}
