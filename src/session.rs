//! Capture session lifecycle: connect, trigger, disconnect.
//!
//! [`CaptureSession`] owns the only reference to the active capture handle
//! and is the sole component permitted to open or release it. The frame
//! delivery pipeline reaches the session through a weak reference so a late
//! grab notification after teardown upgrades to nothing.

use crate::delivery;
use crate::events::{CameraEvent, EventSender};
use crate::traits::{CameraError, CaptureHandle, HandleOpener, Result};
use log::{debug, error, info};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Connection state of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No device handle held. Initial and terminal state.
    Disconnected,
    /// Handle open, acquisition idle.
    Connected,
    /// Handle open, acquisition armed.
    Triggered,
}

/// Acquisition mode, observed at each delivered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquireMode {
    /// One frame per explicit trigger; acquisition halts afterwards.
    #[default]
    SingleShot,
    /// Each delivered frame automatically re-arms acquisition.
    Live,
}

/// Shared session interior, guarded by one mutex.
///
/// Invariant: `handle` is `Some` iff `state` is `Connected` or `Triggered`.
pub(crate) struct Inner {
    pub(crate) state: SessionState,
    pub(crate) mode: AcquireMode,
    pub(crate) handle: Option<Box<dyn CaptureHandle>>,
}

pub(crate) fn lock_inner(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One logical connection to a physical capture device.
pub struct CaptureSession {
    inner: Arc<Mutex<Inner>>,
    opener: Box<dyn HandleOpener>,
    events: EventSender,
}

impl CaptureSession {
    /// Create a disconnected session.
    ///
    /// Returns the session and the receiving half of its event channel. The
    /// opener is consulted once per [`connect`](Self::connect) call.
    #[must_use]
    pub fn new(opener: Box<dyn HandleOpener>) -> (Self, Receiver<CameraEvent>) {
        let (events, receiver) = EventSender::channel();
        let session = Self {
            inner: Arc::new(Mutex::new(Inner {
                state: SessionState::Disconnected,
                mode: AcquireMode::default(),
                handle: None,
            })),
            opener,
            events,
        };
        (session, receiver)
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        lock_inner(&self.inner).state
    }

    /// Current acquisition mode.
    #[must_use]
    pub fn mode(&self) -> AcquireMode {
        lock_inner(&self.inner).mode
    }

    /// Switch between single-shot and live acquisition.
    ///
    /// Pure state mutation: an acquisition already in flight is unaffected,
    /// the new mode is observed at the next delivered frame.
    pub fn set_mode(&self, mode: AcquireMode) {
        let mut inner = lock_inner(&self.inner);
        inner.mode = mode;
        debug!("acquisition mode set to {mode:?}");
    }

    /// Open the device at `index` and transition to `Connected`.
    ///
    /// An already-connected session is fully disconnected first. On failure
    /// the state stays `Disconnected`, the error is logged, emitted on the
    /// error signal and returned.
    pub fn connect(&self, index: u32) -> Result<()> {
        // Idempotent teardown of any previous handle; step failures have
        // already been signalled and do not block the new connection.
        let _ = self.disconnect();

        let mut handle = match self.opener.open(index) {
            Ok(handle) => handle,
            Err(err) => return Err(self.report(err)),
        };

        let callback = delivery::grab_callback(Arc::downgrade(&self.inner), self.events.clone());
        if let Err(err) = handle.register(callback) {
            // `handle` drops here, releasing the device it briefly held.
            return Err(self.report(err));
        }

        {
            let mut inner = lock_inner(&self.inner);
            inner.handle = Some(handle);
            inner.state = SessionState::Connected;
        }
        info!("connected to capture device {index}");
        self.events.send(CameraEvent::Connected);
        Ok(())
    }

    /// Release the device and return to `Disconnected`.
    ///
    /// No-op without error when already disconnected. Every teardown step is
    /// attempted even if an earlier one fails; each failure is signalled
    /// individually and folded into a `TeardownPartial` result.
    pub fn disconnect(&self) -> Result<()> {
        // Take the handle out under the lock and tear it down outside it: a
        // grab callback blocked on the mutex must observe the cleared handle,
        // and the handle may join its capture thread on drop.
        let handle = {
            let mut inner = lock_inner(&self.inner);
            inner.state = SessionState::Disconnected;
            inner.handle.take()
        };
        let Some(mut handle) = handle else {
            debug!("disconnect on idle session ignored");
            return Ok(());
        };

        let mut failures = Vec::new();
        if let Err(err) = handle.unregister() {
            failures.push(self.report(err).to_string());
        }
        if let Err(err) = handle.stop() {
            failures.push(self.report(err).to_string());
        }
        drop(handle);

        info!("capture device released");
        self.events.send(CameraEvent::Disconnected);

        if failures.is_empty() {
            Ok(())
        } else {
            let err = CameraError::TeardownPartial(failures);
            error!("{err}");
            Err(err)
        }
    }

    /// Start acquisition; the next grabbed frame is delivered asynchronously.
    ///
    /// Fails with `NotConnected` when no handle is active. In live mode
    /// frames keep arriving until a mode change or disconnect; in single-shot
    /// mode acquisition halts after one delivered frame.
    pub fn trigger(&self) -> Result<()> {
        let mut inner = lock_inner(&self.inner);
        let started = match inner.handle.as_mut() {
            Some(handle) => handle.start(),
            None => {
                drop(inner);
                return Err(self.report(CameraError::NotConnected));
            }
        };
        match started {
            Ok(()) => {
                inner.state = SessionState::Triggered;
                debug!("acquisition armed");
                Ok(())
            }
            Err(err) => {
                drop(inner);
                Err(self.report(err))
            }
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        lock_inner(&self.inner)
    }

    pub(crate) fn events(&self) -> &EventSender {
        &self.events
    }

    /// Log a failure, mirror it on the error signal, and hand it back for
    /// the caller to retry explicitly.
    pub(crate) fn report(&self, err: CameraError) -> CameraError {
        error!("{err}");
        self.events.send(CameraEvent::Error(err.to_string()));
        err
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        // Teardown failures are already logged and signalled.
        let _ = self.disconnect();
    }
}
