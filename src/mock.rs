//! Scripted capture backend for exercising sessions without hardware.
//!
//! [`MockRig`] is the test-side controller: it opens handles for the session
//! under test, queues frames, injects failures and fires grab notifications
//! synchronously on the test thread.

use crate::properties::PROPERTIES;
use crate::traits::{
    CameraError, CaptureHandle, GrabCallback, HandleOpener, PixelFormat, PropertyCode, RawFrame,
    Result,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Shared {
    callback: Mutex<Option<GrabCallback>>,
    frames: Mutex<VecDeque<RawFrame>>,
    properties: Mutex<HashMap<PropertyCode, f64>>,
    rejected: Mutex<HashSet<PropertyCode>>,
    set_log: Mutex<Vec<(PropertyCode, f64)>>,
    acquiring: AtomicBool,
    open_handles: AtomicUsize,
    opened_total: AtomicUsize,
    stop_calls: AtomicUsize,
    fail_open: Mutex<Option<String>>,
    fail_unregister: Mutex<Option<String>>,
}

/// Test-side controller around a scripted capture backend.
pub struct MockRig {
    shared: Arc<Shared>,
}

impl Default for MockRig {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRig {
    /// Create a rig whose devices answer every table property with
    /// `f64::from(code)`.
    #[must_use]
    pub fn new() -> Self {
        let shared = Shared::default();
        {
            let mut properties = lock(&shared.properties);
            for info in &PROPERTIES {
                properties.insert(info.code, f64::from(info.code));
            }
        }
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Make every subsequent open fail with `DeviceUnavailable`.
    #[must_use]
    pub fn with_open_failure(self, msg: &str) -> Self {
        *lock(&self.shared.fail_open) = Some(msg.to_owned());
        self
    }

    /// Make callback unregistration fail; the callback stays hooked, like a
    /// driver that keeps firing after a failed unhook.
    #[must_use]
    pub fn with_unregister_failure(self, msg: &str) -> Self {
        *lock(&self.shared.fail_unregister) = Some(msg.to_owned());
        self
    }

    /// Make the device reject `code` on both reads and writes.
    #[must_use]
    pub fn with_rejected_property(self, code: PropertyCode) -> Self {
        lock(&self.shared.rejected).insert(code);
        self
    }

    /// An opener handing out handles backed by this rig.
    #[must_use]
    pub fn opener(&self) -> Box<dyn HandleOpener> {
        Box::new(MockOpener {
            shared: Arc::clone(&self.shared),
        })
    }

    /// Queue a frame for the next retrieval.
    pub fn push_frame(&self, frame: RawFrame) {
        lock(&self.shared.frames).push_back(frame);
    }

    /// Queue a solid RGB24 frame of the given size.
    pub fn push_rgb_frame(&self, width: u32, height: u32) {
        let data = vec![0x40u8; (width * height * 3) as usize];
        self.push_frame(RawFrame::new(data, width, height, PixelFormat::Rgb24));
    }

    /// Invoke the registered grab callback, as the driver thread would.
    ///
    /// Returns `false` when no callback is registered.
    pub fn fire_grab(&self) -> bool {
        // The callback is taken out of the slot for the duration of the
        // call: it may re-enter the handle (stop, retrieve).
        let callback = lock(&self.shared.callback).take();
        let Some(mut callback) = callback else {
            return false;
        };
        callback();
        let mut slot = lock(&self.shared.callback);
        if slot.is_none() {
            *slot = Some(callback);
        }
        true
    }

    /// Number of handles currently held by a session.
    pub fn open_handles(&self) -> usize {
        self.shared.open_handles.load(Ordering::SeqCst)
    }

    /// Number of opens performed over the rig's lifetime.
    pub fn opened_total(&self) -> usize {
        self.shared.opened_total.load(Ordering::SeqCst)
    }

    /// Whether acquisition is currently running.
    pub fn acquiring(&self) -> bool {
        self.shared.acquiring.load(Ordering::SeqCst)
    }

    /// Number of times acquisition was halted.
    pub fn stop_calls(&self) -> usize {
        self.shared.stop_calls.load(Ordering::SeqCst)
    }

    /// Current device-side value of a property.
    pub fn property_value(&self, code: PropertyCode) -> Option<f64> {
        lock(&self.shared.properties).get(&code).copied()
    }

    /// Overwrite a device-side property value.
    pub fn set_property_value(&self, code: PropertyCode, value: f64) {
        lock(&self.shared.properties).insert(code, value);
    }

    /// Every `(code, value)` write the device received, in order.
    pub fn set_log(&self) -> Vec<(PropertyCode, f64)> {
        lock(&self.shared.set_log).clone()
    }
}

struct MockOpener {
    shared: Arc<Shared>,
}

impl HandleOpener for MockOpener {
    fn open(&self, index: u32) -> Result<Box<dyn CaptureHandle>> {
        if let Some(msg) = lock(&self.shared.fail_open).clone() {
            return Err(CameraError::DeviceUnavailable(format!(
                "device {index}: {msg}"
            )));
        }
        self.shared.opened_total.fetch_add(1, Ordering::SeqCst);
        self.shared.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockHandle {
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct MockHandle {
    shared: Arc<Shared>,
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.shared.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CaptureHandle for MockHandle {
    fn register(&mut self, on_grab: GrabCallback) -> Result<()> {
        *lock(&self.shared.callback) = Some(on_grab);
        Ok(())
    }

    fn unregister(&mut self) -> Result<()> {
        if let Some(msg) = lock(&self.shared.fail_unregister).clone() {
            return Err(CameraError::Driver(msg));
        }
        *lock(&self.shared.callback) = None;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.shared.acquiring.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.shared.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.shared.acquiring.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn retrieve(&mut self) -> Result<RawFrame> {
        Ok(lock(&self.shared.frames)
            .pop_front()
            .unwrap_or_else(RawFrame::empty))
    }

    fn get_property(&mut self, code: PropertyCode) -> Result<f64> {
        if lock(&self.shared.rejected).contains(&code) {
            return Err(CameraError::PropertyUnsupported(code));
        }
        lock(&self.shared.properties)
            .get(&code)
            .copied()
            .ok_or(CameraError::PropertyUnsupported(code))
    }

    fn set_property(&mut self, code: PropertyCode, value: f64) -> Result<()> {
        if lock(&self.shared.rejected).contains(&code) {
            return Err(CameraError::PropertyUnsupported(code));
        }
        lock(&self.shared.set_log).push((code, value));
        lock(&self.shared.properties).insert(code, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_counts() {
        let rig = MockRig::new();
        let opener = rig.opener();

        let first = opener.open(0).expect("open failed");
        let second = opener.open(1).expect("open failed");
        assert_eq!(rig.open_handles(), 2);
        assert_eq!(rig.opened_total(), 2);

        drop(first);
        drop(second);
        assert_eq!(rig.open_handles(), 0);
    }

    #[test]
    fn test_retrieve_drains_queue_then_goes_empty() {
        let rig = MockRig::new();
        let opener = rig.opener();
        let mut handle = opener.open(0).expect("open failed");

        rig.push_rgb_frame(4, 4);
        assert!(!handle.retrieve().expect("retrieve failed").is_empty());
        assert!(handle.retrieve().expect("retrieve failed").is_empty());
    }

    #[test]
    fn test_fire_grab_without_callback() {
        let rig = MockRig::new();
        assert!(!rig.fire_grab());
    }

    #[test]
    fn test_property_defaults_follow_codes() {
        let rig = MockRig::new();
        let opener = rig.opener();
        let mut handle = opener.open(0).expect("open failed");

        assert_eq!(handle.get_property(10).expect("get failed"), 10.0);
        handle.set_property(10, 0.5).expect("set failed");
        assert_eq!(rig.property_value(10), Some(0.5));
        assert_eq!(rig.set_log(), vec![(10, 0.5)]);
    }
}
