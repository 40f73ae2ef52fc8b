//! USB-Cam-Capture: a capture session library for USB video devices
//!
//! This library exposes a capture device as lifecycle operations (connect,
//! trigger, disconnect), a property registry indexed by stable numeric codes,
//! and an image-delivery channel to a host event consumer. Sessions are
//! backed by V4L2 in production and by a scripted mock in tests.

pub mod config;
pub mod convert;
pub mod delivery;
pub mod device;
pub mod events;
pub mod properties;
pub mod session;
pub mod traits;

#[cfg(test)]
pub mod mock;

pub use config::CaptureConfig;
pub use device::{V4l2Handle, V4l2Opener};
pub use events::CameraEvent;
pub use properties::{property_name, PropertyInfo, PropertySnapshot, PROPERTIES, SETTINGS_DIALOG};
pub use session::{AcquireMode, CaptureSession, SessionState};
pub use traits::{
    CameraError, CaptureHandle, HandleOpener, PixelFormat, PropertyCode, RawFrame, Result,
};
