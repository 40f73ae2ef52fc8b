//! Device property registry and batch transfer.
//!
//! The property table is the fixed enumeration of supported capture property
//! codes, in ascending code order. Table order is a contract: it is the
//! positional order of [`PropertySnapshot`] values, so snapshots are only
//! valid against the table version that produced them.

use crate::events::CameraEvent;
use crate::session::CaptureSession;
use crate::traits::{CameraError, PropertyCode, Result};
use log::debug;

/// One row of the property table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyInfo {
    /// Vendor property code.
    pub code: PropertyCode,
    /// Human-readable name, for UI and diagnostics only.
    pub name: &'static str,
}

const fn row(code: PropertyCode, name: &'static str) -> PropertyInfo {
    PropertyInfo { code, name }
}

/// Code that pops the driver's settings dialog when written.
///
/// A write-only trigger value, not a persisted property: its position exists
/// in snapshots but is never written back by [`CaptureSession::load_all`].
pub const SETTINGS_DIALOG: PropertyCode = 37;

/// The fixed enumeration of supported property codes, in snapshot order.
pub const PROPERTIES: [PropertyInfo; 91] = [
    row(-4, "dc1394_off"),
    row(-3, "dc1394_mode_manual"),
    row(-2, "dc1394_mode_auto"),
    row(-1, "dc1394_mode_one_push_auto"),
    row(0, "pos_msec"),
    row(1, "pos_frames"),
    row(2, "pos_avi_ratio"),
    row(3, "frame_width"),
    row(4, "frame_height"),
    row(5, "fps"),
    row(6, "fourcc"),
    row(7, "frame_count"),
    row(8, "format"),
    row(9, "mode"),
    row(10, "brightness"),
    row(11, "contrast"),
    row(12, "saturation"),
    row(13, "hue"),
    row(14, "gain"),
    row(15, "exposure"),
    row(16, "convert_rgb"),
    row(17, "white_balance_blue_u"),
    row(18, "rectification"),
    row(19, "monochrome"),
    row(20, "sharpness"),
    row(21, "auto_exposure"),
    row(22, "gamma"),
    row(23, "temperature"),
    row(24, "trigger"),
    row(25, "trigger_delay"),
    row(26, "white_balance_red_v"),
    row(27, "zoom"),
    row(28, "focus"),
    row(29, "guid"),
    row(30, "iso_speed"),
    row(31, "max_dc1394"),
    row(32, "backlight"),
    row(33, "pan"),
    row(34, "tilt"),
    row(35, "roll"),
    row(36, "iris"),
    row(SETTINGS_DIALOG, "settings"),
    row(38, "buffer_size"),
    row(39, "autofocus"),
    row(40, "sar_num"),
    row(41, "sar_den"),
    row(100, "openni_output_mode"),
    row(101, "openni_frame_max_depth"),
    row(102, "openni_baseline"),
    row(103, "openni_focal_length"),
    row(104, "openni_registration"),
    row(105, "openni_approx_frame_sync"),
    row(106, "openni_max_buffer_size"),
    row(107, "openni_circle_buffer"),
    row(108, "openni_max_time_duration"),
    row(109, "openni_generator_present"),
    row(110, "openni2_sync"),
    row(111, "openni2_mirror"),
    row(300, "pvapi_multicast_ip"),
    row(301, "pvapi_frame_start_trigger_mode"),
    row(302, "pvapi_decimation_horizontal"),
    row(303, "pvapi_decimation_vertical"),
    row(304, "pvapi_binning_x"),
    row(305, "pvapi_binning_y"),
    row(306, "pvapi_pixel_format"),
    row(400, "xi_downsampling"),
    row(401, "xi_data_format"),
    row(402, "xi_offset_x"),
    row(403, "xi_offset_y"),
    row(404, "xi_trg_source"),
    row(405, "xi_trg_software"),
    row(406, "xi_gpi_selector"),
    row(407, "xi_gpi_mode"),
    row(408, "xi_gpi_level"),
    row(409, "xi_gpo_selector"),
    row(410, "xi_gpo_mode"),
    row(411, "xi_led_selector"),
    row(412, "xi_led_mode"),
    row(413, "xi_manual_wb"),
    row(414, "xi_auto_wb"),
    row(9001, "ios_device_focus"),
    row(9002, "ios_device_exposure"),
    row(9003, "ios_device_flash"),
    row(9004, "ios_device_white_balance"),
    row(9005, "ios_device_torch"),
    row(10001, "giga_frame_offset_x"),
    row(10002, "giga_frame_offset_y"),
    row(10003, "giga_frame_width_max"),
    row(10004, "giga_frame_height_max"),
    row(10005, "giga_frame_sens_width"),
    row(10006, "giga_frame_sens_height"),
];

/// Look up the table name for a property code.
#[must_use]
pub fn property_name(code: PropertyCode) -> Option<&'static str> {
    PROPERTIES
        .iter()
        .find(|info| info.code == code)
        .map(|info| info.name)
}

/// Positionally-ordered values for every property in the table.
///
/// Produced by [`CaptureSession::save_all`]: exactly one value per table row,
/// in table order. A position whose read failed holds `f64::NAN`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertySnapshot {
    values: Vec<f64>,
}

impl PropertySnapshot {
    /// An empty snapshot, ready to be filled by a save.
    #[must_use]
    pub const fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// Rebuild a snapshot from values a host persisted earlier.
    ///
    /// The values must be in the table order of the table version that
    /// produced them.
    #[must_use]
    pub const fn from_values(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// Number of recorded values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the snapshot holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The recorded values, in table order.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    fn clear(&mut self) {
        self.values.clear();
    }

    fn push(&mut self, value: f64) {
        self.values.push(value);
    }
}

impl CaptureSession {
    /// Read the current value of a device property.
    ///
    /// Emits a property-read signal with the property's table name after a
    /// successful read. Fails with `NotConnected` without an active session
    /// and `PropertyUnsupported` when the device rejects the code.
    pub fn property(&self, code: PropertyCode) -> Result<f64> {
        let read = {
            let mut inner = self.lock();
            match inner.handle.as_mut() {
                Some(handle) => handle.get_property(code),
                None => {
                    drop(inner);
                    return Err(self.report(CameraError::NotConnected));
                }
            }
        };
        match read {
            Ok(value) => {
                let name =
                    property_name(code).map_or_else(|| code.to_string(), ToOwned::to_owned);
                debug!("property {name} read as {value}");
                self.events().send(CameraEvent::PropertyRead(name));
                Ok(value)
            }
            Err(err) => Err(self.report(err)),
        }
    }

    /// Write a device property.
    ///
    /// Writing [`SETTINGS_DIALOG`] asks the driver to pop its settings
    /// dialog; the value is a trigger, not a persisted property.
    pub fn set_property(&self, code: PropertyCode, value: f64) -> Result<()> {
        let written = {
            let mut inner = self.lock();
            match inner.handle.as_mut() {
                Some(handle) => handle.set_property(code, value),
                None => {
                    drop(inner);
                    return Err(self.report(CameraError::NotConnected));
                }
            }
        };
        written.map_err(|err| self.report(err))
    }

    /// Read every table property into `snapshot`, in table order.
    ///
    /// Clears any prior snapshot content first. A failed read records
    /// `f64::NAN` at its position, is signalled on the error channel and
    /// does not stop the batch: one bad property must not corrupt the whole
    /// snapshot.
    pub fn save_all(&self, snapshot: &mut PropertySnapshot) -> Result<()> {
        snapshot.clear();
        let mut inner = self.lock();
        let Some(handle) = inner.handle.as_mut() else {
            drop(inner);
            return Err(self.report(CameraError::NotConnected));
        };

        for info in &PROPERTIES {
            match handle.get_property(info.code) {
                Ok(value) => snapshot.push(value),
                Err(err) => {
                    snapshot.push(f64::NAN);
                    let _ = self.report(err);
                }
            }
        }
        debug!("saved {} property values", snapshot.len());
        Ok(())
    }

    /// Write a snapshot back to the device, position by position.
    ///
    /// The snapshot must have exactly one value per table row. The settings
    /// dialog position and positions recorded as `f64::NAN` are skipped with
    /// their position consumed, keeping index alignment with
    /// [`save_all`](Self::save_all). Individual write failures are signalled
    /// and do not stop the batch.
    pub fn load_all(&self, snapshot: &PropertySnapshot) -> Result<()> {
        if snapshot.len() != PROPERTIES.len() {
            return Err(self.report(CameraError::SnapshotLength {
                expected: PROPERTIES.len(),
                actual: snapshot.len(),
            }));
        }

        let mut inner = self.lock();
        let Some(handle) = inner.handle.as_mut() else {
            drop(inner);
            return Err(self.report(CameraError::NotConnected));
        };

        for (info, &value) in PROPERTIES.iter().zip(snapshot.values()) {
            if info.code == SETTINGS_DIALOG {
                debug!("skipping settings dialog position");
                continue;
            }
            if value.is_nan() {
                debug!("skipping unset snapshot position for {}", info.name);
                continue;
            }
            if let Err(err) = handle.set_property(info.code, value) {
                let _ = self.report(err);
            }
        }
        Ok(())
    }
}
