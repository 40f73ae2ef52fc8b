//! V4L2 capture backend using the v4l crate.
//!
//! [`V4l2Handle`] owns the open device plus a capture worker thread. The
//! worker mmap-streams frames, publishes the most recent one and invokes the
//! registered grab callback once per frame. `stop` is a non-blocking
//! run-flag store so the delivery pipeline can halt acquisition from inside
//! the callback; the worker is joined when acquisition restarts or the
//! handle drops.

use crate::config::CaptureConfig;
use crate::properties::SETTINGS_DIALOG;
use crate::traits::{
    CameraError, CaptureHandle, GrabCallback, HandleOpener, PixelFormat, PropertyCode, RawFrame,
    Result,
};
use log::error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use v4l::buffer::Type;
use v4l::control::{Control, Value};
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream as V4lCaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn driver_err(err: &dyn std::fmt::Display) -> CameraError {
    CameraError::Driver(err.to_string())
}

/// Map a table property code to a V4L2 control ID (videodev2.h).
///
/// Codes 3/4/5 (frame geometry and rate) go through format ioctls instead;
/// everything unlisted is rejected by the device layer.
const fn control_id(code: PropertyCode) -> Option<u32> {
    match code {
        10 => Some(0x0098_0900), // brightness
        11 => Some(0x0098_0901), // contrast
        12 => Some(0x0098_0902), // saturation
        13 => Some(0x0098_0903), // hue
        14 => Some(0x0098_0913), // gain
        15 => Some(0x009a_0902), // exposure absolute
        20 => Some(0x0098_091b), // sharpness
        21 => Some(0x009a_0901), // exposure auto
        22 => Some(0x0098_0910), // gamma
        23 => Some(0x0098_091a), // white balance temperature
        27 => Some(0x009a_090d), // zoom absolute
        28 => Some(0x009a_090a), // focus absolute
        32 => Some(0x0098_091c), // backlight compensation
        33 => Some(0x009a_0908), // pan absolute
        34 => Some(0x009a_0909), // tilt absolute
        36 => Some(0x009a_0911), // iris absolute
        39 => Some(0x009a_090c), // focus auto
        _ => None,
    }
}

/// Opens V4L2 capture handles by `/dev/video<index>` number.
#[derive(Debug, Clone, Default)]
pub struct V4l2Opener {
    config: CaptureConfig,
}

impl V4l2Opener {
    /// Create an opener negotiating the given capture configuration.
    #[must_use]
    pub const fn new(config: CaptureConfig) -> Self {
        Self { config }
    }
}

impl HandleOpener for V4l2Opener {
    fn open(&self, index: u32) -> Result<Box<dyn CaptureHandle>> {
        V4l2Handle::open(index, &self.config).map(|handle| Box::new(handle) as Box<_>)
    }
}

/// One open V4L2 capture device.
pub struct V4l2Handle {
    device: Arc<Device>,
    format: Format,
    pixel_format: PixelFormat,
    buffer_count: u32,
    on_grab: Arc<Mutex<Option<GrabCallback>>>,
    latest: Arc<Mutex<Option<RawFrame>>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl V4l2Handle {
    /// Open the device at `index` and negotiate the capture format.
    ///
    /// MJPG is requested first; YUYV and RGB3 are accepted when the driver
    /// substitutes them. Anything else fails the open.
    pub fn open(index: u32, config: &CaptureConfig) -> Result<Self> {
        let device = Device::new(index as usize)
            .map_err(|err| CameraError::DeviceUnavailable(format!("device {index}: {err}")))?;

        let requested = Format::new(config.width(), config.height(), FourCC::new(b"MJPG"));
        let format = device
            .set_format(&requested)
            .map_err(|err| CameraError::DeviceUnavailable(format!("device {index}: {err}")))?;

        let pixel_format = match &format.fourcc.repr {
            b"MJPG" => PixelFormat::Mjpg,
            b"YUYV" => PixelFormat::Yuyv,
            b"RGB3" => PixelFormat::Rgb24,
            _ => {
                return Err(CameraError::DeviceUnavailable(format!(
                    "device {index}: unsupported pixel format {:?}",
                    format.fourcc
                )));
            }
        };

        let params = v4l::video::capture::Parameters::with_fps(config.fps());
        device
            .set_params(&params)
            .map_err(|err| CameraError::DeviceUnavailable(format!("device {index}: {err}")))?;

        Ok(Self {
            device: Arc::new(device),
            format,
            pixel_format,
            buffer_count: config.buffer_count(),
            on_grab: Arc::new(Mutex::new(None)),
            latest: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }

    fn reap_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("capture worker terminated abnormally");
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn read_control(&self, code: PropertyCode) -> Result<f64> {
        let id = control_id(code).ok_or(CameraError::PropertyUnsupported(code))?;
        let control = self
            .device
            .control(id)
            .map_err(|_| CameraError::PropertyUnsupported(code))?;
        match control.value {
            Value::Integer(value) => Ok(value as f64),
            Value::Boolean(value) => Ok(if value { 1.0 } else { 0.0 }),
            _ => Err(CameraError::PropertyUnsupported(code)),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_control(&self, code: PropertyCode, value: f64) -> Result<()> {
        let id = control_id(code).ok_or(CameraError::PropertyUnsupported(code))?;
        // Read the current control to learn its payload type.
        let current = self
            .device
            .control(id)
            .map_err(|_| CameraError::PropertyUnsupported(code))?;
        let value = match current.value {
            Value::Integer(_) => Value::Integer(value as i64),
            Value::Boolean(_) => Value::Boolean(value.abs() > f64::EPSILON),
            _ => return Err(CameraError::PropertyUnsupported(code)),
        };
        self.device
            .set_control(Control { id, value })
            .map_err(|err| driver_err(&err))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn resize(&mut self, code: PropertyCode, value: f64) -> Result<()> {
        let mut format = self.device.format().map_err(|err| driver_err(&err))?;
        if code == 3 {
            format.width = value as u32;
        } else {
            format.height = value as u32;
        }
        self.format = self
            .device
            .set_format(&format)
            .map_err(|err| driver_err(&err))?;
        Ok(())
    }
}

impl CaptureHandle for V4l2Handle {
    fn register(&mut self, on_grab: GrabCallback) -> Result<()> {
        *lock(&self.on_grab) = Some(on_grab);
        Ok(())
    }

    fn unregister(&mut self) -> Result<()> {
        // Blocks until an in-flight notification completes, so no callback
        // can fire once this returns.
        *lock(&self.on_grab) = None;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        // A previously halted worker has exited by now; reclaim it.
        self.reap_worker();
        self.running.store(true, Ordering::SeqCst);

        let worker = CaptureWorker {
            device: Arc::clone(&self.device),
            width: self.format.width,
            height: self.format.height,
            pixel_format: self.pixel_format,
            buffer_count: self.buffer_count,
            latest: Arc::clone(&self.latest),
            on_grab: Arc::clone(&self.on_grab),
            running: Arc::clone(&self.running),
        };
        match thread::Builder::new()
            .name("v4l2-capture".to_owned())
            .spawn(move || worker.run())
        {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                Err(CameraError::Driver(format!(
                    "spawning capture worker failed: {err}"
                )))
            }
        }
    }

    fn stop(&mut self) -> Result<()> {
        // Non-blocking by contract: the worker observes the flag after its
        // current frame and exits; it is joined on restart or drop.
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn retrieve(&mut self) -> Result<RawFrame> {
        Ok(lock(&self.latest).take().unwrap_or_else(RawFrame::empty))
    }

    fn get_property(&mut self, code: PropertyCode) -> Result<f64> {
        match code {
            3 => {
                let format = self.device.format().map_err(|err| driver_err(&err))?;
                Ok(f64::from(format.width))
            }
            4 => {
                let format = self.device.format().map_err(|err| driver_err(&err))?;
                Ok(f64::from(format.height))
            }
            5 => {
                let params = self.device.params().map_err(|err| driver_err(&err))?;
                let interval = params.interval;
                if interval.numerator == 0 {
                    return Err(CameraError::Driver("invalid frame interval".to_owned()));
                }
                Ok(f64::from(interval.denominator) / f64::from(interval.numerator))
            }
            6 => {
                let format = self.device.format().map_err(|err| driver_err(&err))?;
                Ok(f64::from(u32::from_le_bytes(format.fourcc.repr)))
            }
            _ => self.read_control(code),
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn set_property(&mut self, code: PropertyCode, value: f64) -> Result<()> {
        match code {
            // No settings dialog exists under V4L2.
            SETTINGS_DIALOG => Err(CameraError::PropertyUnsupported(code)),
            3 | 4 => self.resize(code, value),
            5 => {
                let params = v4l::video::capture::Parameters::with_fps(value as u32);
                self.device
                    .set_params(&params)
                    .map_err(|err| driver_err(&err))?;
                Ok(())
            }
            _ => self.write_control(code, value),
        }
    }
}

impl Drop for V4l2Handle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        *lock(&self.on_grab) = None;
        self.reap_worker();
    }
}

struct CaptureWorker {
    device: Arc<Device>,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    buffer_count: u32,
    latest: Arc<Mutex<Option<RawFrame>>>,
    on_grab: Arc<Mutex<Option<GrabCallback>>>,
    running: Arc<AtomicBool>,
}

impl CaptureWorker {
    fn run(self) {
        if let Err(err) = self.stream() {
            error!("capture stream failed: {err}");
            self.running.store(false, Ordering::SeqCst);
        }
    }

    fn stream(&self) -> Result<()> {
        let mut stream =
            MmapStream::with_buffers(&self.device, Type::VideoCapture, self.buffer_count)
                .map_err(|err| driver_err(&err))?;

        while self.running.load(Ordering::SeqCst) {
            let (data, meta) = V4lCaptureStream::next(&mut stream).map_err(|err| driver_err(&err))?;

            // The mmap buffer is only valid until the next dequeue, and for
            // compressed formats only `bytesused` of it is payload.
            let used = meta.bytesused as usize;
            let payload = data.get(..used).unwrap_or(data).to_vec();
            *lock(&self.latest) = Some(RawFrame::new(
                payload,
                self.width,
                self.height,
                self.pixel_format,
            ));

            // Halted while dequeuing: drop the notification.
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            if let Some(callback) = lock(&self.on_grab).as_mut() {
                callback();
            }
        }
        Ok(())
    }
}
