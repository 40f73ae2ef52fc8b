//! Raw frame to delivery image conversion.
//!
//! The delivery pipeline hands every retrieved frame through [`to_rgb`] to
//! produce the `RgbImage` carried by the image-ready signal. MJPEG frames go
//! through the `image` crate decoder; YUYV frames are converted in place.

use crate::traits::{CameraError, PixelFormat, RawFrame, Result};
use image::RgbImage;

/// Convert a raw frame into the delivery image format.
///
/// Consumes the frame buffer; on success the pixel data is moved (RGB24) or
/// re-encoded (YUYV, MJPEG) into the returned image.
///
/// # Errors
///
/// Returns `CameraError::ConversionFailed` if the buffer does not match the
/// declared dimensions or the compressed data cannot be decoded.
pub fn to_rgb(frame: RawFrame) -> Result<RgbImage> {
    match frame.format {
        PixelFormat::Yuyv => yuyv_to_rgb(&frame),
        PixelFormat::Mjpg => mjpg_to_rgb(&frame),
        PixelFormat::Rgb24 => {
            let (width, height) = (frame.width, frame.height);
            RgbImage::from_raw(width, height, frame.data).ok_or_else(|| {
                CameraError::ConversionFailed(format!(
                    "RGB24 buffer does not match {width}x{height}"
                ))
            })
        }
    }
}

fn mjpg_to_rgb(frame: &RawFrame) -> Result<RgbImage> {
    let decoded = image::load_from_memory(&frame.data)
        .map_err(|err| CameraError::ConversionFailed(err.to_string()))?;
    Ok(decoded.to_rgb8())
}

fn yuyv_to_rgb(frame: &RawFrame) -> Result<RgbImage> {
    let width = frame.width as usize;
    let height = frame.height as usize;
    if width % 2 != 0 {
        return Err(CameraError::ConversionFailed(format!(
            "YUYV requires even width, got {width}"
        )));
    }

    let expected = width * height * 2;
    let Some(packed) = frame.data.get(..expected) else {
        return Err(CameraError::ConversionFailed(format!(
            "YUYV buffer too small: {} < {expected}",
            frame.data.len()
        )));
    };

    // YUYV packs two pixels into [Y0 U Y1 V]; both share U and V.
    let mut rgb = Vec::with_capacity(width * height * 3);
    for chunk in packed.chunks_exact(4) {
        let &[y0, u, y1, v] = chunk else {
            break;
        };
        let (r, g, b) = yuv_to_rgb(y0, u, v);
        rgb.extend_from_slice(&[r, g, b]);
        let (r, g, b) = yuv_to_rgb(y1, u, v);
        rgb.extend_from_slice(&[r, g, b]);
    }

    RgbImage::from_raw(frame.width, frame.height, rgb)
        .ok_or_else(|| CameraError::ConversionFailed("YUYV conversion produced no image".to_owned()))
}

/// Convert YUV values to RGB.
///
/// Uses the ITU-R BT.601 conversion formula.
#[allow(clippy::many_single_char_names)]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    let clamp = |val: f32| -> u8 {
        if val < 0.0 {
            0
        } else if val > 255.0 {
            255
        } else {
            #[allow(clippy::cast_possible_truncation)]
            #[allow(clippy::cast_sign_loss)]
            {
                val as u8
            }
        }
    };

    (clamp(r), clamp(g), clamp(b))
}
