//! Usb-cam-capture binary for exercising a capture session.

use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;
use usb_cam_capture::{
    AcquireMode, CameraEvent, CaptureConfig, CaptureSession, PropertySnapshot, V4l2Opener,
    PROPERTIES,
};

fn main() {
    env_logger::init();

    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> usb_cam_capture::Result<()> {
    let index = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(0u32);

    let opener = V4l2Opener::new(CaptureConfig::default());
    let (session, events) = CaptureSession::new(Box::new(opener));

    session.connect(index)?;
    println!("Connected to device {index}");

    let mut snapshot = PropertySnapshot::new();
    session.save_all(&mut snapshot)?;
    for (info, value) in PROPERTIES.iter().zip(snapshot.values()) {
        if value.is_nan() {
            continue;
        }
        println!("  {} = {value}", info.name);
    }

    session.set_mode(AcquireMode::Live);
    session.trigger()?;

    let mut delivered = 0u32;
    while delivered < 10 {
        match events.recv_timeout(Duration::from_secs(5)) {
            Ok(CameraEvent::ImageReady(image)) => {
                delivered += 1;
                println!(
                    "Frame {delivered}: {}x{}, {} bytes",
                    image.width(),
                    image.height(),
                    image.as_raw().len()
                );
            }
            Ok(CameraEvent::Error(msg)) => eprintln!("Error event: {msg}"),
            Ok(event) => println!("Event: {event:?}"),
            Err(RecvTimeoutError::Timeout) => {
                eprintln!("No frame within 5s, giving up");
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    session.disconnect()?;
    println!("Disconnected");
    Ok(())
}
