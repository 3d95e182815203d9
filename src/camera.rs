// src/camera.rs
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};
use crossbeam_channel::{SendError, Sender};
use image::RgbImage;
use log::{error, info, warn};
use nokhwa::{
    pixel_format::{RgbFormat, YuyvFormat},
    utils::{
        ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
        Resolution,
    },
    Camera, NokhwaError,
};

// --- Constants ---
const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const REQUESTED_FPS: u32 = 30;

#[derive(Debug)]
pub enum CameraThreadMsg {
    Frame(Arc<RgbImage>),
    Error(String),
    /// The platform refused access to the camera. Surfaced to the user as a
    /// blocking alert; not recoverable from inside the app.
    NotAuthorized,
}

pub fn start_camera_thread(
    index: CameraIndex,
    msg_sender: Sender<CameraThreadMsg>,
    stop_signal: Arc<AtomicBool>,
    ctx: egui::Context,
) -> JoinHandle<()> {
    info!("Spawning camera capture thread.");
    thread::spawn(move || {
        camera_capture_loop(index, msg_sender, stop_signal, ctx);
    })
}

/// Heuristic over nokhwa's string-typed errors: open/stream failures caused
/// by a missing permission grant mention authorization or denial.
fn is_authorization_error(err: &NokhwaError) -> bool {
    let msg = err.to_string().to_ascii_lowercase();
    msg.contains("not authorized")
        || msg.contains("notauthorized")
        || msg.contains("permission")
        || msg.contains("denied")
}

/// On macOS the AVFoundation permission state can be queried up front.
#[cfg(target_os = "macos")]
fn camera_authorized() -> bool {
    nokhwa::nokhwa_check()
}

#[cfg(not(target_os = "macos"))]
fn camera_authorized() -> bool {
    true
}

fn camera_capture_loop(
    index: CameraIndex,
    msg_sender: Sender<CameraThreadMsg>,
    stop_signal: Arc<AtomicBool>,
    ctx: egui::Context,
) {
    info!("Camera capture loop started. Requesting YUYV format.");

    if !camera_authorized() {
        warn!("Camera access not authorized by the platform.");
        let _ = msg_sender.send(CameraThreadMsg::NotAuthorized);
        ctx.request_repaint();
        return;
    }

    let requested_resolution = Resolution::new(REQUESTED_WIDTH, REQUESTED_HEIGHT);
    let requested_cam_format =
        CameraFormat::new(requested_resolution, FrameFormat::YUYV, REQUESTED_FPS);
    let requested_format =
        RequestedFormat::new::<YuyvFormat>(RequestedFormatType::Closest(requested_cam_format));
    info!("Requested camera format: {:?}", requested_format);

    // Index 0 is the built-in front-facing camera on the machines we target.
    // No audio is captured on this path.
    let camera_result = Camera::new(index.clone(), requested_format).or_else(|err| {
        warn!(
            "Default backend failed: {}. Trying AVFoundation explicitly...",
            err
        );
        Camera::with_backend(index, requested_format, ApiBackend::AVFoundation)
    });

    let mut camera = match camera_result {
        Ok(cam) => {
            info!("Camera initialized successfully.");
            cam
        }
        Err(err) => {
            if is_authorization_error(&err) {
                warn!("Camera open failed with authorization error: {}", err);
                let _ = msg_sender.send(CameraThreadMsg::NotAuthorized);
            } else {
                let error_msg = format!("Failed to open camera: {}", err);
                error!("{}", error_msg);
                let _ = msg_sender.send(CameraThreadMsg::Error(error_msg));
            }
            ctx.request_repaint();
            return;
        }
    };

    let camera_format = camera.camera_format();
    info!("Actual camera format received: {:?}", camera_format);
    info!("Camera description: {:?}", camera.info().description());
    if let Err(err) = camera.open_stream() {
        if is_authorization_error(&err) {
            warn!("Camera stream open failed with authorization error: {}", err);
            let _ = msg_sender.send(CameraThreadMsg::NotAuthorized);
        } else {
            let error_msg = format!("Failed to open stream: {}", err);
            error!("{}", error_msg);
            let _ = msg_sender.send(CameraThreadMsg::Error(error_msg));
        }
        ctx.request_repaint();
        return;
    }
    info!("Camera stream opened successfully.");

    // --- Frame Capture Loop ---
    while !stop_signal.load(Ordering::Relaxed) {
        match camera.frame() {
            Ok(frame) => match frame.decode_image::<RgbFormat>() {
                Ok(decoded_rgb_image) => {
                    let frame_arc = Arc::new(decoded_rgb_image);
                    if let Err(SendError(_)) = msg_sender.send(CameraThreadMsg::Frame(frame_arc)) {
                        info!("Detector thread receiver disconnected. Stopping camera loop.");
                        break;
                    }
                }
                Err(err) => {
                    warn!("Failed to decode frame to RGB: {}", err);
                    thread::sleep(std::time::Duration::from_millis(50));
                }
            },
            Err(err) => match err {
                NokhwaError::ReadFrameError(msg) if msg.contains("Timeout") => {
                    warn!("Camera frame read timeout.");
                    thread::sleep(std::time::Duration::from_millis(100));
                }
                _ => {
                    let error_msg = format!("Failed to capture frame: {}", err);
                    error!("{}", error_msg);
                    if let Err(SendError(_)) = msg_sender.send(CameraThreadMsg::Error(error_msg)) {
                        info!("Detector thread receiver disconnected after capture error.");
                        break;
                    }
                    thread::sleep(std::time::Duration::from_secs(1));
                }
            },
        }
    }
    // --- Cleanup ---
    info!("Camera capture loop stopping signal received.");
    if let Err(e) = camera.stop_stream() {
        error!("Failed to stop camera stream cleanly: {}", e);
    }
    info!("Camera capture loop finished.");
}
