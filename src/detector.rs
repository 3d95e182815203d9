// src/detector.rs
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use egui::ColorImage;
use image::RgbImage;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::camera::CameraThreadMsg;

/// Bounding box of a detected face, in camera-frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBounds {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One face as reported by the detection backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedFace {
    pub bounds: FaceBounds,
    /// Horizontal head rotation in degrees, sign convention backend-defined.
    pub yaw_angle: f32,
    /// Head tilt in degrees.
    pub roll_angle: f32,
    /// In [0, 1]. `None` when the backend does not classify expressions.
    pub smiling_probability: Option<f32>,
}

/// One frame's worth of detection results, order backend-defined.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectionEvent {
    pub faces: Vec<DetectedFace>,
}

/// Pluggable face detection backend.
///
/// The rest of the app treats detection as an opaque service: it hands the
/// backend an RGB frame and gets back a [`DetectionEvent`].
pub trait FaceBackend: Send {
    fn detect(&mut self, frame: &RgbImage) -> Result<DetectionEvent>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionMode {
    /// Larger strides and a coarser pyramid, for low-latency previews.
    Fast,
    /// Dense sliding window, the mode this app runs in.
    Accurate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classifications {
    /// Ask the backend for everything it can report (smile, pose angles).
    All,
    /// Geometry only.
    None,
}

/// Detector configuration, built by the UI at startup and handed to the
/// detector thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub model_path: PathBuf,
    pub mode: DetectionMode,
    pub classifications: Classifications,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/seeta_fd_frontal_v1.0.bin"),
            mode: DetectionMode::Accurate,
            classifications: Classifications::All,
        }
    }
}

/// Face detector backed by the `rustface` crate (SeetaFace engine).
pub struct RustfaceBackend {
    model: rustface::Model,
    mode: DetectionMode,
}

impl RustfaceBackend {
    /// Load the SeetaFace model from the configured path.
    pub fn new(config: &DetectorConfig) -> Result<Self> {
        let bytes = std::fs::read(&config.model_path).with_context(|| {
            format!(
                "failed to read face model from {}",
                config.model_path.display()
            )
        })?;
        let model = rustface::read_model(std::io::Cursor::new(bytes))
            .context("failed to parse SeetaFace model")?;
        if config.classifications == Classifications::All {
            // The frontal SeetaFace model reports geometry only; smiling
            // probability stays absent and the reducer treats that as
            // "not smiling".
            warn!("Expression classification requested but this backend reports geometry only.");
        }
        Ok(Self {
            model,
            mode: config.mode,
        })
    }
}

impl FaceBackend for RustfaceBackend {
    fn detect(&mut self, frame: &RgbImage) -> Result<DetectionEvent> {
        let gray = image::imageops::grayscale(frame);
        let (width, height) = gray.dimensions();

        let mut detector = rustface::create_detector_with_model(self.model.clone());
        match self.mode {
            DetectionMode::Accurate => {
                detector.set_min_face_size(20);
                detector.set_score_thresh(2.0);
                detector.set_pyramid_scale_factor(0.8);
                detector.set_slide_window_step(4, 4);
            }
            DetectionMode::Fast => {
                detector.set_min_face_size(40);
                detector.set_score_thresh(2.0);
                detector.set_pyramid_scale_factor(0.5);
                detector.set_slide_window_step(8, 8);
            }
        }

        let faces = detector.detect(&rustface::ImageData::new(gray.as_raw(), width, height));

        Ok(DetectionEvent {
            faces: faces
                .iter()
                .map(|face| {
                    let bbox = face.bbox();
                    DetectedFace {
                        bounds: FaceBounds {
                            x: bbox.x() as f32,
                            y: bbox.y() as f32,
                            width: bbox.width() as f32,
                            height: bbox.height() as f32,
                        },
                        yaw_angle: 0.0,
                        roll_angle: 0.0,
                        smiling_probability: None,
                    }
                })
                .collect(),
        })
    }
}

/// Message from the detector thread to the UI thread.
#[derive(Debug)]
pub enum DetectorThreadMsg {
    /// A camera frame ready for display, paired with its detection results.
    Frame {
        image: Arc<ColorImage>,
        event: DetectionEvent,
    },
    Error(String),
    /// Relayed camera authorization failure; the UI shows a blocking alert.
    NotAuthorized,
}

pub fn start_detector_thread(
    ui_sender: Sender<DetectorThreadMsg>,
    camera_receiver: Receiver<CameraThreadMsg>,
    stop_signal: Arc<AtomicBool>,
    ctx: egui::Context,
    config: DetectorConfig,
) -> JoinHandle<()> {
    info!("Spawning face detector thread");
    thread::spawn(move || {
        detection_loop(ui_sender, camera_receiver, stop_signal, ctx, config);
    })
}

fn detection_loop(
    ui_sender: Sender<DetectorThreadMsg>,
    camera_receiver: Receiver<CameraThreadMsg>,
    stop_signal: Arc<AtomicBool>,
    ctx: egui::Context,
    config: DetectorConfig,
) {
    info!("Detection loop started with {:?}", config);

    let mut backend = match RustfaceBackend::new(&config) {
        Ok(b) => {
            info!("Face detection backend loaded successfully.");
            b
        }
        Err(e) => {
            let error_msg = format!("Failed to load face detection backend: {:#}", e);
            error!("{}", error_msg);
            let _ = ui_sender.send(DetectorThreadMsg::Error(error_msg));
            ctx.request_repaint();
            return;
        }
    };

    let mut detect_time = Duration::from_secs(0);

    while !stop_signal.load(Ordering::Relaxed) {
        // Drain the camera channel, keeping only the newest frame. Older
        // frames are dropped rather than queued.
        let mut latest_frame_arc: Option<Arc<RgbImage>> = None;
        loop {
            match camera_receiver.try_recv() {
                Ok(CameraThreadMsg::Frame(frame)) => {
                    latest_frame_arc = Some(frame);
                }
                Ok(CameraThreadMsg::Error(err)) => {
                    warn!("Received error from camera thread: {}", err);
                    let _ = ui_sender.send(DetectorThreadMsg::Error(format!(
                        "Camera Error: {}",
                        err
                    )));
                    ctx.request_repaint();
                }
                Ok(CameraThreadMsg::NotAuthorized) => {
                    warn!("Camera reported NOT_AUTHORIZED. Relaying to UI.");
                    let _ = ui_sender.send(DetectorThreadMsg::NotAuthorized);
                    ctx.request_repaint();
                }
                Err(TryRecvError::Empty) => {
                    break;
                }
                Err(TryRecvError::Disconnected) => {
                    error!("Camera thread disconnected. Stopping detection loop.");
                    let _ = ui_sender.send(DetectorThreadMsg::Error(
                        "Camera thread disconnected.".to_string(),
                    ));
                    ctx.request_repaint();
                    stop_signal.store(true, Ordering::Relaxed);
                    break;
                }
            }
        }

        if stop_signal.load(Ordering::Relaxed) {
            break;
        }

        if let Some(frame_arc) = latest_frame_arc {
            let loop_start_time = Instant::now();

            let detect_start_time = Instant::now();
            let event = match backend.detect(&frame_arc) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Face detection failed: {:#}", e);
                    let _ = ui_sender
                        .send(DetectorThreadMsg::Error(format!("Detection failed: {:#}", e)));
                    ctx.request_repaint();
                    continue;
                }
            };
            detect_time = detect_start_time.elapsed();

            let color_image = {
                let size = [frame_arc.width() as usize, frame_arc.height() as usize];
                ColorImage::from_rgb(size, frame_arc.as_raw())
            };

            match ui_sender.try_send(DetectorThreadMsg::Frame {
                image: Arc::new(color_image),
                event,
            }) {
                Ok(_) => {
                    ctx.request_repaint();
                }
                Err(TrySendError::Full(_)) => {
                    warn!("UI channel full. Dropping detected frame.");
                }
                Err(TrySendError::Disconnected(_)) => {
                    info!("UI receiver disconnected. Stopping detection loop.");
                    break;
                }
            }
            debug!(
                "Detector processed frame in {:?}, backend time: {:?}",
                loop_start_time.elapsed(),
                detect_time
            );
        } else {
            // No new frame was available from the camera thread
            thread::sleep(Duration::from_millis(5));
        }
    }

    info!("Detection loop finishing (stop signal received or channel disconnected).");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_requests_accurate_mode_with_all_classifications() {
        let config = DetectorConfig::default();
        assert_eq!(config.mode, DetectionMode::Accurate);
        assert_eq!(config.classifications, Classifications::All);
        assert!(config.model_path.to_string_lossy().contains("seeta"));
    }
}
