// src/ui.rs
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, TryRecvError};
use egui::{Align, Color32, ImageData, Layout, Stroke, StrokeKind, TextureHandle, TextureOptions, Vec2};
use log::{debug, error, info};
use nokhwa::utils::{CameraIndex, Resolution};

use crate::{
    camera,
    detector::{self, Classifications, DetectionMode, DetectorConfig, DetectorThreadMsg},
    overlay::{self, OverlayBox},
    permissions,
};

const FPS_UPDATE_INTERVAL: Duration = Duration::from_millis(500);

// Detector -> UI channel capacity; frames beyond this are dropped.
const UI_CHANNEL_CAPACITY: usize = 4;

pub struct FaceBoxAppUI {
    texture: Option<TextureHandle>,

    // --- Thread Handles and Signals ---
    cam_thread_handle: Option<JoinHandle<()>>,
    cam_stop_signal: Arc<AtomicBool>,
    det_thread_handle: Option<JoinHandle<()>>,
    det_stop_signal: Arc<AtomicBool>,

    // --- Channel Receiver ---
    // The UI only hears from the detector thread; camera trouble is relayed.
    det_thread_rx: Receiver<DetectorThreadMsg>,

    // --- State Fields ---
    /// The single overlay slot: written only here, read only by the
    /// renderer below. Replaced wholesale on every detection event.
    overlay: Option<OverlayBox>,
    camera_error: Option<String>,
    detector_error: Option<String>,
    camera_not_authorized: bool,
    camera_resolution: Option<Resolution>,
    texture_size: Option<Vec2>,

    // --- FPS Fields ---
    last_fps_update_time: Instant,
    frames_since_last_update: u32,
    last_calculated_fps: f32,
}

impl FaceBoxAppUI {
    pub fn new(cc: &eframe::CreationContext<'_>) -> Self {
        info!("Initializing FaceBoxAppUI");

        // Fire-and-forget permission gate: camera then microphone, logged,
        // never branched on. The render loop starts regardless.
        permissions::request_at_startup();

        let camera_index = CameraIndex::Index(0);

        // --- Channels ---
        // Camera -> Detector
        let (cam_to_det_tx, cam_to_det_rx) = crossbeam_channel::unbounded();
        // Detector -> UI
        let (det_to_ui_tx, det_to_ui_rx) = crossbeam_channel::bounded(UI_CHANNEL_CAPACITY);

        // --- Stop Signals ---
        let cam_stop_signal = Arc::new(AtomicBool::new(false));
        let det_stop_signal = Arc::new(AtomicBool::new(false));

        // --- Start Camera Thread ---
        let cam_stop_signal_clone = cam_stop_signal.clone();
        let cam_ctx_clone = cc.egui_ctx.clone();
        let cam_thread_handle = Some(camera::start_camera_thread(
            camera_index,
            cam_to_det_tx,
            cam_stop_signal_clone,
            cam_ctx_clone,
        ));

        // Accurate detection with every classification the backend can
        // report, matching the capture configuration handed to the camera.
        let detector_config = DetectorConfig {
            model_path: PathBuf::from("models/seeta_fd_frontal_v1.0.bin"),
            mode: DetectionMode::Accurate,
            classifications: Classifications::All,
        };

        // --- Start Detector Thread ---
        let det_stop_signal_clone = det_stop_signal.clone();
        let det_ctx_clone = cc.egui_ctx.clone();
        let det_thread_handle = Some(detector::start_detector_thread(
            det_to_ui_tx,
            cam_to_det_rx,
            det_stop_signal_clone,
            det_ctx_clone,
            detector_config,
        ));

        Self {
            texture: None,
            cam_thread_handle,
            cam_stop_signal,
            det_thread_handle,
            det_stop_signal,
            det_thread_rx: det_to_ui_rx,
            overlay: None,
            camera_error: None,
            detector_error: None,
            camera_not_authorized: false,
            camera_resolution: None,
            texture_size: None,
            last_fps_update_time: Instant::now(),
            frames_since_last_update: 0,
            last_calculated_fps: 0.0,
        }
    }

    fn update_fps_counter(&mut self) {
        self.frames_since_last_update += 1;
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fps_update_time);

        if elapsed >= FPS_UPDATE_INTERVAL {
            let elapsed_secs = elapsed.as_secs_f32();
            self.last_calculated_fps = if elapsed_secs > 0.0 {
                self.frames_since_last_update as f32 / elapsed_secs
            } else {
                f32::INFINITY
            };
            self.frames_since_last_update = 0;
            self.last_fps_update_time = now;
        }
    }

    /// Drain the detector channel, updating the texture and the overlay
    /// slot. The reducer runs here, once per received event, never
    /// concurrently with the renderer.
    fn drain_detector_messages(&mut self, ctx: &egui::Context) {
        loop {
            match self.det_thread_rx.try_recv() {
                Ok(msg) => match msg {
                    DetectorThreadMsg::Frame { image, event } => {
                        let size = image.size;
                        let frame_size_vec = Vec2::new(size[0] as f32, size[1] as f32);

                        if self.camera_resolution.is_none() {
                            self.camera_resolution =
                                Some(Resolution::new(size[0] as u32, size[1] as u32));
                        }

                        match self.texture {
                            Some(ref mut texture) => {
                                if self.texture_size.map_or(true, |s| s != frame_size_vec) {
                                    debug!("Texture size changed to: {:?}", frame_size_vec);
                                    self.texture_size = Some(frame_size_vec);
                                }
                                texture.set(ImageData::Color(image), TextureOptions::LINEAR);
                            }
                            None => {
                                info!("Creating texture with size: {:?}", size);
                                let new_texture = ctx.load_texture(
                                    "webcam_stream",
                                    ImageData::Color(image),
                                    TextureOptions::LINEAR,
                                );
                                self.texture_size = Some(frame_size_vec);
                                self.texture = Some(new_texture);
                            }
                        }

                        // Log-only classification, then replace the overlay
                        // wholesale. An empty event clears it.
                        self.overlay = overlay::observe_and_reduce(&event);
                    }
                    DetectorThreadMsg::Error(err) => {
                        if err.starts_with("Camera Error") {
                            self.camera_error = Some(err);
                        } else {
                            self.detector_error = Some(err);
                        }
                    }
                    DetectorThreadMsg::NotAuthorized => {
                        self.camera_not_authorized = true;
                    }
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.detector_error =
                        Some("Detector thread disconnected unexpectedly.".to_string());
                    error!("Detector thread disconnected!");
                    if let Some(handle) = self.det_thread_handle.take() {
                        if let Err(e) = handle.join() {
                            error!("Detector thread panicked: {:?}", e);
                            self.detector_error =
                                Some(format!("Detector thread panicked: {:?}", e));
                        }
                    }
                    break;
                }
            }
        }
    }

    /// Paint the overlay box above the camera image. Box coordinates are in
    /// camera-frame pixels; `image_rect` is where the frame actually landed
    /// on screen, so the box is scaled into that space.
    fn paint_overlay(&self, ui: &egui::Ui, image_rect: egui::Rect) {
        let (Some(boxed), Some(tex_size)) = (self.overlay, self.texture_size) else {
            return;
        };
        if tex_size.x <= 0.0 || tex_size.y <= 0.0 {
            return;
        }

        let scale_x = image_rect.width() / tex_size.x;
        let scale_y = image_rect.height() / tex_size.y;
        let rect = egui::Rect::from_min_size(
            image_rect.min + Vec2::new(boxed.x * scale_x, boxed.y * scale_y),
            Vec2::new(boxed.width * scale_x, boxed.height * scale_y),
        );

        ui.painter().rect_stroke(
            rect,
            egui::CornerRadius::ZERO,
            Stroke::new(5.0, Color32::RED),
            StrokeKind::Inside,
        );
    }
}

impl eframe::App for FaceBoxAppUI {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.update_fps_counter();
        // Clear errors each frame, let new messages overwrite them
        self.camera_error = None;
        self.detector_error = None;

        self.drain_detector_messages(ctx);

        // --- Top Panel (Menu Bar) ---
        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui.button("Quit").clicked() {
                        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                    }
                });
                ui.add_space(16.0);
                egui::widgets::global_theme_preference_buttons(ui);
            });
        });

        // --- Bottom Panel (FPS / Resolution) ---
        egui::TopBottomPanel::bottom("bottom_panel")
            .resizable(false)
            .show(ctx, |ui| {
                ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                    ui.label(format!("UI FPS: {:.1}", self.last_calculated_fps));
                    ui.add_space(10.0);
                    if let Some(res) = self.camera_resolution {
                        ui.label(format!("Cam Res: {}x{}", res.width(), res.height()));
                    } else if self.camera_error.is_none() {
                        ui.label("Cam Res: ...");
                    }
                });
            });

        // --- Central Panel (Camera feed + overlay) ---
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("FaceBox Cam");
            ui.separator();

            if let Some(err) = &self.camera_error {
                ui.colored_label(Color32::YELLOW, format!("Camera Status: {}", err));
            }
            if let Some(err) = &self.detector_error {
                ui.colored_label(Color32::RED, format!("Detector Status: {}", err));
            }

            match &self.texture {
                Some(texture) => {
                    if let Some(tex_size) = self.texture_size {
                        let aspect_ratio = if tex_size.y > 0.0 {
                            tex_size.x / tex_size.y
                        } else {
                            1.0
                        };
                        let available_width = ui.available_width();
                        let available_height = ui.available_height();
                        let mut image_width = available_width;
                        let mut image_height = available_width / aspect_ratio;
                        if image_height > available_height {
                            image_height = available_height;
                            image_width = available_height * aspect_ratio;
                        }

                        ui.with_layout(Layout::top_down(Align::Center), |ui| {
                            let response = ui.add(
                                egui::Image::new(texture)
                                    .max_width(image_width)
                                    .max_height(image_height)
                                    .maintain_aspect_ratio(true)
                                    .corner_radius(5.0),
                            );
                            self.paint_overlay(ui, response.rect);
                        });
                    } else {
                        ui.label("Texture exists but size unknown.");
                    }
                }
                None if self.camera_error.is_none()
                    && self.detector_error.is_none()
                    && !self.camera_not_authorized =>
                {
                    ui.with_layout(Layout::top_down(Align::Center), |ui| {
                        ui.add_space(ui.available_height() / 3.0);
                        ui.spinner();
                        ui.label("Initializing camera stream...");
                    });
                }
                None => {} // Error or alert shown elsewhere
            }
        });

        // --- Blocking alert: camera not authorized ---
        if self.camera_not_authorized {
            let modal = egui::Modal::new(egui::Id::new("camera_not_authorized")).show(ctx, |ui| {
                ui.heading("Camera not authorized");
                ui.label(
                    "The app was not granted camera access. \
                     Grant permission in the system settings and restart.",
                );
                ui.separator();
                ui.button("OK").clicked()
            });
            if modal.inner {
                self.camera_not_authorized = false;
            }
        }
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        info!("Exit requested. Stopping threads...");
        self.cam_stop_signal.store(true, Ordering::Relaxed);
        self.det_stop_signal.store(true, Ordering::Relaxed);

        if let Some(handle) = self.cam_thread_handle.take() {
            if let Err(e) = handle.join() {
                error!("Error joining camera thread: {:?}", e);
            } else {
                info!("Camera thread joined successfully.");
            }
        }
        if let Some(handle) = self.det_thread_handle.take() {
            if let Err(e) = handle.join() {
                error!("Error joining detector thread: {:?}", e);
            } else {
                info!("Detector thread joined successfully.");
            }
        }
    }
}
