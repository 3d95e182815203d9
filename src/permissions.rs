// src/permissions.rs
//
// Startup permission gate. Camera and microphone access are requested once,
// sequentially and independently, on a background thread. Outcomes are
// logged and nothing else branches on them: if a grant is missing the
// camera pipeline later reports NOT_AUTHORIZED on its own.

use std::fmt;
use std::thread::{self, JoinHandle};

use log::info;

#[cfg(target_os = "macos")]
use log::{error, warn};

#[cfg(target_os = "macos")]
use std::time::Duration;

#[cfg(target_os = "macos")]
use anyhow::{anyhow, Context, Result};

/// Outcome of one permission request. Logged, never acted upon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
    Error,
}

impl fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionStatus::Granted => write!(f, "granted"),
            PermissionStatus::Denied => write!(f, "denied"),
            PermissionStatus::Error => write!(f, "error"),
        }
    }
}

/// Request both permissions on a background thread so the render loop is
/// never blocked. Camera first, then microphone; one failing never skips
/// the other.
pub fn request_at_startup() -> JoinHandle<()> {
    thread::spawn(|| {
        let camera = request_camera_access();
        info!("Camera permission request finished: {}", camera);
        let microphone = request_microphone_access();
        info!("Microphone permission request finished: {}", microphone);
    })
}

/// Ask the platform for camera access. Only macOS requires an explicit
/// runtime grant; elsewhere this reports `Granted` without prompting.
pub fn request_camera_access() -> PermissionStatus {
    info!("Requesting camera access: the app needs the camera for live face tracking.");

    #[cfg(target_os = "macos")]
    {
        match request_camera_macos() {
            Ok(true) => PermissionStatus::Granted,
            Ok(false) => {
                warn!("Camera permission denied by the user.");
                PermissionStatus::Denied
            }
            Err(e) => {
                error!("Camera permission request failed: {:#}", e);
                PermissionStatus::Error
            }
        }
    }

    #[cfg(not(target_os = "macos"))]
    {
        info!("Runtime camera permission grants are not required on this platform.");
        PermissionStatus::Granted
    }
}

/// Ask the platform for microphone access. The app captures no audio; the
/// grant only keeps future capture paths from failing silently.
pub fn request_microphone_access() -> PermissionStatus {
    info!("Requesting microphone access: the app needs the microphone for audio capture.");

    #[cfg(target_os = "macos")]
    {
        match probe_microphone() {
            Ok(()) => PermissionStatus::Granted,
            Err(e) => {
                let msg = format!("{:#}", e).to_ascii_lowercase();
                if msg.contains("denied") || msg.contains("permission") {
                    warn!("Microphone permission denied: {:#}", e);
                    PermissionStatus::Denied
                } else {
                    error!("Microphone permission request failed: {:#}", e);
                    PermissionStatus::Error
                }
            }
        }
    }

    #[cfg(not(target_os = "macos"))]
    {
        info!("Runtime microphone permission grants are not required on this platform.");
        PermissionStatus::Granted
    }
}

/// AVFoundation camera grant via nokhwa's initialization callback. The
/// callback fires once the user has answered the system dialog.
#[cfg(target_os = "macos")]
fn request_camera_macos() -> Result<bool> {
    let (tx, rx) = crossbeam_channel::bounded::<bool>(1);
    nokhwa::nokhwa_initialize(move |granted| {
        let _ = tx.try_send(granted);
    });
    // Generous timeout: the dialog stays up until the user answers.
    rx.recv_timeout(Duration::from_secs(120))
        .context("timed out waiting for the camera permission callback")
}

/// Building an input stream on the default device is what triggers the
/// macOS microphone prompt. The stream is torn down immediately after.
#[cfg(target_os = "macos")]
fn probe_microphone() -> Result<()> {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, StreamConfig};

    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("no default input device found"))?;
    let device_name = device.name().unwrap_or_else(|_| "Unnamed Device".into());
    info!("Probing input device for microphone access: {}", device_name);

    let supported_config = device
        .supported_input_configs()
        .with_context(|| format!("error querying supported input configs for {}", device_name))?
        .find(|c| c.sample_format() == SampleFormat::F32)
        .ok_or_else(|| anyhow!("no F32 input config found for {}", device_name))?
        .with_max_sample_rate();

    let config: StreamConfig = supported_config.into();
    let err_fn = move |err| {
        error!("An error occurred on the probe audio stream: {}", err);
    };
    let stream = device
        .build_input_stream(&config, |_data: &[f32], _| {}, err_fn, None)
        .with_context(|| format!("failed to build probe stream on {}", device_name))?;
    stream
        .play()
        .context("failed to start the probe audio stream")?;
    drop(stream);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_matches_tri_state_names() {
        assert_eq!(PermissionStatus::Granted.to_string(), "granted");
        assert_eq!(PermissionStatus::Denied.to_string(), "denied");
        assert_eq!(PermissionStatus::Error.to_string(), "error");
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn requests_are_noops_where_no_runtime_grant_exists() {
        assert_eq!(request_camera_access(), PermissionStatus::Granted);
        assert_eq!(request_microphone_access(), PermissionStatus::Granted);
    }
}
