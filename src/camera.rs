use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use log::debug;

use crate::command::{CommandTemplate, run_to_completion};
use crate::config::{CameraConfig, CameraKind};
use crate::error::CaptureError;

/// Grabs a single frame from a camera into a file.
pub trait ImageCapture: Send + Sync {
    /// Write one frame for `camera` to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if no frame could be written.
    fn capture(&self, camera: &CameraConfig, path: &Path) -> Result<(), CaptureError>;
}

/// Frame grabber backed by command-line tools and HTTP still fetches.
pub struct CommandCapture {
    client: reqwest::blocking::Client,
}

impl CommandCapture {
    /// Create a grabber whose HTTP fetches give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    fn fetch_still(&self, url: &str, path: &Path) -> Result<(), CaptureError> {
        let download = |reason: String| CaptureError::Download {
            url: url.to_string(),
            reason,
        };
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| download(e.to_string()))?;
        if !response.status().is_success() {
            return Err(download(format!("HTTP {}", response.status())));
        }
        let bytes = response.bytes().map_err(|e| download(e.to_string()))?;
        if bytes.is_empty() {
            return Err(download("empty response".to_string()));
        }
        fs::write(path, &bytes)?;
        Ok(())
    }
}

/// Build the grab command for a command-line camera.
///
/// Returns `None` for `web` cameras, which are fetched over HTTP instead.
pub fn build_capture_command(camera: &CameraConfig, path: &Path) -> Option<Command> {
    let file = path.to_string_lossy();
    let url = camera.url.as_deref().unwrap_or_default();

    let template = match camera.kind {
        CameraKind::Usb => {
            CommandTemplate::new("fswebcam", ["--quiet", "--no-banner", "{file}"])
        }
        CameraKind::Pi => CommandTemplate::new(
            "raspistill",
            [
                "-t", "1", "-w", "1280", "-h", "720", "-ex", "sports", "-mm", "matrix", "-n",
                "-o", "{file}",
            ],
        ),
        CameraKind::Stream => CommandTemplate::new(
            "ffmpeg",
            [
                "-threads", "1", "-loglevel", "quiet", "-y", "-i", "{url}", "-vframes", "1",
                "-threads", "1", "{file}",
            ],
        ),
        CameraKind::Other => camera.template.clone()?,
        CameraKind::Web => return None,
    };
    Some(template.render(&[("file", file.as_ref()), ("url", url)]))
}

impl ImageCapture for CommandCapture {
    fn capture(&self, camera: &CameraConfig, path: &Path) -> Result<(), CaptureError> {
        match build_capture_command(camera, path) {
            Some(mut command) => run_to_completion(&mut command)?,
            None => {
                let url = camera.url.as_deref().unwrap_or_default();
                debug!("Fetching still for {} from {}", camera.name, url);
                self.fetch_still(url, path)?;
            }
        }
        if !path.is_file() {
            return Err(CaptureError::MissingFrame {
                path: path.to_path_buf(),
            });
        }
        Ok(())
    }
}
