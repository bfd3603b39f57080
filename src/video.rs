//! Video assembly.
//!
//! Turns a job directory of `Camera<N>_<frame>.jpeg` files into one video
//! per camera. Assembly is single-flight, enforces a minimum length before
//! the encoder is started, optionally holds the last frame on screen, and
//! waits (bounded) for a free encoder slot system-wide.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use chrono::Local;
use log::{debug, info, warn};
use sysinfo::System;

use crate::command::{CommandTemplate, run_to_completion};
use crate::config::{CameraConfig, SharedSettings, Timings, VideoSettings, constants};
use crate::error::{ToolError, VideoError};
use crate::workdir::frame_file_name;

/// One camera's encode, alive only while it runs.
#[derive(Debug, Clone)]
pub struct VideoJob {
    pub directory: PathBuf,
    pub camera: String,
    pub frame_count: u64,
    pub fps: f64,
    pub extend_seconds: f64,
}

impl VideoJob {
    /// `printf`-style frame pattern the encoder reads.
    pub fn input_pattern(&self) -> PathBuf {
        self.directory.join(format!("{}_%08d.jpeg", self.camera))
    }
}

/// Counts encoder processes running on this machine.
pub trait EncoderCensus: Send + Sync {
    fn running(&self) -> usize;
}

/// [`EncoderCensus`] backed by the process table.
pub struct SysinfoCensus {
    process_name: String,
}

impl SysinfoCensus {
    pub fn new(process_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
        }
    }
}

impl Default for SysinfoCensus {
    fn default() -> Self {
        Self::new(constants::ENCODER_PROCESS_NAME)
    }
}

impl EncoderCensus for SysinfoCensus {
    fn running(&self) -> usize {
        let system = System::new_all();
        system
            .processes()
            .values()
            .filter(|process| {
                process
                    .name()
                    .to_string_lossy()
                    .contains(self.process_name.as_str())
            })
            .count()
    }
}

/// Encodes the frames of one job into `output`.
pub trait VideoEncoder: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the encoder cannot be started or fails.
    fn encode(&self, job: &VideoJob, output: &Path, throttled: bool) -> Result<(), ToolError>;
}

/// ffmpeg, or a per-camera `VIDPARAM` template.
#[derive(Debug, Default)]
pub struct FfmpegEncoder {
    templates: HashMap<String, CommandTemplate>,
}

impl FfmpegEncoder {
    pub fn new(cameras: &[CameraConfig]) -> Self {
        let templates = cameras
            .iter()
            .filter_map(|c| c.video_template.clone().map(|t| (c.name.clone(), t)))
            .collect();
        Self { templates }
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn encode(&self, job: &VideoJob, output: &Path, throttled: bool) -> Result<(), ToolError> {
        let mut command =
            build_encode_command(job, output, throttled, self.templates.get(&job.camera));
        run_to_completion(&mut command)
    }
}

/// The encoder command for `job`.
///
/// Without a template this is
/// `ffmpeg [-threads 1] -loglevel quiet -r <fps> -i <pattern> -vcodec libx264 -y [-threads 2] <output>`,
/// with the thread limits only when `throttled`.
pub fn build_encode_command(
    job: &VideoJob,
    output: &Path,
    throttled: bool,
    template: Option<&CommandTemplate>,
) -> Command {
    let fps = job.fps.to_string();
    let input = job.input_pattern();
    let input = input.to_string_lossy();
    let output = output.to_string_lossy();

    if let Some(template) = template {
        return template.render(&[
            ("fps", fps.as_str()),
            ("input", input.as_ref()),
            ("output", output.as_ref()),
        ]);
    }

    let mut command = Command::new(constants::ENCODER_PROCESS_NAME);
    if throttled {
        command.args(["-threads", "1"]);
    }
    command
        .args(["-loglevel", "quiet", "-r", fps.as_str(), "-i"])
        .arg(input.as_ref())
        .args(["-vcodec", "libx264", "-y"]);
    if throttled {
        command.args(["-threads", "2"]);
    }
    command.arg(output.as_ref());
    command
}

/// Frames per second for `frames` frames.
///
/// With a maximum length set, the rate stretches the frames over that
/// length, or plays one frame per second when there are fewer frames than
/// seconds. Otherwise the configured rate is used.
pub fn effective_fps(frames: u64, video: &VideoSettings) -> f64 {
    if video.max_video > 0.0 {
        let frames = frames as f64;
        if frames < video.max_video {
            1.0
        } else {
            frames / video.max_video
        }
    } else {
        video.fps
    }
}

/// Highest contiguous frame number for `camera` in `dir`.
pub fn count_frames(dir: &Path, camera: &str) -> u64 {
    let mut frames = 0;
    while dir.join(frame_file_name(camera, frames + 1)).is_file() {
        frames += 1;
    }
    frames
}

/// Copy the last frame so it stays on screen for `extra_time` seconds.
///
/// Writes `floor(extra_time) * floor(fps) - 1` copies after `last_frame`
/// and returns how many were written. Nothing is copied for less than a
/// second of extra time or when there are no frames.
///
/// # Errors
///
/// Returns an error if a copy fails.
pub fn extend_last_frame(
    dir: &Path,
    camera: &str,
    last_frame: u64,
    extra_time: f64,
    fps: f64,
) -> std::io::Result<u64> {
    let copies = extension_frames(last_frame, extra_time, fps);
    let source = dir.join(frame_file_name(camera, last_frame));
    let mut written = 0;
    for offset in 1..=copies {
        fs::copy(&source, dir.join(frame_file_name(camera, last_frame + offset)))?;
        written += 1;
    }
    debug!("{}: {} copies of frame {}", camera, written, last_frame);
    Ok(written)
}

/// How many duplicates [`extend_last_frame`] writes after `last_frame`.
pub fn extension_frames(last_frame: u64, extra_time: f64, fps: f64) -> u64 {
    if extra_time < 1.0 || last_frame == 0 {
        return 0;
    }
    ((extra_time.floor() * fps.floor()) as u64).saturating_sub(1)
}

/// Readable message for a control or coordinator caller.
pub fn describe_outcome(outcome: &Result<Vec<PathBuf>, VideoError>) -> String {
    match outcome {
        Ok(videos) => {
            let names: Vec<String> = videos.iter().map(|v| v.display().to_string()).collect();
            format!("Video created: {}", names.join(", "))
        }
        Err(e) => e.to_string(),
    }
}

pub struct VideoAssembler {
    cameras: Vec<String>,
    settings: SharedSettings,
    encoder: Arc<dyn VideoEncoder>,
    census: Arc<dyn EncoderCensus>,
    timings: Timings,
    in_flight: Mutex<()>,
}

impl VideoAssembler {
    pub fn new(
        cameras: Vec<String>,
        settings: SharedSettings,
        encoder: Arc<dyn VideoEncoder>,
        census: Arc<dyn EncoderCensus>,
        timings: Timings,
    ) -> Self {
        Self {
            cameras,
            settings,
            encoder,
            census,
            timings,
            in_flight: Mutex::new(()),
        }
    }

    /// Make one video per camera from the frames in `dir`.
    ///
    /// # Arguments
    ///
    /// * `dir` - Job directory holding the frames
    /// * `extend` - Hold the last frame for the configured extra time
    /// * `throttled` - Limit encoder threads while a print may be running
    ///
    /// # Returns
    ///
    /// The videos written. A camera that fails is logged and skipped; the
    /// call fails only when no camera produced a video.
    ///
    /// # Errors
    ///
    /// Returns [`VideoError::DirectoryNotFound`] or [`VideoError::NoFrames`]
    /// up front, otherwise the last per-camera failure.
    pub fn assemble(
        &self,
        dir: &Path,
        extend: bool,
        throttled: bool,
    ) -> Result<Vec<PathBuf>, VideoError> {
        let _guard = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !dir.is_dir() {
            return Err(VideoError::DirectoryNotFound(dir.to_path_buf()));
        }
        let video = self
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .video
            .clone();

        let counts: Vec<(&String, u64)> = self
            .cameras
            .iter()
            .map(|camera| (camera, count_frames(dir, camera)))
            .filter(|(_, frames)| *frames > 0)
            .collect();
        if counts.is_empty() {
            return Err(VideoError::NoFrames);
        }

        let mut videos = Vec::new();
        let mut last_error = None;
        for (camera, frames) in counts {
            let extend_seconds = if extend { video.extra_time } else { 0.0 };
            let total = frames + extension_frames(frames, extend_seconds, video.fps);
            let job = VideoJob {
                directory: dir.to_path_buf(),
                camera: camera.clone(),
                frame_count: frames,
                fps: effective_fps(total, &video),
                extend_seconds,
            };
            match self.encode_job(job, &video, throttled) {
                Ok(path) => videos.push(path),
                Err(e) => {
                    warn!("{}", e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if videos.is_empty() => Err(e),
            _ => Ok(videos),
        }
    }

    fn encode_job(
        &self,
        mut job: VideoJob,
        video: &VideoSettings,
        throttled: bool,
    ) -> Result<PathBuf, VideoError> {
        let planned =
            job.frame_count + extension_frames(job.frame_count, job.extend_seconds, video.fps);
        let length = planned as f64 / job.fps;
        if length < video.min_video {
            return Err(VideoError::TooShort {
                camera: job.camera,
                minimum: video.min_video,
                length,
            });
        }

        self.wait_for_encoder_slot(video.max_encoders);

        if job.extend_seconds > 0.0 {
            let added = extend_last_frame(
                &job.directory,
                &job.camera,
                job.frame_count,
                job.extend_seconds,
                video.fps,
            )?;
            job.frame_count += added;
        }
        info!(
            "{}: creating video from {} frames at {} fps",
            job.camera, job.frame_count, job.fps
        );

        let temporary = job.directory.join(constants::TEMP_VIDEO_NAME);
        let started = Instant::now();
        if let Err(e) = self.encoder.encode(&job, &temporary, throttled) {
            if temporary.exists() {
                let _ = fs::remove_file(&temporary);
            }
            return Err(VideoError::EncoderFailed {
                camera: job.camera,
                reason: e.to_string(),
            });
        }

        let mut output = job.directory.clone().into_os_string();
        output.push(format!(
            "_{}_{}.mp4",
            job.camera,
            Local::now().format("%a-%H-%M")
        ));
        let output = PathBuf::from(output);
        if let Err(e) = fs::rename(&temporary, &output) {
            let _ = fs::remove_file(&temporary);
            return Err(VideoError::Io(e));
        }
        info!(
            "Video processing took {:.1} seconds: {}",
            started.elapsed().as_secs_f64(),
            output.display()
        );
        Ok(output)
    }

    /// Wait while `max_encoders` or more encoders run, up to the wait limit.
    fn wait_for_encoder_slot(&self, max_encoders: usize) {
        let deadline = Instant::now() + self.timings.encoder_wait_limit;
        loop {
            let running = self.census.running();
            if running < max_encoders {
                return;
            }
            if Instant::now() >= deadline {
                warn!(
                    "{} encoders still running after {:?}; proceeding anyway",
                    running, self.timings.encoder_wait_limit
                );
                return;
            }
            info!(
                "{} encoders running (max {}); waiting {:?}",
                running, max_encoders, self.timings.encoder_check
            );
            thread::sleep(self.timings.encoder_check);
        }
    }
}
