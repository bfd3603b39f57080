//! Per-camera capture work, one tick at a time.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use log::{debug, info, warn};

use crate::camera::ImageCapture;
use crate::config::{
    CameraConfig, DetectMode, PauseMode, Settings, SharedSettings, Timings, constants,
};
use crate::coordinator::{ActionKind, ActionQueue, RequestSource};
use crate::lifecycle::{PrintLifecycle, PrintState};
use crate::operator::StatusMonitor;
use crate::printer::{Position, PrinterStatus};
use crate::session::PrintSession;
use crate::task::{Lifeline, TaskControl};
use crate::trigger::{self, CaptureReason, TriggerInput};
use crate::workdir::WorkingDir;

/// Capture state for one configured camera.
#[derive(Debug)]
pub struct CameraChannel {
    pub config: CameraConfig,
    frame_count: u64,
    last_layer: Option<i64>,
    last_photo: Instant,
}

impl CameraChannel {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            last_layer: None,
            last_photo: Instant::now(),
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn reset(&mut self) {
        self.frame_count = 0;
        self.last_layer = None;
        self.last_photo = Instant::now();
    }
}

/// Everything the capture tick needs besides its own channels.
pub struct CaptureDeps {
    pub monitor: Arc<StatusMonitor>,
    pub camera: Arc<dyn ImageCapture>,
    pub settings: SharedSettings,
    pub session: Arc<PrintSession>,
    pub actions: ActionQueue,
    pub lifeline: Arc<Lifeline>,
    pub timings: Timings,
}

/// The capture loop. Callers serialize ticks through [`SharedCapture`].
pub struct CaptureLoop {
    channels: Vec<CameraChannel>,
    workdir: WorkingDir,
    lifecycle: PrintLifecycle,
    deps: CaptureDeps,
}

pub type SharedCapture = Arc<Mutex<CaptureLoop>>;

impl CaptureLoop {
    pub fn new(cameras: &[CameraConfig], workdir: WorkingDir, deps: CaptureDeps) -> Self {
        Self {
            channels: cameras.iter().cloned().map(CameraChannel::new).collect(),
            workdir,
            lifecycle: PrintLifecycle::default(),
            deps,
        }
    }

    pub fn shared(self) -> SharedCapture {
        Arc::new(Mutex::new(self))
    }

    fn settings(&self) -> Settings {
        self.deps
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `(camera, frames)` for every channel.
    pub fn frame_counts(&self) -> Vec<(String, u64)> {
        self.channels
            .iter()
            .map(|c| (c.config.name.clone(), c.frame_count))
            .collect()
    }

    /// The current job directory, if a frame has been written.
    pub fn working_dir(&self) -> Option<PathBuf> {
        self.workdir.path().map(PathBuf::from)
    }

    /// One capture tick.
    ///
    /// Advances the print lifecycle with `status`, captures for every camera
    /// while capturing, and releases a printer left paused by the capture.
    /// On completion the task is disarmed and a `completed` request queued.
    pub fn tick(&mut self, task: &TaskControl, status: &PrinterStatus) {
        let settings = self.settings();
        let terminating = self.deps.lifeline.is_terminating();
        let state = self.lifecycle.advance(status, &settings.capture, terminating);
        self.deps.session.set_print_state(state);

        match state {
            PrintState::Waiting => debug!("Waiting for the print to start"),
            PrintState::Capturing => {
                for index in 0..self.channels.len() {
                    if task.is_stop_requested() {
                        debug!("Capture stop requested; skipping remaining cameras");
                        break;
                    }
                    self.one_interval(index, status, &settings, false);
                }
                self.release_pause(&settings);
            }
            PrintState::Completed => {
                info!("Print job completed");
                task.request_stop();
                self.lifecycle.reset();
                self.deps
                    .actions
                    .submit(ActionKind::Completed, RequestSource::Internal);
            }
        }
    }

    /// Evaluate the trigger for one camera and take the photos it asks for.
    fn one_interval(
        &mut self,
        index: usize,
        status: &PrinterStatus,
        settings: &Settings,
        final_frame: bool,
    ) {
        let layer = self
            .deps
            .monitor
            .supervisor()
            .query("layer", |printer| printer.layer())
            .or_else(|| self.channels[index].last_layer.filter(|_| final_frame));
        let Some(layer) = layer else {
            debug!("Layer unknown; skipping {}", self.channels[index].config.name);
            return;
        };

        let channel = &mut self.channels[index];
        let input = TriggerInput {
            layer,
            previous_layer: channel.last_layer,
            status,
            elapsed: channel.last_photo.elapsed(),
            settings: &settings.capture,
            final_frame,
        };
        let mut reasons = trigger::evaluate(&input);
        channel.last_layer = Some(layer);
        if final_frame {
            reasons.truncate(1);
        }

        for reason in reasons {
            self.prepare_shot(layer, settings);
            self.one_photo(index, reason);
        }
    }

    /// Pause and park the head before a photo when configured. The rest
    /// delay applies only while the printer is paused.
    fn prepare_shot(&self, layer: i64, settings: &Settings) {
        let capture = &settings.capture;
        if capture.pause == PauseMode::No && capture.detect != DetectMode::Pause {
            return;
        }
        if layer < 1 || self.deps.monitor.latest() == Some(PrinterStatus::Idle) {
            return;
        }

        let printer = self.deps.monitor.supervisor();
        if capture.pause == PauseMode::Yes {
            debug!("Requesting pause via {}", constants::PAUSE_GCODE);
            printer.query("pause", |p| p.send_gcode(constants::PAUSE_GCODE));
            if !self.wait_for_status(|s| *s == PrinterStatus::Paused) {
                debug!("Printer did not report paused in time; capturing anyway");
            }
        }

        if self.deps.monitor.latest() != Some(PrinterStatus::Paused) {
            return;
        }
        if let Some((x, y)) = capture.move_head {
            let code = format!("G0 X{x:.2} Y{y:.2}");
            debug!("Moving print head with {}", code);
            printer.query("park head", |p| p.send_gcode(&code));
            if !self.wait_for_position(x, y) {
                debug!("Print head did not reach {:.2},{:.2} in time", x, y);
            }
        }
        self.deps.lifeline.sleep(capture.rest);
    }

    /// Poll status until `accept` matches, bounded by the state wait.
    fn wait_for_status<F>(&self, accept: F) -> bool
    where
        F: Fn(&PrinterStatus) -> bool,
    {
        let deadline = Instant::now() + self.deps.timings.state_wait;
        loop {
            if let Some(status) = self.deps.monitor.refresh("status") {
                if accept(&status) {
                    return true;
                }
            }
            if Instant::now() >= deadline || !self.deps.lifeline.sleep(self.deps.timings.state_poll)
            {
                return false;
            }
        }
    }

    fn wait_for_position(&self, x: f64, y: f64) -> bool {
        let deadline = Instant::now() + self.deps.timings.state_wait;
        let at_target = |p: &Position| {
            (p.x - x).abs() <= constants::PARK_TOLERANCE
                && (p.y - y).abs() <= constants::PARK_TOLERANCE
        };
        loop {
            let position = self
                .deps
                .monitor
                .supervisor()
                .query("position", |printer| printer.position());
            if position.as_ref().is_some_and(at_target) {
                return true;
            }
            if Instant::now() >= deadline || !self.deps.lifeline.sleep(self.deps.timings.state_poll)
            {
                return false;
            }
        }
    }

    /// Resume a printer that is paused because of pause-mode capture.
    fn release_pause(&self, settings: &Settings) {
        let capture = &settings.capture;
        if capture.pause == PauseMode::No && capture.detect != DetectMode::Pause {
            return;
        }
        if self.deps.monitor.refresh("status") != Some(PrinterStatus::Paused) {
            return;
        }
        debug!("Requesting resume via {}", constants::RESUME_GCODE);
        self.deps
            .monitor
            .supervisor()
            .query("resume", |p| p.send_gcode(constants::RESUME_GCODE));
        let resumed = self.wait_for_status(|s| {
            matches!(s, PrinterStatus::Idle | PrinterStatus::Processing)
        });
        if !resumed {
            warn!("Printer did not resume after capture");
        }
    }

    /// Take one frame for a camera.
    ///
    /// The counter is advanced before the grab and rolled back if the grab
    /// fails, so failed attempts never leave gaps.
    fn one_photo(&mut self, index: usize, reason: CaptureReason) -> bool {
        let directory = match self.workdir.ensure() {
            Ok(dir) => dir.to_path_buf(),
            Err(e) => {
                warn!("Could not create the working directory: {}", e);
                return false;
            }
        };
        if !self.workdir.is_named() {
            let jobname = self
                .deps
                .monitor
                .supervisor()
                .query("jobname", |printer| printer.jobname());
            if let Some(jobname) = jobname {
                if let Err(e) = self.workdir.apply_jobname(&jobname) {
                    warn!("Could not rename {}: {}", directory.display(), e);
                }
            }
        }
        self.deps.session.set_working_dir(self.working_dir());

        let channel = &mut self.channels[index];
        channel.frame_count += 1;
        let Some(path) = self.workdir.frame_path(&channel.config.name, channel.frame_count) else {
            channel.frame_count -= 1;
            return false;
        };

        info!(
            "{}: capturing frame {} after {} trigger",
            channel.config.name, channel.frame_count, reason
        );
        match self.deps.camera.capture(&channel.config, &path) {
            Ok(()) => {
                channel.last_photo = Instant::now();
                self.deps
                    .session
                    .set_frames(&channel.config.name, channel.frame_count);
                true
            }
            Err(e) => {
                channel.frame_count -= 1;
                warn!(
                    "{}: failed to capture frame {}: {}",
                    channel.config.name,
                    channel.frame_count + 1,
                    e
                );
                false
            }
        }
    }

    /// One last frame per camera before a video, unless pause control
    /// suppresses it. Skipped when nothing was captured yet. A printer
    /// paused for the frame is resumed afterwards.
    pub fn capture_final_frames(&mut self) {
        if self.workdir.path().is_none() {
            return;
        }
        let settings = self.settings();
        let status = self
            .deps
            .monitor
            .latest()
            .unwrap_or(PrinterStatus::Idle);
        for index in 0..self.channels.len() {
            self.one_interval(index, &status, &settings, true);
        }
        self.release_pause(&settings);
    }

    /// Discard the current directory and all counters.
    pub fn reset(&mut self) {
        self.workdir.discard();
        self.clear_counters();
    }

    /// Keep the current directory and continue in a new one.
    pub fn start_new_job(&mut self) {
        self.workdir.start_new();
        self.clear_counters();
    }

    /// Delete every frame directory this process created.
    pub fn delete_frames(&mut self) {
        self.workdir.delete_own();
        self.clear_counters();
    }

    fn clear_counters(&mut self) {
        for channel in &mut self.channels {
            channel.reset();
            self.deps.session.set_frames(&channel.config.name, 0);
        }
        self.lifecycle.reset();
        self.deps.session.set_print_state(PrintState::Waiting);
        self.deps.session.set_working_dir(None);
    }
}
