//! Wiring of the engine from a [`Config`].

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::info;

use crate::camera::{CommandCapture, ImageCapture};
use crate::capture::{CaptureDeps, CaptureLoop, SharedCapture};
use crate::config::{Config, SharedSettings};
use crate::connection::ConnectionSupervisor;
use crate::control::ControlState;
use crate::error::TimelapseError;
use crate::coordinator::{
    ActionCoordinator, ActionKind, ActionQueue, ActionRequest, RequestSource,
};
use crate::main_loop::MainLoop;
use crate::operator::{OperatorDispatcher, StatusMonitor};
use crate::printer::{HttpTransport, PrinterClient, SharedPrinter};
use crate::session::PrintSession;
use crate::task::{Lifeline, TaskControl, spawn_guarded};
use crate::video::{EncoderCensus, FfmpegEncoder, SysinfoCensus, VideoAssembler, VideoEncoder};
use crate::workdir::WorkingDir;

/// How long a control request waits for the coordinator's answer.
const CONTROL_REPLY_TIMEOUT: Duration = Duration::from_secs(60);

/// The external collaborators the engine drives.
pub struct Collaborators {
    pub printer: SharedPrinter,
    pub camera: Arc<dyn ImageCapture>,
    pub encoder: Arc<dyn VideoEncoder>,
    pub census: Arc<dyn EncoderCensus>,
}

impl Collaborators {
    /// The production collaborators: HTTP printer client, command-line
    /// grabbers, ffmpeg and the process table.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let transport = HttpTransport::new(&config.printer_host, config.timings.http_timeout)?;
        let printer = PrinterClient::new(
            Arc::new(transport),
            config.printer_password.clone(),
            config.message_prefix.clone(),
            config.timings.retry_pause,
        );
        Ok(Self {
            printer: Arc::new(printer),
            camera: Arc::new(CommandCapture::new(config.timings.http_timeout)?),
            encoder: Arc::new(FfmpegEncoder::new(&config.cameras)),
            census: Arc::new(SysinfoCensus::default()),
        })
    }
}

/// All long-lived parts, wired together.
pub struct Engine {
    pub lifeline: Arc<Lifeline>,
    pub session: Arc<PrintSession>,
    pub settings: SharedSettings,
    pub actions: ActionQueue,
    pub supervisor: Arc<ConnectionSupervisor>,
    pub monitor: Arc<StatusMonitor>,
    pub capture: SharedCapture,
    pub capture_task: Arc<TaskControl>,
    pub main_task: Arc<TaskControl>,
    pub video: Arc<VideoAssembler>,
    pub coordinator: Arc<ActionCoordinator>,
    main_loop: Arc<MainLoop>,
    requests: Mutex<Option<Receiver<ActionRequest>>>,
}

impl Engine {
    /// Build the engine. Nothing runs until [`Engine::start`].
    ///
    /// # Errors
    ///
    /// Returns an error if the settings are an invalid combination or the
    /// printer's output directory cannot be created.
    pub fn new(config: &Config, parts: Collaborators) -> Result<Self, TimelapseError> {
        config.settings.capture.validate()?;
        config.settings.video.validate()?;
        let timings = config.timings.clone();
        let lifeline = Lifeline::new();
        let settings = config.settings.clone().shared();
        let camera_names: Vec<String> = config.cameras.iter().map(|c| c.name.clone()).collect();
        let session = Arc::new(PrintSession::new(&camera_names));
        let (actions, requests) = ActionQueue::channel();

        let supervisor = Arc::new(ConnectionSupervisor::new(
            parts.printer,
            actions.clone(),
            Arc::clone(&lifeline),
            timings.clone(),
        ));
        let dispatcher =
            OperatorDispatcher::new(actions.clone(), settings.clone(), Arc::clone(&lifeline));
        let monitor = Arc::new(StatusMonitor::new(
            Arc::clone(&supervisor),
            Arc::clone(&session),
            dispatcher,
        ));

        let workdir = WorkingDir::new(&config.base_dir, &config.printer_host)?;
        let capture = CaptureLoop::new(
            &config.cameras,
            workdir,
            CaptureDeps {
                monitor: Arc::clone(&monitor),
                camera: parts.camera,
                settings: settings.clone(),
                session: Arc::clone(&session),
                actions: actions.clone(),
                lifeline: Arc::clone(&lifeline),
                timings: timings.clone(),
            },
        )
        .shared();

        let capture_task = Arc::new(TaskControl::new("captureLoop"));
        let main_task = Arc::new(TaskControl::new("mainLoop"));
        let video = Arc::new(VideoAssembler::new(
            camera_names,
            settings.clone(),
            parts.encoder,
            parts.census,
            timings.clone(),
        ));
        let coordinator = Arc::new(ActionCoordinator::new(
            Arc::clone(&session),
            Arc::clone(&capture),
            Arc::clone(&capture_task),
            Arc::clone(&main_task),
            Arc::clone(&supervisor),
            Arc::clone(&video),
            settings.clone(),
            Arc::clone(&lifeline),
            timings.clone(),
        ));
        let main_loop = Arc::new(MainLoop::new(
            Arc::clone(&monitor),
            Arc::clone(&capture),
            Arc::clone(&capture_task),
            Arc::clone(&main_task),
            settings.clone(),
            Arc::clone(&lifeline),
            timings,
        ));

        Ok(Self {
            lifeline,
            session,
            settings,
            actions,
            supervisor,
            monitor,
            capture,
            capture_task,
            main_task,
            video,
            coordinator,
            main_loop,
            requests: Mutex::new(Some(requests)),
        })
    }

    /// Start the coordinator and the main loop, then queue the initial
    /// action: `standby` when configured, otherwise `start`.
    ///
    /// Calling this twice has no further effect.
    ///
    /// # Errors
    ///
    /// Returns an error if a thread cannot be spawned.
    pub fn start(&self) -> std::io::Result<()> {
        let Some(requests) = self
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Ok(());
        };
        self.coordinator.spawn(requests)?;

        self.main_task.arm();
        let main_loop = Arc::clone(&self.main_loop);
        spawn_guarded("mainLoop", Arc::clone(&self.lifeline), move || main_loop.run())?;

        let standby = self
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .standby;
        let initial = if standby {
            ActionKind::Standby
        } else {
            ActionKind::Start
        };
        info!("Initial action: {}", initial);
        self.actions.submit(initial, RequestSource::Internal);
        Ok(())
    }

    /// Handles for the control API.
    pub fn control_state(&self) -> ControlState {
        ControlState {
            actions: self.actions.clone(),
            session: Arc::clone(&self.session),
            supervisor: Arc::clone(&self.supervisor),
            video: Arc::clone(&self.video),
            settings: self.settings.clone(),
            lifeline: Arc::clone(&self.lifeline),
            reply_timeout: CONTROL_REPLY_TIMEOUT,
        }
    }
}
