use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use log::{info, warn};

use crate::command::CommandTemplate;
use crate::error::ConfigError;

/// Which printer event drives layer-independent captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectMode {
    /// Capture when the layer number changes.
    Layer,
    /// Capture when the print G-code pauses the printer.
    Pause,
    /// Only the elapsed-time rule captures.
    None,
}

impl FromStr for DetectMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "layer" => Ok(DetectMode::Layer),
            "pause" => Ok(DetectMode::Pause),
            "none" => Ok(DetectMode::None),
            other => Err(format!("expected layer, pause or none, got '{other}'")),
        }
    }
}

impl fmt::Display for DetectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DetectMode::Layer => "layer",
            DetectMode::Pause => "pause",
            DetectMode::None => "none",
        };
        f.write_str(name)
    }
}

/// Whether this program pauses the printer around each capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseMode {
    Yes,
    No,
}

impl FromStr for PauseMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yes" => Ok(PauseMode::Yes),
            "no" => Ok(PauseMode::No),
            other => Err(format!("expected yes or no, got '{other}'")),
        }
    }
}

impl fmt::Display for PauseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PauseMode::Yes => "yes",
            PauseMode::No => "no",
        })
    }
}

/// The kind of frame grabber attached to a camera slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraKind {
    /// USB webcam through `fswebcam`.
    Usb,
    /// Raspberry Pi camera through `raspistill`.
    Pi,
    /// Single frame pulled from a video stream with `ffmpeg`.
    Stream,
    /// Still image served over HTTP.
    Web,
    /// Operator-supplied command template.
    Other,
}

impl FromStr for CameraKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "usb" => Ok(CameraKind::Usb),
            "pi" => Ok(CameraKind::Pi),
            "stream" => Ok(CameraKind::Stream),
            "web" => Ok(CameraKind::Web),
            "other" => Ok(CameraKind::Other),
            other => Err(format!(
                "expected usb, pi, stream, web or other, got '{other}'"
            )),
        }
    }
}

/// One configured camera slot.
#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// `Camera1` or `Camera2`; used as the frame file prefix.
    pub name: String,
    pub kind: CameraKind,
    /// Source URL for `stream` and `web` cameras.
    pub url: Option<String>,
    /// Grab command for `other` cameras.
    pub template: Option<CommandTemplate>,
    /// Replacement encoder command for this camera's video.
    pub video_template: Option<CommandTemplate>,
}

/// Capture policy that can be changed while running.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    /// Seconds between capture ticks.
    pub poll_seconds: u64,
    /// Elapsed-time capture threshold; 0 disables the time rule.
    pub seconds: u64,
    pub detect: DetectMode,
    pub pause: PauseMode,
    /// Capture every Nth layer.
    pub num_layers: i64,
    /// Park position used while paused for a capture.
    pub move_head: Option<(f64, f64)>,
    /// Settle delay after parking, before the shutter.
    pub rest: Duration,
    /// Start capturing without waiting for the print to start.
    pub dont_wait: bool,
    /// Collapse a layer/pause capture and a time capture in the same tick into one.
    pub single_capture_per_tick: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            poll_seconds: constants::DEFAULT_POLL_SECONDS,
            seconds: 0,
            detect: DetectMode::Layer,
            pause: PauseMode::No,
            num_layers: 1,
            move_head: None,
            rest: Duration::from_secs(constants::DEFAULT_REST_SECONDS),
            dont_wait: false,
            single_capture_per_tick: false,
        }
    }
}

impl CaptureSettings {
    /// Bring `poll_seconds` and `seconds` onto the status-poll grid.
    ///
    /// Both are rounded down to a multiple of the status interval after
    /// applying their minimums, the poll interval never exceeds the time
    /// threshold, and a time threshold with `detect=none` implies `dont_wait`.
    pub fn normalize(&mut self) {
        let step = constants::STATUS_INTERVAL_SECONDS;

        if self.poll_seconds < constants::MIN_POLL_SECONDS {
            self.poll_seconds = constants::MIN_POLL_SECONDS;
        }
        self.poll_seconds -= self.poll_seconds % step;

        if self.seconds != 0 {
            if self.seconds < constants::MIN_CAPTURE_SECONDS {
                self.seconds = constants::MIN_CAPTURE_SECONDS;
            }
            self.seconds -= self.seconds % step;
            self.poll_seconds = self.poll_seconds.min(self.seconds);

            if self.detect == DetectMode::None {
                self.dont_wait = true;
            }
        }
    }

    /// Reject combinations that cannot work together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pause == PauseMode::Yes && self.detect == DetectMode::Pause {
            return Err(ConfigError::InvalidCombination(
                "PAUSE=yes pauses the printer itself while DETECT=pause expects pauses in the G-code; they cannot be used together".to_string(),
            ));
        }
        if let Some((x, y)) = self.move_head {
            if self.pause != PauseMode::Yes && self.detect != DetectMode::Pause {
                return Err(ConfigError::InvalidCombination(format!(
                    "MOVE_HEAD {x:.2},{y:.2} requires either PAUSE=yes or DETECT=pause"
                )));
            }
        }
        if self.num_layers < 1 {
            return Err(ConfigError::invalid(
                "NUM_LAYERS",
                &self.num_layers.to_string(),
                "must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_seconds)
    }
}

/// Video policy that can be changed while running.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoSettings {
    /// Frames per second when `max_video` is not set.
    pub fps: f64,
    /// Shortest video worth producing, in seconds.
    pub min_video: f64,
    /// Target video length in seconds; 0 uses `fps` instead.
    pub max_video: f64,
    /// Seconds of the last frame appended on completion.
    pub extra_time: f64,
    /// Encoder processes allowed to run system-wide before we wait.
    pub max_encoders: usize,
    pub no_video: bool,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            fps: constants::DEFAULT_FPS,
            min_video: constants::DEFAULT_MIN_VIDEO_SECONDS,
            max_video: 0.0,
            extra_time: 0.0,
            max_encoders: constants::DEFAULT_MAX_ENCODERS,
            no_video: false,
        }
    }
}

impl VideoSettings {
    /// Reject a maximum length shorter than the minimum.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_video > 0.0 && self.max_video < self.min_video {
            return Err(ConfigError::InvalidCombination(format!(
                "MAX_VIDEO {} is shorter than MIN_VIDEO {}",
                self.max_video, self.min_video
            )));
        }
        Ok(())
    }
}

/// Everything an operator can change at runtime.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Settings {
    pub capture: CaptureSettings,
    pub video: VideoSettings,
    /// Wait for an explicit `start` instead of arming capture at startup.
    pub standby: bool,
    /// Begin a new job instead of exiting after completion.
    pub restart: bool,
    /// Never delete working directories on terminate.
    pub keep_files: bool,
    /// Delete captured frames on terminate.
    pub delete_pics: bool,
    pub verbose: bool,
}

/// Settings shared between the loops, the coordinator and the control API.
pub type SharedSettings = Arc<RwLock<Settings>>;

impl Settings {
    pub fn shared(self) -> SharedSettings {
        Arc::new(RwLock::new(self))
    }

    /// Apply a `name=value` change such as `seconds=30` or `movehead=10,20`.
    ///
    /// The change is validated on a copy and only committed when the result
    /// is still a valid combination.
    ///
    /// # Returns
    ///
    /// A human-readable description of what changed.
    ///
    /// # Errors
    ///
    /// Returns an error when the name is not changeable, the value does not
    /// parse, or the result is an invalid combination.
    pub fn apply_change(&mut self, command: &str) -> Result<String, ConfigError> {
        self.apply_changes(&[command]).map(|messages| messages.concat())
    }

    /// Apply several changes as one: either all of them are committed or,
    /// on the first error, none are. The combination is validated after the
    /// last change, so the order of the changes does not matter.
    ///
    /// # Errors
    ///
    /// Returns the first failing change's error.
    pub fn apply_changes<S: AsRef<str>>(
        &mut self,
        commands: &[S],
    ) -> Result<Vec<String>, ConfigError> {
        let mut next = self.clone();
        let mut messages = Vec::with_capacity(commands.len());
        for command in commands {
            messages.push(next.change(command.as_ref())?);
        }
        next.capture.validate()?;
        next.video.validate()?;

        if next.verbose != self.verbose {
            log::set_max_level(if next.verbose {
                log::LevelFilter::Debug
            } else {
                log::LevelFilter::Info
            });
        }
        *self = next;
        for message in &messages {
            info!("{}", message);
        }
        Ok(messages)
    }

    fn change(&mut self, command: &str) -> Result<String, ConfigError> {
        let command: String = command.chars().filter(|c| !c.is_whitespace()).collect();
        let (name, value) = command
            .split_once('=')
            .ok_or_else(|| ConfigError::invalid("change", &command, "expected name=value"))?;

        match name {
            "verbose" => self.verbose = parse_value(name, value)?,
            "seconds" => {
                self.capture.seconds = parse_value(name, value)?;
                self.capture.normalize();
            }
            "poll" => {
                self.capture.poll_seconds = parse_value(name, value)?;
                self.capture.normalize();
            }
            "detect" => self.capture.detect = parse_value(name, value)?,
            "pause" => self.capture.pause = parse_value(name, value)?,
            "numlayers" => self.capture.num_layers = parse_value(name, value)?,
            "movehead" => self.capture.move_head = parse_move_head(value)?,
            "rest" => {
                let secs: f64 = parse_value(name, value)?;
                self.capture.rest = Duration::try_from_secs_f64(secs)
                    .map_err(|e| ConfigError::invalid(name, value, e))?;
            }
            "dontwait" => self.capture.dont_wait = parse_value(name, value)?,
            "restart" => self.restart = parse_value(name, value)?,
            "standby" => self.standby = parse_value(name, value)?,
            "novideo" => self.video.no_video = parse_value(name, value)?,
            "keepfiles" => self.keep_files = parse_value(name, value)?,
            "deletepics" => self.delete_pics = parse_value(name, value)?,
            "fps" => self.video.fps = parse_value::<f64>(name, value)?.max(1.0),
            "minvideo" => self.video.min_video = parse_value::<f64>(name, value)?.max(1.0),
            "maxvideo" => self.video.max_video = parse_value::<f64>(name, value)?.max(0.0),
            "extratime" => self.video.extra_time = parse_value::<f64>(name, value)?.max(0.0),
            _ => {
                return Err(ConfigError::invalid(
                    name,
                    value,
                    "changing this setting is not supported",
                ));
            }
        }
        Ok(format!("{name} changed to {value}"))
    }
}

/// Timing knobs for every sleep and bounded wait in the engine.
///
/// Production code uses [`Timings::default`]; tests shrink these so the
/// state machines run in milliseconds.
#[derive(Debug, Clone)]
pub struct Timings {
    /// How often the main loop refreshes printer status.
    pub status_interval: Duration,
    /// Main loop scheduler tick.
    pub loop_tick: Duration,
    /// Pause between attempts of one printer call.
    pub retry_pause: Duration,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
    /// Poll interval while waiting for pause, park and resume.
    pub state_poll: Duration,
    /// Upper bound for pause, park and resume waits.
    pub state_wait: Duration,
    /// Number of reconnect probes at `status_interval` before slowing down.
    pub quick_probes: u32,
    /// Reconnect probe interval after the quick phase.
    pub slow_probe: Duration,
    /// Wait between encoder capacity checks.
    pub encoder_check: Duration,
    /// Give up waiting for encoder capacity after this long and encode anyway.
    pub encoder_wait_limit: Duration,
    /// Poll interval while waiting for the job name to clear before a restart.
    pub jobname_poll: Duration,
    pub jobname_attempts: u32,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            status_interval: Duration::from_secs(constants::STATUS_INTERVAL_SECONDS),
            loop_tick: Duration::from_millis(constants::LOOP_TICK_MILLIS),
            retry_pause: Duration::from_secs(constants::RETRY_PAUSE_SECONDS),
            http_timeout: Duration::from_secs(constants::HTTP_TIMEOUT_SECONDS),
            state_poll: Duration::from_millis(constants::STATE_POLL_MILLIS),
            state_wait: Duration::from_secs(constants::STATE_WAIT_SECONDS),
            quick_probes: constants::QUICK_PROBES,
            slow_probe: Duration::from_secs(constants::SLOW_PROBE_SECONDS),
            encoder_check: Duration::from_secs(constants::ENCODER_CHECK_SECONDS),
            encoder_wait_limit: Duration::from_secs(constants::ENCODER_WAIT_LIMIT_SECONDS),
            jobname_poll: Duration::from_secs(constants::JOBNAME_POLL_SECONDS),
            jobname_attempts: constants::JOBNAME_ATTEMPTS,
        }
    }
}

/// Configuration for the time-lapse engine loaded from environment variables.
///
/// All values are loaded from environment variables to support running as a
/// service next to the printer.
#[derive(Debug, Clone)]
pub struct Config {
    /// Printer host name or address, optionally with a port.
    /// Environment variable: `PRINTER_HOST`
    pub printer_host: String,

    /// Printer password; empty when the printer has none.
    /// Environment variable: `PRINTER_PASSWORD`
    pub printer_password: String,

    /// Root under which per-printer working directories are created.
    /// Environment variable: `BASE_DIR`
    pub base_dir: PathBuf,

    /// Address the control API binds to.
    /// Environment variable: `CONTROL_HOST`
    pub control_host: String,

    /// Control API port; the listener only runs when this is set.
    /// Environment variable: `CONTROL_PORT`
    pub control_port: Option<u16>,

    /// Prefix that marks printer messages addressed to this program.
    /// Environment variable: `MESSAGE_PREFIX`
    pub message_prefix: String,

    /// One or two camera slots.
    pub cameras: Vec<CameraConfig>,

    /// Initial runtime settings.
    pub settings: Settings,

    pub timings: Timings,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `PRINTER_HOST` is not set, a value cannot be
    /// parsed, or settings form an invalid combination:
    /// - `PRINTER_HOST`: printer address (required)
    /// - `PRINTER_PASSWORD`: printer password (default: "")
    /// - `BASE_DIR`: output root (default: "./timelapse")
    /// - `POLL_SECONDS`: capture tick interval (default: "12", minimum 10)
    /// - `CAPTURE_SECONDS`: time capture threshold (default: "0", minimum 20)
    /// - `DETECT`: layer, pause or none (default: "layer")
    /// - `PAUSE`: yes or no (default: "no")
    /// - `NUM_LAYERS`, `MOVE_HEAD` ("x,y"), `REST_SECONDS`, `DONT_WAIT`
    /// - `STANDBY`, `RESTART`, `NO_VIDEO`, `DELETE_PICS`, `KEEP_FILES`
    /// - `CAMERA1`/`CAMERA2`, `WEBURL1`/`WEBURL2`, `CAMPARAM1`/`CAMPARAM2`, `VIDPARAM1`/`VIDPARAM2`
    /// - `FPS`, `MIN_VIDEO`, `MAX_VIDEO`, `EXTRA_TIME`, `MAX_ENCODERS`
    /// - `CONTROL_HOST`, `CONTROL_PORT`, `MESSAGE_PREFIX`, `VERBOSE`
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let printer_host = get("PRINTER_HOST").ok_or_else(|| ConfigError::MissingEnvVar {
            var_name: "PRINTER_HOST".to_string(),
        })?;
        let printer_password = get("PRINTER_PASSWORD").unwrap_or_default();
        let base_dir = PathBuf::from(get("BASE_DIR").unwrap_or_else(|| "./timelapse".to_string()));

        let mut capture = CaptureSettings {
            poll_seconds: parse_var(&get, "POLL_SECONDS", constants::DEFAULT_POLL_SECONDS)?,
            seconds: parse_var(&get, "CAPTURE_SECONDS", 0)?,
            detect: parse_var(&get, "DETECT", DetectMode::Layer)?,
            pause: parse_var(&get, "PAUSE", PauseMode::No)?,
            num_layers: parse_var(&get, "NUM_LAYERS", 1)?,
            move_head: match get("MOVE_HEAD") {
                Some(value) => parse_move_head(&value)?,
                None => None,
            },
            rest: parse_rest(&get)?,
            dont_wait: parse_var(&get, "DONT_WAIT", false)?,
            single_capture_per_tick: parse_var(&get, "SINGLE_CAPTURE_PER_TICK", false)?,
        };
        capture.normalize();
        capture.validate()?;

        let video = VideoSettings {
            fps: parse_var(&get, "FPS", constants::DEFAULT_FPS)?.max(1.0),
            min_video: parse_var(&get, "MIN_VIDEO", constants::DEFAULT_MIN_VIDEO_SECONDS)?,
            max_video: parse_var(&get, "MAX_VIDEO", 0.0)?,
            extra_time: parse_var(&get, "EXTRA_TIME", 0.0)?,
            max_encoders: parse_var(&get, "MAX_ENCODERS", constants::DEFAULT_MAX_ENCODERS)?,
            no_video: parse_var(&get, "NO_VIDEO", false)?,
        };
        video.validate()?;

        let settings = Settings {
            capture,
            video,
            standby: parse_var(&get, "STANDBY", false)?,
            restart: parse_var(&get, "RESTART", false)?,
            keep_files: parse_var(&get, "KEEP_FILES", false)?,
            delete_pics: parse_var(&get, "DELETE_PICS", false)?,
            verbose: parse_var(&get, "VERBOSE", false)?,
        };

        let mut cameras = vec![load_camera(&get, 1, Some(CameraKind::Usb))?];
        if get("CAMERA2").is_some() {
            cameras.push(load_camera(&get, 2, None)?);
        }

        let control_port = match get("CONTROL_PORT") {
            Some(value) => Some(
                value
                    .trim()
                    .parse::<u16>()
                    .map_err(|e| ConfigError::invalid("CONTROL_PORT", &value, e))?,
            )
            .filter(|port| *port != 0),
            None => None,
        };

        let config = Config {
            printer_host,
            printer_password,
            base_dir,
            control_host: get("CONTROL_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            control_port,
            message_prefix: get("MESSAGE_PREFIX")
                .unwrap_or_else(|| constants::DEFAULT_MESSAGE_PREFIX.to_string()),
            cameras,
            settings,
            timings: Timings::default(),
        };
        config.issue_warnings();
        Ok(config)
    }

    /// Log combinations that are legal but probably not what was meant.
    fn issue_warnings(&self) {
        let capture = &self.settings.capture;
        if capture.seconds == 0 && capture.detect == DetectMode::None {
            warn!("CAPTURE_SECONDS=0 with DETECT=none: nothing will be captured");
        }
        if capture.seconds > 0 && capture.detect != DetectMode::None {
            warn!(
                "CAPTURE_SECONDS={} with DETECT={} will trigger on both",
                capture.seconds, capture.detect
            );
        }
        if self.settings.video.no_video && self.settings.delete_pics {
            warn!("NO_VIDEO together with DELETE_PICS will not produce any output");
        }
    }
}

fn load_camera<G>(
    get: &G,
    slot: u8,
    default_kind: Option<CameraKind>,
) -> Result<CameraConfig, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let kind_var = format!("CAMERA{slot}");
    let kind = match (get(&kind_var), default_kind) {
        (Some(value), _) => value
            .parse::<CameraKind>()
            .map_err(|e| ConfigError::invalid(&kind_var, &value, e))?,
        (None, Some(kind)) => kind,
        (None, None) => {
            return Err(ConfigError::MissingEnvVar { var_name: kind_var });
        }
    };

    let url = get(&format!("WEBURL{slot}"));
    let template = get(&format!("CAMPARAM{slot}"))
        .map(|text| CommandTemplate::parse(&text, &["file", "url"]))
        .transpose()?;
    let video_template = get(&format!("VIDPARAM{slot}"))
        .map(|text| CommandTemplate::parse(&text, &["fps", "input", "output"]))
        .transpose()?;

    match kind {
        CameraKind::Other if template.is_none() => {
            return Err(ConfigError::InvalidCombination(format!(
                "camera type other requires CAMPARAM{slot}"
            )));
        }
        CameraKind::Other => {}
        _ if template.is_some() => {
            return Err(ConfigError::InvalidCombination(format!(
                "CAMPARAM{slot} can only be used with camera type other"
            )));
        }
        CameraKind::Stream | CameraKind::Web if url.is_none() => {
            return Err(ConfigError::InvalidCombination(format!(
                "stream and web cameras require WEBURL{slot}"
            )));
        }
        _ => {}
    }

    Ok(CameraConfig {
        name: format!("Camera{slot}"),
        kind,
        url,
        template,
        video_template,
    })
}

fn parse_var<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => parse_value(key, &value),
        None => Ok(default),
    }
}

fn parse_value<T>(field: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::invalid(field, value, e))
}

fn parse_rest<G>(get: &G) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let secs = parse_var(get, "REST_SECONDS", constants::DEFAULT_REST_SECONDS as f64)?;
    Duration::try_from_secs_f64(secs)
        .map_err(|e| ConfigError::invalid("REST_SECONDS", &secs.to_string(), e))
}

/// Parse `x,y`; `0,0` means no park position.
fn parse_move_head(value: &str) -> Result<Option<(f64, f64)>, ConfigError> {
    let (x, y) = value
        .split_once(',')
        .ok_or_else(|| ConfigError::invalid("MOVE_HEAD", value, "expected x,y"))?;
    let x: f64 = parse_value("MOVE_HEAD", x)?;
    let y: f64 = parse_value("MOVE_HEAD", y)?;
    if x == 0.0 && y == 0.0 {
        Ok(None)
    } else {
        Ok(Some((x, y)))
    }
}

/// Application constants used throughout the system.
pub mod constants {
    /// Status refresh interval; poll and capture thresholds are multiples of it.
    pub const STATUS_INTERVAL_SECONDS: u64 = 5;

    /// Main loop scheduler tick (a third of the status interval).
    pub const LOOP_TICK_MILLIS: u64 = 1667;

    pub const MIN_POLL_SECONDS: u64 = 10;
    pub const DEFAULT_POLL_SECONDS: u64 = 12;
    pub const MIN_CAPTURE_SECONDS: u64 = 20;

    /// Attempts per printer call before reporting disconnected.
    pub const CALL_ATTEMPTS: u32 = 2;
    pub const RETRY_PAUSE_SECONDS: u64 = 1;
    pub const HTTP_TIMEOUT_SECONDS: u64 = 5;

    /// Firmware message queue depth; bounds one status drain.
    pub const MESSAGE_QUEUE_DEPTH: usize = 8;

    /// Consecutive failures tolerated before entering reconnect.
    pub const DISCONNECT_LIMIT: u32 = 2;
    pub const QUICK_PROBES: u32 = 4;
    pub const SLOW_PROBE_SECONDS: u64 = 180;

    pub const STATE_POLL_MILLIS: u64 = 500;
    pub const STATE_WAIT_SECONDS: u64 = 10;
    /// Park position tolerance in millimetres.
    pub const PARK_TOLERANCE: f64 = 0.05;
    pub const DEFAULT_REST_SECONDS: u64 = 1;

    /// Capture intervals to wait for the capture loop to stop before overriding.
    pub const STOP_WAIT_POLLS: u32 = 3;

    pub const DEFAULT_FPS: f64 = 10.0;
    pub const DEFAULT_MIN_VIDEO_SECONDS: f64 = 5.0;
    pub const DEFAULT_MAX_ENCODERS: usize = 2;
    pub const ENCODER_CHECK_SECONDS: u64 = 15;
    pub const ENCODER_WAIT_LIMIT_SECONDS: u64 = 300;
    pub const ENCODER_PROCESS_NAME: &str = "ffmpeg";
    pub const TEMP_VIDEO_NAME: &str = "_tmpvideo.mp4";

    pub const JOBNAME_POLL_SECONDS: u64 = 2;
    pub const JOBNAME_ATTEMPTS: u32 = 30;

    pub const DEFAULT_MESSAGE_PREFIX: &str = "DuetLapse3";

    /// G-code acknowledging an operator message; the sequence number is appended.
    pub const MESSAGE_ACK_GCODE: &str = "M292 P0 S";
    pub const PAUSE_GCODE: &str = "M25";
    pub const RESUME_GCODE: &str = "M24";
}
