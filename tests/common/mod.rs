//! Fakes for the engine's collaborator seams.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use layer_lapse::camera::ImageCapture;
use layer_lapse::config::{CameraConfig, Config, Timings};
use layer_lapse::engine::{Collaborators, Engine};
use layer_lapse::error::{CaptureError, PrinterError, ToolError};
use layer_lapse::printer::{
    Dialect, HttpReply, OperatorMessage, Position, Printer, PrinterStatus, StatusReport,
    Transport, TransportError,
};
use layer_lapse::video::{EncoderCensus, VideoEncoder, VideoJob};
use tempfile::TempDir;

pub fn fast_timings() -> Timings {
    Timings {
        status_interval: Duration::from_millis(20),
        loop_tick: Duration::from_millis(5),
        retry_pause: Duration::from_millis(1),
        http_timeout: Duration::from_secs(1),
        state_poll: Duration::from_millis(5),
        state_wait: Duration::from_millis(50),
        quick_probes: 4,
        slow_probe: Duration::from_millis(30),
        encoder_check: Duration::from_millis(5),
        encoder_wait_limit: Duration::from_millis(40),
        jobname_poll: Duration::from_millis(5),
        jobname_attempts: 3,
    }
}

type Handler = dyn Fn(&str, &str, &[(&str, &str)]) -> Result<HttpReply, TransportError> + Send + Sync;

/// Transport answering from a closure and recording every request as
/// `"GET /path?k=v"` or `"POST /path <body>"`.
pub struct FakeTransport {
    handler: Box<Handler>,
    pub requests: Mutex<Vec<String>>,
    pub headers: Mutex<Vec<Vec<(String, String)>>>,
}

impl FakeTransport {
    /// `handler(method, path_and_query, headers)`.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &str, &[(&str, &str)]) -> Result<HttpReply, TransportError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            headers: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, line: String, headers: &[(&str, &str)]) {
        self.requests.lock().unwrap().push(line);
        self.headers.lock().unwrap().push(
            headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
    }
}

impl Transport for FakeTransport {
    fn get(
        &self,
        path: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<HttpReply, TransportError> {
        let query: Vec<String> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let target = if query.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, query.join("&"))
        };
        self.record(format!("GET {target}"), headers);
        (self.handler)("GET", &target, headers)
    }

    fn post(
        &self,
        path: &str,
        body: &str,
        headers: &[(&str, &str)],
    ) -> Result<HttpReply, TransportError> {
        self.record(format!("POST {path} {body}"), headers);
        (self.handler)("POST", &format!("{path} {body}"), headers)
    }
}

#[derive(Debug)]
struct PrinterState {
    status: PrinterStatus,
    layers: VecDeque<i64>,
    layer: i64,
    jobname: String,
    position: Position,
    messages: VecDeque<OperatorMessage>,
    gcodes: Vec<String>,
}

/// In-memory printer.
pub struct FakePrinter {
    state: Mutex<PrinterState>,
    /// Every call fails while set.
    pub offline: AtomicBool,
    pub logins: AtomicUsize,
    /// When each login was attempted, successful or not.
    pub login_attempts: Mutex<Vec<Instant>>,
}

impl FakePrinter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PrinterState {
                status: PrinterStatus::Idle,
                layers: VecDeque::new(),
                layer: -1,
                jobname: String::new(),
                position: Position {
                    x: 0.0,
                    y: 0.0,
                    z: 0.0,
                },
                messages: VecDeque::new(),
                gcodes: Vec::new(),
            }),
            offline: AtomicBool::new(false),
            logins: AtomicUsize::new(0),
            login_attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn set_status(&self, status: PrinterStatus) {
        self.state.lock().unwrap().status = status;
    }

    /// Layers returned by successive `layer()` calls; the last one repeats.
    pub fn queue_layers(&self, layers: &[i64]) {
        self.state.lock().unwrap().layers.extend(layers.iter().copied());
    }

    pub fn set_jobname(&self, jobname: &str) {
        self.state.lock().unwrap().jobname = jobname.to_string();
    }

    pub fn push_message(&self, seq: i64, text: &str) {
        self.state.lock().unwrap().messages.push_back(OperatorMessage {
            seq,
            text: text.to_string(),
        });
    }

    pub fn gcodes(&self) -> Vec<String> {
        self.state.lock().unwrap().gcodes.clone()
    }

    fn check_online(&self) -> Result<(), PrinterError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(PrinterError::disconnected("fake printer offline"))
        } else {
            Ok(())
        }
    }
}

impl Printer for FakePrinter {
    fn login(&self) -> Result<Dialect, PrinterError> {
        self.login_attempts.lock().unwrap().push(Instant::now());
        self.check_online()?;
        self.logins.fetch_add(1, Ordering::SeqCst);
        Ok(Dialect::Legacy)
    }

    fn firmware_version(&self) -> Result<String, PrinterError> {
        self.check_online()?;
        Ok("3.5.1".to_string())
    }

    fn status(&self) -> Result<StatusReport, PrinterError> {
        self.check_online()?;
        let mut state = self.state.lock().unwrap();
        Ok(StatusReport {
            status: state.status.clone(),
            messages: state.messages.drain(..).collect(),
        })
    }

    fn layer(&self) -> Result<i64, PrinterError> {
        self.check_online()?;
        let mut state = self.state.lock().unwrap();
        if let Some(layer) = state.layers.pop_front() {
            state.layer = layer;
        }
        Ok(state.layer)
    }

    fn position(&self) -> Result<Position, PrinterError> {
        self.check_online()?;
        Ok(self.state.lock().unwrap().position.clone())
    }

    fn jobname(&self) -> Result<String, PrinterError> {
        self.check_online()?;
        Ok(self.state.lock().unwrap().jobname.clone())
    }

    fn send_gcode(&self, code: &str) -> Result<(), PrinterError> {
        self.check_online()?;
        let mut state = self.state.lock().unwrap();
        state.gcodes.push(code.to_string());
        match code {
            "M25" => state.status = PrinterStatus::Paused,
            "M24" => state.status = PrinterStatus::Processing,
            _ => {}
        }
        if let Some(rest) = code.strip_prefix("G0 X") {
            if let Some((x, y)) = rest.split_once(" Y") {
                state.position.x = x.parse().unwrap_or_default();
                state.position.y = y.parse().unwrap_or_default();
            }
        }
        Ok(())
    }
}

/// Frame grabber writing a small file, failing on chosen attempts.
pub struct FakeCapture {
    attempts: AtomicUsize,
    failing: Mutex<Vec<usize>>,
    pub paths: Mutex<Vec<PathBuf>>,
}

impl FakeCapture {
    pub fn new() -> Self {
        Self {
            attempts: AtomicUsize::new(0),
            failing: Mutex::new(Vec::new()),
            paths: Mutex::new(Vec::new()),
        }
    }

    /// Make the given 1-based attempts fail.
    pub fn fail_attempts(&self, attempts: &[usize]) {
        self.failing.lock().unwrap().extend_from_slice(attempts);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl ImageCapture for FakeCapture {
    fn capture(&self, _camera: &CameraConfig, path: &Path) -> Result<(), CaptureError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.lock().unwrap().contains(&attempt) {
            return Err(CaptureError::MissingFrame {
                path: path.to_path_buf(),
            });
        }
        fs::write(path, b"jpeg")?;
        self.paths.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

/// Encoder that writes a placeholder video, or a partial one and fails.
pub struct FakeEncoder {
    pub jobs: Mutex<Vec<(VideoJob, bool)>>,
    pub fail: AtomicBool,
}

impl FakeEncoder {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

impl VideoEncoder for FakeEncoder {
    fn encode(&self, job: &VideoJob, output: &Path, throttled: bool) -> Result<(), ToolError> {
        self.jobs.lock().unwrap().push((job.clone(), throttled));
        let _ = fs::write(output, b"mp4");
        if self.fail.load(Ordering::SeqCst) {
            return Err(ToolError::Failed {
                program: "ffmpeg".to_string(),
                status: "exit status: 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Reports a fixed number of running encoders.
pub struct FakeCensus {
    pub running: AtomicUsize,
    pub checks: AtomicUsize,
}

impl FakeCensus {
    pub fn new(running: usize) -> Self {
        Self {
            running: AtomicUsize::new(running),
            checks: AtomicUsize::new(0),
        }
    }
}

impl EncoderCensus for FakeCensus {
    fn running(&self) -> usize {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.running.load(Ordering::SeqCst)
    }
}

/// Build a configuration from `PRINTER_HOST`, a base dir and extra pairs.
pub fn config_with(base_dir: &Path, extra: &[(&str, &str)]) -> Config {
    let base = base_dir.to_string_lossy().into_owned();
    let mut pairs: Vec<(String, String)> = vec![
        ("PRINTER_HOST".to_string(), "printer.local".to_string()),
        ("BASE_DIR".to_string(), base),
        ("REST_SECONDS".to_string(), "0".to_string()),
    ];
    pairs.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    let mut config = Config::from_lookup(|key| {
        pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    })
    .expect("test configuration is valid");
    config.timings = fast_timings();
    config
}

/// An engine wired to fakes in a temporary directory.
pub struct Harness {
    pub dir: TempDir,
    pub printer: Arc<FakePrinter>,
    pub camera: Arc<FakeCapture>,
    pub encoder: Arc<FakeEncoder>,
    pub census: Arc<FakeCensus>,
    pub engine: Engine,
}

impl Harness {
    pub fn new(extra: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let config = config_with(dir.path(), extra);
        let printer = Arc::new(FakePrinter::new());
        let camera = Arc::new(FakeCapture::new());
        let encoder = Arc::new(FakeEncoder::new());
        let census = Arc::new(FakeCensus::new(0));
        let engine = Engine::new(
            &config,
            Collaborators {
                printer: printer.clone(),
                camera: camera.clone(),
                encoder: encoder.clone(),
                census: census.clone(),
            },
        )
        .expect("engine builds");
        Self {
            dir,
            printer,
            camera,
            encoder,
            census,
            engine,
        }
    }

    /// Run one capture tick with the given printer status.
    pub fn tick(&self, status: PrinterStatus) {
        self.printer.set_status(status.clone());
        self.engine
            .capture
            .lock()
            .unwrap()
            .tick(&self.engine.capture_task, &status);
    }

    pub fn frame_count(&self, camera: &str) -> u64 {
        self.engine
            .capture
            .lock()
            .unwrap()
            .frame_counts()
            .into_iter()
            .find(|(name, _)| name == camera)
            .map(|(_, frames)| frames)
            .unwrap_or_default()
    }

    pub fn working_dir(&self) -> Option<PathBuf> {
        self.engine.capture.lock().unwrap().working_dir()
    }

    /// Every `.mp4` under the temporary directory.
    pub fn videos(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        collect_videos(self.dir.path(), &mut found);
        found
    }
}

fn collect_videos(dir: &Path, found: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_videos(&path, found);
        } else if path.extension().is_some_and(|ext| ext == "mp4") {
            found.push(path);
        }
    }
}

/// Write `count` frames for `camera` into `dir`.
pub fn write_frames(dir: &Path, camera: &str, count: u64) {
    fs::create_dir_all(dir).unwrap();
    for frame in 1..=count {
        fs::write(
            dir.join(layer_lapse::workdir::frame_file_name(camera, frame)),
            b"jpeg",
        )
        .unwrap();
    }
}
