use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::Value;
use thiserror::Error;

use crate::config::constants;
use crate::error::PrinterError;

/// A raw HTTP answer from the printer.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }
}

/// The request could not be delivered (connection refused, timeout, ...).
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// HTTP seam under [`PrinterClient`].
pub trait Transport: Send + Sync {
    fn get(
        &self,
        path: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<HttpReply, TransportError>;

    fn post(
        &self,
        path: &str,
        body: &str,
        headers: &[(&str, &str)],
    ) -> Result<HttpReply, TransportError>;
}

/// Blocking reqwest transport against `http://<host>`.
pub struct HttpTransport {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Create a transport for the printer at `host`.
    ///
    /// # Arguments
    ///
    /// * `host` - Printer host name or address, with optional port
    /// * `timeout` - Per-request timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(host: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", host.trim_end_matches('/'))
        };
        Ok(Self { base_url, client })
    }

    fn finish(
        &self,
        mut request: reqwest::blocking::RequestBuilder,
        headers: &[(&str, &str)],
    ) -> Result<HttpReply, TransportError> {
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                TransportError("the printer connection timed out".to_string())
            } else {
                TransportError(format!("cannot connect to the printer: {e}"))
            }
        })?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| TransportError(format!("failed to read response body: {e}")))?;
        Ok(HttpReply { status, body })
    }
}

impl Transport for HttpTransport {
    fn get(
        &self,
        path: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<HttpReply, TransportError> {
        let request = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(query);
        self.finish(request, headers)
    }

    fn post(
        &self,
        path: &str,
        body: &str,
        headers: &[(&str, &str)],
    ) -> Result<HttpReply, TransportError> {
        let request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .body(body.to_string());
        self.finish(request, headers)
    }
}

/// Which of the two printer APIs is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Standalone firmware: `/rr_connect`, `/rr_model`, `/rr_gcode`.
    Legacy,
    /// Single-board-computer server: `/machine/connect`, `/machine/status`, `/machine/code`.
    Session,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dialect::Legacy => "rr_model",
            Dialect::Session => "SBC",
        })
    }
}

/// Printer status as reported by the firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrinterStatus {
    Idle,
    Processing,
    Paused,
    Busy,
    Other(String),
}

impl From<&str> for PrinterStatus {
    fn from(s: &str) -> Self {
        match s {
            "idle" => PrinterStatus::Idle,
            "processing" => PrinterStatus::Processing,
            "paused" => PrinterStatus::Paused,
            "busy" => PrinterStatus::Busy,
            other => PrinterStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for PrinterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrinterStatus::Idle => f.write_str("idle"),
            PrinterStatus::Processing => f.write_str("processing"),
            PrinterStatus::Paused => f.write_str("paused"),
            PrinterStatus::Busy => f.write_str("busy"),
            PrinterStatus::Other(s) => f.write_str(s),
        }
    }
}

/// A printer message addressed to this program, prefix removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorMessage {
    pub seq: i64,
    pub text: String,
}

/// Result of one status poll.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub status: PrinterStatus,
    /// Messages drained and acknowledged during this poll, oldest first.
    pub messages: Vec<OperatorMessage>,
}

/// Machine position of the first three axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Everything the engine asks of a printer.
pub trait Printer: Send + Sync {
    /// (Re)negotiate the API dialect and session.
    fn login(&self) -> Result<Dialect, PrinterError>;

    /// Firmware version string of the main board.
    fn firmware_version(&self) -> Result<String, PrinterError>;

    /// Current status, draining queued operator messages first.
    fn status(&self) -> Result<StatusReport, PrinterError>;

    /// Current layer, `-1` when unknown.
    fn layer(&self) -> Result<i64, PrinterError>;

    fn position(&self) -> Result<Position, PrinterError>;

    /// File name of the running job, empty when none.
    fn jobname(&self) -> Result<String, PrinterError>;

    fn send_gcode(&self, code: &str) -> Result<(), PrinterError>;
}

pub type SharedPrinter = Arc<dyn Printer>;

#[derive(Debug, Default)]
struct Session {
    dialect: Option<Dialect>,
    key: Option<String>,
}

enum ApiRequest<'a> {
    Get {
        path: &'a str,
        query: Vec<(&'a str, &'a str)>,
    },
    Post {
        path: &'a str,
        body: &'a str,
    },
}

impl ApiRequest<'_> {
    fn endpoint(&self) -> &str {
        match self {
            ApiRequest::Get { path, .. } | ApiRequest::Post { path, .. } => path,
        }
    }
}

/// JSON/HTTP client for the printer.
///
/// Hides the two wire dialects and session login. Every call is attempted
/// twice with a short pause; an expired session (HTTP 401) triggers one
/// re-login before the call is retried.
pub struct PrinterClient {
    transport: Arc<dyn Transport>,
    password: String,
    message_prefix: String,
    retry_pause: Duration,
    session: Mutex<Session>,
    last_message_seq: Mutex<Option<i64>>,
}

impl PrinterClient {
    /// Create a new PrinterClient.
    ///
    /// # Arguments
    ///
    /// * `transport` - HTTP transport to the printer
    /// * `password` - Printer password, empty when none is set
    /// * `message_prefix` - Prefix of operator messages meant for us (e.g. "DuetLapse3")
    /// * `retry_pause` - Pause between the two attempts of a call
    pub fn new(
        transport: Arc<dyn Transport>,
        password: impl Into<String>,
        message_prefix: impl Into<String>,
        retry_pause: Duration,
    ) -> Self {
        Self {
            transport,
            password: password.into(),
            message_prefix: message_prefix.into(),
            retry_pause,
            session: Mutex::new(Session::default()),
            last_message_seq: Mutex::new(None),
        }
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The dialect negotiated at the last successful login.
    pub fn dialect(&self) -> Option<Dialect> {
        self.session().dialect
    }

    fn current_dialect(&self) -> Result<Dialect, PrinterError> {
        self.dialect()
            .ok_or_else(|| PrinterError::disconnected("not logged in"))
    }

    fn send(&self, request: &ApiRequest<'_>) -> Result<HttpReply, TransportError> {
        let key = self.session().key.clone();
        let headers: Vec<(&str, &str)> = key
            .as_deref()
            .map(|key| vec![("X-Session-Key", key)])
            .unwrap_or_default();

        match request {
            ApiRequest::Get { path, query } => self.transport.get(path, query, &headers),
            ApiRequest::Post { path, body } => self.transport.post(path, body, &headers),
        }
    }

    /// Perform one API call with the retry budget.
    ///
    /// `relogin` allows a single re-login when the session has expired; the
    /// login calls themselves run without it.
    fn call(&self, request: &ApiRequest<'_>, relogin: bool) -> Result<HttpReply, PrinterError> {
        let endpoint = request.endpoint();
        let mut relogged = false;
        let mut attempt = 0;
        let mut failure = PrinterError::disconnected("no attempt made");

        while attempt < constants::CALL_ATTEMPTS {
            debug!("{} call to {}", attempt, endpoint);
            match self.send(request) {
                Ok(reply) if reply.status == 200 => return Ok(reply),
                Ok(reply) if reply.status == 401 && relogin => {
                    if relogged {
                        failure = PrinterError::Unauthorized;
                        break;
                    }
                    relogged = true;
                    info!("Printer session expired, logging in again");
                    match self.login() {
                        Ok(_) => {
                            attempt = 0;
                            continue;
                        }
                        Err(e) => {
                            debug!("Re-login failed: {}", e);
                            failure = PrinterError::Unauthorized;
                        }
                    }
                }
                Ok(reply) => {
                    failure = PrinterError::Http {
                        endpoint: endpoint.to_string(),
                        status: reply.status,
                    };
                }
                Err(e) => {
                    debug!("Call to {} failed: {}", endpoint, e);
                    failure = PrinterError::disconnected(e);
                }
            }
            thread::sleep(self.retry_pause);
            attempt += 1;
        }
        Err(failure)
    }

    fn call_json(&self, request: &ApiRequest<'_>) -> Result<Value, PrinterError> {
        let reply = self.call(request, true)?;
        parse_json(request.endpoint(), &reply.body)
    }

    /// Legacy login. `Ok(None)` means the legacy API is absent or only an
    /// emulation, and the session dialect should be tried.
    fn login_legacy(&self) -> Result<Option<Dialect>, PrinterError> {
        let _ = self.call(
            &ApiRequest::Get {
                path: "/rr_disconnect",
                query: vec![],
            },
            false,
        );
        let request = ApiRequest::Get {
            path: "/rr_connect",
            query: vec![("password", self.password.as_str())],
        };
        let reply = match self.call(&request, false) {
            Ok(reply) => reply,
            Err(PrinterError::Http { status: 404, .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        let json = parse_json("/rr_connect", &reply.body)?;
        match json.get("err").and_then(Value::as_i64) {
            Some(0) => {
                if json.get("apiLevel").and_then(Value::as_i64) == Some(1) {
                    debug!("Connected but in emulation mode");
                    Ok(None)
                } else {
                    debug!("Connected to standalone printer");
                    Ok(Some(Dialect::Legacy))
                }
            }
            Some(1) => Err(PrinterError::InvalidPassword),
            Some(2) => Err(PrinterError::NoSessionsAvailable),
            other => Err(PrinterError::Malformed {
                endpoint: "/rr_connect".to_string(),
                reason: format!("unexpected err field {other:?}"),
            }),
        }
    }

    fn login_session(&self) -> Result<String, PrinterError> {
        let _ = self.call(
            &ApiRequest::Get {
                path: "/machine/disconnect",
                query: vec![],
            },
            false,
        );
        let request = ApiRequest::Get {
            path: "/machine/connect",
            query: vec![("password", self.password.as_str())],
        };
        let reply = match self.call(&request, false) {
            Ok(reply) => reply,
            Err(PrinterError::Http { status: 403, .. }) => {
                return Err(PrinterError::InvalidPassword);
            }
            Err(PrinterError::Http { status: 503, .. }) => {
                return Err(PrinterError::NoSessionsAvailable);
            }
            Err(e) => return Err(e),
        };
        let json = parse_json("/machine/connect", &reply.body)?;
        json.get("sessionKey")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PrinterError::Malformed {
                endpoint: "/machine/connect".to_string(),
                reason: "missing sessionKey".to_string(),
            })
    }

    /// Fetch the status-bearing object and its message box.
    fn fetch_state(&self, dialect: Dialect) -> Result<Value, PrinterError> {
        match dialect {
            Dialect::Legacy => {
                let json = self.call_json(&ApiRequest::Get {
                    path: "/rr_model",
                    query: vec![("key", "state")],
                })?;
                Ok(json["result"].clone())
            }
            Dialect::Session => {
                let json = self.call_json(&ApiRequest::Get {
                    path: "/machine/status",
                    query: vec![],
                })?;
                Ok(json["state"].clone())
            }
        }
    }

    /// Fetch one object-model value: `key` for the legacy dialect, the
    /// same path inside `/machine/status` for the session dialect.
    fn model_value(&self, key: &str) -> Result<Value, PrinterError> {
        match self.current_dialect()? {
            Dialect::Legacy => {
                let json = self.call_json(&ApiRequest::Get {
                    path: "/rr_model",
                    query: vec![("key", key)],
                })?;
                Ok(json["result"].clone())
            }
            Dialect::Session => {
                let json = self.call_json(&ApiRequest::Get {
                    path: "/machine/status",
                    query: vec![],
                })?;
                Ok(key
                    .split('.')
                    .fold(&json, |value, part| &value[part])
                    .clone())
            }
        }
    }

    /// Record an unseen message and acknowledge it when it is ours.
    ///
    /// Returns `false` once there is nothing new to drain.
    fn take_message(&self, state: &Value, messages: &mut Vec<OperatorMessage>) -> bool {
        let message_box = &state["messageBox"];
        let Some(text) = message_box["message"].as_str() else {
            return false;
        };
        let seq = message_box["seq"].as_i64().unwrap_or_default();
        {
            let mut last = self
                .last_message_seq
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if text.is_empty() || *last == Some(seq) {
                return false;
            }
            *last = Some(seq);
        }

        let text = text.trim();
        let Some(command) = text
            .strip_prefix(self.message_prefix.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
        else {
            debug!("Ignoring printer message '{}' (seq {})", text, seq);
            return true;
        };

        let ack = format!("{}{}", constants::MESSAGE_ACK_GCODE, seq);
        if let Err(e) = self.send_gcode(&ack) {
            warn!("Failed to acknowledge message seq {}: {}", seq, e);
        } else {
            debug!("Cleared message: {} seq {}", text, seq);
        }
        messages.push(OperatorMessage {
            seq,
            text: command.trim().to_string(),
        });
        true
    }
}

impl Printer for PrinterClient {
    fn login(&self) -> Result<Dialect, PrinterError> {
        info!("Logging in to printer");
        let preferred = self.dialect();
        *self.session() = Session::default();

        if preferred != Some(Dialect::Session) {
            if let Some(dialect) = self.login_legacy()? {
                self.session().dialect = Some(dialect);
                return Ok(dialect);
            }
        }

        let key = self.login_session()?;
        debug!("Connected to SBC printer");
        let mut session = self.session();
        session.dialect = Some(Dialect::Session);
        session.key = Some(key);
        Ok(Dialect::Session)
    }

    fn firmware_version(&self) -> Result<String, PrinterError> {
        let (endpoint, boards) = match self.current_dialect()? {
            Dialect::Legacy => {
                let json = self.call_json(&ApiRequest::Get {
                    path: "/rr_model",
                    query: vec![("key", "boards")],
                })?;
                ("/rr_model?key=boards", json["result"].clone())
            }
            Dialect::Session => {
                let json = self.call_json(&ApiRequest::Get {
                    path: "/machine/status",
                    query: vec![],
                })?;
                ("/machine/status", json["boards"].clone())
            }
        };
        boards[0]["firmwareVersion"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| PrinterError::Malformed {
                endpoint: endpoint.to_string(),
                reason: "missing boards[0].firmwareVersion".to_string(),
            })
    }

    fn status(&self) -> Result<StatusReport, PrinterError> {
        let dialect = self.current_dialect()?;
        let mut messages = Vec::new();
        let mut state = self.fetch_state(dialect)?;

        for _ in 0..constants::MESSAGE_QUEUE_DEPTH {
            if !self.take_message(&state, &mut messages) {
                break;
            }
            state = self.fetch_state(dialect)?;
        }

        let status = state["status"]
            .as_str()
            .ok_or_else(|| PrinterError::Malformed {
                endpoint: "status".to_string(),
                reason: "missing status".to_string(),
            })?;
        debug!("Status is {}", status);
        Ok(StatusReport {
            status: PrinterStatus::from(status),
            messages,
        })
    }

    fn layer(&self) -> Result<i64, PrinterError> {
        let value = self.model_value("job.layer")?;
        let layer = value.as_i64().unwrap_or(-1);
        debug!("Current layer is {}", layer);
        Ok(layer)
    }

    fn position(&self) -> Result<Position, PrinterError> {
        let axes = self.model_value("move.axes")?;
        let axis = |i: usize| {
            axes[i]["machinePosition"]
                .as_f64()
                .ok_or_else(|| PrinterError::Malformed {
                    endpoint: "move.axes".to_string(),
                    reason: format!("missing machinePosition for axis {i}"),
                })
        };
        Ok(Position {
            x: axis(0)?,
            y: axis(1)?,
            z: axis(2)?,
        })
    }

    fn jobname(&self) -> Result<String, PrinterError> {
        let value = self.model_value("job.file.fileName")?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    fn send_gcode(&self, code: &str) -> Result<(), PrinterError> {
        let request = match self.current_dialect()? {
            Dialect::Legacy => ApiRequest::Get {
                path: "/rr_gcode",
                query: vec![("gcode", code)],
            },
            Dialect::Session => ApiRequest::Post {
                path: "/machine/code",
                body: code,
            },
        };
        self.call(&request, true).map(|_| ())
    }
}

/// Major version must be 3 or above.
///
/// # Errors
///
/// Returns [`PrinterError::UnsupportedFirmware`] for older or unparsable versions.
pub fn check_firmware(version: &str) -> Result<(), PrinterError> {
    let major = version
        .trim()
        .chars()
        .next()
        .and_then(|c| c.to_digit(10))
        .unwrap_or(0);
    if major >= 3 {
        Ok(())
    } else {
        Err(PrinterError::UnsupportedFirmware {
            version: version.to_string(),
        })
    }
}

fn parse_json(endpoint: &str, body: &str) -> Result<Value, PrinterError> {
    serde_json::from_str(body).map_err(|e| PrinterError::Malformed {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })
}
