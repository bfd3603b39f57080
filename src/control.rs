//! HTTP control API.
//!
//! `GET /status` returns the session as JSON. `GET /command?name=<cmd>`,
//! `GET /terminate?mode=<graceful|forced>`, `GET /video?dir=<path>&extend=<bool>`
//! and `GET /settings?<name>=<value>...` return a readable message.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use log::{error, info};
use serde::Deserialize;

use crate::config::SharedSettings;
use crate::connection::ConnectionSupervisor;
use crate::coordinator::{ActionKind, ActionQueue, RequestSource};
use crate::session::{PrintSession, SessionSnapshot};
use crate::task::{ExitReason, Lifeline, spawn_guarded};
use crate::video::{VideoAssembler, describe_outcome};

/// How `terminate` ends the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateMode {
    /// Assemble the video first.
    Graceful,
    /// Exit now, no video.
    Forced,
}

impl FromStr for TerminateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "graceful" => Ok(TerminateMode::Graceful),
            "forced" => Ok(TerminateMode::Forced),
            other => Err(format!("unknown terminate mode '{other}'")),
        }
    }
}

/// A command accepted by the control API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Status,
    Action(ActionKind),
    Terminate(TerminateMode),
}

impl FromStr for ControlCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "status" => Ok(ControlCommand::Status),
            "terminate" => Ok(ControlCommand::Terminate(TerminateMode::Graceful)),
            name => match name.parse::<ActionKind>() {
                Ok(
                    kind @ (ActionKind::Start
                    | ActionKind::Standby
                    | ActionKind::Pause
                    | ActionKind::Continue
                    | ActionKind::Restart),
                ) => Ok(ControlCommand::Action(kind)),
                _ => Err(format!("unknown command '{name}'")),
            },
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::Status => f.write_str("status"),
            ControlCommand::Action(kind) => write!(f, "{kind}"),
            ControlCommand::Terminate(TerminateMode::Graceful) => f.write_str("terminate"),
            ControlCommand::Terminate(TerminateMode::Forced) => f.write_str("terminate forced"),
        }
    }
}

/// Shared handles the handlers work with.
#[derive(Clone)]
pub struct ControlState {
    pub actions: ActionQueue,
    pub session: Arc<PrintSession>,
    pub supervisor: Arc<ConnectionSupervisor>,
    pub video: Arc<VideoAssembler>,
    pub settings: SharedSettings,
    pub lifeline: Arc<Lifeline>,
    /// How long a handler waits for the coordinator before answering.
    pub reply_timeout: Duration,
}

type Reply = (StatusCode, String);

#[derive(Debug, Deserialize)]
struct CommandQuery {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TerminateQuery {
    #[serde(default)]
    mode: String,
}

#[derive(Debug, Deserialize)]
struct VideoQuery {
    dir: PathBuf,
    #[serde(default)]
    extend: bool,
}

async fn get_status(State(state): State<ControlState>) -> Json<SessionSnapshot> {
    Json(state.session.snapshot(state.supervisor.is_connected()))
}

async fn get_command(
    State(state): State<ControlState>,
    Query(query): Query<CommandQuery>,
) -> Reply {
    match query.name.parse::<ControlCommand>() {
        Ok(command) => run_command(state, command).await,
        Err(e) => (StatusCode::BAD_REQUEST, e),
    }
}

async fn get_terminate(
    State(state): State<ControlState>,
    Query(query): Query<TerminateQuery>,
) -> Reply {
    match query.mode.parse::<TerminateMode>() {
        Ok(mode) => run_command(state, ControlCommand::Terminate(mode)).await,
        Err(e) => (StatusCode::BAD_REQUEST, e),
    }
}

async fn get_video(State(state): State<ControlState>, Query(query): Query<VideoQuery>) -> Reply {
    info!(
        "Video requested for {} (extend: {})",
        query.dir.display(),
        query.extend
    );
    let video = Arc::clone(&state.video);
    let outcome =
        tokio::task::spawn_blocking(move || video.assemble(&query.dir, query.extend, true)).await;
    match outcome {
        Ok(result) => {
            let status = if result.is_ok() {
                StatusCode::OK
            } else {
                StatusCode::UNPROCESSABLE_ENTITY
            };
            (status, describe_outcome(&result))
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn get_settings(
    State(state): State<ControlState>,
    Query(changes): Query<BTreeMap<String, String>>,
) -> Reply {
    if changes.is_empty() {
        return (StatusCode::BAD_REQUEST, "no settings given".to_string());
    }
    let commands: Vec<String> = changes
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    let mut settings = state
        .settings
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    match settings.apply_changes(&commands) {
        Ok(messages) => (StatusCode::OK, messages.join("\n")),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()),
    }
}

async fn run_command(state: ControlState, command: ControlCommand) -> Reply {
    info!("Control request: {}", command);
    let kind = match command {
        ControlCommand::Status => {
            let snapshot = state.session.snapshot(state.supervisor.is_connected());
            return match serde_json::to_string_pretty(&snapshot) {
                Ok(text) => (StatusCode::OK, text),
                Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            };
        }
        ControlCommand::Terminate(TerminateMode::Forced) => {
            state.lifeline.exit(ExitReason::Forced);
            return (StatusCode::OK, "Forced termination".to_string());
        }
        ControlCommand::Terminate(TerminateMode::Graceful) => ActionKind::Terminate,
        ControlCommand::Action(kind) => kind,
    };

    let actions = state.actions.clone();
    let timeout = state.reply_timeout;
    let outcome = tokio::task::spawn_blocking(move || {
        actions.request_and_wait(kind, RequestSource::Control, timeout)
    })
    .await;
    match outcome {
        Ok(Some(message)) => (StatusCode::OK, message),
        Ok(None) => (StatusCode::ACCEPTED, format!("'{kind}' is in progress")),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// The control API routes.
pub fn create_control_router(state: ControlState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/command", get(get_command))
        .route("/terminate", get(get_terminate))
        .route("/video", get(get_video))
        .route("/settings", get(get_settings))
        .with_state(state)
}

/// Serve the control API on its own thread with its own runtime.
///
/// A failure to bind is logged and leaves the engine running without the
/// control API.
///
/// # Errors
///
/// Returns an error if the server thread cannot be spawned.
pub fn run_control_server(
    addr: SocketAddr,
    state: ControlState,
) -> std::io::Result<JoinHandle<()>> {
    let lifeline = Arc::clone(&state.lifeline);
    spawn_guarded("controlServer", lifeline, move || {
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Could not start the control API runtime: {}", e);
                return;
            }
        };
        runtime.block_on(async move {
            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!("Control API could not bind to {}: {}", addr, e);
                    return;
                }
            };
            info!("Control API listening on http://{}", addr);
            if let Err(e) = axum::serve(listener, create_control_router(state)).await {
                error!("Control API stopped: {}", e);
            }
        });
    })
}
