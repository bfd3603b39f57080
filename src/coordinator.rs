//! Serialized high-level transitions.
//!
//! Requests from the control API, printer operator messages and the engine
//! itself all arrive on one [`ActionQueue`]. A single worker thread runs
//! them through [`ActionCoordinator::execute`] one at a time, so two
//! transitions never interleave.

use std::fmt;
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Local;
use log::{debug, info, warn};
use serde::Serialize;

use crate::capture::{CaptureLoop, SharedCapture};
use crate::config::{SharedSettings, Settings, Timings, constants};
use crate::connection::ConnectionSupervisor;
use crate::session::{PrintSession, TransitionRecord};
use crate::task::{ExitReason, Lifeline, StopOutcome, TaskControl, spawn_guarded};
use crate::video::{VideoAssembler, describe_outcome};

/// A high-level transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Start,
    Standby,
    Pause,
    Continue,
    Restart,
    /// The print finished; make the video then terminate or restart.
    Completed,
    Terminate,
    /// Connection lost; suspend the main loop and probe.
    WaitForConnection,
    /// Connection restored; resume the last settled action.
    Reconnected,
    /// Video of the frames so far, capture keeps running.
    Snapshot,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Start => "start",
            ActionKind::Standby => "standby",
            ActionKind::Pause => "pause",
            ActionKind::Continue => "continue",
            ActionKind::Restart => "restart",
            ActionKind::Completed => "completed",
            ActionKind::Terminate => "terminate",
            ActionKind::WaitForConnection => "waitforconnection",
            ActionKind::Reconnected => "reconnected",
            ActionKind::Snapshot => "snapshot",
        }
    }

    /// Whether an operator message may name this action directly.
    pub fn is_operator_requestable(self) -> bool {
        matches!(
            self,
            ActionKind::Start
                | ActionKind::Standby
                | ActionKind::Pause
                | ActionKind::Continue
                | ActionKind::Restart
                | ActionKind::Completed
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "start" => Ok(ActionKind::Start),
            "standby" => Ok(ActionKind::Standby),
            "pause" => Ok(ActionKind::Pause),
            "continue" => Ok(ActionKind::Continue),
            "restart" => Ok(ActionKind::Restart),
            "completed" => Ok(ActionKind::Completed),
            "terminate" => Ok(ActionKind::Terminate),
            "waitforconnection" => Ok(ActionKind::WaitForConnection),
            "reconnected" => Ok(ActionKind::Reconnected),
            "snapshot" => Ok(ActionKind::Snapshot),
            other => Err(format!("unknown action '{other}'")),
        }
    }
}

/// Who asked for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestSource {
    /// The HTTP control API; not gated.
    Control,
    /// A printer operator message; gated by [`allowed_next`].
    Operator,
    /// The engine itself.
    Internal,
}

/// One queued transition, with an optional channel for the outcome.
#[derive(Debug)]
pub struct ActionRequest {
    pub kind: ActionKind,
    pub source: RequestSource,
    pub reply: Option<Sender<String>>,
}

/// Sending half of the coordinator queue.
#[derive(Debug, Clone)]
pub struct ActionQueue {
    tx: Sender<ActionRequest>,
}

impl ActionQueue {
    pub fn channel() -> (Self, Receiver<ActionRequest>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }

    /// Queue a request without waiting for it.
    pub fn submit(&self, kind: ActionKind, source: RequestSource) {
        debug!("Queueing '{}' from {:?}", kind, source);
        let request = ActionRequest {
            kind,
            source,
            reply: None,
        };
        if self.tx.send(request).is_err() {
            warn!("Coordinator is gone; '{}' was dropped", kind);
        }
    }

    /// Queue a request and return the channel its outcome arrives on.
    pub fn request(&self, kind: ActionKind, source: RequestSource) -> Option<Receiver<String>> {
        let (reply, outcome) = mpsc::channel();
        let request = ActionRequest {
            kind,
            source,
            reply: Some(reply),
        };
        self.tx.send(request).ok().map(|()| outcome)
    }

    /// Queue a request and wait at most `timeout` for its outcome.
    ///
    /// Returns `None` if the outcome did not arrive in time; the request
    /// still runs.
    pub fn request_and_wait(
        &self,
        kind: ActionKind,
        source: RequestSource,
        timeout: Duration,
    ) -> Option<String> {
        self.request(kind, source)?.recv_timeout(timeout).ok()
    }
}

/// Actions an operator message may request after `current`.
pub fn allowed_next(current: Option<ActionKind>, standby: bool) -> &'static [ActionKind] {
    use ActionKind::*;
    match current {
        Some(Standby) => &[Start],
        Some(Pause) => &[Standby, Continue, Restart],
        Some(Restart) if standby => &[Start],
        _ => &[Standby, Pause, Restart],
    }
}

/// Executes transitions one at a time.
pub struct ActionCoordinator {
    session: Arc<PrintSession>,
    capture: SharedCapture,
    capture_task: Arc<TaskControl>,
    main_task: Arc<TaskControl>,
    supervisor: Arc<ConnectionSupervisor>,
    video: Arc<VideoAssembler>,
    settings: SharedSettings,
    lifeline: Arc<Lifeline>,
    timings: Timings,
    in_flight: Mutex<()>,
}

impl ActionCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: Arc<PrintSession>,
        capture: SharedCapture,
        capture_task: Arc<TaskControl>,
        main_task: Arc<TaskControl>,
        supervisor: Arc<ConnectionSupervisor>,
        video: Arc<VideoAssembler>,
        settings: SharedSettings,
        lifeline: Arc<Lifeline>,
        timings: Timings,
    ) -> Self {
        Self {
            session,
            capture,
            capture_task,
            main_task,
            supervisor,
            video,
            settings,
            lifeline,
            timings,
            in_flight: Mutex::new(()),
        }
    }

    /// Start the worker that drains `requests` until the process exits.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be spawned.
    pub fn spawn(
        self: &Arc<Self>,
        requests: Receiver<ActionRequest>,
    ) -> std::io::Result<JoinHandle<()>> {
        let coordinator = Arc::clone(self);
        spawn_guarded("nextAction", Arc::clone(&self.lifeline), move || {
            loop {
                if coordinator.lifeline.exit_reason().is_some() {
                    debug!("Coordinator exiting");
                    return;
                }
                match requests.recv_timeout(coordinator.timings.loop_tick) {
                    Ok(request) => {
                        let outcome = coordinator.execute(request.kind, request.source);
                        if let Some(reply) = request.reply {
                            let _ = reply.send(outcome);
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
        })
    }

    fn settings(&self) -> Settings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn capture(&self) -> MutexGuard<'_, CaptureLoop> {
        self.capture.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one transition to completion and describe the outcome.
    pub fn execute(&self, kind: ActionKind, source: RequestSource) -> String {
        let _guard = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(refusal) = self.refusal(kind, source) {
            info!("{}", refusal);
            return refusal;
        }

        let started = Local::now();
        info!("*********** Executing {} ({:?}) ***********", kind, source);
        if kind != ActionKind::Snapshot {
            self.stop_capture();
        }

        let outcome = match kind {
            ActionKind::Start => {
                self.capture_task.arm();
                self.session.settle(ActionKind::Start);
                "Capture started".to_string()
            }
            ActionKind::Standby => {
                self.capture().reset();
                self.session.settle(ActionKind::Standby);
                "Standing by; frames discarded".to_string()
            }
            ActionKind::Pause => {
                self.session.settle(ActionKind::Pause);
                "Capture paused".to_string()
            }
            ActionKind::Continue => {
                self.capture_task.arm();
                self.session.settle(ActionKind::Start);
                "Capture continued".to_string()
            }
            ActionKind::Restart => {
                let settings = self.settings();
                let video = if settings.video.no_video {
                    "Video disabled".to_string()
                } else {
                    self.finalize_video(true, false)
                };
                format!("{}; {}", video, self.begin_new_job(settings.standby))
            }
            ActionKind::Completed => self.complete(),
            ActionKind::Terminate => {
                let make_video = !self.settings().video.no_video;
                self.terminate(make_video)
            }
            ActionKind::WaitForConnection => self.suspend_for_connection(),
            ActionKind::Reconnected => self.resume_after_connection(),
            ActionKind::Snapshot => {
                let directory = self.capture().working_dir();
                match directory {
                    Some(dir) => describe_outcome(&self.video.assemble(&dir, false, true)),
                    None => "No frames were captured; no snapshot created".to_string(),
                }
            }
        };

        self.session.record_transition(TransitionRecord {
            request: kind,
            started,
            finished: Local::now(),
            outcome: outcome.clone(),
        });
        info!("{} finished: {}", kind, outcome);
        outcome
    }

    fn refusal(&self, kind: ActionKind, source: RequestSource) -> Option<String> {
        if self.lifeline.is_terminating() {
            return Some(format!("Terminating; '{kind}' was not executed"));
        }
        let exempt = matches!(
            kind,
            ActionKind::Reconnected
                | ActionKind::WaitForConnection
                | ActionKind::Completed
                | ActionKind::Terminate
        );
        if !exempt && !self.supervisor.is_connected() {
            return Some(format!("Printer is disconnected; '{kind}' was dropped"));
        }

        let current = self.session.action();
        let settled = match kind {
            ActionKind::Continue => ActionKind::Start,
            other => other,
        };
        if matches!(
            settled,
            ActionKind::Start | ActionKind::Standby | ActionKind::Pause
        ) && current == Some(settled)
        {
            return Some(format!("Already in {settled} state"));
        }

        if source == RequestSource::Operator
            && kind != ActionKind::Completed
            && kind != ActionKind::Snapshot
        {
            let allowed = allowed_next(current, self.settings().standby);
            if !allowed.contains(&kind) {
                let names: Vec<&str> = allowed.iter().map(|a| a.as_str()).collect();
                return Some(format!(
                    "The requested action '{}' is not available; allowed: {}",
                    kind,
                    names.join(", ")
                ));
            }
        }
        None
    }

    /// Disarm capture and wait up to three poll intervals for the current
    /// tick to finish.
    fn stop_capture(&self) -> StopOutcome {
        self.capture_task.request_stop();
        let poll = self.settings().capture.poll_interval();
        let outcome = self
            .capture_task
            .wait_until_stopped(poll * constants::STOP_WAIT_POLLS);
        debug!("Capture stop: {:?}", outcome);
        outcome
    }

    fn stop_main(&self) -> StopOutcome {
        self.main_task.request_stop();
        self.main_task
            .wait_until_stopped(self.timings.status_interval * constants::STOP_WAIT_POLLS)
    }

    /// Capture final frames and assemble the current directory.
    fn finalize_video(&self, extend: bool, completed: bool) -> String {
        let directory = {
            let mut capture = self.capture();
            capture.capture_final_frames();
            capture.working_dir()
        };
        match directory {
            Some(dir) => describe_outcome(&self.video.assemble(&dir, extend, !completed)),
            None => "No frames were captured; no video created".to_string(),
        }
    }

    /// Fresh directory and counters, then standby or start.
    fn begin_new_job(&self, standby: bool) -> String {
        self.capture().start_new_job();
        if standby {
            self.session.settle(ActionKind::Standby);
            "New job standing by".to_string()
        } else {
            self.capture_task.arm();
            self.session.settle(ActionKind::Start);
            "New job started".to_string()
        }
    }

    fn complete(&self) -> String {
        let settings = self.settings();
        let video = if settings.video.no_video {
            "Video disabled".to_string()
        } else {
            self.finalize_video(true, true)
        };
        if settings.restart {
            self.cleanup(&settings);
            format!("{}; {}", video, self.begin_new_job(settings.standby))
        } else {
            format!("{}; {}", video, self.terminate(false))
        }
    }

    fn cleanup(&self, settings: &Settings) {
        if settings.delete_pics && !settings.keep_files {
            self.capture().delete_frames();
        }
    }

    /// Stop everything, optionally make the video, clean up, then exit or
    /// begin a new job when restart is configured.
    fn terminate(&self, make_video: bool) -> String {
        self.lifeline.begin_terminating();
        let settings = self.settings();
        let video = if make_video {
            self.finalize_video(true, true)
        } else {
            "No video created".to_string()
        };
        self.cleanup(&settings);

        if settings.restart {
            self.wait_for_job_to_clear();
            self.lifeline.end_terminating();
            return format!("{}; {}", video, self.begin_new_job(settings.standby));
        }

        self.stop_main();
        info!("Program terminated");
        self.lifeline.exit(ExitReason::Graceful);
        video
    }

    /// Wait, bounded, until the printer no longer reports a job name.
    fn wait_for_job_to_clear(&self) {
        let deadline =
            Instant::now() + self.timings.jobname_poll * self.timings.jobname_attempts;
        while Instant::now() < deadline && self.lifeline.exit_reason().is_none() {
            let jobname = self
                .supervisor
                .query("jobname", |printer| printer.jobname());
            match jobname {
                Some(name) if !name.is_empty() => {
                    debug!("Waiting for job '{}' to clear", name);
                    thread::sleep(self.timings.jobname_poll);
                }
                _ => return,
            }
        }
        warn!("Printer still reports a job; restarting anyway");
    }

    fn suspend_for_connection(&self) -> String {
        self.stop_main();
        match self.supervisor.spawn_probe() {
            Ok(()) => "Waiting for the printer to reconnect".to_string(),
            Err(e) => {
                warn!("Could not start connection probe: {}", e);
                format!("Could not start connection probe: {e}")
            }
        }
    }

    fn resume_after_connection(&self) -> String {
        self.main_task.arm();
        self.lifeline.sleep(self.timings.status_interval);
        match self.session.last_action() {
            Some(ActionKind::Start) => {
                self.capture_task.arm();
                "Reconnected; capture resumed".to_string()
            }
            Some(last) => format!("Reconnected; resumed {last}"),
            None => "Reconnected".to_string(),
        }
    }
}
