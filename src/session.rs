use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::coordinator::ActionKind;
use crate::lifecycle::PrintState;
use crate::printer::PrinterStatus;

const TRANSITION_HISTORY: usize = 16;

/// One finished coordinator transition.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionRecord {
    pub request: ActionKind,
    pub started: DateTime<Local>,
    pub finished: DateTime<Local>,
    pub outcome: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CameraSnapshot {
    pub name: String,
    pub frames: u64,
}

/// Point-in-time copy of the session, served by the control API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub action: Option<ActionKind>,
    pub last_action: Option<ActionKind>,
    pub print_state: PrintState,
    pub printer_status: Option<String>,
    pub connected: bool,
    pub cameras: Vec<CameraSnapshot>,
    pub working_dir: Option<PathBuf>,
    pub transitions: Vec<TransitionRecord>,
}

#[derive(Debug)]
struct SessionData {
    action: Option<ActionKind>,
    last_action: Option<ActionKind>,
    print_state: PrintState,
    printer_status: Option<PrinterStatus>,
    cameras: Vec<CameraSnapshot>,
    working_dir: Option<PathBuf>,
    transitions: VecDeque<TransitionRecord>,
}

/// State of the current print session shared between the loops.
///
/// The capture loop owns the authoritative frame counters; the copies here
/// are mirrors for reporting.
#[derive(Debug)]
pub struct PrintSession {
    inner: Mutex<SessionData>,
}

impl PrintSession {
    pub fn new(camera_names: &[String]) -> Self {
        Self {
            inner: Mutex::new(SessionData {
                action: None,
                last_action: None,
                print_state: PrintState::Waiting,
                printer_status: None,
                cameras: camera_names
                    .iter()
                    .map(|name| CameraSnapshot {
                        name: name.clone(),
                        frames: 0,
                    })
                    .collect(),
                working_dir: None,
                transitions: VecDeque::with_capacity(TRANSITION_HISTORY),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionData> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The action currently in effect.
    pub fn action(&self) -> Option<ActionKind> {
        self.lock().action
    }

    /// The last action a transition settled on; what a reconnect resumes.
    pub fn last_action(&self) -> Option<ActionKind> {
        self.lock().last_action
    }

    /// Settle on `action` as both current and last action.
    pub fn settle(&self, action: ActionKind) {
        let mut data = self.lock();
        data.action = Some(action);
        data.last_action = Some(action);
    }

    pub fn print_state(&self) -> PrintState {
        self.lock().print_state
    }

    pub fn set_print_state(&self, state: PrintState) {
        self.lock().print_state = state;
    }

    pub fn printer_status(&self) -> Option<PrinterStatus> {
        self.lock().printer_status.clone()
    }

    pub fn set_printer_status(&self, status: PrinterStatus) {
        self.lock().printer_status = Some(status);
    }

    pub fn set_frames(&self, camera: &str, frames: u64) {
        let mut data = self.lock();
        if let Some(entry) = data.cameras.iter_mut().find(|c| c.name == camera) {
            entry.frames = frames;
        }
    }

    pub fn set_working_dir(&self, dir: Option<PathBuf>) {
        self.lock().working_dir = dir;
    }

    pub fn working_dir(&self) -> Option<PathBuf> {
        self.lock().working_dir.clone()
    }

    pub fn record_transition(&self, record: TransitionRecord) {
        let mut data = self.lock();
        if data.transitions.len() == TRANSITION_HISTORY {
            data.transitions.pop_front();
        }
        data.transitions.push_back(record);
    }

    /// Finished transitions, oldest first.
    pub fn transitions(&self) -> Vec<TransitionRecord> {
        self.lock().transitions.iter().cloned().collect()
    }

    pub fn snapshot(&self, connected: bool) -> SessionSnapshot {
        let data = self.lock();
        SessionSnapshot {
            action: data.action,
            last_action: data.last_action,
            print_state: data.print_state,
            printer_status: data.printer_status.as_ref().map(ToString::to_string),
            connected,
            cameras: data.cameras.clone(),
            working_dir: data.working_dir.clone(),
            transitions: data.transitions.iter().cloned().collect(),
        }
    }
}
