use std::fmt;

use log::info;
use serde::Serialize;

use crate::config::{CaptureSettings, DetectMode};
use crate::printer::PrinterStatus;

/// Where the current print job is, from the capture point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PrintState {
    Waiting,
    Capturing,
    Completed,
}

impl fmt::Display for PrintState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PrintState::Waiting => "Waiting",
            PrintState::Capturing => "Capturing",
            PrintState::Completed => "Completed",
        })
    }
}

/// Waiting -> Capturing -> Completed, driven by printer status.
#[derive(Debug, Clone)]
pub struct PrintLifecycle {
    state: PrintState,
    seen_processing: bool,
}

impl Default for PrintLifecycle {
    fn default() -> Self {
        Self {
            state: PrintState::Waiting,
            seen_processing: false,
        }
    }
}

impl PrintLifecycle {
    pub fn state(&self) -> PrintState {
        self.state
    }

    /// Feed the latest status and return the (possibly new) state.
    ///
    /// Capturing starts when the printer is processing, when `dont_wait` is
    /// set, or when it is paused with a detect mode. It completes when the
    /// printer goes idle after processing was seen, or when terminating.
    pub fn advance(
        &mut self,
        status: &PrinterStatus,
        settings: &CaptureSettings,
        terminating: bool,
    ) -> PrintState {
        let next = match self.state {
            PrintState::Waiting => {
                let paused_with_detect =
                    *status == PrinterStatus::Paused && settings.detect != DetectMode::None;
                if *status == PrinterStatus::Processing || settings.dont_wait || paused_with_detect
                {
                    PrintState::Capturing
                } else {
                    PrintState::Waiting
                }
            }
            PrintState::Capturing => {
                if (*status == PrinterStatus::Idle && self.seen_processing) || terminating {
                    PrintState::Completed
                } else {
                    PrintState::Capturing
                }
            }
            PrintState::Completed => PrintState::Completed,
        };

        if *status == PrinterStatus::Processing && next == PrintState::Capturing {
            self.seen_processing = true;
        }
        if next != self.state {
            info!("****** Print State changed to: {} *****", next);
        }
        self.state = next;
        next
    }

    /// Back to Waiting for the next job.
    pub fn reset(&mut self) {
        self.state = PrintState::Waiting;
        self.seen_processing = false;
    }
}
