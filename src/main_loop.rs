use std::sync::{Arc, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use crate::capture::SharedCapture;
use crate::config::{SharedSettings, Timings};
use crate::operator::StatusMonitor;
use crate::printer::PrinterStatus;
use crate::task::{Lifeline, TaskControl};

/// Drives status polling and capture ticks from one scheduler tick.
pub struct MainLoop {
    monitor: Arc<StatusMonitor>,
    capture: SharedCapture,
    capture_task: Arc<TaskControl>,
    main_task: Arc<TaskControl>,
    settings: SharedSettings,
    lifeline: Arc<Lifeline>,
    timings: Timings,
}

fn is_due(last: Option<Instant>, interval: Duration, now: Instant) -> bool {
    last.is_none_or(|at| now.duration_since(at) >= interval)
}

impl MainLoop {
    pub fn new(
        monitor: Arc<StatusMonitor>,
        capture: SharedCapture,
        capture_task: Arc<TaskControl>,
        main_task: Arc<TaskControl>,
        settings: SharedSettings,
        lifeline: Arc<Lifeline>,
        timings: Timings,
    ) -> Self {
        Self {
            monitor,
            capture,
            capture_task,
            main_task,
            settings,
            lifeline,
            timings,
        }
    }

    /// Run until the process exits.
    ///
    /// Each pass is one unit of `main_task` work, so the coordinator can
    /// suspend the loop while the printer is unreachable.
    pub fn run(&self) {
        let mut last_status: Option<Instant> = None;
        let mut last_capture: Option<Instant> = None;

        while self.lifeline.exit_reason().is_none() {
            if self.main_task.try_begin() {
                let now = Instant::now();
                let mut status = None;
                if is_due(last_status, self.timings.status_interval, now) {
                    status = self.monitor.refresh("status");
                    last_status = Some(now);
                }

                let poll = self
                    .settings
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .capture
                    .poll_interval();
                if is_due(last_capture, poll, now) {
                    last_capture = Some(now);
                    let status = status.or_else(|| self.monitor.latest());
                    self.capture_tick(status);
                }
                self.main_task.finish();
            }
            thread::sleep(self.timings.loop_tick);
        }
        debug!("Main loop exiting");
    }

    fn capture_tick(&self, status: Option<PrinterStatus>) {
        let Some(status) = status else {
            debug!("No printer status yet; skipping capture tick");
            return;
        };
        if !self.capture_task.try_begin() {
            return;
        }
        self.capture
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tick(&self.capture_task, &status);
        self.capture_task.finish();
    }
}
