//! Thread lifecycle primitives.
//!
//! [`TaskControl`] tracks one cooperatively stoppable task, [`Lifeline`]
//! carries the process-wide termination signal, and [`spawn_guarded`] turns
//! a panic in any long-running thread into a fatal exit.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, warn};

/// Where a cooperatively stoppable task is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Not executing; may begin when armed.
    Stopped,
    /// Executing, and asked to stop at the next checkpoint.
    StopRequested,
    /// Executing.
    Running,
}

/// How a bounded wait for a task to stop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The task reached `Stopped` on its own.
    Clean,
    /// The wait timed out and the state was overridden to `Stopped`.
    Forced,
}

#[derive(Debug)]
struct TaskInner {
    state: TaskState,
    armed: bool,
}

/// Lifecycle control for a task that runs in repeated units of work.
///
/// The task calls [`TaskControl::try_begin`] before each unit and
/// [`TaskControl::finish`] after it. Controllers disarm it with
/// [`TaskControl::request_stop`] and wait with
/// [`TaskControl::wait_until_stopped`].
#[derive(Debug)]
pub struct TaskControl {
    name: &'static str,
    inner: Mutex<TaskInner>,
    changed: Condvar,
}

impl TaskControl {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(TaskInner {
                state: TaskState::Stopped,
                armed: false,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TaskInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> TaskState {
        self.lock().state
    }

    pub fn is_armed(&self) -> bool {
        self.lock().armed
    }

    /// Allow the next unit of work to begin.
    pub fn arm(&self) {
        self.lock().armed = true;
        debug!("{} armed", self.name);
    }

    /// Disarm, and ask a running unit to stop at its next checkpoint.
    pub fn request_stop(&self) {
        let mut inner = self.lock();
        inner.armed = false;
        if inner.state == TaskState::Running {
            inner.state = TaskState::StopRequested;
            debug!("{} stop requested", self.name);
        }
    }

    /// Checkpoint for a running unit.
    pub fn is_stop_requested(&self) -> bool {
        self.lock().state == TaskState::StopRequested
    }

    /// Move to `Running` if armed and idle.
    pub fn try_begin(&self) -> bool {
        let mut inner = self.lock();
        if inner.armed && inner.state == TaskState::Stopped {
            inner.state = TaskState::Running;
            true
        } else {
            false
        }
    }

    /// Mark the current unit of work as done.
    pub fn finish(&self) {
        self.lock().state = TaskState::Stopped;
        self.changed.notify_all();
    }

    /// Block until the task is `Stopped`, at most `timeout`.
    ///
    /// On timeout the state is forced to `Stopped` so the caller can
    /// proceed.
    pub fn wait_until_stopped(&self, timeout: Duration) -> StopOutcome {
        let inner = self.lock();
        let (mut inner, result) = self
            .changed
            .wait_timeout_while(inner, timeout, |inner| inner.state != TaskState::Stopped)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if result.timed_out() && inner.state != TaskState::Stopped {
            inner.state = TaskState::Stopped;
            warn!(
                "Timed out after {:?} waiting for {} to stop; forcing stopped",
                timeout, self.name
            );
            StopOutcome::Forced
        } else {
            StopOutcome::Clean
        }
    }
}

/// Why the process is exiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Terminate finished its work.
    Graceful,
    /// Immediate exit was requested; no video.
    Forced,
    /// A long-running thread failed.
    Fatal,
}

impl ExitReason {
    pub fn code(self) -> i32 {
        match self {
            ExitReason::Graceful => 0,
            ExitReason::Forced => 0,
            ExitReason::Fatal => 1,
        }
    }
}

#[derive(Debug, Default)]
struct LifelineInner {
    exit: Option<ExitReason>,
}

/// Process-wide termination signal shared by every thread.
///
/// `terminating` is set while termination work runs; the exit reason is set
/// once the process should actually end. Both wake [`Lifeline::sleep`].
#[derive(Debug, Default)]
pub struct Lifeline {
    terminating: AtomicBool,
    inner: Mutex<LifelineInner>,
    changed: Condvar,
}

impl Lifeline {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, LifelineInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enter the terminating phase. Returns `false` if already terminating.
    pub fn begin_terminating(&self) -> bool {
        let first = !self.terminating.swap(true, Ordering::SeqCst);
        let _inner = self.lock();
        self.changed.notify_all();
        first
    }

    /// Leave the terminating phase, used when restarting instead of exiting.
    pub fn end_terminating(&self) {
        self.terminating.store(false, Ordering::SeqCst);
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::SeqCst) || self.exit_reason().is_some()
    }

    /// Signal that the process should exit. The first reason wins.
    pub fn exit(&self, reason: ExitReason) {
        let mut inner = self.lock();
        if inner.exit.is_none() {
            inner.exit = Some(reason);
        }
        self.changed.notify_all();
    }

    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.lock().exit
    }

    /// Block until an exit reason is set.
    pub fn wait(&self) -> ExitReason {
        let mut inner = self.lock();
        loop {
            if let Some(reason) = inner.exit {
                return reason;
            }
            inner = self
                .changed
                .wait(inner)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Sleep for `duration` unless termination begins first.
    ///
    /// Returns `true` if the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut inner = self.lock();
        loop {
            if inner.exit.is_some() || self.terminating.load(Ordering::SeqCst) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            inner = self
                .changed
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
    }
}

/// Spawn a named thread whose panic ends the process.
///
/// # Errors
///
/// Returns an error if the OS refuses to create the thread.
pub fn spawn_guarded<F>(
    name: &str,
    lifeline: Arc<Lifeline>,
    work: F,
) -> std::io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let thread_name = name.to_string();
    thread::Builder::new().name(thread_name.clone()).spawn(move || {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(work)) {
            error!(
                "Unrecoverable error in {}: {}",
                thread_name,
                panic_message(panic.as_ref())
            );
            lifeline.exit(ExitReason::Fatal);
        }
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
