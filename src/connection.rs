//! Connection supervision.
//!
//! Every printer query made by the loops goes through
//! [`ConnectionSupervisor::query`]. Failures are retried in place; the
//! third consecutive failure hands control to the coordinator, which
//! suspends capture while a background prober waits for the printer to
//! come back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};

use crate::config::{Timings, constants};
use crate::coordinator::{ActionKind, ActionQueue, RequestSource};
use crate::error::PrinterError;
use crate::printer::{Dialect, Printer, SharedPrinter};
use crate::task::{Lifeline, spawn_guarded};

/// Connectivity as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    /// Consecutive failed queries so far.
    Degraded(u32),
    /// Given up on queries; waiting for a probe to succeed.
    Reconnecting,
}

pub struct ConnectionSupervisor {
    printer: SharedPrinter,
    state: Mutex<ConnectionState>,
    probing: AtomicBool,
    actions: ActionQueue,
    lifeline: Arc<Lifeline>,
    timings: Timings,
}

impl ConnectionSupervisor {
    pub fn new(
        printer: SharedPrinter,
        actions: ActionQueue,
        lifeline: Arc<Lifeline>,
        timings: Timings,
    ) -> Self {
        Self {
            printer,
            state: Mutex::new(ConnectionState::Connected),
            probing: AtomicBool::new(false),
            actions,
            lifeline,
            timings,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> ConnectionState {
        *self.lock()
    }

    /// `false` only while reconnecting.
    pub fn is_connected(&self) -> bool {
        self.state() != ConnectionState::Reconnecting
    }

    pub fn printer(&self) -> &dyn Printer {
        self.printer.as_ref()
    }

    /// Run a printer query with retry and disconnect accounting.
    ///
    /// Returns `None` when the query could not be answered: the supervisor
    /// is reconnecting, the process is terminating, or this failure tipped
    /// the supervisor into reconnecting. Only disconnects count toward the
    /// reconnect limit; other API errors fail the query alone.
    pub fn query<T, F>(&self, what: &str, f: F) -> Option<T>
    where
        F: Fn(&dyn Printer) -> Result<T, PrinterError>,
    {
        loop {
            if !self.is_connected() {
                debug!("Bypassing '{}' while reconnecting", what);
                return None;
            }
            debug!("Calling '{}'", what);
            match f(self.printer.as_ref()) {
                Ok(value) => {
                    *self.lock() = ConnectionState::Connected;
                    return Some(value);
                }
                Err(e) => {
                    if self.lifeline.is_terminating() {
                        debug!("'{}' failed while terminating: {}", what, e);
                        return None;
                    }
                    if !e.is_disconnected() {
                        warn!("'{}' failed: {}", what, e);
                        return None;
                    }
                    let failures = {
                        let mut state = self.lock();
                        let failures = match *state {
                            ConnectionState::Degraded(n) => n + 1,
                            _ => 1,
                        };
                        *state = ConnectionState::Degraded(failures);
                        failures
                    };
                    debug!("'{}' failed ({} consecutive): {}", what, failures, e);
                    self.lifeline.sleep(self.timings.retry_pause);

                    if failures > constants::DISCONNECT_LIMIT {
                        self.enter_reconnecting();
                        return None;
                    }
                }
            }
        }
    }

    fn enter_reconnecting(&self) {
        {
            let mut state = self.lock();
            if *state == ConnectionState::Reconnecting {
                return;
            }
            *state = ConnectionState::Reconnecting;
        }
        info!("----------------  Lost connection to the printer -----------------");
        self.actions
            .submit(ActionKind::WaitForConnection, RequestSource::Internal);
    }

    /// Start the background prober unless one is already running.
    ///
    /// On success the prober marks the connection restored and submits a
    /// `reconnected` request.
    ///
    /// # Errors
    ///
    /// Returns an error if the probe thread cannot be spawned.
    pub fn spawn_probe(self: &Arc<Self>) -> std::io::Result<()> {
        if self.probing.swap(true, Ordering::SeqCst) {
            debug!("Connection probe already running");
            return Ok(());
        }
        *self.lock() = ConnectionState::Reconnecting;
        let supervisor = Arc::clone(self);
        let spawned = spawn_guarded("checkforConnection", Arc::clone(&self.lifeline), move || {
            let restored = supervisor.probe_until_connected().is_some();
            supervisor.probing.store(false, Ordering::SeqCst);
            if restored {
                supervisor
                    .actions
                    .submit(ActionKind::Reconnected, RequestSource::Internal);
            }
        });
        if spawned.is_err() {
            self.probing.store(false, Ordering::SeqCst);
        }
        spawned.map(|_| ())
    }

    /// Probe until a login succeeds or the process terminates.
    ///
    /// Probes every status interval for the quick phase, then every slow
    /// probe interval.
    pub fn probe_until_connected(&self) -> Option<Dialect> {
        info!("----------------  Waiting for printer to reconnect -----------------");
        let mut probes = 0u32;
        loop {
            if self.lifeline.is_terminating() {
                return None;
            }
            match self.printer.login() {
                Ok(dialect) => {
                    *self.lock() = ConnectionState::Connected;
                    info!("-----------------------  Reconnected to printer ----------------------");
                    return Some(dialect);
                }
                Err(e) => {
                    probes += 1;
                    let wait = if probes <= self.timings.quick_probes {
                        self.timings.status_interval
                    } else {
                        self.timings.slow_probe
                    };
                    debug!("Probe {} failed ({}); retrying in {:?}", probes, e, wait);
                    if !self.lifeline.sleep(wait) {
                        return None;
                    }
                }
            }
        }
    }

    /// First connection at startup.
    ///
    /// Keeps probing until the printer answers, then checks its firmware.
    ///
    /// # Errors
    ///
    /// Returns [`PrinterError::UnsupportedFirmware`] for firmware older than
    /// version 3, or the last login error if the process terminated while
    /// waiting.
    pub fn connect_initial(&self, host: &str) -> Result<Dialect, PrinterError> {
        let dialect = match self.printer.login() {
            Ok(dialect) => dialect,
            Err(e) => {
                warn!("#########################################################");
                warn!("The printer at {} is not responding: {}", host, e);
                warn!("Check the address is correct and the printer is turned on");
                warn!("#########################################################");
                *self.lock() = ConnectionState::Reconnecting;
                self.probe_until_connected().ok_or(e)?
            }
        };

        let version = self.printer.firmware_version()?;
        crate::printer::check_firmware(&version)?;
        *self.lock() = ConnectionState::Connected;
        info!("###############################################################");
        info!("Connected to printer at {}", host);
        info!("Using firmware version {}", version);
        info!("Using API interface {}", dialect);
        info!("###############################################################");
        Ok(dialect)
    }
}
