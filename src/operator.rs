//! Printer-side operator messages.
//!
//! A message such as `DuetLapse3.pause` shown on the printer is a remote
//! request to this program. [`StatusMonitor`] is the single place status is
//! polled, so every drained message is dispatched exactly once.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::config::SharedSettings;
use crate::connection::ConnectionSupervisor;
use crate::coordinator::{ActionKind, ActionQueue, RequestSource};
use crate::printer::{OperatorMessage, PrinterStatus};
use crate::session::PrintSession;
use crate::task::{ExitReason, Lifeline};

/// What an operator message asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    /// A coordinator transition by name.
    Action(ActionKind),
    /// Finish the job: video, then terminate.
    Graceful,
    /// Exit immediately without a video.
    Forced,
    /// Video of the frames so far, without extension.
    Snapshot,
    /// `change.<name>=<value>` runtime setting change.
    Change(String),
    Unknown(String),
}

/// Parse the part of a message after the prefix and dot.
pub fn parse_command(text: &str) -> OperatorCommand {
    let text = text.trim();
    match text {
        "graceful" => OperatorCommand::Graceful,
        "forced" => OperatorCommand::Forced,
        _ if text.starts_with("snapshot") => OperatorCommand::Snapshot,
        _ => {
            if let Some(change) = text.strip_prefix("change.") {
                return OperatorCommand::Change(change.to_string());
            }
            match text.parse::<ActionKind>() {
                Ok(kind) if kind.is_operator_requestable() => OperatorCommand::Action(kind),
                _ => OperatorCommand::Unknown(text.to_string()),
            }
        }
    }
}

/// Routes parsed operator commands to the coordinator, settings or lifeline.
#[derive(Clone)]
pub struct OperatorDispatcher {
    actions: ActionQueue,
    settings: SharedSettings,
    lifeline: Arc<Lifeline>,
}

impl OperatorDispatcher {
    pub fn new(actions: ActionQueue, settings: SharedSettings, lifeline: Arc<Lifeline>) -> Self {
        Self {
            actions,
            settings,
            lifeline,
        }
    }

    pub fn dispatch(&self, message: &OperatorMessage) {
        debug!("Parsing message '{}' with seq {}", message.text, message.seq);
        match parse_command(&message.text) {
            OperatorCommand::Action(kind) => {
                self.actions.submit(kind, RequestSource::Operator);
            }
            OperatorCommand::Graceful => {
                self.actions
                    .submit(ActionKind::Completed, RequestSource::Operator);
            }
            OperatorCommand::Forced => {
                info!("Forced termination requested from the printer");
                self.lifeline.exit(ExitReason::Forced);
            }
            OperatorCommand::Snapshot => {
                self.actions
                    .submit(ActionKind::Snapshot, RequestSource::Operator);
            }
            OperatorCommand::Change(change) => {
                let mut settings = self
                    .settings
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if let Err(e) = settings.apply_change(&change) {
                    warn!("Change '{}' was not applied: {}", change, e);
                }
            }
            OperatorCommand::Unknown(text) => {
                info!("The requested action '{}' is not available", text);
            }
        }
    }
}

/// Polls printer status through the supervisor and dispatches operator
/// messages drained along the way.
pub struct StatusMonitor {
    supervisor: Arc<ConnectionSupervisor>,
    session: Arc<PrintSession>,
    dispatcher: OperatorDispatcher,
}

impl StatusMonitor {
    pub fn new(
        supervisor: Arc<ConnectionSupervisor>,
        session: Arc<PrintSession>,
        dispatcher: OperatorDispatcher,
    ) -> Self {
        Self {
            supervisor,
            session,
            dispatcher,
        }
    }

    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor> {
        &self.supervisor
    }

    /// Poll status now. `None` when the printer could not be reached.
    pub fn refresh(&self, what: &str) -> Option<PrinterStatus> {
        let report = self.supervisor.query(what, |printer| printer.status())?;
        for message in &report.messages {
            self.dispatcher.dispatch(message);
        }
        let previous = self.session.printer_status();
        if previous.as_ref() != Some(&report.status) {
            info!("****** Printer status changed to: {} *****", report.status);
        }
        self.session.set_printer_status(report.status.clone());
        Some(report.status)
    }

    /// The most recent status without polling.
    pub fn latest(&self) -> Option<PrinterStatus> {
        self.session.printer_status()
    }
}
