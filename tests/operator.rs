mod common;

use std::time::Duration;

use common::Harness;
use layer_lapse::config::Settings;
use layer_lapse::coordinator::{ActionKind, ActionQueue, RequestSource};
use layer_lapse::operator::{OperatorCommand, OperatorDispatcher, parse_command};
use layer_lapse::printer::{OperatorMessage, PrinterStatus};
use layer_lapse::task::{ExitReason, Lifeline};

#[test]
fn test_parse_command() {
    assert_eq!(parse_command("pause"), OperatorCommand::Action(ActionKind::Pause));
    assert_eq!(
        parse_command(" restart "),
        OperatorCommand::Action(ActionKind::Restart)
    );
    assert_eq!(parse_command("graceful"), OperatorCommand::Graceful);
    assert_eq!(parse_command("forced"), OperatorCommand::Forced);
    assert_eq!(parse_command("snapshot now"), OperatorCommand::Snapshot);
    assert_eq!(
        parse_command("change.seconds=30"),
        OperatorCommand::Change("seconds=30".to_string())
    );
    assert_eq!(
        parse_command("reconnected"),
        OperatorCommand::Unknown("reconnected".to_string())
    );
    assert_eq!(
        parse_command("terminate"),
        OperatorCommand::Unknown("terminate".to_string())
    );
}

fn message(seq: i64, text: &str) -> OperatorMessage {
    OperatorMessage {
        seq,
        text: text.to_string(),
    }
}

#[test]
fn test_dispatch_routes_each_command() {
    let (actions, requests) = ActionQueue::channel();
    let settings = Settings::default().shared();
    let lifeline = Lifeline::new();
    let dispatcher = OperatorDispatcher::new(actions, settings.clone(), lifeline.clone());

    dispatcher.dispatch(&message(1, "standby"));
    dispatcher.dispatch(&message(2, "graceful"));
    dispatcher.dispatch(&message(3, "snapshot"));
    dispatcher.dispatch(&message(4, "change.fps=30"));
    dispatcher.dispatch(&message(5, "change.detect=sideways"));
    dispatcher.dispatch(&message(6, "dance"));

    let queued: Vec<(ActionKind, RequestSource)> = requests
        .try_iter()
        .map(|request| (request.kind, request.source))
        .collect();
    assert_eq!(
        queued,
        vec![
            (ActionKind::Standby, RequestSource::Operator),
            (ActionKind::Completed, RequestSource::Operator),
            (ActionKind::Snapshot, RequestSource::Operator),
        ]
    );
    assert_eq!(settings.read().unwrap().video.fps, 30.0);
    assert_eq!(lifeline.exit_reason(), None);

    dispatcher.dispatch(&message(7, "forced"));
    assert_eq!(lifeline.exit_reason(), Some(ExitReason::Forced));
}

#[test]
fn test_status_refresh_dispatches_drained_messages() {
    let harness = Harness::new(&[]);
    harness.printer.set_status(PrinterStatus::Processing);
    harness.printer.push_message(9, "change.seconds=45");

    let status = harness.engine.monitor.refresh("status");

    assert_eq!(status, Some(PrinterStatus::Processing));
    assert_eq!(
        harness.engine.monitor.latest(),
        Some(PrinterStatus::Processing)
    );
    assert_eq!(harness.engine.settings.read().unwrap().capture.seconds, 45);
}

#[test]
fn test_operator_pause_runs_through_the_coordinator() {
    let harness = Harness::new(&[]);
    harness.engine.start().unwrap();
    harness.printer.push_message(3, "pause");

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while harness.engine.session.action() != Some(ActionKind::Pause)
        && std::time::Instant::now() < deadline
    {
        std::thread::sleep(Duration::from_millis(10));
    }

    assert_eq!(harness.engine.session.action(), Some(ActionKind::Pause));
    assert!(!harness.engine.capture_task.is_armed());
    harness.engine.lifeline.exit(ExitReason::Forced);
}
