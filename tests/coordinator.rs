mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use common::{FakeCapture, FakeCensus, FakeEncoder, FakePrinter, Harness};
use layer_lapse::TimelapseError;
use layer_lapse::coordinator::{ActionKind, RequestSource, allowed_next};
use layer_lapse::engine::{Collaborators, Engine};
use layer_lapse::printer::{Printer, PrinterStatus};
use layer_lapse::task::ExitReason;

const CONTROL: RequestSource = RequestSource::Control;
const OPERATOR: RequestSource = RequestSource::Operator;

fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

fn disconnect(harness: &Harness) {
    harness.printer.offline.store(true, Ordering::SeqCst);
    assert!(harness
        .engine
        .supervisor
        .query("status", |p| p.status())
        .is_none());
    assert!(!harness.engine.supervisor.is_connected());
}

#[test]
fn test_start_and_repeat_is_refused() {
    let harness = Harness::new(&[]);
    let coordinator = &harness.engine.coordinator;

    assert_eq!(coordinator.execute(ActionKind::Start, CONTROL), "Capture started");
    assert!(harness.engine.capture_task.is_armed());
    assert_eq!(harness.engine.session.action(), Some(ActionKind::Start));

    let outcome = coordinator.execute(ActionKind::Start, CONTROL);
    assert!(outcome.starts_with("Already in"), "{outcome}");
    let outcome = coordinator.execute(ActionKind::Continue, CONTROL);
    assert!(outcome.starts_with("Already in"), "{outcome}");
    assert_eq!(harness.engine.session.transitions().len(), 1);
}

#[test]
fn test_pause_disarms_and_continue_rearms() {
    let harness = Harness::new(&[]);
    let coordinator = &harness.engine.coordinator;

    coordinator.execute(ActionKind::Start, CONTROL);
    coordinator.execute(ActionKind::Pause, CONTROL);
    assert!(!harness.engine.capture_task.is_armed());
    assert_eq!(harness.engine.session.action(), Some(ActionKind::Pause));

    assert_eq!(
        coordinator.execute(ActionKind::Continue, CONTROL),
        "Capture continued"
    );
    assert!(harness.engine.capture_task.is_armed());
    assert_eq!(harness.engine.session.action(), Some(ActionKind::Start));
}

#[test]
fn test_standby_discards_frames() {
    let harness = Harness::new(&[]);
    harness.engine.coordinator.execute(ActionKind::Start, CONTROL);
    harness.printer.queue_layers(&[1, 2]);
    harness.tick(PrinterStatus::Processing);
    harness.tick(PrinterStatus::Processing);
    let dir = harness.working_dir().unwrap();

    harness.engine.coordinator.execute(ActionKind::Standby, CONTROL);

    assert!(!dir.exists());
    assert_eq!(harness.frame_count("Camera1"), 0);
    assert!(!harness.engine.capture_task.is_armed());
}

#[test]
fn test_operator_requests_are_gated() {
    let harness = Harness::new(&[]);
    let coordinator = &harness.engine.coordinator;

    let outcome = coordinator.execute(ActionKind::Start, OPERATOR);
    assert!(outcome.contains("not available"), "{outcome}");
    assert!(harness.engine.session.transitions().is_empty());

    coordinator.execute(ActionKind::Start, CONTROL);

    assert_eq!(coordinator.execute(ActionKind::Pause, OPERATOR), "Capture paused");
    coordinator.execute(ActionKind::Standby, OPERATOR);
    assert_eq!(harness.engine.session.action(), Some(ActionKind::Standby));

    let outcome = coordinator.execute(ActionKind::Pause, OPERATOR);
    assert!(outcome.contains("allowed: start"), "{outcome}");

    // The control API is not gated.
    assert_eq!(coordinator.execute(ActionKind::Pause, CONTROL), "Capture paused");
}

#[test]
fn test_allowed_next_table() {
    use ActionKind::*;
    assert_eq!(allowed_next(Some(Standby), false), &[Start]);
    assert_eq!(allowed_next(Some(Pause), false), &[Standby, Continue, Restart]);
    assert_eq!(allowed_next(Some(Restart), true), &[Start]);
    assert_eq!(allowed_next(Some(Restart), false), &[Standby, Pause, Restart]);
    assert_eq!(allowed_next(Some(Start), false), &[Standby, Pause, Restart]);
    assert_eq!(allowed_next(None, false), &[Standby, Pause, Restart]);
}

#[test]
fn test_requests_are_dropped_while_disconnected() {
    let harness = Harness::new(&[]);
    disconnect(&harness);

    let outcome = harness.engine.coordinator.execute(ActionKind::Start, CONTROL);
    assert!(outcome.contains("disconnected"), "{outcome}");
    assert!(!harness.engine.capture_task.is_armed());
}

#[test]
fn test_reconnect_resumes_capture_after_start() {
    let harness = Harness::new(&[]);
    let coordinator = &harness.engine.coordinator;
    coordinator.execute(ActionKind::Start, CONTROL);

    disconnect(&harness);
    coordinator.execute(ActionKind::WaitForConnection, RequestSource::Internal);
    assert!(!harness.engine.capture_task.is_armed());

    harness.printer.offline.store(false, Ordering::SeqCst);
    assert!(wait_until(Duration::from_secs(2), || harness
        .engine
        .supervisor
        .is_connected()));

    let outcome = coordinator.execute(ActionKind::Reconnected, RequestSource::Internal);
    assert_eq!(outcome, "Reconnected; capture resumed");
    assert!(harness.engine.capture_task.is_armed());
    assert!(harness.engine.main_task.is_armed());
}

#[test]
fn test_reconnect_keeps_pause() {
    let harness = Harness::new(&[]);
    let coordinator = &harness.engine.coordinator;
    coordinator.execute(ActionKind::Start, CONTROL);
    coordinator.execute(ActionKind::Pause, CONTROL);

    disconnect(&harness);
    coordinator.execute(ActionKind::WaitForConnection, RequestSource::Internal);
    harness.printer.offline.store(false, Ordering::SeqCst);
    assert!(wait_until(Duration::from_secs(2), || harness
        .engine
        .supervisor
        .is_connected()));

    let outcome = coordinator.execute(ActionKind::Reconnected, RequestSource::Internal);
    assert_eq!(outcome, "Reconnected; resumed pause");
    assert!(!harness.engine.capture_task.is_armed());
    assert_eq!(harness.engine.session.action(), Some(ActionKind::Pause));
}

#[test]
fn test_completed_with_restart_makes_video_and_starts_new_job() {
    let harness = Harness::new(&[("RESTART", "true"), ("MIN_VIDEO", "0")]);
    let coordinator = &harness.engine.coordinator;
    coordinator.execute(ActionKind::Start, CONTROL);
    harness.printer.queue_layers(&[1, 2, 3]);
    for _ in 0..3 {
        harness.tick(PrinterStatus::Processing);
    }
    assert_eq!(harness.frame_count("Camera1"), 2);
    let first = harness.working_dir().unwrap();

    let outcome = coordinator.execute(ActionKind::Completed, RequestSource::Internal);

    assert!(outcome.contains("Video created"), "{outcome}");
    assert!(outcome.ends_with("New job started"), "{outcome}");
    let jobs = harness.encoder.jobs.lock().unwrap().clone();
    assert_eq!(jobs.len(), 1);
    // Two layer frames plus one final frame, unthrottled after completion.
    assert_eq!(jobs[0].0.frame_count, 3);
    assert!(!jobs[0].1);
    assert_eq!(harness.videos().len(), 1);
    assert!(first.exists());
    assert!(harness.working_dir().is_none());
    assert!(harness.engine.capture_task.is_armed());
    assert_eq!(harness.engine.lifeline.exit_reason(), None);
}

#[test]
fn test_terminate_without_restart_exits_gracefully() {
    let harness = Harness::new(&[]);
    let coordinator = &harness.engine.coordinator;
    coordinator.execute(ActionKind::Start, CONTROL);

    let outcome = coordinator.execute(ActionKind::Terminate, CONTROL);
    assert_eq!(outcome, "No frames were captured; no video created");
    assert_eq!(
        harness.engine.lifeline.exit_reason(),
        Some(ExitReason::Graceful)
    );

    let outcome = coordinator.execute(ActionKind::Start, CONTROL);
    assert!(outcome.starts_with("Terminating"), "{outcome}");
}

fn paused_capture_harness(extra: &[(&str, &str)]) -> Harness {
    let mut pairs = vec![("PAUSE", "yes"), ("MIN_VIDEO", "0")];
    pairs.extend_from_slice(extra);
    let harness = Harness::new(&pairs);
    harness.engine.coordinator.execute(ActionKind::Start, CONTROL);
    harness.printer.queue_layers(&[1, 2, 3]);
    harness.tick(PrinterStatus::Processing);
    harness.tick(PrinterStatus::Processing);
    harness
}

#[test]
fn test_terminate_leaves_the_printer_running() {
    let harness = paused_capture_harness(&[]);

    harness
        .engine
        .coordinator
        .execute(ActionKind::Terminate, CONTROL);

    let gcodes = harness.printer.gcodes();
    assert_eq!(gcodes.last().map(String::as_str), Some("M24"), "{gcodes:?}");
    let pauses = gcodes.iter().filter(|g| *g == "M25").count();
    let resumes = gcodes.iter().filter(|g| *g == "M24").count();
    assert_eq!(pauses, resumes);
    assert_eq!(
        harness.engine.lifeline.exit_reason(),
        Some(ExitReason::Graceful)
    );
}

#[test]
fn test_restart_into_standby_leaves_the_printer_running() {
    let harness = paused_capture_harness(&[("STANDBY", "true")]);

    let outcome = harness
        .engine
        .coordinator
        .execute(ActionKind::Restart, CONTROL);

    assert!(outcome.ends_with("New job standing by"), "{outcome}");
    assert!(!harness.engine.capture_task.is_armed());
    let gcodes = harness.printer.gcodes();
    assert_eq!(gcodes.last().map(String::as_str), Some("M24"), "{gcodes:?}");
    assert_eq!(harness.printer.status().unwrap().status, PrinterStatus::Processing);
}

#[test]
fn test_terminate_with_restart_begins_new_job() {
    let harness = Harness::new(&[("RESTART", "true"), ("STANDBY", "true")]);
    harness.printer.set_jobname("0:/gcodes/still-there.gcode");

    let outcome = harness
        .engine
        .coordinator
        .execute(ActionKind::Terminate, CONTROL);

    assert!(outcome.ends_with("New job standing by"), "{outcome}");
    assert_eq!(harness.engine.lifeline.exit_reason(), None);
    assert!(!harness.engine.lifeline.is_terminating());
    assert_eq!(harness.engine.session.action(), Some(ActionKind::Standby));
}

#[test]
fn test_queued_requests_run_one_at_a_time() {
    let harness = Harness::new(&[]);
    harness.engine.start().unwrap();

    let standby = harness
        .engine
        .actions
        .request(ActionKind::Standby, CONTROL)
        .unwrap();
    let restart = harness
        .engine
        .actions
        .request(ActionKind::Restart, CONTROL)
        .unwrap();
    standby.recv_timeout(Duration::from_secs(5)).unwrap();
    let outcome = restart.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(outcome.ends_with("New job started"), "{outcome}");

    let transitions = harness.engine.session.transitions();
    let kinds: Vec<ActionKind> = transitions.iter().map(|t| t.request).collect();
    assert_eq!(
        kinds,
        vec![ActionKind::Start, ActionKind::Standby, ActionKind::Restart]
    );
    for pair in transitions.windows(2) {
        assert!(pair[0].finished <= pair[1].started);
    }

    harness.engine.lifeline.exit(ExitReason::Forced);
}

#[test]
fn test_engine_rejects_contradicting_video_lengths() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = common::config_with(dir.path(), &[]);
    config.settings.video.min_video = 10.0;
    config.settings.video.max_video = 5.0;

    let built = Engine::new(
        &config,
        Collaborators {
            printer: Arc::new(FakePrinter::new()),
            camera: Arc::new(FakeCapture::new()),
            encoder: Arc::new(FakeEncoder::new()),
            census: Arc::new(FakeCensus::new(0)),
        },
    );

    assert!(matches!(built, Err(TimelapseError::Config(_))));
}
