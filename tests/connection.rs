mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use common::{FakePrinter, fast_timings};
use layer_lapse::config::Timings;
use layer_lapse::connection::{ConnectionState, ConnectionSupervisor};
use layer_lapse::coordinator::{ActionKind, ActionQueue, RequestSource};
use layer_lapse::error::PrinterError;
use layer_lapse::printer::{Dialect, Printer};
use layer_lapse::task::Lifeline;

#[test]
fn test_third_failure_hands_over_to_reconnect() {
    let printer = Arc::new(FakePrinter::new());
    let (actions, requests) = ActionQueue::channel();
    let supervisor =
        ConnectionSupervisor::new(printer.clone(), actions, Lifeline::new(), fast_timings());

    assert_eq!(supervisor.query("layer", |p| p.layer()), Some(-1));

    printer.offline.store(true, Ordering::SeqCst);
    assert_eq!(supervisor.query("layer", |p| p.layer()), None);
    assert_eq!(supervisor.state(), ConnectionState::Reconnecting);
    assert!(!supervisor.is_connected());

    let request = requests.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(request.kind, ActionKind::WaitForConnection);
    assert_eq!(request.source, RequestSource::Internal);

    // Further queries are bypassed and do not queue another request.
    assert_eq!(supervisor.query("status", |p| p.status()), None);
    assert!(requests.try_recv().is_err());
}

#[test]
fn test_recovery_within_budget_stays_connected() {
    let printer = Arc::new(FakePrinter::new());
    let (actions, requests) = ActionQueue::channel();
    let supervisor =
        ConnectionSupervisor::new(printer.clone(), actions, Lifeline::new(), fast_timings());

    let calls = std::sync::atomic::AtomicUsize::new(0);
    let layer = supervisor.query("layer", |p| {
        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(PrinterError::disconnected("blip"))
        } else {
            p.layer()
        }
    });
    assert_eq!(layer, Some(-1));
    assert_eq!(supervisor.state(), ConnectionState::Connected);
    assert!(requests.try_recv().is_err());
}

#[test]
fn test_api_errors_do_not_count_as_disconnects() {
    let printer = Arc::new(FakePrinter::new());
    let (actions, requests) = ActionQueue::channel();
    let supervisor =
        ConnectionSupervisor::new(printer, actions, Lifeline::new(), fast_timings());

    for _ in 0..5 {
        let answer: Option<i64> = supervisor.query("layer", |_| {
            Err(PrinterError::Malformed {
                endpoint: "/rr_model".to_string(),
                reason: "no layer".to_string(),
            })
        });
        assert_eq!(answer, None);
    }
    let answer: Option<i64> = supervisor.query("status", |_| {
        Err(PrinterError::Http {
            endpoint: "/rr_model".to_string(),
            status: 500,
        })
    });
    assert_eq!(answer, None);

    assert_eq!(supervisor.state(), ConnectionState::Connected);
    assert!(requests.try_recv().is_err());
}

#[test]
fn test_probe_submits_reconnected_once_printer_answers() {
    let printer = Arc::new(FakePrinter::new());
    printer.offline.store(true, Ordering::SeqCst);
    let (actions, requests) = ActionQueue::channel();
    let supervisor = Arc::new(ConnectionSupervisor::new(
        printer.clone(),
        actions,
        Lifeline::new(),
        fast_timings(),
    ));

    supervisor.spawn_probe().unwrap();
    // A second request while probing is a no-op.
    supervisor.spawn_probe().unwrap();
    std::thread::sleep(Duration::from_millis(60));
    assert!(!supervisor.is_connected());

    printer.offline.store(false, Ordering::SeqCst);
    let request = requests.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(request.kind, ActionKind::Reconnected);
    assert!(supervisor.is_connected());
    assert_eq!(printer.logins.load(Ordering::SeqCst), 1);
    assert!(requests.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn test_reconnect_attempts_slow_down_after_quick_phase() {
    let printer = Arc::new(FakePrinter::new());
    printer.offline.store(true, Ordering::SeqCst);
    let (actions, requests) = ActionQueue::channel();
    let timings = Timings {
        status_interval: Duration::from_millis(10),
        quick_probes: 2,
        slow_probe: Duration::from_millis(150),
        ..fast_timings()
    };
    let supervisor = Arc::new(ConnectionSupervisor::new(
        printer.clone(),
        actions,
        Lifeline::new(),
        timings,
    ));

    supervisor.spawn_probe().unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while printer.login_attempts.lock().unwrap().len() < 5 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    let attempts = printer.login_attempts.lock().unwrap().clone();
    assert!(attempts.len() >= 5, "only {} login attempts", attempts.len());
    let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
    assert!(gaps[0] < Duration::from_millis(120), "{gaps:?}");
    assert!(gaps[1] < Duration::from_millis(120), "{gaps:?}");
    assert!(gaps[2] >= Duration::from_millis(150), "{gaps:?}");
    assert!(gaps[3] >= Duration::from_millis(150), "{gaps:?}");
    assert!(requests.try_recv().is_err());

    printer.offline.store(false, Ordering::SeqCst);
    let request = requests.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(request.kind, ActionKind::Reconnected);
    assert_eq!(printer.logins.load(Ordering::SeqCst), 1);
    assert!(supervisor.is_connected());
}

#[test]
fn test_probe_stops_when_process_exits() {
    let printer = Arc::new(FakePrinter::new());
    printer.offline.store(true, Ordering::SeqCst);
    let (actions, _requests) = ActionQueue::channel();
    let lifeline = Lifeline::new();
    let supervisor =
        ConnectionSupervisor::new(printer, actions, lifeline.clone(), fast_timings());

    lifeline.begin_terminating();
    assert_eq!(supervisor.probe_until_connected(), None);
}

#[test]
fn test_initial_connection_checks_firmware() {
    let printer = Arc::new(FakePrinter::new());
    let (actions, _requests) = ActionQueue::channel();
    let supervisor =
        ConnectionSupervisor::new(printer.clone(), actions, Lifeline::new(), fast_timings());

    assert_eq!(
        supervisor.connect_initial("printer.local").unwrap(),
        Dialect::Legacy
    );
    assert!(supervisor.is_connected());
    assert_eq!(printer.firmware_version().unwrap(), "3.5.1");
}
