use std::net::SocketAddr;
use std::process;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, PoisonError};

use log::{error, info, warn};

use layer_lapse::config::Config;
use layer_lapse::control::run_control_server;
use layer_lapse::coordinator::{ActionKind, RequestSource};
use layer_lapse::engine::{Collaborators, Engine};
use layer_lapse::error::PrinterError;
use layer_lapse::task::ExitReason;

const EXIT_FATAL: i32 = 1;
const EXIT_CONFIG: i32 = 2;
const EXIT_FIRMWARE: i32 = 5;

/// Layer Lapse - time-lapse capture for networked 3D printers.
///
/// Watches the printer's HTTP API, grabs a frame per camera on layer
/// changes, pauses or elapsed time, and turns the frames into a video when
/// the print finishes.
///
/// # Environment Variables
///
/// Required:
/// * `PRINTER_HOST` - Printer address, e.g. `192.168.1.20`
///
/// Optional (with defaults):
/// * `PRINTER_PASSWORD` - Printer password (default: "")
/// * `BASE_DIR` - Output root (default: "./timelapse")
/// * `DETECT` - layer, pause or none (default: "layer")
/// * `CAPTURE_SECONDS` - Time-based capture threshold (default: "0", off)
/// * `CAMERA1` - usb, pi, stream, web or other (default: "usb")
/// * `CONTROL_PORT` - Serve the control API on this port (default: off)
/// * `VERBOSE` - Debug logging (default: "false")
///
/// See [`Config::load`] for the full list.
///
/// # Usage
///
/// ```bash
/// export PRINTER_HOST="192.168.1.20"
/// export DETECT="layer"
/// export CONTROL_PORT="8082"
/// ./layer-lapse
/// ```
fn main() {
    // Initialize logger to output to stdout, using RUST_LOG env var or info level by default
    let default_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|level| level.parse().ok())
        .unwrap_or(log::LevelFilter::Info);
    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Stdout)
        .filter_level(default_level.max(log::LevelFilter::Debug))
        .init();
    log::set_max_level(default_level);

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(EXIT_CONFIG);
        }
    };
    if config.settings.verbose {
        log::set_max_level(log::LevelFilter::Debug);
    }

    info!("Layer Lapse starting...");
    info!("Printer: {}", config.printer_host);
    for camera in &config.cameras {
        info!("{}: {:?}", camera.name, camera.kind);
    }

    let parts = match Collaborators::from_config(&config) {
        Ok(parts) => parts,
        Err(e) => {
            error!("Failed to initialize: {:#}", e);
            process::exit(EXIT_FATAL);
        }
    };
    let engine = match Engine::new(&config, parts) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to prepare the output directory: {}", e);
            process::exit(EXIT_FATAL);
        }
    };

    let started = Arc::new(AtomicBool::new(false));
    install_interrupt_handler(&engine, Arc::clone(&started));

    match engine.supervisor.connect_initial(&config.printer_host) {
        Ok(_) => {}
        Err(PrinterError::UnsupportedFirmware { version }) => {
            error!("Firmware version {} is not supported; 3 or later is required", version);
            process::exit(EXIT_FIRMWARE);
        }
        Err(e) => {
            let reason = engine.lifeline.exit_reason();
            if let Some(reason) = reason {
                info!("Stopped before connecting");
                process::exit(reason.code());
            }
            error!("Could not connect to the printer: {}", e);
            process::exit(EXIT_FATAL);
        }
    }

    if let Err(e) = engine.start() {
        error!("Failed to start: {}", e);
        process::exit(EXIT_FATAL);
    }
    started.store(true, Ordering::SeqCst);

    if let Some(port) = config.control_port {
        match format!("{}:{}", config.control_host, port).parse::<SocketAddr>() {
            Ok(addr) => {
                if let Err(e) = run_control_server(addr, engine.control_state()) {
                    warn!("Control API not started: {}", e);
                }
            }
            Err(e) => warn!("Control API address is invalid: {}", e),
        }
    }

    let reason = engine.lifeline.wait();
    info!("Exiting ({:?})", reason);
    process::exit(reason.code());
}

/// First interrupt: terminate gracefully, making the video. Second: exit now.
fn install_interrupt_handler(engine: &Engine, started: Arc<AtomicBool>) {
    let presses = AtomicU32::new(0);
    let lifeline = Arc::clone(&engine.lifeline);
    let actions = engine.actions.clone();
    let settings = engine.settings.clone();

    let installed = ctrlc::set_handler(move || {
        if presses.fetch_add(1, Ordering::SeqCst) > 0 || !started.load(Ordering::SeqCst) {
            warn!("Interrupted; exiting without a video");
            lifeline.exit(ExitReason::Forced);
            return;
        }
        info!("Interrupted; finishing gracefully (press again to force)");
        settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .restart = false;
        actions.submit(ActionKind::Terminate, RequestSource::Internal);
    });
    if let Err(e) = installed {
        warn!("Could not install the interrupt handler: {}", e);
    }
}
