//! Layer Lapse - time-lapse capture for networked 3D printers.
//!
//! This library watches a printer over its HTTP API, decides per camera when
//! a frame should be taken, and assembles the frames into a video when the
//! print is done.
//!
//! # Core Components
//!
//! * [`printer`] - Printer API client for the legacy and session dialects
//! * [`connection`] - Retry accounting and reconnect probing
//! * [`trigger`] - Pure per-camera capture decision
//! * [`capture`] - The capture tick: pause, park, grab, count
//! * [`lifecycle`] - Waiting -> Capturing -> Completed
//! * [`coordinator`] - Serialized start/standby/pause/restart/terminate
//! * [`video`] - Admission-controlled video assembly
//! * [`main_loop`] - Status and capture scheduling
//! * [`operator`] - Printer-side operator messages
//! * [`control`] - HTTP control API
//! * [`config`] - Environment configuration and runtime settings
//! * [`error`] - Error types
//!
//! # Quick Start
//!
//! ```no_run
//! use layer_lapse::config::Config;
//! use layer_lapse::engine::{Collaborators, Engine};
//!
//! let config = Config::load()?;
//! let engine = Engine::new(&config, Collaborators::from_config(&config)?)?;
//! engine.supervisor.connect_initial(&config.printer_host)?;
//! engine.start()?;
//! let reason = engine.lifeline.wait();
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod camera;
pub mod capture;
pub mod command;
pub mod config;
pub mod connection;
pub mod control;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod main_loop;
pub mod operator;
pub mod printer;
pub mod session;
pub mod task;
pub mod trigger;
pub mod video;
pub mod workdir;

// Re-export commonly used types for convenience
pub use config::{Config, Settings};
pub use coordinator::{ActionCoordinator, ActionKind};
pub use engine::{Collaborators, Engine};
pub use error::TimelapseError;
pub use printer::{Printer, PrinterClient};
