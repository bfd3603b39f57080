//! Error types for the time-lapse engine.
//!
//! Each concern gets its own enum so callers can match on the failures they
//! know how to recover from. [`TimelapseError`] wraps the ones that can
//! stop the engine from being built.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for time-lapse operations.
#[derive(Debug, Error)]
pub enum TimelapseError {
    /// Configuration and setup errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Working directory housekeeping failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors specific to the printer HTTP API.
///
/// [`PrinterError::Disconnected`] is the sentinel callers use for uniform
/// recovery: every network-level failure collapses into it once the retry
/// budget is spent.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PrinterError {
    /// The printer did not answer within the retry budget.
    #[error("printer is disconnected ({reason})")]
    Disconnected { reason: String },

    /// The printer answered with a non-success status we do not recover from.
    #[error("printer API error at '{endpoint}' (HTTP {status})")]
    Http { endpoint: String, status: u16 },

    /// The session expired and logging in again did not help.
    #[error("printer rejected the session and re-login failed")]
    Unauthorized,

    /// The configured password was rejected.
    #[error("printer password is invalid")]
    InvalidPassword,

    /// The printer has no free sessions.
    #[error("printer has no more sessions available")]
    NoSessionsAvailable,

    /// The response body did not have the expected shape.
    #[error("unexpected response from '{endpoint}': {reason}")]
    Malformed { endpoint: String, reason: String },

    /// Firmware older than major version 3.
    #[error("printer firmware '{version}' is not supported, version 3 or above is required")]
    UnsupportedFirmware { version: String },
}

impl PrinterError {
    /// Build the disconnected sentinel from any displayable cause.
    pub fn disconnected(reason: impl ToString) -> Self {
        PrinterError::Disconnected {
            reason: reason.to_string(),
        }
    }

    /// Whether this error should be handled by the reconnect machinery.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, PrinterError::Disconnected { .. })
    }
}

/// An external tool could not be run to completion.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The program could not be started.
    #[error("failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program exited unsuccessfully.
    #[error("'{program}' exited with {status}")]
    Failed { program: String, status: String },
}

/// Errors from a single frame grab.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The external grabber failed.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// The still-image URL could not be fetched.
    #[error("failed to download frame from '{url}': {reason}")]
    Download { url: String, reason: String },

    /// The grabber reported success but left no frame behind.
    #[error("no frame was written to {}", .path.display())]
    MissingFrame { path: PathBuf },

    /// Writing the frame failed.
    #[error("failed to write frame: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from video assembly.
#[derive(Debug, Error)]
pub enum VideoError {
    /// The requested directory does not exist or cannot be read.
    #[error("no permission or directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    /// No camera frames were found in the directory.
    #[error("cannot create a video, are there any images captured?")]
    NoFrames,

    /// Output would be shorter than the configured minimum.
    #[error(
        "{camera}: cannot create video shorter than {minimum} second(s), length would have been {length:.2} second(s)"
    )]
    TooShort {
        camera: String,
        minimum: f64,
        length: f64,
    },

    /// The encoder could not be started or failed.
    #[error("there was a problem creating the video for {camera}: {reason}")]
    EncoderFailed { camera: String, reason: String },

    /// Filesystem work around the encoder failed.
    #[error("video I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to configuration and application setup.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("required environment variable '{var_name}' is not set")]
    MissingEnvVar { var_name: String },

    /// A value could not be parsed.
    #[error("invalid value '{value}' for '{field}': {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// Two settings cannot be used together.
    #[error("invalid combination: {0}")]
    InvalidCombination(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, value: &str, reason: impl ToString) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}
