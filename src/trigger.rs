use std::fmt;
use std::time::Duration;

use crate::config::{CaptureSettings, DetectMode, PauseMode};
use crate::printer::PrinterStatus;

/// Why a frame is being captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureReason {
    /// The layer changed onto a multiple of `num_layers`.
    Layer,
    /// The print G-code paused the printer.
    Pause,
    /// The elapsed-time threshold passed.
    Time,
    /// Last frame before a video is assembled.
    FinalFrame,
}

impl fmt::Display for CaptureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CaptureReason::Layer => "Layer",
            CaptureReason::Pause => "Pause",
            CaptureReason::Time => "Time",
            CaptureReason::FinalFrame => "Finalframe",
        })
    }
}

/// Everything one camera's capture decision depends on.
#[derive(Debug, Clone)]
pub struct TriggerInput<'a> {
    /// Current layer, `-1` when unknown.
    pub layer: i64,
    /// Layer seen by this camera on its previous tick; `None` before the first.
    pub previous_layer: Option<i64>,
    pub status: &'a PrinterStatus,
    /// Time since this camera's last successful photo.
    pub elapsed: Duration,
    pub settings: &'a CaptureSettings,
    /// Ask for one frame even if no event fired.
    pub final_frame: bool,
}

/// Decide which captures fire for one camera this tick.
///
/// With pause control on, nothing fires before the first layer completes.
/// Otherwise a layer change onto a multiple of `num_layers`, a G-code pause,
/// or a final-frame request produce one capture, and the elapsed-time rule
/// can add a second capture independently unless `single_capture_per_tick`
/// is set. The first layer reading only establishes the baseline.
pub fn evaluate(input: &TriggerInput<'_>) -> Vec<CaptureReason> {
    let settings = input.settings;
    let zn = input.layer;
    let mut reasons = Vec::with_capacity(2);

    if settings.pause == PauseMode::Yes && zn < 1 {
        return reasons;
    }

    let layer_changed = input.previous_layer.is_some_and(|zo| zo != zn);
    if settings.detect == DetectMode::Layer && zn % settings.num_layers == 0 && layer_changed {
        reasons.push(CaptureReason::Layer);
    } else if settings.detect == DetectMode::Pause && *input.status == PrinterStatus::Paused {
        reasons.push(CaptureReason::Pause);
    } else if input.final_frame {
        reasons.push(CaptureReason::FinalFrame);
    }

    let time_due = settings.seconds > 0
        && input.elapsed > Duration::from_secs(settings.seconds)
        && (settings.dont_wait || settings.detect == DetectMode::None || zn >= 1);
    if time_due && !(settings.single_capture_per_tick && !reasons.is_empty()) {
        reasons.push(CaptureReason::Time);
    }
    reasons
}
