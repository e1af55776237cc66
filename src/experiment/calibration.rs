// src/experiment/calibration.rs
//! Amplitude calibration: raise the amplitude until the participant reports
//! a very strong sensation.

use crate::config::constants::parameters::AMPLITUDE_RANGE_MA;
use crate::experiment::records::Intensity;
use crate::utils::validation::ParameterRange;
use tracing::info;

/// Calibration sub-states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationState {
    AwaitStart,
    Countdown,
    Stimulating,
    AwaitIntensity,
    Complete,
}

/// Amplitude bound reached by an adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmplitudeBound {
    Minimum,
    Maximum,
}

/// Result of one intensity report
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationStep {
    /// Stimulate again at `amplitude_ma`
    Repeat {
        amplitude_ma: f64,
        saturated: Option<AmplitudeBound>,
    },
    Complete { amplitude_ma: f64 },
}

/// Amplitudes the calibration may reach
pub fn amplitude_range() -> ParameterRange<f64> {
    ParameterRange::new(
        "stimulation.amplitude_ma",
        AMPLITUDE_RANGE_MA.0,
        AMPLITUDE_RANGE_MA.1,
    )
}

/// Apply the step of `intensity` to `current_ma`, clamped to `range`.
///
/// A report that keeps the amplitude at a bound repeats at that bound.
pub fn adjust_amplitude(
    current_ma: f64,
    intensity: Intensity,
    range: &ParameterRange<f64>,
) -> CalibrationStep {
    if intensity.is_target() {
        return CalibrationStep::Complete {
            amplitude_ma: current_ma,
        };
    }

    let step = intensity.amplitude_step_ma();
    let amplitude_ma = (current_ma + step).clamp(range.min, range.max);
    let saturated = if amplitude_ma <= range.min {
        Some(AmplitudeBound::Minimum)
    } else if amplitude_ma >= range.max {
        Some(AmplitudeBound::Maximum)
    } else {
        None
    };

    match saturated {
        Some(bound) => info!(?bound, amplitude_ma, "Amplitude has reached its bound"),
        None => info!(step_ma = step, amplitude_ma, "Adjusting amplitude"),
    }
    CalibrationStep::Repeat {
        amplitude_ma,
        saturated,
    }
}
