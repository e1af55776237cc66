// src/experiment/collaborators.rs
//! Presentation and persistence seams of the phase controller

use crate::experiment::controller::{FaultReason, Phase};
use crate::experiment::records::{CalibrationRecord, SensationRecord};
use crate::experiment::sequencer::TrialInfo;
use crate::hal::types::ChannelId;
use tracing::{error, info};

/// Operator and participant facing display.
///
/// Answers come back through the controller's input methods.
pub trait Presenter {
    fn show_phase_intro(&mut self, phase: Phase);

    /// Seconds left before stimulation
    fn show_countdown(&mut self, remaining_s: u32);

    fn show_stimulating(&mut self, channels: &[ChannelId]);

    /// Ask for the perceived intensity of the last calibration stimulus
    fn show_intensity_prompt(&mut self, amplitude_ma: f64);

    fn show_calibration_complete(&mut self, amplitude_ma: f64);

    /// Ask for the sensations of `trial`
    fn show_sensation_prompt(&mut self, trial: &TrialInfo, trials_in_block: usize);

    fn show_block_end(&mut self, block: u32, n_blocks: u32);

    fn show_experiment_end(&mut self);

    fn show_fault(&mut self, reason: &FaultReason);
}

/// Persistence of participant records. Retrying failed writes is the
/// implementor's concern.
pub trait DataSink {
    fn record_calibration(&mut self, record: &CalibrationRecord);

    fn record_sensation(&mut self, record: &SensationRecord);
}

/// Presenter that only logs, for headless runs
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPresenter;

impl Presenter for TracingPresenter {
    fn show_phase_intro(&mut self, phase: Phase) {
        info!(?phase, "Phase ready, waiting for start");
    }

    fn show_countdown(&mut self, remaining_s: u32) {
        info!(remaining_s, "Stimulation starts in");
    }

    fn show_stimulating(&mut self, channels: &[ChannelId]) {
        info!(?channels, "Stimulating");
    }

    fn show_intensity_prompt(&mut self, amplitude_ma: f64) {
        info!(amplitude_ma, "How intense was the sensation?");
    }

    fn show_calibration_complete(&mut self, amplitude_ma: f64) {
        info!(amplitude_ma, "Calibration complete");
    }

    fn show_sensation_prompt(&mut self, trial: &TrialInfo, trials_in_block: usize) {
        info!(
            block = trial.block,
            trial = trial.trial_in_block,
            trials_in_block,
            "Describe the evoked sensations"
        );
    }

    fn show_block_end(&mut self, block: u32, n_blocks: u32) {
        info!(block, n_blocks, "Block finished");
    }

    fn show_experiment_end(&mut self) {
        info!("Experiment finished");
    }

    fn show_fault(&mut self, reason: &FaultReason) {
        error!(%reason, "Stimulation stopped");
    }
}

/// Sink writing every record as a JSON log line
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DataSink for TracingSink {
    fn record_calibration(&mut self, record: &CalibrationRecord) {
        match serde_json::to_string(record) {
            Ok(json) => info!(target: "participant_data", record = %json, "Calibration data"),
            Err(e) => error!(error = %e, "Failed to serialize calibration record"),
        }
    }

    fn record_sensation(&mut self, record: &SensationRecord) {
        match serde_json::to_string(record) {
            Ok(json) => info!(target: "participant_data", record = %json, "Sensation data"),
            Err(e) => error!(error = %e, "Failed to serialize sensation record"),
        }
    }
}
