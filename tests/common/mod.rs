// tests/common/mod.rs
//! Shared fixtures for the integration tests

#![allow(dead_code)]

use nerve_stim_core::config::constants::serial::DEFAULT_PORT;
use nerve_stim_core::config::{ExperimentConfig, SchedulerTiming};
use nerve_stim_core::experiment::{
    CalibrationRecord, DataSink, FaultReason, Phase, Presenter, SensationRecord, TrialInfo,
};
use nerve_stim_core::hal::{
    ChannelId, DeviceSession, SimulatedStimulator, SimulatorHandle,
};
use nerve_stim_core::stimulation::StimulationScheduler;
use nerve_stim_core::utils::MockTimeProvider;
use std::sync::Arc;

/// Everything the controller asked the presenter to show, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Shown {
    PhaseIntro(Phase),
    Countdown(u32),
    Stimulating(Vec<ChannelId>),
    IntensityPrompt(f64),
    CalibrationComplete(f64),
    SensationPrompt { overall_trial: u32, trials_in_block: usize },
    BlockEnd { block: u32, n_blocks: u32 },
    ExperimentEnd,
    Fault(String),
}

#[derive(Debug, Default)]
pub struct RecordingPresenter {
    pub shown: Vec<Shown>,
}

impl RecordingPresenter {
    pub fn countdowns(&self) -> Vec<u32> {
        self.shown
            .iter()
            .filter_map(|shown| match shown {
                Shown::Countdown(remaining) => Some(*remaining),
                _ => None,
            })
            .collect()
    }

    pub fn faults(&self) -> usize {
        self.shown
            .iter()
            .filter(|shown| matches!(shown, Shown::Fault(_)))
            .count()
    }
}

impl Presenter for RecordingPresenter {
    fn show_phase_intro(&mut self, phase: Phase) {
        self.shown.push(Shown::PhaseIntro(phase));
    }

    fn show_countdown(&mut self, remaining_s: u32) {
        self.shown.push(Shown::Countdown(remaining_s));
    }

    fn show_stimulating(&mut self, channels: &[ChannelId]) {
        self.shown.push(Shown::Stimulating(channels.to_vec()));
    }

    fn show_intensity_prompt(&mut self, amplitude_ma: f64) {
        self.shown.push(Shown::IntensityPrompt(amplitude_ma));
    }

    fn show_calibration_complete(&mut self, amplitude_ma: f64) {
        self.shown.push(Shown::CalibrationComplete(amplitude_ma));
    }

    fn show_sensation_prompt(&mut self, trial: &TrialInfo, trials_in_block: usize) {
        self.shown.push(Shown::SensationPrompt {
            overall_trial: trial.overall_trial,
            trials_in_block,
        });
    }

    fn show_block_end(&mut self, block: u32, n_blocks: u32) {
        self.shown.push(Shown::BlockEnd { block, n_blocks });
    }

    fn show_experiment_end(&mut self) {
        self.shown.push(Shown::ExperimentEnd);
    }

    fn show_fault(&mut self, reason: &FaultReason) {
        self.shown.push(Shown::Fault(reason.to_string()));
    }
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    pub calibration: Vec<CalibrationRecord>,
    pub sensations: Vec<SensationRecord>,
}

impl DataSink for RecordingSink {
    fn record_calibration(&mut self, record: &CalibrationRecord) {
        self.calibration.push(record.clone());
    }

    fn record_sensation(&mut self, record: &SensationRecord) {
        self.sensations.push(record.clone());
    }
}

/// Connected session on a simulator driven by a mock clock at t = 0
pub fn connected_session() -> (
    DeviceSession<SimulatedStimulator>,
    SimulatorHandle,
    Arc<MockTimeProvider>,
) {
    let clock = Arc::new(MockTimeProvider::new(0));
    let device = SimulatedStimulator::with_defaults(clock.clone());
    let handle = device.handle();
    let mut session = DeviceSession::new(device, clock.clone());
    session.connect(DEFAULT_PORT).expect("Failed to connect to simulator");
    handle.clear_log();
    (session, handle, clock)
}

pub fn scheduler() -> (
    StimulationScheduler<SimulatedStimulator>,
    SimulatorHandle,
    Arc<MockTimeProvider>,
) {
    let (session, handle, clock) = connected_session();
    (
        StimulationScheduler::new(session, SchedulerTiming::default()),
        handle,
        clock,
    )
}

/// Short experiment: 2 s stimulation, 2 s countdown, fixed seed
pub fn short_config() -> ExperimentConfig {
    let mut config = ExperimentConfig::default();
    config.stimulation.stim_duration_s = 2.0;
    config.experiment.countdown_s = 2;
    config.experiment.n_blocks = 2;
    config.experiment.n_trials_per_block = 2;
    config.experiment.seed = Some(11);
    config
}
