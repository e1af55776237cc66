// src/experiment/controller.rs
//! Two-phase experiment state machine
//!
//! Calibration finds the amplitude at which the participant reports a very
//! strong sensation. The sensory phase then walks the trial plan at that
//! amplitude and collects the evoked sensations of every trial.
//!
//! Scheduler callbacks only post [`StimulationEvent`]s into a channel; the
//! controller reacts to them in [`PhaseController::poll`], on the control
//! thread.

use crate::config::ExperimentConfig;
use crate::error::{DeviceFault, ExperimentError, StimError, StimulatorError};
use crate::experiment::calibration::{adjust_amplitude, amplitude_range, CalibrationState, CalibrationStep};
use crate::experiment::collaborators::{DataSink, Presenter};
use crate::experiment::records::{
    CalibrationRecord, Intensity, ParticipantData, Sensation, SensationRecord,
};
use crate::experiment::sensory::{SensoryState, TrialOutcome};
use crate::experiment::sequencer::TrialSequencer;
use crate::hal::traits::StimulatorTransport;
use crate::hal::types::ChannelId;
use crate::stimulation::scheduler::StimulationScheduler;
use crate::stimulation::timer::TimerQueue;
use crate::utils::time::{current_timestamp_millis, duration_to_nanos, SharedClock};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};

/// Experiment phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Calibration,
    Sensory,
}

/// Why a stimulation was aborted
#[derive(Debug, Clone, PartialEq)]
pub enum FaultReason {
    /// The device flagged an error on a channel
    Device(DeviceFault),
    /// A command to the device failed
    Stimulator(StimulatorError),
}

impl fmt::Display for FaultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultReason::Device(fault) => write!(f, "{}", fault),
            FaultReason::Stimulator(e) => write!(f, "{}", e),
        }
    }
}

/// Controller state
#[derive(Debug, Clone, PartialEq)]
pub enum ExperimentState {
    Calibration(CalibrationState),
    Sensory(SensoryState),
    /// Stimulation aborted; only [`PhaseController::acknowledge_fault`] leaves it
    Faulted { phase: Phase, reason: FaultReason },
    Aborted,
}

impl ExperimentState {
    pub fn phase(&self) -> Option<Phase> {
        match self {
            ExperimentState::Calibration(_) => Some(Phase::Calibration),
            ExperimentState::Sensory(_) => Some(Phase::Sensory),
            ExperimentState::Faulted { phase, .. } => Some(*phase),
            ExperimentState::Aborted => None,
        }
    }

    pub fn is_stimulating(&self) -> bool {
        matches!(
            self,
            ExperimentState::Calibration(CalibrationState::Stimulating)
                | ExperimentState::Sensory(SensoryState::Stimulating)
        )
    }

    pub fn is_counting_down(&self) -> bool {
        matches!(
            self,
            ExperimentState::Calibration(CalibrationState::Countdown)
                | ExperimentState::Sensory(SensoryState::Countdown)
        )
    }
}

/// Scheduler callback delivered to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StimulationEvent {
    Terminated,
    Fault(ChannelId),
}

/// Drives calibration and the sensory phase
pub struct PhaseController<T, P, S>
where
    T: StimulatorTransport,
    P: Presenter,
    S: DataSink,
{
    scheduler: StimulationScheduler<T>,
    sequencer: TrialSequencer,
    config: ExperimentConfig,
    records: ParticipantData,
    presenter: P,
    sink: S,
    clock: SharedClock,
    state: ExperimentState,
    /// Payload: seconds remaining once the timer fires
    countdown: TimerQueue<u32>,
    events_tx: Sender<StimulationEvent>,
    events_rx: Receiver<StimulationEvent>,
    calibration_iteration: u32,
}

impl<T, P, S> PhaseController<T, P, S>
where
    T: StimulatorTransport,
    P: Presenter,
    S: DataSink,
{
    /// Take over a connected scheduler. Fails when `config` has a value
    /// outside its allowed range, before anything is shown or sent.
    pub fn new(
        scheduler: StimulationScheduler<T>,
        sequencer: TrialSequencer,
        config: ExperimentConfig,
        mut presenter: P,
        sink: S,
    ) -> Result<Self, StimError> {
        config.validate()?;
        let clock = scheduler.clock().clone();
        let (events_tx, events_rx) = unbounded();
        presenter.show_phase_intro(Phase::Calibration);
        Ok(Self {
            scheduler,
            sequencer,
            config,
            records: ParticipantData::new(),
            presenter,
            sink,
            clock,
            state: ExperimentState::Calibration(CalibrationState::AwaitStart),
            countdown: TimerQueue::new(),
            events_tx,
            events_rx,
            calibration_iteration: 0,
        })
    }

    /// Start button: begin the countdown of the next stimulation
    pub fn begin(&mut self) -> Result<(), StimError> {
        match self.state {
            ExperimentState::Calibration(CalibrationState::AwaitStart)
            | ExperimentState::Sensory(SensoryState::AwaitStart) => self.start_countdown(),
            _ => Err(self.unexpected("begin")),
        }
    }

    /// Calibration report for the last stimulus
    pub fn submit_intensity(&mut self, intensity: Intensity) -> Result<(), StimError> {
        if self.state != ExperimentState::Calibration(CalibrationState::AwaitIntensity) {
            return Err(self.unexpected("submit_intensity"));
        }

        self.calibration_iteration += 1;
        let amplitude_ma = self.config.stimulation.amplitude_ma;
        let record = CalibrationRecord {
            iteration: self.calibration_iteration,
            timestamp_ms: current_timestamp_millis(),
            amplitude_ma,
            intensity,
        };
        let record = self.records.push_calibration(record);
        self.sink.record_calibration(record);

        match adjust_amplitude(amplitude_ma, intensity, &amplitude_range()) {
            CalibrationStep::Complete { amplitude_ma } => {
                info!(amplitude_ma, "Calibration complete");
                self.state = ExperimentState::Calibration(CalibrationState::Complete);
                self.presenter.show_calibration_complete(amplitude_ma);
                Ok(())
            }
            CalibrationStep::Repeat { amplitude_ma, .. } => {
                self.config.stimulation.amplitude_ma = amplitude_ma;
                self.start_countdown()
            }
        }
    }

    /// Calibration report given by its label, e.g. `"Very weak"`
    pub fn submit_intensity_label(&mut self, label: &str) -> Result<(), StimError> {
        let intensity: Intensity = label.parse()?;
        self.submit_intensity(intensity)
    }

    pub fn continue_to_sensory(&mut self) -> Result<(), StimError> {
        if self.state != ExperimentState::Calibration(CalibrationState::Complete) {
            return Err(self.unexpected("continue_to_sensory"));
        }
        info!(
            amplitude_ma = self.config.stimulation.amplitude_ma,
            trials = self.sequencer.len(),
            "Sensory phase"
        );
        self.state = ExperimentState::Sensory(SensoryState::AwaitStart);
        self.presenter.show_phase_intro(Phase::Sensory);
        Ok(())
    }

    /// Sensations evoked by the current trial; may be empty
    pub fn submit_sensations(
        &mut self,
        sensations: Vec<Sensation>,
    ) -> Result<TrialOutcome, StimError> {
        if self.state != ExperimentState::Sensory(SensoryState::AwaitSensations) {
            return Err(self.unexpected("submit_sensations"));
        }
        for sensation in &sensations {
            sensation.validate()?;
        }

        let trial = self.sequencer.current().clone();
        let block = trial.block;
        let record = self.records.push_sensation(SensationRecord { trial, sensations });
        self.sink.record_sensation(record);

        let outcome = TrialOutcome::after_advance(block, self.sequencer.advance());
        match outcome {
            TrialOutcome::EndOfExperiment => {
                info!("End of experiment");
                self.state = ExperimentState::Sensory(SensoryState::Complete);
                self.presenter.show_experiment_end();
            }
            TrialOutcome::EndOfBlock { completed_block } => {
                info!(block = completed_block, "End of block");
                self.state = ExperimentState::Sensory(SensoryState::BlockEnd);
                self.presenter
                    .show_block_end(completed_block, self.sequencer.block_count());
            }
            TrialOutcome::NextTrial => self.start_countdown()?,
        }
        Ok(outcome)
    }

    pub fn continue_after_block(&mut self) -> Result<(), StimError> {
        if self.state != ExperimentState::Sensory(SensoryState::BlockEnd) {
            return Err(self.unexpected("continue_after_block"));
        }
        self.start_countdown()
    }

    /// Leave `Faulted` and wait for a restart of the same trial
    pub fn acknowledge_fault(&mut self) -> Result<(), StimError> {
        let ExperimentState::Faulted { phase, .. } = self.state else {
            return Err(self.unexpected("acknowledge_fault"));
        };
        self.state = match phase {
            Phase::Calibration => ExperimentState::Calibration(CalibrationState::AwaitStart),
            Phase::Sensory => ExperimentState::Sensory(SensoryState::AwaitStart),
        };
        info!(?phase, "Fault acknowledged");
        self.presenter.show_phase_intro(phase);
        Ok(())
    }

    /// Stop any stimulation and end the experiment
    pub fn abort(&mut self) -> Result<(), StimError> {
        if self.state == ExperimentState::Aborted {
            return Err(self.unexpected("abort"));
        }
        self.countdown.cancel_all();
        let stopped = self.scheduler.stop();
        self.discard_events();
        self.state = ExperimentState::Aborted;
        warn!("Experiment aborted");
        self.presenter.show_experiment_end();
        stopped?;
        Ok(())
    }

    /// Fire due scheduler and countdown timers and react to stimulation events
    pub fn poll(&mut self) -> Result<(), StimError> {
        let scheduled = self.scheduler.poll();
        self.drain_events();
        if let Err(e) = scheduled {
            if !matches!(self.state, ExperimentState::Faulted { .. }) {
                self.enter_fault(FaultReason::Stimulator(e.clone()));
            }
            return Err(e.into());
        }

        while let Some((_, remaining)) = self.countdown.pop_due(self.clock.now_nanos()) {
            if !self.state.is_counting_down() {
                continue;
            }
            if remaining > 0 {
                self.tick_countdown(remaining);
            } else {
                self.stimulate()?;
            }
        }
        Ok(())
    }

    /// Earliest armed timer of the scheduler or the countdown
    pub fn next_deadline(&self) -> Option<u64> {
        match (self.scheduler.next_deadline(), self.countdown.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn state(&self) -> &ExperimentState {
        &self.state
    }

    pub fn records(&self) -> &ParticipantData {
        &self.records
    }

    pub fn sequencer(&self) -> &TrialSequencer {
        &self.sequencer
    }

    pub fn scheduler(&self) -> &StimulationScheduler<T> {
        &self.scheduler
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Current, possibly calibrated, amplitude
    pub fn amplitude_ma(&self) -> f64 {
        self.config.stimulation.amplitude_ma
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn start_countdown(&mut self) -> Result<(), StimError> {
        self.state = match self.state.phase() {
            Some(Phase::Calibration) => ExperimentState::Calibration(CalibrationState::Countdown),
            _ => ExperimentState::Sensory(SensoryState::Countdown),
        };
        let seconds = self.config.experiment.countdown_s;
        if seconds == 0 {
            return self.stimulate();
        }
        self.tick_countdown(seconds);
        Ok(())
    }

    fn tick_countdown(&mut self, remaining: u32) {
        self.presenter.show_countdown(remaining);
        let deadline = self.clock.now_nanos() + duration_to_nanos(Duration::from_secs(1));
        self.countdown.schedule_at(deadline, remaining - 1);
    }

    fn stimulate(&mut self) -> Result<(), StimError> {
        let phase = self.state.phase().unwrap_or(Phase::Calibration);
        let channels = match phase {
            Phase::Calibration => match self.config.stimulation.calibration_channel() {
                Ok(channel) => vec![channel],
                Err(e) => return Err(self.start_failed(StimulatorError::InvalidPulse(e))),
            },
            Phase::Sensory => self.sequencer.current().channels.clone(),
        };

        if let Err(e) = self.configure(&channels) {
            return Err(self.start_failed(e));
        }

        let duration = match self.config.stimulation.stim_duration() {
            Ok(duration) => duration,
            Err(e) => {
                return Err(self.start_failed(StimulatorError::InvalidDuration(e.to_string())))
            }
        };

        let terminated = self.events_tx.clone();
        let faulted = self.events_tx.clone();
        let started = self.scheduler.start(
            duration,
            move || {
                let _ = terminated.send(StimulationEvent::Terminated);
            },
            move |channel| {
                let _ = faulted.send(StimulationEvent::Fault(channel));
            },
        );
        if let Err(e) = started {
            return Err(self.start_failed(e));
        }

        self.state = match phase {
            Phase::Calibration => ExperimentState::Calibration(CalibrationState::Stimulating),
            Phase::Sensory => ExperimentState::Sensory(SensoryState::Stimulating),
        };
        self.presenter.show_stimulating(&channels);
        Ok(())
    }

    fn configure(&mut self, channels: &[ChannelId]) -> Result<(), StimulatorError> {
        self.scheduler.clear_pulses()?;
        for channel in channels {
            let pulse = self.config.stimulation.pulse_for(*channel)?;
            self.scheduler.configure_pulse(&pulse)?;
        }
        Ok(())
    }

    fn start_failed(&mut self, e: StimulatorError) -> StimError {
        self.enter_fault(FaultReason::Stimulator(e.clone()));
        e.into()
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                StimulationEvent::Terminated if self.state.is_stimulating() => {
                    self.on_stimulation_complete();
                }
                StimulationEvent::Fault(channel) if self.state.is_stimulating() => {
                    self.enter_fault(FaultReason::Device(DeviceFault { channel }));
                }
                StimulationEvent::Fault(channel) => {
                    error!(channel = %channel, "Further channel error reported");
                }
                StimulationEvent::Terminated => {}
            }
        }
    }

    fn discard_events(&mut self) {
        while self.events_rx.try_recv().is_ok() {}
    }

    fn on_stimulation_complete(&mut self) {
        match self.state.phase() {
            Some(Phase::Calibration) => {
                self.state = ExperimentState::Calibration(CalibrationState::AwaitIntensity);
                self.presenter
                    .show_intensity_prompt(self.config.stimulation.amplitude_ma);
            }
            Some(Phase::Sensory) => {
                self.state = ExperimentState::Sensory(SensoryState::AwaitSensations);
                let trials_in_block = self.sequencer.trials_in_current_block();
                self.presenter
                    .show_sensation_prompt(self.sequencer.current(), trials_in_block);
            }
            None => {}
        }
    }

    /// Stop stimulation, surface the fault and wait for acknowledgement
    fn enter_fault(&mut self, reason: FaultReason) {
        let phase = self.state.phase().unwrap_or(Phase::Calibration);
        self.countdown.cancel_all();
        if let Err(e) = self.scheduler.stop() {
            error!(error = %e, "Failed to stop stimulation after fault");
        }
        error!(?phase, %reason, "Stimulation aborted");
        self.presenter.show_fault(&reason);
        self.state = ExperimentState::Faulted { phase, reason };
    }

    fn unexpected(&self, input: &'static str) -> StimError {
        ExperimentError::UnexpectedInput {
            input,
            state: format!("{:?}", self.state),
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::constants::serial::DEFAULT_PORT;
    use crate::experiment::collaborators::{TracingPresenter, TracingSink};
    use crate::experiment::sequencer::{ChannelElectrodeMap, ChannelSelection};
    use crate::hal::session::DeviceSession;
    use crate::hal::simulator::{SimulatedStimulator, SimulatorHandle};
    use crate::utils::time::{MockTimeProvider, TimeProvider};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    type Controller = PhaseController<SimulatedStimulator, TracingPresenter, TracingSink>;

    fn controller() -> (Controller, SimulatorHandle, Arc<MockTimeProvider>) {
        let clock = Arc::new(MockTimeProvider::new(0));
        let sim = SimulatedStimulator::with_defaults(clock.clone());
        let handle = sim.handle();
        let mut session = DeviceSession::new(sim, clock.clone());
        session.connect(DEFAULT_PORT).unwrap();

        let mut config = ExperimentConfig::default();
        config.stimulation.stim_duration_s = 2.0;
        config.experiment.countdown_s = 2;
        let scheduler = StimulationScheduler::new(session, config.timing.clone());
        let sequencer = TrialSequencer::generate(
            2,
            2,
            &ChannelElectrodeMap::builtin(),
            &ChannelSelection::default(),
            &mut StdRng::seed_from_u64(3),
        )
        .unwrap();
        let controller = PhaseController::new(
            scheduler,
            sequencer,
            config,
            TracingPresenter,
            TracingSink,
        )
        .unwrap();
        (controller, handle, clock)
    }

    fn run_countdown(controller: &mut Controller, clock: &MockTimeProvider) {
        while controller.state().is_counting_down() {
            let deadline = controller.next_deadline().unwrap();
            clock.set_time(deadline);
            controller.poll().unwrap();
        }
    }

    fn run_until_idle(controller: &mut Controller, clock: &MockTimeProvider) {
        while let Some(deadline) = controller.next_deadline() {
            clock.set_time(deadline.max(clock.now_nanos()));
            controller.poll().unwrap();
        }
    }

    #[test]
    fn test_wrong_input_is_rejected() {
        let (mut controller, _, _) = controller();
        assert!(matches!(
            controller.submit_intensity(Intensity::Weak),
            Err(StimError::Experiment(ExperimentError::UnexpectedInput { .. }))
        ));
        assert!(controller.continue_after_block().is_err());
        assert_eq!(
            controller.state(),
            &ExperimentState::Calibration(CalibrationState::AwaitStart)
        );
    }

    #[test]
    fn test_countdown_then_stimulation() {
        let (mut controller, _, clock) = controller();
        controller.begin().unwrap();
        assert_eq!(
            controller.state(),
            &ExperimentState::Calibration(CalibrationState::Countdown)
        );
        assert_eq!(controller.next_deadline(), Some(1_000_000_000));

        run_countdown(&mut controller, &clock);
        assert_eq!(clock.now_nanos(), 2_000_000_000);
        assert_eq!(
            controller.state(),
            &ExperimentState::Calibration(CalibrationState::Stimulating)
        );

        run_until_idle(&mut controller, &clock);
        assert_eq!(
            controller.state(),
            &ExperimentState::Calibration(CalibrationState::AwaitIntensity)
        );
    }

    #[test]
    fn test_calibration_adjusts_amplitude() {
        let (mut controller, _, clock) = controller();
        controller.begin().unwrap();
        run_until_idle(&mut controller, &clock);

        controller.submit_intensity_label("Weak").unwrap();
        assert_eq!(controller.amplitude_ma(), 3.5);
        run_until_idle(&mut controller, &clock);

        controller.submit_intensity(Intensity::VeryStrong).unwrap();
        assert_eq!(
            controller.state(),
            &ExperimentState::Calibration(CalibrationState::Complete)
        );
        let records = controller.records().calibration();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].amplitude_ma, 2.0);
        assert_eq!(records[1].amplitude_ma, 3.5);
    }

    #[test]
    fn test_device_fault_and_acknowledge() {
        let (mut controller, handle, clock) = controller();
        handle.inject_fault(ChannelId::new(1).unwrap());
        controller.begin().unwrap();
        run_until_idle(&mut controller, &clock);

        assert!(matches!(
            controller.state(),
            ExperimentState::Faulted {
                phase: Phase::Calibration,
                reason: FaultReason::Device(_)
            }
        ));
        assert!(!handle.is_stimulating());
        assert!(controller.begin().is_err());

        handle.clear_faults();
        controller.acknowledge_fault().unwrap();
        assert_eq!(
            controller.state(),
            &ExperimentState::Calibration(CalibrationState::AwaitStart)
        );
    }

    #[test]
    fn test_abort_stops_stimulation() {
        let (mut controller, handle, clock) = controller();
        controller.begin().unwrap();
        run_countdown(&mut controller, &clock);
        assert!(handle.is_stimulating());

        controller.abort().unwrap();
        assert_eq!(controller.state(), &ExperimentState::Aborted);
        assert!(!handle.is_stimulating());
        assert_eq!(controller.next_deadline(), None);
        assert!(controller.abort().is_err());
    }
}
