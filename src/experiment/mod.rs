//! Calibration and sensory-response experiment on top of the stimulation scheduler

pub mod calibration;
pub mod collaborators;
pub mod controller;
pub mod records;
pub mod sensory;
pub mod sequencer;

pub use calibration::{adjust_amplitude, CalibrationState, CalibrationStep};
pub use collaborators::{DataSink, Presenter, TracingPresenter, TracingSink};
pub use controller::{ExperimentState, FaultReason, Phase, PhaseController, StimulationEvent};
pub use records::{
    BodyLocation, CalibrationRecord, Intensity, ParticipantData, Sensation, SensationRecord,
    SensationType,
};
pub use sensory::{SensoryState, TrialOutcome};
pub use sequencer::{ChannelElectrodeMap, ChannelSelection, TrialInfo, TrialSequencer};
