// src/error.rs
//! Error handling for the stimulation core
//!
//! Errors are split by the layer that raises them:
//!
//! - [`SerialPortError`]: opening, handshaking with and closing the device port.
//!   Fatal to the current session and never retried automatically.
//! - [`StimulatorError`]: mid-level protocol commands. Keep-alive failures are
//!   logged by the scheduler and the loop continues; a failed stop is escalated.
//! - [`DeviceFault`]: a per-channel error flag reported by the device. Always
//!   aborts the active stimulation.
//! - [`ConfigError`], [`SequenceError`], [`ExperimentError`]: configuration,
//!   trial-plan and phase-controller input errors.
//!
//! [`StimError`] unifies all of them for callers that drive a whole experiment.

use crate::hal::types::{ChannelId, CommandKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used by the experiment-level API
pub type StimResult<T> = Result<T, StimError>;

/// Errors raised by a [`StimulatorTransport`](crate::hal::StimulatorTransport) implementation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Port not found: {0}")]
    PortNotFound(String),
    #[error("Failed to open port: {0}")]
    OpenFailed(String),
    #[error("Transport is not connected")]
    NotConnected,
    #[error("Write failed: {0}")]
    WriteFailed(String),
    #[error("Failed to release port: {0}")]
    CloseFailed(String),
}

/// Serial port and handshake errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerialPortError {
    #[error("Serial port {port} is not available")]
    PortUnavailable { port: String },
    #[error("Failed to open the serial port {port}: {reason}")]
    PortOpenFailed { port: String, reason: String },
    #[error("Serial port {port} is already open")]
    AlreadyOpen { port: String },
    #[error("No serial port is open")]
    NotOpen,
    #[error("Timeout waiting for device response. It took more than {waited_ms} ms")]
    Timeout { waited_ms: u64 },
    #[error("Handshake failed: {reason}")]
    HandshakeFailed { reason: String },
    #[error("Failed to close the serial port: {reason}")]
    CloseFailed { reason: String },
}

/// Pulse parameter validation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PulseError {
    #[error("Invalid channel {0}: channels are numbered 1-8")]
    InvalidChannel(u8),
    #[error("Amplitude {amplitude_ma} mA is outside the safe range [{min_ma}, {max_ma}] mA")]
    AmplitudeOutOfRange {
        amplitude_ma: f64,
        min_ma: f64,
        max_ma: f64,
    },
    #[error("Phase duration must be at least 1 µs")]
    ZeroPhaseDuration,
    #[error("Period {period_ms} ms is shorter than the pulse ({required_ms} ms)")]
    PeriodTooShort { period_ms: f64, required_ms: f64 },
    #[error("{field} is not a finite number")]
    NonFinite { field: &'static str },
}

/// Mid-level stimulation protocol errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StimulatorError {
    #[error("Device did not acknowledge {command:?}: {reason}")]
    SendFailed { command: CommandKind, reason: String },
    #[error("Failed to send stop signal to stimulator: {reason}")]
    StopFailed { reason: String },
    #[error("Keep-alive was not acknowledged: {reason}")]
    KeepAliveFailed { reason: String },
    #[error("Invalid pulse: {0}")]
    InvalidPulse(#[from] PulseError),
    #[error("Invalid stimulation duration: {0}")]
    InvalidDuration(String),
    #[error("Device session is not open")]
    NotOpen,
    #[error("Version handshake has not completed")]
    HandshakeRequired,
    #[error("Mid-level stimulation has not been initialized")]
    MidLevelNotEnabled,
    #[error("Mid-level stimulation was already initialized for this session")]
    MidLevelAlreadyEnabled,
    #[error("No channel has been configured for stimulation")]
    NoActiveChannels,
    #[error("A stimulation is already running")]
    AlreadyRunning,
    #[error("The device session is owned by a running stimulation")]
    Busy,
}

impl StimulatorError {
    /// Whether the error leaves the device in an unknown energized state
    pub fn is_fatal(&self) -> bool {
        matches!(self, StimulatorError::StopFailed { .. })
    }
}

/// A per-channel error flag raised by the device during stimulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("The stimulator has reported an error on channel {channel}")]
pub struct DeviceFault {
    pub channel: ChannelId,
}

/// Configuration loading and validation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Field '{field}' value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: String,
        min: String,
        max: String,
    },
    #[error("Inconsistent configuration: {0}")]
    Inconsistent(String),
    #[error("Configuration parse error: {0}")]
    Parse(String),
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// Trial plan generation and import errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequenceError {
    #[error("A stimulation order needs at least one trial")]
    EmptyPlan,
    #[error("Number of blocks must be at least 1")]
    ZeroBlocks,
    #[error("Number of trials per block must be at least 1")]
    ZeroTrials,
    #[error(
        "Plan of {n_blocks} blocks x {n_trials_per_block} trials exceeds \
         {max_blocks} blocks x {max_trials_per_block} trials"
    )]
    PlanTooLarge {
        n_blocks: u32,
        n_trials_per_block: u32,
        max_blocks: u32,
        max_trials_per_block: u32,
    },
    #[error("At least one channel-electrode map is required")]
    NoElectrodeMaps,
    #[error("Invalid channel selection: {0}")]
    InvalidSelection(String),
    #[error("Channel-electrode map '{map_id}' has no entry for channel {channel}")]
    MissingChannel { map_id: String, channel: ChannelId },
    #[error("Trial {overall_trial} is out of order: {reason}")]
    OutOfOrder { overall_trial: u32, reason: String },
}

/// Phase controller input errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExperimentError {
    #[error("Input '{input}' is not accepted in state {state}")]
    UnexpectedInput { input: &'static str, state: String },
    #[error("Unknown intensity '{0}'")]
    InvalidIntensity(String),
    #[error("Invalid sensation: {0}")]
    InvalidSensation(String),
}

/// Unified error for the experiment-level API
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StimError {
    #[error(transparent)]
    SerialPort(#[from] SerialPortError),
    #[error(transparent)]
    Stimulator(#[from] StimulatorError),
    #[error(transparent)]
    Fault(#[from] DeviceFault),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sequence(#[from] SequenceError),
    #[error(transparent)]
    Experiment(#[from] ExperimentError),
}

impl From<PulseError> for StimError {
    fn from(err: PulseError) -> Self {
        StimError::Stimulator(StimulatorError::InvalidPulse(err))
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Rejected input, nothing changed
    Low,
    /// The current stimulation was aborted and needs acknowledgement
    High,
    /// Device state unknown, the session must be torn down
    Critical,
}

impl StimError {
    /// Classify the error for the operator
    pub fn severity(&self) -> Severity {
        match self {
            StimError::SerialPort(_) => Severity::Critical,
            StimError::Stimulator(e) if e.is_fatal() => Severity::Critical,
            StimError::Stimulator(_) | StimError::Fault(_) => Severity::High,
            StimError::Config(_) | StimError::Sequence(_) | StimError::Experiment(_) => {
                Severity::Low
            }
        }
    }
}
