//! Nerve-Stim-Core: mid-level nerve stimulation sessions and psychophysics trials
//!
//! This library drives a multi-channel electrical stimulator through a
//! request/acknowledgement transport and runs a two-phase experiment on top
//! of it. It features:
//!
//! - Device session with version handshake and mid-level command set
//! - Keep-alive scheduler that stops stimulation after an exact duration
//! - Randomized block/trial sequencing with channel-electrode maps
//! - Calibration and sensory-response phase controller
//! - Simulated stimulator with watchdog and fault injection
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use nerve_stim_core::config::SchedulerTiming;
//! use nerve_stim_core::hal::{ChannelId, DeviceSession, PulseConfig, SimulatedStimulator};
//! use nerve_stim_core::runtime::ControlLoop;
//! use nerve_stim_core::stimulation::StimulationScheduler;
//! use nerve_stim_core::utils::MonotonicTimeProvider;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let clock = MonotonicTimeProvider::shared();
//!     let device = SimulatedStimulator::with_defaults(clock.clone());
//!     let mut session = DeviceSession::new(device, clock.clone());
//!     session.connect("/dev/ttyUSB0")?;
//!
//!     let mut scheduler = StimulationScheduler::new(session, SchedulerTiming::default());
//!     let pulse = PulseConfig::new(ChannelId::new(1)?, 2.0, 700, 500, 20.0)?;
//!     scheduler.configure_pulse(&pulse)?;
//!     scheduler.start(Duration::from_secs(5), || println!("done"), |ch| eprintln!("error on {ch}"))?;
//!
//!     ControlLoop::new(clock).run_blocking(&mut scheduler)?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_inception)]

pub mod config;
pub mod error;
pub mod experiment;
pub mod hal;
pub mod runtime;
pub mod stimulation;
pub mod utils;

// Re-export commonly used types for convenience
pub use config::{ConfigLoader, ExperimentConfig, SchedulerTiming};
pub use error::{Severity, StimError, StimResult};
pub use experiment::{PhaseController, TrialSequencer};
pub use hal::{ChannelId, DeviceSession, PulseConfig, StimulatorTransport};
pub use runtime::{ControlLoop, Reactor};
pub use stimulation::{SchedulerState, StimulationScheduler};
pub use utils::time::{SharedClock, TimeProvider};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get library information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: "Mid-level nerve stimulation sessions and psychophysics trials".to_string(),
        features: vec![
            "Device session and mid-level protocol".to_string(),
            "Keep-alive stimulation scheduler".to_string(),
            "Block/trial sequencing".to_string(),
            "Calibration and sensory phase controller".to_string(),
            "Simulated stimulator".to_string(),
        ],
    }
}

/// Library version information
#[derive(Debug, Clone)]
pub struct VersionInfo {
    /// Library name
    pub name: String,
    /// Version string
    pub version: String,
    /// Description
    pub description: String,
    /// List of features
    pub features: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info() {
        let info = version_info();
        assert_eq!(info.name, NAME);
        assert_eq!(info.version, VERSION);
        assert!(!info.features.is_empty());
    }

    #[test]
    fn test_constants() {
        assert!(!VERSION.is_empty());
        assert!(!NAME.is_empty());
    }
}
