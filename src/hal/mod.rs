// src/hal/mod.rs
//! Hardware Abstraction Layer for the stimulator

pub mod session;
pub mod simulator;
pub mod traits;
pub mod types;

pub use session::{DeviceSession, SessionState};
pub use simulator::{SentCommand, SimulatedStimulator, SimulatorConfig, SimulatorHandle};
pub use traits::*;
pub use types::*;
