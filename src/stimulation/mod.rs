//! Timed mid-level stimulation on top of a [`DeviceSession`](crate::hal::DeviceSession)

pub mod scheduler;
pub mod timer;

pub use scheduler::{ErrorCallback, SchedulerState, StimulationScheduler, TerminationCallback};
pub use timer::{TimerId, TimerQueue};
