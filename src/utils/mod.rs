//! Common utilities for the stimulation core
//!
//! - Clock abstraction with a monotonic and a mock implementation
//! - Range validation for configuration parameters

pub mod time;
pub mod validation;

pub use time::{
    current_timestamp_millis,
    duration_to_nanos,
    MockTimeProvider,
    MonotonicTimeProvider,
    SharedClock,
    TimeProvider,
};

pub use validation::{validate_range, ParameterRange};
