//! Range validation helpers for the configuration surface
//!
//! Values outside their inclusive range are rejected, never clamped.

use crate::error::ConfigError;
use std::fmt::Display;

/// Inclusive numeric range for one configuration parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterRange<T> {
    pub field: &'static str,
    pub min: T,
    pub max: T,
}

impl<T: PartialOrd + Display + Copy> ParameterRange<T> {
    pub const fn new(field: &'static str, min: T, max: T) -> Self {
        Self { field, min, max }
    }

    pub fn contains(&self, value: T) -> bool {
        self.min <= value && value <= self.max
    }

    /// Validate `value` against this range
    pub fn check(&self, value: T) -> Result<T, ConfigError> {
        validate_range(self.field, value, self.min, self.max)
    }
}

/// Validate that `value` lies within `[min, max]`.
///
/// NaN never lies within a range.
pub fn validate_range<T: PartialOrd + Display>(
    field: &'static str,
    value: T,
    min: T,
    max: T,
) -> Result<T, ConfigError> {
    if min <= value && value <= max {
        Ok(value)
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        })
    }
}
