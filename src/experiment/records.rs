// src/experiment/records.rs
//! Participant reports and the append-only records built from them

use crate::config::constants::experiment::{SENSATION_INTENSITY_MAX, SENSATION_INTENSITY_MIN};
use crate::error::ExperimentError;
use crate::experiment::sequencer::TrialInfo;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Perceived intensity reported during calibration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intensity {
    #[serde(rename = "Nothing")]
    Nothing,
    #[serde(rename = "Very weak")]
    VeryWeak,
    #[serde(rename = "Weak")]
    Weak,
    #[serde(rename = "Moderate")]
    Moderate,
    #[serde(rename = "Strong")]
    Strong,
    #[serde(rename = "Very strong")]
    VeryStrong,
    #[serde(rename = "Painful")]
    Painful,
}

impl Intensity {
    pub const ALL: [Intensity; 7] = [
        Intensity::Nothing,
        Intensity::VeryWeak,
        Intensity::Weak,
        Intensity::Moderate,
        Intensity::Strong,
        Intensity::VeryStrong,
        Intensity::Painful,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Intensity::Nothing => "Nothing",
            Intensity::VeryWeak => "Very weak",
            Intensity::Weak => "Weak",
            Intensity::Moderate => "Moderate",
            Intensity::Strong => "Strong",
            Intensity::VeryStrong => "Very strong",
            Intensity::Painful => "Painful",
        }
    }

    /// Amplitude change in mA applied after this report
    pub fn amplitude_step_ma(self) -> f64 {
        match self {
            Intensity::Nothing => 3.0,
            Intensity::VeryWeak => 2.0,
            Intensity::Weak => 1.5,
            Intensity::Moderate => 1.0,
            Intensity::Strong => 0.5,
            Intensity::VeryStrong => 0.0,
            Intensity::Painful => -1.0,
        }
    }

    /// Whether this report ends calibration
    pub fn is_target(self) -> bool {
        self == Intensity::VeryStrong
    }
}

impl fmt::Display for Intensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Intensity {
    type Err = ExperimentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Intensity::ALL
            .into_iter()
            .find(|intensity| intensity.label() == s)
            .ok_or_else(|| ExperimentError::InvalidIntensity(s.to_string()))
    }
}

/// Kind of an evoked sensation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensationType {
    Touch,
    Pulse,
    Tingling,
    Vibration,
    Cramp,
    Pain,
    Heat,
    Cold,
    Other,
}

/// Where a sensation was felt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BodyLocation {
    D1,
    D2,
    D3,
    D4,
    S1,
    S2,
    S3,
    S4,
    S5,
    Calf,
    Shin,
}

/// One sensation reported for a trial
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sensation {
    #[serde(rename = "type")]
    pub kind: SensationType,
    pub intensity: u8,
    pub locations: Vec<BodyLocation>,
}

impl Sensation {
    pub fn new(kind: SensationType, intensity: u8, locations: Vec<BodyLocation>) -> Self {
        Self {
            kind,
            intensity,
            locations,
        }
    }

    /// A sensation is complete with an in-range intensity and at least one location
    pub fn validate(&self) -> Result<(), ExperimentError> {
        if !(SENSATION_INTENSITY_MIN..=SENSATION_INTENSITY_MAX).contains(&self.intensity) {
            return Err(ExperimentError::InvalidSensation(format!(
                "intensity {} is outside {}-{}",
                self.intensity, SENSATION_INTENSITY_MIN, SENSATION_INTENSITY_MAX
            )));
        }
        if self.locations.is_empty() {
            return Err(ExperimentError::InvalidSensation(format!(
                "{:?} sensation has no location",
                self.kind
            )));
        }
        Ok(())
    }
}

/// One calibration iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub iteration: u32,
    /// Wall-clock time of the report in Unix milliseconds
    pub timestamp_ms: u64,
    pub amplitude_ma: f64,
    pub intensity: Intensity,
}

/// Sensations reported for one trial
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensationRecord {
    pub trial: TrialInfo,
    pub sensations: Vec<Sensation>,
}

/// Append-only participant logs
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParticipantData {
    calibration: Vec<CalibrationRecord>,
    sensations: Vec<SensationRecord>,
}

impl ParticipantData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_calibration(&mut self, record: CalibrationRecord) -> &CalibrationRecord {
        self.calibration.push(record);
        &self.calibration[self.calibration.len() - 1]
    }

    pub fn push_sensation(&mut self, record: SensationRecord) -> &SensationRecord {
        self.sensations.push(record);
        &self.sensations[self.sensations.len() - 1]
    }

    pub fn calibration(&self) -> &[CalibrationRecord] {
        &self.calibration
    }

    pub fn sensations(&self) -> &[SensationRecord] {
        &self.sensations
    }
}
