// src/hal/types.rs
//! Core types for the stimulator protocol: channels, pulses, commands and
//! acknowledgements.

use crate::config::constants::device::{
    CHANNEL_COUNT, MAX_CHANNEL, MAX_SAFE_AMPLITUDE_MA, MIN_CHANNEL, MIN_SAFE_AMPLITUDE_MA,
};
use crate::error::PulseError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stimulation channel as labelled on the device (1-8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ChannelId(u8);

impl ChannelId {
    pub fn new(channel: u8) -> Result<Self, PulseError> {
        if (MIN_CHANNEL..=MAX_CHANNEL).contains(&channel) {
            Ok(Self(channel))
        } else {
            Err(PulseError::InvalidChannel(channel))
        }
    }

    /// Channel from a zero-based slot index
    pub fn from_index(index: usize) -> Option<Self> {
        if index < CHANNEL_COUNT {
            Some(Self(index as u8 + MIN_CHANNEL))
        } else {
            None
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Zero-based slot index in device buffers
    pub fn index(self) -> usize {
        (self.0 - MIN_CHANNEL) as usize
    }

    /// All channels in ascending order
    pub fn all() -> impl Iterator<Item = ChannelId> {
        (MIN_CHANNEL..=MAX_CHANNEL).map(ChannelId)
    }
}

impl TryFrom<u8> for ChannelId {
    type Error = PulseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChannelId> for u8 {
    fn from(channel: ChannelId) -> Self {
        channel.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One point of a mid-level pulse shape
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PulsePoint {
    pub current_ma: f64,
    pub time_us: u32,
}

/// Rectangular biphasic pulse for one channel.
///
/// The pulse consists of a positive phase, an interphase interval at zero
/// current and a negative phase, repeated every `period_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PulseConfig {
    pub channel: ChannelId,
    pub amplitude_ma: f64,
    pub phase_duration_us: u32,
    pub interphase_interval_us: u32,
    pub period_ms: f64,
}

impl PulseConfig {
    /// Create a validated pulse
    pub fn new(
        channel: ChannelId,
        amplitude_ma: f64,
        phase_duration_us: u32,
        interphase_interval_us: u32,
        period_ms: f64,
    ) -> Result<Self, PulseError> {
        let pulse = Self {
            channel,
            amplitude_ma,
            phase_duration_us,
            interphase_interval_us,
            period_ms,
        };
        pulse.validate()?;
        Ok(pulse)
    }

    /// Time occupied by both phases and the interphase interval
    pub fn pulse_width_us(&self) -> u64 {
        2 * self.phase_duration_us as u64 + self.interphase_interval_us as u64
    }

    /// Check amplitude safety bounds and that the period fits the pulse
    pub fn validate(&self) -> Result<(), PulseError> {
        if !self.amplitude_ma.is_finite() {
            return Err(PulseError::NonFinite {
                field: "amplitude_ma",
            });
        }
        if !self.period_ms.is_finite() {
            return Err(PulseError::NonFinite { field: "period_ms" });
        }
        if !(MIN_SAFE_AMPLITUDE_MA..=MAX_SAFE_AMPLITUDE_MA).contains(&self.amplitude_ma) {
            return Err(PulseError::AmplitudeOutOfRange {
                amplitude_ma: self.amplitude_ma,
                min_ma: MIN_SAFE_AMPLITUDE_MA,
                max_ma: MAX_SAFE_AMPLITUDE_MA,
            });
        }
        if self.phase_duration_us == 0 {
            return Err(PulseError::ZeroPhaseDuration);
        }
        let required_us = self.pulse_width_us() as f64;
        if self.period_ms * 1000.0 < required_us {
            return Err(PulseError::PeriodTooShort {
                period_ms: self.period_ms,
                required_ms: required_us / 1000.0,
            });
        }
        Ok(())
    }

    /// The three points of the biphasic shape
    pub fn points(&self) -> [PulsePoint; 3] {
        [
            PulsePoint {
                current_ma: self.amplitude_ma,
                time_us: self.phase_duration_us,
            },
            PulsePoint {
                current_ma: 0.0,
                time_us: self.interphase_interval_us,
            },
            PulsePoint {
                current_ma: -self.amplitude_ma,
                time_us: self.phase_duration_us,
            },
        ]
    }
}

/// Semantic version triple reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub revision: u8,
}

impl Version {
    pub const fn new(major: u8, minor: u8, revision: u8) -> Self {
        Self {
            major,
            minor,
            revision,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.revision)
    }
}

/// Firmware and protocol versions reported at handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceVersion {
    pub firmware: Version,
    pub protocol: Version,
}

/// Outgoing mid-level update buffer, one optional pulse per channel slot.
/// A slot holding a pulse is an enabled channel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MidLevelUpdate {
    channels: [Option<PulseConfig>; CHANNEL_COUNT],
}

impl MidLevelUpdate {
    pub fn set(&mut self, pulse: PulseConfig) {
        self.channels[pulse.channel.index()] = Some(pulse);
    }

    pub fn get(&self, channel: ChannelId) -> Option<&PulseConfig> {
        self.channels[channel.index()].as_ref()
    }

    pub fn is_enabled(&self, channel: ChannelId) -> bool {
        self.channels[channel.index()].is_some()
    }

    pub fn clear(&mut self) {
        self.channels = [None; CHANNEL_COUNT];
    }

    /// Enabled channels in ascending order
    pub fn enabled_channels(&self) -> Vec<ChannelId> {
        self.channels
            .iter()
            .flatten()
            .map(|pulse| pulse.channel)
            .collect()
    }

    pub fn pulses(&self) -> impl Iterator<Item = &PulseConfig> {
        self.channels.iter().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.iter().all(Option::is_none)
    }
}

/// Command discriminant, used for logging and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    GetExtendedVersion,
    MidLevelInit,
    MidLevelUpdate,
    MidLevelGetCurrentData,
    MidLevelStop,
}

/// Typed device command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GetExtendedVersion,
    MidLevelInit,
    /// Configures the enabled channels and starts or refreshes stimulation
    MidLevelUpdate(MidLevelUpdate),
    /// Per-channel status query; doubles as the keep-alive
    MidLevelGetCurrentData,
    MidLevelStop,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::GetExtendedVersion => CommandKind::GetExtendedVersion,
            Command::MidLevelInit => CommandKind::MidLevelInit,
            Command::MidLevelUpdate(_) => CommandKind::MidLevelUpdate,
            Command::MidLevelGetCurrentData => CommandKind::MidLevelGetCurrentData,
            Command::MidLevelStop => CommandKind::MidLevelStop,
        }
    }
}

/// A command tagged with its packet number
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub number: u32,
    pub command: Command,
}

impl Packet {
    pub fn new(number: u32, command: Command) -> Self {
        Self { number, command }
    }
}

/// Acknowledgement packets received from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    ExtendedVersion {
        packet_number: u32,
        version: DeviceVersion,
    },
    CurrentData {
        packet_number: u32,
        /// Error flag per channel slot
        channel_errors: [bool; CHANNEL_COUNT],
    },
    Generic {
        packet_number: u32,
        command: CommandKind,
    },
}
