// src/config/mod.rs
//! Experiment configuration
//!
//! Every field has a serde default, so a partial TOML file is a valid
//! configuration. Values outside their range are rejected, never clamped.

pub mod constants;
pub mod loader;

pub use constants::*;
pub use loader::ConfigLoader;

use crate::error::{ConfigError, PulseError};
use crate::hal::types::{ChannelId, PulseConfig};
use crate::utils::validation::validate_range;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete experiment configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub stimulation: StimulationSettings,
    #[serde(default)]
    pub timing: SchedulerTiming,
    #[serde(default)]
    pub experiment: ExperimentSettings,
    #[serde(default)]
    pub device: DeviceSettings,
}

/// Pulse and stimulation parameters
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StimulationSettings {
    /// Calibration channel
    #[serde(default = "defaults::channel")]
    pub channel: u8,

    #[serde(default = "defaults::amplitude_ma")]
    pub amplitude_ma: f64,

    #[serde(default = "defaults::phase_duration_us")]
    pub phase_duration_us: u32,

    #[serde(default = "defaults::interphase_interval_us")]
    pub interphase_interval_us: u32,

    #[serde(default = "defaults::stim_duration_s")]
    pub stim_duration_s: f64,

    #[serde(default = "defaults::frequency_hz")]
    pub frequency_hz: f64,
}

/// Keep-alive loop timing
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SchedulerTiming {
    #[serde(default = "defaults::keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,

    /// No keep-alives are sent during the last `tail_window_ms` of a stimulation
    #[serde(default = "defaults::tail_window_ms")]
    pub tail_window_ms: u64,

    #[serde(default = "defaults::error_poll_delay_ms")]
    pub error_poll_delay_ms: u64,
}

/// Trial structure of the sensory phase
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ExperimentSettings {
    #[serde(default = "defaults::n_blocks")]
    pub n_blocks: u32,

    #[serde(default = "defaults::n_trials_per_block")]
    pub n_trials_per_block: u32,

    #[serde(default = "defaults::countdown_s")]
    pub countdown_s: u32,

    /// Seed for the trial order; entropy when absent
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Serial device settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DeviceSettings {
    #[serde(default = "defaults::port_name")]
    pub port_name: String,

    #[serde(default = "defaults::handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

/// Default value providers using constants
mod defaults {
    use crate::config::constants::*;

    pub fn channel() -> u8 { parameters::DEFAULT_CHANNEL }
    pub fn amplitude_ma() -> f64 { parameters::DEFAULT_AMPLITUDE_MA }
    pub fn phase_duration_us() -> u32 { parameters::DEFAULT_PHASE_DURATION_US }
    pub fn interphase_interval_us() -> u32 { parameters::DEFAULT_INTERPHASE_INTERVAL_US }
    pub fn stim_duration_s() -> f64 { parameters::DEFAULT_STIM_DURATION_S }
    pub fn frequency_hz() -> f64 { parameters::DEFAULT_FREQUENCY_HZ }

    pub fn keepalive_interval_ms() -> u64 { timing::KEEPALIVE_INTERVAL_MS }
    pub fn tail_window_ms() -> u64 { timing::TAIL_WINDOW_MS }
    pub fn error_poll_delay_ms() -> u64 { timing::ERROR_POLL_DELAY_MS }

    pub fn n_blocks() -> u32 { experiment::DEFAULT_BLOCKS }
    pub fn n_trials_per_block() -> u32 { experiment::DEFAULT_TRIALS_PER_BLOCK }
    pub fn countdown_s() -> u32 { experiment::DEFAULT_COUNTDOWN_S }

    pub fn port_name() -> String { serial::DEFAULT_PORT.to_string() }
    pub fn handshake_timeout_ms() -> u64 { timing::MAX_WAIT_TIME_MS }
}

impl Default for StimulationSettings {
    fn default() -> Self {
        Self {
            channel: defaults::channel(),
            amplitude_ma: defaults::amplitude_ma(),
            phase_duration_us: defaults::phase_duration_us(),
            interphase_interval_us: defaults::interphase_interval_us(),
            stim_duration_s: defaults::stim_duration_s(),
            frequency_hz: defaults::frequency_hz(),
        }
    }
}

impl Default for SchedulerTiming {
    fn default() -> Self {
        Self {
            keepalive_interval_ms: defaults::keepalive_interval_ms(),
            tail_window_ms: defaults::tail_window_ms(),
            error_poll_delay_ms: defaults::error_poll_delay_ms(),
        }
    }
}

impl Default for ExperimentSettings {
    fn default() -> Self {
        Self {
            n_blocks: defaults::n_blocks(),
            n_trials_per_block: defaults::n_trials_per_block(),
            countdown_s: defaults::countdown_s(),
            seed: None,
        }
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            port_name: defaults::port_name(),
            handshake_timeout_ms: defaults::handshake_timeout_ms(),
        }
    }
}

impl StimulationSettings {
    /// Pulse period derived from the frequency
    pub fn period_ms(&self) -> f64 {
        1000.0 / self.frequency_hz
    }

    /// Stimulation length; negative or non-finite seconds are rejected
    pub fn stim_duration(&self) -> Result<Duration, ConfigError> {
        Duration::try_from_secs_f64(self.stim_duration_s).map_err(|_| {
            let (min, max) = parameters::STIM_DURATION_RANGE_S;
            ConfigError::OutOfRange {
                field: "stimulation.stim_duration_s",
                value: self.stim_duration_s.to_string(),
                min: min.to_string(),
                max: max.to_string(),
            }
        })
    }

    pub fn calibration_channel(&self) -> Result<ChannelId, PulseError> {
        ChannelId::new(self.channel)
    }

    /// Pulse with the current amplitude on `channel`
    pub fn pulse_for(&self, channel: ChannelId) -> Result<PulseConfig, PulseError> {
        PulseConfig::new(
            channel,
            self.amplitude_ma,
            self.phase_duration_us,
            self.interphase_interval_us,
            self.period_ms(),
        )
    }

    /// Check each field against its inclusive range
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (lo, hi) = parameters::CHANNEL_RANGE;
        validate_range("stimulation.channel", self.channel, lo, hi)?;
        // NaN fails every range check below
        let (lo, hi) = parameters::AMPLITUDE_RANGE_MA;
        validate_range("stimulation.amplitude_ma", self.amplitude_ma, lo, hi)?;
        let (lo, hi) = parameters::PHASE_DURATION_RANGE_US;
        validate_range("stimulation.phase_duration_us", self.phase_duration_us, lo, hi)?;
        let (lo, hi) = parameters::INTERPHASE_INTERVAL_RANGE_US;
        validate_range(
            "stimulation.interphase_interval_us",
            self.interphase_interval_us,
            lo,
            hi,
        )?;
        let (lo, hi) = parameters::STIM_DURATION_RANGE_S;
        validate_range("stimulation.stim_duration_s", self.stim_duration_s, lo, hi)?;
        let (lo, hi) = parameters::FREQUENCY_RANGE_HZ;
        validate_range("stimulation.frequency_hz", self.frequency_hz, lo, hi)?;
        Ok(())
    }
}

impl SchedulerTiming {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn tail_window(&self) -> Duration {
        Duration::from_millis(self.tail_window_ms)
    }

    pub fn error_poll_delay(&self) -> Duration {
        Duration::from_millis(self.error_poll_delay_ms)
    }

    /// Keep the device watchdog fed: every gap between activities must stay
    /// below the watchdog timeout
    pub fn validate(&self) -> Result<(), ConfigError> {
        let watchdog = device::WATCHDOG_TIMEOUT_MS;
        if self.keepalive_interval_ms == 0 {
            return Err(ConfigError::Inconsistent(
                "keep-alive interval must be positive".to_string(),
            ));
        }
        if self.keepalive_interval_ms >= watchdog || self.tail_window_ms >= watchdog {
            return Err(ConfigError::Inconsistent(format!(
                "keep-alive interval ({} ms) and tail window ({} ms) must be below the {} ms device watchdog",
                self.keepalive_interval_ms, self.tail_window_ms, watchdog
            )));
        }
        if self.tail_window_ms < self.keepalive_interval_ms {
            return Err(ConfigError::Inconsistent(format!(
                "tail window ({} ms) must not be shorter than the keep-alive interval ({} ms)",
                self.tail_window_ms, self.keepalive_interval_ms
            )));
        }
        if self.error_poll_delay_ms >= self.keepalive_interval_ms {
            return Err(ConfigError::Inconsistent(format!(
                "error poll delay ({} ms) must be shorter than the keep-alive interval ({} ms)",
                self.error_poll_delay_ms, self.keepalive_interval_ms
            )));
        }
        Ok(())
    }
}

impl ExperimentSettings {
    pub fn countdown(&self) -> Duration {
        Duration::from_secs(self.countdown_s as u64)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_range("experiment.n_blocks", self.n_blocks, 1, experiment::MAX_BLOCKS)?;
        validate_range(
            "experiment.n_trials_per_block",
            self.n_trials_per_block,
            1,
            experiment::MAX_TRIALS_PER_BLOCK,
        )?;
        validate_range("experiment.countdown_s", self.countdown_s, 0, experiment::MAX_COUNTDOWN_S)?;
        Ok(())
    }
}

impl ExperimentConfig {
    /// Validate every section and their cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.stimulation.validate()?;
        self.timing.validate()?;
        self.experiment.validate()?;
        self.validate_consistency()
    }

    fn validate_consistency(&self) -> Result<(), ConfigError> {
        let pulse_us = 2 * self.stimulation.phase_duration_us as u64
            + self.stimulation.interphase_interval_us as u64;
        let period_us = self.stimulation.period_ms() * 1000.0;
        if period_us < pulse_us as f64 {
            return Err(ConfigError::Inconsistent(format!(
                "a {} µs pulse does not fit the {:.1} µs period of {} Hz",
                pulse_us, period_us, self.stimulation.frequency_hz
            )));
        }
        if self.device.port_name.is_empty() {
            return Err(ConfigError::Inconsistent("serial port name is empty".to_string()));
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.device.handshake_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ExperimentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stimulation.period_ms(), 20.0);
        assert_eq!(config.stimulation.stim_duration().unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn test_config_serialization() {
        let config = ExperimentConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: ExperimentConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ExperimentConfig = toml::from_str(
            r#"
[stimulation]
amplitude_ma = 4.5
"#,
        )
        .unwrap();
        assert_eq!(config.stimulation.amplitude_ma, 4.5);
        assert_eq!(config.stimulation.frequency_hz, parameters::DEFAULT_FREQUENCY_HZ);
        assert_eq!(config.timing, SchedulerTiming::default());
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut config = ExperimentConfig::default();
        config.stimulation.amplitude_ma = 11.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { field: "stimulation.amplitude_ma", .. })
        ));

        let mut config = ExperimentConfig::default();
        config.stimulation.channel = 9;
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange { .. })));

        let mut config = ExperimentConfig::default();
        config.stimulation.frequency_hz = 0.5;
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::default();
        config.experiment.n_blocks = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stim_duration_rejects_unrepresentable_seconds() {
        let mut settings = StimulationSettings::default();
        for seconds in [-1.0, f64::NAN, f64::INFINITY] {
            settings.stim_duration_s = seconds;
            assert!(matches!(
                settings.stim_duration(),
                Err(ConfigError::OutOfRange { field: "stimulation.stim_duration_s", .. })
            ));
            assert!(settings.validate().is_err());
        }

        settings.stim_duration_s = 2.5;
        assert_eq!(settings.stim_duration().unwrap(), Duration::from_millis(2500));
    }

    #[test]
    fn test_pulse_must_fit_period() {
        let mut config = ExperimentConfig::default();
        config.stimulation.frequency_hz = 1000.0;
        assert!(matches!(config.validate(), Err(ConfigError::Inconsistent(_))));
    }

    #[test]
    fn test_timing_consistency() {
        let mut timing = SchedulerTiming::default();
        assert!(timing.validate().is_ok());

        timing.tail_window_ms = 2500;
        assert!(timing.validate().is_err());

        let mut timing = SchedulerTiming::default();
        timing.error_poll_delay_ms = 1000;
        assert!(timing.validate().is_err());

        let mut timing = SchedulerTiming::default();
        timing.tail_window_ms = 500;
        assert!(timing.validate().is_err());
    }

    #[test]
    fn test_pulse_for_uses_settings() {
        let settings = StimulationSettings::default();
        let channel = settings.calibration_channel().unwrap();
        let pulse = settings.pulse_for(channel).unwrap();
        assert_eq!(pulse.amplitude_ma, settings.amplitude_ma);
        assert_eq!(pulse.period_ms, 20.0);
    }
}
