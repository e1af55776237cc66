// src/config/constants.rs
//! System-wide constants for the stimulator protocol and the experiment

/// Device hardware limits
pub mod device {
    pub const CHANNEL_COUNT: usize = 8;
    pub const MIN_CHANNEL: u8 = 1;
    pub const MAX_CHANNEL: u8 = 8;
    pub const MIN_ELECTRODE: u8 = 1;
    pub const MAX_ELECTRODE: u8 = 16;

    /// Safe amplitude bounds accepted for any pulse upload
    pub const MIN_SAFE_AMPLITUDE_MA: f64 = 0.5;
    pub const MAX_SAFE_AMPLITUDE_MA: f64 = 20.0;

    /// The firmware halts mid-level output without activity for this long
    pub const WATCHDOG_TIMEOUT_MS: u64 = 2000;
}

/// Protocol timing
pub mod timing {
    /// Bound on the handshake poll loop
    pub const MAX_WAIT_TIME_MS: u64 = 1000;
    pub const HANDSHAKE_POLL_INTERVAL_MS: u64 = 1;

    pub const KEEPALIVE_INTERVAL_MS: u64 = 1000;
    /// Final window in which keep-alives stop and a single exact timer is armed
    pub const TAIL_WINDOW_MS: u64 = 1500;
    /// Empirical delay for the device to answer a status query
    pub const ERROR_POLL_DELAY_MS: u64 = 150;

    pub const COUNTDOWN_TICK_MS: u64 = 1000;
}

/// Configuration surface ranges and defaults
pub mod parameters {
    pub const CHANNEL_RANGE: (u8, u8) = (1, 8);
    pub const DEFAULT_CHANNEL: u8 = 1;

    pub const AMPLITUDE_RANGE_MA: (f64, f64) = (0.5, 11.0);
    pub const DEFAULT_AMPLITUDE_MA: f64 = 2.0;

    pub const PHASE_DURATION_RANGE_US: (u32, u32) = (1, 1000);
    pub const DEFAULT_PHASE_DURATION_US: u32 = 700;

    pub const INTERPHASE_INTERVAL_RANGE_US: (u32, u32) = (1, 1000);
    pub const DEFAULT_INTERPHASE_INTERVAL_US: u32 = 500;

    pub const STIM_DURATION_RANGE_S: (f64, f64) = (0.1, 240.0);
    pub const DEFAULT_STIM_DURATION_S: f64 = 5.0;

    pub const FREQUENCY_RANGE_HZ: (f64, f64) = (1.0, 1000.0);
    pub const DEFAULT_FREQUENCY_HZ: f64 = 50.0;
}

/// Experiment structure
pub mod experiment {
    pub const DEFAULT_BLOCKS: u32 = 4;
    pub const DEFAULT_TRIALS_PER_BLOCK: u32 = 8;
    pub const MAX_BLOCKS: u32 = 100;
    pub const MAX_TRIALS_PER_BLOCK: u32 = 1000;

    pub const DEFAULT_COUNTDOWN_S: u32 = 3;
    pub const MAX_COUNTDOWN_S: u32 = 60;

    pub const SENSATION_INTENSITY_MIN: u8 = 1;
    pub const SENSATION_INTENSITY_MAX: u8 = 10;
}

/// Serial port defaults
pub mod serial {
    #[cfg(windows)]
    pub const DEFAULT_PORT: &str = "COM5";
    #[cfg(not(windows))]
    pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_respects_watchdog() {
        assert!(timing::KEEPALIVE_INTERVAL_MS < device::WATCHDOG_TIMEOUT_MS);
        assert!(timing::TAIL_WINDOW_MS < device::WATCHDOG_TIMEOUT_MS);
        assert!(timing::TAIL_WINDOW_MS >= timing::KEEPALIVE_INTERVAL_MS);
        assert!(timing::ERROR_POLL_DELAY_MS < timing::KEEPALIVE_INTERVAL_MS);
    }

    #[test]
    fn test_default_pulse_fits_default_period() {
        let period_us = 1_000_000.0 / parameters::DEFAULT_FREQUENCY_HZ;
        let pulse_us = 2 * parameters::DEFAULT_PHASE_DURATION_US
            + parameters::DEFAULT_INTERPHASE_INTERVAL_US;
        assert!(period_us >= pulse_us as f64);
    }
}
