// tests/error_propagation_tests.rs
//! Error propagation from the transport up to the experiment-level API
//!
//! - Transport failures keep their reason through the protocol layer
//! - Every layer converts into the unified `StimError`
//! - Severity classification matches the recovery policy

mod common;

use common::{connected_session, scheduler};
use nerve_stim_core::config::ConfigLoader;
use nerve_stim_core::error::{
    ConfigError, DeviceFault, SequenceError, SerialPortError, Severity, StimError,
    StimulatorError,
};
use nerve_stim_core::hal::{
    ChannelId, CommandKind, DeviceSession, PulseConfig, SimulatedStimulator, SimulatorConfig,
};
use nerve_stim_core::experiment::{ChannelSelection, TrialSequencer};
use nerve_stim_core::utils::MockTimeProvider;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;

fn pulse() -> PulseConfig {
    PulseConfig::new(ChannelId::new(1).expect("channel"), 2.0, 700, 500, 20.0)
        .expect("valid pulse")
}

#[test]
fn test_unknown_port_is_critical() {
    let clock = Arc::new(MockTimeProvider::new(0));
    let device = SimulatedStimulator::with_defaults(clock.clone());
    let mut session = DeviceSession::new(device, clock);

    let err = session.connect("/dev/does-not-exist").unwrap_err();
    assert!(matches!(
        err,
        StimError::SerialPort(SerialPortError::PortUnavailable { ref port }) if port == "/dev/does-not-exist"
    ));
    assert_eq!(err.severity(), Severity::Critical);
    assert!(!session.is_open());
}

#[test]
fn test_silent_device_times_out() {
    let clock = Arc::new(MockTimeProvider::new(0));
    let config = SimulatorConfig {
        answer_handshake: false,
        ..SimulatorConfig::default()
    };
    let port = config.available_ports[0].clone();
    let mut session = DeviceSession::new(SimulatedStimulator::new(config, clock.clone()), clock);

    let err: StimError = session.connect(&port).unwrap_err();
    assert!(matches!(
        err,
        StimError::SerialPort(SerialPortError::Timeout { .. })
    ));
    assert_eq!(err.severity(), Severity::Critical);
    assert!(err.to_string().contains("ms"));
}

#[test]
fn test_send_failure_keeps_transport_reason() {
    let (mut session, handle, _) = connected_session();
    session.upload_pulse(&pulse()).expect("Failed to upload pulse");
    handle.set_command_failure(CommandKind::MidLevelUpdate, true);

    let err = session.send_update().unwrap_err();
    match &err {
        StimulatorError::SendFailed { command, reason } => {
            assert_eq!(*command, CommandKind::MidLevelUpdate);
            assert!(reason.contains("MidLevelUpdate"));
        }
        other => panic!("Expected SendFailed, got: {:?}", other),
    }

    let unified: StimError = err.into();
    assert_eq!(unified.severity(), Severity::High);
}

#[test]
fn test_failed_stop_is_fatal() {
    let (mut scheduler, handle, _) = scheduler();
    scheduler.configure_pulse(&pulse()).expect("Failed to configure pulse");
    scheduler
        .start(Duration::from_secs(3), || {}, |_| {})
        .expect("Failed to start stimulation");
    handle.set_command_failure(CommandKind::MidLevelStop, true);

    let err = scheduler.stop().unwrap_err();
    assert!(err.is_fatal());
    let unified: StimError = err.into();
    assert_eq!(unified.severity(), Severity::Critical);
}

#[test]
fn test_invalid_pulse_is_rejected_before_sending() {
    let (mut session, handle, _) = connected_session();
    let too_strong = PulseConfig {
        amplitude_ma: 50.0,
        ..pulse()
    };

    let err: StimError = session.upload_pulse(&too_strong).unwrap_err().into();
    assert!(matches!(
        err,
        StimError::Stimulator(StimulatorError::InvalidPulse(_))
    ));
    assert_eq!(err.severity(), Severity::High);
    assert!(handle.commands().is_empty());
    assert!(session.active_channels().is_empty());
}

#[test]
fn test_device_fault_message_names_channel() {
    let fault = DeviceFault {
        channel: ChannelId::new(6).expect("channel"),
    };
    let err: StimError = fault.into();
    assert_eq!(err.severity(), Severity::High);
    assert!(err.to_string().contains("channel 6"));
}

#[test]
fn test_input_errors_are_low_severity() {
    let config_err: StimError = ConfigLoader::from_toml_str("[timing]\nkeepalive_interval_ms = 0\n")
        .unwrap_err()
        .into();
    assert!(matches!(config_err, StimError::Config(_)));
    assert_eq!(config_err.severity(), Severity::Low);

    let parse_err = ConfigLoader::from_toml_str("[timing\n").unwrap_err();
    assert!(matches!(parse_err, ConfigError::Parse(_)));

    let selection = ChannelSelection {
        pool: Vec::new(),
        count_weights: vec![1],
    };
    let sequence_err: StimError = TrialSequencer::generate(
        1,
        1,
        &[],
        &selection,
        &mut StdRng::seed_from_u64(0),
    )
    .unwrap_err()
    .into();
    assert_eq!(
        sequence_err,
        StimError::Sequence(SequenceError::NoElectrodeMaps)
    );
    assert_eq!(sequence_err.severity(), Severity::Low);
}
