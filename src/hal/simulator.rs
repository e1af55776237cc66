//! Simulated stimulator implementing [`StimulatorTransport`]
//!
//! Models the parts of the firmware the core depends on:
//! - port availability and open/close
//! - extended-version handshake
//! - mid-level stimulation with a 2 s activity watchdog
//! - per-channel error flags answered on current-data queries
//!
//! A [`SimulatorHandle`] shares the simulator state so tests can inject faults
//! and inspect the command log while the session owns the transport.

use crate::config::constants::device::{CHANNEL_COUNT, WATCHDOG_TIMEOUT_MS};
use crate::config::constants::serial::DEFAULT_PORT;
use crate::error::TransportError;
use crate::hal::traits::StimulatorTransport;
use crate::hal::types::{Ack, ChannelId, Command, CommandKind, DeviceVersion, Packet, Version};
use crate::utils::time::{duration_to_nanos, SharedClock};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Simulator configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulatorConfig {
    pub available_ports: Vec<String>,
    pub firmware_version: Version,
    pub protocol_version: Version,
    /// When false the device never answers the version request
    pub answer_handshake: bool,
    pub watchdog_timeout_ms: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            available_ports: vec![DEFAULT_PORT.to_string()],
            firmware_version: Version::new(1, 0, 3),
            protocol_version: Version::new(4, 0, 0),
            answer_handshake: true,
            watchdog_timeout_ms: WATCHDOG_TIMEOUT_MS,
        }
    }
}

/// One entry of the simulator's command log
#[derive(Debug, Clone, PartialEq)]
pub struct SentCommand {
    pub at_nanos: u64,
    pub packet_number: u32,
    pub kind: CommandKind,
    /// False when the simulator rejected the packet
    pub delivered: bool,
}

#[derive(Debug, Default)]
struct SimulatorState {
    open_port: Option<String>,
    log: Vec<SentCommand>,
    pending_acks: VecDeque<Ack>,
    faults: [bool; CHANNEL_COUNT],
    failing_commands: HashSet<CommandKind>,
    fail_close: bool,
    stimulating: bool,
    enabled: [bool; CHANNEL_COUNT],
    last_activity_nanos: u64,
    max_activity_gap_nanos: u64,
    watchdog_expirations: u32,
}

impl SimulatorState {
    /// Expire stimulation if the watchdog window passed without activity
    fn check_watchdog(&mut self, now: u64, watchdog_nanos: u64) {
        if self.stimulating && now.saturating_sub(self.last_activity_nanos) > watchdog_nanos {
            self.stimulating = false;
            self.watchdog_expirations += 1;
        }
    }

    fn record_activity(&mut self, now: u64) {
        if self.stimulating {
            let gap = now.saturating_sub(self.last_activity_nanos);
            self.max_activity_gap_nanos = self.max_activity_gap_nanos.max(gap);
        }
        self.last_activity_nanos = now;
    }
}

/// Simulated stimulator device
pub struct SimulatedStimulator {
    config: SimulatorConfig,
    clock: SharedClock,
    state: Arc<Mutex<SimulatorState>>,
}

/// Shared view on a [`SimulatedStimulator`] for fault injection and inspection
#[derive(Clone)]
pub struct SimulatorHandle {
    clock: SharedClock,
    watchdog_nanos: u64,
    state: Arc<Mutex<SimulatorState>>,
}

impl SimulatedStimulator {
    pub fn new(config: SimulatorConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            state: Arc::new(Mutex::new(SimulatorState::default())),
        }
    }

    pub fn with_defaults(clock: SharedClock) -> Self {
        Self::new(SimulatorConfig::default(), clock)
    }

    pub fn handle(&self) -> SimulatorHandle {
        SimulatorHandle {
            clock: Arc::clone(&self.clock),
            watchdog_nanos: self.watchdog_nanos(),
            state: Arc::clone(&self.state),
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    fn watchdog_nanos(&self) -> u64 {
        duration_to_nanos(Duration::from_millis(self.config.watchdog_timeout_ms))
    }

    fn version(&self) -> DeviceVersion {
        DeviceVersion {
            firmware: self.config.firmware_version,
            protocol: self.config.protocol_version,
        }
    }
}

impl StimulatorTransport for SimulatedStimulator {
    fn is_port_available(&mut self, port: &str) -> bool {
        self.config.available_ports.iter().any(|p| p == port)
    }

    fn open(&mut self, port: &str) -> Result<(), TransportError> {
        if !self.is_port_available(port) {
            return Err(TransportError::PortNotFound(port.to_string()));
        }
        let mut state = self.state.lock();
        if let Some(open) = &state.open_port {
            return Err(TransportError::OpenFailed(format!("{} is already open", open)));
        }
        state.open_port = Some(port.to_string());
        state.pending_acks.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.fail_close {
            return Err(TransportError::CloseFailed("handle busy".to_string()));
        }
        state.open_port = None;
        state.stimulating = false;
        state.pending_acks.clear();
        Ok(())
    }

    fn send(&mut self, packet: &Packet) -> Result<(), TransportError> {
        let now = self.clock.now_nanos();
        let watchdog = self.watchdog_nanos();
        let version = self.version();
        let answer_handshake = self.config.answer_handshake;
        let mut state = self.state.lock();

        let kind = packet.command.kind();
        let delivered = state.open_port.is_some() && !state.failing_commands.contains(&kind);
        state.log.push(SentCommand {
            at_nanos: now,
            packet_number: packet.number,
            kind,
            delivered,
        });
        if state.open_port.is_none() {
            return Err(TransportError::NotConnected);
        }
        if !delivered {
            return Err(TransportError::WriteFailed(format!("{:?} rejected", kind)));
        }

        state.check_watchdog(now, watchdog);
        let number = packet.number;
        match &packet.command {
            Command::GetExtendedVersion => {
                if answer_handshake {
                    state.pending_acks.push_back(Ack::ExtendedVersion {
                        packet_number: number,
                        version,
                    });
                }
            }
            Command::MidLevelInit => {
                state.pending_acks.push_back(Ack::Generic {
                    packet_number: number,
                    command: kind,
                });
            }
            Command::MidLevelUpdate(update) => {
                let mut enabled = [false; CHANNEL_COUNT];
                for channel in update.enabled_channels() {
                    enabled[channel.index()] = true;
                }
                state.enabled = enabled;
                state.record_activity(now);
                state.stimulating = !update.is_empty();
                state.pending_acks.push_back(Ack::Generic {
                    packet_number: number,
                    command: kind,
                });
            }
            Command::MidLevelGetCurrentData => {
                state.record_activity(now);
                let mut channel_errors = [false; CHANNEL_COUNT];
                for (slot, flag) in channel_errors.iter_mut().enumerate() {
                    *flag = state.faults[slot] && state.enabled[slot];
                }
                state.pending_acks.push_back(Ack::CurrentData {
                    packet_number: number,
                    channel_errors,
                });
            }
            Command::MidLevelStop => {
                state.stimulating = false;
                state.enabled = [false; CHANNEL_COUNT];
                state.pending_acks.push_back(Ack::Generic {
                    packet_number: number,
                    command: kind,
                });
            }
        }
        Ok(())
    }

    fn new_packet_received(&mut self) -> bool {
        !self.state.lock().pending_acks.is_empty()
    }

    fn last_ack(&mut self) -> Option<Ack> {
        self.state.lock().pending_acks.pop_front()
    }
}

impl SimulatorHandle {
    /// Raise the error flag of `channel`; reported while the channel is enabled
    pub fn inject_fault(&self, channel: ChannelId) {
        self.state.lock().faults[channel.index()] = true;
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults = [false; CHANNEL_COUNT];
    }

    /// Make the device reject (or accept again) every `kind` command
    pub fn set_command_failure(&self, kind: CommandKind, fail: bool) {
        let mut state = self.state.lock();
        if fail {
            state.failing_commands.insert(kind);
        } else {
            state.failing_commands.remove(&kind);
        }
    }

    pub fn set_close_failure(&self, fail: bool) {
        self.state.lock().fail_close = fail;
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open_port.is_some()
    }

    /// Whether the device is currently delivering stimulation
    pub fn is_stimulating(&self) -> bool {
        let now = self.clock.now_nanos();
        let mut state = self.state.lock();
        state.check_watchdog(now, self.watchdog_nanos);
        state.stimulating
    }

    pub fn watchdog_expirations(&self) -> u32 {
        self.state.lock().watchdog_expirations
    }

    /// Longest gap between two activities while stimulating
    pub fn max_activity_gap(&self) -> Duration {
        Duration::from_nanos(self.state.lock().max_activity_gap_nanos)
    }

    pub fn commands(&self) -> Vec<SentCommand> {
        self.state.lock().log.clone()
    }

    /// Delivered commands of one kind
    pub fn delivered(&self, kind: CommandKind) -> Vec<SentCommand> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|c| c.kind == kind && c.delivered)
            .cloned()
            .collect()
    }

    pub fn count(&self, kind: CommandKind) -> usize {
        self.delivered(kind).len()
    }

    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::types::{MidLevelUpdate, PulseConfig};
    use crate::utils::time::MockTimeProvider;

    fn simulator() -> (SimulatedStimulator, Arc<MockTimeProvider>) {
        let clock = Arc::new(MockTimeProvider::new(0));
        (SimulatedStimulator::with_defaults(clock.clone()), clock)
    }

    fn update_for(channel: u8) -> MidLevelUpdate {
        let mut update = MidLevelUpdate::default();
        update.set(PulseConfig::new(ChannelId::new(channel).unwrap(), 2.0, 700, 500, 20.0).unwrap());
        update
    }

    #[test]
    fn test_port_lifecycle() {
        let (mut sim, _) = simulator();
        assert!(sim.is_port_available(DEFAULT_PORT));
        assert!(!sim.is_port_available("/dev/missing"));
        assert!(matches!(sim.open("/dev/missing"), Err(TransportError::PortNotFound(_))));

        sim.open(DEFAULT_PORT).expect("open");
        assert!(sim.open(DEFAULT_PORT).is_err());
        sim.close().expect("close");
        assert!(!sim.handle().is_open());
    }

    #[test]
    fn test_handshake_answer() {
        let (mut sim, _) = simulator();
        sim.open(DEFAULT_PORT).unwrap();
        assert!(!sim.new_packet_received());

        sim.send(&Packet::new(0, Command::GetExtendedVersion)).unwrap();
        assert!(sim.new_packet_received());
        match sim.last_ack() {
            Some(Ack::ExtendedVersion { version, .. }) => {
                assert_eq!(version.firmware, Version::new(1, 0, 3));
            }
            other => panic!("Expected version ack, got {:?}", other),
        }
    }

    #[test]
    fn test_watchdog_expires_without_activity() {
        let (mut sim, clock) = simulator();
        let handle = sim.handle();
        sim.open(DEFAULT_PORT).unwrap();
        sim.send(&Packet::new(1, Command::MidLevelUpdate(update_for(1)))).unwrap();
        assert!(handle.is_stimulating());

        clock.advance(Duration::from_millis(1900));
        sim.send(&Packet::new(2, Command::MidLevelGetCurrentData)).unwrap();
        assert!(handle.is_stimulating());

        clock.advance(Duration::from_millis(2100));
        assert!(!handle.is_stimulating());
        assert_eq!(handle.watchdog_expirations(), 1);
    }

    #[test]
    fn test_fault_reported_only_for_enabled_channels() {
        let (mut sim, _) = simulator();
        let handle = sim.handle();
        sim.open(DEFAULT_PORT).unwrap();
        handle.inject_fault(ChannelId::new(1).unwrap());
        handle.inject_fault(ChannelId::new(5).unwrap());

        sim.send(&Packet::new(1, Command::MidLevelUpdate(update_for(1)))).unwrap();
        sim.last_ack();
        sim.send(&Packet::new(2, Command::MidLevelGetCurrentData)).unwrap();
        match sim.last_ack() {
            Some(Ack::CurrentData { channel_errors, .. }) => {
                assert!(channel_errors[0]);
                assert!(!channel_errors[4]);
            }
            other => panic!("Expected current data ack, got {:?}", other),
        }
    }

    #[test]
    fn test_command_failure_injection() {
        let (mut sim, _) = simulator();
        let handle = sim.handle();
        sim.open(DEFAULT_PORT).unwrap();

        handle.set_command_failure(CommandKind::MidLevelStop, true);
        assert!(sim.send(&Packet::new(1, Command::MidLevelStop)).is_err());
        handle.set_command_failure(CommandKind::MidLevelStop, false);
        assert!(sim.send(&Packet::new(2, Command::MidLevelStop)).is_ok());

        assert_eq!(handle.commands().len(), 2);
        assert_eq!(handle.count(CommandKind::MidLevelStop), 1);
    }
}
