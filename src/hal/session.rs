// src/hal/session.rs
//! Device session: port lifecycle, version handshake and the mid-level
//! stimulation command set.

use crate::config::constants::timing::{HANDSHAKE_POLL_INTERVAL_MS, MAX_WAIT_TIME_MS};
use crate::error::{SerialPortError, StimError, StimulatorError, TransportError};
use crate::hal::traits::StimulatorTransport;
use crate::hal::types::{
    Ack, ChannelId, Command, CommandKind, DeviceVersion, MidLevelUpdate, Packet, PulseConfig,
};
use crate::utils::time::SharedClock;
use std::time::Duration;
use tracing::{debug, error, info};

/// Lifecycle of a [`DeviceSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    /// Port claimed, handshake pending
    Open,
    /// Handshake completed
    Ready,
    /// Mid-level stimulation mode enabled
    MidLevel,
}

/// Command channel to one stimulator.
///
/// Owns the transport and the outgoing mid-level update buffer. Every call is
/// synchronous and made from the control thread.
pub struct DeviceSession<T: StimulatorTransport> {
    transport: T,
    clock: SharedClock,
    state: SessionState,
    port: Option<String>,
    next_packet: u32,
    version: Option<DeviceVersion>,
    update: MidLevelUpdate,
}

impl<T: StimulatorTransport> DeviceSession<T> {
    pub fn new(transport: T, clock: SharedClock) -> Self {
        Self {
            transport,
            clock,
            state: SessionState::Closed,
            port: None,
            next_packet: 0,
            version: None,
            update: MidLevelUpdate::default(),
        }
    }

    /// Claim `port`
    pub fn open(&mut self, port: &str) -> Result<(), SerialPortError> {
        if let Some(open) = &self.port {
            return Err(SerialPortError::AlreadyOpen { port: open.clone() });
        }
        if !self.transport.is_port_available(port) {
            return Err(SerialPortError::PortUnavailable {
                port: port.to_string(),
            });
        }
        self.transport
            .open(port)
            .map_err(|e| SerialPortError::PortOpenFailed {
                port: port.to_string(),
                reason: e.to_string(),
            })?;

        self.port = Some(port.to_string());
        self.state = SessionState::Open;
        info!(port, "Serial port opened");
        Ok(())
    }

    /// Request the extended version and wait up to `timeout` for the answer
    pub fn handshake(&mut self, timeout: Duration) -> Result<DeviceVersion, SerialPortError> {
        if self.state == SessionState::Closed {
            return Err(SerialPortError::NotOpen);
        }

        let started = self.clock.now_nanos();
        let timed_out = |clock: &SharedClock| clock.elapsed_since(started) >= timeout;
        let timeout_error = || SerialPortError::Timeout {
            waited_ms: timeout.as_millis() as u64,
        };

        // Stale acknowledgements would be mistaken for the answer
        while self.transport.new_packet_received() {
            self.transport.last_ack();
            if timed_out(&self.clock) {
                return Err(timeout_error());
            }
        }

        let packet = self.packet(Command::GetExtendedVersion);
        self.transport
            .send(&packet)
            .map_err(|e| SerialPortError::HandshakeFailed {
                reason: e.to_string(),
            })?;

        let pause = Duration::from_millis(HANDSHAKE_POLL_INTERVAL_MS);
        loop {
            while self.transport.new_packet_received() {
                if let Some(Ack::ExtendedVersion { version, .. }) = self.transport.last_ack() {
                    debug!(
                        firmware = %version.firmware,
                        protocol = %version.protocol,
                        "Device version received"
                    );
                    self.version = Some(version);
                    if self.state == SessionState::Open {
                        self.state = SessionState::Ready;
                    }
                    return Ok(version);
                }
                if timed_out(&self.clock) {
                    return Err(timeout_error());
                }
            }
            if timed_out(&self.clock) {
                return Err(timeout_error());
            }
            self.clock.sleep(pause);
        }
    }

    /// Switch the device into mid-level mode. Allowed once per open session.
    pub fn enable_mid_level(&mut self) -> Result<(), StimulatorError> {
        match self.state {
            SessionState::Closed => return Err(StimulatorError::NotOpen),
            SessionState::Open => return Err(StimulatorError::HandshakeRequired),
            SessionState::MidLevel => return Err(StimulatorError::MidLevelAlreadyEnabled),
            SessionState::Ready => {}
        }
        self.send(Command::MidLevelInit)
            .map_err(|e| send_failed(CommandKind::MidLevelInit, e))?;
        self.state = SessionState::MidLevel;
        debug!("Mid-level stimulation enabled");
        Ok(())
    }

    /// Open, handshake with the default timeout and enable mid-level mode
    pub fn connect(&mut self, port: &str) -> Result<DeviceVersion, StimError> {
        self.open(port)?;
        let version = self.handshake(Duration::from_millis(MAX_WAIT_TIME_MS))?;
        self.enable_mid_level()?;
        Ok(version)
    }

    /// Validate `pulse` and write it into the update buffer, enabling its channel
    pub fn upload_pulse(&mut self, pulse: &PulseConfig) -> Result<(), StimulatorError> {
        self.require_mid_level()?;
        pulse.validate()?;
        self.update.set(*pulse);
        Ok(())
    }

    /// Transmit the buffered configuration; starts or refreshes stimulation
    pub fn send_update(&mut self) -> Result<(), StimulatorError> {
        self.require_mid_level()?;
        if self.update.is_empty() {
            return Err(StimulatorError::NoActiveChannels);
        }
        let update = self.update;
        self.send(Command::MidLevelUpdate(update))
            .map_err(|e| send_failed(CommandKind::MidLevelUpdate, e))
    }

    /// Status query that also resets the device watchdog
    pub fn send_keepalive(&mut self) -> Result<(), StimulatorError> {
        self.require_mid_level()?;
        self.send(Command::MidLevelGetCurrentData)
            .map_err(|e| StimulatorError::KeepAliveFailed {
                reason: e.to_string(),
            })
    }

    /// Drain received acknowledgements and return the enabled channels whose
    /// error flag is set
    pub fn poll_channel_errors(&mut self) -> Result<Vec<ChannelId>, StimulatorError> {
        self.require_mid_level()?;
        let mut faulted = Vec::new();
        while self.transport.new_packet_received() {
            let Some(Ack::CurrentData { channel_errors, .. }) = self.transport.last_ack() else {
                continue;
            };
            for channel in self.update.enabled_channels() {
                if channel_errors[channel.index()] && !faulted.contains(&channel) {
                    faulted.push(channel);
                }
            }
        }
        Ok(faulted)
    }

    pub fn clear_pulses(&mut self) {
        self.update.clear();
    }

    pub fn send_stop(&mut self) -> Result<(), StimulatorError> {
        self.require_mid_level()?;
        self.send(Command::MidLevelStop)
            .map_err(|e| StimulatorError::StopFailed {
                reason: e.to_string(),
            })
    }

    /// Release the port. No-op when already closed.
    pub fn close(&mut self) -> Result<(), SerialPortError> {
        let Some(port) = self.port.clone() else {
            return Ok(());
        };
        self.transport
            .close()
            .map_err(|e| SerialPortError::CloseFailed {
                reason: e.to_string(),
            })?;

        self.port = None;
        self.state = SessionState::Closed;
        self.version = None;
        self.update.clear();
        info!(port = %port, "Serial port closed");
        Ok(())
    }

    pub fn active_channels(&self) -> Vec<ChannelId> {
        self.update.enabled_channels()
    }

    pub fn version(&self) -> Option<DeviceVersion> {
        self.version
    }

    pub fn is_open(&self) -> bool {
        self.state != SessionState::Closed
    }

    pub fn is_mid_level_enabled(&self) -> bool {
        self.state == SessionState::MidLevel
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn require_mid_level(&self) -> Result<(), StimulatorError> {
        match self.state {
            SessionState::MidLevel => Ok(()),
            SessionState::Closed => Err(StimulatorError::NotOpen),
            SessionState::Open | SessionState::Ready => Err(StimulatorError::MidLevelNotEnabled),
        }
    }

    fn packet(&mut self, command: Command) -> Packet {
        let number = self.next_packet;
        self.next_packet = self.next_packet.wrapping_add(1);
        Packet::new(number, command)
    }

    fn send(&mut self, command: Command) -> Result<(), TransportError> {
        let packet = self.packet(command);
        self.transport.send(&packet)
    }
}

fn send_failed(command: CommandKind, err: TransportError) -> StimulatorError {
    StimulatorError::SendFailed {
        command,
        reason: err.to_string(),
    }
}

impl<T: StimulatorTransport> Drop for DeviceSession<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(error = %e, "Failed to release the serial port on drop");
        }
    }
}
