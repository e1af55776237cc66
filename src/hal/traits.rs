// src/hal/traits.rs
//! Transport seam to the stimulator firmware

use crate::error::TransportError;
use crate::hal::types::{Ack, Packet};

/// Synchronous request/acknowledgement transport to the stimulator.
///
/// Byte-level encoding is the implementor's concern. Every call is made from
/// the single control thread.
pub trait StimulatorTransport {
    /// Whether `port` exists and can be claimed
    fn is_port_available(&mut self, port: &str) -> bool;

    fn open(&mut self, port: &str) -> Result<(), TransportError>;

    fn close(&mut self) -> Result<(), TransportError>;

    /// Send a typed command. `Ok` means the device accepted the packet.
    fn send(&mut self, packet: &Packet) -> Result<(), TransportError>;

    /// Whether an unread acknowledgement is waiting
    fn new_packet_received(&mut self) -> bool;

    /// Take the oldest unread acknowledgement
    fn last_ack(&mut self) -> Option<Ack>;
}

impl<T: StimulatorTransport + ?Sized> StimulatorTransport for Box<T> {
    fn is_port_available(&mut self, port: &str) -> bool {
        (**self).is_port_available(port)
    }

    fn open(&mut self, port: &str) -> Result<(), TransportError> {
        (**self).open(port)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }

    fn send(&mut self, packet: &Packet) -> Result<(), TransportError> {
        (**self).send(packet)
    }

    fn new_packet_received(&mut self) -> bool {
        (**self).new_packet_received()
    }

    fn last_ack(&mut self) -> Option<Ack> {
        (**self).last_ack()
    }
}
