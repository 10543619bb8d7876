//! Transport capability set consumed by the session.
//!
//! A transport owns the connection and the wire protocol. The session drives
//! it through short, non-blocking steps and receives protocol events through
//! the [`Callbacks`] it lends to each step.

#[cfg(test)]
pub(crate) mod mock;
pub mod mqtt;

use std::time::Duration;

use mqpoll_core::packet::QoS;

use crate::bridge::Callbacks;
use crate::status::Status;

pub use mqtt::MqttTransport;

/// Result of a transport primitive.
pub type Outcome<T = ()> = std::result::Result<T, Status>;

/// Operations the session needs from a protocol transport.
pub trait Transport {
    /// Credentials used by the next `connect`.
    fn set_credentials(&mut self, username: Option<&str>, password: Option<&str>) -> Outcome;

    /// Open the connection and queue the CONNECT. Reconnects if connected.
    fn connect(&mut self, host: &str, port: u16, keepalive: u16) -> Outcome;

    /// Close the connection. `Status::NoConn` if there is none.
    fn disconnect(&mut self) -> Outcome;

    /// Queue a SUBSCRIBE, returning its correlation id.
    fn subscribe(&mut self, topic: &str, qos: QoS) -> Outcome<u16>;

    /// Queue an UNSUBSCRIBE, returning its correlation id.
    fn unsubscribe(&mut self, topic: &str) -> Outcome<u16>;

    /// Queue a PUBLISH, returning its correlation id.
    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Outcome<u16>;

    /// Whether outbound bytes are waiting to be written.
    fn wants_to_write(&self) -> bool;

    /// Write as much pending outbound data as the socket accepts.
    fn flush_writes(&mut self, callbacks: &mut dyn Callbacks) -> Outcome;

    /// Read and process whatever inbound data is available.
    fn read_available(&mut self, callbacks: &mut dyn Callbacks) -> Outcome;

    /// Keepalive and other timer-driven protocol work.
    fn perform_periodic_maintenance(&mut self, callbacks: &mut dyn Callbacks) -> Outcome;

    /// Wait up to `timeout` for inbound data. Returns whether data is readable.
    fn wait_readable(&mut self, timeout: Duration) -> bool;

    /// Release the connection. Called once, when the session is destroyed.
    fn destroy(&mut self) {
        let _ = self.disconnect();
    }
}
