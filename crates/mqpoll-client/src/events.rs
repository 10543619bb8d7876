//! Session events and their kinds.

use std::fmt;

use bytes::Bytes;
use mqpoll_core::packet::{ConnackCode, QoS};

/// Kind of an [`Event`], used to register handlers and to match responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Publish,
    Subscribe,
    Unsubscribe,
    Message,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Connect => "connect",
            EventKind::Publish => "publish",
            EventKind::Subscribe => "subscribe",
            EventKind::Unsubscribe => "unsubscribe",
            EventKind::Message => "message",
        };
        f.write_str(name)
    }
}

/// One protocol occurrence reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Result of a connection attempt.
    Connect {
        /// CONNACK return code (0 = accepted).
        status: u8,
        /// Human-readable description of `status`.
        message: &'static str,
    },
    /// An outbound publish completed its QoS flow.
    Publish { packet_id: u16 },
    /// A subscribe request was acknowledged.
    Subscribe { packet_id: u16 },
    /// An unsubscribe request was acknowledged.
    Unsubscribe { packet_id: u16 },
    /// A message arrived on a subscribed topic.
    Message {
        topic: String,
        payload: Bytes,
        retained: bool,
        qos: QoS,
    },
}

impl Event {
    /// Build a connect event, describing the CONNACK return code.
    pub fn connect(status: u8) -> Self {
        Event::Connect {
            status,
            message: connack_message(status),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connect { .. } => EventKind::Connect,
            Event::Publish { .. } => EventKind::Publish,
            Event::Subscribe { .. } => EventKind::Subscribe,
            Event::Unsubscribe { .. } => EventKind::Unsubscribe,
            Event::Message { .. } => EventKind::Message,
        }
    }

    /// Correlation id for acknowledgement events.
    pub fn packet_id(&self) -> Option<u16> {
        match self {
            Event::Publish { packet_id }
            | Event::Subscribe { packet_id }
            | Event::Unsubscribe { packet_id } => Some(*packet_id),
            Event::Connect { .. } | Event::Message { .. } => None,
        }
    }
}

/// Description of a CONNACK return code.
pub fn connack_message(status: u8) -> &'static str {
    match ConnackCode::from_u8(status) {
        Some(ConnackCode::Accepted) => "connection accepted",
        Some(ConnackCode::UnacceptableProtocolVersion) => {
            "connection refused (unacceptable protocol version)"
        }
        Some(ConnackCode::IdentifierRejected) => "connection refused (identifier rejected)",
        Some(ConnackCode::ServerUnavailable) => "connection refused (broker unavailable)",
        Some(ConnackCode::BadUsernamePassword) => {
            "connection refused (bad user name or password)"
        }
        Some(ConnackCode::NotAuthorized) => "connection refused (not authorised)",
        None if status == 6 => "connection refused (unknown reason)",
        None => "unknown connection failure",
    }
}
