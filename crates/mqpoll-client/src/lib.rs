//! mqpoll-client - Blocking MQTT session driver over a polled transport.
//!
//! The transport reports protocol events through callbacks. The session
//! queues them, drives reads, writes and keepalive housekeeping from a
//! bounded poll cycle, and offers synchronous requests on top: each
//! subscribe, unsubscribe and publish waits for its own acknowledgement
//! without disturbing the order of unrelated events.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use mqpoll_client::{EventKind, QoS, Session, SessionConfig};
//!
//! let config = SessionConfig::new().endpoint("mqtt://localhost:1883");
//! let mut session = Session::new(config)?;
//! session.start()?;
//!
//! session.on_event(EventKind::Message, |event| println!("{:?}", event))?;
//! session.subscribe("sensors/#", QoS::AtMostOnce)?;
//! session.publish("sensors/temp", "25.5", QoS::AtLeastOnce, false)?;
//!
//! // Dispatch for a second, then stop
//! session.run_loop(Duration::from_secs(1))?;
//! session.close()?;
//! ```
//!
//! # Breaking out of the loop
//!
//! Handlers cannot reach the session, so they break the loop through a
//! cloned [`LoopBreaker`]:
//!
//! ```ignore
//! let breaker = session.breaker();
//! session.on_event(EventKind::Message, move |_| breaker.break_loop())?;
//! session.run_loop(Timeout::Unbounded)?;
//! ```

mod breaker;
mod bridge;
mod config;
mod error;
mod events;
mod packet_id;
mod queue;
mod session;
mod status;
mod timeout;
pub mod transport;

pub use breaker::LoopBreaker;
pub use bridge::{Bridge, Callbacks};
pub use config::{ConfigError, ConnectionInfo, LogConfig, SessionConfig};
pub use error::{ClientError, Result};
pub use events::{connack_message, Event, EventKind};
pub use packet_id::PacketIdAllocator;
pub use queue::EventQueue;
pub use session::{Handler, Session, SessionState};
pub use status::{Status, SystemError};
pub use timeout::Timeout;
pub use transport::{MqttTransport, Transport};

// Re-export useful types from core
pub use mqpoll_core::packet::QoS;
pub use mqpoll_core::topic::matches as topic_matches;
