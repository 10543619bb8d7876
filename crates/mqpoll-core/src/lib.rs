//! mqpoll-core - Core MQTT types and utilities.
//!
//! This crate provides the MQTT 3.1.1 packet encoding/decoding needed by a
//! client: packets a client sends are encoded, packets a broker sends are
//! decoded.

pub mod error;
pub mod packet;
pub mod topic;
pub mod varint;

pub use error::{Error, ProtocolError, Result};
pub use packet::*;
