//! Client error types.

use thiserror::Error;

use crate::config::ConfigError;
use crate::events::EventKind;
use crate::status::Status;

/// Client error type.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The transport reported a non-success status.
    #[error("{status} - {detail}")]
    Status { status: Status, detail: String },

    /// The transport failed to allocate a handle.
    #[error("got unexpected null - while {0}")]
    NullAllocation(String),

    /// No matching event arrived before the deadline.
    #[error("timed out - waiting for {0} response")]
    Timeout(EventKind),

    /// The session was destroyed.
    #[error("operation attempted on a destroyed session")]
    Destroyed,

    /// Invalid connection info or configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Status error raised while performing `action`.
    pub fn status(status: Status, action: &str) -> Self {
        ClientError::Status {
            status,
            detail: format!("while {}", action),
        }
    }

    /// The transport status behind this error, if any.
    pub fn transport_status(&self) -> Option<Status> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Check a transport result, tagging a failure with the action performed.
pub(crate) fn check<T>(action: &str, result: std::result::Result<T, Status>) -> Result<T> {
    result.map_err(|status| ClientError::status(status, action))
}
