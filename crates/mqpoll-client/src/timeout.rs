//! Wait bounds for blocking session calls.

use std::time::{Duration, Instant};

/// How long a blocking session call may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    /// Use the session's protocol timeout.
    #[default]
    Protocol,
    /// Wait at most this long. Zero polls once.
    After(Duration),
    /// Wait until cancelled. Keepalive housekeeping still runs.
    Unbounded,
}

impl Timeout {
    /// Poll once and return if nothing is ready.
    pub const IMMEDIATE: Timeout = Timeout::After(Duration::ZERO);

    /// Negative and NaN values poll once. Values too large for a
    /// `Duration`, infinity included, wait without bound.
    pub fn from_secs_f64(secs: f64) -> Self {
        Duration::try_from_secs_f64(secs.max(0.0)).map_or(Timeout::Unbounded, Timeout::After)
    }

    /// Resolve against the protocol timeout. `None` means unbounded.
    pub(crate) fn resolve(self, protocol: Duration) -> Option<Duration> {
        match self {
            Timeout::Protocol => Some(protocol),
            Timeout::After(d) => Some(d),
            Timeout::Unbounded => None,
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Timeout::After(d)
    }
}

/// Time left of `timeout` measured from `start`, floored at zero.
/// `None` (unbounded) stays `None`.
pub fn remaining(timeout: Option<Duration>, start: Instant) -> Option<Duration> {
    timeout.map(|t| t.saturating_sub(start.elapsed()))
}
