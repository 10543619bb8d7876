//! Transport status codes.
//!
//! Every transport primitive reports failure as a [`Status`]. The table is
//! static: each variant carries a fixed human-readable message, and
//! [`SystemError`] maps OS error numbers for the `Errno` status.

use std::fmt;
use std::io;

/// A non-success status reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    ConnPending,
    NoMem,
    Protocol,
    Inval,
    NoConn,
    ConnRefused,
    NotFound,
    ConnLost,
    Tls,
    PayloadSize,
    NotSupported,
    Auth,
    AclDenied,
    Unknown,
    Errno(SystemError),
    Eai,
    Proxy,
}

impl Status {
    /// Map a raw status code. `0` is success and maps to `None`.
    ///
    /// `errno` is consulted only for the system error status (14).
    pub fn from_code(code: i32, errno: i32) -> Option<Status> {
        let status = match code {
            0 => return None,
            -1 => Status::ConnPending,
            1 => Status::NoMem,
            2 => Status::Protocol,
            3 => Status::Inval,
            4 => Status::NoConn,
            5 => Status::ConnRefused,
            6 => Status::NotFound,
            7 => Status::ConnLost,
            8 => Status::Tls,
            9 => Status::PayloadSize,
            10 => Status::NotSupported,
            11 => Status::Auth,
            12 => Status::AclDenied,
            14 => Status::Errno(SystemError::from_raw_os_error(errno)),
            15 => Status::Eai,
            16 => Status::Proxy,
            _ => Status::Unknown,
        };
        Some(status)
    }

    /// The raw status code.
    pub fn code(&self) -> i32 {
        match self {
            Status::ConnPending => -1,
            Status::NoMem => 1,
            Status::Protocol => 2,
            Status::Inval => 3,
            Status::NoConn => 4,
            Status::ConnRefused => 5,
            Status::NotFound => 6,
            Status::ConnLost => 7,
            Status::Tls => 8,
            Status::PayloadSize => 9,
            Status::NotSupported => 10,
            Status::Auth => 11,
            Status::AclDenied => 12,
            Status::Unknown => 13,
            Status::Errno(_) => 14,
            Status::Eai => 15,
            Status::Proxy => 16,
        }
    }

    /// Human-readable description of the status.
    pub fn message(&self) -> &'static str {
        match self {
            Status::ConnPending => "Connection pending",
            Status::NoMem => "Out of memory",
            Status::Protocol => {
                "A network protocol error occurred when communicating with the broker"
            }
            Status::Inval => "Invalid function arguments provided",
            Status::NoConn => "The client is not currently connected",
            Status::ConnRefused => "The connection was refused",
            Status::NotFound => "Message not found (internal error)",
            Status::ConnLost => "The connection was lost",
            Status::Tls => "A TLS error occurred",
            Status::PayloadSize => "Payload too large",
            Status::NotSupported => "This feature is not supported",
            Status::Auth => "Authorisation failed",
            Status::AclDenied => "Access denied by ACL",
            Status::Unknown => "Unknown error",
            Status::Errno(err) => err.message(),
            Status::Eai => "Lookup error",
            Status::Proxy => "Proxy error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl From<io::Error> for Status {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => Status::ConnLost,
            io::ErrorKind::OutOfMemory => Status::NoMem,
            io::ErrorKind::InvalidInput => Status::Inval,
            _ => Status::Errno(SystemError::from(&e)),
        }
    }
}

/// OS-level failure behind a [`Status::Errno`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemError {
    ConnectionRefused,
    ConnectionReset,
    ConnectionAborted,
    TimedOut,
    BrokenPipe,
    HostUnreachable,
    NetworkUnreachable,
    AddrInUse,
    AddrNotAvailable,
    PermissionDenied,
    Interrupted,
    Other(i32),
}

impl SystemError {
    /// Map a raw OS error number.
    pub fn from_raw_os_error(errno: i32) -> Self {
        let kind = io::Error::from_raw_os_error(errno).kind();
        Self::from_kind(kind).unwrap_or(SystemError::Other(errno))
    }

    fn from_kind(kind: io::ErrorKind) -> Option<Self> {
        let err = match kind {
            io::ErrorKind::ConnectionRefused => SystemError::ConnectionRefused,
            io::ErrorKind::ConnectionReset => SystemError::ConnectionReset,
            io::ErrorKind::ConnectionAborted => SystemError::ConnectionAborted,
            io::ErrorKind::TimedOut => SystemError::TimedOut,
            io::ErrorKind::BrokenPipe => SystemError::BrokenPipe,
            io::ErrorKind::HostUnreachable => SystemError::HostUnreachable,
            io::ErrorKind::NetworkUnreachable => SystemError::NetworkUnreachable,
            io::ErrorKind::AddrInUse => SystemError::AddrInUse,
            io::ErrorKind::AddrNotAvailable => SystemError::AddrNotAvailable,
            io::ErrorKind::PermissionDenied => SystemError::PermissionDenied,
            io::ErrorKind::Interrupted => SystemError::Interrupted,
            _ => return None,
        };
        Some(err)
    }

    pub fn message(&self) -> &'static str {
        match self {
            SystemError::ConnectionRefused => "Connection refused",
            SystemError::ConnectionReset => "Connection reset by peer",
            SystemError::ConnectionAborted => "Software caused connection abort",
            SystemError::TimedOut => "Connection timed out",
            SystemError::BrokenPipe => "Broken pipe",
            SystemError::HostUnreachable => "No route to host",
            SystemError::NetworkUnreachable => "Network is unreachable",
            SystemError::AddrInUse => "Address already in use",
            SystemError::AddrNotAvailable => "Cannot assign requested address",
            SystemError::PermissionDenied => "Permission denied",
            SystemError::Interrupted => "Interrupted system call",
            SystemError::Other(_) => "Error defined by errno",
        }
    }
}

impl From<&io::Error> for SystemError {
    fn from(e: &io::Error) -> Self {
        match e.raw_os_error() {
            Some(errno) => Self::from_raw_os_error(errno),
            None => Self::from_kind(e.kind()).unwrap_or(SystemError::Other(0)),
        }
    }
}
