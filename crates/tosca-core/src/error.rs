//! Error taxonomy shared by every device controller.
//!
//! Each controller crate defines its own typed error enum (motion, laser,
//! camera), but all of them classify into the same small set of
//! [`ErrorKind`]s so the presentation layer can render any failure
//! uniformly. Transport-level failures never reach callers directly; they are
//! wrapped into the controller's domain error first.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Classification
// =============================================================================

/// Coarse category of a hardware failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Port unavailable/busy, identity mismatch, no device found.
    Connection,
    /// Timeout, malformed reply, link drop.
    Communication,
    /// Value outside its validated range.
    Parameter,
    /// Operation invalid in the controller's current state.
    State,
    /// Device reported a fault flag (error limit, thermal protection, ...).
    DeviceFault,
    /// Anything else.
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Communication => "communication",
            ErrorKind::Parameter => "parameter",
            ErrorKind::State => "state",
            ErrorKind::DeviceFault => "device_fault",
            ErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// How loudly an error should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
    Fatal,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
            Severity::Fatal => "fatal",
        };
        write!(f, "{}", label)
    }
}

impl ErrorKind {
    /// Severity used when an error does not pick its own.
    pub fn default_severity(self) -> Severity {
        match self {
            ErrorKind::Parameter | ErrorKind::State => Severity::Warning,
            ErrorKind::Connection | ErrorKind::Communication | ErrorKind::Unknown => {
                Severity::Error
            }
            ErrorKind::DeviceFault => Severity::Critical,
        }
    }
}

/// Implemented by every domain error so it can be reported through the
/// status sink and mapped onto a controller fault.
pub trait Classify {
    /// Taxonomy bucket of this error.
    fn kind(&self) -> ErrorKind;

    /// Reporting severity.
    fn severity(&self) -> Severity {
        self.kind().default_severity()
    }
}

// =============================================================================
// Transport-level errors
// =============================================================================

/// Failure to bring a serial link up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// The OS could not open the port (missing, unplugged, bad name).
    #[error("port '{port}' is unavailable: {reason}")]
    PortUnavailable { port: String, reason: String },

    /// The port exists but another process holds it or access was denied.
    #[error("port '{port}' is busy or access was denied")]
    PortBusy { port: String },

    /// The link is open, but to the wrong device.
    #[error("identity check failed: expected '{expected}', device answered '{received}'")]
    VerificationFailed { expected: String, received: String },

    /// Auto-detect exhausted every candidate port.
    #[error("no matching device found after probing {probed} candidate port(s)")]
    NoDeviceFound { probed: usize },

    /// The identification exchange itself failed at the transport level.
    #[error("identification handshake failed: {0}")]
    Handshake(#[source] TransportError),
}

impl Classify for ConnectError {
    fn kind(&self) -> ErrorKind {
        match self {
            ConnectError::Handshake(inner) => inner.kind(),
            _ => ErrorKind::Connection,
        }
    }
}

/// Failure of a single command/response exchange.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No reply terminator arrived within the window.
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// A terminator arrived but the payload could not be parsed.
    #[error("malformed reply: {0}")]
    MalformedReply(String),

    /// I/O fault on the link (device unplugged, port closed under us).
    #[error("serial link error: {0}")]
    LinkError(String),

    /// The transport has been disconnected.
    #[error("transport is not connected")]
    NotConnected,
}

impl Classify for TransportError {
    fn kind(&self) -> ErrorKind {
        match self {
            TransportError::NotConnected => ErrorKind::State,
            _ => ErrorKind::Communication,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::LinkError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::DeviceFault.to_string(), "device_fault");
        assert_eq!(ErrorKind::Communication.to_string(), "communication");
    }

    #[test]
    fn test_handshake_inherits_transport_kind() {
        let err = ConnectError::Handshake(TransportError::Timeout(Duration::from_secs(1)));
        assert_eq!(err.kind(), ErrorKind::Communication);

        let err = ConnectError::VerificationFailed {
            expected: "XERYON".into(),
            received: "ACME LASER".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.to_string().contains("expected 'XERYON'"));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Warning);
        assert_eq!(ErrorKind::DeviceFault.default_severity(), Severity::Critical);
        assert_eq!(TransportError::NotConnected.severity(), Severity::Warning);
    }

    #[test]
    fn test_io_error_becomes_link_error() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged");
        let err: TransportError = io.into();
        assert!(matches!(err, TransportError::LinkError(ref m) if m.contains("unplugged")));
    }
}
