use std::time::Duration;
use thiserror::Error;

/// Error type for every fallible operation of the scanner.
///
/// Pre-flight validation failures are not errors, they are reported through
/// [`crate::validate::ValidationResult`]. A verdict message that cannot be
/// extracted from a block page is not an error either.
#[derive(Error, Debug)]
pub enum Error {
    /// Required settings are missing or malformed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Address resolution or TCP connect failed.
    #[error("Connection error: {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// A socket read or write failed after the connection was established.
    #[error("Network error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking socket operation exceeded its configured timeout.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Malformed response framing.
    #[error("ICAP protocol error: {0}")]
    Protocol(String),

    /// The peer kept sending without producing the expected terminator.
    #[error("response exceeded maximum size of {limit} bytes")]
    ResponseTooLarge { limit: usize },

    /// The ICAP status code is missing or not one this client acts on.
    #[error("unrecognized or missing status code in response header: {0}")]
    UnrecognizedStatus(String),

    /// Attempted to send an empty payload.
    #[error("Invalid file size: payload is empty")]
    EmptyPayload,
}

impl Error {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub(crate) fn connect(addr: impl ToString, source: std::io::Error) -> Self {
        Self::Connection {
            addr: addr.to_string(),
            source,
        }
    }

    /// Map an I/O error from a socket with the given timeout applied.
    ///
    /// Blocking sockets report an elapsed timeout as `WouldBlock` on Unix and
    /// `TimedOut` on Windows.
    pub(crate) fn from_io(err: std::io::Error, timeout: Option<Duration>) -> Self {
        match (err.kind(), timeout) {
            (std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut, Some(d)) => {
                Self::Timeout(d)
            }
            _ => Self::Io(err),
        }
    }

    /// Address, connect, socket and timeout failures.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Io(_) | Self::Timeout(_)
        )
    }

    /// Framing and status-code failures.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_) | Self::ResponseTooLarge { .. } | Self::UnrecognizedStatus(_)
        )
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Result alias used throughout the crate.
pub type IcapResult<T> = Result<T, Error>;

/// Build an [`Error::Protocol`] with `format!` syntax.
#[macro_export]
macro_rules! icap_protocol_error {
    ($($arg:tt)*) => {
        $crate::error::Error::protocol(format!($($arg)*))
    };
}

/// Build an [`Error::Configuration`] with `format!` syntax.
#[macro_export]
macro_rules! icap_config_error {
    ($($arg:tt)*) => {
        $crate::error::Error::configuration(format!($($arg)*))
    };
}
