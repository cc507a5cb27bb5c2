use std::io;

use thiserror::Error;

use crate::faults::Fault;

/// Failure of a single register read or write.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no response before the timeout expired")]
    Timeout,
    #[error("serial i/o failed: {0}")]
    Io(#[source] io::Error),
    #[error("CRC mismatch (computed {expected:#06x}, received {actual:#06x})")]
    Crc { expected: u16, actual: u16 },
    #[error("malformed response: {0}")]
    Malformed(&'static str),
    #[error("device rejected function {function:#04x} with exception code {code:#04x}")]
    Exception { function: u8, code: u8 },
    #[error("connection is not open")]
    Closed,
}

impl TransportError {
    /// Whether repeating the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout
                | TransportError::Io(_)
                | TransportError::Crc { .. }
                | TransportError::Malformed(_)
        )
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout,
            io::ErrorKind::UnexpectedEof => TransportError::Malformed("response truncated"),
            _ => TransportError::Io(err),
        }
    }
}

/// The transport could not be opened; the controller stays unconnected.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid connection parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("no USB serial adapter found for port \"auto\"")]
    NoPortFound,
    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },
}

/// The device could not be verified as ready for motion.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("device reports alarm {0}")]
    Fault(Fault),
    #[error("link check failed: {0}")]
    Transport(#[from] TransportError),
}

/// Failure of a speed or direction operation.
#[derive(Debug, Error)]
pub enum JogError {
    #[error("motion refused while alarm {0} is latched")]
    Faulted(Fault),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
