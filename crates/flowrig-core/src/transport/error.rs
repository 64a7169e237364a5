//! Transport errors

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while exchanging frames with the controller
#[derive(Error, Debug)]
pub enum TransportError {
    /// Opening or configuring the port failed
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// No terminator arrived before the reply deadline
    #[error("No complete reply within {}ms", waited.as_millis())]
    Timeout {
        /// Deadline that elapsed
        waited: Duration,
    },

    /// The link went away; the transport must be reopened
    #[error("Link disconnected: {0}")]
    Disconnected(String),

    /// Operation attempted before `open` or after `close`
    #[error("Transport is not open")]
    NotOpen,

    /// Named port is not present
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Inbound bytes exceeded the frame limit
    #[error("Reply exceeded {0} bytes without a terminator")]
    FrameOverflow(usize),

    /// Other link I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// True when the same request may simply be sent again.
    ///
    /// A timeout leaves the link usable; everything else needs the transport
    /// to be reopened first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout { .. } | TransportError::FrameOverflow(_)
        )
    }

    /// True when the underlying link is gone
    pub fn is_disconnect(&self) -> bool {
        matches!(self, TransportError::Disconnected(_))
    }
}

impl From<serialport::Error> for TransportError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::NoDevice => TransportError::PortNotFound(e.to_string()),
            _ => TransportError::SerialError(e.to_string()),
        }
    }
}
