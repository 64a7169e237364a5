//! Sequence errors

use thiserror::Error;

use crate::device::DeviceError;
use crate::status::RunState;

/// Reasons a timed sequence stopped early
#[derive(Error, Debug)]
pub enum SequenceError {
    /// A device command failed or was rejected
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// A status poll reported a fault run state
    #[error("Device reported fault state: {0}")]
    DeviceFault(RunState),

    /// The cancel token fired during a hold
    #[error("Sequence cancelled")]
    Cancelled,

    /// Profile parameters that cannot produce a run
    #[error("Invalid profile: {0}")]
    InvalidProfile(String),
}

impl SequenceError {
    /// Whether the failure came from the serial link
    pub fn is_transport(&self) -> bool {
        matches!(self, SequenceError::Device(e) if e.is_transport())
    }
}
