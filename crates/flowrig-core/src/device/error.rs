//! Device protocol errors

use thiserror::Error;

use crate::transport::TransportError;

/// Errors raised by device operations
///
/// Validation variants are produced before anything is written to the link.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The link failed or timed out
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Valve ids are 0-9
    #[error("Invalid valve id {0}: expected 0-9")]
    InvalidValve(u8),

    /// Heater channels are 0-3
    #[error("Invalid heater channel {0}: expected 0-3")]
    InvalidHeaterChannel(u8),

    /// Temperature outside 20-250 °C that is not the off sentinel
    #[error("Temperature target {0} out of range: expected 20-250 °C or off")]
    TemperatureOutOfRange(i32),

    /// Negative or non-finite flow rate
    #[error("Invalid flow rate {0}: must be finite and non-negative")]
    InvalidFlowRate(f64),

    /// Pump name or channel other than A/B
    #[error("Invalid pump '{0}': expected A or B")]
    InvalidPump(String),

    /// The controller answered `ERROR`
    #[error("Controller rejected '{command}': {reply}")]
    Rejected {
        /// Wire text that was sent
        command: String,
        /// Reply line as received
        reply: String,
    },

    /// Text that does not parse as a controller command
    #[error("Unrecognised command: '{0}'")]
    UnknownCommand(String),
}

impl DeviceError {
    /// Raised at the call boundary without touching the device
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DeviceError::InvalidValve(_)
                | DeviceError::InvalidHeaterChannel(_)
                | DeviceError::TemperatureOutOfRange(_)
                | DeviceError::InvalidFlowRate(_)
                | DeviceError::InvalidPump(_)
                | DeviceError::UnknownCommand(_)
        )
    }

    /// Timeout or disconnect on the link
    pub fn is_transport(&self) -> bool {
        matches!(self, DeviceError::Transport(_))
    }
}
