//! System Status
//!
//! Decoding of the `GA` status record into a [`SystemStatus`] snapshot.
//!
//! The record is a single comma-separated line:
//!
//! | # | Field                         |
//! |---|-------------------------------|
//! | 0 | run-state code (0-7)          |
//! | 1 | pump A flow rate (µL/min)     |
//! | 2 | pump B flow rate (µL/min)     |
//! | 3 | airlock count, pump A         |
//! | 4 | airlock count, pump B         |
//! | 5 | pressure limit (mbar)         |
//! | 6 | front panel LED bitmap        |
//! | 7-10 | heater set points (°C)     |
//!
//! A malformed line never raises; it yields [`StatusReading::Invalid`] with
//! the reason, so a noisy frame cannot abort a long-running sequence.

mod decoder;
mod error;

pub use decoder::{decode_status, STATUS_FIELD_COUNT};
pub use error::StatusDecodeError;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Heater set point meaning "heater off"
pub const HEATER_OFF: i32 = -1000;

/// Number of heater channels reported in the status record
pub const HEATER_CHANNELS: usize = 4;

/// Operating mode reported by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunState {
    /// Pumps and heaters off
    Off,
    /// Running normally
    Running,
    /// System overpressure
    SystemOverpressure,
    /// Pump A overpressure
    PumpAOverpressure,
    /// Pump B overpressure
    PumpBOverpressure,
    /// Underpressure (leak)
    Underpressure,
    /// Pump A underpressure
    PumpAUnderpressure,
    /// Pump B underpressure
    PumpBUnderpressure,
}

impl RunState {
    /// All states in code order
    pub const ALL: [RunState; 8] = [
        RunState::Off,
        RunState::Running,
        RunState::SystemOverpressure,
        RunState::PumpAOverpressure,
        RunState::PumpBOverpressure,
        RunState::Underpressure,
        RunState::PumpAUnderpressure,
        RunState::PumpBUnderpressure,
    ];

    /// Decode a wire code
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Wire code
    pub fn code(&self) -> u8 {
        match self {
            RunState::Off => 0,
            RunState::Running => 1,
            RunState::SystemOverpressure => 2,
            RunState::PumpAOverpressure => 3,
            RunState::PumpBOverpressure => 4,
            RunState::Underpressure => 5,
            RunState::PumpAUnderpressure => 6,
            RunState::PumpBUnderpressure => 7,
        }
    }

    /// Any over/underpressure variant
    pub fn is_fault(&self) -> bool {
        !matches!(self, RunState::Off | RunState::Running)
    }

    /// Pumps running without a fault
    pub fn is_running(&self) -> bool {
        *self == RunState::Running
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Off => "off",
            RunState::Running => "running",
            RunState::SystemOverpressure => "system overpressure",
            RunState::PumpAOverpressure => "pump A overpressure",
            RunState::PumpBOverpressure => "pump B overpressure",
            RunState::Underpressure => "underpressure (leak)",
            RunState::PumpAUnderpressure => "pump A underpressure",
            RunState::PumpBUnderpressure => "pump B underpressure",
        };
        f.write_str(s)
    }
}

/// Decoded controller state at the moment of one `GA` query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Operating mode
    pub run_state: RunState,
    /// Pump A flow rate in µL/min
    pub pump_a_flow_rate: f64,
    /// Pump B flow rate in µL/min
    pub pump_b_flow_rate: f64,
    /// Airlock counts for pumps A and B
    pub airlock_numbers: (i32, i32),
    /// Pressure limit in mbar
    pub pressure_limit: i32,
    /// Front panel LED bitmap, passed through undecoded
    pub front_panel_leds: String,
    /// Heater set points in °C, or [`HEATER_OFF`]
    pub temperature_set_points: [i32; HEATER_CHANNELS],
}

impl SystemStatus {
    /// Whether heater `channel` is switched off
    pub fn heater_off(&self, channel: usize) -> Option<bool> {
        self.temperature_set_points
            .get(channel)
            .map(|t| *t == HEATER_OFF)
    }

    /// Status record in wire form
    pub fn to_record(&self) -> String {
        let temps: Vec<String> = self
            .temperature_set_points
            .iter()
            .map(|t| t.to_string())
            .collect();
        format!(
            "{},{},{},{},{},{},{},{}",
            self.run_state.code(),
            self.pump_a_flow_rate,
            self.pump_b_flow_rate,
            self.airlock_numbers.0,
            self.airlock_numbers.1,
            self.pressure_limit,
            self.front_panel_leds,
            temps.join(",")
        )
    }
}

impl fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run state={}, pump A={} µL/min, pump B={} µL/min, pressure limit={} mbar",
            self.run_state, self.pump_a_flow_rate, self.pump_b_flow_rate, self.pressure_limit
        )
    }
}

/// Outcome of one status poll
///
/// Callers must match on the variant before reading any field.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusReading {
    /// The line decoded cleanly
    Valid(SystemStatus),
    /// The line was malformed
    Invalid {
        /// Line as received
        raw: String,
        /// Why it was rejected
        error: StatusDecodeError,
    },
}

impl StatusReading {
    /// Decode a reply line
    pub fn from_line(line: &str) -> Self {
        match decode_status(line) {
            Ok(status) => StatusReading::Valid(status),
            Err(error) => StatusReading::Invalid {
                raw: line.to_string(),
                error,
            },
        }
    }

    /// True for a cleanly decoded line
    pub fn is_valid(&self) -> bool {
        matches!(self, StatusReading::Valid(_))
    }

    /// The snapshot, if valid
    pub fn status(&self) -> Option<&SystemStatus> {
        match self {
            StatusReading::Valid(s) => Some(s),
            StatusReading::Invalid { .. } => None,
        }
    }

    /// Human-readable cause, if invalid
    pub fn diagnostic(&self) -> Option<String> {
        match self {
            StatusReading::Valid(_) => None,
            StatusReading::Invalid { error, .. } => Some(error.to_string()),
        }
    }

    /// Convert into a plain `Result`
    pub fn into_result(self) -> Result<SystemStatus, StatusDecodeError> {
        match self {
            StatusReading::Valid(s) => Ok(s),
            StatusReading::Invalid { error, .. } => Err(error),
        }
    }
}

impl fmt::Display for StatusReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusReading::Valid(s) => write!(f, "System status: {s}"),
            StatusReading::Invalid { error, .. } => write!(f, "Invalid system status: {error}"),
        }
    }
}
