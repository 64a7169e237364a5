//! Typed command arguments
//!
//! Every range check on hardware addresses and set points lives here, so an
//! out-of-range value is rejected before a command is built.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::DeviceError;
use crate::status::HEATER_OFF;

/// Pump channel on the R2 module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pump {
    /// Pump A, channel 0
    A,
    /// Pump B, channel 1
    B,
}

impl Pump {
    /// Both pumps, in channel order
    pub const BOTH: [Pump; 2] = [Pump::A, Pump::B];

    /// Wire channel number
    pub fn channel(&self) -> u8 {
        match self {
            Pump::A => 0,
            Pump::B => 1,
        }
    }

    /// Pump for a wire channel number
    pub fn from_channel(channel: u8) -> Option<Self> {
        match channel {
            0 => Some(Pump::A),
            1 => Some(Pump::B),
            _ => None,
        }
    }
}

impl fmt::Display for Pump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pump::A => f.write_str("A"),
            Pump::B => f.write_str("B"),
        }
    }
}

impl FromStr for Pump {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" | "0" => Ok(Pump::A),
            "B" | "1" => Ok(Pump::B),
            _ => Err(DeviceError::InvalidPump(s.to_string())),
        }
    }
}

/// Physical valve on the controller; each has two switch positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Valve {
    /// Reagent/solvent valve feeding pump A (ids 0/1)
    PumpA,
    /// Reagent/solvent valve feeding pump B (ids 2/3)
    PumpB,
    /// Top injection loop (ids 4/5)
    TopInjection,
    /// Bottom injection loop (ids 6/7)
    BottomInjection,
    /// Waste/collection (ids 8/9)
    Collection,
}

/// Position of a [`Valve`]: even ids select `Normal`, odd ids `Switched`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValvePosition {
    /// Even valve id
    Normal,
    /// Odd valve id
    Switched,
}

/// Valve id as sent with `KP`, 0-9
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ValveId(u8);

impl ValveId {
    /// Highest valid id
    pub const MAX: u8 = 9;

    /// Validate a raw id
    pub fn new(id: u8) -> Result<Self, DeviceError> {
        if id <= Self::MAX {
            Ok(Self(id))
        } else {
            Err(DeviceError::InvalidValve(id))
        }
    }

    /// Id for a valve in a given position
    pub fn for_valve(valve: Valve, position: ValvePosition) -> Self {
        let base = match valve {
            Valve::PumpA => 0,
            Valve::PumpB => 2,
            Valve::TopInjection => 4,
            Valve::BottomInjection => 6,
            Valve::Collection => 8,
        };
        match position {
            ValvePosition::Normal => Self(base),
            ValvePosition::Switched => Self(base + 1),
        }
    }

    /// Raw id
    pub fn get(&self) -> u8 {
        self.0
    }

    /// Valve this id addresses
    pub fn valve(&self) -> Valve {
        match self.0 / 2 {
            0 => Valve::PumpA,
            1 => Valve::PumpB,
            2 => Valve::TopInjection,
            3 => Valve::BottomInjection,
            _ => Valve::Collection,
        }
    }

    /// Position this id selects
    pub fn position(&self) -> ValvePosition {
        if self.0 % 2 == 0 {
            ValvePosition::Normal
        } else {
            ValvePosition::Switched
        }
    }

    /// The other position of the same valve
    pub fn partner(&self) -> Self {
        Self(self.0 ^ 1)
    }
}

impl TryFrom<u8> for ValveId {
    type Error = DeviceError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl From<ValveId> for u8 {
    fn from(id: ValveId) -> u8 {
        id.0
    }
}

impl fmt::Display for ValveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// R4 heater channel, 0-3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct HeaterChannel(u8);

impl HeaterChannel {
    /// Highest valid channel
    pub const MAX: u8 = 3;

    /// Validate a raw channel
    pub fn new(channel: u8) -> Result<Self, DeviceError> {
        if channel <= Self::MAX {
            Ok(Self(channel))
        } else {
            Err(DeviceError::InvalidHeaterChannel(channel))
        }
    }

    /// Raw channel
    pub fn get(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for HeaterChannel {
    type Error = DeviceError;

    fn try_from(channel: u8) -> Result<Self, Self::Error> {
        Self::new(channel)
    }
}

impl From<HeaterChannel> for u8 {
    fn from(channel: HeaterChannel) -> u8 {
        channel.0
    }
}

impl fmt::Display for HeaterChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Heater set point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeaterTarget {
    /// Heater off (sent as -1000)
    Off,
    /// Target temperature in °C, 20-250
    Celsius(i32),
}

impl HeaterTarget {
    /// Lowest settable temperature
    pub const MIN_CELSIUS: i32 = 20;
    /// Highest settable temperature
    pub const MAX_CELSIUS: i32 = 250;

    /// Validate a temperature in °C
    pub fn celsius(target: i32) -> Result<Self, DeviceError> {
        if (Self::MIN_CELSIUS..=Self::MAX_CELSIUS).contains(&target) {
            Ok(HeaterTarget::Celsius(target))
        } else {
            Err(DeviceError::TemperatureOutOfRange(target))
        }
    }

    /// Interpret a wire value, accepting the off sentinel
    pub fn from_wire(value: i32) -> Result<Self, DeviceError> {
        if value == HEATER_OFF {
            Ok(HeaterTarget::Off)
        } else {
            Self::celsius(value)
        }
    }

    /// Value sent with `R4 ST`
    pub fn wire_value(&self) -> i32 {
        match self {
            HeaterTarget::Off => HEATER_OFF,
            HeaterTarget::Celsius(t) => *t,
        }
    }
}

impl fmt::Display for HeaterTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_value())
    }
}

impl FromStr for HeaterTarget {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("off") {
            return Ok(HeaterTarget::Off);
        }
        let value: i32 = s
            .parse()
            .map_err(|_| DeviceError::UnknownCommand(format!("temperature '{s}'")))?;
        Self::from_wire(value)
    }
}

/// Liquid flow rate, stored in µL/min
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct FlowRate(f64);

impl FlowRate {
    /// No flow
    pub const ZERO: FlowRate = FlowRate(0.0);

    /// Validate a rate in µL/min
    pub fn from_ul_per_min(rate: f64) -> Result<Self, DeviceError> {
        if rate.is_finite() && rate >= 0.0 {
            Ok(Self(rate))
        } else {
            Err(DeviceError::InvalidFlowRate(rate))
        }
    }

    /// Validate a rate in mL/min
    pub fn from_ml_per_min(rate: f64) -> Result<Self, DeviceError> {
        if !rate.is_finite() || rate < 0.0 {
            return Err(DeviceError::InvalidFlowRate(rate));
        }
        Self::from_ul_per_min(rate * 1000.0)
    }

    /// Rate in µL/min
    pub fn ul_per_min(&self) -> f64 {
        self.0
    }

    /// Rate in mL/min
    pub fn ml_per_min(&self) -> f64 {
        self.0 / 1000.0
    }

    /// Whole µL/min as sent with `FR`, rounded to nearest
    pub fn wire_value(&self) -> u64 {
        self.0.round() as u64
    }

    /// True for a zero rate
    pub fn is_zero(&self) -> bool {
        self.0 == 0.0
    }
}

impl fmt::Display for FlowRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_value())
    }
}
