//! Controller commands
//!
//! Wire grammar: `<VERB>[ <ARG>]*`, terminated with CR by the transport.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{DeviceError, FlowRate, HeaterChannel, HeaterTarget, Pump, ValveId};

/// Commands understood by the R2/R4 controller
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Power on pumps and heaters
    ///
    /// Command: `PN`
    PowerOn,
    /// Power off pumps and heaters
    ///
    /// Command: `PF`
    PowerOff,
    /// Set a pump's liquid flow rate. Changes the speed of a running pump but
    /// does not start a stopped one; also zeroes that channel's gas flow.
    ///
    /// Command: `FR <pump> <µL/min>`
    SetFlowRate {
        /// Pump channel
        pump: Pump,
        /// Liquid flow rate
        rate: FlowRate,
    },
    /// Switch a valve to the position named by the id
    ///
    /// Command: `KP <valve>`
    SwitchValve(ValveId),
    /// Set an R4 heater target
    ///
    /// Command: `R4 ST <channel> <target>`
    SetTemperature {
        /// Heater channel, 0-3
        channel: HeaterChannel,
        /// Target in °C, or off
        target: HeaterTarget,
    },
    /// Query the full status record
    ///
    /// Command: `GA`
    GetStatus,
}

impl Command {
    /// Two-letter verb
    pub fn verb(&self) -> &'static str {
        match self {
            Command::PowerOn => "PN",
            Command::PowerOff => "PF",
            Command::SetFlowRate { .. } => "FR",
            Command::SwitchValve(_) => "KP",
            Command::SetTemperature { .. } => "R4",
            Command::GetStatus => "GA",
        }
    }

    /// Whether the command changes device state
    pub fn is_control(&self) -> bool {
        !matches!(self, Command::GetStatus)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::PowerOn | Command::PowerOff | Command::GetStatus => f.write_str(self.verb()),
            Command::SetFlowRate { pump, rate } => write!(f, "FR {} {}", pump.channel(), rate),
            Command::SwitchValve(valve) => write!(f, "KP {}", valve),
            Command::SetTemperature { channel, target } => write!(f, "R4 ST {channel} {target}"),
        }
    }
}

fn parse_arg<T: FromStr>(line: &str, arg: Option<&str>) -> Result<T, DeviceError> {
    arg.and_then(|a| a.parse().ok())
        .ok_or_else(|| DeviceError::UnknownCommand(line.to_string()))
}

impl FromStr for Command {
    type Err = DeviceError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words
            .next()
            .ok_or_else(|| DeviceError::UnknownCommand(line.to_string()))?;

        let cmd = match verb.to_ascii_uppercase().as_str() {
            "PN" => Command::PowerOn,
            "PF" => Command::PowerOff,
            "GA" => Command::GetStatus,
            "FR" => {
                let channel: u8 = parse_arg(line, words.next())?;
                let pump = Pump::from_channel(channel)
                    .ok_or_else(|| DeviceError::InvalidPump(channel.to_string()))?;
                let rate: f64 = parse_arg(line, words.next())?;
                Command::SetFlowRate {
                    pump,
                    rate: FlowRate::from_ul_per_min(rate)?,
                }
            }
            "KP" => Command::SwitchValve(ValveId::new(parse_arg(line, words.next())?)?),
            "R4" => {
                if !words.next().is_some_and(|w| w.eq_ignore_ascii_case("ST")) {
                    return Err(DeviceError::UnknownCommand(line.to_string()));
                }
                let channel = HeaterChannel::new(parse_arg(line, words.next())?)?;
                let target = HeaterTarget::from_wire(parse_arg(line, words.next())?)?;
                Command::SetTemperature { channel, target }
            }
            _ => return Err(DeviceError::UnknownCommand(line.to_string())),
        };

        if words.next().is_some() {
            return Err(DeviceError::UnknownCommand(line.to_string()));
        }
        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_wire_text() {
        let cases = [
            (Command::PowerOn, "PN"),
            (Command::PowerOff, "PF"),
            (Command::GetStatus, "GA"),
            (
                Command::SetFlowRate {
                    pump: Pump::A,
                    rate: FlowRate::from_ml_per_min(1.0).unwrap(),
                },
                "FR 0 1000",
            ),
            (
                Command::SetFlowRate {
                    pump: Pump::B,
                    rate: FlowRate::from_ml_per_min(0.1).unwrap(),
                },
                "FR 1 100",
            ),
            (Command::SwitchValve(ValveId::new(5).unwrap()), "KP 5"),
            (
                Command::SetTemperature {
                    channel: HeaterChannel::new(3).unwrap(),
                    target: HeaterTarget::Celsius(50),
                },
                "R4 ST 3 50",
            ),
            (
                Command::SetTemperature {
                    channel: HeaterChannel::new(0).unwrap(),
                    target: HeaterTarget::Off,
                },
                "R4 ST 0 -1000",
            ),
        ];
        for (cmd, text) in cases {
            assert_eq!(cmd.to_string(), text);
            assert_eq!(text.parse::<Command>().unwrap(), cmd);
        }
    }

    #[test]
    fn test_parse_rejects_unknown() {
        let rejected = [
            "",
            "XX",
            "FR 0",
            "FR 2 100",
            "KP 10",
            "R4 GT 1 50",
            "R4 ST 1 500",
            "PN 1",
        ];
        for bad in rejected {
            assert!(bad.parse::<Command>().is_err(), "accepted '{bad}'");
        }
    }

    #[test]
    fn test_verbs() {
        assert_eq!(Command::GetStatus.verb(), "GA");
        assert!(!Command::GetStatus.is_control());
        assert!(Command::PowerOff.is_control());
    }
}
