//! Status record decoder

use std::str::FromStr;

use super::{RunState, StatusDecodeError, SystemStatus, HEATER_CHANNELS};

/// Fields in one `GA` record
pub const STATUS_FIELD_COUNT: usize = 7 + HEATER_CHANNELS;

const TEMPERATURE_FIELDS: [&str; HEATER_CHANNELS] = [
    "temperature set point 1",
    "temperature set point 2",
    "temperature set point 3",
    "temperature set point 4",
];

fn parse_field<T: FromStr>(field: &'static str, value: &str) -> Result<T, StatusDecodeError> {
    value.parse().map_err(|_| StatusDecodeError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

fn parse_flow(field: &'static str, value: &str) -> Result<f64, StatusDecodeError> {
    let rate: f64 = parse_field(field, value)?;
    // "nan" and "inf" parse as f64 but are never sent by the controller
    if rate.is_finite() {
        Ok(rate)
    } else {
        Err(StatusDecodeError::InvalidNumber {
            field,
            value: value.to_string(),
        })
    }
}

/// Decode one status line.
///
/// Surrounding whitespace (including a stray terminator) is ignored. The field
/// count is fixed; short and long records are both rejected.
pub fn decode_status(line: &str) -> Result<SystemStatus, StatusDecodeError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(StatusDecodeError::Empty);
    }

    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() != STATUS_FIELD_COUNT {
        return Err(StatusDecodeError::FieldCount {
            expected: STATUS_FIELD_COUNT,
            actual: parts.len(),
        });
    }

    let run_state = parts[0]
        .parse::<u8>()
        .ok()
        .and_then(RunState::from_code)
        .ok_or_else(|| StatusDecodeError::UnknownRunState(parts[0].to_string()))?;

    let mut temperature_set_points = [0i32; HEATER_CHANNELS];
    for (i, slot) in temperature_set_points.iter_mut().enumerate() {
        *slot = parse_field(TEMPERATURE_FIELDS[i], parts[7 + i])?;
    }

    Ok(SystemStatus {
        run_state,
        pump_a_flow_rate: parse_flow("pump A flow rate", parts[1])?,
        pump_b_flow_rate: parse_flow("pump B flow rate", parts[2])?,
        airlock_numbers: (
            parse_field("airlock A", parts[3])?,
            parse_field("airlock B", parts[4])?,
        ),
        pressure_limit: parse_field("pressure limit", parts[5])?,
        front_panel_leds: parts[6].to_string(),
        temperature_set_points,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_valid_record() {
        let line = "1,200,400.5,3,4,12000,101010010111001010,20,45,60,-1000";
        let status = decode_status(line).unwrap();
        assert_eq!(
            status,
            SystemStatus {
                run_state: RunState::Running,
                pump_a_flow_rate: 200.0,
                pump_b_flow_rate: 400.5,
                airlock_numbers: (3, 4),
                pressure_limit: 12000,
                front_panel_leds: "101010010111001010".to_string(),
                temperature_set_points: [20, 45, 60, -1000],
            }
        );
    }

    #[test]
    fn test_decode_with_terminator_and_spaces() {
        let status = decode_status(" 0, 0, 0, 0, 0, 5000, 0, 20, 20, 20, 20\r\n").unwrap();
        assert_eq!(status.run_state, RunState::Off);
        assert_eq!(status.pressure_limit, 5000);
    }

    #[test]
    fn test_every_run_state_code() {
        for code in 0..8u8 {
            let line = format!("{code},0,0,0,0,0,0,20,20,20,20");
            let status = decode_status(&line).unwrap();
            assert_eq!(status.run_state.code(), code);
        }
    }

    #[test]
    fn test_record_round_trip() {
        let line = "2,1000.25,999,1,0,15000,1100,20,250,-1000,80";
        let status = decode_status(line).unwrap();
        assert_eq!(status.to_record(), line);
    }

    #[test]
    fn test_reject_empty() {
        assert_eq!(decode_status(""), Err(StatusDecodeError::Empty));
        assert_eq!(decode_status("\r\n"), Err(StatusDecodeError::Empty));
    }

    #[test]
    fn test_reject_short_record() {
        // Ten-field sample lacking one field
        let err = decode_status("0,200,400,0,0,101010010111001010,20,45,60,20").unwrap_err();
        assert_eq!(
            err,
            StatusDecodeError::FieldCount {
                expected: 11,
                actual: 10
            }
        );
    }

    #[test]
    fn test_reject_long_record() {
        let err = decode_status("0,0,0,0,0,0,0,20,20,20,20,20").unwrap_err();
        assert!(matches!(
            err,
            StatusDecodeError::FieldCount { actual: 12, .. }
        ));
    }

    #[test]
    fn test_reject_run_state_out_of_range() {
        for bad in ["8", "-1", "x", "1.0"] {
            let line = format!("{bad},0,0,0,0,0,0,20,20,20,20");
            assert_eq!(
                decode_status(&line),
                Err(StatusDecodeError::UnknownRunState(bad.to_string()))
            );
        }
    }

    #[test]
    fn test_reject_non_numeric_fields() {
        let cases = [
            ("1,abc,0,0,0,0,0,20,20,20,20", "pump A flow rate"),
            ("1,0,nan,0,0,0,0,20,20,20,20", "pump B flow rate"),
            ("1,0,0,1.5,0,0,0,20,20,20,20", "airlock A"),
            ("1,0,0,0,,0,0,20,20,20,20", "airlock B"),
            ("1,0,0,0,0,high,0,20,20,20,20", "pressure limit"),
            ("1,0,0,0,0,0,0,20,20,20,hot", "temperature set point 4"),
        ];
        for (line, field) in cases {
            match decode_status(line) {
                Err(StatusDecodeError::InvalidNumber { field: f, .. }) => assert_eq!(f, field),
                other => panic!("{line}: expected InvalidNumber, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_diagnostic_is_never_empty() {
        for line in ["", "1", "9,0,0,0,0,0,0,0,0,0,0", "1,0,0,0,0,x,0,0,0,0,0"] {
            let err = decode_status(line).unwrap_err();
            assert!(!err.to_string().is_empty());
        }
    }
}
