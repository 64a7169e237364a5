//! Device protocol against the simulated controller

use std::sync::Arc;
use std::time::Duration;

use flowrig_core::device::{
    Command, DeviceError, FlowDevice, FlowRate, HeaterChannel, HeaterTarget, Pump, Valve, ValveId,
    ValvePosition,
};
use flowrig_core::sim::SimulatedDevice;
use flowrig_core::status::{RunState, StatusDecodeError, StatusReading};
use flowrig_core::timing::ManualClock;
use flowrig_core::transport::{Transport, TransportError, TransportState};
use pretty_assertions::assert_eq;

fn connect(sim: &SimulatedDevice) -> (FlowDevice, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let mut transport = Transport::new(sim.connector());
    transport.set_timeout(Duration::from_millis(25));
    transport.set_poll_interval(Duration::from_millis(1));
    let device = FlowDevice::connect(transport, clock.clone()).unwrap();
    (device, clock)
}

#[test]
fn test_switch_valve_is_reflected_in_status() {
    let sim = SimulatedDevice::new();
    let (mut device, _clock) = connect(&sim);

    device.switch_valve(ValveId::new(5).unwrap()).unwrap();
    let status = device.get_status().unwrap().into_result().unwrap();

    assert_eq!(status.front_panel_leds, "0000010000");
    let active: Vec<usize> = status
        .front_panel_leds
        .char_indices()
        .filter(|(_, c)| *c == '1')
        .map(|(i, _)| i)
        .collect();
    assert_eq!(active, vec![5]);

    let valve = ValveId::new(5).unwrap();
    assert_eq!(valve.valve(), Valve::TopInjection);
    assert_eq!(valve.position(), ValvePosition::Switched);
}

#[test]
fn test_switching_partner_clears_previous_position() {
    let sim = SimulatedDevice::new();
    let (mut device, _clock) = connect(&sim);

    let switched = ValveId::for_valve(Valve::Collection, ValvePosition::Switched);
    device.switch_valve(switched).unwrap();
    device.switch_valve(switched.partner()).unwrap();

    let status = device.get_status().unwrap().into_result().unwrap();
    assert_eq!(status.front_panel_leds, "0000000010");
}

#[test]
fn test_start_flow_and_heaters() {
    let sim = SimulatedDevice::new();
    let (mut device, _clock) = connect(&sim);

    assert_eq!(device.start().unwrap(), "OK");
    device
        .set_flow_rate(Pump::B, FlowRate::from_ml_per_min(0.25).unwrap())
        .unwrap();
    device
        .set_temperature(
            HeaterChannel::new(0).unwrap(),
            HeaterTarget::celsius(120).unwrap(),
        )
        .unwrap();

    let status = device.get_status().unwrap().into_result().unwrap();
    assert_eq!(status.run_state, RunState::Running);
    assert_eq!(status.pump_a_flow_rate, 0.0);
    assert_eq!(status.pump_b_flow_rate, 250.0);
    assert_eq!(status.temperature_set_points, [120, -1000, -1000, -1000]);
    assert_eq!(status.heater_off(0), Some(false));
    assert_eq!(status.heater_off(1), Some(true));

    assert_eq!(sim.commands(), vec!["PN", "FR 1 250", "R4 ST 0 120", "GA"]);
}

#[test]
fn test_heater_off_uses_sentinel() {
    let sim = SimulatedDevice::new();
    let (mut device, _clock) = connect(&sim);

    device
        .set_temperature(HeaterChannel::new(3).unwrap(), HeaterTarget::Off)
        .unwrap();
    assert_eq!(sim.commands(), vec!["R4 ST 3 -1000"]);
}

#[test]
fn test_validation_rejects_before_any_byte_is_sent() {
    let sim = SimulatedDevice::new();
    let (device, _clock) = connect(&sim);

    assert!(matches!(
        ValveId::new(10),
        Err(DeviceError::InvalidValve(10))
    ));
    assert!(matches!(
        HeaterChannel::new(4),
        Err(DeviceError::InvalidHeaterChannel(4))
    ));
    assert!(matches!(
        HeaterTarget::celsius(300),
        Err(DeviceError::TemperatureOutOfRange(300))
    ));
    assert!(FlowRate::from_ml_per_min(-0.5).is_err());

    assert!(sim.commands().is_empty());
    assert_eq!(device.transport().stats().tx_frames, 0);
}

#[test]
fn test_stop_settles_even_without_acknowledgement() {
    let sim = SimulatedDevice::new().silent_after(0);
    let (mut device, clock) = connect(&sim);

    let err = device.stop().unwrap_err();
    assert!(matches!(
        err,
        DeviceError::Transport(TransportError::Timeout { .. })
    ));
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(5)]);
    assert_eq!(sim.commands(), vec!["PF"]);
}

#[test]
fn test_stop_settle_is_configurable() {
    let sim = SimulatedDevice::new();
    let (mut device, clock) = connect(&sim);
    device.set_stop_settle(Duration::from_secs(2));

    device.shutdown().unwrap();
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(2)]);
    assert!(!device.is_open());

    // Closing again is harmless
    device.close();
    device.shutdown().unwrap();
    assert_eq!(sim.count("PF"), 1);
}

#[test]
fn test_rejected_command_is_an_error() {
    let sim = SimulatedDevice::new().reject_verb("FR");
    let (mut device, _clock) = connect(&sim);

    let err = device
        .set_flow_rate(Pump::A, FlowRate::from_ml_per_min(1.0).unwrap())
        .unwrap_err();
    match err {
        DeviceError::Rejected { command, reply } => {
            assert_eq!(command, "FR 0 1000");
            assert_eq!(reply, "ERROR");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_raw_commands_pass_through() {
    let sim = SimulatedDevice::new();
    let (mut device, _clock) = connect(&sim);

    assert_eq!(device.send_raw("XX 1").unwrap(), "ERROR");
    let parsed: Command = "KP 4".parse().unwrap();
    assert_eq!(device.command(&parsed).unwrap(), "OK");
}

#[test]
fn test_trickled_reply_is_reassembled() {
    let sim = SimulatedDevice::new().trickle();
    let (mut device, _clock) = connect(&sim);

    let reading = device.get_status().unwrap();
    assert!(reading.is_valid(), "{reading}");
    assert_eq!(device.transport().stats().rx_frames, 1);
}

#[test]
fn test_corrupt_status_is_a_value_not_an_error() {
    let sim = SimulatedDevice::new().corrupt_status(1);
    let (mut device, _clock) = connect(&sim);

    match device.get_status().unwrap() {
        StatusReading::Invalid { error, .. } => {
            assert!(matches!(
                error,
                StatusDecodeError::FieldCount { expected: 11, .. }
            ));
        }
        StatusReading::Valid(status) => panic!("expected invalid frame, got {status}"),
    }
    assert!(device.get_status().unwrap().is_valid());
}

#[test]
fn test_noisy_line_never_raises() {
    let sim = SimulatedDevice::new().with_line_noise(0.5, 7);
    let (mut device, _clock) = connect(&sim);

    for _ in 0..20 {
        let reading = device.get_status().unwrap();
        if let Some(diagnostic) = reading.diagnostic() {
            assert!(!diagnostic.is_empty());
        }
    }
}

#[test]
fn test_silence_is_a_retryable_timeout() {
    let sim = SimulatedDevice::new().silent_after(0);
    let (mut device, _clock) = connect(&sim);

    let err = device.get_status().unwrap_err();
    match err {
        DeviceError::Transport(e) => {
            assert!(e.is_retryable());
            assert!(!e.is_disconnect());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(device.transport().state(), TransportState::Open);
    assert_eq!(device.transport().stats().timeouts, 1);
}

#[test]
fn test_unplugged_link_fails_the_transport() {
    let sim = SimulatedDevice::new().disconnect_after(1);
    let (mut device, _clock) = connect(&sim);

    device.start().unwrap();
    let err = device.get_status().unwrap_err();
    assert!(matches!(
        err,
        DeviceError::Transport(TransportError::Disconnected(_))
    ));
    assert_eq!(device.transport().state(), TransportState::Failed);

    assert!(matches!(
        device.get_status(),
        Err(DeviceError::Transport(TransportError::NotOpen))
    ));
}
