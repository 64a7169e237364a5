//! Simulated R2/R4 controller
//!
//! An in-memory [`Link`] that speaks the controller's line protocol, for
//! tests and for running sequences without hardware. It tracks power, pump,
//! valve and heater state, and can inject the failures seen on a real link:
//! silence, unplugging, fault states, corrupt frames and line noise.
//!
//! The LED field of the status record is rendered as one character per valve
//! id (`1` = that id was the last position switched to on its valve).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::device::{Command, FlowRate, Pump};
use crate::status::{RunState, SystemStatus, HEATER_CHANNELS, HEATER_OFF};
use crate::transport::{Link, Terminator, TransportError};

const VALVE_COUNT: usize = 10;

#[derive(Debug)]
struct SimState {
    pending_rx: Vec<u8>,
    tx: VecDeque<u8>,
    received: Vec<String>,
    run_state: RunState,
    latched_fault: Option<RunState>,
    rates: [FlowRate; 2],
    airlocks: (i32, i32),
    pressure_limit: i32,
    valves: [bool; VALVE_COUNT],
    temperatures: [i32; HEATER_CHANNELS],
    disconnected: bool,
    faults: FaultPlan,
    rng: StdRng,
}

#[derive(Debug, Default, Clone)]
struct FaultPlan {
    silent_after: Option<usize>,
    disconnect_after: Option<usize>,
    fault_after: Option<(usize, RunState)>,
    corrupt_status: usize,
    noise: f64,
    trickle: bool,
    reject_verb: Option<String>,
}

/// Handle to a simulated controller
///
/// Clones share the same state, so one clone can be handed to a transport
/// while the caller keeps another for inspection.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDevice {
    /// Controller powered off, pumps at zero, heaters off
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                pending_rx: Vec::new(),
                tx: VecDeque::new(),
                received: Vec::new(),
                run_state: RunState::Off,
                latched_fault: None,
                rates: [FlowRate::ZERO; 2],
                airlocks: (0, 0),
                pressure_limit: 10000,
                valves: [false; VALVE_COUNT],
                temperatures: [HEATER_OFF; HEATER_CHANNELS],
                disconnected: false,
                faults: FaultPlan::default(),
                rng: StdRng::seed_from_u64(0),
            })),
        }
    }

    /// Stop replying once `n` commands have been answered
    pub fn silent_after(self, n: usize) -> Self {
        self.lock().faults.silent_after = Some(n);
        self
    }

    /// Fail writes (as an unplugged port would) after `n` commands
    pub fn disconnect_after(self, n: usize) -> Self {
        self.lock().faults.disconnect_after = Some(n);
        self
    }

    /// Latch `state` once `n` commands have been received
    pub fn fault_after(self, n: usize, state: RunState) -> Self {
        self.lock().faults.fault_after = Some((n, state));
        self
    }

    /// Truncate the next `count` status records
    pub fn corrupt_status(self, count: usize) -> Self {
        self.lock().faults.corrupt_status = count;
        self
    }

    /// Garble each reply with the given probability, deterministically seeded
    pub fn with_line_noise(self, probability: f64, seed: u64) -> Self {
        {
            let mut state = self.lock();
            state.faults.noise = probability.clamp(0.0, 1.0);
            state.rng = StdRng::seed_from_u64(seed);
        }
        self
    }

    /// Release replies one byte per read
    pub fn trickle(self) -> Self {
        self.lock().faults.trickle = true;
        self
    }

    /// Answer `ERROR` to every command with this verb
    pub fn reject_verb(self, verb: &str) -> Self {
        self.lock().faults.reject_verb = Some(verb.to_ascii_uppercase());
        self
    }

    /// Boxed clone for a transport connector
    pub fn connector(&self) -> impl FnMut() -> Result<Box<dyn Link>, TransportError> + Send {
        let sim = self.clone();
        move || {
            sim.lock().disconnected = false;
            Ok(Box::new(sim.clone()) as Box<dyn Link>)
        }
    }

    /// Every command line received, in order
    pub fn commands(&self) -> Vec<String> {
        self.lock().received.clone()
    }

    /// Number of received commands starting with `verb`
    pub fn count(&self, verb: &str) -> usize {
        self.lock()
            .received
            .iter()
            .filter(|c| c.split_whitespace().next() == Some(verb))
            .count()
    }

    /// Current run state
    pub fn run_state(&self) -> RunState {
        self.lock().run_state
    }

    /// Current set rate of a pump
    pub fn flow_rate(&self, pump: Pump) -> FlowRate {
        self.lock().rates[pump.channel() as usize]
    }

    /// Heater set points
    pub fn temperatures(&self) -> [i32; HEATER_CHANNELS] {
        self.lock().temperatures
    }

    /// Snapshot as a `GA` would report it
    pub fn snapshot(&self) -> SystemStatus {
        self.lock().snapshot()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SimState {
    fn snapshot(&self) -> SystemStatus {
        SystemStatus {
            run_state: self.run_state,
            pump_a_flow_rate: self.rates[0].wire_value() as f64,
            pump_b_flow_rate: self.rates[1].wire_value() as f64,
            airlock_numbers: self.airlocks,
            pressure_limit: self.pressure_limit,
            front_panel_leds: self
                .valves
                .iter()
                .map(|on| if *on { '1' } else { '0' })
                .collect(),
            temperature_set_points: self.temperatures,
        }
    }

    /// Handle one CR-terminated line; `None` means no reply is sent
    fn handle_line(&mut self, line: &str) -> Option<String> {
        self.received.push(line.to_string());
        let seen = self.received.len();

        if let Some((after, fault)) = self.faults.fault_after {
            if seen > after && self.latched_fault.is_none() {
                tracing::debug!(%fault, "simulator latching fault");
                self.latched_fault = Some(fault);
                self.run_state = fault;
            }
        }

        if self.faults.silent_after.is_some_and(|n| seen > n) {
            return None;
        }

        let cmd = match line.parse::<Command>() {
            Ok(cmd) => cmd,
            Err(_) => return Some("ERROR".to_string()),
        };
        if self.faults.reject_verb.as_deref() == Some(cmd.verb()) {
            return Some("ERROR".to_string());
        }

        let reply = match cmd {
            Command::PowerOn => {
                self.run_state = self.latched_fault.unwrap_or(RunState::Running);
                "OK".to_string()
            }
            Command::PowerOff => {
                self.run_state = self.latched_fault.unwrap_or(RunState::Off);
                "OK".to_string()
            }
            Command::SetFlowRate { pump, rate } => {
                self.rates[pump.channel() as usize] = rate;
                "OK".to_string()
            }
            Command::SwitchValve(valve) => {
                self.valves[valve.get() as usize] = true;
                self.valves[valve.partner().get() as usize] = false;
                "OK".to_string()
            }
            Command::SetTemperature { channel, target } => {
                self.temperatures[channel.get() as usize] = target.wire_value();
                "OK".to_string()
            }
            Command::GetStatus => {
                let record = self.snapshot().to_record();
                if self.faults.corrupt_status > 0 {
                    self.faults.corrupt_status -= 1;
                    record[..record.len() / 2].to_string()
                } else {
                    record
                }
            }
        };
        Some(self.garble(reply))
    }

    fn garble(&mut self, reply: String) -> String {
        if self.faults.noise <= 0.0 || reply.is_empty() || !self.rng.gen_bool(self.faults.noise) {
            return reply;
        }
        let mut bytes = reply.into_bytes();
        let at = self.rng.gen_range(0..bytes.len());
        bytes[at] = b'?';
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for SimulatedDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        let delivered = state.received.len();
        if state.disconnected || state.faults.disconnect_after.is_some_and(|n| delivered >= n) {
            state.disconnected = true;
            return Err(io::Error::new(ErrorKind::BrokenPipe, "simulated unplug"));
        }

        state.pending_rx.extend_from_slice(buf);
        while let Some(end) = state.pending_rx.iter().position(|b| *b == b'\r') {
            let raw: Vec<u8> = state.pending_rx.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw[..end]).trim().to_string();
            if line.is_empty() {
                continue;
            }
            if let Some(reply) = state.handle_line(&line) {
                let framed = Terminator::crlf().frame(&reply);
                state.tx.extend(framed);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for SimulatedDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.disconnected {
            return Err(io::Error::new(ErrorKind::BrokenPipe, "simulated unplug"));
        }
        if state.tx.is_empty() {
            return Err(io::Error::new(ErrorKind::WouldBlock, "no data"));
        }
        let limit = if state.faults.trickle { 1 } else { buf.len() };
        let n = limit.min(state.tx.len());
        for (slot, byte) in buf.iter_mut().zip(state.tx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Link for SimulatedDevice {
    fn clear_input(&mut self) -> io::Result<()> {
        self.lock().tx.clear();
        Ok(())
    }

    fn name(&self) -> String {
        String::from("simulator")
    }
}
