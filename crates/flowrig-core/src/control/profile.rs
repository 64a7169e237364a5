//! Flow profiles
//!
//! Ramps and sweeps compile to a flat list of [`Step`]s that the sequencer
//! executes in order. Profiles are built per run and not persisted.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::SequenceError;
use crate::device::{FlowRate, Pump, Valve, ValveId, ValvePosition};

/// Default interval between ramp set points
pub const DEFAULT_RAMP_STEP: Duration = Duration::from_secs(15);

/// Default hold after the first ramp set point
pub const DEFAULT_RAMP_SETTLE: Duration = Duration::from_secs(60);

/// One action in a profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Step {
    /// Switch a valve
    SwitchValve(ValveId),
    /// Set one pump's flow rate
    SetFlow {
        /// Target pump
        pump: Pump,
        /// Rate to apply
        rate: FlowRate,
    },
    /// Wait; the device is polled for faults afterwards
    Hold(Duration),
    /// Diagnostic message, no device traffic
    Report(String),
}

/// Executable sequence of steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowProfile {
    /// Name used in logs and run-log file names
    pub name: String,
    /// Steps in execution order
    pub steps: Vec<Step>,
}

impl FlowProfile {
    /// Empty profile
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Append a step
    pub fn push(&mut self, step: Step) -> &mut Self {
        self.steps.push(step);
        self
    }

    /// Sum of all holds
    pub fn total_hold(&self) -> Duration {
        self.steps
            .iter()
            .filter_map(|s| match s {
                Step::Hold(d) => Some(*d),
                _ => None,
            })
            .sum()
    }

    /// Flow rates issued, in order
    pub fn flow_settings(&self) -> Vec<(Pump, FlowRate)> {
        self.steps
            .iter()
            .filter_map(|s| match s {
                Step::SetFlow { pump, rate } => Some((*pump, *rate)),
                _ => None,
            })
            .collect()
    }
}

/// A timed flow set point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SetPoint {
    /// Offset from the start of the ramp
    pub offset: Duration,
    /// Rate to apply
    pub rate: FlowRate,
}

/// Linear flow-rate ramp on one pump
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RampProfile {
    /// Pump being ramped
    pub pump: Pump,
    /// Rate at t = 0
    pub start: FlowRate,
    /// Rate at t = duration
    pub end: FlowRate,
    /// Ramp length
    pub duration: Duration,
    /// Interval between set points
    pub step: Duration,
    /// Hold after the first set point before stepping begins
    pub settle: Duration,
    /// Valve set before the ramp
    pub valve_during: ValveId,
    /// Valve restored after the ramp
    pub valve_after: ValveId,
}

impl RampProfile {
    /// Ramp pump A between two rates in mL/min with default timing and
    /// valves (1 during, 0 after).
    pub fn new(
        start_ml_min: f64,
        end_ml_min: f64,
        duration: Duration,
    ) -> Result<Self, SequenceError> {
        Ok(Self {
            pump: Pump::A,
            start: FlowRate::from_ml_per_min(start_ml_min)?,
            end: FlowRate::from_ml_per_min(end_ml_min)?,
            duration,
            step: DEFAULT_RAMP_STEP,
            settle: DEFAULT_RAMP_SETTLE,
            valve_during: ValveId::for_valve(Valve::PumpA, ValvePosition::Switched),
            valve_after: ValveId::for_valve(Valve::PumpA, ValvePosition::Normal),
        })
    }

    /// Use a different pump
    pub fn with_pump(mut self, pump: Pump) -> Self {
        self.pump = pump;
        self
    }

    /// Use a different step interval
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    /// Use a different initial settle hold
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Use different valve positions
    pub fn with_valves(mut self, during: ValveId, after: ValveId) -> Self {
        self.valve_during = during;
        self.valve_after = after;
        self
    }

    /// Evenly spaced set points from start to end.
    ///
    /// `floor(duration / step) + 1` points, spread over the whole duration.
    /// A ramp shorter than one step is a single point at the start rate.
    pub fn set_points(&self) -> Result<Vec<SetPoint>, SequenceError> {
        if self.step.is_zero() {
            return Err(SequenceError::InvalidProfile(
                "ramp step must be non-zero".into(),
            ));
        }
        let total = self.duration.as_secs_f64();

        // Epsilon keeps exact multiples (600 / 15) from flooring one short
        let count = ((total / self.step.as_secs_f64()) + 1e-9).floor() as usize + 1;
        if count == 1 {
            return Ok(vec![SetPoint {
                offset: Duration::ZERO,
                rate: self.start,
            }]);
        }
        let last = (count - 1) as f64;

        let f0 = self.start.ul_per_min();
        let f1 = self.end.ul_per_min();
        (0..count)
            .map(|i| {
                let frac = i as f64 / last;
                let rate = if i == count - 1 {
                    self.end
                } else {
                    FlowRate::from_ul_per_min(f0 + (f1 - f0) * frac)?
                };
                Ok(SetPoint {
                    offset: Duration::from_secs_f64(total * i as f64 / last),
                    rate,
                })
            })
            .collect()
    }

    /// Compile to steps: set valve, apply the first point, settle, then one
    /// point per interval, then restore the valve.
    pub fn compile(&self) -> Result<FlowProfile, SequenceError> {
        let points = self.set_points()?;
        let mut profile = FlowProfile::new("ramp");
        profile.push(Step::Report(format!(
            "ramp pump {} from {} to {} µL/min over {}s in {} set points",
            self.pump,
            self.start,
            self.end,
            self.duration.as_secs_f64(),
            points.len()
        )));
        profile.push(Step::SwitchValve(self.valve_during));

        let mut iter = points.iter();
        if let Some(first) = iter.next() {
            profile.push(Step::SetFlow {
                pump: self.pump,
                rate: first.rate,
            });
            profile.push(Step::Hold(self.settle));
        }
        for point in iter {
            profile.push(Step::SetFlow {
                pump: self.pump,
                rate: point.rate,
            });
            profile.push(Step::Hold(self.step));
        }

        profile.push(Step::SwitchValve(self.valve_after));
        Ok(profile)
    }
}

/// Two-phase sweep: hold at the start rate long enough to pick up a sample
/// volume, then step to the end rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepProfile {
    /// Rate on both pumps during pickup
    pub start: FlowRate,
    /// Rate on both pumps after pickup
    pub end: FlowRate,
    /// Volume to pick up, mL
    pub pickup_volume_ml: f64,
    /// Reactor volume, mL
    pub reactor_volume_ml: f64,
    /// Valves switched before pickup
    pub collect_valves: Vec<ValveId>,
    /// Valves switched after stepping to the end rate
    pub release_valves: Vec<ValveId>,
}

/// Timing derived from a sweep
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Hold at the start rate
    pub pickup_time: Duration,
    /// Reactor residence time at the start rate
    pub min_residence: Duration,
    /// Reactor residence time at the end rate; `None` when the end rate is zero
    pub max_residence: Option<Duration>,
}

fn minutes(volume_ml: f64, rate: FlowRate) -> Option<Duration> {
    let ml_min = rate.ml_per_min();
    if ml_min <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(volume_ml / ml_min * 60.0).ok()
}

impl SweepProfile {
    /// Sweep between two rates in mL/min, switching valves 1/3 for pickup and
    /// 0/2 afterwards.
    pub fn new(
        start_ml_min: f64,
        end_ml_min: f64,
        pickup_volume_ml: f64,
        reactor_volume_ml: f64,
    ) -> Result<Self, SequenceError> {
        let volumes = [
            ("pickup volume", pickup_volume_ml),
            ("reactor volume", reactor_volume_ml),
        ];
        for (name, v) in volumes {
            if !v.is_finite() || v < 0.0 {
                return Err(SequenceError::InvalidProfile(format!(
                    "{name} must be non-negative, got {v}"
                )));
            }
        }
        let start = FlowRate::from_ml_per_min(start_ml_min)?;
        if start.is_zero() {
            return Err(SequenceError::InvalidProfile(
                "sweep start rate must be non-zero".into(),
            ));
        }

        Ok(Self {
            start,
            end: FlowRate::from_ml_per_min(end_ml_min)?,
            pickup_volume_ml,
            reactor_volume_ml,
            collect_valves: vec![
                ValveId::for_valve(Valve::PumpA, ValvePosition::Switched),
                ValveId::for_valve(Valve::PumpB, ValvePosition::Switched),
            ],
            release_valves: vec![
                ValveId::for_valve(Valve::PumpA, ValvePosition::Normal),
                ValveId::for_valve(Valve::PumpB, ValvePosition::Normal),
            ],
        })
    }

    /// Pickup hold and residence times
    pub fn report(&self) -> Result<SweepReport, SequenceError> {
        let invalid = || SequenceError::InvalidProfile("sweep timing out of range".into());
        Ok(SweepReport {
            pickup_time: minutes(self.pickup_volume_ml, self.start).ok_or_else(invalid)?,
            min_residence: minutes(self.reactor_volume_ml, self.start).ok_or_else(invalid)?,
            max_residence: minutes(self.reactor_volume_ml, self.end),
        })
    }

    /// Compile to steps
    pub fn compile(&self) -> Result<FlowProfile, SequenceError> {
        let report = self.report()?;
        let mut profile = FlowProfile::new("sweep");

        for valve in &self.collect_valves {
            profile.push(Step::SwitchValve(*valve));
        }
        for pump in Pump::BOTH {
            profile.push(Step::SetFlow {
                pump,
                rate: self.start,
            });
        }
        profile.push(Step::Report(format!(
            "min residence time {:.2} min",
            report.min_residence.as_secs_f64() / 60.0
        )));
        profile.push(Step::Report(format!(
            "holding {:.2} min for pickup",
            report.pickup_time.as_secs_f64() / 60.0
        )));
        profile.push(Step::Hold(report.pickup_time));

        for pump in Pump::BOTH {
            profile.push(Step::SetFlow {
                pump,
                rate: self.end,
            });
        }
        if let Some(max) = report.max_residence {
            profile.push(Step::Report(format!(
                "max residence time {:.2} min",
                max.as_secs_f64() / 60.0
            )));
        }
        for valve in &self.release_valves {
            profile.push(Step::SwitchValve(*valve));
        }
        Ok(profile)
    }
}
