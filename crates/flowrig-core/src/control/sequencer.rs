//! Sequencer
//!
//! Runs a [`FlowProfile`] against a [`FlowDevice`], one step at a time.
//!
//! Every hold is followed by a status poll. A corrupt frame is logged and
//! skipped; a fault state ends the run. Any failed command, a fault, or a
//! cancellation request ends the run with exactly one best-effort `stop()`.

use std::sync::Arc;
use std::time::Duration;

use super::profile::{FlowProfile, RampProfile, Step, SweepProfile};
use super::runlog::{RunEvent, RunLog};
use super::SequenceError;
use crate::device::{DeviceError, FlowDevice, HeaterChannel, HeaterTarget};
use crate::status::{StatusReading, SystemStatus};
use crate::timing::{wait_cancellable, CancelToken, Clock};

/// Default slice length for cancellable holds
pub const DEFAULT_CANCEL_POLL: Duration = Duration::from_millis(500);

/// Sequencer behaviour
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerOptions {
    /// Longest uninterrupted wait inside a hold
    pub cancel_poll: Duration,
    /// Poll `GA` after every hold
    pub poll_status: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            cancel_poll: DEFAULT_CANCEL_POLL,
            poll_status: true,
        }
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Name of the profile that ran
    pub profile: String,
    /// Steps completed, holds included
    pub steps_executed: usize,
    /// Flow-rate commands acknowledged
    pub set_points_applied: usize,
    /// Status polls that could not be decoded
    pub invalid_status_frames: usize,
    /// Last valid status polled during the run
    pub last_status: Option<SystemStatus>,
    /// Clock time from first step to last
    pub elapsed: Duration,
}

/// Drives timed sequences on one device
///
/// Holds the device mutably for its whole lifetime, so no other command can
/// interleave with a running sequence.
pub struct FlowController<'a> {
    device: &'a mut FlowDevice,
    clock: Arc<dyn Clock>,
    cancel: CancelToken,
    options: ControllerOptions,
    run_log: Option<RunLog>,
    started: Duration,
}

impl<'a> FlowController<'a> {
    /// Controller sharing the device's clock
    pub fn new(device: &'a mut FlowDevice) -> Self {
        let clock = device.clock();
        Self {
            device,
            clock,
            cancel: CancelToken::new(),
            options: ControllerOptions::default(),
            run_log: None,
            started: Duration::ZERO,
        }
    }

    /// Use an externally owned cancel token
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replace the default timing options
    pub fn with_options(mut self, options: ControllerOptions) -> Self {
        self.options = options;
        self
    }

    /// Record issued set points into `log`
    pub fn with_run_log(mut self, log: RunLog) -> Self {
        self.run_log = Some(log);
        self
    }

    /// Handle for requesting cancellation from another thread
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Active timing options
    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    /// Detach the run log, if any
    pub fn take_run_log(&mut self) -> Option<RunLog> {
        self.run_log.take()
    }

    /// Run a linear ramp
    pub fn ramp(&mut self, ramp: &RampProfile) -> Result<RunSummary, SequenceError> {
        let profile = ramp.compile()?;
        self.execute(&profile)
    }

    /// Run a pickup sweep
    pub fn sweep(&mut self, sweep: &SweepProfile) -> Result<RunSummary, SequenceError> {
        let report = sweep.report()?;
        tracing::info!(
            pickup_s = report.pickup_time.as_secs_f64(),
            min_residence_s = report.min_residence.as_secs_f64(),
            max_residence_s = report.max_residence.map(|d| d.as_secs_f64()),
            "sweep timing"
        );
        let profile = sweep.compile()?;
        self.execute(&profile)
    }

    /// Power-cycle the controller, then set a heater target
    pub fn set_reactor_temperature(
        &mut self,
        channel: HeaterChannel,
        target: HeaterTarget,
    ) -> Result<(), SequenceError> {
        tracing::info!(%channel, %target, "setting reactor temperature");
        self.device.stop()?;
        let started = self.device.start();
        self.guard(started)?;
        let set = self.device.set_temperature(channel, target);
        self.guard(set)?;
        Ok(())
    }

    /// Run every step of `profile` in order
    pub fn execute(&mut self, profile: &FlowProfile) -> Result<RunSummary, SequenceError> {
        self.started = self.clock.elapsed();
        let mut summary = RunSummary {
            profile: profile.name.clone(),
            ..RunSummary::default()
        };

        tracing::info!(
            profile = %profile.name,
            steps = profile.steps.len(),
            hold_s = profile.total_hold().as_secs_f64(),
            "sequence starting"
        );
        self.record(RunEvent::Note(format!("{} started", profile.name)));

        for step in &profile.steps {
            if self.cancel.is_cancelled() {
                return Err(self.abort(SequenceError::Cancelled));
            }
            self.run_step(step, &mut summary)?;
            summary.steps_executed += 1;
        }

        summary.elapsed = self.elapsed();
        tracing::info!(
            profile = %profile.name,
            elapsed_s = summary.elapsed.as_secs_f64(),
            invalid_frames = summary.invalid_status_frames,
            "sequence complete"
        );
        self.record(RunEvent::Note(format!("{} complete", profile.name)));
        Ok(summary)
    }

    fn run_step(&mut self, step: &Step, summary: &mut RunSummary) -> Result<(), SequenceError> {
        match step {
            Step::SwitchValve(valve) => {
                let result = self.device.switch_valve(*valve);
                self.guard(result)?;
                self.record(RunEvent::Valve(*valve));
            }
            Step::SetFlow { pump, rate } => {
                let result = self.device.set_flow_rate(*pump, *rate);
                self.guard(result)?;
                summary.set_points_applied += 1;
                self.record(RunEvent::Flow {
                    pump: *pump,
                    rate: *rate,
                });
            }
            Step::Hold(duration) => {
                tracing::debug!(secs = duration.as_secs_f64(), "hold");
                let finished = wait_cancellable(
                    self.clock.as_ref(),
                    *duration,
                    self.options.cancel_poll,
                    &self.cancel,
                );
                if !finished {
                    return Err(self.abort(SequenceError::Cancelled));
                }
                if self.options.poll_status {
                    self.check_status(summary)?;
                }
            }
            Step::Report(message) => {
                tracing::info!("{message}");
                self.record(RunEvent::Note(message.clone()));
            }
        }
        Ok(())
    }

    fn check_status(&mut self, summary: &mut RunSummary) -> Result<(), SequenceError> {
        let polled = self.device.get_status();
        match self.guard(polled)? {
            StatusReading::Valid(status) => {
                if status.run_state.is_fault() {
                    tracing::error!(state = %status.run_state, "device fault");
                    return Err(self.abort(SequenceError::DeviceFault(status.run_state)));
                }
                summary.last_status = Some(status);
            }
            StatusReading::Invalid { .. } => {
                // Already logged by the device; one bad frame is not a reason to stop
                summary.invalid_status_frames += 1;
            }
        }
        Ok(())
    }

    /// Abort the run on a failed command
    fn guard<T>(&mut self, result: Result<T, DeviceError>) -> Result<T, SequenceError> {
        result.map_err(|e| self.abort(SequenceError::Device(e)))
    }

    /// Stop the device once, then hand back `err`
    fn abort(&mut self, err: SequenceError) -> SequenceError {
        tracing::error!("sequence aborted: {err}");
        self.record(RunEvent::Note(format!("aborted: {err}")));
        match self.device.stop() {
            Ok(_) => tracing::info!("device stopped after abort"),
            Err(e) => tracing::warn!("best-effort stop failed: {e}"),
        }
        err
    }

    fn elapsed(&self) -> Duration {
        self.clock.elapsed().saturating_sub(self.started)
    }

    fn record(&mut self, event: RunEvent) {
        let elapsed = self.elapsed();
        if let Some(log) = self.run_log.as_mut() {
            log.record(elapsed, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{FlowRate, Pump};
    use crate::sim::SimulatedDevice;
    use crate::status::RunState;
    use crate::timing::ManualClock;
    use crate::transport::Transport;
    use pretty_assertions::assert_eq;

    fn rig(sim: &SimulatedDevice) -> (FlowDevice, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let mut transport = Transport::new(sim.connector());
        transport.set_timeout(Duration::from_millis(20));
        transport.set_poll_interval(Duration::from_millis(1));
        let device = FlowDevice::connect(transport, clock.clone()).unwrap();
        (device, clock)
    }

    fn ten_minute_ramp() -> RampProfile {
        RampProfile::new(1.0, 0.1, Duration::from_secs(600)).unwrap()
    }

    fn device_commands(sim: &SimulatedDevice) -> Vec<String> {
        sim.commands().into_iter().filter(|c| c != "GA").collect()
    }

    #[test]
    fn test_ramp_runs_to_completion() {
        let sim = SimulatedDevice::new();
        let (mut device, clock) = rig(&sim);

        let summary = FlowController::new(&mut device)
            .ramp(&ten_minute_ramp())
            .unwrap();

        assert_eq!(summary.set_points_applied, 41);
        assert_eq!(summary.invalid_status_frames, 0);
        assert_eq!(summary.elapsed, Duration::from_secs(660));
        assert_eq!(clock.total_slept(), Duration::from_secs(660));
        assert_eq!(sim.count("FR"), 41);
        assert_eq!(sim.count("GA"), 41);
        assert_eq!(sim.count("PF"), 0);

        let commands = device_commands(&sim);
        assert_eq!(commands.first().map(String::as_str), Some("KP 1"));
        assert_eq!(commands.last().map(String::as_str), Some("KP 0"));
        assert_eq!(commands[1], "FR 0 1000");
        assert_eq!(commands[41], "FR 0 100");
        assert_eq!(sim.flow_rate(Pump::A).wire_value(), 100);
    }

    #[test]
    fn test_ramp_waits_between_set_points() {
        let sim = SimulatedDevice::new();
        let (mut device, clock) = rig(&sim);
        let ramp = RampProfile::new(0.5, 1.0, Duration::from_secs(30)).unwrap();
        let options = ControllerOptions {
            cancel_poll: Duration::from_secs(3600),
            poll_status: false,
        };

        FlowController::new(&mut device)
            .with_options(options)
            .ramp(&ramp)
            .unwrap();

        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_secs(60),
                Duration::from_secs(15),
                Duration::from_secs(15),
            ]
        );
        assert_eq!(sim.count("GA"), 0);
    }

    #[test]
    fn test_timeout_mid_ramp_stops_once() {
        let sim = SimulatedDevice::new().silent_after(10);
        let (mut device, clock) = rig(&sim);

        let err = FlowController::new(&mut device)
            .ramp(&ten_minute_ramp())
            .unwrap_err();

        assert!(err.is_transport(), "unexpected error: {err}");
        assert_eq!(sim.count("PF"), 1);
        assert!(sim.count("FR") < 41);
        assert_eq!(sim.commands().last().map(String::as_str), Some("PF"));
        assert_eq!(clock.sleeps().last(), Some(&Duration::from_secs(5)));
    }

    #[test]
    fn test_fault_aborts_sequence() {
        let sim = SimulatedDevice::new().fault_after(4, RunState::PumpAOverpressure);
        let (mut device, _clock) = rig(&sim);

        let err = FlowController::new(&mut device)
            .ramp(&ten_minute_ramp())
            .unwrap_err();

        assert!(matches!(
            err,
            SequenceError::DeviceFault(RunState::PumpAOverpressure)
        ));
        assert_eq!(sim.count("PF"), 1);
        assert_eq!(sim.count("FR"), 2);
    }

    #[test]
    fn test_corrupt_frames_do_not_abort() {
        let sim = SimulatedDevice::new().corrupt_status(2);
        let (mut device, _clock) = rig(&sim);
        let ramp = RampProfile::new(1.0, 0.5, Duration::from_secs(30)).unwrap();

        let summary = FlowController::new(&mut device).ramp(&ramp).unwrap();

        assert_eq!(summary.set_points_applied, 3);
        assert_eq!(summary.invalid_status_frames, 2);
        assert!(summary.last_status.is_some());
        assert_eq!(sim.count("PF"), 0);
    }

    #[test]
    fn test_cancel_stops_device() {
        let sim = SimulatedDevice::new();
        let (mut device, clock) = rig(&sim);
        let token = CancelToken::new();
        clock.cancel_at(Duration::from_secs(100), token.clone());

        let err = FlowController::new(&mut device)
            .with_cancel(token)
            .ramp(&ten_minute_ramp())
            .unwrap_err();

        assert!(matches!(err, SequenceError::Cancelled));
        assert_eq!(sim.count("PF"), 1);
        // 100 s of holds, then the stop settle
        assert_eq!(clock.total_slept(), Duration::from_secs(105));
        assert!(!device_commands(&sim).contains(&"KP 0".to_string()));
    }

    #[test]
    fn test_cancel_before_start() {
        let sim = SimulatedDevice::new();
        let (mut device, _clock) = rig(&sim);
        let token = CancelToken::new();
        token.cancel();

        let err = FlowController::new(&mut device)
            .with_cancel(token)
            .ramp(&ten_minute_ramp())
            .unwrap_err();

        assert!(matches!(err, SequenceError::Cancelled));
        assert_eq!(sim.commands(), vec!["PF".to_string()]);
    }

    #[test]
    fn test_rejected_command_aborts() {
        let sim = SimulatedDevice::new().reject_verb("KP");
        let (mut device, _clock) = rig(&sim);

        let err = FlowController::new(&mut device)
            .ramp(&ten_minute_ramp())
            .unwrap_err();

        assert!(matches!(
            err,
            SequenceError::Device(DeviceError::Rejected { .. })
        ));
        assert_eq!(sim.commands(), vec!["KP 1".to_string(), "PF".to_string()]);
    }

    #[test]
    fn test_sweep_sequence() {
        let sim = SimulatedDevice::new();
        let (mut device, clock) = rig(&sim);
        let sweep = SweepProfile::new(1.0, 0.1, 0.5, 2.0).unwrap();

        let summary = FlowController::new(&mut device).sweep(&sweep).unwrap();

        assert_eq!(clock.total_slept(), Duration::from_secs(30));
        assert_eq!(summary.set_points_applied, 4);
        assert_eq!(
            device_commands(&sim),
            vec![
                "KP 1",
                "KP 3",
                "FR 0 1000",
                "FR 1 1000",
                "FR 0 100",
                "FR 1 100",
                "KP 0",
                "KP 2",
            ]
        );
        assert_eq!(sim.snapshot().front_panel_leds, "1010000000");
        assert_eq!(
            sim.flow_rate(Pump::B),
            FlowRate::from_ul_per_min(100.0).unwrap()
        );
    }

    #[test]
    fn test_set_reactor_temperature() {
        let sim = SimulatedDevice::new();
        let (mut device, clock) = rig(&sim);

        FlowController::new(&mut device)
            .set_reactor_temperature(
                HeaterChannel::new(2).unwrap(),
                HeaterTarget::celsius(60).unwrap(),
            )
            .unwrap();

        assert_eq!(sim.commands(), vec!["PF", "PN", "R4 ST 2 60"]);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(5)]);
        assert_eq!(sim.temperatures()[2], 60);
        assert_eq!(sim.run_state(), RunState::Running);
    }

    #[test]
    fn test_run_log_records_set_points() {
        let sim = SimulatedDevice::new();
        let (mut device, _clock) = rig(&sim);
        let ramp = RampProfile::new(1.0, 0.5, Duration::from_secs(30)).unwrap();

        let mut controller =
            FlowController::new(&mut device).with_run_log(RunLog::new("ramp"));
        controller.ramp(&ramp).unwrap();
        let log = controller.take_run_log().unwrap();

        let flows: Vec<(Duration, u64)> = log
            .entries()
            .iter()
            .filter_map(|e| match &e.event {
                RunEvent::Flow { rate, .. } => Some((e.elapsed, rate.wire_value())),
                _ => None,
            })
            .collect();
        assert_eq!(
            flows,
            vec![
                (Duration::ZERO, 1000),
                (Duration::from_secs(60), 750),
                (Duration::from_secs(75), 500),
            ]
        );
    }
}
