//! R2/R4 device client
//!
//! Owns one [`Transport`] and exposes one method per hardware capability.
//! Every call is a single synchronous exchange; the reply is an
//! acknowledgement only, so state changes must be confirmed with
//! [`FlowDevice::get_status`].

use std::sync::Arc;
use std::time::Duration;

use super::{Command, DeviceError, FlowRate, HeaterChannel, HeaterTarget, Pump, ValveId};
use crate::status::StatusReading;
use crate::timing::{Clock, SystemClock};
use crate::transport::{Terminator, Transport};

/// Wait after `PF` before the link may be closed
pub const STOP_SETTLE: Duration = Duration::from_secs(5);

/// Protocol client for one R2/R4 controller
pub struct FlowDevice {
    transport: Transport,
    clock: Arc<dyn Clock>,
    stop_settle: Duration,
}

impl FlowDevice {
    /// Wrap a transport, using the wall clock for waits
    pub fn new(transport: Transport) -> Self {
        Self::with_clock(transport, Arc::new(SystemClock::new()))
    }

    /// Wrap a transport with an explicit wait primitive
    pub fn with_clock(mut transport: Transport, clock: Arc<dyn Clock>) -> Self {
        transport.set_outbound_terminator(Terminator::CR);
        transport.set_terminator(Terminator::CRLF);
        Self {
            transport,
            clock,
            stop_settle: STOP_SETTLE,
        }
    }

    /// Wrap and open in one step
    pub fn connect(transport: Transport, clock: Arc<dyn Clock>) -> Result<Self, DeviceError> {
        let mut device = Self::with_clock(transport, clock);
        device.open()?;
        Ok(device)
    }

    /// Override the post-stop settle wait
    pub fn set_stop_settle(&mut self, settle: Duration) {
        self.stop_settle = settle;
    }

    /// Post-stop settle wait
    pub fn stop_settle(&self) -> Duration {
        self.stop_settle
    }

    /// Wait primitive shared with sequences driving this device
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Underlying transport
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Open the link
    pub fn open(&mut self) -> Result<(), DeviceError> {
        self.transport.open()?;
        Ok(())
    }

    /// Close the link. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.transport.close();
    }

    /// True while the link is open
    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Send a typed command and return the acknowledgement line
    pub fn command(&mut self, cmd: &Command) -> Result<String, DeviceError> {
        let line = cmd.to_string();
        let reply = self.transport.send(&line)?;
        if is_rejection(&reply) {
            tracing::warn!(command = %line, reply = %reply, "controller rejected command");
            return Err(DeviceError::Rejected {
                command: line,
                reply,
            });
        }
        Ok(reply)
    }

    /// Send an arbitrary console line, bypassing command validation
    pub fn send_raw(&mut self, line: &str) -> Result<String, DeviceError> {
        tracing::debug!(line, "raw command");
        Ok(self.transport.send(line)?)
    }

    /// Power on all pumps (at their last set rate) and heaters
    pub fn start(&mut self) -> Result<String, DeviceError> {
        tracing::info!("power on");
        self.command(&Command::PowerOn)
    }

    /// Power off pumps and heaters, then wait for the hardware to settle.
    ///
    /// The settle wait always runs, including when the acknowledgement read
    /// fails, and the link must not be closed before it completes.
    pub fn stop(&mut self) -> Result<String, DeviceError> {
        tracing::info!("power off");
        let result = self.command(&Command::PowerOff);
        if let Err(e) = &result {
            tracing::warn!("stop acknowledgement failed: {e}");
        }
        tracing::debug!(
            settle_ms = self.stop_settle.as_millis() as u64,
            "settling after stop"
        );
        self.clock.sleep(self.stop_settle);
        result
    }

    /// Stop, settle and close the link
    pub fn shutdown(&mut self) -> Result<(), DeviceError> {
        let result = if self.is_open() {
            self.stop().map(|_| ())
        } else {
            Ok(())
        };
        self.close();
        result
    }

    /// Set a pump's liquid flow rate
    pub fn set_flow_rate(&mut self, pump: Pump, rate: FlowRate) -> Result<String, DeviceError> {
        tracing::debug!(%pump, ul_per_min = rate.wire_value(), "set flow rate");
        self.command(&Command::SetFlowRate { pump, rate })
    }

    /// Switch a valve
    pub fn switch_valve(&mut self, valve: ValveId) -> Result<String, DeviceError> {
        tracing::debug!(%valve, "switch valve");
        self.command(&Command::SwitchValve(valve))
    }

    /// Set an R4 heater target
    pub fn set_temperature(
        &mut self,
        channel: HeaterChannel,
        target: HeaterTarget,
    ) -> Result<String, DeviceError> {
        tracing::debug!(%channel, %target, "set temperature");
        self.command(&Command::SetTemperature { channel, target })
    }

    /// Query and decode the status record.
    ///
    /// A malformed line is returned as [`StatusReading::Invalid`]; only
    /// transport failures are errors.
    pub fn get_status(&mut self) -> Result<StatusReading, DeviceError> {
        let reply = self.transport.send(&Command::GetStatus.to_string())?;
        let reading = StatusReading::from_line(&reply);
        if let StatusReading::Invalid { raw, error } = &reading {
            tracing::warn!(raw = %raw.escape_debug(), "invalid status frame: {error}");
        }
        Ok(reading)
    }
}

fn is_rejection(reply: &str) -> bool {
    reply
        .trim_start()
        .get(..5)
        .is_some_and(|head| head.eq_ignore_ascii_case("ERROR"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_detection() {
        assert!(is_rejection("ERROR"));
        assert!(is_rejection("error 3: bad argument"));
        assert!(!is_rejection("OK"));
        assert!(!is_rejection(""));
        assert!(!is_rejection("ERR"));
    }
}
