//! # FlowRig Core Library
//!
//! Serial control of R2/R4 flow-chemistry controllers.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - A framed serial transport with separate outbound/inbound terminators
//! - Decoding of the `GA` status record
//! - A typed client for pump, valve and heater commands
//! - Timed ramp and sweep sequences with fault polling and cancellation
//! - A simulated controller for tests and dry runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use flowrig_core::prelude::*;
//! use std::time::Duration;
//!
//! let config = RigConfig::load("flowrig.json")?;
//! let transport = Transport::serial(config.connection_for("R2S")?.clone());
//! let mut device = FlowDevice::new(transport);
//! device.open()?;
//!
//! device.start()?;
//! let ramp = config.ramp_profile(1.0, 0.1, Duration::from_secs(600))?;
//! FlowController::new(&mut device).ramp(&ramp)?;
//! device.shutdown()?;
//! ```

pub mod config;
pub mod control;
pub mod device;
pub mod sim;
pub mod status;
pub mod timing;
pub mod transport;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ConfigError, Module, RigConfig};
    pub use crate::control::{
        FlowController, FlowProfile, RampProfile, RunLog, SequenceError, SweepProfile,
    };
    pub use crate::device::{
        DeviceError, FlowDevice, FlowRate, HeaterChannel, HeaterTarget, Pump, ValveId,
    };
    pub use crate::status::{RunState, StatusReading, SystemStatus};
    pub use crate::timing::{CancelToken, Clock, SystemClock};
    pub use crate::transport::{ConnectionConfig, Transport, TransportError};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
