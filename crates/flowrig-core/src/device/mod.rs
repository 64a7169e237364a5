//! Device Protocol
//!
//! The fixed instruction set of the R2/R4 controller as typed operations.
//!
//! # Cancel Safety
//! Each call writes one line and reads one line. The protocol carries no
//! request ids, so a [`FlowDevice`] must have exactly one owner issuing
//! commands; holding it by `&mut` is what keeps a manual command from
//! interleaving with a running sequence.

mod client;
mod commands;
mod error;
mod types;

pub use client::{FlowDevice, STOP_SETTLE};
pub use commands::Command;
pub use error::DeviceError;
pub use types::{FlowRate, HeaterChannel, HeaterTarget, Pump, Valve, ValveId, ValvePosition};
