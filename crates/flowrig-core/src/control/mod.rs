//! Flow Controller
//!
//! Composes device calls into timed experiment profiles.
//!
//! - [`RampProfile`]: linear flow transition in fixed-interval set points
//! - [`SweepProfile`]: pickup hold at one rate, then a step to another
//!
//! Both compile to a [`FlowProfile`] and run through [`FlowController`].
//!
//! ## Failure handling
//!
//! The device has no push notifications; faults are only seen by polling.
//! The controller polls after every hold and treats a fault state as
//! terminal. Failed commands, faults and cancellation all end the run with
//! one best-effort `stop()`, so pumps are never left running unattended.

mod error;
mod profile;
mod runlog;
mod sequencer;

pub use error::SequenceError;
pub use profile::{
    FlowProfile, RampProfile, SetPoint, Step, SweepProfile, SweepReport, DEFAULT_RAMP_SETTLE,
    DEFAULT_RAMP_STEP,
};
pub use runlog::{parse_file_time, RunEvent, RunLog, RunLogEntry};
pub use sequencer::{ControllerOptions, FlowController, RunSummary, DEFAULT_CANCEL_POLL};
