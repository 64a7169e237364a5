//! Framed Serial Transport
//!
//! Turns the byte stream of a serial link into discrete request/response
//! exchanges. Outbound commands and inbound replies use distinct terminators
//! (CR out, CRLF in on the R2/R4 controller).

mod connection;
mod error;
mod framing;
mod link;
pub mod serial;

pub use connection::{Transport, TransportState, TransportStats};
pub use error::TransportError;
pub use framing::{FrameBuffer, Terminator};
pub use link::{Connector, Link, SerialConnector, SerialLink};
pub use serial::{list_ports, ConnectionConfig, LineFlowControl, PortInfo};

/// Baud rate of the R2/R4 controller link
pub const DEFAULT_BAUD_RATE: u32 = 19200;

/// Default read timeout for one reply in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Delay between reads while no data is pending
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5;

/// Largest reply accepted before the frame is considered garbage
pub const MAX_FRAME_SIZE: usize = 4096;
