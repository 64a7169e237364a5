//! Transport lifecycle and framed exchange
//!
//! One request in flight at a time: write a terminated command, then read
//! until the inbound terminator or the reply deadline.

use serde::{Deserialize, Serialize};
use std::io::{self, ErrorKind};
use std::time::{Duration, Instant};

use super::{
    link::{Connector, Link, SerialConnector},
    ConnectionConfig, FrameBuffer, Terminator, TransportError, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_TIMEOUT_MS,
};

/// Transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    /// No link held
    Closed,
    /// Link open and usable
    Open,
    /// Link was lost mid-exchange; must be reopened
    Failed,
}

/// Cumulative traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Bytes written, terminators included
    pub tx_bytes: u64,
    /// Bytes read, terminators included
    pub rx_bytes: u64,
    /// Messages sent
    pub tx_frames: u64,
    /// Complete replies received
    pub rx_frames: u64,
    /// Sends that hit the reply deadline
    pub timeouts: u64,
}

/// Framed request/response transport over a [`Link`]
pub struct Transport {
    connector: Box<dyn Connector>,
    link: Option<Box<dyn Link>>,
    state: TransportState,
    outbound: Terminator,
    inbound: Terminator,
    timeout: Duration,
    poll_interval: Duration,
    stats: TransportStats,
}

impl Transport {
    /// Create a closed transport that opens links through `connector`.
    ///
    /// Terminators default to CR outbound and CRLF inbound.
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self {
            connector: Box::new(connector),
            link: None,
            state: TransportState::Closed,
            outbound: Terminator::cr(),
            inbound: Terminator::crlf(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            stats: TransportStats::default(),
        }
    }

    /// Closed transport for a serial port, timing taken from `config`
    pub fn serial(config: ConnectionConfig) -> Self {
        let timeout = config.timeout();
        let poll = config.poll_interval();
        let mut transport = Self::new(SerialConnector::new(config));
        transport.timeout = timeout;
        transport.poll_interval = poll;
        transport
    }

    /// Set the reply deadline for each `send`
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Reply deadline
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Set the sleep between empty reads
    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval;
    }

    /// Set the terminator expected at the end of inbound replies
    pub fn set_terminator(&mut self, seq: impl AsRef<[u8]>) {
        self.inbound = Terminator::new(seq);
    }

    /// Set the terminator appended to outbound messages
    pub fn set_outbound_terminator(&mut self, seq: impl AsRef<[u8]>) {
        self.outbound = Terminator::new(seq);
    }

    /// `(outbound, inbound)` terminators
    pub fn terminators(&self) -> (&Terminator, &Terminator) {
        (&self.outbound, &self.inbound)
    }

    /// Current state
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// True when a link is held
    pub fn is_open(&self) -> bool {
        self.state == TransportState::Open
    }

    /// Traffic counters
    pub fn stats(&self) -> TransportStats {
        self.stats
    }

    /// Acquire the link. Opening an open transport is a no-op.
    pub fn open(&mut self) -> Result<(), TransportError> {
        if self.is_open() {
            return Ok(());
        }
        match self.connector.connect() {
            Ok(link) => {
                tracing::debug!(endpoint = %link.name(), "transport opened");
                self.link = Some(link);
                self.state = TransportState::Open;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(endpoint = %self.connector.describe(), "open failed: {e}");
                self.state = TransportState::Failed;
                Err(e)
            }
        }
    }

    /// Release the link. Safe to call any number of times.
    pub fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            if let Err(e) = io::Write::flush(&mut link) {
                tracing::debug!("flush on close failed: {e}");
            }
            tracing::debug!(endpoint = %link.name(), "transport closed");
        }
        self.state = TransportState::Closed;
    }

    /// Send one message and wait for its reply.
    ///
    /// The outbound terminator is appended before writing; the returned reply
    /// has the inbound terminator stripped.
    pub fn send(&mut self, message: &str) -> Result<String, TransportError> {
        let link = self.link.as_mut().ok_or(TransportError::NotOpen)?;
        let frame = self.outbound.frame(message);
        let inbound = self.inbound.clone();

        let result = exchange(
            link.as_mut(),
            &frame,
            inbound,
            self.timeout,
            self.poll_interval,
        );

        self.stats.tx_bytes = self.stats.tx_bytes.saturating_add(frame.len() as u64);
        self.stats.tx_frames = self.stats.tx_frames.saturating_add(1);

        match result {
            Ok((reply, rx_len)) => {
                self.stats.rx_bytes = self.stats.rx_bytes.saturating_add(rx_len as u64);
                self.stats.rx_frames = self.stats.rx_frames.saturating_add(1);
                tracing::debug!(tx = %message, rx = %reply, "exchange complete");
                Ok(reply)
            }
            Err(e @ TransportError::Timeout { .. }) => {
                self.stats.timeouts = self.stats.timeouts.saturating_add(1);
                tracing::debug!(tx = %message, "no reply before deadline");
                Err(e)
            }
            Err(e @ TransportError::Disconnected(_)) => {
                tracing::warn!(tx = %message, "link lost: {e}");
                self.link = None;
                self.state = TransportState::Failed;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

fn is_no_data(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
    )
}

/// Write `frame` and read until `inbound` is seen or `timeout` elapses.
///
/// Returns the payload and the number of bytes read.
fn exchange(
    link: &mut dyn Link,
    frame: &[u8],
    inbound: Terminator,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(String, usize), TransportError> {
    if let Err(e) = link.clear_input() {
        tracing::debug!("clear_input failed: {e} (continuing)");
    }

    tracing::debug!(data = %frame.escape_ascii(), "tx");
    link.write_all(frame)
        .and_then(|_| link.flush())
        .map_err(|e| TransportError::Disconnected(e.to_string()))?;

    let mut frames = FrameBuffer::new(inbound);
    let mut chunk = [0u8; 256];
    let mut received = 0usize;
    let start = Instant::now();

    loop {
        match link.read(&mut chunk) {
            Ok(0) => std::thread::sleep(poll_interval),
            Ok(n) => {
                received += n;
                tracing::trace!(data = %chunk[..n].escape_ascii(), "rx chunk");
                if let Some(payload) = frames.push(&chunk[..n])? {
                    return Ok((payload, received));
                }
            }
            // A serial read already blocked for its own timeout
            Err(ref e) if e.kind() == ErrorKind::TimedOut => {}
            Err(ref e) if is_no_data(e.kind()) => std::thread::sleep(poll_interval),
            Err(e) => return Err(TransportError::Disconnected(e.to_string())),
        }

        if start.elapsed() >= timeout {
            if !frames.pending().is_empty() {
                tracing::debug!(
                    partial = %frames.pending().escape_ascii(),
                    "dropping partial reply"
                );
            }
            return Err(TransportError::Timeout { waited: timeout });
        }
    }
}
