//! Byte links and connectors
//!
//! A [`Link`] is an open byte stream to the controller. A [`Connector`]
//! produces a fresh link each time a transport is opened, so the transport
//! owns the connection lifecycle without knowing what is on the other end.

use serialport::SerialPort;
use std::io::{self, Read, Write};

use super::{serial::open_port, ConnectionConfig, TransportError};

/// An open, bidirectional byte stream
pub trait Link: Read + Write + Send {
    /// Discard anything waiting in the receive buffer
    fn clear_input(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Human-readable endpoint name for logs
    fn name(&self) -> String {
        String::from("link")
    }
}

/// Serial port wrapper implementing [`Link`]
pub struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    /// Wrap an already opened port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Link for SerialLink {
    fn clear_input(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }

    fn name(&self) -> String {
        self.port.name().unwrap_or_else(|| String::from("serial"))
    }
}

/// Opens links on demand
pub trait Connector: Send {
    /// Open a new link to the endpoint
    fn connect(&mut self) -> Result<Box<dyn Link>, TransportError>;

    /// Endpoint description for logs
    fn describe(&self) -> String {
        String::from("link")
    }
}

impl<F> Connector for F
where
    F: FnMut() -> Result<Box<dyn Link>, TransportError> + Send,
{
    fn connect(&mut self) -> Result<Box<dyn Link>, TransportError> {
        self()
    }
}

/// Connector for a physical serial port
#[derive(Debug, Clone)]
pub struct SerialConnector {
    config: ConnectionConfig,
}

impl SerialConnector {
    /// Connector for the given line configuration
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    /// Line configuration used on connect
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

impl Connector for SerialConnector {
    fn connect(&mut self) -> Result<Box<dyn Link>, TransportError> {
        let port = open_port(&self.config)?;
        let mut link = SerialLink::new(port);
        // Drop whatever the controller emitted before we were listening
        link.clear_input()?;
        Ok(Box::new(link))
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.config.port_name, self.config.baud_rate)
    }
}
