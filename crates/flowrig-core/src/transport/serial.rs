//! Serial port handling
//!
//! Line configuration and low-level port access for the controller link.

use serde::{Deserialize, Serialize};
use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;

use super::{TransportError, DEFAULT_BAUD_RATE, DEFAULT_POLL_INTERVAL_MS, DEFAULT_TIMEOUT_MS};

/// Flow control on the serial line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineFlowControl {
    /// No flow control
    None,
    /// XON/XOFF
    Software,
    /// RTS/CTS
    Hardware,
}

impl From<LineFlowControl> for serialport::FlowControl {
    fn from(fc: LineFlowControl) -> Self {
        match fc {
            LineFlowControl::None => serialport::FlowControl::None,
            LineFlowControl::Software => serialport::FlowControl::Software,
            LineFlowControl::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

/// Serial endpoint configuration
///
/// `Default` is the fixed R2/R4 line setup: 19200 baud, 8N1, XON/XOFF and a
/// two second read timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Port name (e.g. "/dev/ttyUSB0" or "COM5")
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits per character (5-8)
    pub data_bits: u8,
    /// Parity enabled. The controller expects none.
    pub parity: bool,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    /// Line flow control
    pub flow_control: LineFlowControl,
    /// Time allowed for one complete reply
    pub timeout_ms: u64,
    /// Sleep between empty reads
    pub poll_interval_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            parity: false,
            stop_bits: 1,
            flow_control: LineFlowControl::Software,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl ConnectionConfig {
    /// Default line settings on the named port
    pub fn for_port(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    /// Reply timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Empty-read poll interval as a `Duration`
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    fn data_bits(&self) -> Result<serialport::DataBits, TransportError> {
        match self.data_bits {
            5 => Ok(serialport::DataBits::Five),
            6 => Ok(serialport::DataBits::Six),
            7 => Ok(serialport::DataBits::Seven),
            8 => Ok(serialport::DataBits::Eight),
            n => Err(TransportError::SerialError(format!(
                "unsupported data bits: {n}"
            ))),
        }
    }

    fn stop_bits(&self) -> Result<serialport::StopBits, TransportError> {
        match self.stop_bits {
            1 => Ok(serialport::StopBits::One),
            2 => Ok(serialport::StopBits::Two),
            n => Err(TransportError::SerialError(format!(
                "unsupported stop bits: {n}"
            ))),
        }
    }
}

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                manufacturer: usb.manufacturer,
                product: usb.product,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Sort key placing COM ports numerically, then ttyUSB*, then ttyACM*, then the rest
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    for (rank, prefix) in [(0u8, "COM"), (1, "ttyUSB"), (2, "ttyACM")] {
        if let Some(rest) = basename.strip_prefix(prefix) {
            let num = rest.parse::<usize>().unwrap_or(usize::MAX);
            return (rank, num, basename.to_string());
        }
    }
    (3, 0, basename.to_string())
}

/// List available serial ports in a deterministic order
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // USB serial adapters the enumeration API sometimes misses
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyUSB") || fname.starts_with("ttyACM") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Open and configure a serial port for the controller
pub fn open_port(config: &ConnectionConfig) -> Result<Box<dyn SerialPort>, TransportError> {
    if config.port_name.is_empty() {
        return Err(TransportError::PortNotFound("no port configured".into()));
    }

    let parity = if config.parity {
        serialport::Parity::Even
    } else {
        serialport::Parity::None
    };

    // Short per-read timeout; the transport enforces the reply deadline itself
    let port = serialport::new(&config.port_name, config.baud_rate)
        .data_bits(config.data_bits()?)
        .parity(parity)
        .stop_bits(config.stop_bits()?)
        .flow_control(config.flow_control.into())
        .timeout(config.poll_interval().max(Duration::from_millis(1)))
        .open()?;

    tracing::debug!(
        port = %config.port_name,
        baud = config.baud_rate,
        "serial port opened"
    );
    Ok(port)
}
