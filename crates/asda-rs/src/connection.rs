use std::time::Duration;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serialport::{DataBits, Parity, StopBits};

use crate::error::ConnectionError;
use crate::ports;
use crate::transport::{RegisterTransport, RetryPolicy, RetryingTransport, RtuTransport};

/// Port name that selects the first USB serial adapter found
pub const AUTO_PORT: &str = "auto";

/// Bus settings as they appear in the configuration file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionParameters {
    pub port: String,
    pub slave_address: u8,
    pub baudrate: u32,
    pub bytesize: u8,
    pub parity: String,
    pub stopbits: u8,
    /// Response timeout, seconds
    pub timeout: f64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for ConnectionParameters {
    /// Factory settings of an ASDA-AB with P3-01=1 and P3-02=7 (RTU 8,E,1)
    fn default() -> Self {
        Self {
            port: AUTO_PORT.to_string(),
            slave_address: 1,
            baudrate: 9600,
            bytesize: 8,
            parity: "E".to_string(),
            stopbits: 1,
            timeout: 1.0,
            retry: RetryPolicy::default(),
        }
    }
}

/// Validated serial line settings
#[derive(Clone, Debug, PartialEq)]
pub struct SerialConfig {
    pub baudrate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub timeout: Duration,
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConnectionError {
    ConnectionError::InvalidParameter {
        name,
        reason: reason.into(),
    }
}

impl TryFrom<&ConnectionParameters> for SerialConfig {
    type Error = ConnectionError;

    fn try_from(params: &ConnectionParameters) -> Result<Self, Self::Error> {
        if params.baudrate == 0 {
            return Err(invalid("baudrate", "must be positive"));
        }
        let data_bits = match params.bytesize {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            other => return Err(invalid("bytesize", format!("{other} is not one of 5, 6, 7, 8"))),
        };
        let parity = match params.parity.to_ascii_uppercase().as_str() {
            "N" | "NONE" => Parity::None,
            "E" | "EVEN" => Parity::Even,
            "O" | "ODD" => Parity::Odd,
            other => return Err(invalid("parity", format!("{other:?} is not N, E or O"))),
        };
        let stop_bits = match params.stopbits {
            1 => StopBits::One,
            2 => StopBits::Two,
            other => return Err(invalid("stopbits", format!("{other} is not 1 or 2"))),
        };
        if !(params.timeout.is_finite() && params.timeout > 0.0) {
            return Err(invalid("timeout", "must be a positive number of seconds"));
        }
        Ok(Self {
            baudrate: params.baudrate,
            data_bits,
            parity,
            stop_bits,
            timeout: Duration::from_secs_f64(params.timeout),
        })
    }
}

impl ConnectionParameters {
    /// Check everything that can be checked without touching hardware.
    pub fn validate(&self) -> Result<SerialConfig, ConnectionError> {
        if !(1..=247).contains(&self.slave_address) {
            return Err(invalid("slave_address", format!("{} is outside 1..=247", self.slave_address)));
        }
        if self.port.trim().is_empty() {
            return Err(invalid("port", "must not be empty"));
        }
        SerialConfig::try_from(self)
    }

    fn resolve_port(&self) -> Result<String, ConnectionError> {
        if !self.port.eq_ignore_ascii_case(AUTO_PORT) {
            return Ok(self.port.clone());
        }
        let port = ports::first_usb_adapter().ok_or(ConnectionError::NoPortFound)?;
        info!("Port \"auto\" resolved to {}", port);
        Ok(port)
    }
}

fn log_troubleshooting(port: &str) {
    warn!("Check the following:");
    warn!("- the serial port name ({})", port);
    warn!("- the baud rate (9600 when P3-01=1)");
    warn!("- P3-02 is set to 7 (Modbus RTU, 8,E,1)");
    warn!("- the RS-485 wiring");
}

/// Open the serial line and wrap it as a Modbus RTU transport.
///
/// A single attempt is made.
pub fn open(params: &ConnectionParameters) -> Result<Box<dyn RegisterTransport>, ConnectionError> {
    let config = params.validate()?;
    let port = params.resolve_port()?;
    debug!(
        "Serial configuration: baudrate={}, data_bits={:?}, parity={:?}, stop_bits={:?}, timeout={:?}",
        config.baudrate, config.data_bits, config.parity, config.stop_bits, config.timeout
    );

    match serialport::new(&port, config.baudrate)
        .data_bits(config.data_bits)
        .parity(config.parity)
        .stop_bits(config.stop_bits)
        .timeout(config.timeout)
        .open()
    {
        Ok(serial) => {
            info!("Connected to {} at {} baud", port, config.baudrate);
            let rtu = RtuTransport::new(serial, params.slave_address);
            Ok(Box::new(RetryingTransport::new(rtu, params.retry)))
        }
        Err(source) => {
            error!("Failed to open serial port {}: {}", port, source);
            log_troubleshooting(&port);
            Err(ConnectionError::Open { port, source })
        }
    }
}

/// Outcome of a successful link check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkStatus {
    pub firmware_version: u16,
}
