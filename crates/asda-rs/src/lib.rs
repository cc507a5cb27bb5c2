//! JOG mode control of Delta ASDA servo amplifiers over Modbus RTU.
//!
//! ```no_run
//! use asda_rs::cmds::{DEFAULT_JOG_STEP, JogCommand};
//! use asda_rs::connection::ConnectionParameters;
//! use asda_rs::controller::ServoController;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut controller = ServoController::new();
//! controller.connect(&ConnectionParameters::default())?;
//! controller.check_connection()?;
//! controller.initialize_speed();
//! controller.jog(JogCommand::Forward)?;
//! controller.increase_speed(DEFAULT_JOG_STEP)?;
//! controller.close()?;
//! # Ok(())
//! # }
//! ```

pub mod cmds;
pub mod connection;
pub mod controller;
pub mod error;
pub mod faults;
pub mod modbus;
pub mod ports;
pub mod transport;

pub use controller::{ControllerState, Direction, ServoController};
pub use error::{ConnectionError, JogError, LinkError, TransportError};
