use std::fmt;

use log::{debug, error, info, trace, warn};

use crate::cmds::{self, DEFAULT_JOG_SPEED, JogCommand, JogValue, REG_ERROR, REG_JOG, REG_VERSION};
use crate::connection::{self, ConnectionParameters, LinkStatus};
use crate::error::{ConnectionError, JogError, LinkError, TransportError};
use crate::faults::Fault;
use crate::transport::RegisterTransport;

/// Rotation the controller last commanded and the device acknowledged
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Direction {
    #[default]
    Stopped,
    Forward,
    Reverse,
}

impl Direction {
    /// Command that keeps the motor turning this way, if it is turning
    pub fn command(self) -> Option<JogCommand> {
        match self {
            Direction::Stopped => None,
            Direction::Forward => Some(JogCommand::Forward),
            Direction::Reverse => Some(JogCommand::Reverse),
        }
    }
}

impl From<JogCommand> for Direction {
    fn from(command: JogCommand) -> Self {
        match command {
            JogCommand::Forward => Direction::Forward,
            JogCommand::Reverse => Direction::Reverse,
            JogCommand::Stop => Direction::Stopped,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Stopped => "stopped",
            Direction::Forward => "forward",
            Direction::Reverse => "reverse",
        })
    }
}

/// Speed and direction as last confirmed by a successful register write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControllerState {
    pub current_speed: u16,
    pub current_direction: Direction,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            current_speed: DEFAULT_JOG_SPEED,
            current_direction: Direction::Stopped,
        }
    }
}

/// ServoController drives the JOG mode of a Delta ASDA amplifier through
/// parameter P4-05, a single register that accepts either a speed
/// (0..=3000 r/min) or a motion command (4999 forward, 4998 reverse, 5000 stop).
///
/// Key features and functionality include:
///
/// 1. **Connection**:
///    - `connect` opens the serial line, `check_connection` reads the firmware
///      version and the alarm register before any motion is allowed.
///    - A reported alarm is latched and refuses motion until a later check
///      reads zero again.
///
/// 2. **Speed control**:
///    - `set_jog_speed` clamps the request, writes it and, when the motor is
///      turning, re-sends the direction command so the new speed applies at once.
///    - `initialize_speed` seeds the speed from P4-05 unless it holds a command.
///
/// 3. **Direction**:
///    - `jog` and `stop_jog` write the command codes and track the direction.
///
/// 4. **Shutdown**:
///    - `close` stops the motor, restores the default speed and drops the port.
///      It also runs on `Drop`.
///
/// Local state only changes after the device accepted the corresponding write.
pub struct ServoController {
    transport: Option<Box<dyn RegisterTransport>>,
    state: ControllerState,
    fault: Option<Fault>,
}

impl Default for ServoController {
    fn default() -> Self {
        Self::new()
    }
}

impl ServoController {
    /// Create an unconnected controller at the default speed
    pub fn new() -> Self {
        debug!("Creating new ServoController");
        Self {
            transport: None,
            state: ControllerState::default(),
            fault: None,
        }
    }

    /// Create a controller that talks through an already open transport
    pub fn with_transport(transport: impl RegisterTransport + 'static) -> Self {
        let mut controller = Self::new();
        controller.attach(Box::new(transport));
        controller
    }

    /// Open the serial port described by `params`
    pub fn connect(&mut self, params: &ConnectionParameters) -> Result<&mut Self, ConnectionError> {
        info!("Attempting to connect on {} (slave {})", params.port, params.slave_address);
        let transport = connection::open(params)?;
        Ok(self.attach(transport))
    }

    /// Use `transport` for all further register access.
    ///
    /// A previously attached transport is shut down first.
    pub fn attach(&mut self, transport: Box<dyn RegisterTransport>) -> &mut Self {
        if self.transport.is_some() {
            warn!("Replacing an open connection");
            // failures are already logged by close
            let _ = self.close();
        }
        self.transport = Some(transport);
        self
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn current_speed(&self) -> u16 {
        self.state.current_speed
    }

    pub fn current_direction(&self) -> Direction {
        self.state.current_direction
    }

    /// Alarm seen by the last link check, if any
    pub fn latched_fault(&self) -> Option<Fault> {
        self.fault
    }

    fn bus(&mut self) -> Result<&mut Box<dyn RegisterTransport>, TransportError> {
        self.transport.as_mut().ok_or(TransportError::Closed)
    }

    fn read(&mut self, op: &'static str, address: u16) -> Result<u16, TransportError> {
        let result = self.bus().and_then(|bus| bus.read_register(address));
        if let Err(e) = &result {
            error!(op = op, address = address; "Failed to read register {}: {}", address, e);
        }
        result
    }

    fn write_jog(&mut self, op: &'static str, value: u16) -> Result<(), TransportError> {
        trace!("P4-05 <- {}", value);
        let result = self.bus().and_then(|bus| bus.write_register(REG_JOG, value));
        if let Err(e) = &result {
            error!(op = op, address = REG_JOG, value = value; "Failed to write JOG register: {}", e);
        }
        result
    }

    fn ensure_clear(&self) -> Result<(), JogError> {
        match self.fault {
            Some(fault) => {
                warn!(code = fault.code(); "Motion refused, alarm {} is latched", fault);
                Err(JogError::Faulted(fault))
            }
            None => Ok(()),
        }
    }

    /// Verify the link: read the firmware version and the alarm register.
    ///
    /// A non-zero alarm is reported as [`LinkError::Fault`] and latched;
    /// a zero alarm clears any previous latch.
    pub fn check_connection(&mut self) -> Result<LinkStatus, LinkError> {
        let firmware_version = self.read("check_connection", REG_VERSION)?;
        let code = self.read("check_connection", REG_ERROR)?;
        info!("Link established, firmware version {}", firmware_version);

        if let Some(fault) = Fault::from_code(code) {
            error!(
                op = "check_connection", code = fault.code(), description = fault.description();
                "Alarm detected: {}", fault
            );
            warn!("The alarm must be cleared on the device before JOG control");
            self.fault = Some(fault);
            return Err(LinkError::Fault(fault));
        }

        if self.fault.take().is_some() {
            info!("Previously latched alarm has been cleared");
        }
        debug!("No alarm reported (code 0)");
        Ok(LinkStatus { firmware_version })
    }

    /// Seed the current speed from P4-05.
    ///
    /// A stored speed is adopted; a leftover command code or a failed read
    /// keeps the current seed. Returns the speed in effect afterwards.
    pub fn initialize_speed(&mut self) -> u16 {
        match self.read("initialize_speed", REG_JOG).map(JogValue::decode) {
            Ok(JogValue::Speed(speed)) => {
                self.state.current_speed = speed;
                info!("JOG speed read from the drive: {} r/min", speed);
            }
            Ok(JogValue::Command(command)) => {
                info!(
                    "P4-05 holds command {} rather than a speed, keeping {} r/min",
                    command, self.state.current_speed
                );
            }
            Ok(JogValue::Unrecognized(raw)) => {
                warn!(
                    "P4-05 holds {} which is neither a speed nor a command, keeping {} r/min",
                    raw, self.state.current_speed
                );
            }
            Err(_) => {
                warn!("Could not read the JOG speed, keeping {} r/min", self.state.current_speed);
            }
        }
        self.state.current_speed
    }

    fn send_command(&mut self, command: JogCommand) -> Result<(), TransportError> {
        self.write_jog("jog", command.code())?;
        self.state.current_direction = command.into();
        debug!("JOG command {} acknowledged", command);
        Ok(())
    }

    fn apply_speed(&mut self, requested: i32) -> Result<u16, TransportError> {
        let speed = cmds::clamp_speed(requested);
        if speed as i32 != requested {
            debug!("Requested speed {} clamped to {}", requested, speed);
        }
        self.write_jog("set_jog_speed", speed)?;
        self.state.current_speed = speed;

        // P4-05 only picks up a new speed when the motion command is sent again
        if let Some(command) = self.state.current_direction.command() {
            self.send_command(command)?;
        }
        info!("JOG speed set to {} r/min", speed);
        Ok(speed)
    }

    /// Set the JOG speed, clamped into `[SPEED_MIN, SPEED_MAX]`.
    pub fn set_jog_speed(&mut self, requested: i32) -> Result<(), JogError> {
        self.ensure_clear()?;
        self.apply_speed(requested)?;
        Ok(())
    }

    pub fn increase_speed(&mut self, step: u16) -> Result<(), JogError> {
        self.set_jog_speed(self.state.current_speed as i32 + step as i32)
    }

    pub fn decrease_speed(&mut self, step: u16) -> Result<(), JogError> {
        self.set_jog_speed(self.state.current_speed as i32 - step as i32)
    }

    /// Return to the default JOG speed
    pub fn reset_speed(&mut self) -> Result<(), JogError> {
        self.set_jog_speed(DEFAULT_JOG_SPEED as i32)?;
        info!("JOG speed reset to {} r/min", DEFAULT_JOG_SPEED);
        Ok(())
    }

    /// Write a motion command.
    ///
    /// Repeating the current direction is allowed and simply re-sends it.
    pub fn jog(&mut self, command: JogCommand) -> Result<(), JogError> {
        self.ensure_clear()?;
        self.send_command(command)?;
        Ok(())
    }

    pub fn stop_jog(&mut self) -> Result<(), JogError> {
        self.jog(JogCommand::Stop)
    }

    /// Stop, restore the default speed and release the transport.
    ///
    /// The transport is released even if a step fails; the first failure is
    /// returned. Closing an unconnected controller does nothing.
    pub fn close(&mut self) -> Result<(), TransportError> {
        if self.transport.is_none() {
            trace!("close: no connection open");
            return Ok(());
        }
        info!("Stopping the motor and restoring {} r/min before disconnect", DEFAULT_JOG_SPEED);

        let stopped = self.send_command(JogCommand::Stop);
        let reset = if stopped.is_ok() {
            self.apply_speed(DEFAULT_JOG_SPEED as i32).map(|_| ())
        } else {
            // direction is unconfirmed; write the speed without re-sending a motion command
            self.write_jog("close", DEFAULT_JOG_SPEED)
                .map(|()| self.state.current_speed = DEFAULT_JOG_SPEED)
        };

        self.transport = None;
        info!("Stopped and connection closed");
        stopped.and(reset)
    }
}

impl Drop for ServoController {
    fn drop(&mut self) {
        if self.transport.is_some() {
            debug!("ServoController dropped with an open connection, closing");
            // failures are already logged by close
            let _ = self.close();
        }
    }
}
