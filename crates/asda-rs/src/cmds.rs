use static_assertions::const_assert;
use std::fmt;

/// P0-00, firmware version (read only)
pub const REG_VERSION: u16 = 0;
/// P0-01, current alarm code (read only)
pub const REG_ERROR: u16 = 1;
/// P4-05 (0x0405), JOG speed / JOG command
pub const REG_JOG: u16 = 0x0405;

/// Rotate counterclockwise (forward) while asserted
pub const JOG_FORWARD: u16 = 4999;
/// Rotate clockwise (reverse) while asserted
pub const JOG_REVERSE: u16 = 4998;
/// Stop JOG rotation
pub const JOG_STOP: u16 = 5000;

/// Lowest JOG speed, r/min
pub const SPEED_MIN: u16 = 0;
/// Highest JOG speed, r/min
pub const SPEED_MAX: u16 = 3000;

/// Speed the controller starts from and returns to on shutdown, r/min
pub const DEFAULT_JOG_SPEED: u16 = 20;
/// Default increment for speed up / speed down, r/min
pub const DEFAULT_JOG_STEP: u16 = 25;

// P4-05 carries either a speed or a command; they are told apart by magnitude.
const_assert!(SPEED_MAX < JOG_REVERSE);
const_assert!(SPEED_MAX < JOG_FORWARD);
const_assert!(SPEED_MAX < JOG_STOP);
const_assert!(SPEED_MIN <= DEFAULT_JOG_SPEED && DEFAULT_JOG_SPEED <= SPEED_MAX);

/// Motion command written to the JOG register
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JogCommand {
    Forward,
    Reverse,
    Stop,
}

impl JogCommand {
    /// Raw register code for this command
    pub const fn code(self) -> u16 {
        match self {
            JogCommand::Forward => JOG_FORWARD,
            JogCommand::Reverse => JOG_REVERSE,
            JogCommand::Stop => JOG_STOP,
        }
    }
}

/// Raised when a raw value is not one of the reserved JOG command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error(
    "{0} is not a JOG command code (expected {fwd}, {rev} or {stop})",
    fwd = JOG_FORWARD,
    rev = JOG_REVERSE,
    stop = JOG_STOP
)]
pub struct UnknownJogCommand(pub u16);

impl TryFrom<u16> for JogCommand {
    type Error = UnknownJogCommand;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        match code {
            JOG_FORWARD => Ok(JogCommand::Forward),
            JOG_REVERSE => Ok(JogCommand::Reverse),
            JOG_STOP => Ok(JogCommand::Stop),
            other => Err(UnknownJogCommand(other)),
        }
    }
}

impl fmt::Display for JogCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JogCommand::Forward => "forward",
            JogCommand::Reverse => "reverse",
            JogCommand::Stop => "stop",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

/// Meaning of a value read back from the JOG register
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JogValue {
    /// A persisted speed setpoint
    Speed(u16),
    /// A leftover motion command
    Command(JogCommand),
    /// Above the speed range but not a known command
    Unrecognized(u16),
}

impl JogValue {
    /// Classify a raw P4-05 value by magnitude.
    pub fn decode(raw: u16) -> Self {
        if raw <= SPEED_MAX {
            return JogValue::Speed(raw);
        }
        match JogCommand::try_from(raw) {
            Ok(command) => JogValue::Command(command),
            Err(_) => JogValue::Unrecognized(raw),
        }
    }
}

/// Bound a requested speed into `[SPEED_MIN, SPEED_MAX]`.
///
/// Out of range requests are not an error; they saturate.
pub fn clamp_speed(requested: i32) -> u16 {
    requested.clamp(SPEED_MIN as i32, SPEED_MAX as i32) as u16
}
