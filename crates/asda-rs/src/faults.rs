use std::fmt;

/// Description used for any non-zero code the catalog does not list
pub const UNKNOWN_FAULT: &str = "Unknown error";

/// An alarm reported by the amplifier through P0-01.
///
/// Codes are cleared on the device itself (reset input or power cycle),
/// never by this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Fault {
    code: u16,
}

impl Fault {
    /// Interpret a raw P0-01 value. Zero means no alarm.
    pub fn from_code(code: u16) -> Option<Self> {
        (code != 0).then_some(Self { code })
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    /// Human readable description from the alarm catalog
    pub fn description(&self) -> &'static str {
        describe(self.code)
    }

    /// Whether the catalog knows this code
    pub fn is_cataloged(&self) -> bool {
        lookup(self.code).is_some()
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AL{:03} {}", self.code, self.description())
    }
}

fn lookup(code: u16) -> Option<&'static str> {
    let description = match code {
        1 => "Overcurrent",
        2 => "Overvoltage",
        3 => "Undervoltage",
        4 => "Z-pulse shift",
        5 => "Regeneration error",
        6 => "Overload",
        7 => "Overspeed",
        8 => "Abnormal pulse command",
        9 => "Excessive deviation",
        10 => "Watchdog error",
        13 => "Emergency stop activated",
        14 => "Reverse limit error",
        15 => "Forward limit error",
        20 => "Serial communication error",
        23 => "Overload warning",
        _ => return None,
    };
    Some(description)
}

/// Resolve a device alarm code to its description.
pub fn describe(code: u16) -> &'static str {
    lookup(code).unwrap_or(UNKNOWN_FAULT)
}
