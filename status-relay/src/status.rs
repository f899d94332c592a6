use std::fmt;

use crate::error::StateError;

/// Operating state reported by a source.
///
/// The same enumeration backs the wire byte of a status message and the
/// current state of a [`crate::registry::Source`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Status {
    #[default]
    Idle,
    Active,
    Recharging,
}

impl Status {
    pub const ALL: [Status; 3] = [Status::Idle, Status::Active, Status::Recharging];

    /// Wire byte for this status.
    pub const fn code(self) -> u8 {
        match self {
            Status::Idle => 0x01,
            Status::Active => 0x02,
            Status::Recharging => 0x03,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Status::Idle => "IDLE",
            Status::Active => "ACTIVE",
            Status::Recharging => "RECHARGING",
        }
    }
}

impl TryFrom<u8> for Status {
    type Error = StateError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0x01 => Ok(Status::Idle),
            0x02 => Ok(Status::Active),
            0x03 => Ok(Status::Recharging),
            other => Err(StateError::UnknownStatus(other)),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
