// Outbound control command domain model
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboundCommand {
    Off,
    Police,
    Pit,
    Hazard,
    Chase,
    Acceleration,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command '{0}', expected one of: off, police, pit, hazard, chase, acceleration")]
    Unknown(String),
}

impl OutboundCommand {
    pub const ALL: [OutboundCommand; 6] = [
        OutboundCommand::Off,
        OutboundCommand::Police,
        OutboundCommand::Pit,
        OutboundCommand::Hazard,
        OutboundCommand::Chase,
        OutboundCommand::Acceleration,
    ];

    /// Token written to the wire, as a bare text frame
    pub fn as_str(self) -> &'static str {
        match self {
            OutboundCommand::Off => "off",
            OutboundCommand::Police => "police",
            OutboundCommand::Pit => "pit",
            OutboundCommand::Hazard => "hazard",
            OutboundCommand::Chase => "chase",
            OutboundCommand::Acceleration => "acceleration",
        }
    }
}

impl FromStr for OutboundCommand {
    type Err = CommandError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        OutboundCommand::ALL
            .into_iter()
            .find(|c| c.as_str() == token)
            .ok_or_else(|| CommandError::Unknown(token.to_string()))
    }
}

impl fmt::Display for OutboundCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
