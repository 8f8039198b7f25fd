//! Captured build output.

use serde::{Deserialize, Serialize};

use crate::BuildId;

/// Where an output line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum Channel {
    Stdout = 0,
    Stderr = 1,
    /// Informational message written by the scheduler.
    CiInfo = 2,
    /// Error message written by the scheduler.
    CiError = 3,
}

impl Channel {
    /// Marker used when printing lines to a terminal.
    pub fn marker(self) -> &'static str {
        match self {
            Channel::Stdout => " ",
            Channel::Stderr => "!",
            Channel::CiInfo => "*",
            Channel::CiError => "x",
        }
    }
}

impl From<Channel> for u8 {
    fn from(channel: Channel) -> Self {
        channel as u8
    }
}

impl TryFrom<u8> for Channel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Channel::Stdout),
            1 => Ok(Channel::Stderr),
            2 => Ok(Channel::CiInfo),
            3 => Ok(Channel::CiError),
            _ => Err(format!("unknown output channel: {}", value)),
        }
    }
}

/// One immutable line of build output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub build_id: BuildId,
    /// Position within the build's output, starting at 0 with no gaps.
    pub line_id: u64,
    pub channel: Channel,
    pub content: String,
}
