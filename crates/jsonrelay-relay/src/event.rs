use std::fmt;

use serde::Serialize;

/// Which half of the relay a supervisor serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Reads the pair's primary port.
    Input,
    /// Reads the pair's secondary port.
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Input => "input",
            Direction::Output => "output",
        })
    }
}

/// Who asked for a full reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOrigin {
    /// A supervisor crossed its fault threshold.
    Supervisor(Direction),
    /// `RelayEngine::reconnect` was called.
    Operator,
}

/// Messages on the engine control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEvent {
    ReconnectRequested { origin: ReconnectOrigin },
    Shutdown,
}
