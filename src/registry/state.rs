use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Session health as classified by the registry client
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Session established
    Connected,
    /// Liveness unconfirmed; the registry has not expired the session yet
    Suspended,
    /// Session survived a suspension
    Reconnected,
    /// Session lost
    Disconnected,
    /// A tag reported by a newer registry client
    Unknown(String),
}

impl ConnectionState {
    pub fn as_str(&self) -> &str {
        match self {
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Suspended => "SUSPENDED",
            ConnectionState::Reconnected => "RECONNECTED",
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Unknown(tag) => tag,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionState {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "CONNECTED" => ConnectionState::Connected,
            "SUSPENDED" => ConnectionState::Suspended,
            "RECONNECTED" => ConnectionState::Reconnected,
            "DISCONNECTED" => ConnectionState::Disconnected,
            _ => ConnectionState::Unknown(s.to_string()),
        })
    }
}
