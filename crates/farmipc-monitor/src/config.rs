use std::path::Path;
use std::time::Duration;

use farmipc_transport::Endpoint;
use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};

pub const DEFAULT_STATE_ADDRESS: &str = "ipc:///tmp/farmipc-state";
pub const DEFAULT_STATISTICS_ADDRESS: &str = "ipc:///tmp/farmipc-statistics";
pub const DEFAULT_COMMAND_ADDRESS: &str = "ipc:///tmp/farmipc-command";

/// Addresses of the three monitoring channels, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelAddresses {
    pub state: String,
    pub statistics: String,
    pub command: String,
}

impl Default for ChannelAddresses {
    fn default() -> Self {
        Self {
            state: DEFAULT_STATE_ADDRESS.to_string(),
            statistics: DEFAULT_STATISTICS_ADDRESS.to_string(),
            command: DEFAULT_COMMAND_ADDRESS.to_string(),
        }
    }
}

impl ChannelAddresses {
    /// Parse every address into an endpoint.
    pub fn resolve(&self) -> Result<ChannelEndpoints> {
        let parse = |channel: &'static str, address: &str| {
            Endpoint::parse(address)
                .map_err(|source| MonitorError::InvalidAddress { channel, source })
        };
        Ok(ChannelEndpoints {
            state: parse("state", &self.state)?,
            statistics: parse("statistics", &self.statistics)?,
            command: parse("command", &self.command)?,
        })
    }
}

/// Resolved endpoints of the three monitoring channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEndpoints {
    pub state: Endpoint,
    pub statistics: Endpoint,
    pub command: Endpoint,
}

impl Default for ChannelEndpoints {
    fn default() -> Self {
        Self {
            state: Endpoint::from_path("/tmp/farmipc-state"),
            statistics: Endpoint::from_path("/tmp/farmipc-statistics"),
            command: Endpoint::from_path("/tmp/farmipc-command"),
        }
    }
}

/// Monitoring configuration.
///
/// ```json
/// {
///   "addresses": { "state": "ipc:///run/farm/state" },
///   "receive_timeout_ms": 500
/// }
/// ```
///
/// Missing fields take their defaults. Without `receive_timeout_ms` the
/// state and statistics receives wait indefinitely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    pub addresses: ChannelAddresses,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receive_timeout_ms: Option<u64>,
}

impl MonitorConfig {
    /// Parse a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(Into::into)
    }

    /// Read and parse a JSON configuration file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|source| MonitorError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Configured receive timeout.
    pub fn receive_timeout(&self) -> Option<Duration> {
        self.receive_timeout_ms.map(Duration::from_millis)
    }

    /// Resolve the channel addresses.
    pub fn endpoints(&self) -> Result<ChannelEndpoints> {
        self.addresses.resolve()
    }
}
