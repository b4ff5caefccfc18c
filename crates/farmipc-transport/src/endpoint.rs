use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, TransportError};

/// URI scheme for local socket endpoints.
pub const IPC_SCHEME: &str = "ipc://";

/// A logical channel address resolved to a local socket path.
///
/// Accepts `ipc:///tmp/farm-state` or a bare path such as `/tmp/farm-state`.
/// Other schemes (`tcp://`, `inproc://`, ...) are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    path: PathBuf,
}

impl Endpoint {
    /// Parse an endpoint string.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let path = match trimmed.strip_prefix(IPC_SCHEME) {
            Some(rest) => rest,
            None if trimmed.contains("://") => {
                return Err(invalid(input, "only ipc:// endpoints are supported"));
            }
            None => trimmed,
        };

        if path.is_empty() {
            return Err(invalid(input, "endpoint path is empty"));
        }

        Ok(Self {
            path: PathBuf::from(path),
        })
    }

    /// Build an endpoint directly from a socket path.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Socket path this endpoint resolves to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn invalid(input: &str, reason: &'static str) -> TransportError {
    TransportError::InvalidEndpoint {
        endpoint: input.to_string(),
        reason,
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{IPC_SCHEME}{}", self.path.display())
    }
}
