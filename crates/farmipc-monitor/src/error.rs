use std::path::PathBuf;

use farmipc_socket::SocketError;
use farmipc_transport::TransportError;

/// Errors raised while setting up monitoring channels.
///
/// Channel operations themselves never fail; see [`Outcome`] for how their
/// transport errors are classified.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// The configuration file could not be read.
    #[error("failed to read config {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The configuration is not valid JSON for [`MonitorConfig`](crate::MonitorConfig).
    #[error("invalid config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// A channel address is not a usable endpoint.
    #[error("invalid {channel} address: {source}")]
    InvalidAddress {
        channel: &'static str,
        source: TransportError,
    },
}

pub type Result<T> = std::result::Result<T, MonitorError>;

/// Result of one send or receive on a channel handle.
#[derive(Debug)]
pub enum Outcome<T> {
    /// The operation completed.
    Done(T),
    /// The receive timeout elapsed without a message.
    TimedOut,
    /// The operation failed but the handle is still usable.
    Transient(SocketError),
    /// The handle is broken and must be destroyed.
    Fatal(SocketError),
}

impl<T> Outcome<T> {
    /// Classify the result of a send.
    pub fn from_send(result: farmipc_socket::Result<T>) -> Self {
        match result {
            Ok(value) => Outcome::Done(value),
            Err(err) => Self::from_error(err),
        }
    }

    /// Classify the result of a timeout-bounded receive.
    pub fn from_recv(result: farmipc_socket::Result<Option<T>>) -> Self {
        match result {
            Ok(Some(value)) => Outcome::Done(value),
            Ok(None) => Outcome::TimedOut,
            Err(err) => Self::from_error(err),
        }
    }

    fn from_error(err: SocketError) -> Self {
        if err.is_transient() {
            Outcome::Transient(err)
        } else {
            Outcome::Fatal(err)
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Outcome::Fatal(_))
    }
}
