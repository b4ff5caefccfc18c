use farmipc_frame::FrameError;
use farmipc_transport::{Endpoint, TransportError};

/// Errors that can occur in socket operations.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The messaging context was stopped; no new sockets are handed out.
    #[error("messaging context stopped")]
    ContextStopped,

    /// Another socket of the same context is already bound to the endpoint.
    #[error("endpoint {0} already bound in this context")]
    AddressInUse(Endpoint),

    /// The send queue reached its high-water mark.
    #[error("send queue full ({0} messages pending)")]
    QueueFull(usize),

    /// The socket's background machinery is gone.
    #[error("socket closed")]
    Closed,
}

impl SocketError {
    /// Transient errors leave the socket usable; the caller may retry at once.
    ///
    /// Signal interruptions and a full send queue are transient, everything
    /// else means the socket should be torn down and recreated.
    pub fn is_transient(&self) -> bool {
        match self {
            SocketError::Transport(err) => err.is_transient(),
            SocketError::Frame(FrameError::Interrupted) => true,
            SocketError::QueueFull(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SocketError>;
