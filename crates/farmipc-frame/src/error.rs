use std::io::ErrorKind;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header contains an invalid magic number.
    #[error("invalid frame magic (expected 0x464d \"FM\")")]
    InvalidMagic,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A blocking read was interrupted by a signal. Buffered bytes are kept.
    #[error("frame read interrupted")]
    Interrupted,

    /// The read timeout elapsed before a complete frame arrived.
    #[error("frame read timed out")]
    TimedOut,

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// Classify a read error from the underlying stream.
    pub(crate) fn from_read(err: std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::Interrupted => FrameError::Interrupted,
            ErrorKind::WouldBlock | ErrorKind::TimedOut => FrameError::TimedOut,
            _ => FrameError::Io(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
