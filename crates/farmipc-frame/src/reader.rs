use std::io::Read;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use farmipc_transport::IpcStream;

use crate::codec::{decode_frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete message payloads from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete payloads.
/// Interruptions and timeouts are reported to the caller instead of being
/// retried; bytes of a partially received frame stay buffered, so the next
/// call resumes where the previous one stopped.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete payload (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached,
    /// `Err(FrameError::Interrupted)` on a signal and `Err(FrameError::TimedOut)`
    /// when the stream's read timeout elapses.
    pub fn read_frame(&mut self) -> Result<Bytes> {
        loop {
            if let Some(payload) = decode_frame(&mut self.buf, self.config.max_payload_size)? {
                return Ok(payload);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = self.inner.read(&mut chunk).map_err(FrameError::from_read)?;
            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl FrameReader<IpcStream> {
    /// Bound the next reads by `timeout` (`None` blocks indefinitely).
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_read_timeout(timeout).map_err(transport_to_frame_error)
    }
}

fn transport_to_frame_error(err: farmipc_transport::TransportError) -> FrameError {
    match err {
        farmipc_transport::TransportError::Io(io)
        | farmipc_transport::TransportError::Accept(io) => FrameError::Io(io),
        farmipc_transport::TransportError::Bind { source, .. }
        | farmipc_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
