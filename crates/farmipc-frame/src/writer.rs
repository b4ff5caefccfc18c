use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

/// Writes complete frames to any `Write` stream.
///
/// A frame is written whole or not at all from the peer's point of view:
/// signal interruptions mid-frame are retried. Any other error leaves the
/// stream in an unknown position and the connection should be discarded.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode and send one message payload (blocking).
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_frame(payload, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::codec::decode_frame;
    use crate::reader::FrameReader;

    fn written(writer: FrameWriter<Cursor<Vec<u8>>>) -> BytesMut {
        BytesMut::from(writer.into_inner().into_inner().as_slice())
    }

    #[test]
    fn writes_decodable_frames() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));
        writer.send(b"nEvents:12").unwrap();
        writer.send(b"ErrorMessage:link down").unwrap();

        let mut wire = written(writer);
        let first = decode_frame(&mut wire, usize::MAX).unwrap().unwrap();
        let second = decode_frame(&mut wire, usize::MAX).unwrap().unwrap();
        assert_eq!(first.as_ref(), b"nEvents:12");
        assert_eq!(second.as_ref(), b"ErrorMessage:link down");
    }

    #[test]
    fn payload_too_large_rejected_before_write() {
        let cfg = FrameConfig {
            max_payload_size: 4,
        };
        let mut writer = FrameWriter::with_config(Cursor::new(Vec::new()), cfg);

        let err = writer.send(b"oversized").unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
        assert!(written(writer).is_empty());
    }

    #[test]
    fn interrupted_write_and_flush_are_retried() {
        let sink = InterruptOnce {
            write_interrupted: false,
            flush_interrupted: false,
            data: Vec::new(),
        };
        let mut writer = FrameWriter::new(sink);
        writer.send(b"retry").unwrap();

        let mut wire = BytesMut::from(writer.into_inner().data.as_slice());
        let payload = decode_frame(&mut wire, usize::MAX).unwrap().unwrap();
        assert_eq!(payload.as_ref(), b"retry");
    }

    #[test]
    fn zero_length_write_means_closed() {
        let mut writer = FrameWriter::new(ZeroWriter);
        assert!(matches!(
            writer.send(b"x"),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    #[cfg(unix)]
    fn broken_pipe_is_an_io_error() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        drop(right);
        let mut writer = FrameWriter::new(left);

        // The first write may still land in the kernel buffer on some
        // platforms; the second must observe the closed peer.
        let _ = writer.send(b"first");
        let err = writer.send(b"second").unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));
    }

    #[test]
    #[cfg(unix)]
    fn writer_to_reader_over_socket_pair() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = FrameWriter::new(left);
        let mut reader = FrameReader::new(right);

        writer.send(&1u32.to_le_bytes()).unwrap();
        assert_eq!(reader.read_frame().unwrap().as_ref(), &[1, 0, 0, 0]);
    }

    struct InterruptOnce {
        write_interrupted: bool,
        flush_interrupted: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptOnce {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.write_interrupted {
                self.write_interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if !self.flush_interrupted {
                self.flush_interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
