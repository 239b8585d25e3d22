use std::io::{ErrorKind, Write};

use tracing::trace;

use crate::error::{FrameError, Result};
use crate::extractor::Frame;

/// Writes frames to any `Write` stream.
///
/// Frame bytes go out unchanged and the stream is not flushed after each
/// write; call [`FrameWriter::flush`] when a caller needs it.
pub struct FrameWriter<T> {
    inner: T,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Write a complete frame (blocking).
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.write_raw(frame.as_bytes())
    }

    /// Write bytes exactly as given.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < bytes.len() {
            match self.inner.write(&bytes[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        trace!(len = bytes.len(), "frame written");
        Ok(())
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
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

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn frame_bytes_are_written_verbatim() {
        let frame = Frame::from_slice(br#"{ "spaced" : [1, 2] }"#).unwrap();
        let mut writer = FrameWriter::new(Vec::new());
        writer.write_frame(&frame).unwrap();
        assert_eq!(writer.into_inner(), br#"{ "spaced" : [1, 2] }"#.to_vec());
    }

    #[test]
    fn short_writes_are_completed() {
        let mut writer = FrameWriter::new(TwoBytesAtATime::default());
        writer.write_raw(br#"{"abc":123}"#).unwrap();
        let inner = writer.into_inner();
        assert_eq!(inner.out, br#"{"abc":123}"#.to_vec());
        assert_eq!(inner.flushes, 0);
    }

    #[test]
    fn zero_write_means_closed() {
        let mut writer = FrameWriter::new(Closed);
        let err = writer.write_raw(b"{}").unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[derive(Default)]
    struct TwoBytesAtATime {
        out: Vec<u8>,
        flushes: usize,
    }

    impl Write for TwoBytesAtATime {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(2);
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    struct Closed;

    impl Write for Closed {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
