use std::io::{ErrorKind, Read};

use crate::error::{FrameError, Result};
use crate::extractor::{ExtractorConfig, Frame, FrameExtractor};

const READ_CHUNK_SIZE: usize = 4 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally. A read timeout surfaces as
/// `FrameError::Io` without losing buffered bytes, so the caller can simply
/// call `read_frame` again.
pub struct FrameReader<T> {
    inner: T,
    extractor: FrameExtractor,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, ExtractorConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: ExtractorConfig) -> Self {
        Self {
            inner,
            extractor: FrameExtractor::with_config(config),
        }
    }

    /// Read the next complete frame (blocking up to the stream's timeout).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.extractor.next_frame() {
                return Ok(frame);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            // Frames are pulled one at a time at the top of the loop.
            let _ = self.extractor.feed(&chunk[..read]);
        }
    }

    /// Bytes buffered but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.extractor.buffered()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}
