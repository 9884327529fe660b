//! Audio output device abstraction.

use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

/// Raw PCM layout shared by the decoder and the output device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate_hz: u32,
    pub channels: u16,
}

impl PcmFormat {
    /// Signed 16-bit little-endian, mono, 24 kHz
    pub const SPEECH: PcmFormat = PcmFormat {
        sample_rate_hz: 24_000,
        channels: 1,
    };

    pub const BYTES_PER_SAMPLE: usize = 2;

    /// Bytes per frame (one sample for every channel)
    pub fn frame_bytes(&self) -> usize {
        Self::BYTES_PER_SAMPLE * self.channels as usize
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self::SPEECH
    }
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s16le/{}ch/{}Hz", self.channels, self.sample_rate_hz)
    }
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to open output: {0}")]
    Open(String),

    #[error("failed to write samples: {0}")]
    Write(String),

    #[error("failed to close output: {0}")]
    Close(String),
}

/// A live output stream. `write` blocks until the device has accepted every
/// byte; `close` stops and releases the device.
pub trait AudioSink {
    fn format(&self) -> PcmFormat;

    fn write(&mut self, pcm: &[u8]) -> Result<(), SinkError>;

    fn close(&mut self) -> Result<(), SinkError>;
}

impl<S: AudioSink + ?Sized> AudioSink for Box<S> {
    fn format(&self) -> PcmFormat {
        (**self).format()
    }

    fn write(&mut self, pcm: &[u8]) -> Result<(), SinkError> {
        (**self).write(pcm)
    }

    fn close(&mut self) -> Result<(), SinkError> {
        (**self).close()
    }
}

/// Owns a sink for one session and closes it exactly once: explicitly via
/// [`SinkGuard::close`], or on drop (including unwinding).
pub struct SinkGuard<S: AudioSink> {
    sink: S,
    closed: bool,
}

impl<S: AudioSink> SinkGuard<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            closed: false,
        }
    }

    pub fn write(&mut self, pcm: &[u8]) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::Write("output already closed".into()));
        }
        self.sink.write(pcm)
    }

    /// Stop and close the device. Subsequent calls do nothing.
    pub fn close(&mut self) -> Result<(), SinkError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!(target = "sink", "Closing audio output");
        self.sink.close()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn get_ref(&self) -> &S {
        &self.sink
    }
}

impl<S: AudioSink> Drop for SinkGuard<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(target = "sink", error = %e, "Failed to close audio output");
        }
    }
}

/// Discards every sample. Useful for dry runs.
#[derive(Debug, Default)]
pub struct NullSink {
    format: PcmFormat,
    written: u64,
}

impl NullSink {
    pub fn new(format: PcmFormat) -> Self {
        Self { format, written: 0 }
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl AudioSink for NullSink {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn write(&mut self, pcm: &[u8]) -> Result<(), SinkError> {
        self.written += pcm.len() as u64;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        debug!(target = "sink", bytes = self.written, "Null output closed");
        Ok(())
    }
}
