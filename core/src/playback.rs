//! Buffering decoder + player.
//!
//! Pulls compressed chunks from the transfer queue, accumulates them until a
//! size threshold is reached, decodes the whole buffer in one cycle and
//! writes the resulting PCM to the output before accumulating again. The
//! first cycle uses a larger threshold than the following ones.
//!
//! Streaming failures never abort the caller: a cycle whose decode or device
//! write fails is skipped, later cycles still run, and the output is closed
//! exactly once on every path.

use crate::decode::{Decode, DecodeError};
use crate::queue::ChunkReceiver;
use crate::sink::{AudioSink, SinkGuard};
use crate::{Result, VoxError};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error, info, warn};

pub const DEFAULT_INITIAL_THRESHOLD: usize = 65_536;
pub const DEFAULT_THRESHOLD: usize = 16_384;

/// Flush thresholds for the accumulation buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackConfig {
    /// Bytes to accumulate before the first decode cycle
    pub initial_threshold: usize,
    /// Bytes to accumulate before each later decode cycle
    pub threshold: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            initial_threshold: DEFAULT_INITIAL_THRESHOLD,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl PlaybackConfig {
    pub fn validate(&self) -> Result<()> {
        if self.initial_threshold == 0 || self.threshold == 0 {
            return Err(VoxError::Config(
                "playback thresholds must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Statistics for one playback session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    pub chunks_received: u64,
    pub bytes_received: u64,
    /// Decode cycles attempted (successful or not)
    pub cycles: u64,
    pub failed_cycles: u64,
    /// Compressed bytes handed to the decoder
    pub bytes_decoded: u64,
    /// PCM bytes accepted by the output
    pub pcm_bytes_written: u64,
    /// Cycles whose PCM the output rejected
    pub failed_writes: u64,
    pub device_failed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Accumulating,
    Decoding,
    Draining,
    Done,
}

pub struct PlaybackStage<D: Decode> {
    cfg: PlaybackConfig,
    decoder: D,
}

impl<D: Decode> PlaybackStage<D> {
    pub fn new(cfg: PlaybackConfig, decoder: D) -> Result<Self> {
        cfg.validate()?;
        Ok(Self { cfg, decoder })
    }

    /// Run until end-of-stream, then close the output.
    ///
    /// Blocks the calling thread; run it on a blocking-capable thread.
    pub fn run<S: AudioSink>(mut self, rx: &mut ChunkReceiver, sink: S) -> PlaybackReport {
        let mut sink = SinkGuard::new(sink);
        let format = sink.get_ref().format();
        info!(target = "playback", %format, "Playback started");

        let report = self.run_loop(rx, &mut sink);

        if let Err(e) = sink.close() {
            error!(target = "playback", error = %e, "Failed to stop audio output");
        }
        info!(
            target = "playback",
            cycles = report.cycles,
            failed = report.failed_cycles,
            bytes = report.bytes_received,
            pcm_bytes = report.pcm_bytes_written,
            "Playback complete"
        );
        report
    }

    fn run_loop<S: AudioSink>(
        &mut self,
        rx: &mut ChunkReceiver,
        sink: &mut SinkGuard<S>,
    ) -> PlaybackReport {
        let mut report = PlaybackReport::default();
        let mut buffer: Vec<u8> = Vec::with_capacity(self.cfg.initial_threshold);
        let mut threshold = self.cfg.initial_threshold;
        let mut state = State::Accumulating;

        while state != State::Done {
            state = match state {
                State::Accumulating => match rx.blocking_pop() {
                    Some(chunk) => {
                        report.chunks_received += 1;
                        report.bytes_received += chunk.len() as u64;
                        buffer.extend_from_slice(&chunk);
                        debug!(target = "playback", buffered = buffer.len(), "Buffered audio");

                        if buffer.len() >= threshold {
                            State::Decoding
                        } else {
                            State::Accumulating
                        }
                    }
                    None => {
                        debug!(target = "playback", "End of audio stream detected");
                        State::Draining
                    }
                },
                State::Decoding => {
                    threshold = self.cfg.threshold;
                    self.cycle(&mut buffer, sink, &mut report);
                    State::Accumulating
                }
                State::Draining => {
                    if !buffer.is_empty() {
                        debug!(target = "playback", remaining = buffer.len(), "Processing remaining audio");
                        self.cycle(&mut buffer, sink, &mut report);
                    }
                    State::Done
                }
                State::Done => State::Done,
            };
        }
        report
    }

    /// One decode cycle. Leaves `buffer` empty.
    fn cycle<S: AudioSink>(
        &mut self,
        buffer: &mut Vec<u8>,
        sink: &mut SinkGuard<S>,
        report: &mut PlaybackReport,
    ) {
        let compressed = std::mem::take(buffer);
        let size = compressed.len();
        report.cycles += 1;
        report.bytes_decoded += size as u64;
        debug!(target = "playback", cycle = report.cycles, bytes = size, "Decoding audio");

        let decoder = &mut self.decoder;
        let result = panic::catch_unwind(AssertUnwindSafe(move || decoder.decode(compressed)))
            .unwrap_or_else(|_| Err(DecodeError::Other("decoder panicked".into())));
        let decoded = match result {
            Ok(d) => d,
            Err(e) => {
                report.failed_cycles += 1;
                error!(target = "playback", cycle = report.cycles, bytes = size, error = %e, "Decode failed; skipping segment");
                return;
            }
        };
        if !decoded.diagnostics.trim().is_empty() {
            debug!(target = "decode", diagnostics = %decoded.diagnostics.trim(), "Decoder diagnostics");
        }
        if decoded.pcm.is_empty() {
            warn!(target = "playback", cycle = report.cycles, "Decoder produced no samples");
            return;
        }

        debug!(target = "playback", pcm_bytes = decoded.pcm.len(), "Writing PCM to output");
        match sink.write(&decoded.pcm) {
            Ok(()) => report.pcm_bytes_written += decoded.pcm.len() as u64,
            Err(e) => {
                report.failed_writes += 1;
                report.device_failed = true;
                error!(
                    target = "playback",
                    cycle = report.cycles,
                    pcm_bytes = decoded.pcm.len(),
                    error = %e,
                    "Audio output rejected segment; skipping"
                );
            }
        }
    }
}
