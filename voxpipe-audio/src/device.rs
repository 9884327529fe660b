//! Direct output to an audio device using cpal.
//!
//! Linux build note: you need ALSA development headers for `cpal`.
//! On Debian/Ubuntu:
//!   sudo apt-get update && sudo apt-get install -y libasound2-dev pkg-config
//!
//! Samples travel to the device callback through a small bounded queue of
//! blocks, so `write` blocks once the device is that far behind. When the
//! device cannot run at the PCM rate, the callback resamples by sample-hold.
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Sample;
use crossbeam::channel::{bounded, Receiver, SendTimeoutError, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use voxpipe_core::{AudioSink, PcmFormat, SinkError};

/// Configuration for device output
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    /// Optional output device name substring to match
    pub device_name: Option<String>,
    /// Samples per block handed to the callback
    pub block_samples: usize,
    /// Blocks queued ahead of the device before `write` blocks
    pub queue_blocks: usize,
    /// Give up on a write when the device accepts nothing for this long
    pub write_timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_name: std::env::var("SPEAK_DEVICE").ok().filter(|s| !s.is_empty()),
            block_samples: 2_048,
            queue_blocks: 8,
            write_timeout_ms: 5_000,
        }
    }
}

pub struct CpalSink {
    format: PcmFormat,
    cfg: DeviceConfig,
    stream: Option<cpal::Stream>,
    tx: Option<Sender<Vec<i16>>>,
    /// Samples written but not yet consumed by the callback
    pending: Arc<AtomicUsize>,
    device_rate: u32,
}

impl CpalSink {
    pub fn open(format: PcmFormat, cfg: DeviceConfig) -> Result<Self, SinkError> {
        let host = cpal::default_host();
        let device = select_device(&host, cfg.device_name.as_deref())
            .ok_or_else(|| SinkError::Open("no output device available".into()))?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".into());

        let supported = pick_config(&device, format)?;
        let device_rate = supported.sample_rate().0;
        let device_channels = supported.channels() as usize;
        let stream_config: cpal::StreamConfig = supported.clone().into();
        if device_rate != format.sample_rate_hz {
            warn!(
                target = "sink",
                "Device runs at {}Hz; resampling from {}Hz", device_rate, format.sample_rate_hz
            );
        }

        let (tx, rx) = bounded::<Vec<i16>>(cfg.queue_blocks.max(1));
        let pending = Arc::new(AtomicUsize::new(0));
        let feeder = Feeder::new(
            rx,
            Arc::clone(&pending),
            format.sample_rate_hz as f64 / device_rate as f64,
            format.channels as usize,
        );

        let err_fn = |err| {
            error!(target = "sink", "cpal output stream error: {}", err);
        };
        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => {
                build_output_stream::<f32>(&device, &stream_config, device_channels, feeder, err_fn)
            }
            cpal::SampleFormat::I16 => {
                build_output_stream::<i16>(&device, &stream_config, device_channels, feeder, err_fn)
            }
            cpal::SampleFormat::U16 => {
                build_output_stream::<u16>(&device, &stream_config, device_channels, feeder, err_fn)
            }
            other => Err(SinkError::Open(format!("Unsupported sample format: {:?}", other))),
        }?;
        stream
            .play()
            .map_err(|e| SinkError::Open(format!("failed to start output stream: {}", e)))?;

        info!(
            target = "sink",
            "Device output started: device=\"{}\" rate={}Hz ch={} fmt={:?}",
            device_name,
            device_rate,
            device_channels,
            supported.sample_format()
        );
        Ok(Self {
            format,
            cfg,
            stream: Some(stream),
            tx: Some(tx),
            pending,
            device_rate,
        })
    }

    /// Wait for queued samples to play out, bounded by their duration plus slack.
    fn drain(&self) {
        let queued = self.pending.load(Ordering::Acquire);
        let secs = queued as f64 / (self.format.sample_rate_hz as f64 * self.format.channels as f64);
        let deadline = Instant::now() + Duration::from_secs_f64(secs) + Duration::from_millis(500);
        while self.pending.load(Ordering::Acquire) > 0 {
            if Instant::now() >= deadline {
                warn!(
                    target = "sink",
                    remaining = self.pending.load(Ordering::Acquire),
                    rate = self.device_rate,
                    "Device stopped consuming; discarding queued samples"
                );
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl AudioSink for CpalSink {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn write(&mut self, pcm: &[u8]) -> Result<(), SinkError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| SinkError::Write("output already closed".into()))?;
        let timeout = Duration::from_millis(self.cfg.write_timeout_ms);
        let samples: Vec<i16> = pcm
            .chunks_exact(PcmFormat::BYTES_PER_SAMPLE)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        for block in samples.chunks(self.cfg.block_samples.max(1)) {
            self.pending.fetch_add(block.len(), Ordering::AcqRel);
            match tx.send_timeout(block.to_vec(), timeout) {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(b)) | Err(SendTimeoutError::Disconnected(b)) => {
                    self.pending.fetch_sub(b.len(), Ordering::AcqRel);
                    return Err(SinkError::Write(format!(
                        "device did not accept samples within {}ms",
                        self.cfg.write_timeout_ms
                    )));
                }
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        if self.tx.is_none() {
            return Ok(());
        }
        self.drain();
        drop(self.tx.take());
        if let Some(stream) = self.stream.take() {
            stream
                .pause()
                .map_err(|e| SinkError::Close(format!("failed to stop output stream: {}", e)))?;
        }
        info!(target = "sink", "Device output stopped");
        Ok(())
    }
}

fn select_device(host: &cpal::Host, needle: Option<&str>) -> Option<cpal::Device> {
    if let Some(needle) = needle {
        match host.output_devices() {
            Ok(devices) => {
                for dev in devices {
                    if let Ok(name) = dev.name() {
                        if name.to_lowercase().contains(&needle.to_lowercase()) {
                            info!(target = "sink", "Selected output device by SPEAK_DEVICE='{}': {}", needle, name);
                            return Some(dev);
                        }
                    }
                }
                warn!(target = "sink", "No output device matches '{}'; using default", needle);
            }
            Err(e) => warn!(target = "sink", "Failed to list output devices: {}", e),
        }
    }
    host.default_output_device()
}

/// Prefer a config that runs at the PCM rate, then float over integer
/// formats, then fewer channels. Falls back to the device default.
fn pick_config(
    device: &cpal::Device,
    format: PcmFormat,
) -> Result<cpal::SupportedStreamConfig, SinkError> {
    fn fmt_rank(fmt: cpal::SampleFormat) -> usize {
        match fmt {
            cpal::SampleFormat::F32 => 3,
            cpal::SampleFormat::I16 => 2,
            cpal::SampleFormat::U16 => 1,
            _ => 0,
        }
    }

    let rate = format.sample_rate_hz;
    let mut candidates: Vec<cpal::SupportedStreamConfig> = device
        .supported_output_configs()
        .map_err(|e| SinkError::Open(format!("failed to query output configs: {}", e)))?
        .filter(|r| fmt_rank(r.sample_format()) > 0)
        .filter(|r| r.min_sample_rate().0 <= rate && r.max_sample_rate().0 >= rate)
        .map(|r| r.with_sample_rate(cpal::SampleRate(rate)))
        .collect();
    candidates.sort_by(|a, b| {
        fmt_rank(b.sample_format())
            .cmp(&fmt_rank(a.sample_format()))
            .then(a.channels().cmp(&b.channels()))
    });

    match candidates.into_iter().next() {
        Some(best) => Ok(best),
        None => device
            .default_output_config()
            .map_err(|e| SinkError::Open(format!("failed to get default output config: {}", e))),
    }
}

fn build_output_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    device_channels: usize,
    mut feeder: Feeder,
    err_fn: fn(cpal::StreamError),
) -> Result<cpal::Stream, SinkError>
where
    T: cpal::SizedSample + cpal::FromSample<i16> + Send + 'static,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                for frame in data.chunks_mut(device_channels.max(1)) {
                    let value = T::from_sample(feeder.next_sample());
                    for out in frame.iter_mut() {
                        *out = value;
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| SinkError::Open(format!("failed to build output stream: {}", e)))
}

/// Callback-side reader: pulls blocks without blocking, outputs silence on
/// underrun, and steps through samples at the source/device rate ratio.
struct Feeder {
    rx: Receiver<Vec<i16>>,
    pending: Arc<AtomicUsize>,
    step: f64,
    channels: usize,
    block: Vec<i16>,
    pos: f64,
}

impl Feeder {
    fn new(rx: Receiver<Vec<i16>>, pending: Arc<AtomicUsize>, step: f64, channels: usize) -> Self {
        Self {
            rx,
            pending,
            step,
            channels: channels.max(1),
            block: Vec::new(),
            pos: 0.0,
        }
    }

    /// Next mono sample for one device frame
    fn next_sample(&mut self) -> i16 {
        while self.pos as usize * self.channels >= self.block.len() {
            if !self.block.is_empty() {
                let frames = self.block.len() / self.channels;
                self.pending.fetch_sub(self.block.len(), Ordering::AcqRel);
                self.pos -= frames as f64;
                self.block.clear();
            }
            match self.rx.try_recv() {
                Ok(block) => self.block = block,
                Err(_) => {
                    self.pos = 0.0;
                    return 0;
                }
            }
        }
        let frame = self.pos as usize * self.channels;
        // Downmix interleaved channels to one value
        let sum: i32 = self.block[frame..frame + self.channels]
            .iter()
            .map(|&s| s as i32)
            .sum();
        self.pos += self.step;
        (sum / self.channels as i32) as i16
    }
}
