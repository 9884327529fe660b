// Audio capabilities for the speech pipeline

// Shared binary lookup
pub mod utils;

pub mod ffmpeg;

pub use ffmpeg::{FfmpegConfig, FfmpegDecoder};

pub mod player;

pub use player::{PlayerSpec, ProcessSink};

#[cfg(feature = "device")]
pub mod device;

#[cfg(feature = "device")]
pub use device::{CpalSink, DeviceConfig};
