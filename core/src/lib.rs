// Voxpipe Core Library
// Streaming text-to-speech pipeline: fetch → buffer → decode → play

pub mod credentials;
pub mod decode;
pub mod fetch;
pub mod pipeline;
pub mod playback;
pub mod queue;
pub mod sink;

// Export core types
pub use credentials::{CredentialSource, EnvCredentials, KeychainCredentials, StaticCredentials};
pub use decode::{Decode, DecodeError, Decoded};
pub use fetch::{FetchConfig, FetchReport, Fetcher, SpeechRequest};
pub use pipeline::{Pipeline, PipelineConfig, SpeechReport};
pub use playback::{PlaybackConfig, PlaybackReport, PlaybackStage};
pub use queue::{transfer_queue, ChunkReceiver, ChunkSender, QueueClosed, StreamItem};
pub use sink::{AudioSink, NullSink, PcmFormat, SinkError, SinkGuard};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Credential error: {0}")]
    Credentials(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Audio device error: {0}")]
    Device(#[from] SinkError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Task error: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VoxError>;
