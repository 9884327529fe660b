//! Decode step: compressed audio in, raw PCM out.
//!
//! One call is one decode cycle. Implementations are synchronous and must not
//! leave any work running once they return.

use thiserror::Error;

/// Output of a successful decode cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    /// Raw PCM bytes in the sink's [`PcmFormat`](crate::PcmFormat)
    pub pcm: Vec<u8>,
    /// Diagnostic text emitted by the decoder (may be empty)
    pub diagnostics: String,
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("failed to start decoder: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("decoder I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("decoder exited with {}: {}", exit_label(.code), .diagnostics.trim())]
    Exit {
        code: Option<i32>,
        diagnostics: String,
    },

    #[error("{0}")]
    Other(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("code {c}"),
        None => "signal".to_string(),
    }
}

pub trait Decode: Send {
    /// Decode one buffer. The buffer is handed over by value.
    fn decode(&mut self, compressed: Vec<u8>) -> Result<Decoded, DecodeError>;
}

impl<D: Decode + ?Sized> Decode for Box<D> {
    fn decode(&mut self, compressed: Vec<u8>) -> Result<Decoded, DecodeError> {
        (**self).decode(compressed)
    }
}
