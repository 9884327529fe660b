use crate::queue::ChunkSender;
use crate::{Result, VoxError};
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/audio/speech";

/// Largest chunk handed to the transfer queue
pub const DEFAULT_READ_SIZE: usize = 16_384;

/// Longest slice of an error body copied into logs
const ERROR_BODY_LIMIT: usize = 512;

/// HTTP settings for the fetcher
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub endpoint: String,
    pub connect_timeout_ms: u64,
    /// Whole-request timeout, body streaming included
    pub request_timeout_ms: u64,
    pub read_size: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connect_timeout_ms: 10_000,
            request_timeout_ms: 120_000,
            read_size: DEFAULT_READ_SIZE,
        }
    }
}

/// JSON body of the speech request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechRequest {
    pub model: String,
    pub voice: String,
    pub input: String,
    pub rate: f32,
}

/// What happened during one fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub chunks: u64,
    pub bytes: u64,
    pub status: Option<u16>,
    /// Set when the stream ended because of a failure
    pub error: Option<String>,
}

impl FetchReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Streams the synthesized audio into the transfer queue
#[derive(Clone)]
pub struct Fetcher {
    http: Client,
    cfg: FetchConfig,
}

impl Fetcher {
    pub fn new(cfg: FetchConfig) -> Result<Self> {
        if cfg.read_size == 0 {
            return Err(VoxError::Config("read_size must be greater than zero".into()));
        }
        let http = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .user_agent(concat!("voxpipe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| VoxError::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, cfg })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.cfg
    }

    /// Run one fetch to completion.
    ///
    /// Never fails: transport errors are logged and recorded in the report.
    /// The end-of-stream marker is pushed exactly once on every path.
    pub async fn run(&self, request: &SpeechRequest, token: &str, tx: ChunkSender) -> FetchReport {
        let mut report = FetchReport::default();
        if let Err(e) = self.stream_into(request, token, &tx, &mut report).await {
            error!(target = "fetch", error = %e, "Failed to stream audio");
            report.error = Some(e);
        }
        debug!(target = "fetch", chunks = report.chunks, bytes = report.bytes, "Streaming ended; sending end-of-stream");
        tx.finish().await;
        report
    }

    async fn stream_into(
        &self,
        request: &SpeechRequest,
        token: &str,
        tx: &ChunkSender,
        report: &mut FetchReport,
    ) -> std::result::Result<(), String> {
        debug!(target = "fetch", endpoint = %self.cfg.endpoint, model = %request.model, voice = %request.voice, "POST speech request");

        let resp = self
            .http
            .post(&self.cfg.endpoint)
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = resp.status();
        report.status = Some(status.as_u16());
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!(
                "status={} body={}",
                status,
                truncate(&body, ERROR_BODY_LIMIT)
            ));
        }
        info!(target = "fetch", %status, "Audio stream connected");

        let mut body = resp.bytes_stream();
        while let Some(frame) = body.next().await {
            let frame = frame.map_err(|e| format!("stream interrupted: {e}"))?;
            for chunk in split_chunks(frame, self.cfg.read_size) {
                let len = chunk.len() as u64;
                if tx.push(chunk).await.is_err() {
                    warn!(target = "fetch", "Playback stopped; abandoning download");
                    return Ok(());
                }
                report.chunks += 1;
                report.bytes += len;
                debug!(target = "fetch", bytes = len, total = report.bytes, "Received audio chunk");
            }
        }
        Ok(())
    }
}

/// Split a network frame into pieces of at most `max` bytes without copying.
pub fn split_chunks(mut frame: Bytes, max: usize) -> Vec<Bytes> {
    let max = max.max(1);
    let mut out = Vec::with_capacity(frame.len() / max + 1);
    while frame.len() > max {
        out.push(frame.split_to(max));
    }
    if !frame.is_empty() {
        out.push(frame);
    }
    out
}

fn truncate(s: &str, limit: usize) -> &str {
    if s.len() <= limit {
        return s;
    }
    let mut end = limit;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
