use crate::credentials::CredentialSource;
use crate::decode::Decode;
use crate::fetch::{FetchConfig, FetchReport, Fetcher, SpeechRequest};
use crate::playback::{PlaybackConfig, PlaybackReport, PlaybackStage};
use crate::queue::transfer_queue;
use crate::sink::{AudioSink, SinkError};
use crate::{Result, VoxError};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Configuration for one speech pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub model: String,
    pub voice: String,
    pub rate: f32,
    pub fetch: FetchConfig,
    pub playback: PlaybackConfig,
    /// Transfer queue capacity in chunks; 0 means unbounded
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: "tts-1-hd".to_string(),
            voice: "echo".to_string(),
            rate: 0.85,
            fetch: FetchConfig::default(),
            playback: PlaybackConfig::default(),
            queue_capacity: 64,
        }
    }
}

/// Outcome of [`Pipeline::speak`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeechReport {
    pub fetch: FetchReport,
    pub playback: PlaybackReport,
}

/// Wires credentials, fetcher, transfer queue and playback stage together
pub struct Pipeline {
    cfg: PipelineConfig,
    fetcher: Fetcher,
    credentials: Arc<dyn CredentialSource>,
}

impl Pipeline {
    pub fn new(cfg: PipelineConfig, credentials: Arc<dyn CredentialSource>) -> Result<Self> {
        cfg.playback.validate()?;
        let fetcher = Fetcher::new(cfg.fetch.clone())?;
        Ok(Self {
            cfg,
            fetcher,
            credentials,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    pub fn request_for(&self, text: &str) -> SpeechRequest {
        SpeechRequest {
            model: self.cfg.model.clone(),
            voice: self.cfg.voice.clone(),
            input: text.to_string(),
            rate: self.cfg.rate,
        }
    }

    /// Synthesize `text` and play it.
    ///
    /// Setup failures (credentials, opening the output) are returned before
    /// any network activity. Failures while streaming are logged and show up
    /// in the returned report instead.
    ///
    /// `open_sink` runs on the playback thread, so the output handle itself
    /// does not need to be `Send`.
    pub async fn speak<D, S, F>(&self, text: &str, decoder: D, open_sink: F) -> Result<SpeechReport>
    where
        D: Decode + 'static,
        S: AudioSink,
        F: FnOnce() -> std::result::Result<S, SinkError> + Send + 'static,
    {
        debug!(target = "pipeline", source = %self.credentials.describe(), "Resolving API credentials");
        let token = self.credentials.token().await?;
        let request = self.request_for(text);
        let stage = PlaybackStage::new(self.cfg.playback, decoder)?;

        let (tx, mut rx) = transfer_queue(self.cfg.queue_capacity);
        let (ready_tx, ready_rx) = oneshot::channel::<std::result::Result<(), SinkError>>();

        let playback = tokio::task::spawn_blocking(move || match open_sink() {
            Ok(sink) => {
                let _ = ready_tx.send(Ok(()));
                Some(stage.run(&mut rx, sink))
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                None
            }
        });

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = playback.await;
                return Err(VoxError::Device(e));
            }
            Err(_) => {
                return Err(join_failure("playback", playback.await.err()));
            }
        }

        let fetcher = self.fetcher.clone();
        let fetch_tx = tx.clone();
        let fetch = tokio::spawn(async move { fetcher.run(&request, &token, fetch_tx).await });

        let fetch_result = fetch.await;
        if tx.finish().await {
            warn!(target = "pipeline", "Fetcher exited without end-of-stream; sent it on its behalf");
        }
        drop(tx);
        let playback_result = playback.await;

        let fetch_report = fetch_result.map_err(|e| join_failure("fetch", Some(e)))?;
        let playback_report = match playback_result {
            Ok(Some(report)) => report,
            Ok(None) => return Err(VoxError::Task("playback exited before start".into())),
            Err(e) => return Err(join_failure("playback", Some(e))),
        };

        info!(
            target = "pipeline",
            bytes = fetch_report.bytes,
            cycles = playback_report.cycles,
            failed_cycles = playback_report.failed_cycles,
            "Speech generation and playback complete"
        );
        Ok(SpeechReport {
            fetch: fetch_report,
            playback: playback_report,
        })
    }
}

fn join_failure(unit: &str, err: Option<tokio::task::JoinError>) -> VoxError {
    let detail = err
        .map(|e| e.to_string())
        .unwrap_or_else(|| "exited unexpectedly".to_string());
    error!(target = "pipeline", unit, error = %detail, "Pipeline task failed");
    VoxError::Task(format!("{unit} task failed: {detail}"))
}
