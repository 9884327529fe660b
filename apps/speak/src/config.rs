use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use voxpipe_audio::{FfmpegConfig, PlayerSpec};
use voxpipe_core::{
    CredentialSource, EnvCredentials, FetchConfig, KeychainCredentials, PcmFormat, PipelineConfig,
    PlaybackConfig, Result, VoxError,
};

/// High-level configuration for the `speak` CLI
#[derive(Clone, Debug)]
pub struct SpeakConfig {
    pub api: ApiConfig,
    pub credentials: CredentialsConfig,
    pub pipeline: PipelineTuning,
    pub decoder: DecoderConfig,
    pub playback: OutputConfig,
}

/// Speech API endpoint and request parameters
#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    pub rate: f32,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialKind {
    Keychain,
    Env,
}

/// Where the API key comes from
#[derive(Clone, Debug)]
pub struct CredentialsConfig {
    pub source: CredentialKind,
    pub service: String,
    pub account: String,
    pub env_var: String,
}

/// Buffering and queueing knobs
#[derive(Clone, Debug)]
pub struct PipelineTuning {
    pub initial_threshold: usize,
    pub threshold: usize,
    pub queue_capacity: usize,
    pub read_size: usize,
}

#[derive(Clone, Debug, Default)]
pub struct DecoderConfig {
    /// Explicit ffmpeg path; `FFMPEG_BIN` or `PATH` otherwise
    pub ffmpeg_bin: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputBackend {
    /// Pipe into aplay/paplay/pacat/play/ffplay
    Process,
    /// Write straight to the sound card (needs the `device` feature)
    Device,
    /// Discard audio
    Null,
}

#[derive(Clone, Debug)]
pub struct OutputConfig {
    pub backend: OutputBackend,
    pub player: Option<String>,
    pub player_args: Option<Vec<String>>,
    pub device: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: voxpipe_core::fetch::DEFAULT_ENDPOINT.to_string(),
            model: "tts-1-hd".to_string(),
            voice: "echo".to_string(),
            rate: 0.85,
            connect_timeout_ms: 10_000,
            request_timeout_ms: 120_000,
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        // macOS keeps the key in the login keychain; elsewhere use the environment
        let source = if cfg!(target_os = "macos") {
            CredentialKind::Keychain
        } else {
            CredentialKind::Env
        };
        Self {
            source,
            service: "OpenAI_API_Key".to_string(),
            account: "bmf".to_string(),
            env_var: "OPENAI_API_KEY".to_string(),
        }
    }
}

impl Default for PipelineTuning {
    fn default() -> Self {
        let playback = PlaybackConfig::default();
        Self {
            initial_threshold: playback.initial_threshold,
            threshold: playback.threshold,
            queue_capacity: 64,
            read_size: voxpipe_core::fetch::DEFAULT_READ_SIZE,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            backend: OutputBackend::Process,
            player: None,
            player_args: None,
            device: None,
        }
    }
}

impl Default for SpeakConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            credentials: CredentialsConfig::default(),
            pipeline: PipelineTuning::default(),
            decoder: DecoderConfig::default(),
            playback: OutputConfig::default(),
        }
    }
}

impl SpeakConfig {
    /// Defaults, then environment, then a TOML file (path via SPEAK_CONFIG or ./speak.toml).
    pub fn load() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env(|k| std::env::var(k).ok());

        let path = std::env::var("SPEAK_CONFIG").unwrap_or_else(|_| "speak.toml".into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::debug!(target = "speak", path = %path, "No TOML config found; using defaults/env");
            return cfg;
        }
        match fs::read_to_string(p) {
            Ok(s) => match Self::overlay_toml(cfg.clone(), &s) {
                Ok(c) => {
                    tracing::debug!(target = "speak", path = %path, "Loaded TOML config");
                    c
                }
                Err(e) => {
                    tracing::warn!(target = "speak", error = %e, "Failed to parse TOML; using defaults");
                    cfg
                }
            },
            Err(e) => {
                tracing::warn!(target = "speak", error = %e, "Failed to read TOML; using defaults");
                cfg
            }
        }
    }

    /// Overlay a TOML document onto `base`.
    pub fn overlay_toml(base: Self, doc: &str) -> std::result::Result<Self, toml::de::Error> {
        let t: SpeakToml = toml::from_str(doc)?;
        Ok(t.overlay(base))
    }

    /// Apply `SPEAK_*` / `FFMPEG_BIN` overrides from `get`.
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        let get = |k: &str| get(k).filter(|s| !s.trim().is_empty());
        let parse_usize = |k: &str| get(k).and_then(|v| v.trim().parse::<usize>().ok());

        if let Some(v) = get("SPEAK_ENDPOINT") {
            self.api.endpoint = v;
        }
        if let Some(v) = get("SPEAK_MODEL") {
            self.api.model = v;
        }
        if let Some(v) = get("SPEAK_VOICE") {
            self.api.voice = v;
        }
        if let Some(v) = get("SPEAK_RATE").and_then(|v| v.trim().parse::<f32>().ok()) {
            self.api.rate = v;
        }
        if let Some(v) = get("SPEAK_TIMEOUT_MS").and_then(|v| v.trim().parse::<u64>().ok()) {
            self.api.request_timeout_ms = v;
        }
        if let Some(v) = get("SPEAK_CREDENTIALS").and_then(|v| parse_credential_kind(&v)) {
            self.credentials.source = v;
        }
        if let Some(v) = get("SPEAK_KEYCHAIN_SERVICE") {
            self.credentials.service = v;
        }
        if let Some(v) = get("SPEAK_KEYCHAIN_ACCOUNT") {
            self.credentials.account = v;
        }
        if let Some(v) = get("SPEAK_KEY_ENV") {
            self.credentials.env_var = v;
        }
        if let Some(v) = parse_usize("SPEAK_INITIAL_THRESHOLD") {
            self.pipeline.initial_threshold = v;
        }
        if let Some(v) = parse_usize("SPEAK_THRESHOLD") {
            self.pipeline.threshold = v;
        }
        if let Some(v) = parse_usize("SPEAK_QUEUE_CAPACITY") {
            self.pipeline.queue_capacity = v;
        }
        if let Some(v) = get("FFMPEG_BIN") {
            self.decoder.ffmpeg_bin = Some(PathBuf::from(v));
        }
        if let Some(v) = get("SPEAK_PLAYBACK").and_then(|v| parse_backend(&v)) {
            self.playback.backend = v;
        }
        if let Some(v) = get("SPEAK_PLAYER") {
            self.playback.player = Some(v);
        }
        if let Some(v) = get("SPEAK_DEVICE") {
            self.playback.device = Some(v);
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            model: self.api.model.clone(),
            voice: self.api.voice.clone(),
            rate: self.api.rate,
            fetch: FetchConfig {
                endpoint: self.api.endpoint.clone(),
                connect_timeout_ms: self.api.connect_timeout_ms,
                request_timeout_ms: self.api.request_timeout_ms,
                read_size: self.pipeline.read_size,
            },
            playback: PlaybackConfig {
                initial_threshold: self.pipeline.initial_threshold,
                threshold: self.pipeline.threshold,
            },
            queue_capacity: self.pipeline.queue_capacity,
        }
    }

    pub fn credential_source(&self) -> Arc<dyn CredentialSource> {
        match self.credentials.source {
            CredentialKind::Keychain => Arc::new(KeychainCredentials::new(
                self.credentials.service.clone(),
                self.credentials.account.clone(),
            )),
            CredentialKind::Env => Arc::new(EnvCredentials::new(self.credentials.env_var.clone())),
        }
    }

    /// Decoder settings; fails when no ffmpeg binary can be found.
    pub fn ffmpeg_config(&self) -> Result<FfmpegConfig> {
        let mut cfg = FfmpegConfig {
            extra_args: self.decoder.extra_args.clone(),
            format: PcmFormat::SPEECH,
            ..FfmpegConfig::default()
        };
        if let Some(bin) = &self.decoder.ffmpeg_bin {
            cfg.ffmpeg_bin = bin.clone();
        }
        let found = cfg.ffmpeg_bin.exists()
            || voxpipe_audio::utils::find_on_path(&cfg.ffmpeg_bin.to_string_lossy()).is_some();
        if !found {
            return Err(VoxError::Config(format!(
                "ffmpeg not found at {:?}; install it or set FFMPEG_BIN",
                cfg.ffmpeg_bin
            )));
        }
        Ok(cfg)
    }

    /// Player invocation for the process backend.
    pub fn player_spec(&self) -> Result<PlayerSpec> {
        let spec = PlayerSpec::detect(self.playback.player.as_deref(), PcmFormat::SPEECH)
            .ok_or_else(|| {
                VoxError::Config(
                    "no audio player found (aplay, paplay, pacat, play, ffplay); set SPEAK_PLAYER"
                        .into(),
                )
            })?;
        Ok(match &self.playback.player_args {
            Some(args) => spec.with_args(args.clone()),
            None => spec,
        })
    }
}

fn parse_credential_kind(s: &str) -> Option<CredentialKind> {
    match s.trim().to_ascii_lowercase().as_str() {
        "keychain" => Some(CredentialKind::Keychain),
        "env" => Some(CredentialKind::Env),
        other => {
            tracing::warn!(target = "speak", value = %other, "Unknown credential source; ignoring");
            None
        }
    }
}

fn parse_backend(s: &str) -> Option<OutputBackend> {
    match s.trim().to_ascii_lowercase().as_str() {
        "process" | "player" => Some(OutputBackend::Process),
        "device" | "cpal" => Some(OutputBackend::Device),
        "null" | "none" => Some(OutputBackend::Null),
        other => {
            tracing::warn!(target = "speak", value = %other, "Unknown playback backend; ignoring");
            None
        }
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct SpeakToml {
    pub api: Option<ApiToml>,
    pub credentials: Option<CredentialsToml>,
    pub pipeline: Option<PipelineToml>,
    pub decoder: Option<DecoderToml>,
    pub playback: Option<PlaybackToml>,
}

impl SpeakToml {
    fn overlay(self, mut base: SpeakConfig) -> SpeakConfig {
        if let Some(a) = self.api {
            a.apply(&mut base.api);
        }
        if let Some(c) = self.credentials {
            c.apply(&mut base.credentials);
        }
        if let Some(p) = self.pipeline {
            p.apply(&mut base.pipeline);
        }
        if let Some(d) = self.decoder {
            d.apply(&mut base.decoder);
        }
        if let Some(p) = self.playback {
            p.apply(&mut base.playback);
        }
        base
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct ApiToml {
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub rate: Option<f32>,
    pub connect_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
}
impl ApiToml {
    fn apply(self, a: &mut ApiConfig) {
        if let Some(x) = self.endpoint {
            a.endpoint = x;
        }
        if let Some(x) = self.model {
            a.model = x;
        }
        if let Some(x) = self.voice {
            a.voice = x;
        }
        if let Some(x) = self.rate {
            a.rate = x;
        }
        if let Some(x) = self.connect_timeout_ms {
            a.connect_timeout_ms = x;
        }
        if let Some(x) = self.request_timeout_ms {
            a.request_timeout_ms = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct CredentialsToml {
    pub source: Option<String>,
    pub service: Option<String>,
    pub account: Option<String>,
    pub env_var: Option<String>,
}
impl CredentialsToml {
    fn apply(self, c: &mut CredentialsConfig) {
        if let Some(x) = self.source.as_deref().and_then(parse_credential_kind) {
            c.source = x;
        }
        if let Some(x) = self.service {
            c.service = x;
        }
        if let Some(x) = self.account {
            c.account = x;
        }
        if let Some(x) = self.env_var {
            c.env_var = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct PipelineToml {
    pub initial_threshold: Option<usize>,
    pub threshold: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub read_size: Option<usize>,
}
impl PipelineToml {
    fn apply(self, p: &mut PipelineTuning) {
        if let Some(x) = self.initial_threshold {
            p.initial_threshold = x;
        }
        if let Some(x) = self.threshold {
            p.threshold = x;
        }
        if let Some(x) = self.queue_capacity {
            p.queue_capacity = x;
        }
        if let Some(x) = self.read_size {
            p.read_size = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct DecoderToml {
    pub ffmpeg_bin: Option<PathBuf>,
    pub extra_args: Option<Vec<String>>, // e.g., ["-af", "volume=1.5"]
}
impl DecoderToml {
    fn apply(self, d: &mut DecoderConfig) {
        if let Some(x) = self.ffmpeg_bin {
            d.ffmpeg_bin = Some(x);
        }
        if let Some(x) = self.extra_args {
            d.extra_args = x.into_iter().filter(|a| !a.is_empty()).collect();
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct PlaybackToml {
    pub backend: Option<String>,
    pub player: Option<String>,
    pub player_args: Option<Vec<String>>,
    pub device: Option<String>,
}
impl PlaybackToml {
    fn apply(self, p: &mut OutputConfig) {
        if let Some(x) = self.backend.as_deref().and_then(parse_backend) {
            p.backend = x;
        }
        if let Some(x) = self.player {
            p.player = Some(x);
        }
        if let Some(x) = self.player_args {
            p.player_args = Some(x);
        }
        if let Some(x) = self.device {
            p.device = Some(x);
        }
    }
}
