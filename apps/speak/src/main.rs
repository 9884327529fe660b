mod config;
use config::{OutputBackend, SpeakConfig};
use std::fs::File;
use std::process::ExitCode;
use std::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};
use voxpipe_audio::{FfmpegDecoder, ProcessSink};
use voxpipe_core::{NullSink, PcmFormat, Pipeline, SpeechReport};

const USAGE: &str = "Usage: speak <text>";

#[derive(Debug, PartialEq, Eq)]
enum Invocation {
    Speak(String),
    Help,
    Version,
}

/// Join the positional words with single spaces.
///
/// `-h`/`--help` and `-V`/`--version` are only flags when given alone, so
/// text such as "the flag is -h" is spoken as written. A leading `--` is
/// dropped, which lets `speak -- -h` say "-h".
fn parse_args<I>(args: I) -> Result<Invocation, String>
where
    I: IntoIterator<Item = String>,
{
    let mut words: Vec<String> = args.into_iter().collect();
    if let [only] = words.as_slice() {
        match only.as_str() {
            "-h" | "--help" => return Ok(Invocation::Help),
            "-V" | "--version" => return Ok(Invocation::Version),
            _ => {}
        }
    }
    if words.first().map(String::as_str) == Some("--") {
        words.remove(0);
    }
    let text = words.join(" ");
    if text.trim().is_empty() {
        return Err(format!("No text provided. {USAGE}"));
    }
    Ok(Invocation::Speak(text))
}

/// Like [`parse_args`], but a usage error is logged and yields `None`.
fn invocation<I>(args: I) -> Option<Invocation>
where
    I: IntoIterator<Item = String>,
{
    match parse_args(args) {
        Ok(inv) => Some(inv),
        Err(msg) => {
            error!(target = "speak", "{msg}");
            None
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,voxpipe_core=info,voxpipe_audio=info,speak=info"));
    let console = fmt::layer().with_target(true).with_writer(std::io::stderr);

    // Optional plain-text mirror of the console log
    let mut file_error = None;
    let file: Option<Box<dyn Layer<Registry> + Send + Sync>> = std::env::var("SPEAK_LOG_FILE")
        .ok()
        .filter(|p| !p.trim().is_empty())
        .and_then(|path| match File::options().create(true).append(true).open(&path) {
            Ok(f) => Some(
                fmt::layer()
                    .with_target(true)
                    .with_ansi(false)
                    .with_writer(Mutex::new(f))
                    .boxed(),
            ),
            Err(e) => {
                file_error = Some(format!("{path}: {e}"));
                None
            }
        });

    tracing_subscriber::registry()
        .with(file)
        .with(filter)
        .with(console)
        .init();

    if let Some(e) = file_error {
        warn!(target = "speak", error = %e, "Cannot open log file; logging to console only");
    }
}

async fn run(text: &str, cfg: &SpeakConfig) -> voxpipe_core::Result<SpeechReport> {
    let pipeline = Pipeline::new(cfg.pipeline_config(), cfg.credential_source())?;
    let decoder = FfmpegDecoder::new(cfg.ffmpeg_config()?);
    let format = PcmFormat::SPEECH;

    match cfg.playback.backend {
        OutputBackend::Process => {
            let spec = cfg.player_spec()?;
            pipeline
                .speak(text, decoder, move || ProcessSink::open(spec, format))
                .await
        }
        OutputBackend::Null => {
            pipeline
                .speak(text, decoder, move || Ok(NullSink::new(format)))
                .await
        }
        #[cfg(feature = "device")]
        OutputBackend::Device => {
            let device = voxpipe_audio::DeviceConfig {
                device_name: cfg.playback.device.clone(),
                ..voxpipe_audio::DeviceConfig::default()
            };
            pipeline
                .speak(text, decoder, move || {
                    voxpipe_audio::CpalSink::open(format, device)
                })
                .await
        }
        #[cfg(not(feature = "device"))]
        OutputBackend::Device => Err(voxpipe_core::VoxError::Config(
            "device playback needs the `device` feature; rebuild with --features device".into(),
        )),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let text = match invocation(std::env::args().skip(1)) {
        Some(Invocation::Speak(text)) => text,
        Some(Invocation::Help) => {
            println!("{USAGE}\n\nSynthesizes <text> with the speech API and plays it as it streams.");
            return ExitCode::SUCCESS;
        }
        Some(Invocation::Version) => {
            println!("speak {}", env!("CARGO_PKG_VERSION"));
            return ExitCode::SUCCESS;
        }
        None => return ExitCode::from(1),
    };

    let cfg = SpeakConfig::load();
    info!(
        target = "speak",
        chars = text.chars().count(),
        voice = %cfg.api.voice,
        model = %cfg.api.model,
        "Speaking"
    );

    match run(&text, &cfg).await {
        Ok(report) => {
            if !report.fetch.is_ok() || report.playback.failed_cycles > 0 || report.playback.device_failed {
                warn!(
                    target = "speak",
                    fetch_error = report.fetch.error.as_deref().unwrap_or("-"),
                    failed_cycles = report.playback.failed_cycles,
                    failed_writes = report.playback.failed_writes,
                    "Playback finished with gaps"
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(target = "speak", error = %e, "Speech failed");
            ExitCode::from(1)
        }
    }
}
