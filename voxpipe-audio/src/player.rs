//! Output through an external raw-PCM player process.
//!
//! PCM is piped into the player's stdin, so a write blocks until the player
//! has taken the samples off the pipe. Closing sends EOF and waits for the
//! player to finish what it already has.
//!
//! Supported players, in default preference order:
//! - aplay (ALSA)
//! - paplay / pacat (PulseAudio, PipeWire)
//! - play (SoX)
//! - ffplay

use crate::utils::find_on_path;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};
use voxpipe_core::{AudioSink, PcmFormat, SinkError};

const DEFAULT_PLAYERS: [&str; 5] = ["aplay", "paplay", "pacat", "play", "ffplay"];

/// A resolved player invocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl PlayerSpec {
    /// Build the invocation for a known player reading raw PCM from stdin.
    /// Unknown players get no arguments; supply them with [`with_args`](Self::with_args).
    pub fn for_program(program: PathBuf, format: PcmFormat) -> Self {
        let name = program
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_string();
        let rate = format.sample_rate_hz.to_string();
        let channels = format.channels.to_string();
        let args: Vec<String> = match name.as_str() {
            "aplay" => vec![
                "-q", "-t", "raw", "-f", "S16_LE", "-r", rate.as_str(), "-c", channels.as_str(), "-",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            "paplay" => vec![
                "--raw".to_string(),
                "--format=s16le".to_string(),
                format!("--rate={rate}"),
                format!("--channels={channels}"),
            ],
            "pacat" => vec![
                "--playback".to_string(),
                "--format=s16le".to_string(),
                format!("--rate={rate}"),
                format!("--channels={channels}"),
            ],
            "play" => vec![
                "-q", "-t", "raw", "-e", "signed", "-b", "16", "-r", rate.as_str(), "-c", channels.as_str(), "-",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            "ffplay" => vec![
                "-nodisp".to_string(),
                "-autoexit".to_string(),
                "-loglevel".to_string(),
                "error".to_string(),
                "-f".to_string(),
                "s16le".to_string(),
                "-ar".to_string(),
                rate,
                "-ch_layout".to_string(),
                if format.channels == 1 { "mono" } else { "stereo" }.to_string(),
                "-i".to_string(),
                "pipe:0".to_string(),
            ],
            _ => Vec::new(),
        };
        Self { program, args }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Pick a player: the preference if it resolves, otherwise the first
    /// known player found on `PATH`.
    pub fn detect(preference: Option<&str>, format: PcmFormat) -> Option<Self> {
        if let Some(p) = preference {
            match find_on_path(p) {
                Some(bin) => return Some(Self::for_program(bin, format)),
                None => warn!(target = "sink", player = %p, "Preferred player not found; detecting"),
            }
        }
        DEFAULT_PLAYERS
            .iter()
            .find_map(|name| find_on_path(name))
            .map(|bin| Self::for_program(bin, format))
    }

    fn name(&self) -> String {
        self.program
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

pub struct ProcessSink {
    spec: PlayerSpec,
    format: PcmFormat,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<String>>,
}

impl ProcessSink {
    pub fn open(spec: PlayerSpec, format: PcmFormat) -> Result<Self, SinkError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());
        debug!(target = "sink", command = ?cmd, "Starting player");

        let mut child = cmd
            .spawn()
            .map_err(|e| SinkError::Open(format!("{}: {e}", spec.program.display())))?;
        let stdin = child.stdin.take();
        let stderr = child.stderr.take().map(|mut err| {
            std::thread::spawn(move || {
                let mut s = String::new();
                let _ = err.read_to_string(&mut s);
                s
            })
        });
        info!(target = "sink", player = %spec.name(), %format, "Audio output opened");
        Ok(Self {
            spec,
            format,
            child: Some(child),
            stdin,
            stderr,
        })
    }

    pub fn program(&self) -> &Path {
        &self.spec.program
    }

    fn collect_stderr(&mut self) -> String {
        self.stderr
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default()
    }
}

impl AudioSink for ProcessSink {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn write(&mut self, pcm: &[u8]) -> Result<(), SinkError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| SinkError::Write("player input already closed".into()))?;
        stdin
            .write_all(pcm)
            .and_then(|_| stdin.flush())
            .map_err(|e| SinkError::Write(format!("{}: {e}", self.spec.name())))
    }

    fn close(&mut self) -> Result<(), SinkError> {
        // EOF lets the player drain what it already received
        drop(self.stdin.take());
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child
            .wait()
            .map_err(|e| SinkError::Close(format!("{}: {e}", self.spec.name())))?;
        let stderr = self.collect_stderr();
        if !stderr.trim().is_empty() {
            debug!(target = "sink", stderr = %stderr.trim(), "Player diagnostics");
        }
        if !status.success() {
            return Err(SinkError::Close(format!(
                "{} exited with {}: {}",
                self.spec.name(),
                status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl Drop for ProcessSink {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
