//! ffmpeg-backed decode step.
//!
//! Every call spawns one ffmpeg process, feeds it the whole buffer on stdin,
//! and reads raw PCM from stdout and diagnostics from stderr until it exits.
//! The process never outlives the call: on any I/O failure it is killed and
//! reaped before the error is returned.

use crate::utils::find_binary;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use tracing::{debug, warn};
use voxpipe_core::{Decode, DecodeError, Decoded, PcmFormat};

#[derive(Clone, Debug)]
pub struct FfmpegConfig {
    pub ffmpeg_bin: PathBuf,
    /// Arguments placed before the input (logging flags and the like)
    pub global_args: Vec<String>,
    /// Extra arguments placed right before the output
    pub extra_args: Vec<String>,
    pub format: PcmFormat,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: find_binary("FFMPEG_BIN", "ffmpeg").unwrap_or_else(|| PathBuf::from("ffmpeg")),
            global_args: vec![
                "-hide_banner".to_string(),
                "-loglevel".to_string(),
                "error".to_string(),
            ],
            extra_args: Vec::new(),
            format: PcmFormat::SPEECH,
        }
    }
}

pub struct FfmpegDecoder {
    cfg: FfmpegConfig,
}

impl FfmpegDecoder {
    pub fn new(cfg: FfmpegConfig) -> Self {
        debug!(target = "decode", bin = ?cfg.ffmpeg_bin, format = %cfg.format, "Using ffmpeg decoder");
        Self { cfg }
    }

    pub fn config(&self) -> &FfmpegConfig {
        &self.cfg
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.cfg.ffmpeg_bin);
        cmd.args(&self.cfg.global_args);
        cmd.arg("-i").arg("pipe:0");
        cmd.args(&self.cfg.extra_args);
        cmd.arg("-f").arg("s16le");
        cmd.arg("-ar").arg(self.cfg.format.sample_rate_hz.to_string());
        cmd.arg("-ac").arg(self.cfg.format.channels.to_string());
        cmd.arg("pipe:1");
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }
}

impl Decode for FfmpegDecoder {
    fn decode(&mut self, compressed: Vec<u8>) -> Result<Decoded, DecodeError> {
        let mut cmd = self.command();
        debug!(target = "decode", bytes = compressed.len(), command = ?cmd, "Running ffmpeg");
        let mut child = cmd.spawn().map_err(DecodeError::Spawn)?;

        let (stdin, stdout, stderr) = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => {
                reap(&mut child);
                return Err(DecodeError::Other("ffmpeg pipes unavailable".into()));
            }
        };

        // Feed stdin from a helper thread so a full stdout pipe cannot deadlock us
        let feeder = std::thread::spawn(move || {
            let mut stdin = stdin;
            stdin.write_all(&compressed)
        });

        let collected = collect_output(&mut child, stdout, stderr);
        let fed = feeder
            .join()
            .map_err(|_| DecodeError::Other("ffmpeg stdin writer panicked".into()))?;
        let (mut pcm, diagnostics, status) = collected?;

        if !status.success() {
            return Err(DecodeError::Exit {
                code: status.code(),
                diagnostics,
            });
        }
        if let Err(e) = fed {
            warn!(target = "decode", error = %e, "ffmpeg stopped reading input early");
            return Err(DecodeError::Io(e));
        }

        let frame = self.cfg.format.frame_bytes();
        if pcm.len() % frame != 0 {
            warn!(target = "decode", bytes = pcm.len(), "Dropping partial PCM frame");
            pcm.truncate(pcm.len() - pcm.len() % frame);
        }
        Ok(Decoded { pcm, diagnostics })
    }
}

/// Read stdout to the end (stderr on a helper thread) and wait for exit.
/// On any failure the child is killed and reaped before returning.
fn collect_output<O, E>(
    child: &mut Child,
    mut stdout: O,
    mut stderr: E,
) -> Result<(Vec<u8>, String, ExitStatus), DecodeError>
where
    O: Read,
    E: Read + Send + 'static,
{
    let diag_reader = std::thread::spawn(move || {
        let mut buf = Vec::new();
        stderr.read_to_end(&mut buf).map(|_| buf)
    });

    let mut pcm = Vec::new();
    if let Err(e) = stdout.read_to_end(&mut pcm) {
        reap(child);
        let _ = diag_reader.join();
        return Err(DecodeError::Io(e));
    }
    let status = match child.wait() {
        Ok(status) => status,
        Err(e) => {
            reap(child);
            let _ = diag_reader.join();
            return Err(DecodeError::Io(e));
        }
    };
    let diagnostics = match diag_reader.join() {
        Ok(Ok(buf)) => String::from_utf8_lossy(&buf).to_string(),
        Ok(Err(e)) => return Err(DecodeError::Io(e)),
        Err(_) => return Err(DecodeError::Other("ffmpeg stderr reader panicked".into())),
    };
    Ok((pcm, diagnostics, status))
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io;

    struct BrokenPipe;

    impl Read for BrokenPipe {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe torn down"))
        }
    }

    #[test]
    fn read_failure_kills_and_reaps_the_child() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("sleep 30")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        let started = std::time::Instant::now();

        let result = collect_output(&mut child, BrokenPipe, io::empty());

        assert!(matches!(result, Err(DecodeError::Io(ref e)) if e.kind() == io::ErrorKind::BrokenPipe));
        assert!(matches!(child.try_wait(), Ok(Some(_))));
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }

    #[test]
    fn collects_stdout_stderr_and_status() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("printf pcm; printf warn >&2; exit 3")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let stdout = child.stdout.take().unwrap();
        let stderr = child.stderr.take().unwrap();

        let (pcm, diagnostics, status) = collect_output(&mut child, stdout, stderr).unwrap();

        assert_eq!(pcm, b"pcm");
        assert_eq!(diagnostics, "warn");
        assert_eq!(status.code(), Some(3));
    }
}
