//! Shared fakes for the pipeline tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use voxpipe_core::{AudioSink, Decode, DecodeError, Decoded, PcmFormat, SinkError};

/// Decoder that echoes its input as PCM and records every cycle
#[derive(Clone, Default)]
pub struct RecordingDecoder {
    pub cycles: Arc<Mutex<Vec<Vec<u8>>>>,
    /// 1-based cycle numbers that fail
    pub fail_on: Vec<usize>,
    /// 1-based cycle numbers that panic
    pub panic_on: Vec<usize>,
}

impl RecordingDecoder {
    pub fn failing_on(cycles: &[usize]) -> Self {
        Self {
            fail_on: cycles.to_vec(),
            ..Default::default()
        }
    }

    pub fn cycle_sizes(&self) -> Vec<usize> {
        self.cycles.lock().unwrap().iter().map(|c| c.len()).collect()
    }

    pub fn decoded_bytes(&self) -> Vec<u8> {
        self.cycles.lock().unwrap().concat()
    }
}

impl Decode for RecordingDecoder {
    fn decode(&mut self, compressed: Vec<u8>) -> Result<Decoded, DecodeError> {
        let n = {
            let mut cycles = self.cycles.lock().unwrap();
            cycles.push(compressed.clone());
            cycles.len()
        };
        if self.panic_on.contains(&n) {
            panic!("decoder blew up on cycle {n}");
        }
        if self.fail_on.contains(&n) {
            return Err(DecodeError::Exit {
                code: Some(1),
                diagnostics: format!("cycle {n}: invalid data"),
            });
        }
        Ok(Decoded {
            pcm: compressed,
            diagnostics: String::new(),
        })
    }
}

#[derive(Debug, Default)]
pub struct SinkLog {
    pub written: Vec<u8>,
    pub writes: usize,
    pub closes: usize,
    pub opens: usize,
}

/// Output that records writes and close calls
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub log: Arc<Mutex<SinkLog>>,
    /// Fail the n-th write (1-based)
    pub fail_write: Option<usize>,
}

impl RecordingSink {
    pub fn failing_write(n: usize) -> Self {
        Self {
            fail_write: Some(n),
            ..Default::default()
        }
    }

    pub fn opened(&self) -> Self {
        self.log.lock().unwrap().opens += 1;
        self.clone()
    }

    pub fn closes(&self) -> usize {
        self.log.lock().unwrap().closes
    }

    pub fn writes(&self) -> usize {
        self.log.lock().unwrap().writes
    }

    pub fn opens(&self) -> usize {
        self.log.lock().unwrap().opens
    }

    pub fn written(&self) -> Vec<u8> {
        self.log.lock().unwrap().written.clone()
    }
}

impl AudioSink for RecordingSink {
    fn format(&self) -> PcmFormat {
        PcmFormat::SPEECH
    }

    fn write(&mut self, pcm: &[u8]) -> Result<(), SinkError> {
        let mut log = self.log.lock().unwrap();
        log.writes += 1;
        if self.fail_write == Some(log.writes) {
            return Err(SinkError::Write("device unplugged".into()));
        }
        log.written.extend_from_slice(pcm);
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.log.lock().unwrap().closes += 1;
        Ok(())
    }
}

/// Deterministic payload of `len` bytes
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

/// Request captured by [`serve_once`]
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub head: String,
    pub body: Vec<u8>,
}

/// Serve one HTTP/1.1 response on a random local port. The body is written
/// in the given pieces with a flush between each one.
pub async fn serve_once(
    status: &str,
    pieces: Vec<Vec<u8>>,
) -> (String, oneshot::Receiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let status = status.to_string();
    let (req_tx, req_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        let _ = req_tx.send(request);

        let total: usize = pieces.iter().map(|p| p.len()).sum();
        let head = format!(
            "HTTP/1.1 {status}\r\nContent-Type: audio/mpeg\r\nContent-Length: {total}\r\nConnection: close\r\n\r\n"
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        for piece in pieces {
            if socket.write_all(&piece).await.is_err() {
                return;
            }
            let _ = socket.flush().await;
            tokio::task::yield_now().await;
        }
        let _ = socket.shutdown().await;
    });

    (format!("http://{addr}/v1/audio/speech"), req_rx)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> CapturedRequest {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut tmp).await.unwrap();
        assert!(n > 0, "client closed before sending headers");
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|l| {
            let (k, v) = l.split_once(':')?;
            k.eq_ignore_ascii_case("content-length")
                .then(|| v.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = socket.read(&mut tmp).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
    }
    CapturedRequest {
        head,
        body: buf[header_end..].to_vec(),
    }
}

/// An address nothing listens on
pub async fn refused_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/v1/audio/speech")
}
