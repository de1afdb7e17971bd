//! Recognition adapters.
//!
//! A [`Recognizer`] turns final image bytes into text plus a confidence
//! score. The trait is synchronous; async callers run it on a blocking pool
//! and hand it the instant by which it must give up.

use std::io::{self, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::types::{RecognitionResult, VisionError, VisionResult};

/// Interval between exit checks while an engine program runs.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Something that can read the characters in a captcha image.
pub trait Recognizer: Send + Sync {
    /// Short name used in logs and `info` output.
    fn name(&self) -> &str;

    /// Recognize the text in an encoded image.
    ///
    /// Implementations that can block stop working at `deadline` and return
    /// [`VisionError::Timeout`], so a serialized caller is released on time.
    fn recognize(&self, image: &[u8], deadline: Instant) -> VisionResult<RecognitionResult>;

    /// Whether overlapping calls from several threads are safe.
    /// Callers serialize adapters that return `false`.
    fn supports_concurrent_calls(&self) -> bool {
        false
    }
}

/// Adapter used when no engine is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableRecognizer;

impl Recognizer for UnavailableRecognizer {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn recognize(&self, _image: &[u8], _deadline: Instant) -> VisionResult<RecognitionResult> {
        Err(VisionError::ModelNotAvailable(
            "no recognition engine configured".to_string(),
        ))
    }

    fn supports_concurrent_calls(&self) -> bool {
        true
    }
}

/// Runs an external program per image: bytes on stdin, result on stdout.
///
/// Stdout is either a JSON object `{"text": "...", "confidence": 0.93}` or
/// plain text. Without a reported confidence one is estimated from the text.
/// A program still running at the deadline is killed.
#[derive(Debug, Clone)]
pub struct CommandRecognizer {
    program: String,
    args: Vec<String>,
}

#[derive(Deserialize)]
struct CommandOutput {
    text: String,
    #[serde(default)]
    confidence: Option<f64>,
}

impl CommandRecognizer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn parse_output(stdout: &str) -> (String, f64) {
        let trimmed = stdout.trim();
        if trimmed.starts_with('{') {
            if let Ok(out) = serde_json::from_str::<CommandOutput>(trimmed) {
                let text = out.text.trim().to_string();
                let confidence = out
                    .confidence
                    .unwrap_or_else(|| estimate_confidence(&text));
                return (text, confidence);
            }
        }
        let text = trimmed.to_string();
        let confidence = estimate_confidence(&text);
        (text, confidence)
    }

    /// Poll until the child exits or the deadline passes.
    fn wait_until(&self, child: &mut Child, deadline: Instant) -> VisionResult<Option<ExitStatus>> {
        loop {
            let status = child.try_wait().map_err(|e| {
                VisionError::Recognition(format!("{} did not finish: {e}", self.program))
            })?;
            if status.is_some() {
                return Ok(status);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }
}

impl Recognizer for CommandRecognizer {
    fn name(&self) -> &str {
        &self.program
    }

    fn recognize(&self, image: &[u8], deadline: Instant) -> VisionResult<RecognitionResult> {
        let start = Instant::now();
        if start >= deadline {
            return Err(VisionError::Timeout(Duration::ZERO));
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                VisionError::ModelNotAvailable(format!("failed to start {}: {e}", self.program))
            })?;

        // Each pipe gets its own thread: a program may fill stdout or stderr
        // before it has read all of stdin.
        let writer = child.stdin.take().map(|mut stdin| {
            let image = image.to_vec();
            thread::spawn(move || match stdin.write_all(&image) {
                // Exiting without reading stdin is reported by the exit status.
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
                other => other,
            })
        });
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let Some(status) = self.wait_until(&mut child, deadline)? else {
            if let Err(e) = child.kill() {
                tracing::warn!("Failed to kill {}: {e}", self.program);
            }
            let _ = child.wait();
            tracing::warn!(
                "{} still running after {:?}, killed",
                self.program,
                deadline - start
            );
            // Pipe threads are left to finish on their own; a grandchild
            // may still hold the pipes open.
            return Err(VisionError::Timeout(deadline - start));
        };

        if let Some(Ok(Err(e))) = writer.map(JoinHandle::join) {
            return Err(VisionError::Recognition(format!(
                "failed to write image to {}: {e}",
                self.program
            )));
        }
        let stdout = collect(stdout);
        let stderr = collect(stderr);

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(VisionError::Recognition(format!(
                "{} exited with {}: {}",
                self.program,
                status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&stdout);
        let (text, confidence) = Self::parse_output(&stdout);

        Ok(RecognitionResult {
            text,
            confidence,
            elapsed: start.elapsed(),
        })
    }
}

fn drain(mut pipe: impl Read + Send + 'static) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn collect(reader: Option<JoinHandle<io::Result<Vec<u8>>>>) -> Vec<u8> {
    reader
        .and_then(|handle| handle.join().ok())
        .and_then(Result::ok)
        .unwrap_or_default()
}

/// Heuristic confidence for engines that report none.
///
/// Starts at 0.7, adds up to 0.2 as the text approaches six characters and
/// a bonus for the character mix, then clamps to `[0.1, 0.99]`. Empty text
/// scores zero.
pub fn estimate_confidence(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }

    let len = text.chars().count() as f64;
    let length_factor = (len / 6.0).min(1.0);

    let alpha = text.chars().all(char::is_alphabetic);
    let digits = text.chars().all(|c| c.is_ascii_digit());
    let alnum = text.chars().all(char::is_alphanumeric);
    let class_factor = if digits {
        0.1
    } else if alpha {
        0.15
    } else if alnum {
        0.2
    } else {
        0.0
    };

    (0.7 + length_factor * 0.2 + class_factor).clamp(0.1, 0.99)
}
