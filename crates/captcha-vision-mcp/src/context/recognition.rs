//! Async front for a synchronous recognition adapter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use captcha_vision::{RecognitionResult, Recognizer, VisionError};
use tokio::sync::Mutex;

use crate::types::{McpError, McpResult};

/// Extra time an adapter gets to report its own timeout before the caller
/// stops waiting for it.
const ADAPTER_GRACE: Duration = Duration::from_millis(250);

/// Runs one recognition call at a time per adapter (unless the adapter says
/// it is safe to overlap), on the blocking pool, with a deadline.
pub struct RecognitionService {
    recognizer: Arc<dyn Recognizer>,
    gate: Option<Arc<Mutex<()>>>,
    timeout: Duration,
}

impl RecognitionService {
    pub fn new(recognizer: Arc<dyn Recognizer>, timeout: Duration) -> Self {
        let gate = if recognizer.supports_concurrent_calls() {
            None
        } else {
            Some(Arc::new(Mutex::new(())))
        };
        Self {
            recognizer,
            gate,
            timeout,
        }
    }

    pub fn name(&self) -> &str {
        self.recognizer.name()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Recognize an encoded image. No retries.
    ///
    /// The returned text is trimmed and non-empty, and the confidence is
    /// clamped to `[0, 1]`. Time spent waiting for a serialized adapter
    /// counts against the timeout. The adapter is handed the deadline and
    /// stops there; one that ignores it stays busy until it returns, but the
    /// caller still gets a timeout error shortly after the deadline.
    pub async fn recognize(&self, image: Vec<u8>) -> McpResult<RecognitionResult> {
        let deadline = Instant::now() + self.timeout;
        let recognizer = self.recognizer.clone();
        let gate = self.gate.clone();

        let call = async move {
            let guard = match gate {
                Some(gate) => Some(gate.lock_owned().await),
                None => None,
            };
            tokio::task::spawn_blocking(move || {
                let _guard = guard;
                recognizer.recognize(&image, deadline)
            })
            .await
        };

        let backstop = tokio::time::Instant::from_std(deadline + ADAPTER_GRACE);
        let raw = match tokio::time::timeout_at(backstop, call).await {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(VisionError::Timeout(_)))) | Err(_) => {
                tracing::warn!("Recognizer {} timed out after {:?}", self.name(), self.timeout);
                return Err(VisionError::Timeout(self.timeout).into());
            }
            Ok(Ok(Err(e))) => return Err(e.into()),
            Ok(Err(join_err)) => {
                return Err(McpError::Recognition(format!(
                    "recognizer {} panicked: {join_err}",
                    self.name()
                )))
            }
        };

        normalize(raw)
    }
}

fn normalize(raw: RecognitionResult) -> McpResult<RecognitionResult> {
    let text = raw.text.trim();
    if text.is_empty() {
        return Err(McpError::Recognition(
            "recognizer returned no text".to_string(),
        ));
    }
    if !raw.confidence.is_finite() {
        return Err(McpError::Recognition(format!(
            "recognizer returned invalid confidence {}",
            raw.confidence
        )));
    }

    Ok(RecognitionResult {
        text: text.to_string(),
        confidence: raw.confidence.clamp(0.0, 1.0),
        elapsed: raw.elapsed,
    })
}
