//! Shared state handed to every tool call.

pub mod recognition;

use std::sync::Arc;

use captcha_vision::{Operation, PreprocessOptions, Recognizer};

use crate::config::ServerConfig;
use crate::types::{McpError, McpResult};

pub use recognition::RecognitionService;

/// Run CPU-bound image work (decode, pipeline, encode) on the blocking pool.
pub async fn run_blocking<T, F>(work: F) -> McpResult<T>
where
    F: FnOnce() -> McpResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| McpError::InternalError(format!("image task failed: {e}")))?
}

/// Everything a tool handler needs, built once at startup.
pub struct ToolContext {
    pub config: ServerConfig,
    pub recognition: RecognitionService,
}

impl ToolContext {
    pub fn new(config: ServerConfig, recognizer: Arc<dyn Recognizer>) -> Self {
        let recognition = RecognitionService::new(recognizer, config.recognition_timeout);
        Self {
            config,
            recognition,
        }
    }

    /// Use the recognizer the configuration names.
    pub fn from_config(config: ServerConfig) -> Self {
        let recognizer = config.build_recognizer();
        Self::new(config, recognizer)
    }

    /// Pipeline options with configured defaults for the given stages.
    pub fn preprocess_options(&self, operations: impl IntoIterator<Item = Operation>) -> PreprocessOptions {
        PreprocessOptions {
            operations: operations.into_iter().collect(),
            contrast: self.config.default_contrast as f32,
            sharpness: self.config.default_sharpness as f32,
            max_width: self.config.default_max_width,
            max_height: self.config.default_max_height,
            denoise_radius: self.config.denoise_radius,
        }
    }
}
