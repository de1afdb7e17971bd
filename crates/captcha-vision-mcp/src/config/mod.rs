//! Configuration loading and resolution.
//!
//! Every option has a default; environment variables override defaults and
//! command-line flags override both.

use std::sync::Arc;
use std::time::Duration;

use captcha_vision::{
    CommandRecognizer, DecodeLimits, ImageKind, Recognizer, UnavailableRecognizer,
    DEFAULT_MAX_IMAGE_BYTES, DEFAULT_MAX_PIXELS,
};

pub const ENV_MAX_IMAGE_SIZE: &str = "CAPTCHA_MCP_MAX_IMAGE_SIZE";
pub const ENV_MAX_IMAGE_PIXELS: &str = "CAPTCHA_MCP_MAX_IMAGE_PIXELS";
pub const ENV_RECOGNIZER: &str = "CAPTCHA_MCP_RECOGNIZER";
pub const ENV_TIMEOUT_SECS: &str = "CAPTCHA_MCP_TIMEOUT_SECS";
pub const ENV_DEBUG: &str = "CAPTCHA_MCP_DEBUG";

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const FRAME_OVERHEAD_BYTES: usize = 64 * 1024;

/// External recognition program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognizerCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Server options, fixed at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_image_bytes: usize,
    /// Largest decoded `width * height`, checked before pixels are allocated.
    pub max_image_pixels: u64,
    pub recognition_timeout: Duration,
    pub default_contrast: f64,
    pub default_sharpness: f64,
    pub default_max_width: u32,
    pub default_max_height: u32,
    pub default_confidence_threshold: f64,
    pub denoise_radius: u32,
    pub accepted_formats: Vec<ImageKind>,
    pub max_batch_size: usize,
    /// Longest accepted stdio line; a base64 payload at the image limit
    /// plus envelope overhead must fit.
    pub max_frame_bytes: usize,
    pub debug: bool,
    pub recognizer: Option<RecognizerCommand>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            max_image_pixels: DEFAULT_MAX_PIXELS,
            recognition_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            default_contrast: 1.5,
            default_sharpness: 1.2,
            default_max_width: captcha_vision::pipeline::DEFAULT_MAX_WIDTH,
            default_max_height: captcha_vision::pipeline::DEFAULT_MAX_HEIGHT,
            default_confidence_threshold: 0.8,
            denoise_radius: captcha_vision::pipeline::DEFAULT_DENOISE_RADIUS,
            accepted_formats: ImageKind::ALL.to_vec(),
            max_batch_size: 10,
            max_frame_bytes: frame_limit_for(DEFAULT_MAX_IMAGE_BYTES),
            debug: false,
            recognizer: None,
        }
    }
}

/// Values given on the command line. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub max_image_size: Option<usize>,
    pub max_image_pixels: Option<u64>,
    pub recognizer: Option<String>,
    pub recognizer_args: Vec<String>,
    pub timeout_secs: Option<u64>,
    pub debug: bool,
}

impl ServerConfig {
    /// Resolve from CLI overrides, then the process environment, then defaults.
    pub fn resolve(overrides: &ConfigOverrides) -> Self {
        Self::resolve_with(overrides, |key| std::env::var(key).ok())
    }

    /// Like [`ServerConfig::resolve`] with an explicit environment lookup.
    pub fn resolve_with(overrides: &ConfigOverrides, env: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(bytes) = overrides
            .max_image_size
            .or_else(|| parse_env(&env, ENV_MAX_IMAGE_SIZE))
        {
            config.set_max_image_bytes(bytes);
        }

        if let Some(pixels) = overrides
            .max_image_pixels
            .or_else(|| parse_env(&env, ENV_MAX_IMAGE_PIXELS))
        {
            config.max_image_pixels = pixels.max(1);
        }

        if let Some(secs) = overrides
            .timeout_secs
            .or_else(|| parse_env(&env, ENV_TIMEOUT_SECS))
        {
            config.recognition_timeout = Duration::from_secs(secs.max(1));
        }

        let program = overrides
            .recognizer
            .clone()
            .or_else(|| env(ENV_RECOGNIZER).filter(|p| !p.trim().is_empty()));
        config.recognizer = program.map(|program| RecognizerCommand {
            program,
            args: overrides.recognizer_args.clone(),
        });

        config.debug = overrides.debug || env(ENV_DEBUG).is_some_and(|v| is_truthy(&v));

        config
    }

    /// Change the image limit, keeping the frame limit in step.
    pub fn set_max_image_bytes(&mut self, bytes: usize) {
        self.max_image_bytes = bytes;
        self.max_frame_bytes = frame_limit_for(bytes);
    }

    pub fn decode_limits(&self) -> DecodeLimits {
        DecodeLimits {
            max_bytes: self.max_image_bytes,
            max_pixels: self.max_image_pixels,
            accepted: self.accepted_formats.clone(),
        }
    }

    /// Build the configured recognition adapter.
    pub fn build_recognizer(&self) -> Arc<dyn Recognizer> {
        match &self.recognizer {
            Some(cmd) => {
                tracing::info!("Using recognition command: {}", cmd.program);
                Arc::new(CommandRecognizer::new(cmd.program.clone(), cmd.args.clone()))
            }
            None => {
                tracing::warn!(
                    "No recognition engine configured. Recognition tools will fail until \
                     --recognizer or {ENV_RECOGNIZER} is set."
                );
                Arc::new(UnavailableRecognizer)
            }
        }
    }
}

fn frame_limit_for(max_image_bytes: usize) -> usize {
    max_image_bytes
        .saturating_mul(2)
        .saturating_add(FRAME_OVERHEAD_BYTES)
}

fn parse_env<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring invalid value for {key}: {raw:?}");
            None
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
