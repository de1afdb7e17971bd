//! CaptchaVision: core library for captcha image decoding, preprocessing and recognition.

pub mod codec;
pub mod filters;
pub mod pipeline;
pub mod recognizer;
pub mod types;

pub use codec::{decode_base64, decode_bytes, DecodeLimits, ImageBuffer, DEFAULT_MAX_IMAGE_BYTES, DEFAULT_MAX_PIXELS};
pub use pipeline::{preprocess, PipelineOutcome, PreprocessOptions};
pub use recognizer::{estimate_confidence, CommandRecognizer, Recognizer, UnavailableRecognizer};
pub use types::*;
